//! Process-wide log forwarding for embedding hosts.
//!
//! Library code logs through `tracing`. Hosts that cannot set up their own
//! subscriber (FFI consumers in particular) call [`install`] with a [`LogSink`];
//! the first install registers a forwarding subscriber layer, later installs
//! just swap the active sink. With no sink installed forwarding is a no-op.

use std::fmt::Write as _;
use std::sync::Once;

use parking_lot::RwLock;
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// Receives formatted log lines from the library.
pub trait LogSink: Send + Sync {
    /// Called once per event at or below the installed level.
    fn log(&self, level: Level, message: &str);
}

struct Installed {
    sink: Box<dyn LogSink>,
    max_level: LevelFilter,
}

static ACTIVE: RwLock<Option<Installed>> = RwLock::new(None);
static SUBSCRIBER: Once = Once::new();

/// Installs `sink` as the process-wide log receiver for events at or below
/// `max_level`. A later install replaces the sink; there is no uninstall short
/// of installing a sink that discards everything.
pub fn install(sink: Box<dyn LogSink>, max_level: Level) {
    SUBSCRIBER.call_once(|| {
        // Fails when the host already set a global subscriber; events then flow
        // to that subscriber instead of the sink.
        let _ = tracing_subscriber::registry().with(ForwardLayer).try_init();
    });
    *ACTIVE.write() = Some(Installed {
        sink,
        max_level: LevelFilter::from_level(max_level),
    });
}

struct ForwardLayer;

impl<S: Subscriber> Layer<S> for ForwardLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let guard = ACTIVE.read();
        let Some(installed) = guard.as_ref() else {
            return;
        };
        let level = *event.metadata().level();
        if level > installed.max_level {
            return;
        }

        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));
        installed.sink.log(level, &message);
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.0, "{value:?}");
        } else {
            if !self.0.is_empty() {
                self.0.push(' ');
            }
            let _ = write!(self.0, "{}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.0.push_str(value);
        } else {
            if !self.0.is_empty() {
                self.0.push(' ');
            }
            let _ = write!(self.0, "{}={}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Recorder(Arc<Mutex<Vec<(Level, String)>>>);

    impl LogSink for Recorder {
        fn log(&self, level: Level, message: &str) {
            self.0.lock().push((level, message.to_owned()));
        }
    }

    #[test]
    fn forwards_events_to_installed_sink() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        install(Box::new(Recorder(Arc::clone(&lines))), Level::INFO);

        tracing::warn!("pool draining");
        tracing::trace!("filtered out");

        let lines = lines.lock();
        assert!(lines
            .iter()
            .any(|(level, msg)| *level == Level::WARN && msg.contains("pool draining")));
        assert!(!lines.iter().any(|(_, msg)| msg.contains("filtered out")));
    }
}
