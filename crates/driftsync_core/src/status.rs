//! Sync status snapshots and their change tracker.
//!
//! Status is exposed as immutable [`SyncStatus`] snapshots behind an `Arc`.
//! Mutations go through [`SyncStatusTracker::update`], which copies the current
//! snapshot, applies the change, and only swaps and notifies watchers when the
//! result actually differs.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::watch::{CallbackListeners, ListenerHandle};

/// Point-in-time view of the sync machinery.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    /// A connection to the backend is established.
    pub connected: bool,
    /// A connection attempt is in progress.
    pub connecting: bool,
    /// A CRUD upload batch is running.
    pub uploading: bool,
    /// Download application is in progress.
    pub downloading: bool,
    /// Last upload failure, cleared on the next successful upload.
    pub upload_error: Option<String>,
    /// Last connection or download failure, cleared on reconnect.
    pub download_error: Option<String>,
    /// Per-stream download state.
    pub streams: Vec<SyncStreamStatus>,
}

impl SyncStatus {
    /// Whether any error is currently recorded.
    pub fn has_error(&self) -> bool {
        self.upload_error.is_some() || self.download_error.is_some()
    }
}

/// Subscription and download state of one sync stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStreamStatus {
    /// Stream name.
    pub name: String,
    /// Parameters this subscription was created with. The same stream can be
    /// subscribed to multiple times with different parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    /// The subscription has been acknowledged by the sync service.
    pub is_active: bool,
    /// The stream is included by default, without an explicit subscription.
    /// Both this and `has_explicit_subscription` hold when a default stream is
    /// also subscribed explicitly.
    pub is_default: bool,
    /// The stream has been subscribed to explicitly.
    pub has_explicit_subscription: bool,
    /// The initial download for this stream has completed at least once.
    pub has_synced: bool,
    /// For streams with a time-to-live, when the subscription expires unless
    /// renewed. Unix seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// When data from this stream last finished syncing. Unix seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<i64>,
    /// Download progress, when a download is active.
    pub progress: Option<ProgressCounters>,
}

impl SyncStreamStatus {
    /// A never-synced, unacknowledged subscription to `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Operation counters for an active download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressCounters {
    /// Operations applied so far.
    pub completed: i64,
    /// Total operations in the current download.
    pub total: i64,
}

impl ProgressCounters {
    /// Completed fraction in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total <= 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Shared holder for the current [`SyncStatus`] snapshot.
#[derive(Clone, Default)]
pub struct SyncStatusTracker {
    current: Arc<Mutex<Arc<SyncStatus>>>,
    listeners: CallbackListeners<()>,
}

impl SyncStatusTracker {
    /// Creates a cell holding the default (disconnected, idle) status.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot. The returned value never changes; call again for
    /// later state.
    pub fn snapshot(&self) -> Arc<SyncStatus> {
        Arc::clone(&self.current.lock())
    }

    /// Registers a callback invoked after every status change. The callback
    /// receives no payload; read [`Self::snapshot`] for the new state.
    #[must_use = "dropping the handle unregisters the callback"]
    pub fn watch(&self, callback: impl Fn() + Send + Sync + 'static) -> ListenerHandle<()> {
        self.listeners.register(move |()| callback())
    }

    /// Applies `change` to a copy of the current status. Watchers are notified
    /// only if the copy differs from the current snapshot.
    pub fn update(&self, change: impl FnOnce(&mut SyncStatus)) {
        let changed = {
            let mut current = self.current.lock();
            let mut next = SyncStatus::clone(&current);
            change(&mut next);
            if next == **current {
                false
            } else {
                *current = Arc::new(next);
                true
            }
        };
        if changed {
            self.listeners.notify(&());
        }
    }

    /// Marks a connection attempt in progress.
    pub fn set_connecting(&self) {
        self.update(|status| {
            status.connecting = true;
            status.connected = false;
        });
    }

    /// Marks the backend connection established and clears the download error.
    pub fn set_connected(&self) {
        self.update(|status| {
            status.connecting = false;
            status.connected = true;
            status.download_error = None;
        });
    }

    /// Marks the connection closed and resets transient flags.
    pub fn set_disconnected(&self) {
        self.update(|status| {
            status.connecting = false;
            status.connected = false;
            status.uploading = false;
            status.downloading = false;
        });
    }

    /// Sets whether an upload batch is running.
    pub fn set_uploading(&self, uploading: bool) {
        self.update(|status| status.uploading = uploading);
    }

    /// Records an upload failure.
    pub fn set_upload_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.update(|status| {
            status.uploading = false;
            status.upload_error = Some(error);
        });
    }

    /// Clears a previously recorded upload failure.
    pub fn clear_upload_error(&self) {
        self.update(|status| status.upload_error = None);
    }

    /// Records a connection or download failure.
    pub fn set_download_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.update(|status| {
            status.connecting = false;
            status.connected = false;
            status.downloading = false;
            status.download_error = Some(error);
        });
    }

    /// Clears a previously recorded connection or download failure.
    pub fn clear_download_error(&self) {
        self.update(|status| status.download_error = None);
    }

    /// Updates the progress counters of one stream, leaving others untouched.
    /// A stream whose progress finishes is marked synced with the current time.
    pub fn update_stream_progress(&self, name: &str, progress: Option<ProgressCounters>) {
        self.update(|status| {
            if let Some(stream) = status.streams.iter_mut().find(|s| s.name == name) {
                if progress.is_none() && stream.progress.is_some() {
                    stream.has_synced = true;
                    stream.last_synced_at = Some(unix_now());
                }
                stream.progress = progress;
            }
            status.downloading = status.streams.iter().any(|s| s.progress.is_some());
        });
    }

    /// Replaces the per-stream download state.
    pub fn update_streams(&self, streams: Vec<SyncStreamStatus>) {
        self.update(|status| {
            status.downloading = streams
                .iter()
                .any(|stream| stream.progress.is_some());
            status.streams = streams;
        });
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}
