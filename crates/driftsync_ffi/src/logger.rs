//! Routes library logs to a host-supplied C callback.

use std::ffi::CString;

use driftsync_core::logger::{install, LogSink};
use tracing::Level;

use crate::error::{clear_last_error, fail, DriftSyncResult};

/// Log level values crossing the C boundary. ERROR is the most severe.
pub const DRIFTSYNC_LOG_ERROR: i32 = 1;
/// WARN level.
pub const DRIFTSYNC_LOG_WARN: i32 = 2;
/// INFO level.
pub const DRIFTSYNC_LOG_INFO: i32 = 3;
/// DEBUG level.
pub const DRIFTSYNC_LOG_DEBUG: i32 = 4;
/// TRACE level, the least severe.
pub const DRIFTSYNC_LOG_TRACE: i32 = 5;

/// Callback receiving one formatted log line per event. The message pointer is
/// only valid for the duration of the call.
pub type DriftSyncLogCallback = extern "C" fn(level: i32, message: *const std::ffi::c_char);

struct CallbackSink {
    callback: DriftSyncLogCallback,
}

impl LogSink for CallbackSink {
    fn log(&self, level: Level, message: &str) {
        let Ok(message) = CString::new(message) else {
            return;
        };
        (self.callback)(level_to_c(level), message.as_ptr());
    }
}

fn level_to_c(level: Level) -> i32 {
    match level {
        Level::ERROR => DRIFTSYNC_LOG_ERROR,
        Level::WARN => DRIFTSYNC_LOG_WARN,
        Level::INFO => DRIFTSYNC_LOG_INFO,
        Level::DEBUG => DRIFTSYNC_LOG_DEBUG,
        Level::TRACE => DRIFTSYNC_LOG_TRACE,
    }
}

fn level_from_c(level: i32) -> Option<Level> {
    match level {
        DRIFTSYNC_LOG_ERROR => Some(Level::ERROR),
        DRIFTSYNC_LOG_WARN => Some(Level::WARN),
        DRIFTSYNC_LOG_INFO => Some(Level::INFO),
        DRIFTSYNC_LOG_DEBUG => Some(Level::DEBUG),
        DRIFTSYNC_LOG_TRACE => Some(Level::TRACE),
        _ => None,
    }
}

/// Installs `callback` as the process-wide log receiver for events at or below
/// `max_level`. Calling again replaces the previous callback. The callback may
/// fire from any thread and must not call back into the library.
#[no_mangle]
pub extern "C" fn driftsync_install_logger(
    max_level: i32,
    callback: DriftSyncLogCallback,
) -> DriftSyncResult {
    clear_last_error();
    let Some(level) = level_from_c(max_level) else {
        return fail(
            DriftSyncResult::InvalidArgument,
            format!("unknown log level {max_level}"),
        );
    };
    install(Box::new(CallbackSink { callback }), level);
    DriftSyncResult::Ok
}
