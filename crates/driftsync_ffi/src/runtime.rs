//! The embedded tokio runtime backing blocking FFI entry points.
//!
//! Hosts call into driftsync from plain threads; the async core runs on a
//! small runtime created on first use and kept for the process lifetime.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::Runtime;

/// The process-wide runtime.
pub fn runtime() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("driftsync")
            .enable_all()
            .build()
            .expect("failed to build the driftsync runtime")
    })
}

/// Runs `future` to completion on the embedded runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    runtime().block_on(future)
}
