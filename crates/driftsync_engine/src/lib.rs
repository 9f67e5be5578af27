//! # driftsync sync engine
//!
//! Coordination between a local driftsync database and a host-implemented
//! backend connector.
//!
//! This crate provides:
//! - One-shot completion handles, completable from any thread
//! - The [`BackendConnector`] trait and its async [`ConnectorBridge`]
//! - A command-driven sync client (connect, disconnect, trigger uploads)
//! - An upload actor draining the CRUD queue through the connector
//! - Executor-agnostic task hand-off: the engine owns futures, the host spawns
//!
//! ## Key invariants
//!
//! - A completion handle completes at most once; misuse is a deterministic error
//! - Credentials are fetched fresh for every connection attempt
//! - Connector failures are transient: surfaced into the sync status, retried on
//!   the next wakeup, never fatal to the client
//! - The engine runs no timers of its own

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod completion;
mod connector;
mod error;
mod tasks;

pub use client::SyncClient;
pub use completion::{CompletionFuture, CompletionHandle};
pub use connector::{BackendConnector, ConnectorBridge, Credentials};
pub use error::{CompletionError, ConnectorError, EngineError, EngineResult};
pub use tasks::{BoxedTask, SyncTasks};
