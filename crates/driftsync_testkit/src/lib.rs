//! # driftsync testkit
//!
//! Test utilities for driftsync.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - A scriptable backend connector for engine and FFI tests

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod connector;
pub mod fixtures;

pub use connector::{ScriptedConnector, UploadScript};
pub use fixtures::{todos_schema, TestDatabase};
