//! casmir-db: typed gateway over the remote metadata store
//!
//! The store itself is external (PostgREST-style HTTP API backed by the
//! `files` and `file_contents` tables). This crate exposes its narrow
//! contract as [`MetadataGateway`], with two implementations:
//!   - [`RestGateway`]: the production HTTP client
//!   - [`MemoryGateway`]: an in-process backend for integration tests

pub mod gateway;
pub mod memory;
pub mod rest;

pub use gateway::{truncate_error, MetadataGateway, ERROR_TRUNCATE_LEN};
pub use memory::MemoryGateway;
pub use rest::RestGateway;
