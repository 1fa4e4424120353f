//! Testing utilities for MySQL-protocol backends
//!
//! Docker container management for end-to-end tests that need a real
//! reference and candidate server.

pub mod container;

pub use container::DatabaseContainer;
