//! MySQL-protocol backend connections for shadow-compare.
//!
//! Implements [`shadow_core::Backend`] on top of `mysql_async`. Works with any
//! server that speaks the MySQL protocol (MySQL, MariaDB, TiDB, ...).
//!
//! # Structure
//!
//! - `endpoint`: host/port/credentials plus the connection options string
//! - `convert`: MySQL columns and values → normalized `shadow_core` types
//! - `connection`: the [`MySqlBackend`] itself
//! - `testing`: Docker containers for integration tests

mod connection;
pub mod convert;
mod endpoint;
pub mod testing;

pub use connection::MySqlBackend;
pub use endpoint::{BackendEndpoint, OptionsError};
