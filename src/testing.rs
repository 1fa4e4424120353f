//! Test infrastructure for sessions without real databases
//!
//! [`ScriptedBackend`] implements [`shadow_core::Backend`] with canned
//! outcomes per statement, optional delays, hangs and connection loss, and
//! exposes counters through a [`ScriptHandle`] that stays usable after the
//! backend is boxed into a session.

pub mod scripted;

pub use crate::observer::MemorySink;
pub use scripted::{ScriptHandle, ScriptedBackend, Step};
