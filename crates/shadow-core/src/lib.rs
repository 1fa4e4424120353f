//! Core types for the shadow-compare differential proxy.
//!
//! This crate holds everything that is independent of a concrete backend
//! driver or client protocol:
//!
//! - [`Value`] / [`ColumnMeta`] - normalized cell values and column metadata
//! - [`Outcome`] - the normalized result of running one statement on one backend
//! - [`Backend`] - the seam implemented by real drivers and test doubles
//! - [`ComparePolicy`] - equivalence tables and comparison modes
//! - [`Comparator`] - decides equivalence of two outcomes
//! - [`DivergenceReport`] - the immutable record emitted per statement
//!
//! # Architecture
//!
//! ```text
//! shadow-core (this crate)
//!    │
//!    ├─── shadow-mysql-backend  (implements Backend over mysql_async)
//!    │
//!    └─── shadow-compare        (session, dispatcher, reconciler, wire shim)
//! ```
//!
//! # Example
//!
//! ```rust
//! use shadow_core::{Classification, ColumnMeta, ComparePolicy, Comparator, Outcome, ResultSet, Value};
//!
//! let rows = ResultSet::new(
//!     vec![ColumnMeta::new("1", "BIGINT")],
//!     vec![vec![Value::Int(1)]],
//! );
//! let comparator = Comparator::new(ComparePolicy::default());
//! let classification = comparator.classify(
//!     &Outcome::Rows(rows.clone()),
//!     &Outcome::Rows(rows),
//! );
//! assert_eq!(classification, Classification::Match);
//! ```

pub mod backend;
pub mod compare;
pub mod outcome;
pub mod policy;
pub mod report;
pub mod values;

pub use backend::{Backend, BackendError, Role, StatementId};
pub use compare::{Classification, Comparator, ShapeDifference};
pub use outcome::{Failure, FailureKind, Outcome, PreparedShape, ResultSet};
pub use policy::{
    ColumnNameMatch, ComparePolicy, ErrorEquivalence, OrderingMode, PolicyError, ReconcilePolicy,
    TypeEquivalence,
};
pub use report::{DivergenceReport, SideTiming, StatementKind};
pub use values::{ColumnMeta, Value};
