//! Outcome comparison.
//!
//! The comparator is pure: given the same two outcomes and policy it always
//! returns the same classification. Checks run in a fixed order and stop at
//! the first difference, so a report carries one concrete counterexample
//! rather than an exhaustive diff:
//!
//! 1. failure vs failure (error-code equivalence)
//! 2. failure vs success
//! 3. shape (column count, names, type compatibility)
//! 4. row count (affected rows for results without columns)
//! 5. cell values, row by row and column by column

use crate::backend::Role;
use crate::outcome::{Outcome, PreparedShape, ResultSet};
use crate::policy::{ComparePolicy, OrderingMode};
use crate::report::{DivergenceReport, SideTiming, StatementKind};
use crate::values::{ColumnMeta, Value};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// What made two result shapes incompatible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeDifference {
    /// One side prepared a statement, the other returned a result set.
    OutcomeKind {
        reference: String,
        candidate: String,
    },
    /// Different number of columns.
    ColumnCount { reference: usize, candidate: usize },
    /// Column names differ.
    ColumnName {
        column: usize,
        reference: String,
        candidate: String,
    },
    /// Declared types are not in one equivalence class.
    ColumnType {
        column: usize,
        reference: String,
        candidate: String,
    },
    /// Nullability differs (only when enabled by policy).
    Nullability {
        column: usize,
        reference: bool,
        candidate: bool,
    },
    /// Declared length differs (only when enabled by policy).
    Length {
        column: usize,
        reference: u32,
        candidate: u32,
    },
    /// Prepared statements take a different number of parameters.
    ParamCount { reference: u16, candidate: u16 },
}

impl fmt::Display for ShapeDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeDifference::OutcomeKind {
                reference,
                candidate,
            } => write!(f, "outcome kind {reference} vs {candidate}"),
            ShapeDifference::ColumnCount {
                reference,
                candidate,
            } => write!(f, "{reference} columns vs {candidate} columns"),
            ShapeDifference::ColumnName {
                column,
                reference,
                candidate,
            } => write!(f, "column {column} named '{reference}' vs '{candidate}'"),
            ShapeDifference::ColumnType {
                column,
                reference,
                candidate,
            } => write!(f, "column {column} typed {reference} vs {candidate}"),
            ShapeDifference::Nullability {
                column,
                reference,
                candidate,
            } => write!(f, "column {column} nullable {reference} vs {candidate}"),
            ShapeDifference::Length {
                column,
                reference,
                candidate,
            } => write!(f, "column {column} length {reference} vs {candidate}"),
            ShapeDifference::ParamCount {
                reference,
                candidate,
            } => write!(f, "{reference} parameters vs {candidate} parameters"),
        }
    }
}

/// Result of comparing a reference outcome with a candidate outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "classification", rename_all = "snake_case")]
pub enum Classification {
    /// Outcomes are equivalent.
    Match,
    /// Column layout differs.
    ShapeMismatch { difference: ShapeDifference },
    /// Row counts (or affected-row counts) differ.
    RowCountMismatch { reference: u64, candidate: u64 },
    /// First differing cell.
    ///
    /// In unordered mode both sides are sorted canonically before the scan,
    /// so `row` is a position in that sorted order rather than a row index
    /// of either backend's result.
    ValueMismatch { row: usize, column: usize },
    /// Exactly one side failed.
    OneSideFailed { failed: Role },
    /// Both sides failed with non-equivalent error codes.
    BothFailedDifferently {
        reference_code: u16,
        candidate_code: u16,
    },
}

impl Classification {
    /// Check if the outcomes matched.
    pub fn is_match(&self) -> bool {
        matches!(self, Classification::Match)
    }

    /// Check if exactly one side failed.
    pub fn is_one_side_failed(&self) -> bool {
        matches!(self, Classification::OneSideFailed { .. })
    }

    /// Short stable label, suitable for log fields and metrics keys.
    pub fn label(&self) -> &'static str {
        match self {
            Classification::Match => "match",
            Classification::ShapeMismatch { .. } => "shape_mismatch",
            Classification::RowCountMismatch { .. } => "row_count_mismatch",
            Classification::ValueMismatch { .. } => "value_mismatch",
            Classification::OneSideFailed { .. } => "one_side_failed",
            Classification::BothFailedDifferently { .. } => "both_failed_differently",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Match => write!(f, "match"),
            Classification::ShapeMismatch { difference } => {
                write!(f, "shape mismatch: {difference}")
            }
            Classification::RowCountMismatch {
                reference,
                candidate,
            } => write!(f, "row count mismatch: {reference} vs {candidate}"),
            Classification::ValueMismatch { row, column } => {
                write!(f, "value mismatch at row {row}, column {column}")
            }
            Classification::OneSideFailed { failed } => write!(f, "{failed} failed alone"),
            Classification::BothFailedDifferently {
                reference_code,
                candidate_code,
            } => write!(
                f,
                "both failed differently: {reference_code} vs {candidate_code}"
            ),
        }
    }
}

/// Compares outcomes under a [`ComparePolicy`].
#[derive(Debug, Clone, Default)]
pub struct Comparator {
    policy: ComparePolicy,
}

impl Comparator {
    /// Create a comparator.
    pub fn new(policy: ComparePolicy) -> Self {
        Self { policy }
    }

    /// The active policy.
    pub fn policy(&self) -> &ComparePolicy {
        &self.policy
    }

    /// Classify two outcomes using the policy's default ordering mode.
    pub fn classify(&self, reference: &Outcome, candidate: &Outcome) -> Classification {
        self.classify_with(self.policy.ordering, reference, candidate)
    }

    /// Classify two outcomes under an explicit ordering mode.
    pub fn classify_with(
        &self,
        ordering: OrderingMode,
        reference: &Outcome,
        candidate: &Outcome,
    ) -> Classification {
        match (reference, candidate) {
            (Outcome::Failure(r), Outcome::Failure(c)) => {
                if self.policy.error_equivalence.equivalent(r.code, c.code) {
                    Classification::Match
                } else {
                    Classification::BothFailedDifferently {
                        reference_code: r.code,
                        candidate_code: c.code,
                    }
                }
            }
            (Outcome::Failure(_), _) => Classification::OneSideFailed {
                failed: Role::Reference,
            },
            (_, Outcome::Failure(_)) => Classification::OneSideFailed {
                failed: Role::Candidate,
            },
            (Outcome::Rows(r), Outcome::Rows(c)) => self.compare_result_sets(ordering, r, c),
            (Outcome::Prepared(r), Outcome::Prepared(c)) => self.compare_prepared(r, c),
            (Outcome::Rows(_), Outcome::Prepared(_)) => shape(ShapeDifference::OutcomeKind {
                reference: "rows".to_string(),
                candidate: "prepared".to_string(),
            }),
            (Outcome::Prepared(_), Outcome::Rows(_)) => shape(ShapeDifference::OutcomeKind {
                reference: "prepared".to_string(),
                candidate: "rows".to_string(),
            }),
        }
    }

    /// Compare two outcomes and build the report for them.
    pub fn compare(
        &self,
        statement: &str,
        kind: StatementKind,
        reference: Outcome,
        candidate: Outcome,
    ) -> DivergenceReport {
        self.compare_with(
            statement,
            kind,
            self.policy.ordering,
            SideTiming::default(),
            reference,
            candidate,
        )
    }

    /// Compare under an explicit ordering mode, recording per-side timing.
    pub fn compare_with(
        &self,
        statement: &str,
        kind: StatementKind,
        ordering: OrderingMode,
        timing: SideTiming,
        reference: Outcome,
        candidate: Outcome,
    ) -> DivergenceReport {
        let classification = self.classify_with(ordering, &reference, &candidate);
        DivergenceReport::new(
            statement,
            kind,
            ordering,
            classification,
            reference,
            candidate,
            timing,
        )
    }

    fn compare_result_sets(
        &self,
        ordering: OrderingMode,
        reference: &ResultSet,
        candidate: &ResultSet,
    ) -> Classification {
        if let Some(difference) = self.compare_columns(&reference.columns, &candidate.columns) {
            return shape(difference);
        }

        if reference.is_ok_packet() && candidate.is_ok_packet() {
            if reference.affected_rows != candidate.affected_rows {
                return Classification::RowCountMismatch {
                    reference: reference.affected_rows,
                    candidate: candidate.affected_rows,
                };
            }
            return Classification::Match;
        }

        if reference.rows.len() != candidate.rows.len() {
            return Classification::RowCountMismatch {
                reference: reference.rows.len() as u64,
                candidate: candidate.rows.len() as u64,
            };
        }

        let mut reference_rows: Vec<&Vec<Value>> = reference.rows.iter().collect();
        let mut candidate_rows: Vec<&Vec<Value>> = candidate.rows.iter().collect();
        if ordering == OrderingMode::Unordered {
            reference_rows.sort_by(|a, b| canonical_row_cmp(a, b));
            candidate_rows.sort_by(|a, b| canonical_row_cmp(a, b));
        }

        for (row, (r, c)) in reference_rows.iter().zip(candidate_rows.iter()).enumerate() {
            if let Some(column) = first_differing_cell(r, c) {
                return Classification::ValueMismatch { row, column };
            }
        }

        Classification::Match
    }

    fn compare_prepared(&self, reference: &PreparedShape, candidate: &PreparedShape) -> Classification {
        if reference.param_count != candidate.param_count {
            return shape(ShapeDifference::ParamCount {
                reference: reference.param_count,
                candidate: candidate.param_count,
            });
        }
        match self.compare_columns(&reference.columns, &candidate.columns) {
            Some(difference) => shape(difference),
            None => Classification::Match,
        }
    }

    fn compare_columns(
        &self,
        reference: &[ColumnMeta],
        candidate: &[ColumnMeta],
    ) -> Option<ShapeDifference> {
        if reference.len() != candidate.len() {
            return Some(ShapeDifference::ColumnCount {
                reference: reference.len(),
                candidate: candidate.len(),
            });
        }

        for (column, (r, c)) in reference.iter().zip(candidate.iter()).enumerate() {
            if !self.policy.column_names.matches(&r.name, &c.name) {
                return Some(ShapeDifference::ColumnName {
                    column,
                    reference: r.name.clone(),
                    candidate: c.name.clone(),
                });
            }
            if !self
                .policy
                .type_equivalence
                .compatible(&r.declared_type, &c.declared_type)
            {
                return Some(ShapeDifference::ColumnType {
                    column,
                    reference: r.declared_type.clone(),
                    candidate: c.declared_type.clone(),
                });
            }
            if self.policy.compare_nullability && r.nullable != c.nullable {
                return Some(ShapeDifference::Nullability {
                    column,
                    reference: r.nullable,
                    candidate: c.nullable,
                });
            }
            if self.policy.compare_length && r.length != c.length {
                return Some(ShapeDifference::Length {
                    column,
                    reference: r.length,
                    candidate: c.length,
                });
            }
        }

        None
    }
}

fn shape(difference: ShapeDifference) -> Classification {
    Classification::ShapeMismatch { difference }
}

fn first_differing_cell(reference: &[Value], candidate: &[Value]) -> Option<usize> {
    if reference.len() != candidate.len() {
        // Rows narrower than the declared columns; report the first missing cell.
        return Some(reference.len().min(candidate.len()));
    }
    reference
        .iter()
        .zip(candidate.iter())
        .position(|(r, c)| !r.strict_eq(c))
}

fn canonical_row_cmp(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = x.canonical_cmp(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}
