//! Normalized cell values and column metadata.
//!
//! Every backend driver translates its native row representation into these
//! types before a comparison runs, so the comparator never sees driver types.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// A single normalized cell value.
///
/// `Decimal` keeps the exact textual form returned by the backend. Parsing it
/// into a float would hide precision differences between engines.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// SQL NULL
    Null,

    /// Signed integer
    Int(i64),

    /// Unsigned integer (BIGINT UNSIGNED may exceed `i64`)
    #[serde(rename = "uint")]
    UInt(u64),

    /// Floating point (FLOAT and DOUBLE)
    Float(f64),

    /// Exact decimal in textual form
    Decimal(String),

    /// Character data, kept as raw bytes
    #[serde(serialize_with = "serialize_text")]
    String(Vec<u8>),

    /// Binary data
    #[serde(serialize_with = "serialize_base64")]
    Bytes(Vec<u8>),

    /// Calendar date
    Date(NaiveDate),

    /// Date and time without zone
    DateTime(NaiveDateTime),

    /// TIME value in canonical `[-]HH:MM:SS[.ffffff]` form
    Time(String),
}

fn serialize_text<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(bytes))
}

impl Value {
    /// Build a character value from text.
    pub fn text(s: impl Into<String>) -> Self {
        Self::String(s.into().into_bytes())
    }

    /// Build a decimal value from its textual form.
    pub fn decimal(s: impl Into<String>) -> Self {
        Self::Decimal(s.into())
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Strict equality used by the comparator.
    ///
    /// Integers compare by numeric value across signedness and character data
    /// compares byte-wise against binary data. Floats use bit-level total
    /// ordering with no tolerance. Every other cross-variant pair is unequal.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Int(a), Value::UInt(b)) | (Value::UInt(b), Value::Int(a)) => {
                i128::from(*a) == i128::from(*b)
            }
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b) == Ordering::Equal,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::String(a), Value::String(b))
            | (Value::Bytes(a), Value::Bytes(b))
            | (Value::String(a), Value::Bytes(b))
            | (Value::Bytes(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            _ => false,
        }
    }

    /// Total ordering used to canonicalize unordered result sets.
    ///
    /// Consistent with [`Value::strict_eq`]: values that are strictly equal
    /// always compare as `Equal`.
    pub fn canonical_cmp(&self, other: &Value) -> Ordering {
        let rank = self.rank().cmp(&other.rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Int(_) | Value::UInt(_), Value::Int(_) | Value::UInt(_)) => {
                self.as_i128().cmp(&other.as_i128())
            }
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp(b),
            (Value::String(a) | Value::Bytes(a), Value::String(b) | Value::Bytes(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) | Value::UInt(_) => 1,
            Value::Float(_) => 2,
            Value::Decimal(_) => 3,
            Value::String(_) | Value::Bytes(_) => 4,
            Value::Date(_) => 5,
            Value::DateTime(_) => 6,
            Value::Time(_) => 7,
        }
    }

    fn as_i128(&self) -> i128 {
        match self {
            Value::Int(i) => i128::from(*i),
            Value::UInt(u) => i128::from(*u),
            _ => 0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "'{}'", String::from_utf8_lossy(s)),
            Value::Bytes(b) => {
                write!(f, "X'")?;
                for byte in b {
                    write!(f, "{byte:02X}")?;
                }
                write!(f, "'")
            }
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Time(t) => write!(f, "{t}"),
        }
    }
}

/// Column metadata as declared by the backend.
///
/// `declared_type` is the backend's native type name (for MySQL-protocol
/// backends e.g. `BIGINT`, `VARCHAR`, `DECIMAL`, `BIGINT UNSIGNED`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name or alias
    pub name: String,
    /// Native type name
    pub declared_type: String,
    /// Whether the column may hold NULL
    pub nullable: bool,
    /// Declared display length
    pub length: u32,
}

impl ColumnMeta {
    /// Create a nullable column with unknown length.
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            nullable: true,
            length: 0,
        }
    }

    /// Set nullability.
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set declared length.
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }
}
