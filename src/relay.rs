//! Translation between normalized outcomes and the client-facing protocol.
//!
//! Result columns are relayed with a wire type derived from the declared
//! type. A column whose values do not all fit that wire type is relayed as a
//! string column instead, so the binary protocol never sees a mismatched cell.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use opensrv_mysql::{
    Column, ColumnFlags, ColumnType, ErrorKind, OkResponse, QueryResultWriter, RowWriter,
    ValueInner,
};
use shadow_core::{ColumnMeta, Failure, Outcome, PreparedShape, ResultSet, Value};
use std::io;
use thiserror::Error;
use tokio::io::AsyncWrite;

/// A client parameter that could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Invalid date parameter of {0} bytes")]
    InvalidDate(usize),
    #[error("Invalid time parameter of {0} bytes")]
    InvalidTime(usize),
}

/// Decode one bound parameter of COM_STMT_EXECUTE.
pub fn decode_param(value: ValueInner<'_>, coltype: ColumnType) -> Result<Value, ConversionError> {
    Ok(match value {
        ValueInner::NULL => Value::Null,
        ValueInner::Int(i) => Value::Int(i),
        ValueInner::UInt(u) => Value::UInt(u),
        ValueInner::Double(f) => Value::Float(f),
        ValueInner::Bytes(bytes) => match coltype {
            ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                Value::Decimal(String::from_utf8_lossy(bytes).into_owned())
            }
            ColumnType::MYSQL_TYPE_TINY_BLOB
            | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | ColumnType::MYSQL_TYPE_LONG_BLOB
            | ColumnType::MYSQL_TYPE_BLOB => Value::Bytes(bytes.to_vec()),
            _ => Value::String(bytes.to_vec()),
        },
        ValueInner::Date(bytes) => decode_date(bytes, true)?,
        ValueInner::Datetime(bytes) => decode_date(bytes, false)?,
        ValueInner::Time(bytes) => decode_time(bytes)?,
    })
}

/// Binary DATE/DATETIME: `year(2) month day [hour minute second [micros(4)]]`.
fn decode_date(bytes: &[u8], date_only: bool) -> Result<Value, ConversionError> {
    let (year, month, day) = match bytes.len() {
        0 => (0, 0, 0),
        4 | 7 | 11 => (
            u16::from_le_bytes([bytes[0], bytes[1]]),
            bytes[2],
            bytes[3],
        ),
        n => return Err(ConversionError::InvalidDate(n)),
    };
    let (hour, minute, second) = match bytes.len() {
        7 | 11 => (bytes[4], bytes[5], bytes[6]),
        _ => (0, 0, 0),
    };
    let micros = match bytes.len() {
        11 => u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]),
        _ => 0,
    };

    let date = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day));
    let time = NaiveTime::from_hms_micro_opt(
        u32::from(hour),
        u32::from(minute),
        u32::from(second),
        micros,
    );
    Ok(match (date, time) {
        (Some(d), _) if date_only => Value::Date(d),
        (Some(d), Some(t)) => Value::DateTime(NaiveDateTime::new(d, t)),
        _ if date_only => Value::text(format!("{year:04}-{month:02}-{day:02}")),
        _ => Value::text(format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
        )),
    })
}

/// Binary TIME: `negative days(4) hour minute second [micros(4)]`.
fn decode_time(bytes: &[u8]) -> Result<Value, ConversionError> {
    if bytes.is_empty() {
        return Ok(Value::Time("00:00:00".to_string()));
    }
    if bytes.len() != 8 && bytes.len() != 12 {
        return Err(ConversionError::InvalidTime(bytes.len()));
    }
    let sign = if bytes[0] == 1 { "-" } else { "" };
    let days = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let hours = u64::from(days) * 24 + u64::from(bytes[5]);
    let (minutes, seconds) = (bytes[6], bytes[7]);
    let time = if bytes.len() == 12 {
        let micros = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        format!("{sign}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
    } else {
        format!("{sign}{hours:02}:{minutes:02}:{seconds:02}")
    };
    Ok(Value::Time(time))
}

/// Wire representation chosen for a relayed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Signed,
    Unsigned,
    Double,
    Decimal,
    Date,
    DateTime,
    Blob,
    Text,
}

impl WireType {
    /// Wire type for a declared column type such as `BIGINT UNSIGNED` or
    /// `VARCHAR(20)`.
    pub fn for_declared(declared: &str) -> Self {
        let declared = declared.trim().to_ascii_uppercase();
        let unsigned = declared.contains("UNSIGNED");
        let base = declared
            .split(|c: char| c == '(' || c.is_whitespace())
            .next()
            .unwrap_or_default();
        match base {
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "YEAR" => {
                if unsigned {
                    WireType::Unsigned
                } else {
                    WireType::Signed
                }
            }
            "FLOAT" | "DOUBLE" | "REAL" => WireType::Double,
            "DECIMAL" | "NUMERIC" => WireType::Decimal,
            "DATE" => WireType::Date,
            "DATETIME" | "TIMESTAMP" => WireType::DateTime,
            "BLOB" | "BINARY" | "VARBINARY" | "BIT" | "GEOMETRY" => WireType::Blob,
            _ => WireType::Text,
        }
    }

    fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (WireType::Signed, Value::Int(_))
                | (WireType::Unsigned, Value::UInt(_))
                | (WireType::Double, Value::Float(_))
                | (WireType::Decimal, Value::Decimal(_))
                | (WireType::Date, Value::Date(_))
                | (WireType::DateTime, Value::DateTime(_))
                | (WireType::Blob, Value::Bytes(_) | Value::String(_))
                | (WireType::Text, _)
        )
    }

    fn column_type(self) -> ColumnType {
        match self {
            WireType::Signed | WireType::Unsigned => ColumnType::MYSQL_TYPE_LONGLONG,
            WireType::Double => ColumnType::MYSQL_TYPE_DOUBLE,
            WireType::Decimal => ColumnType::MYSQL_TYPE_NEWDECIMAL,
            WireType::Date => ColumnType::MYSQL_TYPE_DATE,
            WireType::DateTime => ColumnType::MYSQL_TYPE_DATETIME,
            WireType::Blob => ColumnType::MYSQL_TYPE_BLOB,
            WireType::Text => ColumnType::MYSQL_TYPE_VAR_STRING,
        }
    }
}

/// Wire types for each column, demoted to text where a value does not fit.
pub fn wire_types(columns: &[ColumnMeta], rows: &[Vec<Value>]) -> Vec<WireType> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, meta)| {
            let wire = WireType::for_declared(&meta.declared_type);
            let fits = rows
                .iter()
                .all(|row| row.get(idx).map_or(true, |v| wire.accepts(v)));
            if fits {
                wire
            } else {
                WireType::Text
            }
        })
        .collect()
}

/// Protocol column definitions for relayed columns.
pub fn relay_columns(columns: &[ColumnMeta], wire: &[WireType]) -> Vec<Column> {
    columns
        .iter()
        .zip(wire)
        .map(|(meta, wire)| {
            let mut flags = ColumnFlags::empty();
            if !meta.nullable {
                flags |= ColumnFlags::NOT_NULL_FLAG;
            }
            match wire {
                WireType::Unsigned => flags |= ColumnFlags::UNSIGNED_FLAG,
                WireType::Blob => flags |= ColumnFlags::BINARY_FLAG,
                _ => {}
            }
            Column {
                table: String::new(),
                column: meta.name.clone(),
                coltype: wire.column_type(),
                colflags: flags,
            }
        })
        .collect()
}

/// Parameter definitions for a prepared statement. Backends that do not
/// describe their parameters get string placeholders.
pub fn param_columns(shape: &PreparedShape) -> Vec<Column> {
    if shape.params.len() == usize::from(shape.param_count) {
        let wire = wire_types(&shape.params, &[]);
        return relay_columns(&shape.params, &wire);
    }
    let placeholders: Vec<ColumnMeta> = (0..shape.param_count)
        .map(|_| ColumnMeta::new("?", "VARCHAR"))
        .collect();
    relay_columns(&placeholders, &vec![WireType::Text; placeholders.len()])
}

/// Result column definitions for a prepared statement.
pub fn prepared_columns(shape: &PreparedShape) -> Vec<Column> {
    let wire = wire_types(&shape.columns, &[]);
    relay_columns(&shape.columns, &wire)
}

/// Server error codes with a matching [`ErrorKind`] variant.
const SERVER_ERROR_CODES: std::ops::RangeInclusive<u16> = 1000..=1885;

/// Protocol error kind for a backend error code, with the message to send.
/// Codes outside the server range (client codes, newer server codes) go out
/// as `ER_UNKNOWN_ERROR` and keep their number in the message text.
pub fn relay_error(failure: &Failure) -> (ErrorKind, String) {
    if SERVER_ERROR_CODES.contains(&failure.code) {
        (ErrorKind::from(failure.code), failure.message.clone())
    } else {
        (ErrorKind::ER_UNKNOWN_ERROR, failure.to_string())
    }
}

fn ok_response(result: &ResultSet) -> OkResponse {
    OkResponse {
        affected_rows: result.affected_rows,
        last_insert_id: result.last_insert_id.unwrap_or(0),
        warnings: result.warnings,
        ..Default::default()
    }
}

/// Textual form used when a value is relayed through a string column.
pub fn text_form(value: &Value) -> Vec<u8> {
    match value {
        Value::String(b) | Value::Bytes(b) => b.clone(),
        Value::Decimal(d) | Value::Time(d) => d.clone().into_bytes(),
        Value::Int(i) => i.to_string().into_bytes(),
        Value::UInt(u) => u.to_string().into_bytes(),
        Value::Float(f) => f.to_string().into_bytes(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string().into_bytes(),
        Value::DateTime(dt) if dt.and_utc().timestamp_subsec_micros() == 0 => {
            dt.format("%Y-%m-%d %H:%M:%S").to_string().into_bytes()
        }
        Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string().into_bytes(),
        Value::Null => Vec::new(),
    }
}

fn write_cell<W: AsyncWrite + Send + Unpin>(
    row: &mut RowWriter<'_, W>,
    wire: WireType,
    value: &Value,
) -> io::Result<()> {
    match (wire, value) {
        (_, Value::Null) => row.write_col(None::<i64>),
        (WireType::Signed, Value::Int(i)) => row.write_col(*i),
        (WireType::Unsigned, Value::UInt(u)) => row.write_col(*u),
        (WireType::Double, Value::Float(f)) => row.write_col(*f),
        (WireType::Decimal, Value::Decimal(d)) => row.write_col(d.as_bytes()),
        (WireType::Date, Value::Date(d)) => row.write_col(*d),
        (WireType::DateTime, Value::DateTime(dt)) => row.write_col(*dt),
        (_, other) => row.write_col(text_form(other).as_slice()),
    }
}

/// Write an outcome as the response to COM_QUERY or COM_STMT_EXECUTE.
pub async fn write_outcome<W: AsyncWrite + Send + Unpin>(
    outcome: &Outcome,
    results: QueryResultWriter<'_, W>,
) -> io::Result<()> {
    match outcome {
        Outcome::Rows(result) if result.is_ok_packet() => {
            results.completed(ok_response(result)).await
        }
        Outcome::Rows(result) => {
            let wire = wire_types(&result.columns, &result.rows);
            let columns = relay_columns(&result.columns, &wire);
            let mut writer = results.start(&columns).await?;
            for row in &result.rows {
                for (wire, value) in wire.iter().zip(row) {
                    write_cell(&mut writer, *wire, value)?;
                }
                writer.end_row().await?;
            }
            writer.finish().await
        }
        Outcome::Prepared(_) => results.completed(OkResponse::default()).await,
        Outcome::Failure(failure) => {
            let (kind, message) = relay_error(failure);
            results.error(kind, message.as_bytes()).await
        }
    }
}
