//! MySQL columns and values → normalized `shadow_core` types.
//!
//! The text protocol delivers every non-NULL cell as bytes, the binary
//! protocol delivers typed values. Both are normalized through the declared
//! column type so the same data yields the same [`shadow_core::Value`]
//! regardless of protocol.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::{Column, Row, Value as MySqlValue};
use shadow_core::{ColumnMeta, Value};

/// Column metadata for one result column.
pub fn column_meta(column: &Column) -> ColumnMeta {
    let flags = column.flags();
    ColumnMeta {
        name: column.name_str().into_owned(),
        declared_type: type_name(column.column_type(), flags),
        nullable: !flags.contains(ColumnFlags::NOT_NULL_FLAG),
        length: column.column_length(),
    }
}

/// Column metadata for a whole column list.
pub fn columns_meta(columns: &[Column]) -> Vec<ColumnMeta> {
    columns.iter().map(column_meta).collect()
}

/// Native type name for a MySQL column type.
pub fn type_name(column_type: ColumnType, flags: ColumnFlags) -> String {
    use ColumnType::*;

    let binary = flags.contains(ColumnFlags::BINARY_FLAG);
    let base = match column_type {
        MYSQL_TYPE_TINY => "TINYINT",
        MYSQL_TYPE_SHORT => "SMALLINT",
        MYSQL_TYPE_INT24 => "MEDIUMINT",
        MYSQL_TYPE_LONG => "INT",
        MYSQL_TYPE_LONGLONG => "BIGINT",
        MYSQL_TYPE_FLOAT => "FLOAT",
        MYSQL_TYPE_DOUBLE => "DOUBLE",
        MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => "DECIMAL",
        MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE => "DATE",
        MYSQL_TYPE_TIME | MYSQL_TYPE_TIME2 => "TIME",
        MYSQL_TYPE_DATETIME | MYSQL_TYPE_DATETIME2 => "DATETIME",
        MYSQL_TYPE_TIMESTAMP | MYSQL_TYPE_TIMESTAMP2 => "TIMESTAMP",
        MYSQL_TYPE_YEAR => "YEAR",
        MYSQL_TYPE_STRING if binary => "BINARY",
        MYSQL_TYPE_STRING => "CHAR",
        MYSQL_TYPE_VAR_STRING | MYSQL_TYPE_VARCHAR if binary => "VARBINARY",
        MYSQL_TYPE_VAR_STRING | MYSQL_TYPE_VARCHAR => "VARCHAR",
        MYSQL_TYPE_TINY_BLOB | MYSQL_TYPE_MEDIUM_BLOB | MYSQL_TYPE_LONG_BLOB | MYSQL_TYPE_BLOB
            if binary =>
        {
            "BLOB"
        }
        MYSQL_TYPE_TINY_BLOB | MYSQL_TYPE_MEDIUM_BLOB | MYSQL_TYPE_LONG_BLOB | MYSQL_TYPE_BLOB => {
            "TEXT"
        }
        MYSQL_TYPE_JSON => "JSON",
        MYSQL_TYPE_ENUM => "ENUM",
        MYSQL_TYPE_SET => "SET",
        MYSQL_TYPE_BIT => "BIT",
        MYSQL_TYPE_GEOMETRY => "GEOMETRY",
        MYSQL_TYPE_NULL => "NULL",
        _ => "UNKNOWN",
    };

    if is_integer(column_type) && flags.contains(ColumnFlags::UNSIGNED_FLAG) {
        format!("{base} UNSIGNED")
    } else {
        base.to_string()
    }
}

fn is_integer(column_type: ColumnType) -> bool {
    use ColumnType::*;
    matches!(
        column_type,
        MYSQL_TYPE_TINY
            | MYSQL_TYPE_SHORT
            | MYSQL_TYPE_INT24
            | MYSQL_TYPE_LONG
            | MYSQL_TYPE_LONGLONG
            | MYSQL_TYPE_YEAR
    )
}

/// Normalize every cell of a row, in column order.
pub fn row_values(row: &Row) -> Vec<Value> {
    let columns = row.columns_ref();
    (0..row.len())
        .map(|idx| match (row.as_ref(idx), columns.get(idx)) {
            (Some(value), Some(column)) => {
                normalize(value, column.column_type(), column.flags())
            }
            (Some(value), None) => normalize(value, ColumnType::MYSQL_TYPE_STRING, ColumnFlags::empty()),
            (None, _) => Value::Null,
        })
        .collect()
}

/// Normalize one MySQL value using its declared column type.
pub fn normalize(value: &MySqlValue, column_type: ColumnType, flags: ColumnFlags) -> Value {
    match value {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Int(i) => Value::Int(*i),
        MySqlValue::UInt(u) => Value::UInt(*u),
        // Shortest f32 text first, so 1.1f32 normalizes to 1.1 like the text protocol
        MySqlValue::Float(f) => Value::Float(f.to_string().parse().unwrap_or(f64::from(*f))),
        MySqlValue::Double(d) => Value::Float(*d),
        MySqlValue::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day));
            let time = NaiveTime::from_hms_micro_opt(
                u32::from(*hour),
                u32::from(*minute),
                u32::from(*second),
                *micros,
            );
            match (date, time) {
                (Some(d), _) if is_date_only(column_type) => Value::Date(d),
                (Some(d), Some(t)) => Value::DateTime(NaiveDateTime::new(d, t)),
                // Zero dates have no chrono representation
                _ => Value::text(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
                )),
            }
        }
        MySqlValue::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_hours = u64::from(*days) * 24 + u64::from(*hours);
            Value::Time(canonical_time(
                *negative,
                total_hours,
                u64::from(*minutes),
                u64::from(*seconds),
                *micros,
            ))
        }
        MySqlValue::Bytes(bytes) => normalize_bytes(bytes, column_type, flags),
    }
}

fn is_date_only(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE
    )
}

fn normalize_bytes(bytes: &[u8], column_type: ColumnType, flags: ColumnFlags) -> Value {
    use ColumnType::*;

    let fallback = || Value::String(bytes.to_vec());
    let text = match std::str::from_utf8(bytes) {
        Ok(t) => t,
        Err(_) => return Value::Bytes(bytes.to_vec()),
    };

    match column_type {
        t if is_integer(t) => {
            if flags.contains(ColumnFlags::UNSIGNED_FLAG) {
                text.parse::<u64>().map(Value::UInt).unwrap_or_else(|_| fallback())
            } else {
                text.parse::<i64>().map(Value::Int).unwrap_or_else(|_| fallback())
            }
        }
        MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE => text
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or_else(|_| fallback()),
        MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => Value::Decimal(text.to_string()),
        MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(Value::Date)
            .unwrap_or_else(|_| fallback()),
        MYSQL_TYPE_DATETIME | MYSQL_TYPE_DATETIME2 | MYSQL_TYPE_TIMESTAMP
        | MYSQL_TYPE_TIMESTAMP2 => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .map(Value::DateTime)
            .unwrap_or_else(|_| fallback()),
        MYSQL_TYPE_TIME | MYSQL_TYPE_TIME2 => parse_time(text).unwrap_or_else(fallback),
        MYSQL_TYPE_STRING
        | MYSQL_TYPE_VAR_STRING
        | MYSQL_TYPE_VARCHAR
        | MYSQL_TYPE_TINY_BLOB
        | MYSQL_TYPE_MEDIUM_BLOB
        | MYSQL_TYPE_LONG_BLOB
        | MYSQL_TYPE_BLOB
            if flags.contains(ColumnFlags::BINARY_FLAG) =>
        {
            Value::Bytes(bytes.to_vec())
        }
        MYSQL_TYPE_BIT | MYSQL_TYPE_GEOMETRY => Value::Bytes(bytes.to_vec()),
        _ => fallback(),
    }
}

/// Parse textual `[-]H+:MM:SS[.f+]` into the canonical TIME form.
fn parse_time(text: &str) -> Option<Value> {
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let mut parts = rest.splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds_part = parts.next()?;
    let (seconds, fraction) = match seconds_part.split_once('.') {
        Some((s, f)) => (s, f),
        None => (seconds_part, ""),
    };
    let seconds: u64 = seconds.parse().ok()?;
    let micros = if fraction.is_empty() {
        0
    } else {
        if fraction.len() > 6 || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        format!("{fraction:0<6}").parse().ok()?
    };
    Some(Value::Time(canonical_time(negative, hours, minutes, seconds, micros)))
}

fn canonical_time(negative: bool, hours: u64, minutes: u64, seconds: u64, micros: u32) -> String {
    let sign = if negative { "-" } else { "" };
    if micros > 0 {
        format!("{sign}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
    } else {
        format!("{sign}{hours:02}:{minutes:02}:{seconds:02}")
    }
}

/// Convert a normalized value into a statement parameter.
pub fn to_param(value: &Value) -> MySqlValue {
    match value {
        Value::Null => MySqlValue::NULL,
        Value::Int(i) => MySqlValue::Int(*i),
        Value::UInt(u) => MySqlValue::UInt(*u),
        Value::Float(f) => MySqlValue::Double(*f),
        Value::Decimal(d) => MySqlValue::Bytes(d.clone().into_bytes()),
        Value::String(b) | Value::Bytes(b) => MySqlValue::Bytes(b.clone()),
        Value::Date(d) => MySqlValue::Date(
            u16::try_from(d.year()).unwrap_or(0),
            d.month() as u8,
            d.day() as u8,
            0,
            0,
            0,
            0,
        ),
        Value::DateTime(dt) => MySqlValue::Date(
            u16::try_from(dt.year()).unwrap_or(0),
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1000, // MySQL uses microseconds
        ),
        Value::Time(t) => MySqlValue::Bytes(t.clone().into_bytes()),
    }
}
