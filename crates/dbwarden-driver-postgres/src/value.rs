//! Conversion between `dbwarden_core::Value` and Postgres wire types

use std::fmt::Display;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres_types::{FromSql, IsNull, ToSql, Type};
use tokio_postgres::Row;

use dbwarden_core::{DriverRows, Result, Value, WardenError};

use crate::wire::{BoxError, Inet, Interval, Money, Numeric, RawBytes, RawText, TimeTz, is_text_wire};

/// Integers up to these magnitudes convert to f32/f64 exactly
const F32_EXACT_INT: u64 = 1 << 24;
const F64_EXACT_INT: u64 = 1 << 53;

fn bind_error(value: &Value, target: &Type, reason: impl Display) -> WardenError {
    WardenError::Dispatch(format!(
        "cannot bind {} to a {} parameter: {}",
        value,
        target.name(),
        reason
    ))
}

/// Owned bind parameter, converted to the statement's declared parameter type
/// so tokio-postgres writes the right binary layout (INT4 gets 4 bytes, not 8).
#[derive(Debug)]
pub(crate) enum PgParam {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Oid(u32),
    Float32(f32),
    Float64(f64),
    /// Pre-encoded binary NUMERIC
    Numeric(Vec<u8>),
    /// Sent as raw UTF-8; only valid for text-wire types
    Text(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    Timestamptz(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    BoolArray(Vec<Option<bool>>),
    Int16Array(Vec<Option<i16>>),
    Int32Array(Vec<Option<i32>>),
    Int64Array(Vec<Option<i64>>),
    Float64Array(Vec<Option<f64>>),
    TextArray(Vec<Option<String>>),
}

impl PgParam {
    /// Convert `value` for a parameter declared as `target`.
    ///
    /// Lossy conversions (integer overflow, unparseable text, incompatible
    /// types) are refused with `WardenError::Dispatch` rather than sent.
    pub(crate) fn for_type(value: &Value, target: &Type) -> Result<Self> {
        let param = match value {
            Value::Null => return Ok(PgParam::Null),
            Value::Bool(v) => PgParam::Bool(*v),
            Value::Int16(v) => Self::int(i64::from(*v), value, target)?,
            Value::Int32(v) => Self::int(i64::from(*v), value, target)?,
            Value::Int64(v) => Self::int(*v, value, target)?,
            Value::Float32(v) => Self::float(f64::from(*v), value, target)?,
            Value::Float64(v) => Self::float(*v, value, target)?,
            Value::Decimal(v) | Value::String(v) => Self::text(v, value, target)?,
            Value::Bytes(v) => PgParam::Bytes(v.clone()),
            Value::Uuid(v) => PgParam::Uuid(*v),
            Value::Json(v) => PgParam::Json(v.clone()),
            Value::DateTimeUtc(v) => PgParam::Timestamptz(*v),
            Value::Date(v) => PgParam::Date(*v),
            Value::Time(v) => PgParam::Time(*v),
            Value::DateTime(v) => PgParam::Timestamp(*v),
            Value::Array(items) => Self::array(items, value, target)?,
        };

        if param.binds_to(target) {
            Ok(param)
        } else {
            Err(bind_error(value, target, "incompatible type"))
        }
    }

    fn int(n: i64, value: &Value, target: &Type) -> Result<Self> {
        let out_of_range = || bind_error(value, target, "out of range");
        Ok(match *target {
            Type::INT2 => PgParam::Int16(i16::try_from(n).map_err(|_| out_of_range())?),
            Type::INT4 => PgParam::Int32(i32::try_from(n).map_err(|_| out_of_range())?),
            Type::OID => PgParam::Oid(u32::try_from(n).map_err(|_| out_of_range())?),
            Type::FLOAT4 if n.unsigned_abs() <= F32_EXACT_INT => PgParam::Float32(n as f32),
            Type::FLOAT8 if n.unsigned_abs() <= F64_EXACT_INT => PgParam::Float64(n as f64),
            Type::FLOAT4 | Type::FLOAT8 => {
                return Err(bind_error(value, target, "not exactly representable"));
            }
            Type::NUMERIC => Self::numeric(&n.to_string(), value, target)?,
            Type::TEXT | Type::VARCHAR | Type::BPCHAR => PgParam::Text(n.to_string()),
            _ => PgParam::Int64(n),
        })
    }

    fn float(x: f64, value: &Value, target: &Type) -> Result<Self> {
        Ok(match *target {
            // Rounds to the nearest f32 like the server's own float8-to-real cast
            Type::FLOAT4 if x.is_finite() && x.abs() > f64::from(f32::MAX) => {
                return Err(bind_error(value, target, "out of range"));
            }
            Type::FLOAT4 => PgParam::Float32(x as f32),
            Type::NUMERIC if x.is_infinite() => {
                return Err(bind_error(value, target, "infinity has no NUMERIC form"));
            }
            Type::NUMERIC if x.is_nan() => Self::numeric("NaN", value, target)?,
            Type::NUMERIC => Self::numeric(&x.to_string(), value, target)?,
            Type::TEXT | Type::VARCHAR | Type::BPCHAR => PgParam::Text(x.to_string()),
            _ => PgParam::Float64(x),
        })
    }

    fn numeric(text: &str, value: &Value, target: &Type) -> Result<Self> {
        Numeric::encode(text)
            .map(PgParam::Numeric)
            .map_err(|reason| bind_error(value, target, reason))
    }

    /// Text bound to a typed parameter is parsed; text the type cannot take is refused
    fn text(s: &str, value: &Value, target: &Type) -> Result<Self> {
        let invalid = |reason: &dyn Display| bind_error(value, target, reason);
        Ok(match *target {
            Type::JSON | Type::JSONB => {
                PgParam::Json(serde_json::from_str(s).map_err(|e| invalid(&e))?)
            }
            Type::UUID => PgParam::Uuid(uuid::Uuid::parse_str(s).map_err(|e| invalid(&e))?),
            Type::DATE => {
                PgParam::Date(NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| invalid(&e))?)
            }
            Type::TIME => {
                PgParam::Time(NaiveTime::parse_from_str(s, "%H:%M:%S%.f").map_err(|e| invalid(&e))?)
            }
            Type::TIMESTAMP => PgParam::Timestamp(
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                    .map_err(|e| invalid(&e))?,
            ),
            Type::TIMESTAMPTZ => PgParam::Timestamptz(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|e| invalid(&e))?
                    .with_timezone(&Utc),
            ),
            Type::NUMERIC => Self::numeric(s, value, target)?,
            Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
                let n: i64 = s.trim().parse().map_err(|e| invalid(&e))?;
                Self::int(n, value, target)?
            }
            Type::FLOAT4 | Type::FLOAT8 => {
                let x: f64 = s.trim().parse().map_err(|e| invalid(&e))?;
                Self::float(x, value, target)?
            }
            Type::BOOL => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "yes" | "on" | "1" => PgParam::Bool(true),
                "f" | "false" | "no" | "off" | "0" => PgParam::Bool(false),
                _ => return Err(invalid(&"not a boolean")),
            },
            _ => PgParam::Text(s.to_string()),
        })
    }

    fn array(items: &[Value], value: &Value, target: &Type) -> Result<Self> {
        Ok(match *target {
            Type::BOOL_ARRAY => PgParam::BoolArray(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Null => Ok(None),
                        Value::Bool(b) => Ok(Some(*b)),
                        other => Err(bind_error(value, target, format!("element {} is not a boolean", other))),
                    })
                    .collect::<Result<_>>()?,
            ),
            Type::INT2_ARRAY => PgParam::Int16Array(int_items(items, value, target)?),
            Type::INT4_ARRAY => PgParam::Int32Array(int_items(items, value, target)?),
            Type::INT8_ARRAY => PgParam::Int64Array(int_items(items, value, target)?),
            Type::FLOAT8_ARRAY => PgParam::Float64Array(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Null => Ok(None),
                        Value::Float32(x) => Ok(Some(f64::from(*x))),
                        Value::Float64(x) => Ok(Some(*x)),
                        other => match other.as_i64() {
                            Some(n) if n.unsigned_abs() <= F64_EXACT_INT => Ok(Some(n as f64)),
                            _ => Err(bind_error(value, target, format!("element {} is not a float", other))),
                        },
                    })
                    .collect::<Result<_>>()?,
            ),
            _ => PgParam::TextArray(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Null => Ok(None),
                        Value::Bytes(_) | Value::Array(_) => {
                            Err(bind_error(value, target, format!("element {} has no text form", item)))
                        }
                        other => Ok(Some(other.to_string())),
                    })
                    .collect::<Result<_>>()?,
            ),
        })
    }

    /// Whether the converted value has a binary encoding for `ty`
    fn binds_to(&self, ty: &Type) -> bool {
        match self {
            PgParam::Null => true,
            PgParam::Bool(_) => <bool as ToSql>::accepts(ty),
            PgParam::Int16(_) => <i16 as ToSql>::accepts(ty),
            PgParam::Int32(_) => <i32 as ToSql>::accepts(ty),
            PgParam::Int64(_) => <i64 as ToSql>::accepts(ty),
            PgParam::Oid(_) => <u32 as ToSql>::accepts(ty),
            PgParam::Float32(_) => <f32 as ToSql>::accepts(ty),
            PgParam::Float64(_) => <f64 as ToSql>::accepts(ty),
            PgParam::Numeric(_) => *ty == Type::NUMERIC,
            PgParam::Text(_) => is_text_wire(ty),
            PgParam::Bytes(_) => <Vec<u8> as ToSql>::accepts(ty),
            PgParam::Uuid(_) => <uuid::Uuid as ToSql>::accepts(ty),
            PgParam::Json(_) => <serde_json::Value as ToSql>::accepts(ty),
            PgParam::Timestamptz(_) => <DateTime<Utc> as ToSql>::accepts(ty),
            PgParam::Date(_) => <NaiveDate as ToSql>::accepts(ty),
            PgParam::Time(_) => <NaiveTime as ToSql>::accepts(ty),
            PgParam::Timestamp(_) => <NaiveDateTime as ToSql>::accepts(ty),
            PgParam::BoolArray(_) => <Vec<Option<bool>> as ToSql>::accepts(ty),
            PgParam::Int16Array(_) => <Vec<Option<i16>> as ToSql>::accepts(ty),
            PgParam::Int32Array(_) => <Vec<Option<i32>> as ToSql>::accepts(ty),
            PgParam::Int64Array(_) => <Vec<Option<i64>> as ToSql>::accepts(ty),
            PgParam::Float64Array(_) => <Vec<Option<f64>> as ToSql>::accepts(ty),
            PgParam::TextArray(_) => <Vec<Option<String>> as ToSql>::accepts(ty),
        }
    }
}

fn int_items<T: TryFrom<i64>>(items: &[Value], value: &Value, target: &Type) -> Result<Vec<Option<T>>> {
    items
        .iter()
        .map(|item| {
            if item.is_null() {
                return Ok(None);
            }
            let n = item
                .as_i64()
                .ok_or_else(|| bind_error(value, target, format!("element {} is not an integer", item)))?;
            T::try_from(n)
                .map(Some)
                .map_err(|_| bind_error(value, target, format!("element {} is out of range", n)))
        })
        .collect()
}

impl ToSql for PgParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            PgParam::Null => Ok(IsNull::Yes),
            PgParam::Bool(v) => v.to_sql(ty, out),
            PgParam::Int16(v) => v.to_sql(ty, out),
            PgParam::Int32(v) => v.to_sql(ty, out),
            PgParam::Int64(v) => v.to_sql(ty, out),
            PgParam::Oid(v) => v.to_sql(ty, out),
            PgParam::Float32(v) => v.to_sql(ty, out),
            PgParam::Float64(v) => v.to_sql(ty, out),
            PgParam::Numeric(raw) => {
                out.extend_from_slice(raw);
                Ok(IsNull::No)
            }
            PgParam::Text(v) => {
                out.extend_from_slice(v.as_bytes());
                Ok(IsNull::No)
            }
            PgParam::Bytes(v) => v.to_sql(ty, out),
            PgParam::Uuid(v) => v.to_sql(ty, out),
            PgParam::Json(v) => v.to_sql(ty, out),
            PgParam::Timestamptz(v) => v.to_sql(ty, out),
            PgParam::Date(v) => v.to_sql(ty, out),
            PgParam::Time(v) => v.to_sql(ty, out),
            PgParam::Timestamp(v) => v.to_sql(ty, out),
            PgParam::BoolArray(v) => v.to_sql(ty, out),
            PgParam::Int16Array(v) => v.to_sql(ty, out),
            PgParam::Int32Array(v) => v.to_sql(ty, out),
            PgParam::Int64Array(v) => v.to_sql(ty, out),
            PgParam::Float64Array(v) => v.to_sql(ty, out),
            PgParam::TextArray(v) => v.to_sql(ty, out),
        }
    }

    // Checked against the declared type in `for_type`
    fn accepts(_: &Type) -> bool {
        true
    }

    postgres_types::to_sql_checked!();
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        let column = &row.columns()[idx];
        WardenError::Query(format!(
            "cannot decode column '{}' of type {}: {}",
            column.name(),
            column.type_(),
            e
        ))
    })
}

fn array<'a, T, F>(row: &'a Row, idx: usize, wrap: F) -> Result<Option<Value>>
where
    T: FromSql<'a>,
    F: Fn(T) -> Value,
{
    Ok(get::<Vec<Option<T>>>(row, idx)?.map(|items| {
        Value::Array(
            items
                .into_iter()
                .map(|item| item.map(&wrap).unwrap_or(Value::Null))
                .collect(),
        )
    }))
}

/// Decode one cell.
///
/// Types without a native `Value` variant (interval, inet, timetz, money)
/// become their Postgres text form; anything unrecognized keeps its raw bytes.
pub(crate) fn cell(row: &Row, idx: usize) -> Result<Value> {
    let ty = row.columns()[idx].type_();
    let value = match *ty {
        Type::BOOL => get(row, idx)?.map(Value::Bool),
        Type::INT2 => get(row, idx)?.map(Value::Int16),
        Type::INT4 => get(row, idx)?.map(Value::Int32),
        Type::INT8 => get(row, idx)?.map(Value::Int64),
        Type::OID => get::<u32>(row, idx)?.map(|v| Value::Int64(i64::from(v))),
        Type::FLOAT4 => get(row, idx)?.map(Value::Float32),
        Type::FLOAT8 => get(row, idx)?.map(Value::Float64),
        Type::NUMERIC => get::<Numeric>(row, idx)?.map(|n| Value::Decimal(n.0)),
        Type::MONEY => get::<Money>(row, idx)?.map(|m| Value::Decimal(m.0)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => get(row, idx)?.map(Value::String),
        Type::CHAR => get::<i8>(row, idx)?.map(|c| Value::String(char::from(c as u8).to_string())),
        Type::BYTEA => get(row, idx)?.map(Value::Bytes),
        Type::UUID => get(row, idx)?.map(Value::Uuid),
        Type::JSON | Type::JSONB => get(row, idx)?.map(Value::Json),
        Type::DATE => get(row, idx)?.map(Value::Date),
        Type::TIME => get(row, idx)?.map(Value::Time),
        Type::TIMETZ => get::<TimeTz>(row, idx)?.map(|t| Value::String(t.0)),
        Type::TIMESTAMP => get(row, idx)?.map(Value::DateTime),
        Type::TIMESTAMPTZ => get(row, idx)?.map(Value::DateTimeUtc),
        Type::INTERVAL => get::<Interval>(row, idx)?.map(|i| Value::String(i.to_string())),
        Type::INET | Type::CIDR => get::<Inet>(row, idx)?.map(|i| Value::String(i.0)),
        Type::BOOL_ARRAY => array(row, idx, Value::Bool)?,
        Type::INT2_ARRAY => array(row, idx, Value::Int16)?,
        Type::INT4_ARRAY => array(row, idx, Value::Int32)?,
        Type::INT8_ARRAY => array(row, idx, Value::Int64)?,
        Type::FLOAT4_ARRAY => array(row, idx, Value::Float32)?,
        Type::FLOAT8_ARRAY => array(row, idx, Value::Float64)?,
        Type::NUMERIC_ARRAY => array(row, idx, |n: Numeric| Value::Decimal(n.0))?,
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
            array(row, idx, Value::String)?
        }
        Type::BYTEA_ARRAY => array(row, idx, Value::Bytes)?,
        Type::UUID_ARRAY => array(row, idx, Value::Uuid)?,
        Type::JSON_ARRAY | Type::JSONB_ARRAY => array(row, idx, Value::Json)?,
        Type::DATE_ARRAY => array(row, idx, Value::Date)?,
        Type::TIMESTAMP_ARRAY => array(row, idx, Value::DateTime)?,
        Type::TIMESTAMPTZ_ARRAY => array(row, idx, Value::DateTimeUtc)?,
        _ if is_text_wire(ty) => get::<RawText>(row, idx)?.map(|raw| Value::String(raw.0)),
        _ => get::<RawBytes>(row, idx)?.map(|raw| Value::Bytes(raw.0)),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Collect rows into driver rows; `columns` comes from the prepared statement
/// so an empty result still carries its column names
pub(crate) fn driver_rows(columns: Vec<String>, rows: &[Row]) -> Result<DriverRows> {
    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|idx| cell(row, idx)).collect::<Result<Vec<_>>>())
        .collect::<Result<Vec<_>>>()?;
    Ok(DriverRows::new(columns, rows))
}
