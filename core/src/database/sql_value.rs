use std::str::FromStr;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::{ToSqlOutput, Value as SqliteValue, ValueRef};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde_json::Value;
use tokio_postgres::types::{to_sql_checked, IsNull, Kind, ToSql, Type as PgType};
use uuid::Uuid;

type EncodeError = Box<dyn std::error::Error + Sync + Send>;

/// A single dynamically typed cell.
///
/// Values are converted to the server-side type of the destination column when
/// they are encoded, so callers can hand over loosely typed input (CSV text for
/// example) and still load into typed columns.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Decimal(Decimal),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Json(Value),
    Uuid(Uuid),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(value) => Some(*value),
            SqlValue::Text(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn from_sqlite(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Int(v),
            ValueRef::Real(v) => SqlValue::Float(v),
            ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => SqlValue::Bytes(v.to_vec()),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(value as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<Decimal> for SqlValue {
    fn from(value: Decimal) -> Self {
        SqlValue::Decimal(value)
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        SqlValue::Uuid(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

fn is_text_type(ty: &PgType) -> bool {
    matches!(*ty, PgType::TEXT | PgType::VARCHAR | PgType::BPCHAR | PgType::NAME | PgType::UNKNOWN)
}

fn mismatch(value: &str, ty: &PgType) -> EncodeError {
    format!("can not encode {} as postgres type {}", value, ty).into()
}

fn parse_bool(value: &str) -> Result<bool, EncodeError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
        other => Err(format!("invalid boolean literal '{}'", other).into()),
    }
}

fn parse_naive_timestamp(value: &str) -> Result<NaiveDateTime, EncodeError> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.naive_utc());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(parsed);
        }
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")?;
    date.and_hms_opt(0, 0, 0).ok_or_else(|| format!("invalid timestamp '{}'", value).into())
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, EncodeError> {
    match DateTime::parse_from_rfc3339(value.trim()) {
        Ok(parsed) => Ok(parsed.with_timezone(&Utc)),
        Err(_) => Ok(parse_naive_timestamp(value)?.and_utc()),
    }
}

fn parse_bytes(value: &str) -> Result<Vec<u8>, EncodeError> {
    match value.strip_prefix("\\x").or_else(|| value.strip_prefix("0x")) {
        Some(hex_value) => Ok(hex::decode(hex_value)?),
        None => Ok(value.as_bytes().to_vec()),
    }
}

fn encode_text(value: &str, ty: &PgType, out: &mut BytesMut) -> Result<IsNull, EncodeError> {
    match *ty {
        PgType::BOOL => parse_bool(value)?.to_sql(ty, out),
        PgType::INT2 => value.trim().parse::<i16>()?.to_sql(ty, out),
        PgType::INT4 => value.trim().parse::<i32>()?.to_sql(ty, out),
        PgType::INT8 => value.trim().parse::<i64>()?.to_sql(ty, out),
        PgType::FLOAT4 => value.trim().parse::<f32>()?.to_sql(ty, out),
        PgType::FLOAT8 => value.trim().parse::<f64>()?.to_sql(ty, out),
        PgType::NUMERIC => {
            let value = value.trim();
            let decimal =
                Decimal::from_str(value).or_else(|_| Decimal::from_scientific(value))?;
            decimal.to_sql(ty, out)
        }
        PgType::JSON | PgType::JSONB => serde_json::from_str::<Value>(value)?.to_sql(ty, out),
        PgType::UUID => Uuid::parse_str(value.trim())?.to_sql(ty, out),
        PgType::TIMESTAMPTZ => parse_timestamp(value)?.to_sql(ty, out),
        PgType::TIMESTAMP => parse_naive_timestamp(value)?.to_sql(ty, out),
        PgType::DATE => NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")?.to_sql(ty, out),
        PgType::BYTEA => parse_bytes(value)?.to_sql(ty, out),
        _ => match ty.kind() {
            Kind::Domain(inner) => encode_text(value, inner, out),
            Kind::Enum(_) => encode_raw_text(value, out),
            _ if is_text_type(ty) || *ty == PgType::XML || ty.name() == "citext" => {
                encode_raw_text(value, out)
            }
            _ => Err(mismatch(value, ty)),
        },
    }
}

// binary format of text-like types is the utf8 bytes as is
fn encode_raw_text(value: &str, out: &mut BytesMut) -> Result<IsNull, EncodeError> {
    out.extend_from_slice(value.as_bytes());
    Ok(IsNull::No)
}

fn encode_int(value: i64, ty: &PgType, out: &mut BytesMut) -> Result<IsNull, EncodeError> {
    match *ty {
        PgType::INT2 => i16::try_from(value)?.to_sql(ty, out),
        PgType::INT4 => i32::try_from(value)?.to_sql(ty, out),
        PgType::INT8 => value.to_sql(ty, out),
        PgType::FLOAT4 => (value as f32).to_sql(ty, out),
        PgType::FLOAT8 => (value as f64).to_sql(ty, out),
        PgType::NUMERIC => Decimal::from(value).to_sql(ty, out),
        PgType::BOOL => (value != 0).to_sql(ty, out),
        _ if is_text_type(ty) => value.to_string().to_sql(ty, out),
        _ => Err(mismatch("integer", ty)),
    }
}

fn encode_float(value: f64, ty: &PgType, out: &mut BytesMut) -> Result<IsNull, EncodeError> {
    match *ty {
        PgType::FLOAT4 => (value as f32).to_sql(ty, out),
        PgType::FLOAT8 => value.to_sql(ty, out),
        PgType::NUMERIC => Decimal::from_f64_retain(value)
            .ok_or_else(|| mismatch("non-finite float", ty))?
            .to_sql(ty, out),
        _ if is_text_type(ty) => value.to_string().to_sql(ty, out),
        _ => Err(mismatch("float", ty)),
    }
}

fn encode_decimal(value: &Decimal, ty: &PgType, out: &mut BytesMut) -> Result<IsNull, EncodeError> {
    match *ty {
        PgType::NUMERIC => value.to_sql(ty, out),
        PgType::FLOAT4 | PgType::FLOAT8 => {
            encode_float(value.to_f64().ok_or_else(|| mismatch("decimal", ty))?, ty, out)
        }
        PgType::INT2 | PgType::INT4 | PgType::INT8 => {
            encode_int(value.to_i64().ok_or_else(|| mismatch("decimal", ty))?, ty, out)
        }
        _ if is_text_type(ty) => value.to_string().to_sql(ty, out),
        _ => Err(mismatch("decimal", ty)),
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &PgType, out: &mut BytesMut) -> Result<IsNull, EncodeError> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Text(value) => encode_text(value, ty, out),
            SqlValue::Int(value) => encode_int(*value, ty, out),
            SqlValue::Float(value) => encode_float(*value, ty, out),
            SqlValue::Decimal(value) => encode_decimal(value, ty, out),
            SqlValue::Bool(value) => match *ty {
                PgType::BOOL => value.to_sql(ty, out),
                PgType::INT2 | PgType::INT4 | PgType::INT8 => {
                    encode_int(i64::from(*value), ty, out)
                }
                _ if is_text_type(ty) => value.to_string().to_sql(ty, out),
                _ => Err(mismatch("boolean", ty)),
            },
            SqlValue::Bytes(value) => match *ty {
                PgType::BYTEA => value.to_sql(ty, out),
                _ if is_text_type(ty) => format!("\\x{}", hex::encode(value)).to_sql(ty, out),
                _ => Err(mismatch("bytes", ty)),
            },
            SqlValue::Timestamp(value) => match *ty {
                PgType::TIMESTAMPTZ => value.to_sql(ty, out),
                PgType::TIMESTAMP => value.naive_utc().to_sql(ty, out),
                PgType::DATE => value.date_naive().to_sql(ty, out),
                _ if is_text_type(ty) => value.to_rfc3339().to_sql(ty, out),
                _ => Err(mismatch("timestamp", ty)),
            },
            SqlValue::Date(value) => match *ty {
                PgType::DATE => value.to_sql(ty, out),
                PgType::TIMESTAMP => value
                    .and_hms_opt(0, 0, 0)
                    .ok_or_else(|| mismatch("date", ty))?
                    .to_sql(ty, out),
                _ if is_text_type(ty) => value.format("%Y-%m-%d").to_string().to_sql(ty, out),
                _ => Err(mismatch("date", ty)),
            },
            SqlValue::Json(value) => match *ty {
                PgType::JSON | PgType::JSONB => value.to_sql(ty, out),
                _ if is_text_type(ty) => value.to_string().to_sql(ty, out),
                _ => Err(mismatch("json", ty)),
            },
            SqlValue::Uuid(value) => match *ty {
                PgType::UUID => value.to_sql(ty, out),
                _ if is_text_type(ty) => value.to_string().to_sql(ty, out),
                _ => Err(mismatch("uuid", ty)),
            },
        }
    }

    fn accepts(_ty: &PgType) -> bool {
        true // conversion to the target type happens in to_sql
    }

    to_sql_checked!();
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(SqliteValue::Null),
            SqlValue::Bool(value) => ToSqlOutput::Owned(SqliteValue::Integer(i64::from(*value))),
            SqlValue::Int(value) => ToSqlOutput::Owned(SqliteValue::Integer(*value)),
            SqlValue::Float(value) => ToSqlOutput::Owned(SqliteValue::Real(*value)),
            SqlValue::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            SqlValue::Bytes(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value)),
            SqlValue::Decimal(value) => ToSqlOutput::Owned(SqliteValue::Text(value.to_string())),
            SqlValue::Timestamp(value) => {
                ToSqlOutput::Owned(SqliteValue::Text(value.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
            }
            SqlValue::Date(value) => {
                ToSqlOutput::Owned(SqliteValue::Text(value.format("%Y-%m-%d").to_string()))
            }
            SqlValue::Json(value) => ToSqlOutput::Owned(SqliteValue::Text(value.to_string())),
            SqlValue::Uuid(value) => ToSqlOutput::Owned(SqliteValue::Text(value.to_string())),
        })
    }
}
