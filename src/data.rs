//! Dynamic values flowing into and out of the mapper.
//!
//! [`Value`] plays two roles: it is the raw "boxed" cell a [`crate::record::Record`]
//! hands out for a column, and it is the tree a compiled mapper produces for a
//! row. Mapped trees serialize to plain JSON-like structures, which is how
//! [`from_value()`] turns them into ordinary Rust types.

use std::{collections::BTreeMap, fmt};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::de::DeserializeOwned;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::error::MapError;
use crate::types::ValueType;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Decimal(Decimal),
    String(String),
    Guid(Uuid),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Binary(Vec<u8>),
    Enum(EnumValue),
    List(Vec<Value>),
    Array(Vec<Value>),
    Tuple(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(Object),
}

/// An enumeration member. `name` is `None` when the discriminant has no
/// declared member (integral sources are reinterpreted, not validated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub type_name: String,
    pub name: Option<String>,
    pub value: i64,
}

/// An instance of a custom object type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Object {
    pub type_name: String,
    pub fields: BTreeMap<String, Value>,
}

impl Object {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Looks a field up by exact name first, then case-insensitively.
    pub fn get_ignore_case(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).or_else(|| {
            self.fields
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The column type describing this value, for scalar variants only.
    pub fn value_type(&self) -> Option<ValueType> {
        let ty = match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int8(_) => ValueType::Int8,
            Value::Int16(_) => ValueType::Int16,
            Value::Int32(_) => ValueType::Int32,
            Value::Int64(_) => ValueType::Int64,
            Value::UInt8(_) => ValueType::UInt8,
            Value::UInt16(_) => ValueType::UInt16,
            Value::UInt32(_) => ValueType::UInt32,
            Value::UInt64(_) => ValueType::UInt64,
            Value::Float32(_) => ValueType::Float32,
            Value::Float64(_) => ValueType::Float64,
            Value::Decimal(_) => ValueType::Decimal,
            Value::String(_) => ValueType::String,
            Value::Guid(_) => ValueType::Guid,
            Value::Date(_) => ValueType::Date,
            Value::DateTime(_) => ValueType::DateTime,
            Value::Time(_) => ValueType::Time,
            Value::Binary(_) => ValueType::Binary,
            _ => return None,
        };
        Some(ty)
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int8(i) => i.to_string(),
            Value::Int16(i) => i.to_string(),
            Value::Int32(i) => i.to_string(),
            Value::Int64(i) => i.to_string(),
            Value::UInt8(i) => i.to_string(),
            Value::UInt16(i) => i.to_string(),
            Value::UInt32(i) => i.to_string(),
            Value::UInt64(i) => i.to_string(),
            Value::Float32(f) => format_float(f64::from(*f)),
            Value::Float64(f) => format_float(*f),
            Value::Decimal(d) => d.normalize().to_string(),
            Value::String(s) => s.clone(),
            Value::Guid(g) => g.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::Time(t) => t.format("%H:%M:%S").to_string(),
            Value::Binary(bytes) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
            Value::Enum(e) => e.name.clone().unwrap_or_else(|| e.value.to_string()),
            Value::List(items) | Value::Array(items) | Value::Tuple(items) => {
                let inner = items
                    .iter()
                    .map(Value::as_display)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("[{inner}]")
            }
            Value::Map(entries) => {
                let inner = entries
                    .iter()
                    .map(|(key, value)| format!("{key}: {}", value.as_display()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{inner}}}")
            }
            Value::Object(object) => {
                let inner = object
                    .fields
                    .iter()
                    .map(|(key, value)| format!("{key}: {}", value.as_display()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} {{{inner}}}", object.type_name)
            }
        }
    }

    /// Integral view of a numeric value. Floats and decimals are truncated.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Bool(b) => Some(i128::from(*b)),
            Value::Int8(i) => Some(i128::from(*i)),
            Value::Int16(i) => Some(i128::from(*i)),
            Value::Int32(i) => Some(i128::from(*i)),
            Value::Int64(i) => Some(i128::from(*i)),
            Value::UInt8(i) => Some(i128::from(*i)),
            Value::UInt16(i) => Some(i128::from(*i)),
            Value::UInt32(i) => Some(i128::from(*i)),
            Value::UInt64(i) => Some(i128::from(*i)),
            Value::Float32(f) => Some(*f as i128),
            Value::Float64(f) => Some(*f as i128),
            Value::Decimal(d) => d.trunc().to_i128(),
            Value::Enum(e) => Some(i128::from(e.value)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(f) => Some(f64::from(*f)),
            Value::Float64(f) => Some(*f),
            Value::Decimal(d) => d.to_f64(),
            other => other.as_i128().map(|i| i as f64),
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Float32(f) => Decimal::from_f32(*f),
            Value::Float64(f) => Decimal::from_f64(*f),
            other => other.as_i128().and_then(Decimal::from_i128),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Items of a list, array, or tuple.
    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Array(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Number of leaf values in the tree. A null leaf counts as one value.
    pub fn logical_len(&self) -> usize {
        match self {
            Value::List(items) | Value::Array(items) | Value::Tuple(items) => {
                items.iter().map(Value::logical_len).sum()
            }
            Value::Map(entries) => entries.values().map(Value::logical_len).sum(),
            Value::Object(object) => object.fields.values().map(Value::logical_len).sum(),
            _ => 1,
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        (f as i64).to_string()
    } else {
        f.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int8(i) => serializer.serialize_i8(*i),
            Value::Int16(i) => serializer.serialize_i16(*i),
            Value::Int32(i) => serializer.serialize_i32(*i),
            Value::Int64(i) => serializer.serialize_i64(*i),
            Value::UInt8(i) => serializer.serialize_u8(*i),
            Value::UInt16(i) => serializer.serialize_u16(*i),
            Value::UInt32(i) => serializer.serialize_u32(*i),
            Value::UInt64(i) => serializer.serialize_u64(*i),
            Value::Float32(f) => serializer.serialize_f32(*f),
            Value::Float64(f) => serializer.serialize_f64(*f),
            Value::Decimal(d) => Serialize::serialize(d, serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::Guid(g) => Serialize::serialize(g, serializer),
            Value::Date(d) => Serialize::serialize(d, serializer),
            Value::DateTime(dt) => Serialize::serialize(dt, serializer),
            Value::Time(t) => Serialize::serialize(t, serializer),
            Value::Binary(bytes) => serializer.serialize_bytes(bytes),
            Value::Enum(e) => match &e.name {
                Some(name) => serializer.serialize_str(name),
                None => serializer.serialize_i64(e.value),
            },
            Value::List(items) | Value::Array(items) | Value::Tuple(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => serialize_entries(serializer, entries),
            Value::Object(object) => serialize_entries(serializer, &object.fields),
        }
    }
}

fn serialize_entries<S>(serializer: S, entries: &BTreeMap<String, Value>) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (key, value) in entries {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

/// Converts a mapped value into an ordinary Rust type.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, MapError> {
    let json = serde_json::to_value(value)?;
    Ok(serde_json::from_value(json)?)
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];
const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

/// Tries each chrono format in turn; the first that parses wins.
fn parse_any_format<T>(
    value: &str,
    formats: &[&str],
    label: &str,
    parse: fn(&str, &str) -> chrono::ParseResult<T>,
) -> Result<T> {
    formats
        .iter()
        .find_map(|format| parse(value, format).ok())
        .ok_or_else(|| anyhow!("Failed to parse '{value}' as {label}"))
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    parse_any_format(value, DATE_FORMATS, "date", NaiveDate::parse_from_str)
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    parse_any_format(value, DATETIME_FORMATS, "datetime", NaiveDateTime::parse_from_str)
}

pub fn parse_naive_time(value: &str) -> Result<NaiveTime> {
    parse_any_format(value, TIME_FORMATS, "time", NaiveTime::parse_from_str)
}

pub fn parse_boolean(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Ok(true),
        "false" | "f" | "no" | "n" | "0" => Ok(false),
        _ => bail!("Failed to parse '{value}' as boolean"),
    }
}

pub fn parse_guid(value: &str) -> Result<Uuid> {
    let trimmed = value.trim().trim_matches(|c| matches!(c, '{' | '}'));
    Uuid::parse_str(trimmed).with_context(|| format!("Failed to parse '{value}' as GUID"))
}

/// Parses a text cell into a typed value. Empty text is the null marker.
pub fn parse_typed_value(value: &str, ty: &ValueType) -> Result<Option<Value>> {
    if value.is_empty() {
        return Ok(None);
    }
    let trimmed = value.trim();
    let parsed = match ty {
        ValueType::String | ValueType::Object => Value::String(value.to_string()),
        ValueType::Bool => Value::Bool(parse_boolean(trimmed)?),
        ValueType::Int8 => Value::Int8(parse_number(trimmed, "int8")?),
        ValueType::Int16 => Value::Int16(parse_number(trimmed, "int16")?),
        ValueType::Int32 => Value::Int32(parse_number(trimmed, "int32")?),
        ValueType::Int64 => Value::Int64(parse_number(trimmed, "int64")?),
        ValueType::UInt8 => Value::UInt8(parse_number(trimmed, "uint8")?),
        ValueType::UInt16 => Value::UInt16(parse_number(trimmed, "uint16")?),
        ValueType::UInt32 => Value::UInt32(parse_number(trimmed, "uint32")?),
        ValueType::UInt64 => Value::UInt64(parse_number(trimmed, "uint64")?),
        ValueType::Float32 => Value::Float32(parse_number(trimmed, "float32")?),
        ValueType::Float64 => Value::Float64(parse_number(trimmed, "float64")?),
        ValueType::Decimal => Value::Decimal(parse_number(trimmed, "decimal")?),
        ValueType::Guid => Value::Guid(parse_guid(trimmed)?),
        ValueType::Date => Value::Date(parse_naive_date(trimmed)?),
        ValueType::DateTime => Value::DateTime(parse_naive_datetime(trimmed)?),
        ValueType::Time => Value::Time(parse_naive_time(trimmed)?),
        ValueType::Binary => Value::Binary(parse_hex(trimmed)?),
    };
    Ok(Some(parsed))
}

fn parse_number<T>(value: &str, label: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("Failed to parse '{value}' as {label}"))
}

fn parse_hex(value: &str) -> Result<Vec<u8>> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.len() % 2 != 0 {
        bail!("Failed to parse '{value}' as binary: odd number of hex digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|idx| {
            u8::from_str_radix(&digits[idx..idx + 2], 16)
                .with_context(|| format!("Failed to parse '{value}' as binary"))
        })
        .collect()
}
