// ironagg-core/src/value.rs
// BSON-like value model used by the $group engine

use crate::decimal::Decimal;
use crate::error::{IronAggError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::str::FromStr;

/// A document field value.
///
/// A *missing* field is never a `Value`; APIs return `Option<Value>` /
/// `Option<&Value>` and use `None` for it, so missing and `Null` stay distinct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Decimal(Decimal),
    String(String),
    Array(Vec<Value>),
    Document(Document),
}

/// Ordered field → value mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Insert or replace a field; replacing keeps the original position
    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.insert(field, value);
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Rough in-memory footprint in bytes
    pub fn approx_size(&self) -> usize {
        24 + self
            .fields
            .iter()
            .map(|(name, value)| name.len() + 24 + value.approx_size())
            .sum::<usize>()
    }

    /// Parse a JSON object (extended JSON aware) into a document
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        match Value::from_json(json)? {
            Value::Document(doc) => Ok(doc),
            _ => Err(IronAggError::Serialization(
                "Document must be a JSON object".to_string(),
            )),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        JsonValue::Object(map)
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (name, value) in iter {
            doc.insert(name, value);
        }
        doc
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int32(_) | Value::Int64(_) | Value::Double(_) | Value::Decimal(_)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Integral numeric value as i64, if it is exactly one
    pub fn as_exact_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(i) => Some(*i as i64),
            Value::Int64(i) => Some(*i),
            Value::Double(d) => {
                if d.fract() == 0.0 && *d >= -9.223_372_036_854_776e18 && *d < 9.223_372_036_854_776e18
                {
                    Some(*d as i64)
                } else {
                    None
                }
            }
            Value::Decimal(d) => d.to_i64(),
            _ => None,
        }
    }

    /// Type name as the database reports it in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int32(_) => "int",
            Value::Int64(_) => "long",
            Value::Double(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Document(_) => "object",
        }
    }

    /// Rough in-memory footprint in bytes
    pub fn approx_size(&self) -> usize {
        match self {
            Value::Null | Value::Bool(_) | Value::Int32(_) | Value::Int64(_) | Value::Double(_) => {
                16
            }
            Value::Decimal(d) => d.approx_size(),
            Value::String(s) => 24 + s.len(),
            Value::Array(items) => 24 + items.iter().map(Value::approx_size).sum::<usize>(),
            Value::Document(doc) => doc.approx_size(),
        }
    }

    /// Convert extended JSON into a value.
    ///
    /// Integers that fit in 32 bits become `Int32`, other integers `Int64`,
    /// floats `Double`. The `$numberInt`, `$numberLong`, `$numberDouble` and
    /// `$numberDecimal` wrappers select a type explicitly.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        Ok(match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    match i32::try_from(i) {
                        Ok(small) => Value::Int32(small),
                        Err(_) => Value::Int64(i),
                    }
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => Value::Array(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            JsonValue::Object(map) => {
                if let Some(wrapped) = Self::from_extended_json(map)? {
                    return Ok(wrapped);
                }
                let mut doc = Document::new();
                for (name, value) in map {
                    doc.insert(name.clone(), Value::from_json(value)?);
                }
                Value::Document(doc)
            }
        })
    }

    fn from_extended_json(map: &Map<String, JsonValue>) -> Result<Option<Value>> {
        if map.len() != 1 {
            return Ok(None);
        }
        let (key, raw) = match map.iter().next() {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let text = match raw.as_str() {
            Some(text) => text,
            None => return Ok(None),
        };
        let invalid = || IronAggError::Serialization(format!("Invalid {} value: {}", key, text));

        let value = match key.as_str() {
            "$numberInt" => Value::Int32(text.parse().map_err(|_| invalid())?),
            "$numberLong" => Value::Int64(text.parse().map_err(|_| invalid())?),
            "$numberDouble" => Value::Double(match text {
                "NaN" => f64::NAN,
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                other => other.parse().map_err(|_| invalid())?,
            }),
            "$numberDecimal" => Value::Decimal(Decimal::from_str(text).map_err(|_| invalid())?),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    /// Convert to (relaxed) extended JSON
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int32(i) => JsonValue::from(*i),
            Value::Int64(i) => JsonValue::from(*i),
            Value::Double(d) => match serde_json::Number::from_f64(*d) {
                Some(n) => JsonValue::Number(n),
                None => {
                    let text = if d.is_nan() {
                        "NaN"
                    } else if *d > 0.0 {
                        "Infinity"
                    } else {
                        "-Infinity"
                    };
                    wrap("$numberDouble", text.to_string())
                }
            },
            Value::Decimal(d) => wrap("$numberDecimal", d.to_string()),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Document(doc) => doc.to_json(),
        }
    }
}

fn wrap(key: &str, text: String) -> JsonValue {
    let mut map = Map::new();
    map.insert(key.to_string(), JsonValue::String(text));
    JsonValue::Object(map)
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Document(doc)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}
