//! Text encoding for values.
//!
//! [`replace`] and [`revive`] map a [`Value`] to and from plain JSON. Maps,
//! sets and dates are written as tagged objects:
//!
//! ```text
//! {"dataType":"Map","value":[[key, value], ...]}
//! {"dataType":"Set","value":[member, ...]}
//! {"dataType":"Date","value":"2024-01-01T00:00:00Z"}
//! ```
//!
//! The `Serialize`/`Deserialize` impls of [`Value`] go through the same pair,
//! so any serde format sees the tagged shape.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map as JsonMap};

use super::Value;

const DATA_TYPE: &str = "dataType";
const PAYLOAD: &str = "value";

/// Convert a value into tagged JSON.
pub fn replace(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Value::Number(n.clone()),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(replace).collect()),
        Value::Object(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), replace(v)))
                .collect::<JsonMap<_, _>>(),
        ),
        Value::Map(pairs) => json!({
            DATA_TYPE: "Map",
            PAYLOAD: pairs
                .iter()
                .map(|(k, v)| serde_json::Value::Array(vec![replace(k), replace(v)]))
                .collect::<Vec<_>>(),
        }),
        Value::Set(items) => json!({
            DATA_TYPE: "Set",
            PAYLOAD: items.iter().map(replace).collect::<Vec<_>>(),
        }),
        Value::Date(date) => json!({
            DATA_TYPE: "Date",
            PAYLOAD: date.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }),
    }
}

/// Rebuild a value from tagged JSON. Objects whose tag is unknown or whose
/// payload has the wrong shape are kept as plain objects.
pub fn revive(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Array(items) => Value::Array(items.into_iter().map(revive).collect()),
        serde_json::Value::Object(fields) => match tagged(&fields) {
            Some(value) => value,
            None => Value::Object(fields.into_iter().map(|(k, v)| (k, revive(v))).collect()),
        },
        other => Value::from(other),
    }
}

fn tagged(fields: &JsonMap<String, serde_json::Value>) -> Option<Value> {
    if fields.len() != 2 {
        return None;
    }
    let tag = fields.get(DATA_TYPE)?.as_str()?;
    let payload = fields.get(PAYLOAD)?;
    match tag {
        "Map" => {
            let entries = payload.as_array()?;
            let mut pairs = Vec::with_capacity(entries.len());
            for entry in entries {
                match entry.as_array().map(Vec::as_slice) {
                    Some([k, v]) => pairs.push((revive(k.clone()), revive(v.clone()))),
                    _ => return None,
                }
            }
            Some(Value::map(pairs))
        }
        "Set" => {
            let members = payload.as_array()?;
            Some(Value::set(members.iter().cloned().map(revive)))
        }
        "Date" => {
            let date = DateTime::parse_from_rfc3339(payload.as_str()?).ok()?;
            Some(Value::Date(date.with_timezone(&Utc)))
        }
        _ => None,
    }
}

/// Encode a value as JSON text.
pub fn to_text(value: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&replace(value))
}

/// Decode JSON text produced by [`to_text`] (or any plain JSON).
pub fn from_text(text: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str::<serde_json::Value>(text).map(revive)
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        replace(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(revive)
    }
}
