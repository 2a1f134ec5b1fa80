//! Vendor extension data
//!
//! Every OCPP 2.0.1 object may carry a `customData` object: a required
//! `vendorId` plus any number of vendor-defined keys, all flattened into the
//! same JSON object. The engine cannot know what those keys mean, so they are
//! kept as raw JSON values and written back untouched.
//!
//! `vendorId` lives in its own typed field. It is stripped from the bag on
//! decode and re-added on encode, so `values` never holds it.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::validate::{self, Field, Shape, Violation};

/// Wire key of the vendor identity
pub const VENDOR_ID_KEY: &str = "vendorId";

/// Maximum length of a vendor identity
pub const VENDOR_ID_MAX_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("extension data must be a JSON object, got {0}")]
    MalformedExtension(&'static str),
}

/// Vendor extension bag
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomData {
    pub vendor_id: String,
    pub values: Map<String, Value>,
}

impl CustomData {
    pub fn new(vendor_id: impl Into<String>) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            values: Map::new(),
        }
    }

    /// Add a vendor field. A `vendorId` key is ignored; use the typed field.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        if key == VENDOR_ID_KEY {
            return None;
        }
        self.values.insert(key, value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Decode from a raw JSON value.
    ///
    /// Only a non-object input is an error. A missing or non-string
    /// `vendorId` decodes to an empty string and is left to validation.
    pub fn decode(raw: &Value) -> Result<Self, CodecError> {
        Self::from_value(raw.clone())
    }

    /// Owned variant of [`CustomData::decode`]
    pub fn from_value(raw: Value) -> Result<Self, CodecError> {
        let mut values = match raw {
            Value::Object(map) => map,
            other => return Err(CodecError::MalformedExtension(json_type(&other))),
        };

        let vendor_id = match values.remove(VENDOR_ID_KEY) {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };

        Ok(Self { vendor_id, values })
    }

    /// Encode into a flat JSON object
    pub fn encode(&self) -> Value {
        let mut output: Map<String, Value> = self
            .values
            .iter()
            .filter(|(k, _)| k.as_str() != VENDOR_ID_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        output.insert(VENDOR_ID_KEY.to_string(), Value::String(self.vendor_id.clone()));
        Value::Object(output)
    }

    /// Structural contract of the extension object
    pub fn shape() -> Shape {
        Shape::bare("CustomData").field(
            Field::string(VENDOR_ID_KEY)
                .required()
                .max_len(VENDOR_ID_MAX_LEN),
        )
    }

    pub fn validate(&self) -> Vec<Violation> {
        validate::validate(&self.encode(), &Self::shape())
    }
}

impl Serialize for CustomData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra: Vec<_> = self
            .values
            .iter()
            .filter(|(k, _)| k.as_str() != VENDOR_ID_KEY)
            .collect();

        let mut map = serializer.serialize_map(Some(extra.len() + 1))?;
        for (k, v) in extra {
            map.serialize_entry(k, v)?;
        }
        map.serialize_entry(VENDOR_ID_KEY, &self.vendor_id)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for CustomData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        CustomData::from_value(raw).map_err(de::Error::custom)
    }
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
