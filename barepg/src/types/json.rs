use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{Decode, DecodeError, Value};

/// Decode postgres json value into any [`Deserialize`] type.
///
/// # Panics
///
/// Note that when converted [`Into<Value>`], if [`Serialize`] implementation decide
/// to fail, it will will panics.
#[derive(Debug)]
pub struct Json<T>(pub T);

pub(crate) fn decode_json(raw: &[u8]) -> Result<Value, DecodeError> {
    // jsonb binary format starts with a version byte
    let raw = match raw.split_first() {
        Some((b'\x01', rest)) => rest,
        _ => raw,
    };
    Ok(Value::Json(serde_json::from_slice(raw)?))
}

impl<T> Decode for Json<T>
where
    T: DeserializeOwned,
{
    fn decode(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Json(json) => Ok(Json(serde_json::from_value(json)?)),
            Value::Text(text) => Ok(Json(serde_json::from_str(&text)?)),
            Value::Null => Err(DecodeError::Null),
            value => Err(DecodeError::TypeMismatch { expected: "json", found: value.kind_name() }),
        }
    }
}

impl<T: Serialize> From<Json<T>> for Value {
    fn from(value: Json<T>) -> Self {
        Value::Json(serde_json::to_value(&value.0).expect("json serialization failed"))
    }
}

impl<T: Serialize> Serialize for Json<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Json<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self(T::deserialize(deserializer)?))
    }
}
