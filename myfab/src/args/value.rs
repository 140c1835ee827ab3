use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Error;

/// The types a job argument or result is allowed to carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Uuid(Uuid),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Uuid(_) => "uuid",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Result<&str, Error> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(Error::TypeMismatch {
                expected: "string",
                got: other.type_name(),
            }),
        }
    }

    pub fn as_int(&self) -> Result<i64, Error> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(Error::TypeMismatch {
                expected: "int",
                got: other.type_name(),
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, Error> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(Error::TypeMismatch {
                expected: "bool",
                got: other.type_name(),
            }),
        }
    }

    /// Accepts both the dedicated uuid variant and its string form.
    pub fn as_uuid(&self) -> Result<Uuid, Error> {
        match self {
            Value::Uuid(uuid) => Ok(*uuid),
            Value::Str(s) => Uuid::parse_str(s).map_err(|_| Error::TypeMismatch {
                expected: "uuid",
                got: "string",
            }),
            other => Err(Error::TypeMismatch {
                expected: "uuid",
                got: other.type_name(),
            }),
        }
    }

    pub fn as_list(&self) -> Result<&[Value], Error> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(Error::TypeMismatch {
                expected: "list",
                got: other.type_name(),
            }),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Value::Null,
        }
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<&Value> for mysql_async::Value {
    fn from(value: &Value) -> Self {
        use mysql_async::Value as Sql;
        match value {
            Value::Null => Sql::NULL,
            Value::Bool(b) => Sql::Int(*b as i64),
            Value::Int(i) => Sql::Int(*i),
            Value::Str(s) => Sql::Bytes(s.clone().into_bytes()),
            Value::Uuid(uuid) => Sql::Bytes(uuid.to_string().into_bytes()),
            // Nested values are stored in their portable encoding.
            Value::List(_) | Value::Map(_) => {
                Sql::Bytes(rmp_serde::to_vec(value).unwrap_or_default())
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Int(n.as_i64().unwrap_or_default()),
            Json::String(s) => Value::Str(s),
            Json::Array(items) => Value::List(items.into_iter().map(Into::into).collect()),
            Json::Object(map) => Value::Map(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Str(s) => Json::String(s.clone()),
            Value::Uuid(uuid) => Json::String(uuid.to_string()),
            Value::List(items) => Json::Array(items.iter().map(Into::into).collect()),
            Value::Map(map) => Json::Object(
                map.iter().map(|(k, v)| (k.clone(), v.into())).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uuid_from_string_form() {
        let uuid = Uuid::new_v4();
        let value = Value::Str(uuid.to_string());
        assert_eq!(value.as_uuid().unwrap(), uuid);
    }

    #[test]
    fn type_mismatch_reported() {
        let err = Value::Int(1).as_str().unwrap_err();
        assert!(err.to_string().contains("expected string"));
    }
}
