//! Job arguments: a whitelisted value union with a portable binary
//! encoding.
//!
//! Checkpoint rows must be readable by a future release, so arguments are
//! restricted to a small set of types and serialized with MessagePack
//! instead of anything language- or version-specific.

pub mod error;
pub mod value;

pub use error::Error;
pub use value::Value;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Positional and keyword arguments for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Args {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn with_kw(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// Positional argument at `index`, erroring when missing.
    pub fn get(&self, index: usize) -> Result<&Value, Error> {
        self.positional.get(index).ok_or(Error::Missing(index))
    }

    pub fn kw(&self, name: &str) -> Option<&Value> {
        self.keyword.get(name)
    }

    /// Encode to `(positional, keyword)` MessagePack blobs.
    pub fn encode(&self) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let positional = rmp_serde::to_vec(&self.positional)?;
        let keyword = rmp_serde::to_vec(&self.keyword)?;
        Ok((positional, keyword))
    }

    pub fn decode(positional: &[u8], keyword: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            positional: rmp_serde::from_slice(positional)?,
            keyword: rmp_serde::from_slice(keyword)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn round_trip() {
        let uuid = Uuid::new_v4();
        let args = Args::new()
            .with("group-1")
            .with(42i64)
            .with(uuid)
            .with(Value::List(vec![Value::Null, Value::Bool(true)]))
            .with_kw("timeout", 5i64);

        let (pos, kw) = args.encode().unwrap();
        let decoded = Args::decode(&pos, &kw).unwrap();
        assert_eq!(args, decoded);
        assert_eq!(decoded.get(1).unwrap().as_int().unwrap(), 42);
        assert_eq!(decoded.get(2).unwrap().as_uuid().unwrap(), uuid);
        assert_eq!(decoded.kw("timeout").unwrap().as_int().unwrap(), 5);
    }

    #[test]
    fn missing_positional() {
        let args = Args::new();
        assert!(matches!(args.get(0), Err(Error::Missing(0))));
    }
}
