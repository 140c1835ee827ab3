//! Sharding: mappings, shards, range and hash specs, lookup resolution
//! and the procedures that move data around without breaking placement
//! invariants.

pub mod actions;
pub mod backup;
pub mod error;
pub mod hash;
pub mod key;
pub mod mapping;
pub mod prune;
pub mod range;
pub mod resolver;
pub mod shard;
pub mod triggers;

pub use backup::{BackupImage, MysqldumpSnapshotter, NullSnapshotter, Snapshotter};
pub use error::Error;
pub use key::ShardKey;
pub use mapping::{ShardMapping, ShardTable};
pub use resolver::{lookup, LookupHint, ShardLookup};
pub use shard::{Shard, ShardState};

use std::fmt;
use std::str::FromStr;

/// How a mapping partitions its key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ShardingType {
    /// Legacy alias of [`ShardingType::RangeInteger`].
    Range,
    RangeInteger,
    RangeString,
    RangeDatetime,
    Hash,
}

impl ShardingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardingType::Range => "RANGE",
            ShardingType::RangeInteger => "RANGE_INTEGER",
            ShardingType::RangeString => "RANGE_STRING",
            ShardingType::RangeDatetime => "RANGE_DATETIME",
            ShardingType::Hash => "HASH",
        }
    }

    pub fn is_range(&self) -> bool {
        !matches!(self, ShardingType::Hash)
    }
}

impl FromStr for ShardingType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RANGE" => Ok(ShardingType::Range),
            "RANGE_INTEGER" => Ok(ShardingType::RangeInteger),
            "RANGE_STRING" => Ok(ShardingType::RangeString),
            "RANGE_DATETIME" => Ok(ShardingType::RangeDatetime),
            "HASH" => Ok(ShardingType::Hash),
            other => Err(Error::UnknownType(other.into())),
        }
    }
}

impl fmt::Display for ShardingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn type_round_trip() {
        for kind in [
            ShardingType::Range,
            ShardingType::RangeInteger,
            ShardingType::RangeString,
            ShardingType::RangeDatetime,
            ShardingType::Hash,
        ] {
            assert_eq!(kind.as_str().parse::<ShardingType>().unwrap(), kind);
        }
        assert!("range".parse::<ShardingType>().is_ok());
        assert!("MODULO".parse::<ShardingType>().is_err());
    }
}
