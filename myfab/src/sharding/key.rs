//! Typed sharding keys. Range bounds are stored as strings in the state
//! store; comparison happens on the parsed form so `"9" < "10"` holds
//! for integer mappings.

use std::cmp::Ordering;

use chrono::NaiveDateTime;

use super::{Error, ShardingType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardKey {
    Int(i64),
    Str(String),
    Datetime(NaiveDateTime),
}

impl ShardKey {
    /// Parse a key or bound under a mapping's type.
    pub fn parse(text: &str, kind: ShardingType) -> Result<Self, Error> {
        match kind {
            ShardingType::Range | ShardingType::RangeInteger => text
                .trim()
                .parse::<i64>()
                .map(ShardKey::Int)
                .map_err(|_| Error::BadKey {
                    key: text.into(),
                    kind: "integer",
                }),
            ShardingType::RangeString => Ok(ShardKey::Str(text.into())),
            ShardingType::RangeDatetime => {
                NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S")
                    .map(ShardKey::Datetime)
                    .map_err(|_| Error::BadKey {
                        key: text.into(),
                        kind: "datetime",
                    })
            }
            // Hash mappings compare MD5 digests, not typed keys.
            ShardingType::Hash => Ok(ShardKey::Str(text.into())),
        }
    }

    pub fn compare(&self, other: &ShardKey) -> Ordering {
        match (self, other) {
            (ShardKey::Int(a), ShardKey::Int(b)) => a.cmp(b),
            (ShardKey::Str(a), ShardKey::Str(b)) => a.cmp(b),
            (ShardKey::Datetime(a), ShardKey::Datetime(b)) => a.cmp(b),
            // Mixed comparisons cannot happen within one mapping; order
            // arbitrarily but deterministically.
            _ => self.discriminant().cmp(&other.discriminant()),
        }
    }

    fn discriminant(&self) -> u8 {
        match self {
            ShardKey::Int(_) => 0,
            ShardKey::Str(_) => 1,
            ShardKey::Datetime(_) => 2,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn integer_keys_compare_numerically() {
        let nine = ShardKey::parse("9", ShardingType::RangeInteger).unwrap();
        let ten = ShardKey::parse("10", ShardingType::RangeInteger).unwrap();
        assert_eq!(nine.compare(&ten), Ordering::Less);
    }

    #[test]
    fn string_keys_compare_lexically() {
        let a = ShardKey::parse("apple", ShardingType::RangeString).unwrap();
        let b = ShardKey::parse("banana", ShardingType::RangeString).unwrap();
        assert_eq!(a.compare(&b), Ordering::Less);
    }

    #[test]
    fn datetime_keys() {
        let early =
            ShardKey::parse("2024-01-01 00:00:00", ShardingType::RangeDatetime).unwrap();
        let late =
            ShardKey::parse("2024-06-15 12:30:00", ShardingType::RangeDatetime).unwrap();
        assert_eq!(early.compare(&late), Ordering::Less);
        assert!(ShardKey::parse("not a date", ShardingType::RangeDatetime).is_err());
    }

    #[test]
    fn bad_integer_rejected() {
        assert!(ShardKey::parse("12abc", ShardingType::RangeInteger).is_err());
    }
}
