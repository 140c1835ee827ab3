//! RANGE-family shard specs.
//!
//! Ranges partition the key space by lower bound: the shard covering a
//! key is the one with the greatest `lower_bound <= key` under the
//! mapping's typed comparison. Upper bounds are implicit.

use std::cmp::Ordering;

use mysql_async::Row;

use crate::store::Persister;

use super::key::ShardKey;
use super::{Error, ShardingType};

const INSERT_RANGE: &str =
    "INSERT INTO shard_ranges (shard_mapping_id, lower_bound, shard_id) VALUES (?, ?, ?)";

const SELECT_RANGES: &str = "SELECT shard_mapping_id, lower_bound, shard_id \
     FROM shard_ranges WHERE shard_mapping_id = ?";

const UPDATE_RANGE_SHARD: &str =
    "UPDATE shard_ranges SET shard_id = ? WHERE shard_mapping_id = ? AND lower_bound = ?";

const DELETE_SHARD_RANGES: &str = "DELETE FROM shard_ranges WHERE shard_id = ?";

const SELECT_SHARD_RANGE: &str = "SELECT shard_mapping_id, lower_bound, shard_id \
     FROM shard_ranges WHERE shard_id = ?";

/// One `(mapping, lower_bound, shard)` row.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardRange {
    pub shard_mapping_id: u32,
    pub lower_bound: String,
    pub shard_id: u32,
}

impl ShardRange {
    pub async fn add(
        persister: &mut Persister,
        shard_mapping_id: u32,
        lower_bound: &str,
        shard_id: u32,
    ) -> Result<(), Error> {
        persister
            .exec_drop(INSERT_RANGE, (shard_mapping_id, lower_bound, shard_id))
            .await?;
        Ok(())
    }

    pub async fn list(
        persister: &mut Persister,
        shard_mapping_id: u32,
    ) -> Result<Vec<ShardRange>, Error> {
        let rows = persister
            .exec_stmt(SELECT_RANGES, (shard_mapping_id,))
            .await?;
        rows.into_iter().map(Self::from_row).collect()
    }

    /// Re-point one bound at another shard. The split commit step.
    pub async fn update_shard(
        persister: &mut Persister,
        shard_mapping_id: u32,
        lower_bound: &str,
        shard_id: u32,
    ) -> Result<(), Error> {
        persister
            .exec_drop(
                UPDATE_RANGE_SHARD,
                (shard_id, shard_mapping_id, lower_bound),
            )
            .await?;
        Ok(())
    }

    pub async fn remove_shard(persister: &mut Persister, shard_id: u32) -> Result<(), Error> {
        persister
            .exec_drop(DELETE_SHARD_RANGES, (shard_id,))
            .await?;
        Ok(())
    }

    /// The range row owned by a shard, if the shard belongs to a RANGE
    /// mapping.
    pub async fn of_shard(
        persister: &mut Persister,
        shard_id: u32,
    ) -> Result<Option<ShardRange>, Error> {
        persister
            .exec_first(SELECT_SHARD_RANGE, (shard_id,))
            .await?
            .map(Self::from_row)
            .transpose()
    }

    fn from_row(row: Row) -> Result<ShardRange, Error> {
        let shard_mapping_id: u32 =
            row.get(0).ok_or(Error::MalformedRow("shard_mapping_id"))?;
        let lower_bound: String = row.get(1).ok_or(Error::MalformedRow("lower_bound"))?;
        let shard_id: u32 = row.get(2).ok_or(Error::MalformedRow("shard_id"))?;
        Ok(ShardRange {
            shard_mapping_id,
            lower_bound,
            shard_id,
        })
    }
}

/// A range spec with its bound parsed for comparison.
#[derive(Debug, Clone)]
pub struct TypedRange {
    pub lower_bound: ShardKey,
    pub raw_bound: String,
    pub shard_id: u32,
}

/// Parse and sort a mapping's ranges by lower bound.
pub fn typed_ranges(
    ranges: &[ShardRange],
    kind: ShardingType,
) -> Result<Vec<TypedRange>, Error> {
    let mut typed = ranges
        .iter()
        .map(|range| {
            Ok(TypedRange {
                lower_bound: ShardKey::parse(&range.lower_bound, kind)?,
                raw_bound: range.lower_bound.clone(),
                shard_id: range.shard_id,
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;
    typed.sort_by(|a, b| a.lower_bound.compare(&b.lower_bound));
    Ok(typed)
}

/// The shard covering `key`: greatest lower bound at or below it.
pub fn pick_shard(ranges: &[TypedRange], key: &ShardKey) -> Option<u32> {
    ranges
        .iter()
        .rev()
        .find(|range| range.lower_bound.compare(key) != Ordering::Greater)
        .map(|range| range.shard_id)
}

/// The covered interval of the shard owning `bound`: its own bound and
/// the next range's bound, when one exists.
pub fn bounds_of<'a>(
    ranges: &'a [TypedRange],
    shard_id: u32,
) -> Option<(&'a TypedRange, Option<&'a TypedRange>)> {
    let at = ranges.iter().position(|range| range.shard_id == shard_id)?;
    Some((&ranges[at], ranges.get(at + 1)))
}

/// New bounds must keep the mapping's bounds strictly increasing.
pub fn validate_increasing(
    existing: &[TypedRange],
    candidate: &ShardKey,
    raw: &str,
) -> Result<(), Error> {
    let highest = existing.last();
    match highest {
        Some(range) if range.lower_bound.compare(candidate) != Ordering::Less => {
            Err(Error::BoundsNotIncreasing(raw.into()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ranges(bounds: &[(&str, u32)]) -> Vec<TypedRange> {
        let rows: Vec<ShardRange> = bounds
            .iter()
            .map(|(bound, shard)| ShardRange {
                shard_mapping_id: 1,
                lower_bound: bound.to_string(),
                shard_id: *shard,
            })
            .collect();
        typed_ranges(&rows, ShardingType::RangeInteger).unwrap()
    }

    #[test]
    fn greatest_lower_bound_wins() {
        // Shards at 1, 101, 1001, 10001.
        let ranges = ranges(&[("1", 2), ("101", 3), ("1001", 4), ("10001", 5)]);

        let key = |k: &str| ShardKey::parse(k, ShardingType::RangeInteger).unwrap();
        assert_eq!(pick_shard(&ranges, &key("3")), Some(2));
        assert_eq!(pick_shard(&ranges, &key("301")), Some(3));
        assert_eq!(pick_shard(&ranges, &key("12000")), Some(5));
        assert_eq!(pick_shard(&ranges, &key("101")), Some(3));
        // Below every bound: nothing covers the key.
        assert_eq!(pick_shard(&ranges, &key("0")), None);
    }

    #[test]
    fn integer_bounds_sort_numerically_not_lexically() {
        let ranges = ranges(&[("9", 1), ("10", 2)]);
        let key = |k: &str| ShardKey::parse(k, ShardingType::RangeInteger).unwrap();
        assert_eq!(pick_shard(&ranges, &key("9")), Some(1));
        assert_eq!(pick_shard(&ranges, &key("11")), Some(2));
    }

    #[test]
    fn bounds_must_increase() {
        let existing = ranges(&[("1", 1), ("100", 2)]);
        let key = |k: &str| ShardKey::parse(k, ShardingType::RangeInteger).unwrap();
        assert!(validate_increasing(&existing, &key("100"), "100").is_err());
        assert!(validate_increasing(&existing, &key("50"), "50").is_err());
        assert!(validate_increasing(&existing, &key("200"), "200").is_ok());
        assert!(validate_increasing(&[], &key("1"), "1").is_ok());
    }

    #[test]
    fn shard_interval() {
        let ranges = ranges(&[("1", 2), ("101", 3), ("1001", 4)]);
        let (own, next) = bounds_of(&ranges, 3).unwrap();
        assert_eq!(own.raw_bound, "101");
        assert_eq!(next.unwrap().raw_bound, "1001");

        let (_, next) = bounds_of(&ranges, 4).unwrap();
        assert!(next.is_none());
    }
}
