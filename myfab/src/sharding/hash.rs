//! HASH shard specs: an MD5 ring.
//!
//! Bucket bounds are 32-digit hex MD5 values. A key hashes to the bucket
//! with the greatest bound at or below its digest; keys below every
//! bound wrap around to the highest bucket.

use mysql_async::Row;

use crate::store::Persister;

use super::Error;

const INSERT_HASH: &str =
    "INSERT INTO shard_hashes (shard_mapping_id, lower_bound, shard_id) VALUES (?, ?, ?)";

const SELECT_HASHES: &str = "SELECT shard_mapping_id, lower_bound, shard_id \
     FROM shard_hashes WHERE shard_mapping_id = ?";

const DELETE_SHARD_HASHES: &str = "DELETE FROM shard_hashes WHERE shard_id = ?";

const UPDATE_HASH_SHARD: &str =
    "UPDATE shard_hashes SET shard_id = ? WHERE shard_mapping_id = ? AND lower_bound = ?";

const SELECT_SHARD_HASH: &str = "SELECT shard_mapping_id, lower_bound, shard_id \
     FROM shard_hashes WHERE shard_id = ?";

#[derive(Debug, Clone, PartialEq)]
pub struct HashBucket {
    pub shard_mapping_id: u32,
    /// 32 lowercase hex digits, matching MySQL's `MD5()` output.
    pub lower_bound: String,
    pub shard_id: u32,
}

impl HashBucket {
    pub async fn add(
        persister: &mut Persister,
        shard_mapping_id: u32,
        lower_bound: &str,
        shard_id: u32,
    ) -> Result<(), Error> {
        persister
            .exec_drop(INSERT_HASH, (shard_mapping_id, lower_bound, shard_id))
            .await?;
        Ok(())
    }

    pub async fn list(
        persister: &mut Persister,
        shard_mapping_id: u32,
    ) -> Result<Vec<HashBucket>, Error> {
        let rows = persister
            .exec_stmt(SELECT_HASHES, (shard_mapping_id,))
            .await?;
        rows.into_iter().map(Self::from_row).collect()
    }

    pub async fn update_shard(
        persister: &mut Persister,
        shard_mapping_id: u32,
        lower_bound: &str,
        shard_id: u32,
    ) -> Result<(), Error> {
        persister
            .exec_drop(
                UPDATE_HASH_SHARD,
                (shard_id, shard_mapping_id, lower_bound),
            )
            .await?;
        Ok(())
    }

    pub async fn remove_shard(persister: &mut Persister, shard_id: u32) -> Result<(), Error> {
        persister
            .exec_drop(DELETE_SHARD_HASHES, (shard_id,))
            .await?;
        Ok(())
    }

    /// The bucket owned by a shard, if the shard belongs to a HASH
    /// mapping.
    pub async fn of_shard(
        persister: &mut Persister,
        shard_id: u32,
    ) -> Result<Option<HashBucket>, Error> {
        persister
            .exec_first(SELECT_SHARD_HASH, (shard_id,))
            .await?
            .map(Self::from_row)
            .transpose()
    }

    fn from_row(row: Row) -> Result<HashBucket, Error> {
        let shard_mapping_id: u32 =
            row.get(0).ok_or(Error::MalformedRow("shard_mapping_id"))?;
        let lower_bound: String = row.get(1).ok_or(Error::MalformedRow("lower_bound"))?;
        let shard_id: u32 = row.get(2).ok_or(Error::MalformedRow("shard_id"))?;
        Ok(HashBucket {
            shard_mapping_id,
            lower_bound,
            shard_id,
        })
    }
}

/// MD5 digest of a key, in the same form MySQL's `MD5()` returns.
pub fn hash_key(key: &str) -> String {
    format!("{:032x}", md5::compute(key.as_bytes()))
}

/// Bounds for `add` new buckets placed evenly on the ring relative to
/// the existing bucket count.
pub fn place_buckets(existing: usize, add: usize) -> Vec<String> {
    let total = (existing + add).max(1) as u128;
    let step = u128::MAX / total;
    (existing..existing + add)
        .map(|index| format!("{:032x}", step.saturating_mul(index as u128)))
        .collect()
}

/// The bucket covering a digest, wrapping around the ring.
pub fn pick_bucket(buckets: &[HashBucket], digest: &str) -> Option<u32> {
    if buckets.is_empty() {
        return None;
    }
    let mut sorted: Vec<&HashBucket> = buckets.iter().collect();
    sorted.sort_by(|a, b| a.lower_bound.cmp(&b.lower_bound));

    sorted
        .iter()
        .rev()
        .find(|bucket| bucket.lower_bound.as_str() <= digest)
        .or_else(|| sorted.last())
        .map(|bucket| bucket.shard_id)
}

#[cfg(test)]
mod test {
    use super::*;

    fn bucket(bound: &str, shard_id: u32) -> HashBucket {
        HashBucket {
            shard_mapping_id: 1,
            lower_bound: bound.into(),
            shard_id,
        }
    }

    #[test]
    fn digest_matches_mysql_md5_format() {
        // Literal from `SELECT MD5('1')`.
        assert_eq!(hash_key("1"), "c4ca4238a0b923820dcc509a6f75849b");
        assert_eq!(hash_key("").len(), 32);
    }

    #[test]
    fn placement_is_even_and_increasing() {
        let bounds = place_buckets(0, 5);
        assert_eq!(bounds.len(), 5);
        assert_eq!(bounds[0], format!("{:032x}", 0u128));
        for pair in bounds.windows(2) {
            assert!(pair[0] < pair[1]);
        }

        // Growing the ring keeps going from the existing count.
        let more = place_buckets(5, 2);
        assert_eq!(more.len(), 2);
        assert!(more[0] > bounds[4]);
    }

    #[test]
    fn ring_wraps_around() {
        let buckets = vec![
            bucket("40000000000000000000000000000000", 1),
            bucket("80000000000000000000000000000000", 2),
            bucket("c0000000000000000000000000000000", 3),
        ];
        // Above the highest bound.
        assert_eq!(
            pick_bucket(&buckets, "f0000000000000000000000000000000"),
            Some(3)
        );
        // Inside an arc.
        assert_eq!(
            pick_bucket(&buckets, "90000000000000000000000000000000"),
            Some(2)
        );
        // Below the lowest bound wraps to the highest bucket.
        assert_eq!(
            pick_bucket(&buckets, "10000000000000000000000000000000"),
            Some(3)
        );
    }

    #[test]
    fn every_bucket_reachable_over_dense_keys() {
        // Five shards, keys 1..=199: every shard gets hit.
        let bounds = place_buckets(0, 5);
        let buckets: Vec<HashBucket> = bounds
            .iter()
            .enumerate()
            .map(|(index, bound)| bucket(bound, index as u32 + 1))
            .collect();

        let mut hit = std::collections::BTreeSet::new();
        for key in 1..200 {
            let digest = hash_key(&key.to_string());
            hit.insert(pick_bucket(&buckets, &digest).unwrap());
        }
        assert_eq!(hit.len(), 5);
    }

    #[test]
    fn empty_ring_has_no_bucket() {
        assert_eq!(pick_bucket(&[], "00"), None);
    }
}
