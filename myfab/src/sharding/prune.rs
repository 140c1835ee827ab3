//! Prune: delete rows that no longer belong on a shard under the
//! current mapping.

use tracing::info;

use crate::pool::ConnectionManager;
use crate::server::{Group, ServerStatus};
use crate::store::Persister;

use super::hash::HashBucket;
use super::mapping::{ShardMapping, ShardTable};
use super::range::{self, ShardRange};
use super::shard::Shard;
use super::{Error, ShardingType};

/// DELETE statement keeping only rows inside `[lower, upper)`.
pub fn range_prune_statement(
    kind: ShardingType,
    table_name: &str,
    column_name: &str,
    lower: &str,
    upper: Option<&str>,
) -> String {
    let (cast_column, cast_bound): (String, fn(&str) -> String) = match kind {
        ShardingType::Range | ShardingType::RangeInteger => (
            format!("CAST({column_name} AS SIGNED)"),
            |bound| format!("CAST('{bound}' AS SIGNED)"),
        ),
        ShardingType::RangeString => (
            format!("CAST({column_name} AS CHAR CHARACTER SET utf8mb4)"),
            |bound| format!("CAST('{bound}' AS CHAR CHARACTER SET utf8mb4)"),
        ),
        ShardingType::RangeDatetime => (
            format!("CAST({column_name} AS DATETIME)"),
            |bound| format!("CAST('{bound}' AS DATETIME)"),
        ),
        ShardingType::Hash => unreachable!("hash mappings prune by digest"),
    };

    match upper {
        Some(upper) => format!(
            "DELETE FROM {table_name} WHERE NOT ({cast_column} >= {lower} AND {cast_column} < {upper})",
            lower = cast_bound(lower),
            upper = cast_bound(upper),
        ),
        None => format!(
            "DELETE FROM {table_name} WHERE {cast_column} < {lower}",
            lower = cast_bound(lower),
        ),
    }
}

/// DELETE statement for a hash bucket. The highest bucket owns the wrap
/// segment below the lowest bound.
pub fn hash_prune_statement(
    table_name: &str,
    column_name: &str,
    lower: &str,
    upper: Option<&str>,
    wrap_below: Option<&str>,
) -> String {
    let digest = format!("MD5({column_name})");
    match (upper, wrap_below) {
        (Some(upper), _) => format!(
            "DELETE FROM {table_name} WHERE NOT ({digest} >= '{lower}' AND {digest} < '{upper}')"
        ),
        (None, Some(wrap)) => format!(
            "DELETE FROM {table_name} WHERE NOT ({digest} >= '{lower}' OR {digest} < '{wrap}')"
        ),
        (None, None) => format!("DELETE FROM {table_name} WHERE 1 = 0"),
    }
}

/// The keep-interval of every shard in a mapping, as prune statements.
pub async fn prune_statements(
    persister: &mut Persister,
    mapping: &ShardMapping,
    table: &ShardTable,
) -> Result<Vec<(u32, String)>, Error> {
    let mut statements = Vec::new();
    match mapping.type_name {
        ShardingType::Hash => {
            let mut buckets = HashBucket::list(persister, mapping.shard_mapping_id).await?;
            buckets.sort_by(|a, b| a.lower_bound.cmp(&b.lower_bound));
            let lowest = buckets.first().map(|bucket| bucket.lower_bound.clone());
            for (index, bucket) in buckets.iter().enumerate() {
                let upper = buckets.get(index + 1).map(|next| next.lower_bound.as_str());
                let wrap = if upper.is_none() { lowest.as_deref() } else { None };
                statements.push((
                    bucket.shard_id,
                    hash_prune_statement(
                        &table.table_name,
                        &table.column_name,
                        &bucket.lower_bound,
                        upper,
                        wrap,
                    ),
                ));
            }
        }
        kind => {
            let rows = ShardRange::list(persister, mapping.shard_mapping_id).await?;
            let ranges = range::typed_ranges(&rows, kind)?;
            for (index, spec) in ranges.iter().enumerate() {
                let upper = ranges.get(index + 1).map(|next| next.raw_bound.as_str());
                statements.push((
                    spec.shard_id,
                    range_prune_statement(
                        kind,
                        &table.table_name,
                        &table.column_name,
                        &spec.raw_bound,
                        upper,
                    ),
                ));
            }
        }
    }
    Ok(statements)
}

/// Run the prune DELETE on every shard's primary.
pub async fn prune_shard(
    persister: &mut Persister,
    pool: &ConnectionManager,
    table_name: &str,
) -> Result<(), Error> {
    let table = ShardTable::require(persister, table_name).await?;
    let mapping = ShardMapping::require(persister, table.shard_mapping_id).await?;
    let statements = prune_statements(persister, &mapping, &table).await?;

    for (shard_id, statement) in statements {
        let shard = Shard::require(persister, shard_id).await?;
        let group = Group::require(persister, &shard.group_id).await?;
        let members = group.servers(persister).await?;
        let primary = members
            .into_iter()
            .find(|server| server.status == ServerStatus::Primary)
            .ok_or_else(|| Error::NoPrimary(group.group_id.clone()))?;

        info!(
            "pruning `{}` on shard ({}) primary ({})",
            table_name, shard_id, primary.uuid
        );
        let mut conn = pool.get(&primary).await.map_err(|err| match err {
            crate::pool::Error::Server(err) => Error::Server(err),
            other => Error::Backup(other.to_string()),
        })?;
        conn.query_drop(&statement).await?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn integer_prune_casts_signed() {
        let stmt = range_prune_statement(
            ShardingType::RangeInteger,
            "db1.t1",
            "userID",
            "101",
            Some("1001"),
        );
        assert_eq!(
            stmt,
            "DELETE FROM db1.t1 WHERE NOT (CAST(userID AS SIGNED) >= \
             CAST('101' AS SIGNED) AND CAST(userID AS SIGNED) < CAST('1001' AS SIGNED))"
        );
    }

    #[test]
    fn unbounded_top_shard_only_prunes_below() {
        let stmt = range_prune_statement(
            ShardingType::RangeInteger,
            "db1.t1",
            "userID",
            "10001",
            None,
        );
        assert!(stmt.contains("< CAST('10001' AS SIGNED)"));
        assert!(!stmt.contains("NOT"));
    }

    #[test]
    fn hash_prune_wraps_for_highest_bucket() {
        let stmt = hash_prune_statement("db2.t3", "CustomerID", "c0", None, Some("40"));
        assert_eq!(
            stmt,
            "DELETE FROM db2.t3 WHERE NOT (MD5(CustomerID) >= 'c0' OR MD5(CustomerID) < '40')"
        );
    }

    #[test]
    fn hash_prune_middle_bucket() {
        let stmt = hash_prune_statement("db2.t3", "CustomerID", "40", Some("80"), None);
        assert!(stmt.contains(">= '40' AND MD5(CustomerID) < '80'"));
    }
}
