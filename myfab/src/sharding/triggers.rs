//! Range-check triggers.
//!
//! Each shard's primary carries BEFORE INSERT / BEFORE UPDATE triggers
//! that reject rows whose sharding column falls outside the shard's key
//! interval with SQLSTATE 22003. The bounds live in a small metadata
//! schema (`myfab_meta`) on the shard server itself so the trigger body
//! needs no round trip to the daemon.

use crate::server::ServerConnection;

use super::{Error, ShardingType};

const TRIGGER_PREFIX_INSERT: &str = "myfab_chk_insert_";
const TRIGGER_PREFIX_UPDATE: &str = "myfab_chk_update_";

const META_SCHEMA: &str = "CREATE DATABASE IF NOT EXISTS myfab_meta";

const META_TABLE: &str = "CREATE TABLE IF NOT EXISTS myfab_meta.shard_range (
    lower_bound VARCHAR(64) NOT NULL,
    upper_bound VARCHAR(64) NULL
)";

/// Deterministic trigger names so reinstallation can find them.
pub fn insert_trigger_name(table_name: &str) -> String {
    format!("{}{}", TRIGGER_PREFIX_INSERT, unqualified(table_name))
}

pub fn update_trigger_name(table_name: &str) -> String {
    format!("{}{}", TRIGGER_PREFIX_UPDATE, unqualified(table_name))
}

fn unqualified(table_name: &str) -> &str {
    table_name
        .rsplit_once('.')
        .map(|(_, table)| table)
        .unwrap_or(table_name)
}

/// The boundary predicate per sharding type. A NULL upper bound
/// (unbounded highest shard) makes the upper comparison NULL, which
/// never signals.
fn boundary_check(kind: ShardingType, column: &str) -> String {
    match kind {
        ShardingType::Range | ShardingType::RangeInteger => format!(
            "CAST(NEW.{column} AS SIGNED) >= CAST(ub AS SIGNED) \
             OR CAST(NEW.{column} AS SIGNED) < CAST(lb AS SIGNED)"
        ),
        ShardingType::RangeString => format!(
            "CAST(NEW.{column} AS CHAR CHARACTER SET utf8mb4) \
             >= CAST(ub AS CHAR CHARACTER SET utf8mb4) \
             OR CAST(NEW.{column} AS CHAR CHARACTER SET utf8mb4) \
             < CAST(lb AS CHAR CHARACTER SET utf8mb4)"
        ),
        ShardingType::RangeDatetime => format!(
            "CAST(NEW.{column} AS DATETIME) >= CAST(ub AS DATETIME) \
             OR CAST(NEW.{column} AS DATETIME) < CAST(lb AS DATETIME)"
        ),
        ShardingType::Hash => format!(
            "MD5(NEW.{column}) >= ub OR MD5(NEW.{column}) < lb"
        ),
    }
}

/// Trigger body for one operation (`INSERT` or `UPDATE`).
pub fn trigger_ddl(
    kind: ShardingType,
    operation: &str,
    trigger_name: &str,
    table_name: &str,
    column_name: &str,
) -> String {
    format!(
        "CREATE TRIGGER {trigger_name} BEFORE {operation} ON {table_name} \
         FOR EACH ROW BEGIN \
         DECLARE lb VARCHAR(64); \
         DECLARE ub VARCHAR(64); \
         SELECT lower_bound INTO lb FROM myfab_meta.shard_range; \
         SELECT upper_bound INTO ub FROM myfab_meta.shard_range; \
         IF {check} THEN \
         SIGNAL SQLSTATE '22003' SET MESSAGE_TEXT = 'Sharding key out of range'; \
         END IF; \
         END",
        check = boundary_check(kind, column_name),
    )
}

/// Write the shard's bounds and (re)install both triggers on its
/// primary.
pub async fn install(
    conn: &mut ServerConnection,
    kind: ShardingType,
    table_name: &str,
    column_name: &str,
    lower_bound: &str,
    upper_bound: Option<&str>,
) -> Result<(), Error> {
    conn.query_drop(META_SCHEMA).await?;
    conn.query_drop(META_TABLE).await?;
    conn.query_drop("DELETE FROM myfab_meta.shard_range").await?;
    conn.exec_drop(
        "INSERT INTO myfab_meta.shard_range (lower_bound, upper_bound) VALUES (?, ?)",
        (lower_bound, upper_bound),
    )
    .await?;

    drop_triggers(conn, table_name).await?;
    conn.query_drop(&trigger_ddl(
        kind,
        "INSERT",
        &insert_trigger_name(table_name),
        table_name,
        column_name,
    ))
    .await?;
    conn.query_drop(&trigger_ddl(
        kind,
        "UPDATE",
        &update_trigger_name(table_name),
        table_name,
        column_name,
    ))
    .await?;
    Ok(())
}

pub async fn drop_triggers(
    conn: &mut ServerConnection,
    table_name: &str,
) -> Result<(), Error> {
    conn.query_drop(&format!(
        "DROP TRIGGER IF EXISTS {}",
        insert_trigger_name(table_name)
    ))
    .await?;
    conn.query_drop(&format!(
        "DROP TRIGGER IF EXISTS {}",
        update_trigger_name(table_name)
    ))
    .await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn names_are_deterministic() {
        assert_eq!(insert_trigger_name("db1.t1"), "myfab_chk_insert_t1");
        assert_eq!(update_trigger_name("db1.t1"), "myfab_chk_update_t1");
        assert_eq!(insert_trigger_name("bare"), "myfab_chk_insert_bare");
    }

    #[test]
    fn integer_trigger_signals_22003() {
        let ddl = trigger_ddl(
            ShardingType::RangeInteger,
            "INSERT",
            "myfab_chk_insert_t1",
            "db1.t1",
            "userID",
        );
        assert!(ddl.contains("BEFORE INSERT ON db1.t1"));
        assert!(ddl.contains("SIGNAL SQLSTATE '22003'"));
        assert!(ddl.contains("CAST(NEW.userID AS SIGNED)"));
    }

    #[test]
    fn hash_trigger_compares_md5() {
        let ddl = trigger_ddl(
            ShardingType::Hash,
            "UPDATE",
            "myfab_chk_update_t3",
            "db2.t3",
            "CustomerID",
        );
        assert!(ddl.contains("MD5(NEW.CustomerID)"));
    }
}
