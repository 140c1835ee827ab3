//! Shard mapping definitions and the tables attached to them.

use mysql_async::Row;

use crate::store::Persister;

use super::{Error, ShardingType};

const INSERT_MAPPING: &str =
    "INSERT INTO shard_maps_defn (type_name, global_group_id) VALUES (?, ?)";

const SELECT_MAPPING: &str = "SELECT shard_mapping_id, type_name, global_group_id \
     FROM shard_maps_defn WHERE shard_mapping_id = ?";

const SELECT_MAPPINGS: &str = "SELECT shard_mapping_id, type_name, global_group_id \
     FROM shard_maps_defn ORDER BY shard_mapping_id";

const DELETE_MAPPING: &str = "DELETE FROM shard_maps_defn WHERE shard_mapping_id = ?";

const LAST_INSERT_ID: &str = "SELECT LAST_INSERT_ID()";

const INSERT_TABLE: &str = "INSERT INTO shard_tables (shard_mapping_id, table_name, \
     column_name, is_anchor) VALUES (?, ?, ?, ?)";

const SELECT_TABLE: &str = "SELECT shard_mapping_id, table_name, column_name, is_anchor \
     FROM shard_tables WHERE table_name = ?";

const SELECT_MAPPING_TABLES: &str = "SELECT shard_mapping_id, table_name, column_name, \
     is_anchor FROM shard_tables WHERE shard_mapping_id = ? ORDER BY table_name";

const COUNT_ANCHOR: &str =
    "SELECT COUNT(*) FROM shard_tables WHERE shard_mapping_id = ? AND is_anchor = 1";

const DELETE_TABLE: &str = "DELETE FROM shard_tables WHERE table_name = ?";

/// `(shard_mapping_id, type, global group)`: the plan for partitioning
/// one or more tables.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardMapping {
    pub shard_mapping_id: u32,
    pub type_name: ShardingType,
    /// Write target for schema and reference data replicated to every
    /// shard group.
    pub global_group_id: String,
}

impl ShardMapping {
    /// Define a mapping, allocating the next mapping id.
    pub async fn define(
        persister: &mut Persister,
        type_name: ShardingType,
        global_group_id: &str,
    ) -> Result<ShardMapping, Error> {
        persister
            .exec_drop(INSERT_MAPPING, (type_name.as_str(), global_group_id))
            .await?;
        let id: u32 = persister
            .exec_first(LAST_INSERT_ID, ())
            .await?
            .and_then(|row| row.get(0))
            .ok_or(Error::MalformedRow("shard_mapping_id"))?;
        Ok(ShardMapping {
            shard_mapping_id: id,
            type_name,
            global_group_id: global_group_id.into(),
        })
    }

    pub async fn fetch(
        persister: &mut Persister,
        shard_mapping_id: u32,
    ) -> Result<Option<ShardMapping>, Error> {
        persister
            .exec_first(SELECT_MAPPING, (shard_mapping_id,))
            .await?
            .map(Self::from_row)
            .transpose()
    }

    pub async fn require(
        persister: &mut Persister,
        shard_mapping_id: u32,
    ) -> Result<ShardMapping, Error> {
        Self::fetch(persister, shard_mapping_id)
            .await?
            .ok_or(Error::MappingNotFound(shard_mapping_id))
    }

    pub async fn list(persister: &mut Persister) -> Result<Vec<ShardMapping>, Error> {
        let rows = persister.exec_stmt(SELECT_MAPPINGS, ()).await?;
        rows.into_iter().map(Self::from_row).collect()
    }

    pub async fn remove(persister: &mut Persister, shard_mapping_id: u32) -> Result<(), Error> {
        persister
            .exec_drop(DELETE_MAPPING, (shard_mapping_id,))
            .await?;
        Ok(())
    }

    fn from_row(row: Row) -> Result<ShardMapping, Error> {
        let shard_mapping_id: u32 =
            row.get(0).ok_or(Error::MalformedRow("shard_mapping_id"))?;
        let type_name: String = row.get(1).ok_or(Error::MalformedRow("type_name"))?;
        let global_group_id: String =
            row.get(2).ok_or(Error::MalformedRow("global_group_id"))?;
        Ok(ShardMapping {
            shard_mapping_id,
            type_name: type_name.parse()?,
            global_group_id,
        })
    }
}

/// A table sharded under a mapping, on one of its columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardTable {
    pub shard_mapping_id: u32,
    /// Qualified `db.table` name.
    pub table_name: String,
    pub column_name: String,
    /// The anchor table drives cross-table referential integrity during
    /// splits; at most one per mapping.
    pub is_anchor: bool,
}

impl ShardTable {
    pub async fn add(
        persister: &mut Persister,
        shard_mapping_id: u32,
        table_name: &str,
        column_name: &str,
        is_anchor: bool,
    ) -> Result<ShardTable, Error> {
        if Self::fetch(persister, table_name).await?.is_some() {
            return Err(Error::TableAlreadySharded(table_name.into()));
        }
        if is_anchor {
            let anchors: Option<i64> = persister
                .exec_first(COUNT_ANCHOR, (shard_mapping_id,))
                .await?
                .and_then(|row| row.get(0));
            if anchors.unwrap_or(0) > 0 {
                return Err(Error::AnchorExists(shard_mapping_id));
            }
        }
        persister
            .exec_drop(
                INSERT_TABLE,
                (
                    shard_mapping_id,
                    table_name,
                    column_name,
                    is_anchor as i64,
                ),
            )
            .await?;
        Ok(ShardTable {
            shard_mapping_id,
            table_name: table_name.into(),
            column_name: column_name.into(),
            is_anchor,
        })
    }

    pub async fn fetch(
        persister: &mut Persister,
        table_name: &str,
    ) -> Result<Option<ShardTable>, Error> {
        persister
            .exec_first(SELECT_TABLE, (table_name,))
            .await?
            .map(Self::from_row)
            .transpose()
    }

    pub async fn require(
        persister: &mut Persister,
        table_name: &str,
    ) -> Result<ShardTable, Error> {
        Self::fetch(persister, table_name)
            .await?
            .ok_or_else(|| Error::TableNotSharded(table_name.into()))
    }

    /// All tables sharded under one mapping; they partition identically.
    pub async fn of_mapping(
        persister: &mut Persister,
        shard_mapping_id: u32,
    ) -> Result<Vec<ShardTable>, Error> {
        let rows = persister
            .exec_stmt(SELECT_MAPPING_TABLES, (shard_mapping_id,))
            .await?;
        rows.into_iter().map(Self::from_row).collect()
    }

    pub async fn remove(persister: &mut Persister, table_name: &str) -> Result<(), Error> {
        persister.exec_drop(DELETE_TABLE, (table_name,)).await?;
        Ok(())
    }

    fn from_row(row: Row) -> Result<ShardTable, Error> {
        let shard_mapping_id: u32 =
            row.get(0).ok_or(Error::MalformedRow("shard_mapping_id"))?;
        let table_name: String = row.get(1).ok_or(Error::MalformedRow("table_name"))?;
        let column_name: String = row.get(2).ok_or(Error::MalformedRow("column_name"))?;
        let is_anchor: i64 = row.get(3).ok_or(Error::MalformedRow("is_anchor"))?;
        Ok(ShardTable {
            shard_mapping_id,
            table_name,
            column_name,
            is_anchor: is_anchor != 0,
        })
    }
}
