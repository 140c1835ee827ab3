//! Shards: horizontal partitions, each assigned to one group.

use std::fmt;
use std::str::FromStr;

use mysql_async::Row;

use crate::store::Persister;

use super::Error;

const INSERT_SHARD: &str = "INSERT INTO shards (group_id, state) VALUES (?, ?)";

const SELECT_SHARD: &str = "SELECT shard_id, group_id, state FROM shards WHERE shard_id = ?";

const UPDATE_STATE: &str = "UPDATE shards SET state = ? WHERE shard_id = ?";

const UPDATE_GROUP: &str = "UPDATE shards SET group_id = ? WHERE shard_id = ?";

const DELETE_SHARD: &str = "DELETE FROM shards WHERE shard_id = ?";

const LAST_INSERT_ID: &str = "SELECT LAST_INSERT_ID()";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ShardState {
    Enabled,
    Disabled,
}

impl ShardState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardState::Enabled => "ENABLED",
            ShardState::Disabled => "DISABLED",
        }
    }
}

impl FromStr for ShardState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ENABLED" => Ok(ShardState::Enabled),
            "DISABLED" => Ok(ShardState::Disabled),
            _ => Err(Error::MalformedRow("state")),
        }
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shard {
    pub shard_id: u32,
    /// The group holding the actual rows.
    pub group_id: String,
    pub state: ShardState,
}

impl Shard {
    pub async fn add(
        persister: &mut Persister,
        group_id: &str,
        state: ShardState,
    ) -> Result<Shard, Error> {
        persister
            .exec_drop(INSERT_SHARD, (group_id, state.as_str()))
            .await?;
        let shard_id: u32 = persister
            .exec_first(LAST_INSERT_ID, ())
            .await?
            .and_then(|row| row.get(0))
            .ok_or(Error::MalformedRow("shard_id"))?;
        Ok(Shard {
            shard_id,
            group_id: group_id.into(),
            state,
        })
    }

    pub async fn fetch(persister: &mut Persister, shard_id: u32) -> Result<Option<Shard>, Error> {
        persister
            .exec_first(SELECT_SHARD, (shard_id,))
            .await?
            .map(Self::from_row)
            .transpose()
    }

    pub async fn require(persister: &mut Persister, shard_id: u32) -> Result<Shard, Error> {
        Self::fetch(persister, shard_id)
            .await?
            .ok_or(Error::ShardNotFound(shard_id))
    }

    pub async fn update_state(
        persister: &mut Persister,
        shard_id: u32,
        state: ShardState,
    ) -> Result<(), Error> {
        persister
            .exec_drop(UPDATE_STATE, (state.as_str(), shard_id))
            .await?;
        Ok(())
    }

    /// Move the shard to another group; the data move is the caller's
    /// problem.
    pub async fn update_group(
        persister: &mut Persister,
        shard_id: u32,
        group_id: &str,
    ) -> Result<(), Error> {
        persister
            .exec_drop(UPDATE_GROUP, (group_id, shard_id))
            .await?;
        Ok(())
    }

    pub async fn remove(persister: &mut Persister, shard_id: u32) -> Result<(), Error> {
        persister.exec_drop(DELETE_SHARD, (shard_id,)).await?;
        Ok(())
    }

    fn from_row(row: Row) -> Result<Shard, Error> {
        let shard_id: u32 = row.get(0).ok_or(Error::MalformedRow("shard_id"))?;
        let group_id: String = row.get(1).ok_or(Error::MalformedRow("group_id"))?;
        let state: String = row.get(2).ok_or(Error::MalformedRow("state"))?;
        Ok(Shard {
            shard_id,
            group_id,
            state: state.parse()?,
        })
    }
}
