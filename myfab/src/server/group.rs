//! Groups: replicated sets of servers with at most one primary.

use mysql_async::Row;
use uuid::Uuid;

use crate::store::Persister;

use super::{Error, Server};

const INSERT_GROUP: &str =
    "INSERT INTO groups (group_id, description, master_uuid, active) VALUES (?, ?, NULL, 0)";

const SELECT_GROUP: &str =
    "SELECT group_id, description, master_uuid, active FROM groups WHERE group_id = ?";

const SELECT_GROUPS: &str =
    "SELECT group_id, description, master_uuid, active FROM groups ORDER BY group_id";

const DELETE_GROUP: &str = "DELETE FROM groups WHERE group_id = ?";

const UPDATE_DESCRIPTION: &str = "UPDATE groups SET description = ? WHERE group_id = ?";

const UPDATE_MASTER: &str = "UPDATE groups SET master_uuid = ? WHERE group_id = ?";

const UPDATE_ACTIVE: &str = "UPDATE groups SET active = ? WHERE group_id = ?";

const COUNT_MEMBERS: &str = "SELECT COUNT(*) FROM servers WHERE group_id = ?";

const CONTAINS_SERVER: &str =
    "SELECT COUNT(*) FROM servers WHERE group_id = ? AND server_uuid = ?";

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub group_id: String,
    pub description: Option<String>,
    /// Current primary, when one is appointed. Must name a member with
    /// status PRIMARY and mode READ_WRITE.
    pub master: Option<Uuid>,
    /// Gates failure detection.
    pub active: bool,
}

impl Group {
    pub async fn add(
        persister: &mut Persister,
        group_id: &str,
        description: Option<&str>,
    ) -> Result<Group, Error> {
        if Self::fetch(persister, group_id).await?.is_some() {
            return Err(Error::GroupExists(group_id.into()));
        }
        persister
            .exec_drop(INSERT_GROUP, (group_id, description))
            .await?;
        Ok(Group {
            group_id: group_id.into(),
            description: description.map(Into::into),
            master: None,
            active: false,
        })
    }

    pub async fn fetch(persister: &mut Persister, group_id: &str) -> Result<Option<Group>, Error> {
        persister
            .exec_first(SELECT_GROUP, (group_id,))
            .await?
            .map(Self::from_row)
            .transpose()
    }

    /// Like [`Group::fetch`] but an absent group is an error.
    pub async fn require(persister: &mut Persister, group_id: &str) -> Result<Group, Error> {
        Self::fetch(persister, group_id)
            .await?
            .ok_or_else(|| Error::GroupNotFound(group_id.into()))
    }

    pub async fn groups(persister: &mut Persister) -> Result<Vec<Group>, Error> {
        let rows = persister.exec_stmt(SELECT_GROUPS, ()).await?;
        rows.into_iter().map(Self::from_row).collect()
    }

    /// Delete the group. Refused while it still has members.
    pub async fn remove(persister: &mut Persister, group_id: &str) -> Result<(), Error> {
        let members: Option<i64> = persister
            .exec_first(COUNT_MEMBERS, (group_id,))
            .await?
            .and_then(|row| row.get(0));
        if members.unwrap_or(0) > 0 {
            return Err(Error::GroupNotEmpty(group_id.into()));
        }
        persister.exec_drop(DELETE_GROUP, (group_id,)).await?;
        Ok(())
    }

    pub async fn update_description(
        persister: &mut Persister,
        group_id: &str,
        description: Option<&str>,
    ) -> Result<(), Error> {
        persister
            .exec_drop(UPDATE_DESCRIPTION, (description, group_id))
            .await?;
        Ok(())
    }

    pub async fn set_master(
        persister: &mut Persister,
        group_id: &str,
        master: Option<Uuid>,
    ) -> Result<(), Error> {
        persister
            .exec_drop(UPDATE_MASTER, (master.map(|uuid| uuid.to_string()), group_id))
            .await?;
        Ok(())
    }

    pub async fn set_active(
        persister: &mut Persister,
        group_id: &str,
        active: bool,
    ) -> Result<(), Error> {
        persister
            .exec_drop(UPDATE_ACTIVE, (active as i64, group_id))
            .await?;
        Ok(())
    }

    pub async fn contains_server(
        persister: &mut Persister,
        group_id: &str,
        uuid: Uuid,
    ) -> Result<bool, Error> {
        let count: Option<i64> = persister
            .exec_first(CONTAINS_SERVER, (group_id, uuid.to_string()))
            .await?
            .and_then(|row| row.get(0));
        Ok(count.unwrap_or(0) > 0)
    }

    pub async fn servers(&self, persister: &mut Persister) -> Result<Vec<Server>, Error> {
        Server::in_group(persister, &self.group_id).await
    }

    fn from_row(row: Row) -> Result<Group, Error> {
        let group_id: String = row.get(0).ok_or(Error::MalformedRow("group_id"))?;
        let description: Option<String> = row.get(1).unwrap_or(None);
        let master: Option<String> = row.get(2).unwrap_or(None);
        let active: i64 = row.get(3).ok_or(Error::MalformedRow("active"))?;

        let master = master
            .map(|value| Uuid::parse_str(&value).map_err(|_| Error::MalformedRow("master_uuid")))
            .transpose()?;

        Ok(Group {
            group_id,
            description,
            master,
            active: active != 0,
        })
    }
}
