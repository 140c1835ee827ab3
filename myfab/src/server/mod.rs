//! Managed servers and groups: the entities the daemon exists to steer.

pub mod connection;
pub mod error;
pub mod error_log;
pub mod group;

pub use connection::ServerConnection;
pub use error::Error;
pub use error_log::{ErrorLog, ErrorWindow};
pub use group::Group;

use std::fmt;
use std::str::FromStr;

use mysql_async::Row;
use uuid::Uuid;

use crate::store::Persister;

/// Whether the server accepts writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ServerMode {
    Offline,
    ReadOnly,
    ReadWrite,
}

impl ServerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerMode::Offline => "OFFLINE",
            ServerMode::ReadOnly => "READ_ONLY",
            ServerMode::ReadWrite => "READ_WRITE",
        }
    }
}

impl FromStr for ServerMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OFFLINE" => Ok(ServerMode::Offline),
            "READ_ONLY" => Ok(ServerMode::ReadOnly),
            "READ_WRITE" => Ok(ServerMode::ReadWrite),
            _ => Err(Error::MalformedRow("mode")),
        }
    }
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The server's role within its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ServerStatus {
    Primary,
    Secondary,
    Spare,
    Faulty,
    Configuring,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Primary => "PRIMARY",
            ServerStatus::Secondary => "SECONDARY",
            ServerStatus::Spare => "SPARE",
            ServerStatus::Faulty => "FAULTY",
            ServerStatus::Configuring => "CONFIGURING",
        }
    }
}

impl FromStr for ServerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRIMARY" => Ok(ServerStatus::Primary),
            "SECONDARY" => Ok(ServerStatus::Secondary),
            "SPARE" => Ok(ServerStatus::Spare),
            "FAULTY" => Ok(ServerStatus::Faulty),
            "CONFIGURING" => Ok(ServerStatus::Configuring),
            _ => Err(Error::MalformedRow("status")),
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Privileges the configured user must hold globally before a server is
/// allowed into a group.
pub const REQUIRED_PRIVILEGES: &[&str] = &[
    "REPLICATION SLAVE",
    "REPLICATION CLIENT",
    "SUPER",
    "SHOW DATABASES",
    "RELOAD",
];

const INSERT_SERVER: &str = "INSERT INTO servers (server_uuid, group_id, address, user, \
     password, mode, status, weight) VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

const SELECT_SERVER: &str = "SELECT server_uuid, group_id, address, user, password, mode, \
     status, weight FROM servers WHERE server_uuid = ?";

const SELECT_GROUP_SERVERS: &str = "SELECT server_uuid, group_id, address, user, password, \
     mode, status, weight FROM servers WHERE group_id = ? ORDER BY server_uuid";

const DELETE_SERVER: &str = "DELETE FROM servers WHERE server_uuid = ?";

const UPDATE_SERVER_MODE: &str = "UPDATE servers SET mode = ? WHERE server_uuid = ?";

const UPDATE_SERVER_STATUS: &str = "UPDATE servers SET status = ? WHERE server_uuid = ?";

const UPDATE_SERVER_ROLE: &str =
    "UPDATE servers SET mode = ?, status = ? WHERE server_uuid = ?";

const UPDATE_SERVER_WEIGHT: &str = "UPDATE servers SET weight = ? WHERE server_uuid = ?";

/// A managed MySQL instance. Identity is the instance's own
/// `server_uuid`; discovering it is a prerequisite to adding the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub uuid: Uuid,
    pub group_id: Option<String>,
    pub address: String,
    pub user: String,
    pub password: String,
    pub mode: ServerMode,
    pub status: ServerStatus,
    pub weight: f64,
}

impl Server {
    pub fn new(uuid: Uuid, address: &str, user: &str, password: &str) -> Self {
        Self {
            uuid,
            group_id: None,
            address: address.into(),
            user: user.into(),
            password: password.into(),
            mode: ServerMode::Offline,
            status: ServerStatus::Spare,
            weight: 1.0,
        }
    }

    /// Ask the instance at `address` for its `server_uuid`.
    pub async fn discover_uuid(
        address: &str,
        user: &str,
        password: &str,
    ) -> Result<Uuid, Error> {
        let mut connection = ServerConnection::connect(address, user, password).await?;
        let uuid = connection.server_uuid().await?;
        connection.disconnect().await;
        Ok(uuid)
    }

    pub async fn add(persister: &mut Persister, server: &Server) -> Result<(), Error> {
        persister
            .exec_drop(
                INSERT_SERVER,
                (
                    server.uuid.to_string(),
                    server.group_id.clone(),
                    server.address.clone(),
                    server.user.clone(),
                    server.password.clone(),
                    server.mode.as_str(),
                    server.status.as_str(),
                    server.weight,
                ),
            )
            .await?;
        Ok(())
    }

    pub async fn fetch(persister: &mut Persister, uuid: Uuid) -> Result<Option<Server>, Error> {
        persister
            .exec_first(SELECT_SERVER, (uuid.to_string(),))
            .await?
            .map(Self::from_row)
            .transpose()
    }

    pub async fn remove(persister: &mut Persister, uuid: Uuid) -> Result<(), Error> {
        persister
            .exec_drop(DELETE_SERVER, (uuid.to_string(),))
            .await?;
        Ok(())
    }

    pub async fn update_mode(
        persister: &mut Persister,
        uuid: Uuid,
        mode: ServerMode,
    ) -> Result<(), Error> {
        persister
            .exec_drop(UPDATE_SERVER_MODE, (mode.as_str(), uuid.to_string()))
            .await?;
        Ok(())
    }

    pub async fn update_status(
        persister: &mut Persister,
        uuid: Uuid,
        status: ServerStatus,
    ) -> Result<(), Error> {
        persister
            .exec_drop(UPDATE_SERVER_STATUS, (status.as_str(), uuid.to_string()))
            .await?;
        Ok(())
    }

    /// Mode and status together; role changes always touch both.
    pub async fn update_role(
        persister: &mut Persister,
        uuid: Uuid,
        mode: ServerMode,
        status: ServerStatus,
    ) -> Result<(), Error> {
        persister
            .exec_drop(
                UPDATE_SERVER_ROLE,
                (mode.as_str(), status.as_str(), uuid.to_string()),
            )
            .await?;
        Ok(())
    }

    pub async fn update_weight(
        persister: &mut Persister,
        uuid: Uuid,
        weight: f64,
    ) -> Result<(), Error> {
        persister
            .exec_drop(UPDATE_SERVER_WEIGHT, (weight, uuid.to_string()))
            .await?;
        Ok(())
    }

    /// All members of a group.
    pub async fn in_group(persister: &mut Persister, group_id: &str) -> Result<Vec<Server>, Error> {
        let rows = persister
            .exec_stmt(SELECT_GROUP_SERVERS, (group_id,))
            .await?;
        rows.into_iter().map(Self::from_row).collect()
    }

    fn from_row(row: Row) -> Result<Server, Error> {
        let uuid: String = row.get(0).ok_or(Error::MalformedRow("server_uuid"))?;
        let group_id: Option<String> = row.get(1).unwrap_or(None);
        let address: String = row.get(2).ok_or(Error::MalformedRow("address"))?;
        let user: String = row.get(3).ok_or(Error::MalformedRow("user"))?;
        let password: String = row.get(4).ok_or(Error::MalformedRow("password"))?;
        let mode: String = row.get(5).ok_or(Error::MalformedRow("mode"))?;
        let status: String = row.get(6).ok_or(Error::MalformedRow("status"))?;
        let weight: f64 = row.get(7).ok_or(Error::MalformedRow("weight"))?;

        Ok(Server {
            uuid: Uuid::parse_str(&uuid).map_err(|_| Error::MalformedRow("server_uuid"))?,
            group_id,
            address,
            user,
            password,
            mode: mode.parse()?,
            status: status.parse()?,
            weight,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mode_and_status_round_trip() {
        for mode in [ServerMode::Offline, ServerMode::ReadOnly, ServerMode::ReadWrite] {
            assert_eq!(mode.as_str().parse::<ServerMode>().unwrap(), mode);
        }
        for status in [
            ServerStatus::Primary,
            ServerStatus::Secondary,
            ServerStatus::Spare,
            ServerStatus::Faulty,
            ServerStatus::Configuring,
        ] {
            assert_eq!(status.as_str().parse::<ServerStatus>().unwrap(), status);
        }
        assert!("BOGUS".parse::<ServerStatus>().is_err());
    }

    #[test]
    fn new_server_defaults() {
        let server = Server::new(Uuid::new_v4(), "db1:3306", "fabric", "secret");
        assert_eq!(server.mode, ServerMode::Offline);
        assert_eq!(server.status, ServerStatus::Spare);
        assert_eq!(server.weight, 1.0);
        assert!(server.group_id.is_none());
    }
}
