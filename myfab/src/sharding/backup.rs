//! Snapshot/restore seam for shard moves.
//!
//! Only the success/failure contract matters to the core; the default
//! implementation shells out to `mysqldump` and the `mysql` client.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use crate::server::Server;

use super::Error;

/// A finished snapshot, addressable for restore.
#[derive(Debug, Clone)]
pub struct BackupImage {
    pub path: PathBuf,
}

#[async_trait]
pub trait Snapshotter: Send + Sync {
    async fn backup(&self, server: &Server) -> Result<BackupImage, Error>;
    async fn restore(&self, server: &Server, image: &BackupImage) -> Result<(), Error>;
}

/// mysqldump-based snapshots.
pub struct MysqldumpSnapshotter {
    directory: PathBuf,
    mysqldump: PathBuf,
    mysqlclient: PathBuf,
}

impl MysqldumpSnapshotter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            mysqldump: "mysqldump".into(),
            mysqlclient: "mysql".into(),
        }
    }

    pub fn with_tools(
        mut self,
        mysqldump: impl Into<PathBuf>,
        mysqlclient: impl Into<PathBuf>,
    ) -> Self {
        self.mysqldump = mysqldump.into();
        self.mysqlclient = mysqlclient.into();
        self
    }

    fn split_address(server: &Server) -> Result<(String, String), Error> {
        server
            .address
            .rsplit_once(':')
            .map(|(host, port)| (host.to_string(), port.to_string()))
            .ok_or_else(|| Error::Backup(format!("malformed address `{}`", server.address)))
    }
}

#[async_trait]
impl Snapshotter for MysqldumpSnapshotter {
    async fn backup(&self, server: &Server) -> Result<BackupImage, Error> {
        let (host, port) = Self::split_address(server)?;
        let path = self.directory.join(format!("{}-{}.sql", server.uuid, Uuid::new_v4()));

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|err| Error::Backup(err.to_string()))?;

        let output = Command::new(&self.mysqldump)
            .arg(format!("--host={}", host))
            .arg(format!("--port={}", port))
            .arg(format!("--user={}", server.user))
            .arg(format!("--password={}", server.password))
            .arg("--all-databases")
            .arg("--single-transaction")
            .arg(format!("--result-file={}", path.display()))
            .output()
            .await
            .map_err(|err| Error::Backup(err.to_string()))?;

        if !output.status.success() {
            return Err(Error::Backup(String::from_utf8_lossy(&output.stderr).into()));
        }
        Ok(BackupImage { path })
    }

    async fn restore(&self, server: &Server, image: &BackupImage) -> Result<(), Error> {
        let (host, port) = Self::split_address(server)?;

        let dump = std::fs::File::open(&image.path)
            .map_err(|err| Error::Backup(err.to_string()))?;

        let output = Command::new(&self.mysqlclient)
            .arg(format!("--host={}", host))
            .arg(format!("--port={}", port))
            .arg(format!("--user={}", server.user))
            .arg(format!("--password={}", server.password))
            .stdin(std::process::Stdio::from(dump))
            .output()
            .await
            .map_err(|err| Error::Backup(err.to_string()))?;

        if !output.status.success() {
            return Err(Error::Backup(String::from_utf8_lossy(&output.stderr).into()));
        }
        Ok(())
    }
}

/// Snapshotter that does nothing. For contexts without backup tooling
/// and for tests.
pub struct NullSnapshotter;

#[async_trait]
impl Snapshotter for NullSnapshotter {
    async fn backup(&self, _server: &Server) -> Result<BackupImage, Error> {
        Ok(BackupImage {
            path: PathBuf::new(),
        })
    }

    async fn restore(&self, _server: &Server, _image: &BackupImage) -> Result<(), Error> {
        Ok(())
    }
}
