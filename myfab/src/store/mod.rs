//! Durable state store. Everything the daemon must remember across a
//! restart lives in a `fabric` schema on a MySQL server.

pub mod error;
pub mod persister;
pub mod schema;

pub use error::Error;
pub use persister::Persister;

use std::time::Duration;

use mysql_async::{Conn, Opts, OptsBuilder};
use tokio::time::sleep;
use tracing::{info, warn};

use myfab_config::Storage;

/// Factory for state-store handles. One [`Persister`] is created per
/// executor worker; the factory itself is cheap to clone.
#[derive(Clone)]
pub struct StateStore {
    kind: Kind,
}

#[derive(Clone)]
enum Kind {
    MySql {
        opts: Opts,
        server_opts: Opts,
        database: String,
        connect_attempts: u32,
        connect_delay: Duration,
    },
    Ephemeral,
}

impl StateStore {
    pub fn from_config(storage: &Storage) -> Result<Self, Error> {
        let (host, port) = storage
            .host_and_port()
            .map_err(|err| Error::Schema(err.to_string()))?;

        let base = OptsBuilder::default()
            .ip_or_hostname(host)
            .tcp_port(port)
            .user(Some(storage.user.clone()))
            .pass(Some(storage.password.clone()));

        // Schema management connects without a default database since the
        // `fabric` schema may not exist yet.
        let server_opts = Opts::from(base.clone());
        let opts = Opts::from(base.db_name(Some(storage.database.clone())));

        Ok(Self {
            kind: Kind::MySql {
                opts,
                server_opts,
                database: storage.database.clone(),
                connect_attempts: storage.connect_attempts,
                connect_delay: storage.connect_delay_duration(),
            },
        })
    }

    /// A store with no backing server. Transactions are no-ops and
    /// statements fail; checkpointing is disabled on top of it.
    pub fn ephemeral() -> Self {
        Self {
            kind: Kind::Ephemeral,
        }
    }

    /// Whether checkpoints written through this store survive a restart.
    pub fn durable(&self) -> bool {
        matches!(self.kind, Kind::MySql { .. })
    }

    /// Open a new handle.
    pub async fn connect(&self) -> Result<Persister, Error> {
        match &self.kind {
            Kind::Ephemeral => Ok(Persister::ephemeral()),
            Kind::MySql { opts, .. } => {
                let conn = Conn::new(opts.clone()).await?;
                Ok(Persister::connected(conn, opts.clone()))
            }
        }
    }

    /// Open a handle, retrying per the `[storage]` attempt settings.
    /// Used at startup only; a dead state store there is fatal.
    pub async fn connect_with_retry(&self) -> Result<Persister, Error> {
        let Kind::MySql {
            connect_attempts,
            connect_delay,
            ..
        } = &self.kind
        else {
            return self.connect().await;
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.connect().await {
                Ok(persister) => return Ok(persister),
                Err(err) if attempt < *connect_attempts => {
                    warn!(
                        "state store connection attempt {}/{} failed: {}",
                        attempt, connect_attempts, err
                    );
                    sleep(*connect_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Create the schema and all state tables.
    pub async fn setup(&self) -> Result<(), Error> {
        let Kind::MySql {
            server_opts,
            database,
            ..
        } = &self.kind
        else {
            return Ok(());
        };

        let conn = Conn::new(server_opts.clone()).await?;
        let mut persister = Persister::connected(conn, server_opts.clone());

        persister
            .query_drop(&format!("CREATE DATABASE IF NOT EXISTS `{}`", database))
            .await?;
        persister.query_drop(&format!("USE `{}`", database)).await?;

        for ddl in schema::TABLES {
            persister.query_drop(ddl).await?;
        }

        info!("state store schema `{}` is ready", database);
        Ok(())
    }

    /// Drop the schema and everything in it.
    pub async fn teardown(&self) -> Result<(), Error> {
        let Kind::MySql {
            server_opts,
            database,
            ..
        } = &self.kind
        else {
            return Ok(());
        };

        let conn = Conn::new(server_opts.clone()).await?;
        let mut persister = Persister::connected(conn, server_opts.clone());
        persister
            .query_drop(&format!("DROP DATABASE IF EXISTS `{}`", database))
            .await?;

        info!("state store schema `{}` dropped", database);
        Ok(())
    }
}
