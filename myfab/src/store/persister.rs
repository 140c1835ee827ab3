//! Per-worker handle to the state store.

use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, Params, Row};
use tracing::warn;

use super::Error;

/// One handle, one caller. Every job executes inside exactly one
/// transaction opened and closed on its worker's handle.
pub struct Persister {
    backing: Backing,
    in_txn: bool,
}

enum Backing {
    Connected { conn: Conn, opts: Opts },
    Ephemeral,
}

impl Persister {
    pub(super) fn connected(conn: Conn, opts: Opts) -> Self {
        Self {
            backing: Backing::Connected { conn, opts },
            in_txn: false,
        }
    }

    pub(super) fn ephemeral() -> Self {
        Self {
            backing: Backing::Ephemeral,
            in_txn: false,
        }
    }

    pub fn durable(&self) -> bool {
        matches!(self.backing, Backing::Connected { .. })
    }

    pub fn in_transaction(&self) -> bool {
        self.in_txn
    }

    /// Open a transaction. Nested transactions are not supported.
    pub async fn begin(&mut self) -> Result<(), Error> {
        if self.in_txn {
            return Err(Error::NestedTransaction);
        }
        if let Backing::Connected { conn, .. } = &mut self.backing {
            conn.query_drop("START TRANSACTION").await?;
        }
        self.in_txn = true;
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<(), Error> {
        if !self.in_txn {
            return Err(Error::NoTransaction);
        }
        if let Backing::Connected { conn, .. } = &mut self.backing {
            conn.query_drop("COMMIT").await?;
        }
        self.in_txn = false;
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<(), Error> {
        if !self.in_txn {
            return Err(Error::NoTransaction);
        }
        if let Backing::Connected { conn, .. } = &mut self.backing {
            conn.query_drop("ROLLBACK").await?;
        }
        self.in_txn = false;
        Ok(())
    }

    /// Execute a parametrised statement, returning the materialised
    /// result set.
    pub async fn exec_stmt(
        &mut self,
        stmt: &str,
        params: impl Into<Params>,
    ) -> Result<Vec<Row>, Error> {
        let params = params.into();
        let in_txn = self.in_txn;
        match &mut self.backing {
            Backing::Ephemeral => Err(Error::Disconnected),
            Backing::Connected { conn, opts } => {
                match conn.exec(stmt, params.clone()).await {
                    Ok(rows) => Ok(rows),
                    // One reconnect attempt on a dropped connection, but
                    // never inside a transaction: the transaction is gone
                    // with the old connection.
                    Err(err) if is_disconnect(&err) && !in_txn => {
                        warn!("state store connection dropped, reconnecting: {}", err);
                        *conn = Conn::new(opts.clone()).await?;
                        Ok(conn.exec(stmt, params).await?)
                    }
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    /// Execute and stream the result instead of materialising it. For
    /// the handful of dump-style reads that may not fit in memory; no
    /// reconnect attempt is made mid-stream.
    pub async fn exec_iter<'a>(
        &'a mut self,
        stmt: &'a str,
        params: impl Into<Params>,
    ) -> Result<mysql_async::QueryResult<'a, 'static, mysql_async::BinaryProtocol>, Error> {
        match &mut self.backing {
            Backing::Ephemeral => Err(Error::Disconnected),
            Backing::Connected { conn, .. } => Ok(conn.exec_iter(stmt, params).await?),
        }
    }

    /// Execute and return the first row, if any.
    pub async fn exec_first(
        &mut self,
        stmt: &str,
        params: impl Into<Params>,
    ) -> Result<Option<Row>, Error> {
        let mut rows = self.exec_stmt(stmt, params).await?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.swap_remove(0)))
        }
    }

    /// Execute, discarding any result set.
    pub async fn exec_drop(
        &mut self,
        stmt: &str,
        params: impl Into<Params>,
    ) -> Result<(), Error> {
        self.exec_stmt(stmt, params).await.map(|_| ())
    }

    /// Raw text-protocol statement; DDL mostly, which can't always be
    /// prepared.
    pub async fn query_drop(&mut self, stmt: &str) -> Result<(), Error> {
        match &mut self.backing {
            Backing::Ephemeral => Err(Error::Disconnected),
            Backing::Connected { conn, .. } => Ok(conn.query_drop(stmt).await?),
        }
    }
}

fn is_disconnect(err: &mysql_async::Error) -> bool {
    matches!(err, mysql_async::Error::Io(_))
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn ephemeral_transactions_are_noops() {
        let mut persister = Persister::ephemeral();
        assert!(!persister.durable());

        persister.begin().await.unwrap();
        assert!(persister.in_transaction());
        assert!(matches!(persister.begin().await, Err(Error::NestedTransaction)));
        persister.commit().await.unwrap();
        assert!(matches!(persister.commit().await, Err(Error::NoTransaction)));

        persister.begin().await.unwrap();
        persister.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn ephemeral_statements_fail() {
        let mut persister = Persister::ephemeral();
        let result = persister.exec_stmt("SELECT 1", ()).await;
        assert!(matches!(result, Err(Error::Disconnected)));
    }
}
