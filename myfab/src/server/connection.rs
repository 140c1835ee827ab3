//! A live connection to a managed MySQL server.

use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Row};
use uuid::Uuid;

use super::Error;

/// Connected, authenticated handle. Most callers get one through the
/// connection pool rather than building it directly.
pub struct ServerConnection {
    conn: Conn,
    address: String,
    user: String,
    connection_id: u32,
}

impl ServerConnection {
    pub async fn connect(address: &str, user: &str, password: &str) -> Result<Self, Error> {
        let (host, port) = address
            .rsplit_once(':')
            .and_then(|(host, port)| Some((host, port.parse::<u16>().ok()?)))
            .ok_or_else(|| Error::Address(address.into()))?;

        let opts = Opts::from(
            OptsBuilder::default()
                .ip_or_hostname(host)
                .tcp_port(port)
                .user(Some(user))
                .pass(Some(password)),
        );

        let conn = Conn::new(opts).await?;
        let connection_id = conn.id();
        Ok(Self {
            conn,
            address: address.into(),
            user: user.into(),
            connection_id,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// The user this handle authenticated as.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// MySQL connection id; what `KILL CONNECTION` takes.
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Liveness probe.
    pub async fn is_alive(&mut self) -> bool {
        self.conn.ping().await.is_ok()
    }

    pub async fn exec_stmt(
        &mut self,
        stmt: &str,
        params: impl Into<Params> + Send,
    ) -> Result<Vec<Row>, Error> {
        Ok(self.conn.exec(stmt, params).await?)
    }

    pub async fn exec_first(
        &mut self,
        stmt: &str,
        params: impl Into<Params> + Send,
    ) -> Result<Option<Row>, Error> {
        Ok(self.conn.exec_first(stmt, params).await?)
    }

    pub async fn exec_drop(
        &mut self,
        stmt: &str,
        params: impl Into<Params> + Send,
    ) -> Result<(), Error> {
        Ok(self.conn.exec_drop(stmt, params).await?)
    }

    /// Text-protocol statement: DDL, replication verbs, anything that
    /// can't be prepared.
    pub async fn query_drop(&mut self, stmt: &str) -> Result<(), Error> {
        Ok(self.conn.query_drop(stmt).await?)
    }

    pub async fn query_rows(&mut self, stmt: &str) -> Result<Vec<Row>, Error> {
        Ok(self.conn.query(stmt).await?)
    }

    pub async fn query_first(&mut self, stmt: &str) -> Result<Option<Row>, Error> {
        Ok(self.conn.query_first(stmt).await?)
    }

    /// Read one global variable.
    pub async fn get_variable(&mut self, name: &str) -> Result<Option<String>, Error> {
        let row: Option<Row> = self
            .conn
            .exec_first("SHOW GLOBAL VARIABLES LIKE ?", (name,))
            .await?;
        Ok(row.and_then(|row| row.get::<String, _>(1)))
    }

    pub async fn server_uuid(&mut self) -> Result<Uuid, Error> {
        let value = self
            .get_variable("server_uuid")
            .await?
            .ok_or(Error::MalformedRow("server_uuid"))?;
        Uuid::parse_str(&value).map_err(|_| Error::MalformedRow("server_uuid"))
    }

    pub async fn server_id(&mut self) -> Result<u32, Error> {
        let value = self
            .get_variable("server_id")
            .await?
            .ok_or(Error::MalformedRow("server_id"))?;
        value.parse().map_err(|_| Error::MalformedRow("server_id"))
    }

    pub async fn version(&mut self) -> Result<String, Error> {
        self.get_variable("version")
            .await?
            .ok_or(Error::MalformedRow("version"))
    }

    pub async fn read_only(&mut self) -> Result<bool, Error> {
        Ok(self
            .get_variable("read_only")
            .await?
            .map(|value| value == "ON" || value == "1")
            .unwrap_or(false))
    }

    pub async fn set_read_only(&mut self, read_only: bool) -> Result<(), Error> {
        let value = if read_only { "ON" } else { "OFF" };
        self.query_drop(&format!("SET GLOBAL read_only = {}", value))
            .await
    }

    pub async fn gtid_enabled(&mut self) -> Result<bool, Error> {
        Ok(self
            .get_variable("gtid_mode")
            .await?
            .map(|value| value == "ON")
            .unwrap_or(false))
    }

    pub async fn binlog_enabled(&mut self) -> Result<bool, Error> {
        Ok(self
            .get_variable("log_bin")
            .await?
            .map(|value| value == "ON" || value == "1")
            .unwrap_or(false))
    }

    /// Check the authenticated user holds all of `required` at the
    /// global level. `ALL PRIVILEGES` satisfies everything.
    pub async fn has_privileges(&mut self, required: &[&str]) -> Result<bool, Error> {
        let rows: Vec<Row> = self
            .conn
            .query(
                "SELECT PRIVILEGE_TYPE FROM INFORMATION_SCHEMA.USER_PRIVILEGES \
                 WHERE GRANTEE = CONCAT('\\'', SUBSTRING_INDEX(CURRENT_USER(), '@', 1), \
                 '\\'@\\'', SUBSTRING_INDEX(CURRENT_USER(), '@', -1), '\\'')",
            )
            .await?;

        let granted: Vec<String> = rows
            .into_iter()
            .filter_map(|row| row.get::<String, _>(0))
            .collect();

        if granted.iter().any(|privilege| privilege == "ALL PRIVILEGES") {
            return Ok(true);
        }
        Ok(required
            .iter()
            .all(|needed| granted.iter().any(|privilege| privilege == needed)))
    }

    /// Close the connection politely.
    pub async fn disconnect(self) {
        let _ = self.conn.disconnect().await;
    }
}
