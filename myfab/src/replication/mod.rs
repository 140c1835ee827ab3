//! Replication driver: thin wrappers around the SQL verbs that steer
//! MySQL replication, plus health checks over their output.
//!
//! Waits poll at one-second granularity and always return: exceeding
//! the caller's timeout raises a timeout error rather than spinning on
//! a broken slave.

pub mod error;
pub mod gtid;

pub use error::Error;
pub use gtid::{get_num_gtid, get_slave_num_gtid_behind, GtidSet};

use std::collections::BTreeMap;
use std::time::Duration;

use mysql_async::Row;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::server::{Server, ServerConnection};

/// Replication threads on a slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Thread {
    Io,
    Sql,
}

impl Thread {
    fn as_sql(&self) -> &'static str {
        match self {
            Thread::Io => "IO_THREAD",
            Thread::Sql => "SQL_THREAD",
        }
    }
}

pub const ALL_THREADS: &[Thread] = &[Thread::Io, Thread::Sql];

const POLL: Duration = Duration::from_secs(1);

/// `SHOW MASTER STATUS`, the fields the daemon uses.
#[derive(Debug, Clone, Default)]
pub struct MasterStatus {
    pub file: String,
    pub position: u64,
    pub executed_gtid_set: String,
}

/// `SHOW SLAVE STATUS`, the fields the daemon uses.
#[derive(Debug, Clone, Default)]
pub struct SlaveStatus {
    pub master_host: String,
    pub master_port: u16,
    pub master_uuid: Option<Uuid>,
    pub io_running: bool,
    pub sql_running: bool,
    pub master_log_file: String,
    pub read_master_log_pos: u64,
    pub exec_master_log_pos: u64,
    pub retrieved_gtid_set: String,
    pub executed_gtid_set: String,
    pub seconds_behind_master: Option<u64>,
    pub last_io_error: String,
    pub last_sql_error: String,
}

pub async fn get_master_status(
    conn: &mut ServerConnection,
) -> Result<Option<MasterStatus>, Error> {
    let row = conn.query_first("SHOW MASTER STATUS").await?;
    Ok(row.map(|row: Row| MasterStatus {
        file: row.get("File").unwrap_or_default(),
        position: row.get("Position").unwrap_or_default(),
        executed_gtid_set: row.get("Executed_Gtid_Set").unwrap_or_default(),
    }))
}

pub async fn reset_master(conn: &mut ServerConnection) -> Result<(), Error> {
    Ok(conn.query_drop("RESET MASTER").await?)
}

pub async fn get_slave_status(
    conn: &mut ServerConnection,
) -> Result<Option<SlaveStatus>, Error> {
    let row = conn.query_first("SHOW SLAVE STATUS").await?;
    Ok(row.map(|row: Row| {
        let master_uuid: Option<String> = row.get("Master_UUID").unwrap_or(None);
        SlaveStatus {
            master_host: row.get("Master_Host").unwrap_or_default(),
            master_port: row.get("Master_Port").unwrap_or_default(),
            master_uuid: master_uuid.and_then(|value| Uuid::parse_str(&value).ok()),
            io_running: yes(&row, "Slave_IO_Running"),
            sql_running: yes(&row, "Slave_SQL_Running"),
            master_log_file: row.get("Master_Log_File").unwrap_or_default(),
            read_master_log_pos: row.get("Read_Master_Log_Pos").unwrap_or_default(),
            exec_master_log_pos: row.get("Exec_Master_Log_Pos").unwrap_or_default(),
            retrieved_gtid_set: row.get("Retrieved_Gtid_Set").unwrap_or_default(),
            executed_gtid_set: row.get("Executed_Gtid_Set").unwrap_or_default(),
            seconds_behind_master: row.get("Seconds_Behind_Master").unwrap_or(None),
            last_io_error: row.get("Last_IO_Error").unwrap_or_default(),
            last_sql_error: row.get("Last_SQL_Error").unwrap_or_default(),
        }
    }))
}

fn yes(row: &Row, column: &str) -> bool {
    row.get::<String, _>(column)
        .map(|value| value == "Yes")
        .unwrap_or(false)
}

/// The master this slave replicates from, if its status names one.
pub async fn slave_has_master(conn: &mut ServerConnection) -> Result<Option<Uuid>, Error> {
    Ok(get_slave_status(conn).await?.and_then(|status| status.master_uuid))
}

/// Whether the named threads are all running (or all stopped).
pub async fn is_slave_thread_running(
    conn: &mut ServerConnection,
    threads: &[Thread],
    running: bool,
) -> Result<bool, Error> {
    let Some(status) = get_slave_status(conn).await? else {
        return Ok(false);
    };
    Ok(threads.iter().all(|thread| {
        let state = match thread {
            Thread::Io => status.io_running,
            Thread::Sql => status.sql_running,
        };
        state == running
    }))
}

/// `START SLAVE`, optionally waiting until the threads report running.
pub async fn start_slave(
    conn: &mut ServerConnection,
    threads: &[Thread],
    wait: bool,
    timeout: Duration,
) -> Result<(), Error> {
    conn.query_drop(&format!("START SLAVE {}", thread_list(threads)))
        .await?;
    if wait {
        wait_for_threads(conn, threads, true, timeout).await?;
    }
    Ok(())
}

/// `STOP SLAVE`, optionally waiting until the threads report stopped.
pub async fn stop_slave(
    conn: &mut ServerConnection,
    threads: &[Thread],
    wait: bool,
    timeout: Duration,
) -> Result<(), Error> {
    conn.query_drop(&format!("STOP SLAVE {}", thread_list(threads)))
        .await?;
    if wait {
        wait_for_threads(conn, threads, false, timeout).await?;
    }
    Ok(())
}

fn thread_list(threads: &[Thread]) -> String {
    threads
        .iter()
        .map(Thread::as_sql)
        .collect::<Vec<_>>()
        .join(", ")
}

async fn wait_for_threads(
    conn: &mut ServerConnection,
    threads: &[Thread],
    running: bool,
    timeout: Duration,
) -> Result<(), Error> {
    let deadline = Instant::now() + timeout;
    loop {
        if is_slave_thread_running(conn, threads, running).await? {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout(timeout));
        }
        sleep(POLL).await;
    }
}

/// `RESET SLAVE`. With `clean`, also forgets the master configuration.
pub async fn reset_slave(conn: &mut ServerConnection, clean: bool) -> Result<(), Error> {
    let stmt = if clean { "RESET SLAVE ALL" } else { "RESET SLAVE" };
    Ok(conn.query_drop(stmt).await?)
}

/// Point `slave` at `master`. GTID auto-positioning when the slave has
/// it enabled, binary-log coordinates otherwise.
#[allow(clippy::too_many_arguments)]
pub async fn switch_master(
    slave: &mut ServerConnection,
    master: &Server,
    user: &str,
    password: &str,
    from_beginning: bool,
    log_file: Option<&str>,
    log_pos: Option<u64>,
) -> Result<(), Error> {
    let (host, port) = master
        .address
        .rsplit_once(':')
        .and_then(|(host, port)| Some((host, port.parse::<u16>().ok()?)))
        .ok_or_else(|| crate::server::Error::Address(master.address.clone()))?;

    let mut clauses = vec![
        format!("MASTER_HOST = '{}'", escape(host)),
        format!("MASTER_PORT = {}", port),
        format!("MASTER_USER = '{}'", escape(user)),
        format!("MASTER_PASSWORD = '{}'", escape(password)),
    ];

    if slave.gtid_enabled().await? {
        clauses.push("MASTER_AUTO_POSITION = 1".into());
    } else if !from_beginning {
        if let Some(log_file) = log_file {
            clauses.push(format!("MASTER_LOG_FILE = '{}'", escape(log_file)));
        }
        if let Some(log_pos) = log_pos {
            clauses.push(format!("MASTER_LOG_POS = {}", log_pos));
        }
    }

    slave
        .query_drop(&format!("CHANGE MASTER TO {}", clauses.join(", ")))
        .await?;
    Ok(())
}

/// Wait until the slave applied the master's binary log up to
/// (`file`, `position`).
pub async fn wait_for_slave(
    conn: &mut ServerConnection,
    file: &str,
    position: u64,
    timeout: Duration,
) -> Result<(), Error> {
    let deadline = Instant::now() + timeout;
    loop {
        let row = conn
            .exec_first("SELECT MASTER_POS_WAIT(?, ?, ?)", (file, position, 1u32))
            .await?;
        let result: Option<i64> = row.and_then(|row| row.get(0));
        match result {
            // NULL: the SQL thread is not running or the coordinates are
            // bogus. Waiting longer will not help.
            None => return Err(Error::WaitFailed("MASTER_POS_WAIT returned NULL".into())),
            Some(events) if events >= 0 => return Ok(()),
            Some(_) => {
                if Instant::now() >= deadline {
                    return Err(Error::Timeout(timeout));
                }
            }
        }
    }
}

/// Wait until the slave's SQL thread executed every transaction in
/// `gtid_set`.
pub async fn wait_for_slave_gtid(
    conn: &mut ServerConnection,
    gtid_set: &str,
    timeout: Duration,
) -> Result<(), Error> {
    let deadline = Instant::now() + timeout;
    loop {
        let row = conn
            .exec_first(
                "SELECT WAIT_UNTIL_SQL_THREAD_AFTER_GTIDS(?, ?)",
                (gtid_set, 1u32),
            )
            .await?;
        let result: Option<i64> = row.and_then(|row| row.get(0));
        match result {
            None => {
                return Err(Error::WaitFailed(
                    "WAIT_UNTIL_SQL_THREAD_AFTER_GTIDS returned NULL".into(),
                ))
            }
            Some(events) if events >= 0 => return Ok(()),
            Some(_) => {
                if Instant::now() >= deadline {
                    return Err(Error::Timeout(timeout));
                }
            }
        }
    }
}

/// Bring `slave` up to `master`'s current position, GTID-first.
pub async fn sync_slave_with_master(
    slave: &mut ServerConnection,
    master: &mut ServerConnection,
    timeout: Duration,
) -> Result<(), Error> {
    let status = get_master_status(master).await?.ok_or(Error::NoBinaryLog)?;
    if master.gtid_enabled().await? && slave.gtid_enabled().await? {
        if status.executed_gtid_set.is_empty() {
            return Ok(());
        }
        wait_for_slave_gtid(slave, &status.executed_gtid_set, timeout).await
    } else {
        wait_for_slave(slave, &status.file, status.position, timeout).await
    }
}

/// Issues that disqualify a server from being (or staying) a master.
pub async fn check_master_issues(
    conn: &mut ServerConnection,
) -> Result<BTreeMap<String, String>, Error> {
    let mut issues = BTreeMap::new();
    if !conn.binlog_enabled().await? {
        issues.insert(
            "binlog".into(),
            "binary logging is not enabled".into(),
        );
    }
    if !conn.gtid_enabled().await? {
        issues.insert("gtid".into(), "gtid_mode is not ON".into());
    }
    if conn
        .get_variable("log_slave_updates")
        .await?
        .map(|value| value != "ON" && value != "1")
        .unwrap_or(true)
    {
        issues.insert(
            "log_slave_updates".into(),
            "log_slave_updates is not set".into(),
        );
    }
    Ok(issues)
}

/// Issues that disqualify a server from being promoted.
pub async fn check_slave_issues(
    conn: &mut ServerConnection,
) -> Result<BTreeMap<String, String>, Error> {
    let mut issues = check_master_issues(conn).await?;
    if let Some(status) = get_slave_status(conn).await? {
        if !status.io_running {
            issues.insert(
                "io_thread".into(),
                format!("IO thread is not running: {}", status.last_io_error),
            );
        }
        if !status.sql_running {
            issues.insert(
                "sql_thread".into(),
                format!("SQL thread is not running: {}", status.last_sql_error),
            );
        }
    }
    Ok(issues)
}

/// Replication delay checks against configured bounds.
pub async fn check_slave_delay(
    slave: &mut ServerConnection,
    master: &mut ServerConnection,
    max_delay_secs: u64,
    max_gtid_lag: u64,
) -> Result<BTreeMap<String, String>, Error> {
    let mut issues = BTreeMap::new();
    let Some(status) = get_slave_status(slave).await? else {
        return Err(Error::NotASlave);
    };

    if let Some(delay) = status.seconds_behind_master {
        if delay > max_delay_secs {
            issues.insert(
                "delay".into(),
                format!("slave is {}s behind, budget is {}s", delay, max_delay_secs),
            );
        }
    }

    if master.gtid_enabled().await? {
        let master_status = get_master_status(master).await?.ok_or(Error::NoBinaryLog)?;
        let behind = get_slave_num_gtid_behind(
            &master_status.executed_gtid_set,
            &status.executed_gtid_set,
        )?;
        if behind > max_gtid_lag {
            issues.insert(
                "gtid_lag".into(),
                format!(
                    "slave trails by {} transaction(s), budget is {}",
                    behind, max_gtid_lag
                ),
            );
        }
    }
    Ok(issues)
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn thread_lists() {
        assert_eq!(thread_list(ALL_THREADS), "IO_THREAD, SQL_THREAD");
        assert_eq!(thread_list(&[Thread::Sql]), "SQL_THREAD");
    }

    #[test]
    fn escaping_quotes() {
        assert_eq!(escape("pa'ss\\word"), "pa\\'ss\\\\word");
    }
}
