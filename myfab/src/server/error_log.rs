//! Error log: threat reports against managed servers, aggregated into a
//! sliding window the failure detector consults.

use chrono::Utc;
use uuid::Uuid;

use crate::store::Persister;

use super::Error;

const INSERT_ENTRY: &str =
    "INSERT INTO error_log (server_uuid, reporter, reported, error) VALUES (?, ?, ?, ?)";

const SELECT_WINDOW: &str = "SELECT COUNT(DISTINCT reported), COUNT(DISTINCT reporter) \
     FROM error_log WHERE server_uuid = ? AND reported >= ?";

const DELETE_SERVER_ENTRIES: &str = "DELETE FROM error_log WHERE server_uuid = ?";

const DELETE_BEFORE: &str = "DELETE FROM error_log WHERE reported < ?";

/// Aggregated view over one server's recent entries.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ErrorWindow {
    /// Distinct report timestamps.
    pub notifications: u64,
    /// Distinct reporter identities.
    pub reporters: u64,
}

impl ErrorWindow {
    /// Both thresholds must be exceeded before a server is marked
    /// faulty.
    pub fn exceeds(&self, notifications: u32, reporters: u32) -> bool {
        self.notifications >= notifications as u64 && self.reporters >= reporters as u64
    }
}

pub struct ErrorLog;

impl ErrorLog {
    pub async fn add(
        persister: &mut Persister,
        server_uuid: Uuid,
        reporter: &str,
        message: &str,
    ) -> Result<(), Error> {
        let reported = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        persister
            .exec_drop(
                INSERT_ENTRY,
                (server_uuid.to_string(), reporter, reported, message),
            )
            .await?;
        Ok(())
    }

    /// Entries reported within the last `window_secs` seconds.
    pub async fn window(
        persister: &mut Persister,
        server_uuid: Uuid,
        window_secs: u64,
    ) -> Result<ErrorWindow, Error> {
        let since =
            Utc::now().timestamp_micros() as f64 / 1_000_000.0 - window_secs as f64;
        let row = persister
            .exec_first(SELECT_WINDOW, (server_uuid.to_string(), since))
            .await?;

        let (notifications, reporters) = match row {
            Some(row) => (
                row.get::<i64, _>(0).unwrap_or(0) as u64,
                row.get::<i64, _>(1).unwrap_or(0) as u64,
            ),
            None => (0, 0),
        };
        Ok(ErrorWindow {
            notifications,
            reporters,
        })
    }

    /// Drop a removed server's entries.
    pub async fn remove(persister: &mut Persister, server_uuid: Uuid) -> Result<(), Error> {
        persister
            .exec_drop(DELETE_SERVER_ENTRIES, (server_uuid.to_string(),))
            .await?;
        Ok(())
    }

    /// Prune entries older than `max_age_secs`.
    pub async fn prune(persister: &mut Persister, max_age_secs: u64) -> Result<(), Error> {
        let before =
            Utc::now().timestamp_micros() as f64 / 1_000_000.0 - max_age_secs as f64;
        persister.exec_drop(DELETE_BEFORE, (before,)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn thresholds_are_conjunctive() {
        let window = ErrorWindow {
            notifications: 5,
            reporters: 1,
        };
        assert!(window.exceeds(3, 1));
        assert!(!window.exceeds(3, 2));
        assert!(!window.exceeds(6, 1));
        assert!(ErrorWindow::default().exceeds(0, 0));
    }
}
