use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The state store: the MySQL instance holding all of the daemon's
/// persistent state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Storage {
    /// `host:port` of the backing MySQL server.
    ///
    /// _Default:_ `localhost:3306`
    #[serde(default = "Storage::address")]
    pub address: String,

    #[serde(default = "Storage::user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Schema holding the state tables.
    ///
    /// _Default:_ `fabric`
    #[serde(default = "Storage::database")]
    pub database: String,

    /// Per-attempt connect timeout, in milliseconds.
    #[serde(default = "Storage::connect_timeout")]
    pub connect_timeout: u64,

    /// How many times to retry the initial connection at startup.
    #[serde(default = "Storage::connect_attempts")]
    pub connect_attempts: u32,

    /// Delay between startup connection attempts, in milliseconds.
    #[serde(default = "Storage::connect_delay")]
    pub connect_delay: u64,
}

impl Storage {
    fn address() -> String {
        "localhost:3306".into()
    }

    fn user() -> String {
        "fabric".into()
    }

    fn database() -> String {
        "fabric".into()
    }

    fn connect_timeout() -> u64 {
        5_000
    }

    fn connect_attempts() -> u32 {
        3
    }

    fn connect_delay() -> u64 {
        1_000
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    pub fn connect_delay_duration(&self) -> Duration {
        Duration::from_millis(self.connect_delay)
    }

    /// Split the address into host and port.
    pub fn host_and_port(&self) -> Result<(String, u16), Error> {
        split_address(&self.address)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        self.host_and_port().map(|_| ())
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            address: Self::address(),
            user: Self::user(),
            password: String::new(),
            database: Self::database(),
            connect_timeout: Self::connect_timeout(),
            connect_attempts: Self::connect_attempts(),
            connect_delay: Self::connect_delay(),
        }
    }
}

/// Split a `host:port` string.
pub fn split_address(address: &str) -> Result<(String, u16), Error> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::Address(address.into()))?;
    let port: u16 = port.parse().map_err(|_| Error::Address(address.into()))?;
    if host.is_empty() {
        return Err(Error::Address(address.into()));
    }
    Ok((host.into(), port))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn address_split() {
        assert_eq!(
            split_address("db.example.com:3306").unwrap(),
            ("db.example.com".into(), 3306)
        );
        assert!(split_address("no-port").is_err());
        assert!(split_address(":3306").is_err());
        assert!(split_address("host:notaport").is_err());
    }
}
