use std::fs::read_to_string;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::executor::Executor;
use crate::failure::FailureTracking;
use crate::logging::Logging;
use crate::protocol::Protocol;
use crate::storage::Storage;

/// Top-level daemon configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub storage: Storage,

    #[serde(default)]
    pub protocol: Protocol,

    #[serde(default)]
    pub executor: Executor,

    #[serde(default)]
    pub failure_tracking: FailureTracking,

    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents =
            read_to_string(path).map_err(|err| Error::Io(path.to_path_buf(), err))?;
        let config: Config =
            toml::from_str(&contents).map_err(|err| Error::Parse(path.to_path_buf(), err))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde can't express.
    pub fn validate(&self) -> Result<(), Error> {
        self.storage.validate()?;
        self.logging.target()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_sections() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            address = "state.example.com:3306"
            user = "fabric"
            password = "secret"

            [protocol.xmlrpc]
            address = "0.0.0.0:32274"

            [protocol.mysql]
            address = "0.0.0.0:32275"

            [executor]
            executors = 4

            [failure_tracking]
            notifications = 10
            notification_clients = 2

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.address, "state.example.com:3306");
        assert_eq!(config.executor.executors, 4);
        assert_eq!(config.failure_tracking.notifications, 10);
        assert_eq!(config.logging.level, "debug");
        config.validate().unwrap();
    }

    #[test]
    fn unknown_fields_rejected() {
        let result: Result<Config, _> = toml::from_str("[storage]\nbogus = 1\n");
        assert!(result.is_err());
    }
}
