//! Configuration for the myfab daemon.
//!
//! One TOML file with a section per subsystem. Every field has a default
//! so an empty file is a valid configuration.

pub mod core;
pub mod error;
pub mod executor;
pub mod failure;
pub mod logging;
pub mod protocol;
pub mod storage;

pub use core::Config;
pub use error::Error;
pub use executor::Executor;
pub use failure::FailureTracking;
pub use logging::{LogTarget, Logging};
pub use protocol::{Protocol, ProtocolMysql, ProtocolXmlrpc};
pub use storage::Storage;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_serializable() {
        let config = Config::default();
        toml::to_string(&config).unwrap();
    }

    #[test]
    fn empty_file_is_valid() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.executor.executors, 1);
        assert_eq!(config.storage.database, "fabric");
    }
}
