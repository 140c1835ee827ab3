use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Logging {
    /// One of `error`, `warn`, `info`, `debug`, `trace`. Also accepts a
    /// full `tracing` filter directive.
    #[serde(default = "Logging::level")]
    pub level: String,

    /// URL-addressed log target, e.g. `file:///var/log/myfab.log`.
    /// Console output when unset.
    #[serde(default)]
    pub url: Option<String>,
}

/// Resolved logging destination.
#[derive(Debug, Clone, PartialEq)]
pub enum LogTarget {
    Console,
    File(PathBuf),
}

impl Logging {
    fn level() -> String {
        "info".into()
    }

    /// Parse the configured target URL.
    ///
    /// `syslog://` targets are part of the configuration surface but not
    /// wired up; they are rejected here rather than silently dropped.
    pub fn target(&self) -> Result<LogTarget, Error> {
        let Some(url) = &self.url else {
            return Ok(LogTarget::Console);
        };

        let parsed = Url::parse(url)
            .map_err(|err| Error::LogTarget(url.clone(), err.to_string()))?;

        match parsed.scheme() {
            "file" => Ok(LogTarget::File(PathBuf::from(parsed.path()))),
            "syslog" => Err(Error::LogTarget(
                url.clone(),
                "syslog targets are not supported".into(),
            )),
            scheme => Err(Error::LogTarget(
                url.clone(),
                format!("unknown scheme `{}`", scheme),
            )),
        }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: Self::level(),
            url: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn file_target() {
        let logging = Logging {
            level: "info".into(),
            url: Some("file:///var/log/myfab.log".into()),
        };
        assert_eq!(
            logging.target().unwrap(),
            LogTarget::File(PathBuf::from("/var/log/myfab.log"))
        );
    }

    #[test]
    fn console_when_unset() {
        assert_eq!(Logging::default().target().unwrap(), LogTarget::Console);
    }

    #[test]
    fn syslog_rejected() {
        let logging = Logging {
            level: "info".into(),
            url: Some("syslog:///dev/log".into()),
        };
        assert!(logging.target().is_err());
    }
}
