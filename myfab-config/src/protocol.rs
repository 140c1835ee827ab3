use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Wire protocol endpoints. The servers themselves live outside the core;
/// the daemon only hands them these settings.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Protocol {
    #[serde(default)]
    pub xmlrpc: ProtocolXmlrpc,

    #[serde(default)]
    pub mysql: ProtocolMysql,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProtocolXmlrpc {
    #[serde(default = "ProtocolXmlrpc::address")]
    pub address: String,

    /// Number of threads serving XML-RPC sessions.
    #[serde(default = "ProtocolXmlrpc::threads")]
    pub threads: usize,

    #[serde(default)]
    pub disable_authentication: bool,
}

impl ProtocolXmlrpc {
    fn address() -> String {
        "localhost:32274".into()
    }

    fn threads() -> usize {
        5
    }
}

impl Default for ProtocolXmlrpc {
    fn default() -> Self {
        Self {
            address: Self::address(),
            threads: Self::threads(),
            disable_authentication: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProtocolMysql {
    #[serde(default = "ProtocolMysql::address")]
    pub address: String,

    #[serde(default = "ProtocolMysql::threads")]
    pub threads: usize,

    #[serde(default)]
    pub disable_authentication: bool,

    /// Time-to-live clients should cache lookups for, in seconds.
    #[serde(default = "ProtocolMysql::ttl")]
    pub ttl: u32,
}

impl ProtocolMysql {
    fn address() -> String {
        "localhost:32275".into()
    }

    fn threads() -> usize {
        5
    }

    fn ttl() -> u32 {
        60
    }
}

impl Default for ProtocolMysql {
    fn default() -> Self {
        Self {
            address: Self::address(),
            threads: Self::threads(),
            disable_authentication: false,
            ttl: Self::ttl(),
        }
    }
}
