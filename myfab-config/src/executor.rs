use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Procedure executor settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Executor {
    /// Worker tasks consuming procedures. Keep at 1 unless procedures are
    /// known not to read each other's uncommitted state.
    #[serde(default = "Executor::executors")]
    pub executors: usize,
}

impl Executor {
    fn executors() -> usize {
        1
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self {
            executors: Self::executors(),
        }
    }
}
