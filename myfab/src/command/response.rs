//! Wire-neutral command payloads.
//!
//! Both RPC surfaces return the same logical shape: a header with the
//! daemon's uuid, a TTL and an optional error, followed by zero or more
//! result sets. Procedure-style commands lead with a result set
//! describing the procedure.

use serde_json::json;
use uuid::Uuid;

use crate::args::Value;
use crate::executor::Procedure;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|column| column.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, row: Vec<Value>) -> Self {
        self.rows.push(row);
        self
    }

    pub fn push(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }
}

/// A command's output before the header is attached.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub results: Vec<ResultSet>,
}

impl CommandResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(results: ResultSet) -> Self {
        Self {
            results: vec![results],
        }
    }
}

/// The full response: header plus result sets.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FabricResponse {
    pub fabric_uuid: Uuid,
    pub ttl: u32,
    pub error: Option<String>,
    pub results: Vec<ResultSet>,
}

impl FabricResponse {
    /// The `SET format=json` rendering: one JSON document.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "fabric_uuid": self.fabric_uuid.to_string(),
            "ttl": self.ttl,
            "error": self.error,
            "results": self.results.iter().map(|set| {
                json!({
                    "columns": set.columns,
                    "rows": set.rows.iter().map(|row| {
                        row.iter().map(serde_json::Value::from).collect::<Vec<_>>()
                    }).collect::<Vec<_>>(),
                })
            }).collect::<Vec<_>>(),
        })
    }
}

/// The standard first result set of a procedure-style command.
pub fn procedure_result_set(procedures: &[std::sync::Arc<Procedure>]) -> ResultSet {
    let mut set = ResultSet::new(&[
        "procedure_uuid",
        "complete",
        "success",
        "return_value",
        "activities",
    ]);
    for procedure in procedures {
        let activities = serde_json::to_string(&procedure.trail()).unwrap_or_default();
        let return_value = procedure
            .result()
            .map(|value| serde_json::Value::from(&value).to_string())
            .unwrap_or_default();
        set.push(vec![
            Value::Uuid(procedure.uuid()),
            Value::Bool(procedure.complete()),
            Value::Bool(procedure.success()),
            Value::Str(return_value),
            Value::Str(activities),
        ]);
    }
    set
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn json_rendering_has_header_fields() {
        let response = FabricResponse {
            fabric_uuid: Uuid::nil(),
            ttl: 60,
            error: None,
            results: vec![ResultSet::new(&["a"]).row(vec![Value::Int(1)])],
        };
        let json = response.to_json();
        assert_eq!(json["ttl"], 60);
        assert_eq!(json["results"][0]["columns"][0], "a");
        assert_eq!(json["results"][0]["rows"][0][0], 1);
    }
}
