use serde::{Deserialize, Serialize};
use std::fmt;

use super::InstrumentKey;

/// Closed set of task kinds the dispatcher knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    /// New sentiment counts for an instrument.
    PriceUpdate,
    /// Re-derive the score from the stored trend alone.
    Recalibrate,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::PriceUpdate => "PRICE_UPDATE",
            TaskKind::Recalibrate => "RECALIBRATE",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// target_key + task_type + payload の“運搬用”データ。
///
/// 一度 dispatch されたら不変。payload の解釈は handler 側（typed layer）に任せる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    target_key: InstrumentKey,
    task_type: TaskKind,
    #[serde(default)]
    payload: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    pub fn new(
        target_key: InstrumentKey,
        task_type: TaskKind,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            target_key,
            task_type,
            payload,
        }
    }

    /// Build a task from a `json!({...})` literal. Non-object values become an empty payload.
    pub fn from_json(target_key: InstrumentKey, task_type: TaskKind, payload: serde_json::Value) -> Self {
        let payload = match payload {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self::new(target_key, task_type, payload)
    }

    pub fn target_key(&self) -> InstrumentKey {
        self.target_key
    }

    pub fn task_type(&self) -> TaskKind {
        self.task_type
    }

    pub fn payload(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.payload
    }

    pub fn is_wildcard(&self) -> bool {
        self.target_key.is_wildcard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_kind_serializes_as_screaming_snake_case() {
        assert_eq!(serde_json::to_string(&TaskKind::PriceUpdate).unwrap(), "\"PRICE_UPDATE\"");
        assert_eq!(serde_json::to_string(&TaskKind::Recalibrate).unwrap(), "\"RECALIBRATE\"");
        assert_eq!(TaskKind::PriceUpdate.to_string(), "PRICE_UPDATE");
    }

    #[test]
    fn task_decodes_from_transport_shape() {
        let raw = json!({
            "targetKey": "00000000000000000000000000",
            "taskType": "PRICE_UPDATE",
            "payload": {"positive": 3, "neutral": 0, "negative": 1}
        });
        let task: Task = serde_json::from_value(raw).unwrap();
        assert!(task.is_wildcard());
        assert_eq!(task.task_type(), TaskKind::PriceUpdate);
        assert_eq!(task.payload()["positive"], 3);
    }

    #[test]
    fn from_json_drops_non_object_payloads() {
        let task = Task::from_json(InstrumentKey::generate(), TaskKind::Recalibrate, json!(42));
        assert!(task.payload().is_empty());
    }
}
