//! Errors - エラー型と分類
//!
//! - `TaskError`: locked section の中（または dispatch 途中）で起きた失敗
//! - `StoreError`: 永続化 port の失敗
//! - `DeliveryFailure`: `TaskError` に Transient / Fatal のラベルを付けたもの
//!
//! 分類は型名や文字列ではなく `FailureClass` の値で判定する。

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{AttemptCount, InstrumentKey, TaskKind};

/// Failure reported by a persistence or history port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("write rejected for {key}: {reason}")]
    Rejected { key: InstrumentKey, reason: String },
}

/// Anything that can go wrong between resolving a handler and releasing its locks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("no handler registered for task type {0}")]
    HandlerNotFound(TaskKind),

    #[error("invalid {kind} payload: {message}")]
    InvalidPayload { kind: TaskKind, message: String },

    #[error("reading score history for {key} failed: {source}")]
    History {
        key: InstrumentKey,
        #[source]
        source: StoreError,
    },

    #[error("persisting score for {key} failed: {source}")]
    Persistence {
        key: InstrumentKey,
        #[source]
        source: StoreError,
    },

    #[error("acquiring lock for {key} timed out after {waited:?}")]
    LockTimeout { key: InstrumentKey, waited: Duration },

    #[error("locked section for {key} aborted: {reason}")]
    Aborted { key: InstrumentKey, reason: String },
}

/// Transient / Fatal の運用分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureClass {
    /// Attempt below the threshold; redelivery is still permitted.
    Transient,
    /// Attempt at or above the threshold; must not be redelivered. Alertable.
    Fatal,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Transient => f.write_str("transient"),
            FailureClass::Fatal => f.write_str("fatal"),
        }
    }
}

/// A handler failure labelled for the transport integration.
///
/// The original `TaskError` is kept untouched as the source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class} failure for {key} on attempt {attempt}: {source}")]
pub struct DeliveryFailure {
    pub class: FailureClass,
    pub key: InstrumentKey,
    pub attempt: AttemptCount,
    #[source]
    pub source: TaskError,
}

impl DeliveryFailure {
    pub fn is_fatal(&self) -> bool {
        self.class == FailureClass::Fatal
    }

    pub fn cause(&self) -> &TaskError {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn delivery_failure_keeps_original_error_as_source() {
        let key = InstrumentKey::generate();
        let original = TaskError::Persistence {
            key,
            source: StoreError::Unavailable("db down".to_string()),
        };
        let failure = DeliveryFailure {
            class: FailureClass::Fatal,
            key,
            attempt: AttemptCount::new(5).unwrap(),
            source: original.clone(),
        };

        assert!(failure.is_fatal());
        assert_eq!(failure.cause(), &original);
        let msg = failure.to_string();
        assert!(msg.starts_with("fatal failure"));
        assert!(msg.contains("attempt 5"));
        assert!(failure.source().is_some());
    }
}
