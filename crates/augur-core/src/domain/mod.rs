//! Domain model (keys, tasks, attempts, failures, decisions, scoring).

pub mod attempt;
pub mod decision;
pub mod errors;
pub mod ids;
pub mod retry;
pub mod score;
pub mod task;

pub use attempt::{AttemptCount, AttemptParseError};
pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{DeliveryFailure, FailureClass, StoreError, TaskError};
pub use ids::{DeliveryId, Id, IdMarker, InstrumentKey};
pub use retry::RetryPolicy;
pub use score::{AggregationError, SentimentCounts, compute_score, trend_score};
pub use task::{Task, TaskKind};
