//! Decision model: what the transport should do with a delivery after the handler ran.
//!
//! The classifier only labels; acting on the label (redelivery, dead-letter
//! holding, discard) belongs to the transport integration.

use std::time::Duration;

use super::{DeliveryFailure, FailureClass, RetryPolicy};

/// The next action for the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Handler succeeded; acknowledge the delivery.
    Acknowledge,

    /// Transient failure: hold the message and redeliver after `delay`.
    Redeliver { delay: Duration, reason: String },

    /// Fatal failure: drop the message, no further redelivery.
    Discard { reason: String },
}

/// Deciders are pure: delivery result in, next transport action out.
pub trait Decider: Send + Sync {
    fn decide(&self, result: &Result<(), DeliveryFailure>) -> Decision;
}

/// Maps the failure classification onto a transport action using `RetryPolicy` delays.
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, result: &Result<(), DeliveryFailure>) -> Decision {
        let failure = match result {
            Ok(()) => return Decision::Acknowledge,
            Err(failure) => failure,
        };

        match failure.class {
            FailureClass::Fatal => Decision::Discard {
                reason: format!(
                    "max attempts reached: {}/{}",
                    failure.attempt, self.retry_policy.max_retry
                ),
            },
            FailureClass::Transient => {
                let delay = self.retry_policy.next_delay(failure.attempt);
                Decision::Redeliver {
                    delay,
                    reason: format!(
                        "redelivery {}/{} after {:?}: {}",
                        failure.attempt.next(),
                        self.retry_policy.max_retry,
                        delay,
                        failure.source
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AttemptCount, InstrumentKey, TaskError, TaskKind};

    fn failure(class: FailureClass, attempt: u32) -> DeliveryFailure {
        DeliveryFailure {
            class,
            key: InstrumentKey::generate(),
            attempt: AttemptCount::new(attempt).unwrap(),
            source: TaskError::HandlerNotFound(TaskKind::Recalibrate),
        }
    }

    #[test]
    fn success_is_acknowledged() {
        let decider = DefaultDecider::default();
        assert_eq!(decider.decide(&Ok(())), Decision::Acknowledge);
    }

    #[test]
    fn transient_failure_is_redelivered_with_backoff() {
        let decider = DefaultDecider::default();
        match decider.decide(&Err(failure(FailureClass::Transient, 2))) {
            Decision::Redeliver { delay, reason } => {
                assert_eq!(delay, Duration::from_secs(4));
                assert!(reason.contains("3/5"));
            }
            other => panic!("expected Redeliver, got {other:?}"),
        }
    }

    #[test]
    fn fatal_failure_is_discarded() {
        let decider = DefaultDecider::default();
        assert!(matches!(
            decider.decide(&Err(failure(FailureClass::Fatal, 5))),
            Decision::Discard { .. }
        ));
    }
}
