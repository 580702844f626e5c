//! Delivery attempt counter supplied by the transport.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How many times one logical task has been delivered (1 on first delivery).
///
/// Read-only input: the transport owns the counter, the core only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptCount(NonZeroU32);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptParseError {
    #[error("attempt count must be >= 1")]
    Zero,

    #[error("attempt count is not a number: {0:?}")]
    NotANumber(String),
}

impl AttemptCount {
    pub const FIRST: AttemptCount = AttemptCount(NonZeroU32::MIN);

    pub fn new(value: u32) -> Result<Self, AttemptParseError> {
        NonZeroU32::new(value)
            .map(Self)
            .ok_or(AttemptParseError::Zero)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// The counter the transport will hand out on the next redelivery.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for AttemptCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Header values arrive as strings (e.g. `"3"`); surrounding whitespace is tolerated.
impl FromStr for AttemptCount {
    type Err = AttemptParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value: u32 = trimmed
            .parse()
            .map_err(|_| AttemptParseError::NotANumber(trimmed.to_string()))?;
        Self::new(value)
    }
}

impl TryFrom<u32> for AttemptCount {
    type Error = AttemptParseError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
