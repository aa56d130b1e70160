//! Retry behavior.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::Error;

/// Bounded exponential backoff settings for store round trips.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct RetryOptions {
    /// Total attempts per operation, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff ceiling.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    2_000
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryOptions {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_attempts == 0 {
            return Err(Error::Invalid("max_attempts must be at least 1".into()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Invalid(
                "max_delay_ms must be at least base_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(RetryOptions::default().validate().is_ok());

        let zero = RetryOptions {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let inverted = RetryOptions {
            base_delay_ms: 100,
            max_delay_ms: 10,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }
}
