//! Controller configuration

use crate::frame::MAX_ENCODABLE_LENGTH;
use crate::med::MedLayout;
use crate::{IseError, IseResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded-wait policy: sleep `interval_us` between at most `max_attempts` polls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Delay between polls (microseconds)
    pub interval_us: u32,
    /// Polls before giving up
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Policy spending roughly `budget` in `interval_us` steps
    pub fn from_budget(interval_us: u32, budget: Duration) -> Self {
        let interval = interval_us.max(1) as u128;
        let attempts = (budget.as_micros() / interval).clamp(1, u32::MAX as u128);
        PollPolicy {
            interval_us,
            max_attempts: attempts as u32,
        }
    }
}

/// Tunables for one ISE device context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IseConfig {
    /// Largest payload accepted in either direction
    pub max_payload_bytes: usize,
    /// Delay between FIFO occupancy polls (microseconds)
    pub fifo_poll_interval_us: u32,
    /// Time a stalled FIFO may make no progress before the transfer aborts
    pub fifo_timeout_ms: u64,
    /// Delay between power status polls (microseconds)
    pub status_poll_interval_us: u32,
    /// Power status polls before reporting `TimedOut`
    pub status_poll_attempts: u32,
    /// Delay between oscillator calibration polls (microseconds)
    pub calibration_poll_interval_us: u32,
    /// Calibration polls before the cold boot fails
    pub calibration_attempts: u32,
    /// Hold time for reset pulses (microseconds)
    pub reset_settle_us: u32,
    /// Wait for a command reply
    pub reply_timeout_ms: u64,
    /// Wait for data in a blocking read
    pub read_timeout_ms: u64,
    /// Fault cache capacity
    pub fault_capacity: usize,
    /// MED window and storage layout
    pub med: MedLayout,
}

impl Default for IseConfig {
    fn default() -> Self {
        IseConfig {
            max_payload_bytes: 1024,
            fifo_poll_interval_us: 100,
            fifo_timeout_ms: 2_000,
            status_poll_interval_us: 100,
            status_poll_attempts: 100,
            calibration_poll_interval_us: 50,
            calibration_attempts: 200,
            reset_settle_us: 1_000,
            reply_timeout_ms: 1_000,
            read_timeout_ms: 5_000,
            fault_capacity: 32,
            med: MedLayout::default(),
        }
    }
}

impl IseConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> IseResult<Self> {
        let config: IseConfig =
            serde_json::from_str(json).map_err(|e| IseError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject budgets and limits the controller cannot honour
    pub fn validate(&self) -> IseResult<()> {
        if self.max_payload_bytes == 0 || self.max_payload_bytes > MAX_ENCODABLE_LENGTH {
            return Err(IseError::InvalidConfig(format!(
                "max_payload_bytes must be within 1..={}",
                MAX_ENCODABLE_LENGTH
            )));
        }
        if self.fifo_timeout_ms == 0 || self.status_poll_attempts == 0 || self.calibration_attempts == 0 {
            return Err(IseError::InvalidConfig("retry budgets must be non-zero".into()));
        }
        if self.fault_capacity == 0 {
            return Err(IseError::InvalidConfig("fault_capacity must be non-zero".into()));
        }
        self.med.validate()
    }

    /// Policy for a stalled FIFO
    pub fn fifo_policy(&self) -> PollPolicy {
        PollPolicy::from_budget(
            self.fifo_poll_interval_us,
            Duration::from_millis(self.fifo_timeout_ms),
        )
    }

    /// Policy for power status reads
    pub fn status_policy(&self) -> PollPolicy {
        PollPolicy {
            interval_us: self.status_poll_interval_us,
            max_attempts: self.status_poll_attempts,
        }
    }

    /// Policy for oscillator calibration
    pub fn calibration_policy(&self) -> PollPolicy {
        PollPolicy {
            interval_us: self.calibration_poll_interval_us,
            max_attempts: self.calibration_attempts,
        }
    }

    /// Reply wait as a `Duration`
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Blocking read wait as a `Duration`
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
