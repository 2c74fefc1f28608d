//! Bounded polling
//!
//! Every bounded wait in the controller goes through [`poll_until`] so the
//! retry policy lives in one place.

use embedded_hal::delay::DelayNs;
use ise_core::{IseError, IseResult, PollPolicy};

/// Call `check` until it yields a value, sleeping between attempts
///
/// Returns `IseError::Timeout` after `policy.max_attempts` empty checks.
/// Probe errors abort the wait immediately.
pub fn poll_until<D, T, F>(delay: &mut D, policy: PollPolicy, mut check: F) -> IseResult<T>
where
    D: DelayNs,
    F: FnMut() -> IseResult<Option<T>>,
{
    for attempt in 0..policy.max_attempts {
        if let Some(value) = check()? {
            return Ok(value);
        }
        if attempt + 1 < policy.max_attempts {
            delay.delay_us(policy.interval_us);
        }
    }
    Err(IseError::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingDelay {
        calls: u32,
        total_us: u64,
    }

    impl DelayNs for CountingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.calls += 1;
            self.total_us += (ns / 1000) as u64;
        }
    }

    const POLICY: PollPolicy = PollPolicy {
        interval_us: 10,
        max_attempts: 5,
    };

    #[test]
    fn test_immediate_success() {
        let mut delay = CountingDelay::default();
        let value = poll_until(&mut delay, POLICY, || Ok(Some(7))).unwrap();
        assert_eq!(value, 7);
        assert_eq!(delay.calls, 0);
    }

    #[test]
    fn test_success_after_retries() {
        let mut delay = CountingDelay::default();
        let mut polls = 0;
        let value = poll_until(&mut delay, POLICY, || {
            polls += 1;
            Ok((polls == 3).then_some(polls))
        })
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(delay.calls, 2);
    }

    #[test]
    fn test_timeout_after_budget() {
        let mut delay = CountingDelay::default();
        let mut polls = 0;
        let result: IseResult<()> = poll_until(&mut delay, POLICY, || {
            polls += 1;
            Ok(None)
        });

        assert_eq!(result, Err(IseError::Timeout));
        assert_eq!(polls, 5);
        assert_eq!(delay.calls, 4);
    }

    #[test]
    fn test_check_error_aborts() {
        let mut delay = CountingDelay::default();
        let result: IseResult<()> = poll_until(&mut delay, POLICY, || Err(IseError::PowerNotReady));
        assert_eq!(result, Err(IseError::PowerNotReady));
        assert_eq!(delay.calls, 0);
    }
}
