//! Power-domain controller
//!
//! Ordered register sequences moving the ISE between power states. Every
//! step propagates its own failure immediately; nothing is rolled back and
//! nothing is retried here, retry policy belongs to the caller.

use crate::poll::poll_until;
use crate::regs::{
    pd_aon, pd_analog, pd_clk, pd_osc, pd_reset, pd_sleep, pd_status, PD_ANALOG, PD_AON, PD_CLK,
    PD_OSC, PD_RESET, PD_SLEEP, PD_STATUS,
};
use crate::traits::RegisterAccess;
use embedded_hal::delay::DelayNs;
use ise_core::{IseConfig, IseError, IseResult, PowerState};

/// Power sequencing over a register block
pub struct PowerController<'a, R: RegisterAccess + ?Sized, D: DelayNs> {
    regs: &'a R,
    delay: &'a mut D,
    config: &'a IseConfig,
}

impl<'a, R: RegisterAccess + ?Sized, D: DelayNs> PowerController<'a, R, D> {
    /// Create a controller for one operation
    pub fn new(regs: &'a R, delay: &'a mut D, config: &'a IseConfig) -> Self {
        PowerController { regs, delay, config }
    }

    /// Read the power state, waiting out transitions
    ///
    /// A field that never settles yields `PowerState::TimedOut`; register
    /// access failures are returned as errors.
    pub fn query_status(&mut self) -> IseResult<PowerState> {
        let regs = self.regs;
        let result = poll_until(&mut *self.delay, self.config.status_policy(), || {
            let state = regs.read32(PD_STATUS)? & pd_status::STATE_MASK;
            Ok(match state {
                pd_status::ON => Some(PowerState::PoweredOn),
                pd_status::DOWN => Some(PowerState::PoweredDown),
                _ => None,
            })
        });

        match result {
            Err(IseError::Timeout) => {
                log::warn!("Power status did not settle");
                Ok(PowerState::TimedOut)
            }
            other => other,
        }
    }

    /// Bring the ISE from powered down to powered on
    pub fn cold_power_on(&mut self) -> IseResult<()> {
        log::info!("ISE cold power on");

        self.set(PD_RESET, pd_reset::CORE)?;
        self.clear(PD_SLEEP, pd_sleep::FORCE_DEEP_SLEEP)?;
        self.clear(PD_AON, pd_aon::FORCE_PWR_DOWN)?;

        // Crystal buffers must see a clean off/on edge
        self.clear(PD_CLK, pd_clk::XTAL_BUF0 | pd_clk::XTAL_BUF1)?;
        self.set(PD_CLK, pd_clk::XTAL_BUF0)?;
        self.set(PD_CLK, pd_clk::XTAL_BUF1)?;

        // Oscillator stays forced off across the reset release
        self.set(PD_OSC, pd_osc::FORCE_OFF)?;
        self.clear(PD_RESET, pd_reset::CORE)?;
        self.clear(PD_OSC, pd_osc::FORCE_OFF)?;

        self.calibrate_oscillator()?;

        self.clear(PD_ANALOG, pd_analog::PWR_DOWN)?;
        self.set(PD_SLEEP, pd_sleep::AUTO_SHUTDOWN)?;

        log::info!("ISE power on sequence complete");
        Ok(())
    }

    /// Reset the ISE contents without leaving the powered-on state
    pub fn soft_reset(&mut self) -> IseResult<()> {
        log::info!("ISE soft reset");

        self.clear(PD_RESET, pd_reset::TRIGGER_SEL)?;
        self.clear(PD_RESET, pd_reset::SOFT)?;
        self.set(PD_RESET, pd_reset::SOFT)?;
        self.delay.delay_us(self.config.reset_settle_us);
        self.clear(PD_RESET, pd_reset::SOFT)
    }

    /// Assert the hard reset line
    pub fn hard_reset_set(&mut self) -> IseResult<()> {
        log::info!("ISE hard reset asserted");
        self.set(PD_RESET, pd_reset::HARD)
    }

    /// Release the hard reset line
    pub fn hard_reset_clear(&mut self) -> IseResult<()> {
        log::info!("ISE hard reset released");
        self.clear(PD_RESET, pd_reset::HARD)
    }

    /// Pulse the hard reset line
    pub fn hard_reset(&mut self) -> IseResult<()> {
        self.hard_reset_set()?;
        self.delay.delay_us(self.config.reset_settle_us);
        self.hard_reset_clear()
    }

    /// Remove power once the ISE has acknowledged a power-down request
    pub fn release_power(&mut self) -> IseResult<()> {
        log::info!("ISE releasing power");

        self.clear(PD_SLEEP, pd_sleep::AUTO_SHUTDOWN)?;
        self.set(PD_ANALOG, pd_analog::PWR_DOWN)?;
        self.set(PD_AON, pd_aon::FORCE_PWR_DOWN)?;
        self.set(PD_SLEEP, pd_sleep::FORCE_DEEP_SLEEP)
    }

    fn calibrate_oscillator(&mut self) -> IseResult<()> {
        self.set(PD_OSC, pd_osc::CAL_START)?;

        let policy = self.config.calibration_policy();
        let regs = self.regs;
        let result = poll_until(&mut *self.delay, policy, || {
            let done = regs.read32(PD_OSC)? & pd_osc::CAL_DONE != 0;
            Ok(done.then_some(()))
        });

        match result {
            Err(IseError::Timeout) => {
                log::error!("Oscillator calibration did not complete after {} polls", policy.max_attempts);
                Err(IseError::CalibrationFailed {
                    attempts: policy.max_attempts,
                })
            }
            other => {
                other?;
                self.clear(PD_OSC, pd_osc::CAL_START)
            }
        }
    }

    fn set(&self, offset: u32, mask: u32) -> IseResult<()> {
        self.regs.set_bits(offset, mask)
    }

    fn clear(&self, offset: u32, mask: u32) -> IseResult<()> {
        self.regs.clear_bits(offset, mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimIse, SimOptions};
    use crate::StdDelay;

    fn fast_config() -> IseConfig {
        IseConfig {
            status_poll_interval_us: 10,
            status_poll_attempts: 20,
            calibration_poll_interval_us: 10,
            calibration_attempts: 20,
            reset_settle_us: 10,
            ..IseConfig::default()
        }
    }

    #[test]
    fn test_cold_boot_powers_on() {
        let sim = SimIse::new(SimOptions::default());
        let config = fast_config();
        let mut delay = StdDelay;
        let mut power = PowerController::new(&sim, &mut delay, &config);

        assert_eq!(power.query_status().unwrap(), PowerState::PoweredDown);
        power.cold_power_on().unwrap();
        assert_eq!(power.query_status().unwrap(), PowerState::PoweredOn);
    }

    #[test]
    fn test_cold_boot_order() {
        let sim = SimIse::new(SimOptions::default());
        let config = fast_config();
        let mut delay = StdDelay;
        PowerController::new(&sim, &mut delay, &config).cold_power_on().unwrap();

        let log = sim.power_write_log();
        let position = |reg: u32, pred: &dyn Fn(u32) -> bool| {
            log.iter()
                .position(|&(offset, value)| offset == reg && pred(value))
                .unwrap()
        };

        let core_asserted = position(PD_RESET, &|v: u32| v & pd_reset::CORE != 0);
        let osc_forced = position(PD_OSC, &|v: u32| v & pd_osc::FORCE_OFF != 0);
        let core_released = position(PD_RESET, &|v: u32| v & pd_reset::CORE == 0);
        let cal_started = position(PD_OSC, &|v: u32| v & pd_osc::CAL_START != 0);
        let analog_on = position(PD_ANALOG, &|v: u32| v & pd_analog::PWR_DOWN == 0);

        assert!(core_asserted < osc_forced);
        assert!(osc_forced < core_released);
        assert!(core_released < cal_started);
        assert!(cal_started < analog_on);
    }

    #[test]
    fn test_calibration_failure_is_fatal() {
        let sim = SimIse::new(SimOptions {
            fail_calibration: true,
            ..SimOptions::default()
        });
        let config = fast_config();
        let mut delay = StdDelay;
        let mut power = PowerController::new(&sim, &mut delay, &config);

        assert_eq!(
            power.cold_power_on(),
            Err(IseError::CalibrationFailed { attempts: 20 })
        );
        assert_eq!(power.query_status().unwrap(), PowerState::PoweredDown);
    }

    #[test]
    fn test_stuck_status_times_out() {
        let sim = SimIse::new(SimOptions {
            status_stuck: true,
            ..SimOptions::default()
        });
        let config = fast_config();
        let mut delay = StdDelay;
        let mut power = PowerController::new(&sim, &mut delay, &config);

        assert_eq!(power.query_status().unwrap(), PowerState::TimedOut);
    }

    #[test]
    fn test_hard_reset_halves() {
        let sim = SimIse::new(SimOptions::default());
        let config = fast_config();
        let mut delay = StdDelay;
        let mut power = PowerController::new(&sim, &mut delay, &config);
        power.cold_power_on().unwrap();

        power.hard_reset_set().unwrap();
        assert_eq!(power.query_status().unwrap(), PowerState::PoweredDown);

        power.hard_reset_clear().unwrap();
        assert_eq!(power.query_status().unwrap(), PowerState::PoweredOn);
    }
}
