//! System configuration passed once to [`init`](crate::init).

use crate::capture::CaptureConfig;
use crate::clock::ClockConfig;
use crate::dpll::DpllConfig;
use crate::hw::Priority;
use crate::pwm::PwmConfiguration;
use crate::Error;

/// Configuration passed when initializing.
///
/// The defaults run a 40 kHz switching stage (period 1700 at a 136 MHz timer
/// clock) with 50 % duty and 500 ns dead-time, sensing the feedback against
/// VDD/2 on the rising edge.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub struct Config {
    pub clock: ClockConfig,
    /// Initial PWM output; the duty ratio is kept from here on.
    pub pwm: PwmConfiguration,
    pub capture: CaptureConfig,
    pub dpll: DpllConfig,
    /// Priority of the comparator interrupt. Must preempt the update interrupt.
    pub feedback_priority: Priority,
    pub update_priority: Priority,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            pwm: PwmConfiguration {
                period: 1700,
                compare: 850,
                dead_time: 68,
            },
            capture: CaptureConfig::default(),
            dpll: DpllConfig::default(),
            feedback_priority: Priority::P0,
            update_priority: Priority::P1,
        }
    }
}

impl Config {
    /// Checks every invariant that does not depend on the timer's counter width.
    pub fn validate(&self) -> Result<(), Error> {
        self.dpll.validate()?;
        let dead_time = self.pwm.validate(u32::MAX)?;

        let limits = &self.dpll.limits;
        if self.pwm.period < limits.min_period || self.pwm.period > limits.max_period {
            return Err(Error::InvalidConfig {
                field: "pwm.period",
                value: self.pwm.period,
            });
        }
        // every period the loop may stage must leave room for the encoded dead-time
        if !dead_time.fits(limits.min_period) {
            return Err(Error::DeadTimeTooLong {
                dead_time: self.pwm.dead_time,
                period: limits.min_period,
            });
        }
        if self.capture.counter_top < limits.max_period {
            return Err(Error::InvalidConfig {
                field: "capture.counter_top",
                value: self.capture.counter_top,
            });
        }
        if self.clock.startup_timeout == 0 {
            return Err(Error::InvalidConfig {
                field: "clock.startup_timeout",
                value: 0,
            });
        }
        if self.feedback_priority >= self.update_priority {
            return Err(Error::InvalidConfig {
                field: "feedback_priority",
                value: self.feedback_priority as u32,
            });
        }
        Ok(())
    }
}
