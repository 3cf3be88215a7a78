//! Digital phase-locked loop.
//!
//! The controller treats the PWM timer as the loop's oscillator. Each control
//! step takes at most one feedback timestamp, measures the interval since the
//! previous one, and nudges the commanded PWM period toward the target by a
//! proportional correction whose gain depends on the lock state.
//!
//! Runtime conditions never fail: glitches are discarded, corrections and
//! periods are clamped, and lost feedback drops the loop back to
//! [`LockStatus::Unlocked`] while holding the last output.

mod lock;

pub use lock::LockStatus;

use crate::capture::{ticks_between, CaptureSample};
use crate::hw::PwmTimer;
use crate::pwm::{PwmConfiguration, PwmGenerator};
use crate::utils::round_ticks;
use crate::Error;

/// Bounds and thresholds of the loop, in capture ticks (equal to PWM period
/// ticks with the default capture prescaler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlLimits {
    pub min_period: u32,
    pub max_period: u32,
    /// Largest correction applied in one step.
    pub max_step_per_update: u32,
    /// Phase error below which a sample counts toward lock.
    pub lock_threshold: u32,
    /// Phase error above which a locked loop drops back to acquiring.
    pub unlock_threshold: u32,
    /// Consecutive good samples needed to lock.
    pub lock_sample_count: u32,
    /// Consecutive empty control steps after which feedback is considered lost.
    pub miss_timeout_samples: u32,
}

impl Default for ControlLimits {
    fn default() -> Self {
        Self {
            min_period: 1133,
            max_period: 3400,
            max_step_per_update: 50,
            lock_threshold: 20,
            unlock_threshold: 80,
            lock_sample_count: 16,
            miss_timeout_samples: 64,
        }
    }
}

/// Proportional gain per lock state.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Gains {
    pub unlocked: f32,
    pub acquiring: f32,
    pub locked: f32,
}

impl Gains {
    /// The same gain in every state.
    pub const fn uniform(gain: f32) -> Self {
        Self {
            unlocked: gain,
            acquiring: gain,
            locked: gain,
        }
    }

    pub fn get(&self, status: LockStatus) -> f32 {
        match status {
            LockStatus::Unlocked => self.unlocked,
            LockStatus::Acquiring => self.acquiring,
            LockStatus::Locked => self.locked,
        }
    }
}

impl Default for Gains {
    fn default() -> Self {
        Self {
            unlocked: 0.5,
            acquiring: 0.25,
            locked: 0.125,
        }
    }
}

/// What the measured period is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TargetPeriod {
    /// A fixed period in ticks.
    Fixed(u32),
    /// The period currently commanded to the PWM timer.
    Commanded,
    /// The previous smoothed measurement.
    Filtered,
}

/// Controller configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DpllConfig {
    pub limits: ControlLimits,
    pub gains: Gains,
    pub target: TargetPeriod,
    /// Smoothing factor of the period filter, in `(0, 1]`. 1 disables smoothing.
    pub alpha: f32,
}

impl Default for DpllConfig {
    fn default() -> Self {
        Self {
            limits: ControlLimits::default(),
            gains: Gains::default(),
            target: TargetPeriod::Fixed(1700),
            alpha: 0.25,
        }
    }
}

impl DpllConfig {
    /// Checks the cross-field invariants.
    pub fn validate(&self) -> Result<(), Error> {
        let l = &self.limits;
        if l.min_period == 0 {
            return Err(Error::InvalidConfig {
                field: "limits.min_period",
                value: l.min_period,
            });
        }
        if l.max_period < l.min_period {
            return Err(Error::InvalidConfig {
                field: "limits.max_period",
                value: l.max_period,
            });
        }
        if l.max_step_per_update == 0 {
            return Err(Error::InvalidConfig {
                field: "limits.max_step_per_update",
                value: 0,
            });
        }
        // strictly above, so every out-of-threshold error can demote a lock
        if l.unlock_threshold <= l.lock_threshold {
            return Err(Error::InvalidConfig {
                field: "limits.unlock_threshold",
                value: l.unlock_threshold,
            });
        }
        if l.lock_sample_count == 0 {
            return Err(Error::InvalidConfig {
                field: "limits.lock_sample_count",
                value: 0,
            });
        }
        if l.miss_timeout_samples == 0 {
            return Err(Error::InvalidConfig {
                field: "limits.miss_timeout_samples",
                value: 0,
            });
        }
        for (field, gain) in [
            ("gains.unlocked", self.gains.unlocked),
            ("gains.acquiring", self.gains.acquiring),
            ("gains.locked", self.gains.locked),
        ] {
            if !gain.is_finite() || gain < 0.0 {
                return Err(Error::InvalidCoefficient { field });
            }
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(Error::InvalidCoefficient { field: "alpha" });
        }
        if let TargetPeriod::Fixed(t) = self.target {
            if t < l.min_period || t > l.max_period {
                return Err(Error::InvalidConfig {
                    field: "target",
                    value: t,
                });
            }
        }
        Ok(())
    }
}

/// Loop state, owned and mutated only by the control step.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoopState {
    /// Last accepted feedback interval.
    pub measured_period: u32,
    /// Target minus measured period of the last accepted sample.
    pub phase_error: i32,
    /// Smoothed measured period; zero until the first accepted sample.
    pub filtered_period: f32,
    pub lock_status: LockStatus,
    pub consecutive_good_samples: u32,
    pub missed_sample_count: u32,
}

impl LoopState {
    pub const fn new() -> Self {
        Self {
            measured_period: 0,
            phase_error: 0,
            filtered_period: 0.0,
            lock_status: LockStatus::Unlocked,
            consecutive_good_samples: 0,
            missed_sample_count: 0,
        }
    }
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a sample was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Glitch {
    /// Interval below `min_period`, most likely a spurious extra edge.
    TooShort(u32),
    /// Interval above `max_period`, most likely a missed edge.
    TooLong(u32),
}

/// What one control step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// First edge after start or feedback loss; stored as the timestamp anchor.
    Anchored,
    /// A valid sample; this period and compare value were staged.
    Staged { period: u32, compare: u32 },
    /// The sample was discarded.
    Glitch(Glitch),
    /// No sample this step.
    Missed,
    /// No sample this step, and the miss timeout was reached just now.
    FeedbackLost,
}

/// DPLL controller
pub struct Controller {
    config: DpllConfig,
    state: LoopState,
    /// Timestamp of the last accepted edge.
    anchor: Option<u32>,
    counter_top: u32,
    /// Duty ratio, Q16.
    duty: u32,
    commanded: PwmConfiguration,
    filter_primed: bool,
}

impl Controller {
    /// Creates a controller for a PWM generator started with `initial`.
    ///
    /// The duty ratio `initial.compare / initial.period` is kept for the life
    /// of the controller. `counter_top` is the capture counter's wrap point and
    /// must hold `max_period`.
    pub fn new(config: DpllConfig, initial: PwmConfiguration, counter_top: u32) -> Result<Self, Error> {
        config.validate()?;
        if counter_top < config.limits.max_period {
            return Err(Error::InvalidConfig {
                field: "capture.counter_top",
                value: counter_top,
            });
        }
        if initial.period == 0 {
            return Err(Error::PeriodOutOfRange {
                period: 0,
                max: config.limits.max_period,
            });
        }
        if initial.compare > initial.period {
            return Err(Error::CompareOutOfRange {
                compare: initial.compare,
                period: initial.period,
            });
        }
        let duty = (((initial.compare as u64) << 16) / initial.period as u64) as u32;
        Ok(Self {
            config,
            state: LoopState::new(),
            anchor: None,
            counter_top,
            duty,
            commanded: initial,
            filter_primed: false,
        })
    }

    /// Back to [`LockStatus::Unlocked`] with no anchor, keeping the commanded
    /// output.
    pub fn restart(&mut self) {
        self.state = LoopState::new();
        self.anchor = None;
        self.filter_primed = false;
    }

    /// Runs one control step with at most one new sample.
    pub fn step<T: PwmTimer>(&mut self, sample: Option<CaptureSample>, pwm: &mut PwmGenerator<'_, T>) -> Outcome {
        match sample {
            None => self.miss(),
            Some(sample) => self.sample(sample.timestamp, pwm),
        }
    }

    fn miss(&mut self) -> Outcome {
        let s = &mut self.state;
        s.missed_sample_count = s.missed_sample_count.saturating_add(1);
        if s.missed_sample_count < self.config.limits.miss_timeout_samples {
            return Outcome::Missed;
        }

        if s.lock_status != LockStatus::Unlocked {
            debug!("dpll: {:?} -> Unlocked", s.lock_status);
        }
        s.lock_status = LockStatus::Unlocked;
        s.consecutive_good_samples = 0;
        self.anchor = None;

        if s.missed_sample_count == self.config.limits.miss_timeout_samples {
            warn!(
                "dpll: no feedback for {} steps, holding period {}",
                s.missed_sample_count, self.commanded.period
            );
            Outcome::FeedbackLost
        } else {
            Outcome::Missed
        }
    }

    fn sample<T: PwmTimer>(&mut self, timestamp: u32, pwm: &mut PwmGenerator<'_, T>) -> Outcome {
        let limits = self.config.limits;

        let Some(anchor) = self.anchor else {
            self.anchor = Some(timestamp);
            self.state.missed_sample_count = 0;
            return Outcome::Anchored;
        };

        let measured = ticks_between(anchor, timestamp, self.counter_top);
        if measured < limits.min_period {
            trace!("dpll: interval {} too short, dropped", measured);
            return Outcome::Glitch(Glitch::TooShort(measured));
        }
        if measured > limits.max_period {
            trace!("dpll: interval {} too long, re-anchoring", measured);
            self.anchor = Some(timestamp);
            return Outcome::Glitch(Glitch::TooLong(measured));
        }

        self.anchor = Some(timestamp);

        let target = match self.config.target {
            TargetPeriod::Fixed(t) => t,
            TargetPeriod::Commanded => self.commanded.period,
            TargetPeriod::Filtered if self.filter_primed => round_ticks(self.state.filtered_period) as u32,
            TargetPeriod::Filtered => measured,
        };
        let phase_error = saturate_i32(target as i64 - measured as i64);

        if self.filter_primed {
            let f = self.state.filtered_period;
            self.state.filtered_period = f + self.config.alpha * (measured as f32 - f);
        } else {
            self.state.filtered_period = measured as f32;
            self.filter_primed = true;
        }

        let status = self.state.lock_status;
        let max_step = saturate_i32(limits.max_step_per_update as i64);
        let correction = round_ticks(self.config.gains.get(status) * phase_error as f32).clamp(-max_step, max_step);

        let period = (self.commanded.period as i64 + correction as i64)
            .clamp(limits.min_period as i64, limits.max_period as i64) as u32;
        let compare = self.compare_for(period);

        let next = lock::advance(status, &mut self.state.consecutive_good_samples, phase_error, &limits);
        if next != status {
            debug!("dpll: {:?} -> {:?} (error {})", status, next, phase_error);
        }

        self.state.measured_period = measured;
        self.state.phase_error = phase_error;
        self.state.lock_status = next;
        self.state.missed_sample_count = 0;

        pwm.stage(period, compare);
        self.commanded.period = period;
        self.commanded.compare = compare;

        Outcome::Staged { period, compare }
    }

    /// Compare value keeping the configured duty ratio at `period`.
    pub fn compare_for(&self, period: u32) -> u32 {
        (((period as u64 * self.duty as u64) >> 16) as u32).min(period)
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn lock_status(&self) -> LockStatus {
        self.state.lock_status
    }

    /// Last period and compare value handed to the PWM generator.
    pub fn commanded(&self) -> PwmConfiguration {
        self.commanded
    }

    pub fn anchor(&self) -> Option<u32> {
        self.anchor
    }

    /// Duty ratio, Q16.
    pub fn duty(&self) -> u32 {
        self.duty
    }

    pub fn config(&self) -> &DpllConfig {
        &self.config
    }
}

fn saturate_i32(x: i64) -> i32 {
    x.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

#[cfg(test)]
mod tests;
