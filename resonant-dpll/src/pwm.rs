//! Center-aligned complementary PWM with dead-time.
//!
//! The generator owns the switching timer. After [`PwmGenerator::configure`]
//! the only runtime operation is [`PwmGenerator::stage`], which writes the
//! preload registers; the hardware moves them to the active registers at the
//! next update event, so an output period is never built from a mix of old and
//! new values.
//!
//! The update interrupt runs an [`UpdateHandler`]. It owns the timer's
//! [`UpdateFlag`] handle only and shares the staged/active bookkeeping with the
//! generator through a [`PwmShadow`].
//!
//! ```rust,ignore
//! static SHADOW: PwmShadow = PwmShadow::new();
//! static TICK: Tick = Tick::new();
//!
//! let pwm = PwmGenerator::configure(board_pwm_timer, initial, &SHADOW)?;
//! let mut update = UpdateHandler::new(board_update_flag, &SHADOW, &TICK);
//!
//! // PWM update interrupt
//! update.on_update_event();
//! ```

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use portable_atomic::{AtomicU32, Ordering};

use crate::dispatch::Tick;
use crate::hw::{CountingMode, DeadTime, OutputCompareMode, PwmTimer, UpdateFlag};
use crate::time::Hertz;
use crate::Error;

/// Period, compare and dead-time of the switching timer, in timer ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmConfiguration {
    /// Auto-reload value. In center-aligned mode one switching period is
    /// `2 * period` timer ticks.
    pub period: u32,
    pub compare: u32,
    pub dead_time: u32,
}

impl PwmConfiguration {
    const ZERO: Self = Self {
        period: 0,
        compare: 0,
        dead_time: 0,
    };

    /// Checks the configuration against a timer whose auto-reload register
    /// holds at most `max_period`, and encodes the dead-time.
    pub fn validate(&self, max_period: u32) -> Result<DeadTime, Error> {
        if self.period == 0 || self.period > max_period {
            return Err(Error::PeriodOutOfRange {
                period: self.period,
                max: max_period,
            });
        }
        if self.compare > self.period {
            return Err(Error::CompareOutOfRange {
                compare: self.compare,
                period: self.period,
            });
        }
        let dead_time = DeadTime::from_ticks(self.dead_time).ok_or(Error::DeadTimeUnrepresentable {
            dead_time: self.dead_time,
        })?;
        if !dead_time.fits(self.period) {
            return Err(Error::DeadTimeTooLong {
                dead_time: self.dead_time,
                period: self.period,
            });
        }
        Ok(dead_time)
    }
}

/// Auto-reload value giving switching frequency `f_sw` in center-aligned mode.
pub const fn period_ticks(timer_clock: Hertz, f_sw: Hertz) -> u32 {
    timer_clock.0 / (2 * f_sw.0)
}

/// Switching frequency produced by auto-reload value `period`.
pub const fn switching_frequency(timer_clock: Hertz, period: u32) -> Hertz {
    Hertz(timer_clock.0 / (2 * period))
}

#[derive(Clone, Copy)]
struct Shadow {
    staged: PwmConfiguration,
    active: PwmConfiguration,
    pending: bool,
}

/// Staged and active PWM values, shared by the generator and the update
/// interrupt. Lives in a `static`.
pub struct PwmShadow {
    inner: Mutex<CriticalSectionRawMutex, Cell<Shadow>>,
    updates: AtomicU32,
}

impl PwmShadow {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(Shadow {
                staged: PwmConfiguration::ZERO,
                active: PwmConfiguration::ZERO,
                pending: false,
            })),
            updates: AtomicU32::new(0),
        }
    }

    fn reset(&self, initial: PwmConfiguration) {
        self.inner.lock(|s| {
            s.set(Shadow {
                staged: initial,
                active: initial,
                pending: false,
            })
        });
        self.updates.store(0, Ordering::Relaxed);
    }

    fn stage(&self, period: u32, compare: u32) {
        self.inner.lock(|s| {
            let mut shadow = s.get();
            shadow.staged.period = period;
            shadow.staged.compare = compare;
            shadow.pending = true;
            s.set(shadow);
        });
    }

    fn promote(&self) {
        self.inner.lock(|s| {
            let mut shadow = s.get();
            if shadow.pending {
                shadow.active = shadow.staged;
                shadow.pending = false;
                s.set(shadow);
            }
        });
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Configuration most recently staged.
    pub fn staged(&self) -> PwmConfiguration {
        self.inner.lock(|s| s.get().staged)
    }

    /// Configuration in effect as of the last handled update event.
    pub fn active(&self) -> PwmConfiguration {
        self.inner.lock(|s| s.get().active)
    }

    /// Update events handled since the generator was configured.
    pub fn update_count(&self) -> u32 {
        self.updates.load(Ordering::Relaxed)
    }
}

impl Default for PwmShadow {
    fn default() -> Self {
        Self::new()
    }
}

/// PWM generator
pub struct PwmGenerator<'a, T: PwmTimer> {
    timer: T,
    dead_time: DeadTime,
    shadow: &'a PwmShadow,
}

impl<'a, T: PwmTimer> PwmGenerator<'a, T> {
    /// Validates `initial` and brings the timer up, outputs running.
    pub fn configure(mut timer: T, initial: PwmConfiguration, shadow: &'a PwmShadow) -> Result<Self, Error> {
        let dead_time = initial.validate(timer.max_autoreload())?;
        shadow.reset(initial);

        timer.set_output_compare_mode(OutputCompareMode::PwmMode1);
        timer.set_output_compare_preload(true);
        timer.set_autoreload(initial.period);
        timer.set_compare_value(initial.compare);
        timer.set_autoreload_preload(true);
        timer.set_counting_mode(CountingMode::CenterAligned1);
        timer.enable_update_interrupt(true);
        timer.enable_complementary_outputs();
        // Load the preload registers before the counter starts.
        timer.generate_update_event();
        timer.start();
        timer.set_dead_time(dead_time);
        timer.set_automatic_output_enable(true);

        info!(
            "pwm: period {} compare {} dead-time {} ticks",
            initial.period,
            initial.compare,
            dead_time.ticks()
        );

        Ok(Self {
            timer,
            dead_time,
            shadow,
        })
    }

    /// Writes a new period and compare value to the preload registers.
    ///
    /// The caller keeps `compare <= period` and `dead_time < period / 2`.
    pub fn stage(&mut self, period: u32, compare: u32) {
        debug_assert!(period > 0 && period <= self.timer.max_autoreload());
        debug_assert!(compare <= period);
        debug_assert!(self.dead_time.fits(period));

        self.timer.set_autoreload(period);
        self.timer.set_compare_value(compare);
        self.shadow.stage(period, compare);
    }

    /// Configuration most recently written by [`stage`](Self::stage).
    pub fn staged(&self) -> PwmConfiguration {
        self.shadow.staged()
    }

    /// Configuration in effect as of the last handled update event.
    pub fn active(&self) -> PwmConfiguration {
        self.shadow.active()
    }

    /// Encoded dead-time; its tick count may be above the requested one.
    pub fn dead_time(&self) -> DeadTime {
        self.dead_time
    }

    /// Update events handled by the [`UpdateHandler`].
    pub fn update_count(&self) -> u32 {
        self.shadow.update_count()
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    pub fn release(self) -> T {
        self.timer
    }
}

/// PWM update interrupt handler.
pub struct UpdateHandler<'a, U: UpdateFlag> {
    flag: U,
    shadow: &'a PwmShadow,
    tick: &'a Tick,
}

impl<'a, U: UpdateFlag> UpdateHandler<'a, U> {
    pub fn new(flag: U, shadow: &'a PwmShadow, tick: &'a Tick) -> Self {
        Self { flag, shadow, tick }
    }

    /// Acknowledges the update flag, records that the staged values are now
    /// active and wakes the foreground. No control logic runs here.
    #[inline]
    pub fn on_update_event(&mut self) {
        self.flag.clear_update_flag();
        self.shadow.promote();
        self.tick.signal();
    }

    pub fn flag(&self) -> &U {
        &self.flag
    }
}
