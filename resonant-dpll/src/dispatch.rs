//! Foreground scheduling loop.
//!
//! One control step runs per scheduling opportunity, that is once per PWM
//! update event. The step takes the pending sample if the mailbox has one and
//! otherwise counts the cycle as missed.
//!
//! ```rust,ignore
//! static SHARED: Shared = Shared::new();
//!
//! // main
//! let system = startup::init(config, peripherals, pins, &SHARED)?;
//! board::install_update_handler(system.update);
//! system.dispatcher.run(&mut WaitForInterrupt::new(&SHARED.tick));
//!
//! // PWM update interrupt: acknowledges, promotes, signals the tick
//! update.on_update_event();
//! ```

use portable_atomic::{AtomicBool, Ordering};

use crate::dpll::{Controller, Outcome};
use crate::hw::PwmTimer;
use crate::mailbox::Mailbox;
use crate::pwm::PwmGenerator;

/// Waits for the next scheduling opportunity.
pub trait Pacer {
    fn wait(&mut self);
}

impl<F: FnMut()> Pacer for F {
    fn wait(&mut self) {
        self()
    }
}

/// Update-event flag, set by [`UpdateHandler`](crate::pwm::UpdateHandler).
pub struct Tick {
    flag: AtomicBool,
}

impl Tick {
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    pub fn signal(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns whether the flag was set, clearing it.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

impl Default for Tick {
    fn default() -> Self {
        Self::new()
    }
}

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        /// Sleeps with `WFI` until the PWM update interrupt has signalled a
        /// [`Tick`]. Feedback edges wake the core too; it goes back to sleep
        /// after their handler returns.
        pub struct WaitForInterrupt<'a> {
            tick: &'a Tick,
        }

        impl<'a> WaitForInterrupt<'a> {
            pub fn new(tick: &'a Tick) -> Self {
                Self { tick }
            }
        }

        impl Pacer for WaitForInterrupt<'_> {
            fn wait(&mut self) {
                loop {
                    // WFI still wakes on a pending interrupt with PRIMASK set,
                    // so a signal between the check and the sleep is not lost.
                    cortex_m::interrupt::disable();
                    let ready = self.tick.take();
                    if !ready {
                        cortex_m::asm::wfi();
                    }
                    // SAFETY: not inside a critical section; interrupts were
                    // enabled on entry.
                    unsafe { cortex_m::interrupt::enable() };
                    if ready {
                        return;
                    }
                }
            }
        }
    }
}

/// Step counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stats {
    pub steps: u32,
    pub staged: u32,
    pub anchored: u32,
    pub glitches: u32,
    pub missed: u32,
    /// Times the miss timeout was reached.
    pub feedback_lost: u32,
}

impl Stats {
    fn record(&mut self, outcome: Outcome) {
        self.steps = self.steps.wrapping_add(1);
        let counter = match outcome {
            Outcome::Anchored => &mut self.anchored,
            Outcome::Staged { .. } => &mut self.staged,
            Outcome::Glitch(_) => &mut self.glitches,
            Outcome::Missed => &mut self.missed,
            Outcome::FeedbackLost => {
                self.missed = self.missed.wrapping_add(1);
                &mut self.feedback_lost
            }
        };
        *counter = counter.wrapping_add(1);
    }
}

/// Runs the controller from the foreground loop.
pub struct Dispatcher<'a, T: PwmTimer> {
    mailbox: &'a Mailbox,
    controller: Controller,
    pwm: PwmGenerator<'a, T>,
    stats: Stats,
}

impl<'a, T: PwmTimer> Dispatcher<'a, T> {
    pub fn new(mailbox: &'a Mailbox, controller: Controller, pwm: PwmGenerator<'a, T>) -> Self {
        Self {
            mailbox,
            controller,
            pwm,
            stats: Stats::default(),
        }
    }

    /// Runs exactly one control step.
    pub fn poll(&mut self) -> Outcome {
        let sample = if self.mailbox.is_pending() {
            self.mailbox.take()
        } else {
            None
        };
        let outcome = self.controller.step(sample, &mut self.pwm);
        self.stats.record(outcome);
        outcome
    }

    /// Waits on `pacer` and polls, forever.
    pub fn run<P: Pacer>(mut self, pacer: &mut P) -> ! {
        info!("dispatcher running");
        loop {
            pacer.wait();
            self.poll();
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    pub fn pwm(&self) -> &PwmGenerator<'a, T> {
        &self.pwm
    }

    pub fn pwm_mut(&mut self) -> &mut PwmGenerator<'a, T> {
        &mut self.pwm
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn mailbox(&self) -> &'a Mailbox {
        self.mailbox
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use super::*;
    use crate::capture::{CaptureSample, Edge};
    use crate::dpll::{DpllConfig, LockStatus};
    use crate::pwm::{PwmConfiguration, UpdateHandler};
    use crate::sim::SimPwmTimer;
    use crate::startup::Shared;

    const INITIAL: PwmConfiguration = PwmConfiguration {
        period: 1700,
        compare: 850,
        dead_time: 68,
    };

    fn dispatcher(shared: &Shared) -> Dispatcher<'_, SimPwmTimer> {
        let pwm = PwmGenerator::configure(SimPwmTimer::new(), INITIAL, &shared.pwm).unwrap();
        let controller = Controller::new(DpllConfig::default(), INITIAL, 0xFFFF).unwrap();
        Dispatcher::new(&shared.mailbox, controller, pwm)
    }

    fn post(mailbox: &Mailbox, timestamp: u32) {
        mailbox.post(CaptureSample {
            timestamp,
            edge: Edge::Rising,
        });
    }

    #[test]
    fn one_step_per_poll() {
        let shared = Shared::new();
        let mb = &shared.mailbox;
        let mut d = dispatcher(&shared);

        assert_eq!(d.poll(), Outcome::Missed);
        post(mb, 100);
        assert_eq!(d.poll(), Outcome::Anchored);
        assert!(!mb.is_pending());
        assert_eq!(d.poll(), Outcome::Missed);
        post(mb, 1800);
        assert!(matches!(d.poll(), Outcome::Staged { .. }));

        let stats = d.stats();
        assert_eq!(stats.steps, 4);
        assert_eq!(stats.missed, 2);
        assert_eq!(stats.anchored, 1);
        assert_eq!(stats.staged, 1);
    }

    #[test]
    fn sample_is_processed_once() {
        let shared = Shared::new();
        let mb = &shared.mailbox;
        let mut d = dispatcher(&shared);
        post(mb, 100);
        d.poll();
        post(mb, 1800);
        d.poll();
        let state = *d.controller().state();
        assert_eq!(d.poll(), Outcome::Missed);
        assert_eq!(d.controller().state().measured_period, state.measured_period);
    }

    #[test]
    fn counts_feedback_loss() {
        let shared = Shared::new();
        let mut d = dispatcher(&shared);
        for _ in 0..DpllConfig::default().limits.miss_timeout_samples {
            d.poll();
        }
        assert_eq!(d.stats().feedback_lost, 1);
        assert_eq!(d.stats().missed, 64);
        assert_eq!(d.controller().lock_status(), LockStatus::Unlocked);
    }

    #[test]
    fn run_polls_after_each_wait() {
        let shared = Shared::new();
        let mb = &shared.mailbox;
        let d = dispatcher(&shared);
        let mut waits = 0;
        let mut pacer = || {
            waits += 1;
            if waits > 5 {
                panic!("stop");
            }
            post(mb, waits * 1700);
        };

        let result = catch_unwind(AssertUnwindSafe(|| d.run(&mut pacer)));
        assert!(result.is_err());
        assert_eq!(waits, 6);
        assert!(!mb.is_pending(), "last posted sample was consumed");
    }

    #[test]
    fn tick_is_taken_once() {
        let tick = Tick::new();
        assert!(!tick.take());
        tick.signal();
        tick.signal();
        assert!(tick.take());
        assert!(!tick.take());
    }

    #[test]
    fn update_interrupt_applies_staged_values_and_paces() {
        let shared = Shared::new();
        let mb = &shared.mailbox;
        let mut d = dispatcher(&shared);
        let mut update = UpdateHandler::new(d.pwm().timer().update_flag_handle(), &shared.pwm, &shared.tick);
        post(mb, 0);
        d.poll();
        post(mb, 1900);
        let Outcome::Staged { period, .. } = d.poll() else {
            panic!("expected a staged update");
        };
        assert_ne!(d.pwm().active().period, period);
        assert!(!shared.tick.take());

        d.pwm_mut().timer_mut().update();
        update.on_update_event();

        assert_eq!(d.pwm().active().period, period);
        assert_eq!(d.pwm().timer().active_period(), period);
        assert_eq!(d.pwm().update_count(), 1);
        assert!(!d.pwm().timer().update_flag());
        assert!(shared.tick.take());
    }
}
