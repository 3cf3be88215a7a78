//! Cycle-by-cycle bench: the real dispatcher and capture path against
//! simulated peripherals and a resonant load.

use std::fmt;

use anyhow::{bail, Context, Result};
use resonant_dpll::{
    dispatch::Stats,
    dpll::{LockStatus, Outcome},
    sim::{
        ResonantLoad, SimCaptureTimer, SimClock, SimComparator, SimInterruptController, SimPin, SimPwmTimer,
    },
    startup::{Peripherals, Pins, Shared},
};
use serde::Serialize;

use crate::scenario::Scenario;

/// One row of the `--trace` output.
#[derive(Debug, Serialize)]
pub struct TraceRow {
    pub cycle: u64,
    pub resonant_period: f32,
    /// Ticks from the start of the cycle to the feedback edge.
    pub edge_delay: Option<u32>,
    pub outcome: &'static str,
    pub period: u32,
    pub compare: u32,
    pub measured_period: u32,
    pub phase_error: i32,
    pub filtered_period: f32,
    pub lock: &'static str,
}

#[derive(Debug)]
pub struct Summary {
    pub cycles: u64,
    pub lock: LockStatus,
    /// First cycle at the end of which the loop was locked.
    pub first_lock: Option<u64>,
    pub period: u32,
    pub phase_error: i32,
    pub stats: Stats,
    /// Samples dropped by the mailbox because a newer one arrived first.
    pub overwritten: u32,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cycles:          {}", self.cycles)?;
        writeln!(f, "lock:            {}", lock_name(self.lock))?;
        match self.first_lock {
            Some(cycle) => writeln!(f, "first lock:      cycle {}", cycle)?,
            None => writeln!(f, "first lock:      never")?,
        }
        writeln!(f, "final period:    {}", self.period)?;
        writeln!(f, "phase error:     {}", self.phase_error)?;
        writeln!(f, "samples staged:  {}", self.stats.staged)?;
        writeln!(f, "glitches:        {}", self.stats.glitches)?;
        writeln!(f, "missed cycles:   {}", self.stats.missed)?;
        writeln!(f, "feedback lost:   {}", self.stats.feedback_lost)?;
        write!(f, "overwritten:     {}", self.overwritten)
    }
}

fn lock_name(status: LockStatus) -> &'static str {
    match status {
        LockStatus::Unlocked => "unlocked",
        LockStatus::Acquiring => "acquiring",
        LockStatus::Locked => "locked",
    }
}

fn outcome_name(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Anchored => "anchored",
        Outcome::Staged { .. } => "staged",
        Outcome::Glitch(_) => "glitch",
        Outcome::Missed => "missed",
        Outcome::FeedbackLost => "feedback-lost",
    }
}

/// Runs `scenario` for `cycles` PWM cycles, handing each cycle's row to
/// `on_cycle`.
pub fn run<F>(scenario: &Scenario, cycles: u64, mut on_cycle: F) -> Result<Summary>
where
    F: FnMut(&TraceRow) -> Result<()>,
{
    let shared = Shared::new();
    let pwm_timer = SimPwmTimer::new();
    let peripherals = Peripherals {
        clock: SimClock::new(),
        pwm_update: pwm_timer.update_flag_handle(),
        pwm_timer,
        capture_timer: SimCaptureTimer::new(),
        comparator: SimComparator::new(),
        interrupts: SimInterruptController::new(),
    };
    let pins = Pins {
        gate_driver_enable: SimPin::new(),
        line_driver_enable: SimPin::new(),
        status_led: SimPin::new(),
    };
    let mut system = resonant_dpll::init(scenario.config(), peripherals, pins, &shared)
        .with_context(|| format!("bringing up scenario `{}`", scenario.name))?;
    let mut load = ResonantLoad::new(scenario.load_model());
    let mut first_lock = None;

    for cycle in 0..cycles {
        let period = system.dispatcher.pwm().timer().active_period();
        let resonant_period = load.resonant_period();
        let mut edge = load.next_edge(period);

        if scenario.load.glitches.contains(&cycle) {
            edge = Some(1);
        }

        let capture = &mut system.capture;
        match edge {
            Some(delay) => {
                capture.timer_mut().advance(delay);
                capture.on_edge();
                capture.timer_mut().advance(period - delay);
            }
            None => capture.timer_mut().advance(period),
        }

        // end of cycle: update event, its interrupt, then the foreground step
        system.dispatcher.pwm_mut().timer_mut().update();
        system.update.on_update_event();
        if !shared.tick.take() {
            bail!("cycle {}: update interrupt did not signal the foreground", cycle);
        }
        let outcome = system.dispatcher.poll();

        let controller = system.dispatcher.controller();
        let state = controller.state();
        if first_lock.is_none() && state.lock_status == LockStatus::Locked {
            first_lock = Some(cycle);
        }

        let commanded = controller.commanded();
        on_cycle(&TraceRow {
            cycle,
            resonant_period,
            edge_delay: edge,
            outcome: outcome_name(outcome),
            period: commanded.period,
            compare: commanded.compare,
            measured_period: state.measured_period,
            phase_error: state.phase_error,
            filtered_period: state.filtered_period,
            lock: lock_name(state.lock_status),
        })?;
    }

    let controller = system.dispatcher.controller();
    let summary = Summary {
        cycles,
        lock: controller.lock_status(),
        first_lock,
        period: controller.commanded().period,
        phase_error: controller.state().phase_error,
        stats: system.dispatcher.stats(),
        overwritten: shared.mailbox.overwritten(),
    };
    log::debug!("{:?}", summary);
    Ok(summary)
}
