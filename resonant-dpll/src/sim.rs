//! Software implementations of the [`hw`](crate::hw) traits and a resonant
//! load model, for host tests and the bench tool.
//!
//! The simulated PWM timer keeps separate preload and active registers, so
//! staged values only show up in [`SimPwmTimer::active_period`] after
//! [`SimPwmTimer::update`]. Its status flag is shared with the
//! [`SimUpdateFlag`] handles it hands out, as the one register is on silicon.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::Cell;
use core::ops::Range;

use embedded_hal_1::digital::{ErrorKind, ErrorType, OutputPin};

use crate::clock::{ClockStage, PllConfig};
use crate::hw::{
    CaptureTimer, Comparator, CountingMode, DeadTime, Interrupt, InterruptController, OutputCompareMode, Polarity,
    Priority, PwmTimer, Reference, SignalEdge, SystemClock, UpdateFlag,
};

/// A configuration write seen by [`SimPwmTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmWrite {
    CountingMode(CountingMode),
    OutputCompareMode(OutputCompareMode),
    OutputComparePreload(bool),
    AutoreloadPreload(bool),
    Autoreload(u32),
    Compare(u32),
    DeadTime(DeadTime),
    ComplementaryOutputs,
    AutomaticOutputEnable(bool),
    UpdateInterrupt(bool),
    UpdateEvent,
    Start,
}

/// 16-bit advanced timer.
#[derive(Debug, Default)]
pub struct SimPwmTimer {
    writes: Vec<PwmWrite>,
    counting_mode: Option<CountingMode>,
    arr_preload: bool,
    ccr_preload: bool,
    preload_arr: u32,
    preload_ccr: u32,
    active_arr: u32,
    active_ccr: u32,
    dead_time: Option<DeadTime>,
    outputs: bool,
    running: bool,
    update_flag: Rc<Cell<bool>>,
    updates: u32,
}

impl SimPwmTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hardware update event: preload to active transfer, flag set.
    pub fn update(&mut self) {
        self.transfer();
        self.update_flag.set(true);
        self.updates = self.updates.wrapping_add(1);
    }

    fn transfer(&mut self) {
        self.active_arr = self.preload_arr;
        self.active_ccr = self.preload_ccr;
    }

    pub fn writes(&self) -> &[PwmWrite] {
        &self.writes
    }

    pub fn active_period(&self) -> u32 {
        self.active_arr
    }

    pub fn active_compare(&self) -> u32 {
        self.active_ccr
    }

    pub fn preload_period(&self) -> u32 {
        self.preload_arr
    }

    pub fn update_flag(&self) -> bool {
        self.update_flag.get()
    }

    /// Handle on the update flag for the update interrupt.
    pub fn update_flag_handle(&self) -> SimUpdateFlag {
        SimUpdateFlag {
            flag: self.update_flag.clone(),
            clears: 0,
        }
    }

    /// Hardware update events so far.
    pub fn update_count(&self) -> u32 {
        self.updates
    }

    pub fn dead_time(&self) -> Option<DeadTime> {
        self.dead_time
    }

    pub fn counting_mode(&self) -> Option<CountingMode> {
        self.counting_mode
    }

    pub fn outputs_enabled(&self) -> bool {
        self.outputs
    }

    pub fn running(&self) -> bool {
        self.running
    }
}

impl PwmTimer for SimPwmTimer {
    fn max_autoreload(&self) -> u32 {
        0xFFFF
    }

    fn set_counting_mode(&mut self, mode: CountingMode) {
        self.writes.push(PwmWrite::CountingMode(mode));
        self.counting_mode = Some(mode);
    }

    fn set_output_compare_mode(&mut self, mode: OutputCompareMode) {
        self.writes.push(PwmWrite::OutputCompareMode(mode));
    }

    fn set_output_compare_preload(&mut self, enable: bool) {
        self.writes.push(PwmWrite::OutputComparePreload(enable));
        self.ccr_preload = enable;
    }

    fn set_autoreload_preload(&mut self, enable: bool) {
        self.writes.push(PwmWrite::AutoreloadPreload(enable));
        self.arr_preload = enable;
    }

    fn set_autoreload(&mut self, ticks: u32) {
        self.writes.push(PwmWrite::Autoreload(ticks));
        self.preload_arr = ticks;
        if !self.arr_preload {
            self.active_arr = ticks;
        }
    }

    fn set_compare_value(&mut self, ticks: u32) {
        self.writes.push(PwmWrite::Compare(ticks));
        self.preload_ccr = ticks;
        if !self.ccr_preload {
            self.active_ccr = ticks;
        }
    }

    fn set_dead_time(&mut self, dead_time: DeadTime) {
        self.writes.push(PwmWrite::DeadTime(dead_time));
        self.dead_time = Some(dead_time);
    }

    fn enable_complementary_outputs(&mut self) {
        self.writes.push(PwmWrite::ComplementaryOutputs);
        self.outputs = true;
    }

    fn set_automatic_output_enable(&mut self, enable: bool) {
        self.writes.push(PwmWrite::AutomaticOutputEnable(enable));
    }

    fn enable_update_interrupt(&mut self, enable: bool) {
        self.writes.push(PwmWrite::UpdateInterrupt(enable));
    }

    fn generate_update_event(&mut self) {
        self.writes.push(PwmWrite::UpdateEvent);
        self.transfer();
    }

    fn start(&mut self) {
        self.writes.push(PwmWrite::Start);
        self.running = true;
    }
}

/// Update-flag handle of a [`SimPwmTimer`].
#[derive(Debug)]
pub struct SimUpdateFlag {
    flag: Rc<Cell<bool>>,
    clears: u32,
}

impl SimUpdateFlag {
    pub fn clears(&self) -> u32 {
        self.clears
    }
}

impl UpdateFlag for SimUpdateFlag {
    fn clear_update_flag(&mut self) {
        self.flag.set(false);
        self.clears = self.clears.wrapping_add(1);
    }
}

/// Free-running capture counter.
#[derive(Debug)]
pub struct SimCaptureTimer {
    counter: u32,
    top: u32,
    prescaler: u16,
    running: bool,
}

impl SimCaptureTimer {
    pub fn new() -> Self {
        Self {
            counter: 0,
            top: 0xFFFF,
            prescaler: 0,
            running: false,
        }
    }

    /// Lets `ticks` counter ticks pass. Does nothing while stopped.
    pub fn advance(&mut self, ticks: u32) {
        if self.running {
            let modulus = self.top as u64 + 1;
            self.counter = ((self.counter as u64 + ticks as u64) % modulus) as u32;
        }
    }

    pub fn top(&self) -> u32 {
        self.top
    }

    pub fn prescaler(&self) -> u16 {
        self.prescaler
    }

    pub fn running(&self) -> bool {
        self.running
    }
}

impl Default for SimCaptureTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureTimer for SimCaptureTimer {
    fn set_prescaler(&mut self, psc: u16) {
        self.prescaler = psc;
    }

    fn set_autoreload(&mut self, top: u32) {
        self.top = top;
        self.counter = self.counter.min(top);
    }

    fn start(&mut self) {
        self.running = true;
    }

    fn counter(&self) -> u32 {
        self.counter
    }
}

#[derive(Debug, Default)]
pub struct SimComparator {
    reference: Option<Reference>,
    polarity: Option<Polarity>,
    enabled: bool,
    listening: Option<SignalEdge>,
    unpends: u32,
}

impl SimComparator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reference(&self) -> Option<Reference> {
        self.reference
    }

    pub fn polarity(&self) -> Option<Polarity> {
        self.polarity
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn listening(&self) -> Option<SignalEdge> {
        self.listening
    }

    pub fn unpend_count(&self) -> u32 {
        self.unpends
    }
}

impl Comparator for SimComparator {
    fn set_reference(&mut self, reference: Reference) {
        self.reference = Some(reference);
    }

    fn set_output_polarity(&mut self, polarity: Polarity) {
        self.polarity = Some(polarity);
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    fn listen(&mut self, edge: SignalEdge) {
        self.listening = Some(edge);
    }

    fn unpend(&mut self) {
        self.unpends += 1;
    }
}

#[derive(Debug, Default)]
pub struct SimInterruptController {
    enabled: Vec<(Interrupt, Priority)>,
    global: bool,
}

impl SimInterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sources in the order they were enabled.
    pub fn enabled(&self) -> &[(Interrupt, Priority)] {
        &self.enabled
    }

    pub fn priority_of(&self, source: Interrupt) -> Option<Priority> {
        self.enabled.iter().find(|(s, _)| *s == source).map(|(_, p)| *p)
    }

    pub fn global_enabled(&self) -> bool {
        self.global
    }
}

impl InterruptController for SimInterruptController {
    fn enable(&mut self, source: Interrupt, priority: Priority) {
        self.enabled.retain(|(s, _)| *s != source);
        self.enabled.push((source, priority));
    }

    fn enable_global(&mut self) {
        self.global = true;
    }
}

/// Clock tree whose ready flags come up after a configurable number of polls.
#[derive(Debug, Default)]
pub struct SimClock {
    fail: Option<ClockStage>,
    ready_delay: u32,
    polls: Cell<u32>,
    hsi: bool,
    pll: bool,
    selected: bool,
    configured: Option<PllConfig>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock tree that never gets past `stage`.
    pub fn failing_at(stage: ClockStage) -> Self {
        Self {
            fail: Some(stage),
            ..Self::default()
        }
    }

    /// Every ready flag reads false for the first `polls` polls of its stage.
    pub fn with_ready_delay(mut self, polls: u32) -> Self {
        self.ready_delay = polls;
        self
    }

    pub fn configured(&self) -> Option<PllConfig> {
        self.configured
    }

    fn ready(&self, stage: ClockStage) -> bool {
        if self.fail == Some(stage) {
            return false;
        }
        let n = self.polls.get() + 1;
        self.polls.set(n);
        n > self.ready_delay
    }
}

impl SystemClock for SimClock {
    fn enable_hsi(&mut self) {
        self.hsi = true;
        self.polls.set(0);
    }

    fn hsi_ready(&self) -> bool {
        self.hsi && self.ready(ClockStage::Hsi)
    }

    fn configure_pll(&mut self, pll: &PllConfig) {
        self.configured = Some(*pll);
    }

    fn enable_pll(&mut self) {
        self.pll = true;
        self.polls.set(0);
    }

    fn pll_ready(&self) -> bool {
        self.pll && self.ready(ClockStage::Pll)
    }

    fn select_pll(&mut self) {
        self.selected = true;
        self.polls.set(0);
    }

    fn pll_selected(&self) -> bool {
        self.selected && self.ready(ClockStage::Switch)
    }
}

/// Error of a [`SimPin`] built with [`SimPin::failing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimPinError;

impl embedded_hal_1::digital::Error for SimPinError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Output pin recording its level history.
#[derive(Debug, Default)]
pub struct SimPin {
    history: Vec<bool>,
    fail: bool,
}

impl SimPin {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pin whose every write fails.
    pub fn failing() -> Self {
        Self {
            history: Vec::new(),
            fail: true,
        }
    }

    /// Last level written, `None` if never driven.
    pub fn level(&self) -> Option<bool> {
        self.history.last().copied()
    }

    pub fn history(&self) -> &[bool] {
        &self.history
    }

    fn drive(&mut self, high: bool) -> Result<(), SimPinError> {
        if self.fail {
            return Err(SimPinError);
        }
        self.history.push(high);
        Ok(())
    }
}

impl ErrorType for SimPin {
    type Error = SimPinError;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true)
    }
}

/// Behaviour of a driven resonant tank.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadModel {
    /// Natural period at cycle 0, in capture ticks.
    pub resonant_period: u32,
    /// Change of the natural period per PWM cycle, in ticks.
    pub drift_per_cycle: f32,
    /// Extra feedback delay per tick of drive period above resonance.
    pub sensitivity: f32,
    /// Peak timing jitter of the zero-crossing, in ticks.
    pub jitter: u32,
    pub seed: u32,
    /// Cycles during which the comparator sees no crossing.
    pub dropouts: Vec<Range<u64>>,
}

impl Default for LoadModel {
    fn default() -> Self {
        Self {
            resonant_period: 1700,
            drift_per_cycle: 0.0,
            sensitivity: 0.5,
            jitter: 0,
            seed: 0x1234_5678,
            dropouts: Vec::new(),
        }
    }
}

/// Resonant load seen through the feedback comparator.
///
/// The zero-crossing of each drive cycle lags the start of the cycle by a
/// quarter period, plus `sensitivity` ticks per tick the drive is detuned
/// above resonance, plus jitter.
#[derive(Debug, Clone)]
pub struct ResonantLoad {
    model: LoadModel,
    cycle: u64,
    rng: u32,
}

impl ResonantLoad {
    pub fn new(model: LoadModel) -> Self {
        let rng = if model.seed == 0 { 1 } else { model.seed };
        Self { model, cycle: 0, rng }
    }

    /// Natural period at the current cycle.
    pub fn resonant_period(&self) -> f32 {
        self.model.resonant_period as f32 + self.model.drift_per_cycle * self.cycle as f32
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Ticks from the start of the next `period`-tick drive cycle to its
    /// feedback edge, or `None` when the cycle falls in a dropout window.
    pub fn next_edge(&mut self, period: u32) -> Option<u32> {
        let cycle = self.cycle;
        let resonant = self.resonant_period();
        self.cycle += 1;
        let jitter = self.jitter();

        if self.model.dropouts.iter().any(|r| r.contains(&cycle)) {
            return None;
        }

        let lag = period as f32 / 4.0 + self.model.sensitivity * (period as f32 - resonant) + jitter as f32;
        let max = period.saturating_sub(1) as f32;
        Some(lag.clamp(0.0, max) as u32)
    }

    /// Uniform in `-jitter..=jitter`.
    fn jitter(&mut self) -> i32 {
        // xorshift32
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;

        let span = self.model.jitter as u64 * 2 + 1;
        (x as u64 % span) as i32 - self.model.jitter as i32
    }
}
