//! Typed hardware contracts.
//!
//! The control core never touches registers. Each peripheral it needs is
//! reached through one of the traits below, which expose only the operations
//! the loop actually uses. A board crate implements them over its PAC; the
//! [`sim`](crate::sim) module implements them in software for host tests.

use crate::clock::PllConfig;

/// Output compare mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputCompareMode {
    /// Frozen - comparison has no effect on outputs
    Frozen,
    /// PWM Mode 1 - active when counter < compare value
    PwmMode1,
    /// PWM Mode 2 - inactive when counter < compare value
    PwmMode2,
}

/// Counting mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CountingMode {
    /// Edge-aligned up-counting
    EdgeAlignedUp,
    /// Edge-aligned down-counting
    EdgeAlignedDown,
    /// Center-aligned, compare flags set while counting down.
    ///
    /// The update event fires once per full up/down cycle.
    CenterAligned1,
    /// Center-aligned, compare flags set while counting up.
    CenterAligned2,
    /// Center-aligned, compare flags set in both directions.
    CenterAligned3,
}

/// Signal edge
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignalEdge {
    Rising,
    Falling,
    All,
}

/// Comparator output polarity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    /// Output high while the sensed input is above the reference.
    NonInverted,
    /// Output high while the sensed input is below the reference.
    Inverted,
}

/// Comparator reference (inverting input).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reference {
    /// 1/4 of the internal reference voltage.
    VrefintDiv4,
    /// 1/2 of the internal reference voltage.
    VrefintDiv2,
    /// 3/4 of the internal reference voltage.
    Vrefint3Div4,
    /// The internal reference voltage.
    Vrefint,
    /// Half the supply, the zero-crossing level of an AC-coupled feedback signal.
    VddDiv2,
}

/// Interrupt sources the core cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interrupt {
    /// Comparator edge on the feedback line.
    FeedbackEdge,
    /// PWM timer update event.
    PwmUpdate,
}

/// Interrupt priority. Lower numbers preempt higher ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Priority {
    P0 = 0,
    P1 = 1,
    P2 = 2,
    P3 = 3,
    P4 = 4,
    P5 = 5,
    P6 = 6,
    P7 = 7,
}

/// Dead-time in the encoding of an advanced timer's break/dead-time register.
///
/// The 8-bit DTG field covers four ranges with growing step size:
///
/// | DTG[7:5] | ticks                    | step |
/// |----------|--------------------------|------|
/// | `0xx`    | `DTG[6:0]`               | 1    |
/// | `10x`    | `(64 + DTG[5:0]) * 2`    | 2    |
/// | `110`    | `(32 + DTG[4:0]) * 8`    | 8    |
/// | `111`    | `(32 + DTG[4:0]) * 16`   | 16   |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeadTime {
    bits: u8,
}

impl DeadTime {
    /// Longest encodable dead-time, in timer ticks.
    pub const MAX_TICKS: u32 = 1008;

    /// Encode `ticks`, rounding up to the next representable value.
    ///
    /// Returns `None` above [`Self::MAX_TICKS`].
    pub const fn from_ticks(ticks: u32) -> Option<Self> {
        let bits = match ticks {
            0..=127 => ticks as u8,
            128..=254 => 0b1000_0000 | (ticks.div_ceil(2) - 64) as u8,
            255..=504 => 0b1100_0000 | (ticks.div_ceil(8) - 32) as u8,
            505..=1008 => 0b1110_0000 | (ticks.div_ceil(16) - 32) as u8,
            _ => return None,
        };
        Some(Self { bits })
    }

    /// Raw DTG field value.
    pub const fn bits(self) -> u8 {
        self.bits
    }

    /// Dead-time actually produced, in timer ticks.
    pub const fn ticks(self) -> u32 {
        let b = self.bits as u32;
        if b & 0x80 == 0 {
            b
        } else if b & 0xC0 == 0x80 {
            (64 + (b & 0x3F)) * 2
        } else if b & 0xE0 == 0xC0 {
            (32 + (b & 0x1F)) * 8
        } else {
            (32 + (b & 0x1F)) * 16
        }
    }

    /// Whether the produced dead-time stays below half of `period`.
    pub const fn fits(self, period: u32) -> bool {
        // no rounding on odd periods
        self.ticks() * 2 < period
    }
}

/// Advanced-control timer driving the half-bridge.
///
/// Period and compare writes go to preload registers once preload is enabled;
/// they reach the counter at the next update event.
pub trait PwmTimer {
    /// Largest value the auto-reload register accepts.
    fn max_autoreload(&self) -> u32;

    /// Set counting mode
    fn set_counting_mode(&mut self, mode: CountingMode);

    /// Set output compare mode of the switching channel
    fn set_output_compare_mode(&mut self, mode: OutputCompareMode);

    /// Set output compare preload enable
    fn set_output_compare_preload(&mut self, enable: bool);

    /// Set auto-reload preload enable
    fn set_autoreload_preload(&mut self, enable: bool);

    /// Set auto-reload value (the period)
    fn set_autoreload(&mut self, ticks: u32);

    /// Set compare value (the duty)
    fn set_compare_value(&mut self, ticks: u32);

    /// Set the dead-time inserted between an output and its complement
    fn set_dead_time(&mut self, dead_time: DeadTime);

    /// Enable the channel output and its complementary output
    fn enable_complementary_outputs(&mut self);

    /// Re-arm the outputs automatically at the next update after a break.
    fn set_automatic_output_enable(&mut self, enable: bool);

    /// Enable/disable the update interrupt
    fn enable_update_interrupt(&mut self, enable: bool);

    /// Generate update event
    fn generate_update_event(&mut self);

    /// Start the counter
    fn start(&mut self);
}

/// Update-interrupt side of the PWM timer.
///
/// A board hands this out as its own handle next to the [`PwmTimer`], so the
/// update interrupt never needs the timer the foreground owns. Implementations
/// touch the status register only.
pub trait UpdateFlag {
    /// Clear the update interrupt flag
    fn clear_update_flag(&mut self);
}

/// Free-running timer that timestamps feedback edges.
pub trait CaptureTimer {
    /// Set prescaler
    fn set_prescaler(&mut self, psc: u16);

    /// Set the counter's top value; it wraps to zero after reaching it.
    fn set_autoreload(&mut self, top: u32);

    /// Start the counter
    fn start(&mut self);

    /// Current counter value, read in one access.
    fn counter(&self) -> u32;
}

/// Comparator sensing the feedback zero-crossing.
///
/// Glitch filtering, when the part has it, belongs in the implementation.
pub trait Comparator {
    fn set_reference(&mut self, reference: Reference);

    fn set_output_polarity(&mut self, polarity: Polarity);

    fn enable(&mut self);

    /// Raise one interrupt per qualifying output transition.
    fn listen(&mut self, edge: SignalEdge);

    /// Clear the pending interrupt line.
    fn unpend(&mut self);
}

/// Interrupt controller.
pub trait InterruptController {
    /// Enable `source` at a fixed priority.
    fn enable(&mut self, source: Interrupt, priority: Priority);

    /// Unmask interrupts globally.
    fn enable_global(&mut self);
}

/// System clock tree.
pub trait SystemClock {
    /// Turn on the internal high-speed oscillator.
    fn enable_hsi(&mut self);

    fn hsi_ready(&self) -> bool;

    /// Program flash wait states, bus prescalers and the PLL source/multiplier.
    fn configure_pll(&mut self, pll: &PllConfig);

    fn enable_pll(&mut self);

    fn pll_ready(&self) -> bool;

    /// Switch the system clock to the PLL output.
    fn select_pll(&mut self);

    fn pll_selected(&self) -> bool;
}

impl<T: PwmTimer + ?Sized> PwmTimer for &mut T {
    #[inline]
    fn max_autoreload(&self) -> u32 {
        T::max_autoreload(self)
    }
    #[inline]
    fn set_counting_mode(&mut self, mode: CountingMode) {
        T::set_counting_mode(self, mode)
    }
    #[inline]
    fn set_output_compare_mode(&mut self, mode: OutputCompareMode) {
        T::set_output_compare_mode(self, mode)
    }
    #[inline]
    fn set_output_compare_preload(&mut self, enable: bool) {
        T::set_output_compare_preload(self, enable)
    }
    #[inline]
    fn set_autoreload_preload(&mut self, enable: bool) {
        T::set_autoreload_preload(self, enable)
    }
    #[inline]
    fn set_autoreload(&mut self, ticks: u32) {
        T::set_autoreload(self, ticks)
    }
    #[inline]
    fn set_compare_value(&mut self, ticks: u32) {
        T::set_compare_value(self, ticks)
    }
    #[inline]
    fn set_dead_time(&mut self, dead_time: DeadTime) {
        T::set_dead_time(self, dead_time)
    }
    #[inline]
    fn enable_complementary_outputs(&mut self) {
        T::enable_complementary_outputs(self)
    }
    #[inline]
    fn set_automatic_output_enable(&mut self, enable: bool) {
        T::set_automatic_output_enable(self, enable)
    }
    #[inline]
    fn enable_update_interrupt(&mut self, enable: bool) {
        T::enable_update_interrupt(self, enable)
    }
    #[inline]
    fn generate_update_event(&mut self) {
        T::generate_update_event(self)
    }
    #[inline]
    fn start(&mut self) {
        T::start(self)
    }
}

impl<T: UpdateFlag + ?Sized> UpdateFlag for &mut T {
    #[inline]
    fn clear_update_flag(&mut self) {
        T::clear_update_flag(self)
    }
}

impl<T: CaptureTimer + ?Sized> CaptureTimer for &mut T {
    #[inline]
    fn set_prescaler(&mut self, psc: u16) {
        T::set_prescaler(self, psc)
    }
    #[inline]
    fn set_autoreload(&mut self, top: u32) {
        T::set_autoreload(self, top)
    }
    #[inline]
    fn start(&mut self) {
        T::start(self)
    }
    #[inline]
    fn counter(&self) -> u32 {
        T::counter(self)
    }
}

impl<T: Comparator + ?Sized> Comparator for &mut T {
    #[inline]
    fn set_reference(&mut self, reference: Reference) {
        T::set_reference(self, reference)
    }
    #[inline]
    fn set_output_polarity(&mut self, polarity: Polarity) {
        T::set_output_polarity(self, polarity)
    }
    #[inline]
    fn enable(&mut self) {
        T::enable(self)
    }
    #[inline]
    fn listen(&mut self, edge: SignalEdge) {
        T::listen(self, edge)
    }
    #[inline]
    fn unpend(&mut self) {
        T::unpend(self)
    }
}

impl<T: InterruptController + ?Sized> InterruptController for &mut T {
    #[inline]
    fn enable(&mut self, source: Interrupt, priority: Priority) {
        T::enable(self, source, priority)
    }
    #[inline]
    fn enable_global(&mut self) {
        T::enable_global(self)
    }
}

impl<T: SystemClock + ?Sized> SystemClock for &mut T {
    #[inline]
    fn enable_hsi(&mut self) {
        T::enable_hsi(self)
    }
    #[inline]
    fn hsi_ready(&self) -> bool {
        T::hsi_ready(self)
    }
    #[inline]
    fn configure_pll(&mut self, pll: &PllConfig) {
        T::configure_pll(self, pll)
    }
    #[inline]
    fn enable_pll(&mut self) {
        T::enable_pll(self)
    }
    #[inline]
    fn pll_ready(&self) -> bool {
        T::pll_ready(self)
    }
    #[inline]
    fn select_pll(&mut self) {
        T::select_pll(self)
    }
    #[inline]
    fn pll_selected(&self) -> bool {
        T::pll_selected(self)
    }
}
