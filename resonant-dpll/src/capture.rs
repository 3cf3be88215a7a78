//! Feedback edge capture.
//!
//! The comparator fires an interrupt on each qualifying edge of the feedback
//! signal; [`CaptureFrontEnd::on_edge`] timestamps it with the free-running
//! capture counter and posts it to the [`Mailbox`].

use crate::hw::{CaptureTimer, Comparator, Polarity, Reference, SignalEdge};
use crate::mailbox::Mailbox;

/// Feedback edge direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    Rising,
    Falling,
}

impl From<Edge> for SignalEdge {
    fn from(edge: Edge) -> Self {
        match edge {
            Edge::Rising => SignalEdge::Rising,
            Edge::Falling => SignalEdge::Falling,
        }
    }
}

/// One timestamped feedback edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CaptureSample {
    /// Capture counter value when the edge was seen.
    pub timestamp: u32,
    pub edge: Edge,
}

/// Capture front-end configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CaptureConfig {
    /// Last counter value before it wraps to zero.
    pub counter_top: u32,
    /// Prescaler register value; the counter ticks at `f_timer / (prescaler + 1)`.
    ///
    /// With the PWM timer in center-aligned mode one switching period spans
    /// `2 * period` kernel ticks, so a prescaler of 1 makes measured intervals
    /// directly comparable to PWM periods.
    pub prescaler: u16,
    pub reference: Reference,
    pub polarity: Polarity,
    pub edge: Edge,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            counter_top: 0xFFFF,
            prescaler: 1,
            reference: Reference::VddDiv2,
            polarity: Polarity::NonInverted,
            edge: Edge::Rising,
        }
    }
}

/// Ticks from `earlier` to `later` on a counter that wraps after `top`.
///
/// Intervals longer than one full wrap alias; keep `top` above the longest
/// period of interest.
#[inline]
pub const fn ticks_between(earlier: u32, later: u32, top: u32) -> u32 {
    if later >= earlier {
        later - earlier
    } else {
        (top - earlier) + later + 1
    }
}

/// Comparator plus capture timer, owned by the feedback interrupt.
pub struct CaptureFrontEnd<'a, C: Comparator, K: CaptureTimer> {
    comparator: C,
    timer: K,
    mailbox: &'a Mailbox,
    edge: Edge,
}

impl<'a, C: Comparator, K: CaptureTimer> CaptureFrontEnd<'a, C, K> {
    /// Enables the comparator on `config.edge`, then starts the capture counter.
    pub fn new(mut comparator: C, mut timer: K, mailbox: &'a Mailbox, config: &CaptureConfig) -> Self {
        comparator.set_reference(config.reference);
        comparator.set_output_polarity(config.polarity);
        comparator.enable();
        comparator.listen(config.edge.into());

        timer.set_prescaler(config.prescaler);
        timer.set_autoreload(config.counter_top);
        timer.start();

        debug!(
            "capture: top {} prescaler {} edge {:?}",
            config.counter_top, config.prescaler, config.edge
        );

        Self {
            comparator,
            timer,
            mailbox,
            edge: config.edge,
        }
    }

    /// Feedback interrupt handler body.
    #[inline]
    pub fn on_edge(&mut self) {
        let timestamp = self.timer.counter();
        self.comparator.unpend();
        self.mailbox.post(CaptureSample {
            timestamp,
            edge: self.edge,
        });
    }

    pub fn mailbox(&self) -> &'a Mailbox {
        self.mailbox
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    pub fn timer(&self) -> &K {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut K {
        &mut self.timer
    }
}
