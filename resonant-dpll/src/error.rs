//! Startup errors

use core::fmt;

use crate::clock::ClockStage;

/// Fatal configuration error.
///
/// Every variant is detected once, during bring-up, before the control loop
/// starts. Nothing in steady operation returns an `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// Dead-time is not shorter than half the switching period.
    DeadTimeTooLong { dead_time: u32, period: u32 },
    /// The dead-time generator cannot encode this many ticks.
    DeadTimeUnrepresentable { dead_time: u32 },
    /// Compare value lies above the period.
    CompareOutOfRange { compare: u32, period: u32 },
    /// Period is zero or does not fit the timer's counter.
    PeriodOutOfRange { period: u32, max: u32 },
    /// A numeric configuration field is out of range.
    InvalidConfig { field: &'static str, value: u32 },
    /// A gain or filter coefficient is negative, not finite, or out of range.
    InvalidCoefficient { field: &'static str },
    /// The clock tree did not come up.
    ClockStartup(ClockStage),
    /// Driving a driver-enable or status pin failed.
    Pin,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DeadTimeTooLong { dead_time, period } => write!(
                f,
                "dead-time of {} ticks is not below half of the {} tick period",
                dead_time, period
            ),
            Error::DeadTimeUnrepresentable { dead_time } => {
                write!(f, "dead-time of {} ticks cannot be encoded", dead_time)
            }
            Error::CompareOutOfRange { compare, period } => {
                write!(f, "compare value {} exceeds period {}", compare, period)
            }
            Error::PeriodOutOfRange { period, max } => {
                write!(f, "period {} outside 1..={}", period, max)
            }
            Error::InvalidConfig { field, value } => {
                write!(f, "invalid value {} for `{}`", value, field)
            }
            Error::InvalidCoefficient { field } => write!(f, "invalid coefficient `{}`", field),
            Error::ClockStartup(stage) => write!(f, "clock startup failed: {:?}", stage),
            Error::Pin => write!(f, "output pin error"),
        }
    }
}

impl core::error::Error for Error {}
