#![cfg_attr(not(test), no_std)]
#![doc = include_str!("../README.md")]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

#[cfg(any(test, feature = "sim"))]
extern crate alloc;

mod utils;

pub mod capture;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod dpll;
mod error;
pub mod hw;
pub mod mailbox;
pub mod pwm;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod startup;
pub mod time;

// Reexports
pub use config::Config;
pub use error::Error;
pub use startup::init;
