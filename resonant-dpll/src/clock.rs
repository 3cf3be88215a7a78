//! Clock tree bring-up.
//!
//! The system runs from the internal oscillator through the PLL:
//! SYSCLK = HSI / 2 * 17 = 68 MHz, with HCLK and both PCLKs undivided. The
//! PWM and capture timers are clocked from the doubled PLL output.

use crate::hw::SystemClock;
use crate::time::Hertz;
use crate::utils::poll_until;
use crate::Error;

/// Internal high-speed oscillator frequency.
pub const HSI_FREQ: Hertz = Hertz::mhz(8);

/// Bring-up stage that failed to report ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockStage {
    /// The internal oscillator never became ready.
    Hsi,
    /// The PLL never locked.
    Pll,
    /// The system clock switch never reported the PLL as source.
    Switch,
}

/// PLL input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PllSource {
    /// HSI / 2
    HsiDiv2,
}

/// PLL configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllConfig {
    pub source: PllSource,
    /// Multiplier, 2..=16 on most parts, 17 on those with the extended range.
    pub mul: u8,
    /// Flash wait states required at the resulting SYSCLK.
    pub flash_latency: u8,
    /// Enable the flash prefetch buffer.
    pub prefetch: bool,
}

impl PllConfig {
    /// PLL output for a given oscillator frequency.
    pub const fn output(&self, hsi: Hertz) -> Hertz {
        match self.source {
            PllSource::HsiDiv2 => Hertz(hsi.0 / 2 * self.mul as u32),
        }
    }
}

impl Default for PllConfig {
    fn default() -> Self {
        Self {
            source: PllSource::HsiDiv2,
            mul: 17,
            flash_latency: 1,
            prefetch: true,
        }
    }
}

/// Clock configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockConfig {
    pub pll: PllConfig,
    /// Ready-flag polls allowed per stage before giving up.
    pub startup_timeout: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            pll: PllConfig::default(),
            startup_timeout: 0x500,
        }
    }
}

/// Frequencies in effect after [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Clocks {
    pub sysclk: Hertz,
    /// Kernel clock of the PWM and capture timers (2x PLL).
    pub timer: Hertz,
}

impl Clocks {
    /// Frequencies a given configuration produces.
    pub const fn from_config(config: &ClockConfig) -> Self {
        let sysclk = config.pll.output(HSI_FREQ);
        Self {
            sysclk,
            timer: Hertz(sysclk.0 * 2),
        }
    }
}

/// Starts the HSI, locks the PLL and switches SYSCLK to it.
///
/// Each stage polls its ready flag at most `config.startup_timeout` times.
pub fn init<C: SystemClock>(clock: &mut C, config: &ClockConfig) -> Result<Clocks, Error> {
    clock.enable_hsi();
    poll_until(|| clock.hsi_ready(), config.startup_timeout)
        .map_err(|_| Error::ClockStartup(ClockStage::Hsi))?;

    clock.configure_pll(&config.pll);
    clock.enable_pll();
    poll_until(|| clock.pll_ready(), config.startup_timeout)
        .map_err(|_| Error::ClockStartup(ClockStage::Pll))?;

    clock.select_pll();
    poll_until(|| clock.pll_selected(), config.startup_timeout)
        .map_err(|_| Error::ClockStartup(ClockStage::Switch))?;

    let clocks = Clocks::from_config(config);
    info!("sysclk {} Hz, timer clock {} Hz", clocks.sysclk.0, clocks.timer.0);
    Ok(clocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimClock;

    #[test]
    fn default_is_68_mhz() {
        let clocks = Clocks::from_config(&ClockConfig::default());
        assert_eq!(clocks.sysclk, Hertz::mhz(68));
        assert_eq!(clocks.timer, Hertz::mhz(136));
    }

    #[test]
    fn init_walks_all_stages() {
        let mut clock = SimClock::new();
        let clocks = init(&mut clock, &ClockConfig::default()).unwrap();
        assert_eq!(clocks.sysclk, Hertz::mhz(68));
        assert!(clock.pll_selected());
        assert_eq!(clock.configured(), Some(PllConfig::default()));
    }

    #[test]
    fn init_reports_failed_stage() {
        for stage in [ClockStage::Hsi, ClockStage::Pll, ClockStage::Switch] {
            let mut clock = SimClock::failing_at(stage);
            assert_eq!(
                init(&mut clock, &ClockConfig::default()),
                Err(Error::ClockStartup(stage))
            );
        }
    }

    #[test]
    fn slow_oscillator_within_timeout() {
        let mut clock = SimClock::new().with_ready_delay(10);
        let config = ClockConfig {
            startup_timeout: 11,
            ..ClockConfig::default()
        };
        assert!(init(&mut clock, &config).is_ok());

        let mut clock = SimClock::new().with_ready_delay(10);
        let config = ClockConfig {
            startup_timeout: 10,
            ..ClockConfig::default()
        };
        assert_eq!(
            init(&mut clock, &config),
            Err(Error::ClockStartup(ClockStage::Hsi))
        );
    }
}
