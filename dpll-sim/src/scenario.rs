//! Scenario file: loop configuration plus a description of the load.

use std::{fs, ops::Range, path::Path};

use anyhow::{Context, Result};
use resonant_dpll::{
    dpll::{ControlLimits, Gains, TargetPeriod},
    pwm::PwmConfiguration,
    sim::LoadModel,
    Config,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scenario {
    pub name: String,
    /// Cycles to run when `--cycles` is not given.
    pub cycles: u64,
    pub pwm: PwmSection,
    pub limits: LimitsSection,
    pub gains: GainsSection,
    pub target: Target,
    pub alpha: f32,
    pub load: LoadSection,
}

impl Default for Scenario {
    fn default() -> Self {
        let config = Config::default();
        Self {
            name: String::from("default"),
            cycles: 2000,
            pwm: PwmSection::default(),
            limits: LimitsSection::default(),
            gains: GainsSection::default(),
            target: Target::default(),
            alpha: config.dpll.alpha,
            load: LoadSection::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PwmSection {
    pub period: u32,
    pub compare: u32,
    pub dead_time: u32,
}

impl Default for PwmSection {
    fn default() -> Self {
        let pwm = Config::default().pwm;
        Self {
            period: pwm.period,
            compare: pwm.compare,
            dead_time: pwm.dead_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsSection {
    pub min_period: u32,
    pub max_period: u32,
    pub max_step: u32,
    pub lock_threshold: u32,
    pub unlock_threshold: u32,
    pub lock_count: u32,
    pub miss_timeout: u32,
}

impl Default for LimitsSection {
    fn default() -> Self {
        let l = ControlLimits::default();
        Self {
            min_period: l.min_period,
            max_period: l.max_period,
            max_step: l.max_step_per_update,
            lock_threshold: l.lock_threshold,
            unlock_threshold: l.unlock_threshold,
            lock_count: l.lock_sample_count,
            miss_timeout: l.miss_timeout_samples,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GainsSection {
    pub unlocked: f32,
    pub acquiring: f32,
    pub locked: f32,
}

impl Default for GainsSection {
    fn default() -> Self {
        let g = Gains::default();
        Self {
            unlocked: g.unlocked,
            acquiring: g.acquiring,
            locked: g.locked,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Target {
    Fixed { period: u32 },
    Commanded,
    Filtered,
}

impl Default for Target {
    fn default() -> Self {
        Target::Fixed {
            period: PwmSection::default().period,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadSection {
    pub resonant_period: u32,
    pub drift: f32,
    pub sensitivity: f32,
    pub jitter: u32,
    pub seed: u32,
    /// `[first, last)` cycle windows without feedback.
    pub dropouts: Vec<[u64; 2]>,
    /// Cycles whose feedback edge is replaced by a spurious one right after
    /// the update event.
    pub glitches: Vec<u64>,
}

impl Default for LoadSection {
    fn default() -> Self {
        let m = LoadModel::default();
        Self {
            resonant_period: m.resonant_period,
            drift: m.drift_per_cycle,
            sensitivity: m.sensitivity,
            jitter: m.jitter,
            seed: m.seed,
            dropouts: Vec::new(),
            glitches: Vec::new(),
        }
    }
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_hjson::from_str(text)?)
    }

    /// Firmware configuration for this scenario. Not validated.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.pwm = PwmConfiguration {
            period: self.pwm.period,
            compare: self.pwm.compare,
            dead_time: self.pwm.dead_time,
        };

        let l = &mut config.dpll.limits;
        l.min_period = self.limits.min_period;
        l.max_period = self.limits.max_period;
        l.max_step_per_update = self.limits.max_step;
        l.lock_threshold = self.limits.lock_threshold;
        l.unlock_threshold = self.limits.unlock_threshold;
        l.lock_sample_count = self.limits.lock_count;
        l.miss_timeout_samples = self.limits.miss_timeout;

        config.dpll.gains = Gains {
            unlocked: self.gains.unlocked,
            acquiring: self.gains.acquiring,
            locked: self.gains.locked,
        };
        config.dpll.target = match self.target {
            Target::Fixed { period } => TargetPeriod::Fixed(period),
            Target::Commanded => TargetPeriod::Commanded,
            Target::Filtered => TargetPeriod::Filtered,
        };
        config.dpll.alpha = self.alpha;
        config
    }

    pub fn load_model(&self) -> LoadModel {
        LoadModel {
            resonant_period: self.load.resonant_period,
            drift_per_cycle: self.load.drift,
            sensitivity: self.load.sensitivity,
            jitter: self.load.jitter,
            seed: self.load.seed,
            dropouts: self
                .load
                .dropouts
                .iter()
                .map(|&[start, end]| Range { start, end })
                .collect(),
        }
    }
}
