use super::*;
use crate::capture::Edge;
use crate::pwm::PwmShadow;
use crate::sim::SimPwmTimer;

type Pwm = PwmGenerator<'static, SimPwmTimer>;

fn limits() -> ControlLimits {
    ControlLimits {
        min_period: 1000,
        max_period: 3000,
        max_step_per_update: 150,
        lock_threshold: 10,
        unlock_threshold: 40,
        lock_sample_count: 8,
        miss_timeout_samples: 20,
    }
}

fn config() -> DpllConfig {
    DpllConfig {
        limits: limits(),
        gains: Gains::uniform(0.5),
        target: TargetPeriod::Fixed(1800),
        alpha: 0.25,
    }
}

fn rig(config: DpllConfig) -> (Controller, Pwm) {
    let initial = PwmConfiguration {
        period: 1800,
        compare: 900,
        dead_time: 68,
    };
    let shadow = Box::leak(Box::new(PwmShadow::new()));
    let pwm = PwmGenerator::configure(SimPwmTimer::new(), initial, shadow).unwrap();
    (Controller::new(config, initial, 0xFFFF).unwrap(), pwm)
}

fn at(timestamp: u32) -> Option<CaptureSample> {
    Some(CaptureSample {
        timestamp,
        edge: Edge::Rising,
    })
}

/// Feeds edges `interval` ticks apart, starting right after `last`.
fn feed(
    ctrl: &mut Controller,
    pwm: &mut Pwm,
    last: &mut u32,
    interval: u32,
    count: usize,
) -> Vec<LockStatus> {
    (0..count)
        .map(|_| {
            *last = last.wrapping_add(interval) & 0xFFFF;
            ctrl.step(at(*last), pwm);
            ctrl.lock_status()
        })
        .collect()
}

fn locked_rig() -> (Controller, Pwm, u32) {
    let (mut ctrl, mut pwm) = rig(config());
    let mut t = 100;
    ctrl.step(at(t), &mut pwm);
    feed(&mut ctrl, &mut pwm, &mut t, 1795, 8);
    assert_eq!(ctrl.lock_status(), LockStatus::Locked);
    (ctrl, pwm, t)
}

#[test]
fn proportional_correction() {
    let (mut ctrl, mut pwm) = rig(config());

    assert_eq!(ctrl.step(at(1000), &mut pwm), Outcome::Anchored);
    assert_eq!(
        ctrl.step(at(3000), &mut pwm),
        Outcome::Staged {
            period: 1700,
            compare: 850
        }
    );

    let s = ctrl.state();
    assert_eq!(s.measured_period, 2000);
    assert_eq!(s.phase_error, -200);
    assert_eq!(pwm.staged().period, 1700);
    assert_eq!(pwm.staged().compare, 850);
    assert_eq!(ctrl.commanded().period, 1700);
}

#[test]
fn locks_after_exact_sample_count() {
    let (mut ctrl, mut pwm) = rig(config());
    assert_eq!(ctrl.lock_status(), LockStatus::Unlocked);

    let mut t = 100;
    ctrl.step(at(t), &mut pwm);
    assert_eq!(ctrl.lock_status(), LockStatus::Unlocked);

    // error +5 every sample
    let statuses = feed(&mut ctrl, &mut pwm, &mut t, 1795, 10);
    use LockStatus::*;
    assert_eq!(
        statuses,
        [Acquiring, Acquiring, Acquiring, Acquiring, Acquiring, Acquiring, Acquiring, Locked, Locked, Locked]
    );
    assert_eq!(ctrl.state().phase_error, 5);
}

#[test]
fn bad_sample_resets_streak_while_acquiring() {
    let (mut ctrl, mut pwm) = rig(config());
    let mut t = 0;
    ctrl.step(at(t), &mut pwm);
    feed(&mut ctrl, &mut pwm, &mut t, 1795, 7);
    assert_eq!(ctrl.state().consecutive_good_samples, 7);

    feed(&mut ctrl, &mut pwm, &mut t, 1780, 1);
    assert_eq!(ctrl.state().consecutive_good_samples, 0);
    assert_eq!(ctrl.lock_status(), LockStatus::Acquiring);

    let statuses = feed(&mut ctrl, &mut pwm, &mut t, 1795, 8);
    assert_eq!(statuses[6], LockStatus::Acquiring);
    assert_eq!(statuses[7], LockStatus::Locked);
}

#[test]
fn large_error_demotes_lock() {
    let (mut ctrl, mut pwm, mut t) = locked_rig();

    // measured 1300 against 1800
    feed(&mut ctrl, &mut pwm, &mut t, 1300, 1);
    assert_eq!(ctrl.state().phase_error, 500);
    assert_eq!(ctrl.lock_status(), LockStatus::Acquiring);
    assert_eq!(ctrl.state().consecutive_good_samples, 0);
}

#[test]
fn error_between_thresholds_keeps_lock() {
    let (mut ctrl, mut pwm, mut t) = locked_rig();

    feed(&mut ctrl, &mut pwm, &mut t, 1780, 1);
    assert_eq!(ctrl.state().phase_error, 20);
    assert_eq!(ctrl.lock_status(), LockStatus::Locked);
    assert_eq!(ctrl.state().consecutive_good_samples, 0);

    feed(&mut ctrl, &mut pwm, &mut t, 1760, 1);
    assert_eq!(ctrl.lock_status(), LockStatus::Locked, "40 is not above the unlock threshold");

    feed(&mut ctrl, &mut pwm, &mut t, 1759, 1);
    assert_eq!(ctrl.lock_status(), LockStatus::Acquiring);
}

#[test]
fn feedback_loss_unlocks_and_holds_output() {
    let (mut ctrl, mut pwm, _) = locked_rig();
    let staged = pwm.staged();
    let writes = pwm.timer().writes().len();

    for i in 1..20 {
        assert_eq!(ctrl.step(None, &mut pwm), Outcome::Missed, "step {}", i);
        assert_eq!(ctrl.lock_status(), LockStatus::Locked);
    }
    assert_eq!(ctrl.step(None, &mut pwm), Outcome::FeedbackLost);

    assert_eq!(ctrl.lock_status(), LockStatus::Unlocked);
    assert_eq!(ctrl.state().consecutive_good_samples, 0);
    assert_eq!(ctrl.state().missed_sample_count, 20);
    assert_eq!(ctrl.anchor(), None);
    assert_eq!(pwm.staged(), staged);
    assert_eq!(pwm.timer().writes().len(), writes);

    // further misses stay quiet
    assert_eq!(ctrl.step(None, &mut pwm), Outcome::Missed);
    assert_eq!(ctrl.state().missed_sample_count, 21);
}

#[test]
fn recovers_after_feedback_loss() {
    let (mut ctrl, mut pwm, _) = locked_rig();
    for _ in 0..20 {
        ctrl.step(None, &mut pwm);
    }

    let mut t = 40_000;
    assert_eq!(ctrl.step(at(t), &mut pwm), Outcome::Anchored);
    assert_eq!(ctrl.state().missed_sample_count, 0);
    let statuses = feed(&mut ctrl, &mut pwm, &mut t, 1800, 8);
    assert_eq!(statuses[0], LockStatus::Acquiring);
    assert_eq!(statuses[7], LockStatus::Locked);
}

#[test]
fn short_interval_is_dropped() {
    let (mut ctrl, mut pwm, t) = locked_rig();
    let state = *ctrl.state();
    let staged = pwm.staged();
    let writes = pwm.timer().writes().len();

    assert_eq!(
        ctrl.step(at(t + 400), &mut pwm),
        Outcome::Glitch(Glitch::TooShort(400))
    );
    assert_eq!(*ctrl.state(), state);
    assert_eq!(pwm.staged(), staged);
    assert_eq!(pwm.timer().writes().len(), writes);
    assert_eq!(ctrl.anchor(), Some(t));

    // the next real edge is measured from the old anchor
    assert!(matches!(ctrl.step(at(t + 1800), &mut pwm), Outcome::Staged { .. }));
    assert_eq!(ctrl.state().measured_period, 1800);
}

#[test]
fn long_interval_reanchors() {
    let (mut ctrl, mut pwm, t) = locked_rig();
    let state = *ctrl.state();
    let staged = pwm.staged();

    assert_eq!(
        ctrl.step(at(t + 3600), &mut pwm),
        Outcome::Glitch(Glitch::TooLong(3600))
    );
    assert_eq!(*ctrl.state(), state);
    assert_eq!(pwm.staged(), staged);
    assert_eq!(ctrl.anchor(), Some(t + 3600));

    assert!(matches!(ctrl.step(at(t + 5400), &mut pwm), Outcome::Staged { .. }));
    assert_eq!(ctrl.state().measured_period, 1800);
}

#[test]
fn glitch_does_not_reset_miss_count() {
    let (mut ctrl, mut pwm, t) = locked_rig();
    for _ in 0..5 {
        ctrl.step(None, &mut pwm);
    }
    ctrl.step(at(t + 10), &mut pwm);
    assert_eq!(ctrl.state().missed_sample_count, 5);
}

#[test]
fn correction_and_period_stay_bounded() {
    let config = DpllConfig {
        gains: Gains::uniform(3.0),
        ..config()
    };
    let (mut ctrl, mut pwm) = rig(config);
    let l = config.limits;

    let mut t = 0u32;
    ctrl.step(at(t), &mut pwm);
    let up = (l.min_period..=l.max_period).step_by(37);
    let down = (l.min_period..=l.max_period).rev().step_by(53);
    for interval in up.chain(down) {
        let before = ctrl.commanded().period;
        t = (t + interval) & 0xFFFF;
        match ctrl.step(at(t), &mut pwm) {
            Outcome::Staged { period, compare } => {
                assert!(period.abs_diff(before) <= l.max_step_per_update);
                assert!((l.min_period..=l.max_period).contains(&period));
                assert!(compare <= period);
                assert_eq!(pwm.staged().period, period);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn period_clamped_to_limits() {
    let config = DpllConfig {
        limits: ControlLimits {
            min_period: 1750,
            max_period: 1850,
            ..limits()
        },
        target: TargetPeriod::Fixed(1750),
        ..config()
    };
    let (mut ctrl, mut pwm) = rig(config);
    let mut t = 0;
    ctrl.step(at(t), &mut pwm);
    for _ in 0..5 {
        t += 1850;
        ctrl.step(at(t), &mut pwm);
    }
    assert_eq!(ctrl.commanded().period, 1750);
    assert_eq!(pwm.staged().period, 1750);
}

#[test]
fn interval_across_counter_wrap() {
    let (mut ctrl, mut pwm) = rig(config());
    ctrl.step(at(0xFF00), &mut pwm);
    ctrl.step(at(0x0700), &mut pwm);
    assert_eq!(ctrl.state().measured_period, 0x800);
}

#[test]
fn duty_ratio_is_kept() {
    let (mut ctrl, mut pwm) = rig(config());
    ctrl.step(at(0), &mut pwm);
    ctrl.step(at(2000), &mut pwm);
    let c = pwm.staged();
    assert_eq!(c.compare, c.period / 2);

    let initial = PwmConfiguration {
        period: 1000,
        compare: 250,
        dead_time: 10,
    };
    let ctrl = Controller::new(config(), initial, 0xFFFF).unwrap();
    assert_eq!(ctrl.duty(), 1 << 14);
    assert_eq!(ctrl.compare_for(2000), 500);
}

#[test]
fn commanded_target_follows_output() {
    let config = DpllConfig {
        target: TargetPeriod::Commanded,
        ..config()
    };
    let (mut ctrl, mut pwm) = rig(config);
    ctrl.step(at(0), &mut pwm);
    ctrl.step(at(1800), &mut pwm);
    assert_eq!(ctrl.state().phase_error, 0);
    assert_eq!(ctrl.commanded().period, 1800);

    ctrl.step(at(3700), &mut pwm);
    assert_eq!(ctrl.state().phase_error, -100);
    assert_eq!(ctrl.commanded().period, 1750);
}

#[test]
fn filter_smooths_measurements() {
    let config = DpllConfig {
        target: TargetPeriod::Filtered,
        ..config()
    };
    let (mut ctrl, mut pwm) = rig(config);
    ctrl.step(at(0), &mut pwm);
    ctrl.step(at(2000), &mut pwm);
    assert_eq!(ctrl.state().filtered_period, 2000.0);
    assert_eq!(ctrl.state().phase_error, 0);

    ctrl.step(at(3600), &mut pwm);
    assert_eq!(ctrl.state().phase_error, 400);
    assert_eq!(ctrl.state().filtered_period, 1900.0);
}

#[test]
fn per_state_gains() {
    let config = DpllConfig {
        gains: Gains {
            unlocked: 1.0,
            acquiring: 0.5,
            locked: 0.0,
        },
        ..config()
    };
    let (mut ctrl, mut pwm) = rig(config);
    let mut t = 0;
    ctrl.step(at(t), &mut pwm);

    // evaluated with the unlocked gain
    feed(&mut ctrl, &mut pwm, &mut t, 1900, 1);
    assert_eq!(ctrl.commanded().period, 1700);

    feed(&mut ctrl, &mut pwm, &mut t, 1900, 1);
    assert_eq!(ctrl.commanded().period, 1650);
}

#[test]
fn restart_clears_state_and_keeps_output() {
    let (mut ctrl, mut pwm, _) = locked_rig();
    let commanded = ctrl.commanded();
    ctrl.restart();
    assert_eq!(*ctrl.state(), LoopState::new());
    assert_eq!(ctrl.anchor(), None);
    assert_eq!(ctrl.commanded(), commanded);
    assert_eq!(ctrl.step(at(5), &mut pwm), Outcome::Anchored);
}

#[test]
fn validate_rejects_inconsistent_config() {
    assert_eq!(DpllConfig::default().validate(), Ok(()));
    assert_eq!(config().validate(), Ok(()));

    let mut c = config();
    c.limits.unlock_threshold = 5;
    assert_eq!(
        c.validate(),
        Err(Error::InvalidConfig {
            field: "limits.unlock_threshold",
            value: 5
        })
    );

    let mut c = config();
    c.limits.lock_sample_count = 0;
    assert!(c.validate().is_err());

    let mut c = config();
    c.limits.max_period = 900;
    assert!(c.validate().is_err());

    let mut c = config();
    c.gains.locked = f32::NAN;
    assert_eq!(c.validate(), Err(Error::InvalidCoefficient { field: "gains.locked" }));

    let mut c = config();
    c.alpha = 0.0;
    assert_eq!(c.validate(), Err(Error::InvalidCoefficient { field: "alpha" }));

    let mut c = config();
    c.target = TargetPeriod::Fixed(500);
    assert_eq!(
        c.validate(),
        Err(Error::InvalidConfig {
            field: "target",
            value: 500
        })
    );
}

#[test]
fn equal_thresholds_rejected() {
    let mut c = config();
    c.limits.unlock_threshold = c.limits.lock_threshold;
    assert_eq!(
        c.validate(),
        Err(Error::InvalidConfig {
            field: "limits.unlock_threshold",
            value: 10
        })
    );
    c.limits.unlock_threshold += 1;
    assert_eq!(c.validate(), Ok(()));
}

#[test]
fn new_rejects_invalid_config() {
    let initial = PwmConfiguration {
        period: 1800,
        compare: 900,
        dead_time: 68,
    };

    let mut c = config();
    c.limits.min_period = 3500;
    assert_eq!(
        Controller::new(c, initial, 0xFFFF).err(),
        Some(Error::InvalidConfig {
            field: "limits.max_period",
            value: 3000
        })
    );

    assert_eq!(
        Controller::new(config(), initial, 2999).err(),
        Some(Error::InvalidConfig {
            field: "capture.counter_top",
            value: 2999
        })
    );

    let zero = PwmConfiguration { period: 0, ..initial };
    assert!(matches!(
        Controller::new(config(), zero, 0xFFFF),
        Err(Error::PeriodOutOfRange { .. })
    ));
}
