//! One-time system bring-up.

use embedded_hal_1::digital::OutputPin;

use crate::capture::CaptureFrontEnd;
use crate::clock::{self, Clocks};
use crate::dispatch::{Dispatcher, Tick};
use crate::dpll::Controller;
use crate::hw::{CaptureTimer, Comparator, Interrupt, InterruptController, PwmTimer, SystemClock, UpdateFlag};
use crate::mailbox::Mailbox;
use crate::pwm::{PwmGenerator, PwmShadow, UpdateHandler};
use crate::{Config, Error};

/// State shared between the foreground and the interrupt handlers.
///
/// ```rust,ignore
/// static SHARED: Shared = Shared::new();
/// ```
pub struct Shared {
    /// Capture interrupt to foreground.
    pub mailbox: Mailbox,
    /// Staged/active PWM values, foreground to update interrupt.
    pub pwm: PwmShadow,
    /// Update interrupt to foreground pacing.
    pub tick: Tick,
}

impl Shared {
    pub const fn new() -> Self {
        Self {
            mailbox: Mailbox::new(),
            pwm: PwmShadow::new(),
            tick: Tick::new(),
        }
    }
}

impl Default for Shared {
    fn default() -> Self {
        Self::new()
    }
}

/// Peripherals handed to [`init`].
pub struct Peripherals<S, P, U, K, C, I> {
    pub clock: S,
    pub pwm_timer: P,
    /// Update-flag handle of `pwm_timer`, for the update interrupt.
    pub pwm_update: U,
    pub capture_timer: K,
    pub comparator: C,
    pub interrupts: I,
}

/// Board pins. Both driver enables are active low.
pub struct Pins<G, D, L> {
    pub gate_driver_enable: G,
    pub line_driver_enable: D,
    pub status_led: L,
}

/// A running system.
pub struct System<'a, P: PwmTimer, U: UpdateFlag, K: CaptureTimer, C: Comparator, I, G, D, L> {
    /// Foreground side; call [`Dispatcher::run`].
    pub dispatcher: Dispatcher<'a, P>,
    /// Feedback interrupt side; call [`CaptureFrontEnd::on_edge`].
    pub capture: CaptureFrontEnd<'a, C, K>,
    /// PWM update interrupt side; call [`UpdateHandler::on_update_event`].
    pub update: UpdateHandler<'a, U>,
    pub clocks: Clocks,
    pub interrupts: I,
    pub pins: Pins<G, D, L>,
}

/// Brings the system up and returns it with interrupts enabled.
///
/// Nothing touches hardware before `config` has been validated. The drivers
/// stay disabled until the PWM timer and the capture path are configured.
#[allow(clippy::type_complexity)]
pub fn init<'a, S, P, U, K, C, I, G, D, L>(
    config: Config,
    p: Peripherals<S, P, U, K, C, I>,
    mut pins: Pins<G, D, L>,
    shared: &'a Shared,
) -> Result<System<'a, P, U, K, C, I, G, D, L>, Error>
where
    S: SystemClock,
    P: PwmTimer,
    U: UpdateFlag,
    K: CaptureTimer,
    C: Comparator,
    I: InterruptController,
    G: OutputPin,
    D: OutputPin,
    L: OutputPin,
{
    config.validate()?;

    let Peripherals {
        clock: mut system_clock,
        pwm_timer,
        pwm_update,
        capture_timer,
        comparator,
        mut interrupts,
    } = p;

    let clocks = clock::init(&mut system_clock, &config.clock)?;

    pins.gate_driver_enable.set_high().map_err(|_| Error::Pin)?;
    pins.line_driver_enable.set_high().map_err(|_| Error::Pin)?;

    let pwm = PwmGenerator::configure(pwm_timer, config.pwm, &shared.pwm)?;
    let update = UpdateHandler::new(pwm_update, &shared.pwm, &shared.tick);
    let capture = CaptureFrontEnd::new(comparator, capture_timer, &shared.mailbox, &config.capture);

    interrupts.enable(Interrupt::FeedbackEdge, config.feedback_priority);
    interrupts.enable(Interrupt::PwmUpdate, config.update_priority);

    pins.line_driver_enable.set_low().map_err(|_| Error::Pin)?;
    pins.gate_driver_enable.set_low().map_err(|_| Error::Pin)?;
    pins.status_led.set_high().map_err(|_| Error::Pin)?;

    let controller = Controller::new(config.dpll, config.pwm, config.capture.counter_top)?;
    let dispatcher = Dispatcher::new(&shared.mailbox, controller, pwm);

    interrupts.enable_global();
    info!("resonant dpll up, target {:?}", config.dpll.target);

    Ok(System {
        dispatcher,
        capture,
        update,
        clocks,
        interrupts,
        pins,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockStage;
    use crate::dpll::LockStatus;
    use crate::hw::Priority;
    use crate::sim::{
        SimCaptureTimer, SimClock, SimComparator, SimInterruptController, SimPin, SimPwmTimer, SimUpdateFlag,
    };
    use crate::time::Hertz;

    type SimPeripherals =
        Peripherals<SimClock, SimPwmTimer, SimUpdateFlag, SimCaptureTimer, SimComparator, SimInterruptController>;

    fn peripherals(clock: SimClock) -> SimPeripherals {
        let pwm_timer = SimPwmTimer::new();
        Peripherals {
            clock,
            pwm_update: pwm_timer.update_flag_handle(),
            pwm_timer,
            capture_timer: SimCaptureTimer::new(),
            comparator: SimComparator::new(),
            interrupts: SimInterruptController::new(),
        }
    }

    fn pins() -> Pins<SimPin, SimPin, SimPin> {
        Pins {
            gate_driver_enable: SimPin::new(),
            line_driver_enable: SimPin::new(),
            status_led: SimPin::new(),
        }
    }

    #[test]
    fn brings_everything_up() {
        let shared = Shared::new();
        let sys = init(Config::default(), peripherals(SimClock::new()), pins(), &shared).unwrap();

        assert_eq!(sys.clocks.timer, Hertz::mhz(136));
        assert!(sys.dispatcher.pwm().timer().running());
        assert_eq!(sys.dispatcher.pwm().timer().active_period(), 1700);
        assert!(sys.capture.comparator().enabled());
        assert!(sys.capture.timer().running());

        assert_eq!(
            sys.interrupts.enabled(),
            &[
                (Interrupt::FeedbackEdge, Priority::P0),
                (Interrupt::PwmUpdate, Priority::P1)
            ]
        );
        assert!(sys.interrupts.global_enabled());

        // disabled during configuration, then enabled
        assert_eq!(sys.pins.gate_driver_enable.history(), &[true, false]);
        assert_eq!(sys.pins.line_driver_enable.history(), &[true, false]);
        assert_eq!(sys.pins.status_led.level(), Some(true));

        assert_eq!(sys.dispatcher.controller().lock_status(), LockStatus::Unlocked);
        assert_eq!(sys.dispatcher.controller().duty(), 1 << 15);
    }

    #[test]
    fn update_interrupt_has_its_own_handle() {
        let shared = Shared::new();
        let mut sys = init(Config::default(), peripherals(SimClock::new()), pins(), &shared).unwrap();
        let writes = sys.dispatcher.pwm().timer().writes().len();

        sys.dispatcher.pwm_mut().timer_mut().update();
        sys.update.on_update_event();

        assert_eq!(sys.update.flag().clears(), 1);
        assert!(!sys.dispatcher.pwm().timer().update_flag());
        assert_eq!(sys.dispatcher.pwm().timer().writes().len(), writes);
        assert_eq!(sys.dispatcher.pwm().update_count(), 1);
        assert!(shared.tick.take());
    }

    #[test]
    fn rounded_dead_time_rejected_against_shortest_period() {
        let shared = Shared::new();
        let mut config = Config::default();
        config.pwm.dead_time = 500;
        config.dpll.limits.min_period = 1001;
        let err = init(config, peripherals(SimClock::new()), pins(), &shared).err();
        assert_eq!(
            err,
            Some(Error::DeadTimeTooLong {
                dead_time: 500,
                period: 1001
            })
        );
    }

    #[test]
    fn invalid_config_touches_nothing() {
        let shared = Shared::new();
        let mut config = Config::default();
        config.pwm.compare = 2000;
        let mut clock = SimClock::new();
        let pwm_timer = SimPwmTimer::new();
        let p = Peripherals {
            clock: &mut clock,
            pwm_update: pwm_timer.update_flag_handle(),
            pwm_timer,
            capture_timer: SimCaptureTimer::new(),
            comparator: SimComparator::new(),
            interrupts: SimInterruptController::new(),
        };
        let mut pins = pins();
        let err = init(
            config,
            p,
            Pins {
                gate_driver_enable: &mut pins.gate_driver_enable,
                line_driver_enable: &mut pins.line_driver_enable,
                status_led: &mut pins.status_led,
            },
            &shared,
        )
        .err();
        assert!(matches!(err, Some(Error::CompareOutOfRange { .. })));
        assert_eq!(clock.configured(), None);
        assert!(pins.gate_driver_enable.history().is_empty());
    }

    #[test]
    fn clock_failure_stops_bring_up() {
        let shared = Shared::new();
        let mut gate = SimPin::new();
        let err = init(
            Config::default(),
            peripherals(SimClock::failing_at(ClockStage::Pll)),
            Pins {
                gate_driver_enable: &mut gate,
                line_driver_enable: SimPin::new(),
                status_led: SimPin::new(),
            },
            &shared,
        )
        .err();
        assert_eq!(err, Some(Error::ClockStartup(ClockStage::Pll)));
        assert_eq!(gate.level(), None);
    }

    #[test]
    fn pin_failure_is_reported() {
        let shared = Shared::new();
        let result = init(
            Config::default(),
            peripherals(SimClock::new()),
            Pins {
                gate_driver_enable: SimPin::new(),
                line_driver_enable: SimPin::new(),
                status_led: SimPin::failing(),
            },
            &shared,
        );
        assert!(matches!(result, Err(Error::Pin)));
    }
}
