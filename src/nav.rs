//! Calibration/tracking state machine.
//!
//! A periodic worker calls [`Navigator::tick`]; each tick runs one engine
//! step: the requested next state becomes current and its handler runs once.
//! Handlers compare the current and previous state to detect entry.
//! Callers steer the machine with [`Navigator::set_state`], which is checked
//! against [`TRANSITIONS`], and block on [`Navigator::wait_cal_event`] for
//! calibration progress.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;

use crate::device::InsDevice;
use crate::drivers::SensorBus;
use crate::error::InsError;
use crate::ins::calibration::{CalStatus, CalibrationFloat};
use crate::ins::CalTarget;
use crate::state::{CalEvent, StateEstimate};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum NavState {
    Idle = 0,
    MagCal,
    AccelCal,
    DcmInit,
    Active,
    Error,
    CalSampleComplete,
    CalComplete,
}

pub const NAV_STATES: usize = 8;

const T: bool = true;
const F: bool = false;

/// `TRANSITIONS[from][to]`, indexed by `NavState as usize`.
#[rustfmt::skip]
pub const TRANSITIONS: [[bool; NAV_STATES]; NAV_STATES] = [
    //  Idle MagC AccC Init Actv Err  Smp  Done
    [   T,   T,   T,   T,   T,   F,   F,   F ], // Idle
    [   T,   T,   F,   F,   F,   T,   T,   T ], // MagCal
    [   T,   F,   T,   F,   F,   T,   T,   T ], // AccelCal
    [   T,   F,   F,   T,   T,   T,   F,   F ], // DcmInit
    [   T,   F,   F,   F,   T,   T,   F,   F ], // Active
    [   T,   T,   T,   T,   T,   T,   F,   F ], // Error
    [   T,   T,   T,   F,   F,   F,   T,   F ], // CalSampleComplete
    [   T,   F,   F,   T,   T,   F,   F,   T ], // CalComplete
];

impl NavState {
    pub fn may_enter(self, to: NavState) -> bool {
        TRANSITIONS[self as usize][to as usize]
    }

    fn in_cal_branch(self) -> bool {
        matches!(self, NavState::MagCal | NavState::AccelCal | NavState::CalSampleComplete)
    }
}

struct Engine {
    prev: Option<NavState>,
    curr: Option<NavState>,
    next: NavState,
    cal_sample: [i16; 3],
    cal_status: CalStatus,
}

pub struct Navigator<'a, M: RawMutex, B: SensorBus> {
    device: &'a InsDevice<M, B>,
    engine: Mutex<M, Engine>,
    events: Signal<M, CalEvent>,
}

impl<'a, M: RawMutex, B: SensorBus> Navigator<'a, M, B> {
    pub fn new(device: &'a InsDevice<M, B>) -> Self {
        Self {
            device,
            engine: Mutex::new(Engine {
                prev: None,
                curr: None,
                next: NavState::DcmInit,
                cal_sample: [0; 3],
                cal_status: CalStatus::NotCalibrated,
            }),
            events: Signal::new(),
        }
    }

    /// Run one engine step. `dt_us` is the time since the previous tick and
    /// only matters in `Active`.
    pub async fn tick(&self, dt_us: u32) -> Result<NavState, InsError> {
        let mut eng = self.engine.lock().await;
        eng.prev = eng.curr;
        let state = eng.next;
        eng.curr = Some(state);
        let entered = eng.prev != Some(state);

        match state {
            NavState::Idle => {
                if entered {
                    self.device.lock().await.reset();
                    if eng.prev.is_some_and(NavState::in_cal_branch) {
                        self.events.signal(CalEvent::Cancelled);
                        log_info!("calibration cancelled");
                    }
                }
            }
            NavState::MagCal | NavState::AccelCal => {
                let target = if state == NavState::MagCal {
                    CalTarget::Mag
                } else {
                    CalTarget::Accel
                };
                let mut ins = self.device.lock().await;
                if entered && eng.prev != Some(NavState::CalSampleComplete) {
                    ins.reset_cal();
                }
                match ins.calibrate(target).await {
                    Ok((sample, status)) => {
                        eng.cal_sample = sample;
                        eng.cal_status = status;
                        eng.next = if status == CalStatus::InProgress {
                            NavState::CalSampleComplete
                        } else {
                            NavState::CalComplete
                        };
                    }
                    Err(e) => {
                        eng.next = NavState::Error;
                        return Err(e);
                    }
                }
            }
            NavState::CalSampleComplete => {
                if entered {
                    self.events.signal(CalEvent::Sample(eng.cal_sample));
                }
            }
            NavState::CalComplete => {
                if entered {
                    self.events.signal(CalEvent::Complete(eng.cal_status));
                    log_info!("calibration finished");
                }
            }
            NavState::DcmInit => {
                let mut ins = self.device.lock().await;
                match ins.dcm_init().await {
                    Ok(CalStatus::Complete) => eng.next = NavState::Active,
                    Ok(_) => eng.next = NavState::Error,
                    Err(e) => {
                        eng.next = NavState::Error;
                        return Err(e);
                    }
                }
            }
            NavState::Active => {
                let report = self.device.lock().await.update(dt_us).await?;
                if report.lock_lost {
                    log_info!("tracking re-acquired from raw attitude");
                }
            }
            NavState::Error => {}
        }
        Ok(state)
    }

    /// Request `to` for the next engine step.
    pub async fn set_state(&self, to: NavState) -> Result<(), InsError> {
        let mut eng = self.engine.lock().await;
        match eng.curr {
            Some(from) if from.may_enter(to) => {
                eng.next = to;
                Ok(())
            }
            _ => Err(InsError::InvalidTransition),
        }
    }

    pub async fn wait_cal_event(&self) -> CalEvent {
        self.events.wait().await
    }

    /// Non-blocking variant of [`Self::wait_cal_event`].
    pub fn try_cal_event(&self) -> Option<CalEvent> {
        self.events.try_take()
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Current state, `None` before the first tick.
    pub async fn state(&self) -> Option<NavState> {
        self.engine.lock().await.curr
    }

    pub async fn cal_status(&self) -> CalStatus {
        self.engine.lock().await.cal_status
    }

    pub async fn cal_sample(&self) -> [i16; 3] {
        self.engine.lock().await.cal_sample
    }

    pub async fn mag_calibration(&self) -> CalibrationFloat {
        CalibrationFloat::from(&self.device.lock().await.mag_calibration())
    }

    pub async fn accel_calibration(&self) -> CalibrationFloat {
        CalibrationFloat::from(&self.device.lock().await.accel_calibration())
    }

    pub async fn state_estimate(&self) -> StateEstimate {
        self.device.lock().await.state_estimate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InsConfig;
    use crate::drivers::mock::MockBus;
    use crate::ins::calibration::fixtures::{ellipsoid, rotation};
    use crate::ins::calibration::CAL_SAMPLES;
    use crate::ins::Ins;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};

    type Dev = InsDevice<NoopRawMutex, MockBus>;

    fn device() -> Dev {
        InsDevice::new(Ins::new(MockBus::level(), InsConfig::default()))
    }

    fn tick<M: RawMutex>(nav: &Navigator<'_, M, MockBus>) -> NavState {
        block_on(nav.tick(50_000)).unwrap()
    }

    /// Start up and park the machine in `Idle`.
    fn idle(nav: &Navigator<'_, NoopRawMutex, MockBus>) {
        assert_eq!(tick(nav), NavState::DcmInit);
        block_on(nav.set_state(NavState::Idle)).unwrap();
        assert_eq!(tick(nav), NavState::Idle);
    }

    #[test]
    fn allow_matrix_rows() {
        use NavState::*;
        assert!(Idle.may_enter(MagCal));
        assert!(!Idle.may_enter(CalComplete));
        assert!(!Active.may_enter(MagCal));
        assert!(Error.may_enter(DcmInit));
        assert!(CalSampleComplete.may_enter(AccelCal));
        assert!(!CalSampleComplete.may_enter(Active));
        assert!(CalComplete.may_enter(DcmInit));
        for s in [Idle, MagCal, AccelCal, DcmInit, Active, Error, CalSampleComplete, CalComplete] {
            assert!(s.may_enter(s));
            assert!(s.may_enter(Idle));
        }
    }

    #[test]
    fn requests_before_first_step_are_rejected() {
        let dev = device();
        let nav = Navigator::new(&dev);
        assert_eq!(block_on(nav.state()), None);
        assert_eq!(block_on(nav.set_state(NavState::Idle)), Err(InsError::InvalidTransition));
        assert_eq!(tick(&nav), NavState::DcmInit);
        assert_eq!(tick(&nav), NavState::Active);
        assert_eq!(tick(&nav), NavState::Active);
        assert_eq!(block_on(nav.set_state(NavState::MagCal)), Err(InsError::InvalidTransition));
    }

    #[test]
    fn sixteen_visits_reach_cal_complete() {
        let dev = device();
        let nav = Navigator::new(&dev);
        idle(&nav);

        let samples = ellipsoid(&rotation(0.3, -0.2, 0.5), [600.0, 520.0, 450.0], [-112.0, 32.0, -6.0]);
        for (i, s) in samples.iter().enumerate() {
            block_on(dev.lock()).bus_mut().mag = *s;
            block_on(nav.set_state(NavState::MagCal)).unwrap();
            assert_eq!(tick(&nav), NavState::MagCal);
            if i + 1 < CAL_SAMPLES {
                assert_eq!(block_on(nav.cal_status()), CalStatus::InProgress);
                assert_eq!(tick(&nav), NavState::CalSampleComplete);
                assert_eq!(block_on(nav.wait_cal_event()), CalEvent::Sample(*s));
                // Holding: no new event until the caller continues.
                assert_eq!(tick(&nav), NavState::CalSampleComplete);
                assert_eq!(nav.try_cal_event(), None);
            }
        }
        assert_eq!(tick(&nav), NavState::CalComplete);
        assert_eq!(block_on(nav.wait_cal_event()), CalEvent::Complete(CalStatus::Complete));
        assert_eq!(block_on(nav.cal_sample()), samples[CAL_SAMPLES - 1]);

        let f = block_on(nav.mag_calibration());
        assert!((f.bias[0] - (-112.0 / 512.0)).abs() < 0.01, "{f:?}");

        block_on(nav.set_state(NavState::DcmInit)).unwrap();
        assert_eq!(tick(&nav), NavState::DcmInit);
        assert_eq!(tick(&nav), NavState::Active);
    }

    #[test]
    fn cancel_returns_to_idle() {
        let dev = device();
        let nav = Navigator::new(&dev);
        idle(&nav);

        block_on(nav.set_state(NavState::AccelCal)).unwrap();
        tick(&nav);
        assert_eq!(tick(&nav), NavState::CalSampleComplete);
        assert_eq!(nav.try_cal_event(), Some(CalEvent::Sample([0, 0, 256])));

        block_on(nav.set_state(NavState::Idle)).unwrap();
        assert_eq!(tick(&nav), NavState::Idle);
        assert_eq!(nav.try_cal_event(), Some(CalEvent::Cancelled));
        assert_eq!(
            block_on(nav.accel_calibration()),
            CalibrationFloat::default(),
            "an abandoned run leaves the record unusable"
        );
    }

    #[test]
    fn fresh_visit_restarts_calibration() {
        let dev = device();
        let nav = Navigator::new(&dev);
        idle(&nav);

        block_on(nav.set_state(NavState::MagCal)).unwrap();
        tick(&nav);
        tick(&nav);
        block_on(nav.set_state(NavState::MagCal)).unwrap();
        tick(&nav);
        assert_eq!(block_on(dev.lock()).cal_samples_taken(), 2);

        block_on(nav.set_state(NavState::Idle)).unwrap();
        tick(&nav);
        block_on(nav.set_state(NavState::MagCal)).unwrap();
        tick(&nav);
        assert_eq!(block_on(dev.lock()).cal_samples_taken(), 1);
    }

    #[test]
    fn repeated_request_continues_the_run() {
        let dev = device();
        let nav = Navigator::new(&dev);
        idle(&nav);

        block_on(nav.set_state(NavState::MagCal)).unwrap();
        assert_eq!(tick(&nav), NavState::MagCal);
        block_on(nav.set_state(NavState::MagCal)).unwrap();
        assert_eq!(tick(&nav), NavState::MagCal);
        assert_eq!(block_on(dev.lock()).cal_samples_taken(), 2);
        assert_eq!(block_on(nav.cal_status()), CalStatus::InProgress);

        block_on(nav.set_state(NavState::Idle)).unwrap();
        tick(&nav);
        block_on(nav.set_state(NavState::AccelCal)).unwrap();
        tick(&nav);
        block_on(nav.set_state(NavState::AccelCal)).unwrap();
        tick(&nav);
        assert_eq!(block_on(dev.lock()).cal_samples_taken(), 2);
    }

    #[test]
    fn bus_failure_moves_to_error() {
        let dev = device();
        let nav = Navigator::new(&dev);
        {
            let mut ins = block_on(dev.lock());
            ins.reset_cal();
            ins.bus_mut().fail_next = 10;
        }
        assert_eq!(block_on(nav.tick(50_000)), Err(InsError::Bus));
        assert_eq!(tick(&nav), NavState::Error);
        block_on(nav.set_state(NavState::DcmInit)).unwrap();
        assert_eq!(tick(&nav), NavState::DcmInit);
        assert_eq!(tick(&nav), NavState::Active);
        let est = block_on(nav.state_estimate());
        assert!(est.corr.iter().all(|a| a.abs() < 1.0), "{est:?}");
    }

    #[test]
    fn works_behind_a_critical_section_mutex() {
        let dev: InsDevice<CriticalSectionRawMutex, MockBus> =
            InsDevice::new(Ins::new(MockBus::level(), InsConfig::default()));
        let nav = Navigator::new(&dev);
        assert_eq!(tick(&nav), NavState::DcmInit);
        assert_eq!(tick(&nav), NavState::Active);
    }
}
