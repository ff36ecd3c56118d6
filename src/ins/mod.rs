//! The INS engine: one owned context holding the sensor bus, the
//! calibration records, the DCM and the filter.
//!
//! Every operation here runs to completion on `&mut self`; locking is the
//! caller's business (see [`crate::device::InsDevice`]).

pub mod calibration;
pub mod dcm;
pub mod gyro;
pub mod kalman;
pub mod tracking;

use heapless::Vec;

use self::calibration::{ellipsoid_fit, CalStatus, CalibrationSnapshot, SensorCalibration, CAL_SAMPLES};
use self::dcm::{raw_attitude, to_degrees, to_degrees_i16, Dcm, Mat3};
use self::gyro::{counts_to_rate, GyroRecord};
use self::kalman::{measurement_innovation, ErrorStateKalman, MeasNoise};
use self::tracking::{residual_degrees, Tracking};
use crate::config::InsConfig;
use crate::drivers::adxl345::Adxl345;
use crate::drivers::hmc5843::Hmc5843;
use crate::drivers::itg3200::Itg3200;
use crate::drivers::SensorBus;
use crate::error::InsError;
use crate::state::{GyroCalibration, StateEstimate, UpdateReport};

/// Which sensor a calibration run belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalTarget {
    Mag,
    Accel,
}

/// One raw read of all three sensors.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawSample {
    pub mag: [i16; 3],
    pub gyro: [i16; 3],
    pub acc: [i16; 3],
}

/// Elapsed microseconds to a Q0.15 step in seconds.
#[inline]
pub fn dt_q15(dt_us: u32) -> i16 {
    ((dt_us as u64 * 32768) / 1_000_000).min(i16::MAX as u64) as i16
}

/// Magnitude of an averaged vector, rounded half up.
fn magnitude(v: &[f32; 3]) -> i16 {
    let m = libm::sqrtf(v.iter().map(|x| x * x).sum());
    let whole = m as i16;
    if m - whole as f32 > 0.5 {
        whole.saturating_add(1)
    } else {
        whole
    }
}

pub struct Ins<B: SensorBus> {
    bus: B,
    cfg: InsConfig,

    mag_cal: SensorCalibration,
    accel_cal: SensorCalibration,
    gyro: GyroRecord,
    cal_buf: Vec<[i16; 3], CAL_SAMPLES>,
    cal_target: Option<CalTarget>,
    cal_sample: [i16; 3],

    dcm: Dcm,
    kalman: ErrorStateKalman,
    tracking: Tracking,
    dcm_att: [i16; 3],
    raw_att: [i16; 3],

    debug_count: u8,
    rate_limited_count: u32,
}

impl<B: SensorBus> Ins<B> {
    pub fn new(bus: B, cfg: InsConfig) -> Self {
        Self {
            bus,
            cfg,
            mag_cal: SensorCalibration::mag_factory(),
            accel_cal: SensorCalibration::accel_factory(),
            gyro: GyroRecord::default(),
            cal_buf: Vec::new(),
            cal_target: None,
            cal_sample: [0; 3],
            dcm: Dcm::default(),
            kalman: ErrorStateKalman::new(),
            tracking: Tracking::new(&cfg),
            dcm_att: [0; 3],
            raw_att: [0; 3],
            debug_count: 0,
            rate_limited_count: 0,
        }
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    // ── Sensors ──────────────────────────────────────────────────────────────

    /// Take all three sensors out of reset and set their output rates.
    pub async fn sensor_startup(&mut self) -> Result<(), InsError> {
        let settle = self.cfg.startup_settle_ms;
        Hmc5843::startup(&mut self.bus, settle).await?;
        Adxl345::startup(&mut self.bus, settle).await?;
        Itg3200::startup(&mut self.bus, settle).await?;
        log_info!("sensors configured");
        Ok(())
    }

    pub async fn read_sensors(&mut self) -> Result<RawSample, InsError> {
        let mag = Hmc5843::read(&mut self.bus).await?;
        let gyro = Itg3200::read(&mut self.bus).await?;
        let acc = Adxl345::read(&mut self.bus).await?;
        Ok(RawSample { mag, gyro, acc })
    }

    // ── Fusion ───────────────────────────────────────────────────────────────

    /// One fusion cycle over `dt_us` microseconds.
    pub async fn update(&mut self, dt_us: u32) -> Result<UpdateReport, InsError> {
        let raw = self.read_sensors().await?;
        let mag = self.mag_cal.correct(raw.mag);
        let acc = self.accel_cal.correct(raw.acc);
        let gyr = self.gyro.correct(&raw.gyro);
        let dt = dt_q15(dt_us);

        let step = self.dcm.integrate(&gyr, dt);
        if step.saturated {
            self.rate_limited_count = self.rate_limited_count.wrapping_add(1);
            log_warn!(
                "gyro rotation limited: {} {} {} ({} total)",
                gyr[0],
                gyr[1],
                gyr[2],
                self.rate_limited_count
            );
        }
        self.dcm.normalize();
        self.dcm_att = self.dcm.to_euler();
        self.raw_att = raw_attitude(&acc, &mag);

        let gravity = self.accel_cal.field_strength;
        let field = self.mag_cal.field_strength;
        self.tracking.update_dynamics(&acc, gravity, &step.delta);
        self.tracking.update_residual(&self.dcm_att, &self.raw_att);
        let dz = measurement_innovation(&self.dcm.m, &acc, &mag, gravity, field);
        let lock_lost = self.tracking.check(&self.kalman.diagonal());

        let flags = self.tracking.flags;
        self.kalman.predict(&self.dcm.m, &gyr, &self.gyro.bias, dt, flags);
        let noise = MeasNoise {
            roll_pitch: self.cfg.roll_pitch_meas_noise,
            yaw: self.cfg.yaw_meas_noise,
        };
        let correction = self.kalman.correct(&dz, flags, self.tracking.moving(), noise);

        self.gyro.apply(&correction);
        self.dcm.correct(&correction.attitude);
        self.tracking.tick_lock();

        let report = UpdateReport {
            attitude: self.dcm_att,
            rate_limited: step.saturated,
            lock_lost,
            moving: self.tracking.moving(),
            flags,
        };

        if lock_lost {
            log_warn!(
                "loss of lock (errors {}, flags {} {} {}), resetting filter",
                self.tracking.error_count,
                flags[0],
                flags[1],
                flags[2]
            );
            self.reset_filter();
        }

        self.debug_trace();
        Ok(report)
    }

    fn debug_trace(&mut self) {
        if self.cfg.debug_every == 0 {
            return;
        }
        self.debug_count += 1;
        if self.debug_count < self.cfg.debug_every {
            return;
        }
        self.debug_count = 0;

        let corr = to_degrees_i16(&self.dcm_att);
        let raw = to_degrees_i16(&self.raw_att);
        log_debug!(
            "roll = [{},{}], pitch = [{},{}], yaw = [{},{}], dynamics = {}",
            raw[0],
            corr[0],
            raw[1],
            corr[1],
            raw[2],
            corr[2],
            self.tracking.moving_count
        );
        let g = &self.gyro;
        log_debug!("gyro scale = {} {} {}", g.scale[0], g.scale[1], g.scale[2]);
        log_debug!("gyro bias = {} {} {}", g.bias[0], g.bias[1], g.bias[2]);
    }

    /// Restore the cold-start gyro record, clear the tracking state and
    /// covariance, and re-seed the DCM from the last raw attitude.
    fn reset_filter(&mut self) {
        self.gyro.reset();
        self.tracking.reset();
        self.dcm = Dcm::from_euler(self.raw_att);
        self.kalman.reset();
    }

    /// Zero attitude and restart the filter.
    pub fn reset(&mut self) {
        self.raw_att = [0; 3];
        self.reset_filter();
    }

    /// Seed bias, reference magnitudes and attitude from a stationary
    /// average. Blocks for `dcm_init_samples` sample periods.
    pub async fn dcm_init(&mut self) -> Result<CalStatus, InsError> {
        let n = self.cfg.dcm_init_samples.max(1);
        let mut avr_mag = [0.0f32; 3];
        let mut avr_gyr = [0.0f32; 3];
        let mut avr_acc = [0.0f32; 3];

        for _ in 0..n {
            let raw = self.read_sensors().await?;
            let mag = self.mag_cal.correct(raw.mag);
            let acc = self.accel_cal.correct(raw.acc);
            let gyr = counts_to_rate(&raw.gyro);
            for i in 0..3 {
                avr_mag[i] += mag[i] as f32;
                avr_gyr[i] += gyr[i] as f32;
                avr_acc[i] += acc[i] as f32;
            }
            self.bus.delay_ms(self.cfg.sample_spacing_ms).await;
        }
        let n = n as f32;
        for i in 0..3 {
            avr_mag[i] /= n;
            avr_gyr[i] /= n;
            avr_acc[i] /= n;
        }

        self.mag_cal.field_strength = magnitude(&avr_mag);
        self.accel_cal.field_strength = magnitude(&avr_acc);
        self.gyro.seed(avr_gyr.map(|g| g as i16));

        let acc = avr_acc.map(|a| a as i16);
        let mag = avr_mag.map(|m| m as i16);
        self.raw_att = raw_attitude(&acc, &mag);
        self.dcm = Dcm::from_euler(self.raw_att);
        self.kalman.reset();

        let deg = to_degrees_i16(&self.raw_att);
        log_info!(
            "dcm init: roll {} pitch {} yaw {}, |g| {}, |B| {}",
            deg[0],
            deg[1],
            deg[2],
            self.accel_cal.field_strength,
            self.mag_cal.field_strength
        );
        Ok(CalStatus::Complete)
    }

    // ── Calibration ──────────────────────────────────────────────────────────

    fn record_mut(&mut self, target: CalTarget) -> &mut SensorCalibration {
        match target {
            CalTarget::Mag => &mut self.mag_cal,
            CalTarget::Accel => &mut self.accel_cal,
        }
    }

    fn record(&self, target: CalTarget) -> &SensorCalibration {
        match target {
            CalTarget::Mag => &self.mag_cal,
            CalTarget::Accel => &self.accel_cal,
        }
    }

    /// Advance the calibration run for `target` by one averaged sample.
    ///
    /// The first call (or any call after the run finished) starts a new
    /// run. The fit is attempted as soon as the buffer is full; its outcome
    /// is the returned status.
    pub async fn calibrate(&mut self, target: CalTarget) -> Result<([i16; 3], CalStatus), InsError> {
        if self.cal_target != Some(target) || self.record(target).status != CalStatus::InProgress {
            if let Some(other) = self.cal_target.filter(|&t| t != target) {
                let rec = self.record_mut(other);
                if rec.status == CalStatus::InProgress {
                    rec.status = CalStatus::Failed;
                    log_warn!("abandoned {} calibration run", other as u8);
                }
            }
            self.record_mut(target).status = CalStatus::InProgress;
            self.cal_buf.clear();
            self.cal_target = Some(target);
        }

        if !self.cal_buf.is_full() {
            let reads = self.cfg.cal_sample_reads.max(1);
            let mut avr = [0.0f32; 3];
            for _ in 0..reads {
                let raw = self.read_sensors().await?;
                let v = match target {
                    CalTarget::Mag => raw.mag,
                    CalTarget::Accel => raw.acc,
                };
                for i in 0..3 {
                    avr[i] += v[i] as f32;
                }
                self.bus.delay_ms(self.cfg.sample_spacing_ms).await;
            }
            let sample = avr.map(|a| (a / reads as f32) as i16);
            // Cannot fail: the buffer was checked above.
            let _ = self.cal_buf.push(sample);
            self.cal_sample = sample;
            log_debug!("cal sample {}: {} {} {}", self.cal_buf.len(), sample[0], sample[1], sample[2]);
        }

        if self.cal_buf.is_full() {
            let envelope = self.record(target).envelope;
            let result = ellipsoid_fit(&self.cal_buf, envelope);
            self.cal_buf.clear();
            let rec = self.record_mut(target);
            match result {
                Ok(fit) => {
                    rec.install(&fit);
                    log_info!(
                        "calibration complete: scale {} {} {}, bias {} {} {}",
                        fit.scale[0],
                        fit.scale[1],
                        fit.scale[2],
                        fit.bias[0],
                        fit.bias[1],
                        fit.bias[2]
                    );
                }
                Err(e) => {
                    rec.status = CalStatus::Failed;
                    log_error!("calibration failed: {}", e);
                }
            }
        }

        Ok((self.cal_sample, self.record(target).status))
    }

    /// Mark both calibrations as not done.
    pub fn reset_cal(&mut self) -> CalStatus {
        self.mag_cal.status = CalStatus::NotCalibrated;
        self.accel_cal.status = CalStatus::NotCalibrated;
        self.cal_buf.clear();
        self.cal_target = None;
        CalStatus::NotCalibrated
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn cal_status(&self, target: CalTarget) -> CalStatus {
        self.record(target).status
    }

    /// Most recent averaged calibration sample.
    pub fn cal_sample(&self) -> [i16; 3] {
        self.cal_sample
    }

    pub fn cal_samples_taken(&self) -> usize {
        self.cal_buf.len()
    }

    pub fn mag_calibration(&self) -> CalibrationSnapshot {
        self.mag_cal.snapshot()
    }

    pub fn accel_calibration(&self) -> CalibrationSnapshot {
        self.accel_cal.snapshot()
    }

    pub fn gyro_calibration(&self) -> GyroCalibration {
        self.gyro.snapshot()
    }

    pub fn dcm(&self) -> Mat3 {
        self.dcm.m
    }

    pub fn rate_limited_count(&self) -> u32 {
        self.rate_limited_count
    }

    pub fn state_estimate(&self) -> StateEstimate {
        StateEstimate {
            corr: self.dcm_att.map(to_degrees),
            raw: self.raw_att.map(to_degrees),
            moving_count: self.tracking.moving_count,
            avr_residual: self.tracking.avr_residual.map(residual_degrees),
        }
    }

    pub fn covariance_diagonal(&self) -> [i16; kalman::STATES] {
        self.kalman.diagonal()
    }
}

#[cfg(test)]
mod tests {
    use super::calibration::fixtures::{ellipsoid, rotation};
    use super::calibration::MAG_ENVELOPE;
    use super::*;
    use crate::drivers::mock::MockBus;
    use embassy_futures::block_on;

    const PERIOD_US: u32 = 50_000;

    fn level_ins() -> Ins<MockBus> {
        let mut ins = Ins::new(MockBus::level(), InsConfig::default());
        ins.reset_cal();
        ins
    }

    fn settled() -> Ins<MockBus> {
        let mut ins = level_ins();
        assert_eq!(block_on(ins.dcm_init()).unwrap(), CalStatus::Complete);
        for _ in 0..100 {
            let r = block_on(ins.update(PERIOD_US)).unwrap();
            assert!(!r.lock_lost);
        }
        ins
    }

    #[test]
    fn dt_conversion() {
        assert_eq!(dt_q15(50_000), 1638);
        assert_eq!(dt_q15(0), 0);
        assert_eq!(dt_q15(5_000_000), i16::MAX);
    }

    #[test]
    fn startup_configures_all_sensors() {
        let mut ins = Ins::new(MockBus::new(), InsConfig::default());
        block_on(ins.sensor_startup()).unwrap();
        let bus = ins.bus_mut();
        let addrs: std::vec::Vec<u8> = bus.writes.iter().map(|w| w.0).collect();
        assert_eq!(addrs, [0x1E, 0x1E, 0x53, 0x53, 0x53, 0x53, 0x68, 0x68, 0x68, 0x68]);
        assert_eq!(bus.writes[1].1, [0x00, 0x18]);
        assert_eq!(bus.writes[4].1, [0x2C, 0x09]);
        assert_eq!(bus.writes[7].1, [0x16, 0x1B]);
        assert_eq!(bus.slept_ms, 100);
    }

    #[test]
    fn dcm_init_measures_references_and_bias() {
        let mut ins = level_ins();
        ins.bus_mut().gyro = [10, -20, 0];
        ins.bus_mut().acc = [0, 0, 250];
        block_on(ins.dcm_init()).unwrap();

        assert_eq!(ins.accel_cal.field_strength, 250);
        assert_eq!(ins.mag_cal.field_strength, 512);
        let want = counts_to_rate(&[10, -20, 0]);
        let g = ins.gyro_calibration();
        assert_eq!(g.bias, [want[0] as i16, want[1] as i16, 0]);
        assert_eq!(g.cold_bias, g.bias);
        assert_eq!(ins.raw_att, [0, 0, 0]);
        assert_eq!(ins.bus_mut().slept_ms, 500);
    }

    #[test]
    fn stationary_platform_holds_level_attitude() {
        let mut ins = settled();
        let est = ins.state_estimate();
        for a in est.corr.iter().chain(est.raw.iter()) {
            assert!(a.abs() < 0.5, "{est:?}");
        }
        assert_eq!(est.moving_count, 0);
        for d in ins.covariance_diagonal() {
            assert!(d >= 0);
        }
        // Bias stays put with a quiet gyro.
        assert_eq!(ins.gyro_calibration().bias, [0; 3]);
        assert!(block_on(ins.update(PERIOD_US)).is_ok());
    }

    #[test]
    fn sustained_disagreement_reseeds_from_raw_attitude() {
        let mut ins = settled();
        ins.tracking.error_count = 63;
        // Rolled 30° without the gyro seeing it.
        ins.bus_mut().acc = [0, 128, 222];

        let report = block_on(ins.update(PERIOD_US)).unwrap();
        assert!(report.flags[0]);
        assert!(report.lock_lost);

        let roll = to_degrees(Dcm { m: ins.dcm() }.to_euler()[0]);
        assert!((roll - 30.0).abs() < 1.0, "roll {roll}");
        assert_eq!(ins.covariance_diagonal(), [0; kalman::STATES]);
        assert_eq!(ins.tracking.lock_count, 0);

        ins.reset();
        assert_eq!(Dcm { m: ins.dcm() }.to_euler(), [0, 0, 0]);
    }

    #[test]
    fn excessive_rate_is_reported() {
        let mut ins = level_ins();
        block_on(ins.dcm_init()).unwrap();
        ins.bus_mut().gyro = [i16::MAX, 0, 0];
        let report = block_on(ins.update(100_000)).unwrap();
        assert!(report.rate_limited);
        assert_eq!(ins.rate_limited_count(), 1);
    }

    #[test]
    fn bus_failure_propagates() {
        let mut ins = level_ins();
        ins.bus_mut().fail_next = 10;
        assert_eq!(block_on(ins.update(PERIOD_US)), Err(InsError::Bus));
    }

    fn feed_mag_run(ins: &mut Ins<MockBus>, samples: &[[i16; 3]]) -> std::vec::Vec<CalStatus> {
        samples
            .iter()
            .map(|&s| {
                ins.bus_mut().mag = s;
                let (got, status) = block_on(ins.calibrate(CalTarget::Mag)).unwrap();
                assert_eq!(got, s);
                status
            })
            .collect()
    }

    #[test]
    fn sixteen_samples_complete_a_calibration() {
        let mut ins = level_ins();
        let samples = ellipsoid(&rotation(0.3, -0.2, 0.5), [600.0, 520.0, 450.0], [-40.0, 25.0, 8.0]);
        let statuses = feed_mag_run(&mut ins, &samples);

        assert!(statuses[..CAL_SAMPLES - 1].iter().all(|&s| s == CalStatus::InProgress));
        assert_eq!(statuses[CAL_SAMPLES - 1], CalStatus::Complete);
        let snap = ins.mag_calibration();
        assert_eq!(snap.status, CalStatus::Complete);
        assert_eq!(snap.envelope, MAG_ENVELOPE);
        assert!((snap.bias[0] + 40).abs() <= 2, "{:?}", snap.bias);
        assert_eq!(ins.mag_cal.field_strength, MAG_ENVELOPE);
        assert_eq!(ins.cal_samples_taken(), 0);
    }

    #[test]
    fn failed_fit_keeps_previous_parameters() {
        let mut ins = Ins::new(MockBus::level(), InsConfig::default());
        let factory = ins.mag_calibration();
        let statuses = feed_mag_run(&mut ins, &[[100, 100, 100]; CAL_SAMPLES]);
        assert_eq!(statuses[CAL_SAMPLES - 1], CalStatus::Failed);

        let snap = ins.mag_calibration();
        assert_eq!(snap.status, CalStatus::Failed);
        assert_eq!(snap.rotation, factory.rotation);
        assert_eq!(snap.scale, factory.scale);
        assert_eq!(snap.bias, factory.bias);

        // The next request starts over.
        let (_, status) = block_on(ins.calibrate(CalTarget::Mag)).unwrap();
        assert_eq!(status, CalStatus::InProgress);
        assert_eq!(ins.cal_samples_taken(), 1);
    }

    #[test]
    fn calibration_sample_averages_its_reads() {
        let mut ins = level_ins();
        let bus = ins.bus_mut();
        for k in 0..10 {
            bus.mag_queue.push_back([100 + 2 * k, -50, 30 - 2 * k]);
        }
        let (sample, _) = block_on(ins.calibrate(CalTarget::Mag)).unwrap();
        assert_eq!(sample, [109, -50, 21]);
        // Every averaged read touches all three sensors.
        assert_eq!(ins.bus_mut().reads, 30);
        assert!(ins.bus_mut().mag_queue.is_empty());
        assert_eq!(ins.bus_mut().slept_ms, 500);

        let mut ins = level_ins();
        for k in 0..10 {
            ins.bus_mut().acc_queue.push_back([-k, 3 * k, 250]);
        }
        let (sample, _) = block_on(ins.calibrate(CalTarget::Accel)).unwrap();
        // -4.5 truncates toward zero
        assert_eq!(sample, [-4, 13, 250]);
    }

    #[test]
    fn switching_sensors_abandons_the_run() {
        let mut ins = level_ins();
        block_on(ins.calibrate(CalTarget::Mag)).unwrap();
        block_on(ins.calibrate(CalTarget::Mag)).unwrap();
        assert_eq!(ins.cal_samples_taken(), 2);

        let (sample, status) = block_on(ins.calibrate(CalTarget::Accel)).unwrap();
        assert_eq!(sample, [0, 0, 256]);
        assert_eq!(status, CalStatus::InProgress);
        assert_eq!(ins.cal_status(CalTarget::Mag), CalStatus::Failed);
        assert_eq!(ins.cal_samples_taken(), 1);

        assert_eq!(ins.reset_cal(), CalStatus::NotCalibrated);
        assert_eq!(ins.cal_status(CalTarget::Accel), CalStatus::NotCalibrated);
        assert_eq!(ins.cal_samples_taken(), 0);
    }
}
