//! ioctl-style command surface over one locked [`Ins`] context.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};

use crate::drivers::SensorBus;
use crate::error::InsError;
use crate::ins::calibration::{CalStatus, CalibrationSnapshot};
use crate::ins::dcm::Mat3;
use crate::ins::{CalTarget, Ins};
use crate::state::{GyroCalibration, StateEstimate, UpdateReport};

/// Numeric command ids as seen by ioctl callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum InsCommandId {
    SensorStartup = 0,
    CalibrateMag = 1,
    CalibrateAccel = 2,
    GetMagCalibration = 3,
    GetAccelCalibration = 4,
    GetGyroCalibration = 5,
    GetStateEst = 6,
    GetDcm = 7,
    DcmInit = 8,
    Update = 9,
    ResetCal = 10,
    Reset = 11,
}

impl TryFrom<u16> for InsCommandId {
    type Error = InsError;

    fn try_from(id: u16) -> Result<Self, InsError> {
        use InsCommandId::*;
        Ok(match id {
            0 => SensorStartup,
            1 => CalibrateMag,
            2 => CalibrateAccel,
            3 => GetMagCalibration,
            4 => GetAccelCalibration,
            5 => GetGyroCalibration,
            6 => GetStateEst,
            7 => GetDcm,
            8 => DcmInit,
            9 => Update,
            10 => ResetCal,
            11 => Reset,
            _ => return Err(InsError::InvalidCmd),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsCommand {
    SensorStartup,
    CalibrateMag,
    CalibrateAccel,
    GetMagCalibration,
    GetAccelCalibration,
    GetGyroCalibration,
    GetStateEst,
    GetDcm,
    DcmInit,
    Update { dt_us: u32 },
    ResetCal,
    Reset,
}

impl InsCommand {
    /// Build a command from its numeric id and argument word. Only
    /// `Update` takes an argument: the elapsed time in µs, which must be
    /// non-zero.
    pub fn from_raw(id: u16, arg: u32) -> Result<Self, InsError> {
        Ok(match InsCommandId::try_from(id)? {
            InsCommandId::SensorStartup => InsCommand::SensorStartup,
            InsCommandId::CalibrateMag => InsCommand::CalibrateMag,
            InsCommandId::CalibrateAccel => InsCommand::CalibrateAccel,
            InsCommandId::GetMagCalibration => InsCommand::GetMagCalibration,
            InsCommandId::GetAccelCalibration => InsCommand::GetAccelCalibration,
            InsCommandId::GetGyroCalibration => InsCommand::GetGyroCalibration,
            InsCommandId::GetStateEst => InsCommand::GetStateEst,
            InsCommandId::GetDcm => InsCommand::GetDcm,
            InsCommandId::DcmInit => InsCommand::DcmInit,
            InsCommandId::Update if arg == 0 => return Err(InsError::InvalidArg),
            InsCommandId::Update => InsCommand::Update { dt_us: arg },
            InsCommandId::ResetCal => InsCommand::ResetCal,
            InsCommandId::Reset => InsCommand::Reset,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InsResponse {
    Done,
    Status(CalStatus),
    CalSample([i16; 3], CalStatus),
    Calibration(CalibrationSnapshot),
    GyroCalibration(GyroCalibration),
    StateEstimate(StateEstimate),
    Dcm(Mat3),
    Updated(UpdateReport),
}

/// The INS behind a mutex. Every command holds the lock for its whole
/// duration, including the blocking averaging loops.
pub struct InsDevice<M: RawMutex, B: SensorBus> {
    ins: Mutex<M, Ins<B>>,
}

impl<M: RawMutex, B: SensorBus> InsDevice<M, B> {
    pub fn new(ins: Ins<B>) -> Self {
        Self { ins: Mutex::new(ins) }
    }

    /// Direct access for callers that need several steps under one lock.
    pub async fn lock(&self) -> MutexGuard<'_, M, Ins<B>> {
        self.ins.lock().await
    }

    pub async fn ioctl(&self, cmd: InsCommand) -> Result<InsResponse, InsError> {
        let mut ins = self.ins.lock().await;
        Ok(match cmd {
            InsCommand::SensorStartup => {
                ins.sensor_startup().await?;
                InsResponse::Done
            }
            InsCommand::CalibrateMag => {
                let (s, status) = ins.calibrate(CalTarget::Mag).await?;
                InsResponse::CalSample(s, status)
            }
            InsCommand::CalibrateAccel => {
                let (s, status) = ins.calibrate(CalTarget::Accel).await?;
                InsResponse::CalSample(s, status)
            }
            InsCommand::GetMagCalibration => InsResponse::Calibration(ins.mag_calibration()),
            InsCommand::GetAccelCalibration => InsResponse::Calibration(ins.accel_calibration()),
            InsCommand::GetGyroCalibration => InsResponse::GyroCalibration(ins.gyro_calibration()),
            InsCommand::GetStateEst => InsResponse::StateEstimate(ins.state_estimate()),
            InsCommand::GetDcm => InsResponse::Dcm(ins.dcm()),
            InsCommand::DcmInit => InsResponse::Status(ins.dcm_init().await?),
            InsCommand::Update { dt_us } => InsResponse::Updated(ins.update(dt_us).await?),
            InsCommand::ResetCal => InsResponse::Status(ins.reset_cal()),
            InsCommand::Reset => {
                ins.reset();
                InsResponse::Done
            }
        })
    }

    /// Numeric-id entry point.
    pub async fn ioctl_raw(&self, id: u16, arg: u32) -> Result<InsResponse, InsError> {
        let cmd = InsCommand::from_raw(id, arg)?;
        self.ioctl(cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InsConfig;
    use crate::drivers::mock::MockBus;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    fn device() -> InsDevice<NoopRawMutex, MockBus> {
        InsDevice::new(Ins::new(MockBus::level(), InsConfig::default()))
    }

    #[test]
    fn unknown_ids_are_rejected() {
        assert_eq!(InsCommandId::try_from(11), Ok(InsCommandId::Reset));
        assert_eq!(InsCommandId::try_from(12), Err(InsError::InvalidCmd));
        let dev = device();
        let err = block_on(dev.ioctl_raw(99, 0)).unwrap_err();
        assert_eq!(err.code(), -4);
        assert_eq!(block_on(dev.ioctl_raw(9, 0)), Err(InsError::InvalidArg));
    }

    #[test]
    fn command_sequence_over_numeric_ids() {
        let dev = device();
        assert_eq!(block_on(dev.ioctl_raw(0, 0)), Ok(InsResponse::Done));
        assert_eq!(
            block_on(dev.ioctl_raw(10, 0)),
            Ok(InsResponse::Status(CalStatus::NotCalibrated))
        );
        assert_eq!(
            block_on(dev.ioctl(InsCommand::DcmInit)),
            Ok(InsResponse::Status(CalStatus::Complete))
        );
        for _ in 0..10 {
            match block_on(dev.ioctl_raw(9, 50_000)) {
                Ok(InsResponse::Updated(r)) => assert!(!r.lock_lost),
                other => panic!("{other:?}"),
            }
        }
        match block_on(dev.ioctl(InsCommand::GetStateEst)) {
            Ok(InsResponse::StateEstimate(est)) => assert!(est.corr[0].abs() < 0.5),
            other => panic!("{other:?}"),
        }
        match block_on(dev.ioctl(InsCommand::GetDcm)) {
            Ok(InsResponse::Dcm(m)) => assert!(m[0][0] > 32000 && m[2][2] > 32000),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn calibration_snapshots() {
        let dev = device();
        match block_on(dev.ioctl(InsCommand::GetAccelCalibration)) {
            Ok(InsResponse::Calibration(c)) => {
                assert_eq!(c.status, CalStatus::Complete);
                assert_eq!(c.envelope, 256);
                assert_eq!(c.scale_q, 13);
            }
            other => panic!("{other:?}"),
        }
        match block_on(dev.ioctl(InsCommand::CalibrateAccel)) {
            Ok(InsResponse::CalSample(_, status)) => assert_eq!(status, CalStatus::InProgress),
            other => panic!("{other:?}"),
        }
        match block_on(dev.ioctl(InsCommand::GetGyroCalibration)) {
            Ok(InsResponse::GyroCalibration(g)) => assert_eq!(g.scale, [8191; 3]),
            other => panic!("{other:?}"),
        }
        assert_eq!(block_on(dev.ioctl(InsCommand::Reset)), Ok(InsResponse::Done));
        assert_eq!(block_on(dev.lock()).cal_status(CalTarget::Accel), CalStatus::InProgress);
    }
}
