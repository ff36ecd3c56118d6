//! Plain snapshot types handed across the command surface and between
//! tasks. All are `Copy` so they can travel through a `Signal` or be
//! returned from under the device lock.

use crate::ins::calibration::CalStatus;

// ── Attitude ──────────────────────────────────────────────────────────────────

/// Attitude in degrees plus the tracking metrics behind it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StateEstimate {
    /// Filtered roll, pitch, yaw.
    pub corr: [f32; 3],
    /// Accelerometer/magnetometer-only roll, pitch, yaw.
    pub raw: [f32; 3],
    pub moving_count: u8,
    pub avr_residual: [f32; 3],
}

/// Outcome of one fusion cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Filtered attitude, phase units.
    pub attitude: [i16; 3],
    /// A per-step rotation hit the ±π limit this cycle.
    pub rate_limited: bool,
    /// The filter lost lock and was reset this cycle.
    pub lock_lost: bool,
    pub moving: bool,
    pub flags: [bool; 3],
}

// ── Calibration ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GyroCalibration {
    /// Q15 rad/s.
    pub bias: [i16; 3],
    /// Q13.
    pub scale: [i16; 3],
    /// Bias measured at DCM initialization.
    pub cold_bias: [i16; 3],
}

/// What a calibration visit hands back to the waiting caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalEvent {
    /// One averaged sample was captured.
    Sample([i16; 3]),
    /// The sample set was fitted (or the fit failed).
    Complete(CalStatus),
    /// The machine left calibration for `Idle`.
    Cancelled,
}
