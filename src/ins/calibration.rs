//! Ellipsoid-fit calibration for the magnetometer and accelerometer.
//!
//! A sensor that is rotated through many orientations traces an ellipsoid
//! instead of a sphere: the center is offset by bias and the principal axes
//! are stretched by per-axis gain and tilted by misalignment. The fit below
//! recovers that ellipsoid from [`CAL_SAMPLES`] points and expresses the
//! inverse map as `x' = Rᵀ·S·R·(x − b)` in fixed point.

use crate::error::CalError;
use crate::math::fixed::{mac16x16_32, mult16x16_16, r_shft32_16};
use crate::math::linalg::{mat_eigs_f, mat_inv_f, mat_mult_f, mat_trans_f};

// ── Constants ────────────────────────────────────────────────────────────────

/// Samples gathered per calibration run.
pub const CAL_SAMPLES: usize = 16;
/// Fractional bits of the per-axis scale factors.
pub const SCALE_Q: u8 = 13;
/// Radius the magnetometer ellipsoid is mapped onto (arbitrary units).
pub const MAG_ENVELOPE: i16 = 512;
/// Radius the accelerometer ellipsoid is mapped onto (≈ 1 g).
pub const ACCEL_ENVELOPE: i16 = 256;

const ROT_ONE: f32 = 32767.0;
const SCALE_ONE: f32 = (1u32 << SCALE_Q) as f32;

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalStatus {
    NotCalibrated,
    InProgress,
    Complete,
    Failed,
}

/// Fixed-point calibration record for one 3-axis sensor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorCalibration {
    /// Principal axes of the fitted ellipsoid as rows, Q0.15.
    pub rotation: [[i16; 3]; 3],
    /// Per-axis gain along each principal axis, Q[`SCALE_Q`].
    pub scale: [i16; 3],
    /// Ellipsoid center in raw sensor units.
    pub bias: [i16; 3],
    pub status: CalStatus,
    /// Target sphere radius; scale factors are relative to it.
    pub envelope: i16,
    /// Field magnitude the filter normalizes measurements by.
    pub field_strength: i16,
}

impl SensorCalibration {
    /// Factory magnetometer record.
    pub const fn mag_factory() -> Self {
        Self {
            rotation: [[18815, 26566, 3719], [26608, -19060, 1538], [-3410, -2136, 32518]],
            scale: [6260, 6386, 7104],
            bias: [-112, 32, -6],
            status: CalStatus::Complete,
            envelope: MAG_ENVELOPE,
            field_strength: MAG_ENVELOPE,
        }
    }

    /// Factory accelerometer record.
    pub const fn accel_factory() -> Self {
        Self {
            rotation: [[23610, 2907, 22533], [22716, -2416, -23490], [422, -32548, 3753]],
            scale: [7486, 8247, 8551],
            bias: [-7, 20, -27],
            status: CalStatus::Complete,
            envelope: ACCEL_ENVELOPE,
            field_strength: ACCEL_ENVELOPE,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == CalStatus::Complete
    }

    /// Correct a raw sample if the record is complete; otherwise pass it
    /// through untouched.
    pub fn correct(&self, sample: [i16; 3]) -> [i16; 3] {
        if self.is_complete() {
            apply_calibration(sample, self)
        } else {
            sample
        }
    }

    /// Install a fit result and mark the record complete.
    pub fn install(&mut self, fit: &EllipsoidFit) {
        self.rotation = fit.rotation;
        self.scale = fit.scale;
        self.bias = fit.bias;
        self.status = CalStatus::Complete;
        self.field_strength = self.envelope;
    }

    /// Snapshot for callers outside the lock.
    pub fn snapshot(&self) -> CalibrationSnapshot {
        CalibrationSnapshot {
            rotation: self.rotation,
            scale: self.scale,
            bias: self.bias,
            status: self.status,
            envelope: self.envelope,
            scale_q: SCALE_Q,
        }
    }
}

/// Read-only copy of a calibration record. Carries the envelope and scale
/// format so the numbers can be interpreted without this crate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationSnapshot {
    pub rotation: [[i16; 3]; 3],
    pub scale: [i16; 3],
    pub bias: [i16; 3],
    pub status: CalStatus,
    pub envelope: i16,
    pub scale_q: u8,
}

/// Calibration parameters in floating point: bias relative to the envelope,
/// unit scale factors and a unit rotation. All zero when not complete.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CalibrationFloat {
    pub rotation: [[f32; 3]; 3],
    pub scale: [f32; 3],
    pub bias: [f32; 3],
}

impl From<&CalibrationSnapshot> for CalibrationFloat {
    fn from(s: &CalibrationSnapshot) -> Self {
        let mut out = CalibrationFloat::default();
        if s.status != CalStatus::Complete {
            return out;
        }
        let scale_one = (1u32 << s.scale_q) as f32;
        for i in 0..3 {
            out.bias[i] = s.bias[i] as f32 / s.envelope as f32;
            out.scale[i] = s.scale[i] as f32 / scale_one;
            for j in 0..3 {
                out.rotation[i][j] = s.rotation[i][j] as f32 / ROT_ONE;
            }
        }
        out
    }
}

/// Output of a successful ellipsoid fit, already in runtime formats.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EllipsoidFit {
    pub rotation: [[i16; 3]; 3],
    pub scale: [i16; 3],
    pub bias: [i16; 3],
}

// ── Correction ───────────────────────────────────────────────────────────────

/// `Rᵀ·S·R·(x − b)`: remove bias, rotate onto the principal axes, scale
/// each axis, rotate back.
pub fn apply_calibration(sample: [i16; 3], cal: &SensorCalibration) -> [i16; 3] {
    let mut s = [0i16; 3];
    for j in 0..3 {
        s[j] = sample[j].saturating_sub(cal.bias[j]);
    }

    let mut axis = [0i16; 3];
    for (i, a) in axis.iter_mut().enumerate() {
        let mut sum = 0i32;
        for j in 0..3 {
            sum = mac16x16_32(s[j], cal.rotation[i][j], sum, 1);
        }
        *a = mult16x16_16(r_shft32_16(sum, 14), cal.scale[i], SCALE_Q);
    }

    let mut out = [0i16; 3];
    for (j, o) in out.iter_mut().enumerate() {
        let mut sum = 0i32;
        for i in 0..3 {
            sum = mac16x16_32(axis[i], cal.rotation[i][j], sum, 1);
        }
        *o = r_shft32_16(sum, 14);
    }
    out
}

// ── Fit ──────────────────────────────────────────────────────────────────────

/// Least-squares ellipsoid fit.
///
/// Samples are centered on their mean and scaled by their RMS radius before
/// the normal equations are formed, then the results are mapped back. The
/// fitted ellipsoid is mapped onto a sphere of radius `envelope`.
pub fn ellipsoid_fit(samples: &[[i16; 3]], envelope: i16) -> Result<EllipsoidFit, CalError> {
    if samples.len() < CAL_SAMPLES {
        return Err(CalError::NotEnoughSamples(CAL_SAMPLES));
    }

    // Conditioning.
    let n = samples.len() as f32;
    let mut mean = [0.0f32; 3];
    for s in samples {
        for k in 0..3 {
            mean[k] += s[k] as f32 / n;
        }
    }
    let mut spread = 0.0f32;
    for s in samples {
        for k in 0..3 {
            let d = s[k] as f32 - mean[k];
            spread += d * d / n;
        }
    }
    let spread = libm::sqrtf(spread);
    if !(spread > 0.0) {
        return Err(CalError::Singular);
    }

    // Normal equations (DᵀD)·v = Dᵀ·1 with D rows
    // [x², y², z², 2xy, 2xz, 2yz, 2x, 2y, 2z].
    let mut dtd = [[0.0f32; 9]; 9];
    let mut dt1 = [[0.0f32; 1]; 9];
    for s in samples {
        let x = (s[0] as f32 - mean[0]) / spread;
        let y = (s[1] as f32 - mean[1]) / spread;
        let z = (s[2] as f32 - mean[2]) / spread;
        let d = [
            x * x,
            y * y,
            z * z,
            2.0 * x * y,
            2.0 * x * z,
            2.0 * y * z,
            2.0 * x,
            2.0 * y,
            2.0 * z,
        ];
        for r in 0..9 {
            dt1[r][0] += d[r];
            for c in 0..9 {
                dtd[r][c] += d[r] * d[c];
            }
        }
    }
    let dtd_inv = mat_inv_f(&dtd).ok_or(CalError::Singular)?;
    let v = mat_mult_f(&dtd_inv, &dt1);
    let v = [
        v[0][0], v[1][0], v[2][0], v[3][0], v[4][0], v[5][0], v[6][0], v[7][0], v[8][0],
    ];

    // Algebraic quadric.
    let quadric = [
        [v[0], v[3], v[4], v[6]],
        [v[3], v[1], v[5], v[7]],
        [v[4], v[5], v[2], v[8]],
        [v[6], v[7], v[8], -1.0],
    ];

    // Center: solve −A₃·c = [v6 v7 v8] through its normal equations.
    let mut neg_a3 = [[0.0f32; 3]; 3];
    for r in 0..3 {
        for c in 0..3 {
            neg_a3[r][c] = -quadric[r][c];
        }
    }
    let neg_a3_t = mat_trans_f(&neg_a3);
    let normal_inv = mat_inv_f(&mat_mult_f(&neg_a3_t, &neg_a3)).ok_or(CalError::Singular)?;
    let rhs = mat_mult_f(&neg_a3_t, &[[v[6]], [v[7]], [v[8]]]);
    let center = mat_mult_f(&normal_inv, &rhs);
    let center = [center[0][0], center[1][0], center[2][0]];

    // Translate the quadric to its center.
    let mut translate = [[0.0f32; 4]; 4];
    for (i, row) in translate.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    translate[3][0] = center[0];
    translate[3][1] = center[1];
    translate[3][2] = center[2];
    let centered = mat_mult_f(&mat_mult_f(&translate, &quadric), &mat_trans_f(&translate));
    let k = -centered[3][3];
    if k == 0.0 || !k.is_finite() {
        return Err(CalError::Singular);
    }
    let mut shape = [[0.0f32; 3]; 3];
    for r in 0..3 {
        for c in 0..3 {
            shape[r][c] = centered[r][c] / k;
        }
    }

    // Principal axes. Eigenvalue λ gives a radius of sqrt(1/λ).
    let eig = mat_eigs_f(&shape)?;
    let mut fit = EllipsoidFit {
        rotation: [[0; 3]; 3],
        scale: [0; 3],
        bias: [0; 3],
    };
    for i in 0..3 {
        let lambda = eig.values[i];
        if !(lambda > 0.0) || !(1.0 / lambda > 0.0) {
            return Err(CalError::NonPositiveAxis);
        }
        let radius = libm::sqrtf(1.0 / lambda) * spread;
        let scale = envelope as f32 / radius;
        if !scale.is_finite() || scale * SCALE_ONE >= i16::MAX as f32 {
            return Err(CalError::ScaleOutOfRange);
        }
        fit.scale[i] = (scale * SCALE_ONE) as i16;
        fit.bias[i] = (mean[i] + center[i] * spread) as i16;
        for j in 0..3 {
            fit.rotation[i][j] = (eig.vectors[i][j] * ROT_ONE) as i16;
        }
    }
    Ok(fit)
}
