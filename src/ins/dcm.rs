//! Direction-cosine-matrix attitude in Q1.15.
//!
//! The matrix rotates body-frame vectors into the navigation frame. Products
//! that could overflow are taken with the matrix scaled down to Q1.14 and the
//! result scaled back up afterwards.

use crate::math::approx::{atan2_16, cos_phase, sin_phase, sqrt32_32};
use crate::math::fixed::{
    hard_limit32, mac16x16_32, mat_mult16, mult16x16_16, mult16x16_32, mult32x32_32, r_shft32_16,
    vmult16x16_32,
};

pub type Mat3 = [[i16; 3]; 3];

/// Q14 one, the diagonal of the incremental rotation.
const ONE_Q14: i16 = 16383;
/// Three times Q14 one, the numerator of the length correction.
const THREE_Q14: i32 = 3 * 16383;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dcm {
    pub m: Mat3,
}

/// Per-step rotation angles and whether any of them hit the ±π limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseStep {
    /// Rotation over the step, Q1.14.
    pub delta: [i16; 3],
    pub saturated: bool,
}

impl Default for Dcm {
    fn default() -> Self {
        Self::from_euler([0; 3])
    }
}

impl Dcm {
    /// DCM for the given roll, pitch and yaw.
    pub fn from_euler(att: [i16; 3]) -> Self {
        let (cr, sr) = (cos_phase(att[0]), sin_phase(att[0]));
        let (cp, sp) = (cos_phase(att[1]), sin_phase(att[1]));
        let (cy, sy) = (cos_phase(att[2]), sin_phase(att[2]));

        let sr_sp = mult16x16_16(sr, sp, 15);
        let cr_sp = mult16x16_16(cr, sp, 15);

        let mut m = [[0i16; 3]; 3];
        m[0][0] = mult16x16_16(cp, cy, 15);
        m[0][1] = r_shft32_16(mac16x16_32(sr_sp, cy, -mac16x16_32(cr, sy, 0, 1), 1), 14);
        m[0][2] = r_shft32_16(mac16x16_32(cr_sp, cy, mac16x16_32(sr, sy, 0, 1), 1), 14);
        m[1][0] = mult16x16_16(cp, sy, 15);
        m[1][1] = r_shft32_16(mac16x16_32(sr_sp, sy, mac16x16_32(cr, cy, 0, 1), 1), 14);
        m[1][2] = r_shft32_16(mac16x16_32(cr_sp, sy, -mac16x16_32(sr, cy, 0, 1), 1), 14);
        m[2][0] = sp.saturating_neg();
        m[2][1] = mult16x16_16(sr, cp, 15);
        m[2][2] = mult16x16_16(cr, cp, 15);
        Self { m }
    }

    /// Strapdown step `DCM ← DCM·(I + skew(ω·dt))`.
    ///
    /// `gyro` is the corrected body rate in Q15 rad/s and `dt` the step in
    /// Q0.15 seconds. Each per-axis rotation is limited to the Q1.14 range.
    pub fn integrate(&mut self, gyro: &[i32; 3], dt: i16) -> PhaseStep {
        let mut step = PhaseStep::default();
        for (d, &w) in step.delta.iter_mut().zip(gyro.iter()) {
            let raw = mult32x32_32(w, dt as i32, 16);
            let limited = raw.clamp(i16::MIN as i32, i16::MAX as i32);
            step.saturated |= limited != raw;
            *d = limited as i16;
        }

        let [x, y, z] = step.delta;
        let skew = [
            [ONE_Q14, z.saturating_neg(), y],
            [z, ONE_Q14, x.saturating_neg()],
            [y.saturating_neg(), x, ONE_Q14],
        ];
        let product = mat_mult16(&halve(&self.m), &skew, 0, 14);
        self.m = restore(product);
        step
    }

    /// Apply a small attitude error: `DCM ← (I − skew(err))·DCM`.
    pub fn correct(&mut self, err: &[i16; 3]) {
        let half = |v: i16| v >> 1;
        let neg_half = |v: i16| v.saturating_neg() >> 1;
        let skew = [
            [ONE_Q14, half(err[2]), neg_half(err[1])],
            [neg_half(err[2]), ONE_Q14, half(err[0])],
            [half(err[1]), neg_half(err[0]), ONE_Q14],
        ];
        let product = mat_mult16(&skew, &halve(&self.m), 0, 14);
        self.m = restore(product);
    }

    /// Re-orthogonalize in one pass: split the row 0/row 1 dot product
    /// between both rows, rebuild row 2 as their cross product, then pull
    /// every row back to unit length with a first-order Taylor step.
    pub fn normalize(&mut self) {
        let m = &self.m;
        let mut dot = 0i32;
        for k in 0..3 {
            dot = mac16x16_32(m[0][k], m[1][k], dot, 2);
        }
        let err_half = r_shft32_16(dot, 14);

        let mut x = [0i16; 3];
        let mut y = [0i16; 3];
        for k in 0..3 {
            x[k] = r_shft32_16(
                mac16x16_32(err_half.saturating_neg(), m[1][k], (m[0][k] as i32) << 15, 0),
                16,
            );
            y[k] = r_shft32_16(
                mac16x16_32(err_half.saturating_neg(), m[0][k], (m[1][k] as i32) << 15, 0),
                16,
            );
        }

        let cross = |a: i16, b: i16, c: i16, d: i16| {
            r_shft32_16(mac16x16_32(c.saturating_neg(), d, mac16x16_32(a, b, 0, 0), 0), 14)
        };
        let z = [
            cross(x[1], y[2], x[2], y[1]),
            cross(x[2], y[0], x[0], y[2]),
            cross(x[0], y[1], x[1], y[0]),
        ];

        for (row, v) in self.m.iter_mut().zip([x, y, z].iter()) {
            let len_sq = vmult16x16_32(v, v, 0, 1, 13);
            let scaler = hard_limit32((THREE_Q14 - len_sq) >> 1, 15) as i16;
            for (cell, &c) in row.iter_mut().zip(v.iter()) {
                *cell = mult16x16_32(scaler, c, 13).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            }
        }
    }

    /// Roll, pitch and yaw in phase units.
    ///
    /// The pitch cosine is `sqrt(1 − m20²)` taken in Q25; the argument never
    /// drops below zero so the pitch stays defined at ±90°.
    pub fn to_euler(&self) -> [i16; 3] {
        let m = &self.m;
        let roll = atan2_16(m[2][1], m[2][2]);

        let sq = mult16x16_32(m[2][0], m[2][0], 5);
        let arg = (((1i32 << 25) - 1) - sq).max(0);
        let cos_pitch = (sqrt32_32(arg, 15) >> 5).min(i16::MAX as i32) as i16;
        let pitch = atan2_16(m[2][0], cos_pitch).saturating_neg();

        let yaw = atan2_16(m[1][0], m[0][0]);
        [roll, pitch, yaw]
    }
}

#[inline]
fn halve(m: &Mat3) -> Mat3 {
    let mut out = *m;
    for cell in out.iter_mut().flatten() {
        *cell >>= 1;
    }
    out
}

/// Clamp a Q1.14 product to [−1, 1) and return it to Q1.15.
#[inline]
fn restore(mut m: Mat3) -> Mat3 {
    for cell in m.iter_mut().flatten() {
        *cell = (*cell).clamp(-16384, 16383) << 1;
    }
    m
}

/// Attitude from gravity and magnetic field alone.
///
/// Roll and pitch come from the accelerometer; the magnetometer is then
/// rotated into the horizontal plane for a tilt-compensated heading.
pub fn raw_attitude(acc: &[i16; 3], mag: &[i16; 3]) -> [i16; 3] {
    let roll = atan2_16(acc[1], acc[2]);

    let yz = mac16x16_32(acc[2], acc[2], mac16x16_32(acc[1], acc[1], 0, 0), 0) >> 5;
    let yz = sqrt32_32(yz, 15) >> 5;
    let pitch = atan2_16(acc[0].saturating_neg(), yz.min(i16::MAX as i32) as i16);

    let (cr, sr) = (cos_phase(roll), sin_phase(roll));
    let (cp, sp) = (cos_phase(pitch), sin_phase(pitch));

    let vert = r_shft32_16(mac16x16_32(mag[2], cr, mac16x16_32(mag[1], sr, 0, 0), 0), 15);
    let mag_x = r_shft32_16(mac16x16_32(sp, vert, mac16x16_32(mag[0], cp, 0, 0), 0), 9);
    let mag_y = r_shft32_16(
        mac16x16_32(mag[2], sr, mac16x16_32(mag[1].saturating_neg(), cr, 0, 0), 0),
        9,
    );

    [roll, pitch, atan2_16(mag_y, mag_x)]
}

/// Phase units to degrees, truncated.
pub fn to_degrees_i16(att: &[i16; 3]) -> [i16; 3] {
    att.map(|a| r_shft32_16(a as i32 * 180, 15))
}

/// Phase units to degrees.
#[inline]
pub fn to_degrees(a: i16) -> f32 {
    a as f32 * 180.0 / 32768.0
}
