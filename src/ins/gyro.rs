//! Gyro rate conversion and the filter-refined bias/scale record.

use super::kalman::Correction;
use crate::math::fixed::{mult32x32_32, r_shft32_16};
use crate::state::GyroCalibration;

/// `512 · 2000 · π / 180`: raw counts at ±2000 °/s to Q15 rad/s after a
/// shift of 9.
const GYRO_CONV: i32 = 17872;
const GYRO_CONV_SHIFT: u8 = 9;
/// Unity scale, Q13.
pub const GYRO_SCALE_ONE: i16 = (1 << 13) - 1;

/// Raw gyro counts to Q15 rad/s.
#[inline]
pub fn counts_to_rate(raw: &[i16; 3]) -> [i32; 3] {
    raw.map(|r| mult32x32_32(r as i32, GYRO_CONV, GYRO_CONV_SHIFT))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GyroRecord {
    pub bias: [i16; 3],
    pub scale: [i16; 3],
    pub cold_bias: [i16; 3],
}

impl Default for GyroRecord {
    fn default() -> Self {
        Self {
            bias: [0; 3],
            scale: [GYRO_SCALE_ONE; 3],
            cold_bias: [0; 3],
        }
    }
}

impl GyroRecord {
    /// Bias-free, scale-corrected body rate from raw counts.
    pub fn correct(&self, raw: &[i16; 3]) -> [i32; 3] {
        let rate = counts_to_rate(raw);
        core::array::from_fn(|i| mult32x32_32(rate[i] - self.bias[i] as i32, self.scale[i] as i32, 13))
    }

    /// Fold the filter's bias and scale errors in.
    pub fn apply(&mut self, c: &Correction) {
        for i in 0..3 {
            let mut d_scale = c.gyro_scale[i];
            if d_scale < 0 && d_scale > -5 {
                d_scale = 0;
            }
            self.bias[i] = self.bias[i].saturating_add(c.gyro_bias[i]);
            self.scale[i] = r_shft32_16(((self.scale[i] as i32) << 2) + d_scale as i32, 2);
        }
    }

    /// Back to the cold-start bias and unity scale.
    pub fn reset(&mut self) {
        self.bias = self.cold_bias;
        self.scale = [GYRO_SCALE_ONE; 3];
    }

    pub fn seed(&mut self, bias: [i16; 3]) {
        self.bias = bias;
        self.cold_bias = bias;
    }

    pub fn snapshot(&self) -> GyroCalibration {
        GyroCalibration {
            bias: self.bias,
            scale: self.scale,
            cold_bias: self.cold_bias,
        }
    }
}
