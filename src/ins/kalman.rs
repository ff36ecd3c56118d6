//! Nine-state error-state Kalman filter.
//!
//! State order: attitude error (3), gyro bias error (3), gyro scale error
//! (3). The filter never carries a state vector between cycles; each
//! correction is applied to the DCM and the gyro record and then dropped.
//! Only the covariance `P` (Q15) persists.

use super::dcm::Mat3;
use crate::math::fixed::{
    abs32, div16x16_16, mac16x16_32, mat_mult16, mat_trans16, mult16x16_16, r_shft32_16,
};

pub const STATES: usize = 9;
pub type Cov = [[i16; STATES]; STATES];

/// Upper bound on every covariance diagonal after prediction.
pub const P_DIAG_CAP: i32 = 8192;
/// Diagonals in `(P_NEG_TOLERANCE, 0)` are rounding noise and clamped to 0.
pub const P_NEG_TOLERANCE: i16 = -5;
/// Measurement noise used to ignore an innovation.
pub const R_IGNORE: i32 = 3_276_700;

/// Attitude process noise while an axis is flagged.
const Q_ATT_FLAGGED: i16 = 1629;
/// Gyro random walk, 0.38°/s as a Q15 rate before the `dt` scaling.
const Q_ATT_RATE: i16 = 213;
/// 2.5% of the bias estimate, Q15.
const Q_BIAS_FRACTION: i16 = 819;
const Q_FLOOR: i16 = 5;
const Q_SCALE: i16 = 5;
/// Q10 gain numerator, `2^15 · 2^10`.
const GAIN_NUM: i32 = 1 << 25;

/// Measurement matrix block mapping attitude error onto the gravity x/y
/// and magnetic y innovations.
const H: Mat3 = [[0, -32768, 0], [32767, 0, 0], [0, 0, -32768]];

/// Measurement-noise inputs for one correction.
#[derive(Clone, Copy, Debug)]
pub struct MeasNoise {
    pub roll_pitch: i32,
    pub yaw: i32,
}

/// Per-cycle error estimates produced by [`ErrorStateKalman::correct`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Correction {
    /// Attitude error, Q15 radians.
    pub attitude: [i16; 3],
    /// Gyro bias error, Q15 rad/s.
    pub gyro_bias: [i16; 3],
    /// Gyro scale error, Q15.
    pub gyro_scale: [i16; 3],
}

#[derive(Clone, Debug)]
pub struct ErrorStateKalman {
    pub p: Cov,
}

impl Default for ErrorStateKalman {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorStateKalman {
    pub const fn new() -> Self {
        Self {
            p: [[0; STATES]; STATES],
        }
    }

    pub fn reset(&mut self) {
        self.p = [[0; STATES]; STATES];
    }

    pub fn diagonal(&self) -> [i16; STATES] {
        core::array::from_fn(|i| self.p[i][i])
    }

    /// `P ← Φ·P·Φᵀ + Q`.
    ///
    /// `gyro` is the corrected rate fed to the DCM this cycle, `bias` the
    /// current gyro bias estimate and `flagged` the per-axis measurement
    /// error flags.
    pub fn predict(&mut self, dcm: &Mat3, gyro: &[i32; 3], bias: &[i16; 3], dt: i16, flagged: [bool; 3]) {
        let q = process_noise(bias, dt, flagged);

        let mut phi = [[0i16; STATES]; STATES];
        for (i, row) in phi.iter_mut().enumerate() {
            row[i] = 32767;
        }
        for r in 0..3 {
            for c in 0..3 {
                let a = mult16x16_16(dcm[r][c], dt, 15);
                phi[r][3 + c] = a;
                let g = ((a as i64 * gyro[c] as i64) >> 15).clamp(i16::MIN as i64, i16::MAX as i64);
                phi[r][6 + c] = (g as i16).saturating_neg();
            }
        }

        let phi_p = mat_mult16(&phi, &self.p, 1, 15);
        self.p = mat_mult16(&phi_p, &mat_trans16(&phi), 1, 15);

        for (i, &qi) in q.iter().enumerate() {
            let v = (self.p[i][i] as i32 + qi as i32).min(P_DIAG_CAP);
            self.p[i][i] = v as i16;
        }
    }

    /// Fold the innovation `dz` into the covariance and return the error
    /// estimates.
    ///
    /// While `moving` every innovation is ignored; otherwise only flagged
    /// axes are. The gain uses the diagonal of `H·P·Hᵀ + R` alone.
    pub fn correct(&mut self, dz: &[i16; 3], flagged: [bool; 3], moving: bool, noise: MeasNoise) -> Correction {
        let r = if moving {
            [R_IGNORE; 3]
        } else {
            let pick = |flag: bool, nominal: i32| if flag { R_IGNORE } else { nominal };
            [
                pick(flagged[0], noise.roll_pitch),
                pick(flagged[1], noise.roll_pitch),
                pick(flagged[2], noise.yaw),
            ]
        };

        let ht = mat_trans16(&H);
        let pht: [Mat3; 3] = core::array::from_fn(|blk| {
            let block: Mat3 = core::array::from_fn(|i| {
                [self.p[3 * blk + i][0], self.p[3 * blk + i][1], self.p[3 * blk + i][2]]
            });
            mat_mult16(&block, &ht, 1, 15)
        });
        let hpht = mat_mult16(&H, &pht[0], 1, 15);

        let mut inv = [[0i16; 3]; 3];
        for i in 0..3 {
            let total = hpht[i][i] as i32 + r[i];
            inv[i][i] = if total > 0 {
                (GAIN_NUM / total).min(i16::MAX as i32) as i16
            } else {
                i16::MAX
            };
        }

        let gains: [Mat3; 3] = core::array::from_fn(|blk| mat_mult16(&pht[blk], &inv, 0, 10));

        let project = |k: &Mat3, c_o: u8, n: u8| -> [i16; 3] {
            core::array::from_fn(|i| {
                let mut acc = 0i32;
                for j in 0..3 {
                    acc = mac16x16_32(k[i][j], dz[j], acc, c_o);
                }
                r_shft32_16(acc, n)
            })
        };
        let out = Correction {
            attitude: project(&gains[0], 1, 14),
            gyro_bias: project(&gains[1], 0, 15),
            gyro_scale: project(&gains[2], 0, 15),
        };

        let mut eye_minus_kh = [[0i16; STATES]; STATES];
        for (i, row) in eye_minus_kh.iter_mut().enumerate() {
            row[i] = 32767;
        }
        for (blk, k) in gains.iter().enumerate() {
            let kh = mat_mult16(k, &H, 0, 15);
            for i in 0..3 {
                for j in 0..3 {
                    let cell = &mut eye_minus_kh[3 * blk + i][j];
                    *cell = cell.saturating_sub(kh[i][j]);
                }
            }
        }
        self.p = mat_mult16(&eye_minus_kh, &self.p, 2, 15);

        for i in 0..STATES {
            let d = &mut self.p[i][i];
            if *d < 0 && *d > P_NEG_TOLERANCE {
                *d = 0;
            }
        }
        out
    }
}

fn process_noise(bias: &[i16; 3], dt: i16, flagged: [bool; 3]) -> [i16; STATES] {
    let nominal = mult16x16_16(Q_ATT_RATE, dt, 15);
    let mut q = [Q_SCALE; STATES];
    for i in 0..3 {
        q[i] = if flagged[i] { Q_ATT_FLAGGED } else { nominal };
        let b = abs32(mult16x16_16(mult16x16_16(bias[i], Q_BIAS_FRACTION, 15), dt, 15) as i32);
        q[3 + i] = (b as i16).max(Q_FLOOR);
    }
    q
}

/// Innovation from gravity and magnetic field.
///
/// Both vectors are normalized by their reference magnitudes into Q12 and
/// rotated into the navigation frame. Level and on heading, gravity has no
/// x/y component and the field no y component; what remains is the error.
pub fn measurement_innovation(dcm: &Mat3, acc: &[i16; 3], mag: &[i16; 3], gravity: i16, field: i16) -> [i16; 3] {
    let acc_n = acc.map(|a| div16x16_16(a, gravity, 12));
    let mag_n = mag.map(|m| div16x16_16(m, field, 12));

    let nav = |row: &[i16; 3], v: &[i16; 3]| {
        let mut acc = 0i32;
        for k in 0..3 {
            acc = mac16x16_32(row[k], v[k], acc, 1);
        }
        r_shft32_16(acc, 11)
    };

    [
        nav(&dcm[0], &acc_n).saturating_neg(),
        nav(&dcm[1], &acc_n).saturating_neg(),
        nav(&dcm[1], &mag_n).saturating_neg(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ins::dcm::Dcm;

    const DT: i16 = 1638;
    const NOISE: MeasNoise = MeasNoise {
        roll_pitch: 1024,
        yaw: 1024,
    };
    const LEVEL: Mat3 = [[32766, 0, 0], [0, 32766, 0], [0, 0, 32766]];

    #[test]
    fn prediction_grows_and_caps_diagonal() {
        let mut kf = ErrorStateKalman::new();
        kf.predict(&LEVEL, &[0; 3], &[0; 3], DT, [false; 3]);
        let d = kf.diagonal();
        assert_eq!(d[0], 11);
        assert_eq!(d[3], Q_FLOOR);
        assert_eq!(d[8], Q_SCALE);

        for _ in 0..20_000 {
            kf.predict(&LEVEL, &[0; 3], &[0; 3], DT, [true; 3]);
        }
        assert!(kf.diagonal().iter().all(|&v| v as i32 <= P_DIAG_CAP));
        assert_eq!(kf.diagonal()[0] as i32, P_DIAG_CAP);
    }

    #[test]
    fn flagged_axes_get_more_process_noise() {
        let q = process_noise(&[0; 3], DT, [true, false, false]);
        assert_eq!(q[0], Q_ATT_FLAGGED);
        assert_eq!(q[1], 11);
        let q = process_noise(&[20_000, -20_000, 0], DT, [false; 3]);
        assert_eq!(q[3], q[4]);
        assert!(q[3] > Q_FLOOR);
        assert_eq!(q[5], Q_FLOOR);
    }

    #[test]
    fn covariance_shrinks_on_correction() {
        let mut kf = ErrorStateKalman::new();
        for _ in 0..50 {
            kf.predict(&LEVEL, &[0; 3], &[0; 3], DT, [false; 3]);
            kf.correct(&[0; 3], [false; 3], false, NOISE);
        }
        let open_loop = {
            let mut kf = ErrorStateKalman::new();
            for _ in 0..50 {
                kf.predict(&LEVEL, &[0; 3], &[0; 3], DT, [false; 3]);
            }
            kf.diagonal()
        };
        let closed = kf.diagonal();
        for i in 0..3 {
            assert!(closed[i] < open_loop[i], "{closed:?} vs {open_loop:?}");
        }
    }

    #[test]
    fn diagonal_never_rests_in_rounding_band() {
        let mut kf = ErrorStateKalman::new();
        let mut dcm = Dcm::default();
        let gyro = [3000i32, -2000, 1500];
        for i in 0..300 {
            dcm.integrate(&gyro, DT);
            dcm.normalize();
            kf.predict(&dcm.m, &gyro, &[40, -25, 10], DT, [false; 3]);
            let dz = [(i % 7) as i16 * 40 - 120, 60, -(i % 5) as i16 * 30];
            kf.correct(&dz, [false; 3], false, NOISE);
            for d in kf.diagonal() {
                assert!(!(d < 0 && d > P_NEG_TOLERANCE), "{:?}", kf.diagonal());
            }
        }
    }

    #[test]
    fn innovation_drives_attitude_error() {
        let mut kf = ErrorStateKalman::new();
        for _ in 0..20 {
            kf.predict(&LEVEL, &[0; 3], &[0; 3], DT, [false; 3]);
            kf.correct(&[0; 3], [false; 3], false, NOISE);
        }
        kf.predict(&LEVEL, &[0; 3], &[0; 3], DT, [false; 3]);
        let mut probe = kf.clone();

        let c = kf.correct(&[0, 2000, 0], [false; 3], false, NOISE);
        assert!(c.attitude[0] > 0, "{c:?}");
        assert_eq!(c.attitude[1], 0);

        // Moving: the same innovation is all but ignored.
        let ignored = probe.correct(&[0, 2000, 0], [false; 3], true, NOISE);
        assert!(ignored.attitude[0].abs() < c.attitude[0].abs());
    }

    #[test]
    fn innovation_is_zero_when_level_and_on_heading() {
        let dz = measurement_innovation(&LEVEL, &[0, 0, 256], &[512, 0, 0], 256, 512);
        assert_eq!(dz, [0, 0, 0]);
    }

    #[test]
    fn innovation_sees_tilt_and_heading_error() {
        // Body rolled right but DCM level: gravity leaks into nav y.
        let dz = measurement_innovation(&LEVEL, &[0, 128, 222], &[512, 0, 0], 256, 512);
        assert_eq!(dz[0], 0);
        assert!(dz[1] < -10_000, "{dz:?}");

        let dz = measurement_innovation(&LEVEL, &[0, 0, 256], &[443, 256, 0], 256, 512);
        assert!(dz[2] < -10_000, "{dz:?}");
    }
}
