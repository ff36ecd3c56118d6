//! Tracking-error detection.
//!
//! Two independent watchers feed the filter:
//!
//! - platform dynamics: averaged specific-force error and rotation per step,
//!   which mark the platform as moving for a couple of cycles
//! - attitude residual: the filtered attitude against the raw
//!   accelerometer/magnetometer attitude, averaged per axis
//!
//! Axes whose residual jumps well above its own average are flagged; a long
//! enough run of flagged cycles, or a negative covariance diagonal, is a
//! loss of lock.

use crate::config::InsConfig;
use crate::math::approx::sqrt32_32;
use crate::math::fixed::{abs32, mac16x16_32, phase_error, r_shft32_16};

/// Residual average weight of the old value, Q12.
const RES_AVR_WEIGHT: i64 = 3890;
const RES_AVR_ONE: i64 = 4095;
/// Dynamics average weights, Q11.
const DYN_AVR_OLD: i16 = 1637;
const DYN_AVR_NEW: i16 = 410;
/// Per-step rotation, Q14, beyond which the platform is moving.
const DPHASE_MOVING: i16 = 1143;
/// Cycles the moving state is held after the last trigger.
const MOVING_HOLD: u8 = 2;

#[derive(Clone, Debug)]
pub struct Tracking {
    lock_wait: u8,
    loss_of_lock_count: u16,
    error_scaler: i32,

    pub lock_count: u8,
    pub error_count: u16,
    pub flags: [bool; 3],
    pub loss_of_lock: bool,
    /// Latest |DCM − raw| attitude residual, phase units.
    pub residual: [i16; 3],
    /// Residual average, phase units << 5.
    pub avr_residual: [i32; 3],

    pub moving_count: u8,
    pub avr_specific_force: i16,
    pub avr_dphase: i16,
}

impl Tracking {
    pub fn new(cfg: &InsConfig) -> Self {
        Self {
            lock_wait: cfg.lock_wait,
            loss_of_lock_count: cfg.loss_of_lock_count,
            error_scaler: cfg.residual_error_scaler,
            lock_count: 0,
            error_count: 0,
            flags: [false; 3],
            loss_of_lock: false,
            residual: [0; 3],
            avr_residual: [0; 3],
            moving_count: 0,
            avr_specific_force: 0,
            avr_dphase: 0,
        }
    }

    /// Forget everything learned since the last reset.
    pub fn reset(&mut self) {
        *self = Self {
            lock_wait: self.lock_wait,
            loss_of_lock_count: self.loss_of_lock_count,
            error_scaler: self.error_scaler,
            ..Self::new(&InsConfig::default())
        };
    }

    #[inline]
    pub fn locked(&self) -> bool {
        self.lock_count == self.lock_wait
    }

    #[inline]
    pub fn moving(&self) -> bool {
        self.moving_count > 0
    }

    /// Count one more filter cycle toward the lock wait.
    pub fn tick_lock(&mut self) {
        if self.lock_count < self.lock_wait {
            self.lock_count += 1;
        }
    }

    /// Update the platform dynamics averages.
    ///
    /// `acc` is the calibrated accelerometer sample, `gravity` its expected
    /// magnitude and `dphase` the per-axis rotation of this step (Q14).
    pub fn update_dynamics(&mut self, acc: &[i16; 3], gravity: i16, dphase: &[i16; 3]) {
        let mut sum = 0i32;
        for &a in acc {
            sum = mac16x16_32(a, a, sum, 0);
        }
        let specific_force = abs32(sqrt32_32(sum, 0) - gravity as i32).min(i16::MAX as i32) as i16;
        self.avr_specific_force = average(self.avr_specific_force, specific_force);

        let mut rot = 0i32;
        for &d in dphase {
            rot = mac16x16_32(d, d, rot, 0);
        }
        let dph = sqrt32_32(r_shft32_16(rot, 14) as i32, 14).min(i16::MAX as i32) as i16;
        self.avr_dphase = average(self.avr_dphase, dph);

        if self.moving_count > 0 {
            self.moving_count -= 1;
        }
        let quarter_g = gravity >> 2;
        if self.locked()
            && (self.avr_specific_force > quarter_g || specific_force > quarter_g || dph > DPHASE_MOVING)
        {
            self.moving_count = MOVING_HOLD;
        }
    }

    /// Fold this cycle's filtered and raw attitude into the residual average.
    pub fn update_residual(&mut self, dcm_att: &[i16; 3], raw_att: &[i16; 3]) {
        for i in 0..3 {
            let res = abs32(phase_error(dcm_att[i], raw_att[i]) as i32).min(i16::MAX as i32) as i16;
            self.residual[i] = res;
            let next = (self.avr_residual[i] as i64 * RES_AVR_WEIGHT
                + ((res as i64) << 5) * (RES_AVR_ONE - RES_AVR_WEIGHT)
                + 2048)
                >> 12;
            self.avr_residual[i] = next as i32;
        }
    }

    /// Judge this cycle's residuals and covariance.
    ///
    /// Nothing is judged until the lock wait has run out. Returns whether
    /// lock was lost.
    pub fn check(&mut self, p_diag: &[i16]) -> bool {
        self.loss_of_lock = false;
        if !self.locked() {
            return false;
        }

        for i in 0..3 {
            let limit = (self.avr_residual[i] >> 4).saturating_mul(self.error_scaler);
            self.flags[i] = self.residual[i] as i32 > limit;
        }
        if self.flags.iter().any(|&f| f) {
            self.error_count = self.error_count.saturating_add(1);
            if self.error_count == self.loss_of_lock_count {
                self.loss_of_lock = true;
            }
        } else {
            self.error_count = 0;
        }

        if p_diag.iter().any(|&d| d < 0) {
            self.loss_of_lock = true;
        }
        self.loss_of_lock
    }
}

#[inline]
fn average(avr: i16, new: i16) -> i16 {
    let acc = mac16x16_32(avr, DYN_AVR_OLD, 0, 0);
    r_shft32_16(mac16x16_32(new, DYN_AVR_NEW, acc, 0), 11)
}

/// Averaged residual as reported in the state estimate. The stored average
/// carries five extra bits but is scaled back by four, so the figure reads
/// as twice the mean residual in degrees.
#[inline]
pub fn residual_degrees(avr: i32) -> f32 {
    avr as f32 * 180.0 / (1u32 << 19) as f32
}
