/// Tunables for the INS engine. Numeric contracts of the fixed-point
/// kernel are not here; they live as `const`s next to the code that
/// depends on them.
#[derive(Clone, Copy, Debug)]
pub struct InsConfig {
    /// Samples averaged by DCM initialization.
    pub dcm_init_samples: u16,
    /// Reads averaged into one calibration sample.
    pub cal_sample_reads: u16,
    /// Sleep between averaged reads (ms).
    pub sample_spacing_ms: u32,
    /// Settle time after each sensor configuration write (ms).
    pub startup_settle_ms: u32,
    /// Nominal update period (µs), 20 Hz.
    pub update_period_us: u32,
    /// Updates after a reset before tracking errors are judged.
    pub lock_wait: u8,
    /// Consecutive cycles with a measurement error that declare loss of lock.
    pub loss_of_lock_count: u16,
    /// Residual must exceed its average by this factor to flag an axis.
    pub residual_error_scaler: i32,
    /// Accelerometer roll/pitch measurement noise. Hand-tuned for stability.
    pub roll_pitch_meas_noise: i32,
    /// Magnetometer yaw measurement noise. Hand-tuned for stability.
    pub yaw_meas_noise: i32,
    /// Emit a debug line every N updates (0 disables).
    pub debug_every: u8,
}

impl Default for InsConfig {
    fn default() -> Self {
        Self {
            dcm_init_samples: 10,
            cal_sample_reads: 10,
            sample_spacing_ms: 50,
            startup_settle_ms: 10,
            update_period_us: 50_000,
            lock_wait: 100,
            loss_of_lock_count: 64,
            residual_error_scaler: 5,
            roll_pitch_meas_noise: 1024,
            yaw_meas_noise: 1024,
            debug_every: 5,
        }
    }
}
