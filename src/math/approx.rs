//! Table-driven transcendental approximations.
//!
//! Angles are phases where ±32768 is ±π. Every function interpolates
//! linearly between table entries; the filter gains are tuned against the
//! resulting error profile.

use super::fixed::lin_interp32;

// ── Tables ───────────────────────────────────────────────────────────────────

const COS_SHIFT: u8 = 12;
/// cos over [0, 2π] in 16 steps, Q15.
const COS_TBL: [i16; 17] = [
    32767, 30273, 23170, 12539, 0, -12539, -23170, -30273, -32768, -30273, -23170, -12539, 0,
    12539, 23170, 30273, 32767,
];

const ATAN_SHIFT: u8 = 11;
/// atan over ratios [0, 1] in 16 steps (one extra entry past 1.0).
const ATAN_TBL: [i16; 18] = [
    0, 651, 1297, 1933, 2555, 3159, 3742, 4301, 4836, 5344, 5826, 6282, 6712, 7117, 7497, 7855,
    8192, 8508,
];

const SQRT_SHIFT: u8 = 11;
const SQRT_MIN: i32 = 8192;
const SQRT_MAX: i32 = 34816;
const SQRT_TBL: [i32; 14] = [
    16384, 18317, 20066, 21673, 23170, 24575, 25905, 27169, 28377, 29536, 30651, 31727, 32767,
    33775,
];
/// `2^15 / √2^k` for k = 1..=14.
const SQRT_UP_NORM: [i32; 14] = [
    23170, 16384, 11585, 8192, 5792, 4096, 2896, 2048, 1448, 1024, 724, 512, 362, 256,
];
/// `2^8 * √2^k` for k = 1..=14.
const SQRT_DOWN_NORM: [i32; 14] = [
    362, 512, 724, 1024, 1448, 2048, 2896, 4096, 5793, 8192, 11585, 16384, 23170, 32767,
];

const LOG_SHIFT: u8 = 10;
/// 32768·log10(2): one octave in log10 units.
const LOG10_OCTAVE: i32 = 9864;
/// 32768·log10(z/32768) for z in [16384, 32768].
const LOG10_TBL: [i32; 17] = [
    -9864, -9001, -8188, -7418, -6688, -5994, -5332, -4700, -4094, -3513, -2955, -2418, -1900,
    -1401, -918, -452, 0,
];
/// 32768·10^(l/32768) for l in [-9864, 0].
const ALOG10_TBL: [i32; 11] = [
    16384, 17606, 18919, 20331, 21848, 23478, 25229, 27112, 29134, 31308, 33644,
];
/// 8192 / log10(2).
const LOG2_FROM_LOG10: i64 = 27213;

// ── Trigonometry ─────────────────────────────────────────────────────────────

/// Cosine of an unsigned Q16 phase (65536 = 2π), Q15 result.
pub fn cos16_16(phase: u16) -> i16 {
    let idx = (phase >> COS_SHIFT) as usize;
    let x0 = (idx as i32) << COS_SHIFT;
    lin_interp32(
        phase as i32,
        x0,
        COS_SHIFT,
        COS_TBL[idx] as i32,
        COS_TBL[idx + 1] as i32,
    ) as i16
}

/// Sine of an unsigned Q16 phase, via a quarter-turn shift of cosine.
pub fn sin16_16(phase: u16) -> i16 {
    cos16_16(phase.wrapping_sub(16384))
}

/// Cosine of a signed phase.
#[inline]
pub fn cos_phase(angle: i16) -> i16 {
    cos16_16(angle as u16)
}

/// Sine of a signed phase.
#[inline]
pub fn sin_phase(angle: i16) -> i16 {
    sin16_16(angle as u16)
}

#[inline]
fn atan_interp(ratio: i32) -> i32 {
    let idx = (ratio >> ATAN_SHIFT) as usize;
    lin_interp32(
        ratio,
        (idx as i32) << ATAN_SHIFT,
        ATAN_SHIFT,
        ATAN_TBL[idx] as i32,
        ATAN_TBL[idx + 1] as i32,
    )
}

/// Four-quadrant arctangent, result in phase units.
///
/// The ratio of the smaller to the larger magnitude is looked up in the
/// first octant and the result mirrored into place from the input signs.
/// `atan2(0, 0)` is 0.
pub fn atan2_16(y: i16, x: i16) -> i16 {
    if x == 0 && y == 0 {
        return 0;
    }
    let ax = (x as i32).unsigned_abs();
    let ay = (y as i32).unsigned_abs();

    let angle = if ax >= ay {
        atan_interp((ay * 32767 / (ax + 1)) as i32)
    } else {
        16383 - atan_interp((ax * 32767 / (ay + 1)) as i32)
    };

    let a = if x < 0 && y >= 0 {
        32767 - angle
    } else if x <= 0 && y <= 0 {
        angle - 32768
    } else if x >= 0 && y <= 0 {
        -angle
    } else {
        angle
    };
    a as i16
}

// ── Square root ──────────────────────────────────────────────────────────────

/// Square root of a Qn value, result in the same Qn.
///
/// The input is normalized into the table domain by doubling or halving,
/// and the table output is rescaled by a power of √2 for the shift count.
/// Non-positive inputs return 0.
pub fn sqrt32_32(input: i32, n: u8) -> i32 {
    if input <= 0 {
        return 0;
    }
    let q_change = 15 - n as i32;
    let mut s = input;
    let mut shifts: i32 = 0;

    while s <= SQRT_MIN {
        s <<= 1;
        shifts += 1;
    }
    while s >= SQRT_MAX {
        s >>= 1;
        shifts -= 1;
    }

    let idx = ((s - SQRT_MIN) >> SQRT_SHIFT) as usize;
    let mut r = if idx < SQRT_TBL.len() - 1 {
        lin_interp32(
            s,
            SQRT_MIN + ((idx as i32) << SQRT_SHIFT),
            SQRT_SHIFT,
            SQRT_TBL[idx],
            SQRT_TBL[idx + 1],
        )
    } else {
        SQRT_TBL[SQRT_TBL.len() - 1]
    };

    shifts += q_change;
    if shifts > 0 {
        let k = shifts.min(14) as usize;
        r = ((SQRT_UP_NORM[k - 1] as i64 * r as i64) >> 15) as i32;
    } else if shifts < 0 {
        let k = (-shifts).min(14) as usize;
        r = ((r as i64 * SQRT_DOWN_NORM[k - 1] as i64) >> 8) as i32;
    }
    r
}

// ── Logarithms ───────────────────────────────────────────────────────────────

/// `32768 * log10(y / 32768)`.
pub fn log10_32(y: u32) -> i32 {
    let y = y.max(1);
    let mut octaves: i32 = 0;
    let z: u32 = if y >= 32767 {
        let mut t = y;
        while t > 32767 {
            t >>= 1;
            octaves += 1;
        }
        y >> octaves
    } else if y < 16384 {
        let mut t = y;
        while t < 16385 {
            t <<= 1;
            octaves += 1;
        }
        let z = y << octaves;
        octaves = -octaves;
        z
    } else {
        y
    };

    let z = z as i32;
    let idx = ((z - 16384) >> LOG_SHIFT) as usize;
    let frac = if idx < LOG10_TBL.len() - 1 {
        lin_interp32(
            z,
            16384 + ((idx as i32) << LOG_SHIFT),
            LOG_SHIFT,
            LOG10_TBL[idx],
            LOG10_TBL[idx + 1],
        )
    } else {
        LOG10_TBL[LOG10_TBL.len() - 1]
    };
    LOG10_OCTAVE * octaves + frac
}

/// `32768 * log2(y / 32768)`.
pub fn log2_32(y: u32) -> i32 {
    let mut l = log10_32(y) as i64;
    let mut count = 0u8;
    while l > 32767 {
        l >>= 1;
        count += 1;
    }
    let p = l * LOG2_FROM_LOG10;
    let r = if count <= 13 {
        p >> (13 - count)
    } else {
        p << (count - 13)
    };
    r.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Inverse of [`log10_32`]: `32768 * 10^(l / 32768)`, saturating at
/// `u32::MAX`.
pub fn alog10_32(l: i32) -> u32 {
    enum Range {
        Up(u32),
        Down(u32),
        Unit { invert: bool },
    }

    let octave = LOG10_OCTAVE as i64;
    let (zl, range) = if l > LOG10_OCTAVE {
        let wide = l as i64;
        let mut m = wide / octave;
        if wide % octave > 0 {
            m += 1;
        }
        ((wide - m * octave) as i32, Range::Up(m as u32))
    } else if l < -LOG10_OCTAVE {
        let wide = l as i64;
        let m = wide / -octave;
        ((wide + m * octave) as i32, Range::Down(m as u32))
    } else if l > 0 {
        (-l, Range::Unit { invert: true })
    } else {
        (l, Range::Unit { invert: false })
    };

    let idx = (((zl + LOG10_OCTAVE) >> LOG_SHIFT) as usize).min(ALOG10_TBL.len() - 2);
    let z = lin_interp32(
        zl,
        -LOG10_OCTAVE + ((idx as i32) << LOG_SHIFT),
        LOG_SHIFT,
        ALOG10_TBL[idx],
        ALOG10_TBL[idx + 1],
    ) as u32;

    match range {
        Range::Up(m) if m >= 32 => u32::MAX,
        Range::Up(m) => ((z as u64) << m).min(u32::MAX as u64) as u32,
        Range::Down(m) if m >= 32 => 0,
        Range::Down(m) => z >> m,
        Range::Unit { invert: true } => (32767u32 * 32768) / z.max(1),
        Range::Unit { invert: false } => z,
    }
}

/// Inverse of [`log2_32`].
pub fn alog2_32(l: i32) -> u32 {
    let mut l = l as i64;
    let mut count = 0u8;
    while l > 32767 || l < -32768 {
        l >>= 1;
        count += 1;
    }
    let p = l * LOG10_OCTAVE as i64;
    let arg = if count <= 15 {
        p >> (15 - count)
    } else {
        p << (count - 15)
    };
    alog10_32(arg.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
}
