//! Q-format integer arithmetic.
//!
//! Every operation takes the fractional bit count explicitly. Products are
//! rounded on their magnitude and the sign re-applied afterwards, so
//! positive and negative operands round symmetrically. Results that do not
//! fit the output width saturate.

// ── Constants ────────────────────────────────────────────────────────────────

/// +π in Q0.15 phase units.
pub const FXDPNT_PI: i16 = 32767;
/// −π in Q0.15 phase units.
pub const FXDPNT_NEG_PI: i16 = -32768;
/// 2π in Q0.16 phase units; phase differences wrap at this value.
pub const TWO_PI_WRAP: i32 = 65536;

// ── Helpers ──────────────────────────────────────────────────────────────────

#[inline]
fn sat16(x: i64) -> i16 {
    x.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

#[inline]
fn sat32(x: i64) -> i32 {
    x.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Sign-magnitude rounding shift: `sign(p) * ((|p| + 2^(n-1)) >> n)`.
#[inline]
fn round_shift(p: i64, n: u8) -> i64 {
    let mag = p.unsigned_abs();
    let r = if n == 0 { mag } else { (mag + (1u64 << (n - 1))) >> n };
    if p < 0 {
        -(r as i64)
    } else {
        r as i64
    }
}

// ── Scalar primitives ────────────────────────────────────────────────────────

/// Truncating shift of a 32-bit value into 16 bits. The magnitude is
/// shifted so that `-x` and `x` map to opposite results.
#[inline]
pub fn r_shft32_16(x: i32, n: u8) -> i16 {
    let mag = ((x as i64).unsigned_abs() >> n) as i64;
    if x < 0 {
        sat16(-mag)
    } else {
        sat16(mag)
    }
}

/// `(a * b) >> n` rounded, 16-bit result.
#[inline]
pub fn mult16x16_16(a: i16, b: i16, n: u8) -> i16 {
    sat16(round_shift(a as i64 * b as i64, n))
}

/// `(a * b) >> n` rounded, 32-bit result.
#[inline]
pub fn mult16x16_32(a: i16, b: i16, n: u8) -> i32 {
    sat32(round_shift(a as i64 * b as i64, n))
}

/// `(a * b) >> n` rounded with a 64-bit intermediate.
#[inline]
pub fn mult32x32_32(a: i32, b: i32, n: u8) -> i32 {
    sat32(round_shift(a as i64 * b as i64, n))
}

/// `(a << n) / b`, truncated toward zero. Division by zero saturates toward
/// the sign of `a`.
#[inline]
pub fn div16x16_16(a: i16, b: i16, n: u8) -> i16 {
    if b == 0 {
        return match a {
            0 => 0,
            a if a > 0 => i16::MAX,
            _ => i16::MIN,
        };
    }
    sat16(((a as i64) << n) / b as i64)
}

/// Multiply-accumulate: `acc + sign(a*b) * (|a*b| >> c_o)`.
#[inline]
pub fn mac16x16_32(a: i16, b: i16, acc: i32, c_o: u8) -> i32 {
    let p = a as i64 * b as i64;
    let mag = (p.unsigned_abs() >> c_o) as i64;
    let term = if p < 0 { -mag } else { mag };
    sat32(acc as i64 + term)
}

/// Dot product of `a` and `b` accumulated onto `acc` with a per-product
/// shift of `c_o`, then rounded down by `n`.
pub fn vmult16x16_32(a: &[i16], b: &[i16], acc: i32, c_o: u8, n: u8) -> i32 {
    let sum = a
        .iter()
        .zip(b.iter())
        .fold(acc, |s, (&x, &y)| mac16x16_32(x, y, s, c_o));
    sat32(round_shift(sum as i64, n))
}

/// Clamp `x` to the signed `n`-bit range `[-2^n, 2^n - 1]`.
#[inline]
pub fn hard_limit32(x: i32, n: u8) -> i32 {
    let hi = (1i64 << n) - 1;
    let lo = -(1i64 << n);
    sat32((x as i64).clamp(lo, hi))
}

#[inline]
pub fn abs32(x: i32) -> i32 {
    x.saturating_abs()
}

/// Linear interpolation between table points `(x0, y0)` and
/// `(x0 + 2^step, y1)`.
#[inline]
pub fn lin_interp32(x: i32, x0: i32, step: u8, y0: i32, y1: i32) -> i32 {
    let dy = y1 - y0;
    let dx = x - x0;
    y0 + r_shft32_16(dy.saturating_mul(dx), step) as i32
}

/// Wrap the difference of two phases into `(-π, π]`.
#[inline]
pub fn phase_error(a: i16, b: i16) -> i16 {
    let mut e = a as i32 - b as i32;
    if e <= FXDPNT_NEG_PI as i32 {
        e += TWO_PI_WRAP;
    } else if e > FXDPNT_PI as i32 {
        e -= TWO_PI_WRAP;
    }
    sat16(e as i64)
}

// ── Matrices ─────────────────────────────────────────────────────────────────

/// `A·B` with every product shifted by `c_o` before accumulation and the
/// sum shifted down to a total of `c_n` fractional bits.
pub fn mat_mult16<const R: usize, const K: usize, const C: usize>(
    a: &[[i16; K]; R],
    b: &[[i16; C]; K],
    c_o: u8,
    c_n: u8,
) -> [[i16; C]; R] {
    let shift = c_n.saturating_sub(c_o);
    let mut out = [[0i16; C]; R];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            let mut acc = 0i32;
            for k in 0..K {
                acc = mac16x16_32(a[r][k], b[k][c], acc, c_o);
            }
            *cell = r_shft32_16(acc, shift);
        }
    }
    out
}

pub fn mat_trans16<const R: usize, const C: usize>(a: &[[i16; C]; R]) -> [[i16; R]; C] {
    let mut out = [[0i16; R]; C];
    for r in 0..R {
        for c in 0..C {
            out[c][r] = a[r][c];
        }
    }
    out
}
