//! Small dense `f32` linear algebra for calibration.
//!
//! Fixed-size, stack-allocated matrices addressed as `[[f32; C]; R]`. Only
//! the ellipsoid fit uses these; the runtime filter is fixed-point.

#[allow(unused_imports)]
use micromath::F32Ext;

use crate::error::CalError;

// ── Constants ────────────────────────────────────────────────────────────────

/// Largest system Gauss-Jordan inversion is used for.
pub const MAX_INV_DIM: usize = 9;
/// Largest matrix the power method is used for.
pub const MAX_EIG_DIM: usize = 6;
/// Pivots smaller than this are treated as zero.
const PIVOT_EPS: f32 = 1e-7;
/// Power iteration stops once the eigenvalue changes by less than this
/// percentage between steps.
const EIG_TOL_PCT: f32 = 0.0001;
const EIG_MAX_ITER: u32 = 10_000;

// ── Basic operations ─────────────────────────────────────────────────────────

/// C = A · B
pub fn mat_mult_f<const R: usize, const K: usize, const C: usize>(
    a: &[[f32; K]; R],
    b: &[[f32; C]; K],
) -> [[f32; C]; R] {
    let mut out = [[0.0f32; C]; R];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            let mut sum = 0.0f32;
            for k in 0..K {
                sum += a[r][k] * b[k][c];
            }
            *cell = sum;
        }
    }
    out
}

pub fn mat_trans_f<const R: usize, const C: usize>(a: &[[f32; C]; R]) -> [[f32; R]; C] {
    let mut out = [[0.0f32; R]; C];
    for r in 0..R {
        for c in 0..C {
            out[c][r] = a[r][c];
        }
    }
    out
}

pub fn mat_eye_f<const N: usize>() -> [[f32; N]; N] {
    let mut out = [[0.0f32; N]; N];
    for (i, row) in out.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    out
}

pub fn mat_scale_f<const R: usize, const C: usize>(a: &[[f32; C]; R], s: f32) -> [[f32; C]; R] {
    let mut out = *a;
    for cell in out.iter_mut().flatten() {
        *cell *= s;
    }
    out
}

/// C = A − B
pub fn mat_sub_f<const R: usize, const C: usize>(
    a: &[[f32; C]; R],
    b: &[[f32; C]; R],
) -> [[f32; C]; R] {
    let mut out = *a;
    for (o, x) in out.iter_mut().flatten().zip(b.iter().flatten()) {
        *o -= *x;
    }
    out
}

/// Scale `v` to unit length in place and return its original length.
/// A zero vector is left unchanged.
pub fn norm_f(v: &mut [f32]) -> f32 {
    let len = libm::sqrtf(v.iter().map(|x| x * x).sum());
    if len > 0.0 {
        for x in v.iter_mut() {
            *x /= len;
        }
    }
    len
}

/// Index of the entry with the largest magnitude.
pub fn abs_max_index(v: &[f32]) -> usize {
    let mut best = 0;
    for (i, x) in v.iter().enumerate() {
        if x.abs() > v[best].abs() {
            best = i;
        }
    }
    best
}

// ── Inversion ────────────────────────────────────────────────────────────────

/// Gauss-Jordan inverse with partial pivoting. `None` if the matrix is
/// singular or larger than [`MAX_INV_DIM`].
pub fn mat_inv_f<const N: usize>(a: &[[f32; N]; N]) -> Option<[[f32; N]; N]> {
    if N > MAX_INV_DIM {
        return None;
    }
    let mut lhs = *a;
    let mut inv = mat_eye_f::<N>();

    for col in 0..N {
        // Bring the largest remaining pivot up.
        let mut pivot_row = col;
        for r in col + 1..N {
            if lhs[r][col].abs() > lhs[pivot_row][col].abs() {
                pivot_row = r;
            }
        }
        if lhs[pivot_row][col].abs() <= PIVOT_EPS {
            return None;
        }
        lhs.swap(col, pivot_row);
        inv.swap(col, pivot_row);

        let scale = 1.0 / lhs[col][col];
        for c in 0..N {
            lhs[col][c] *= scale;
            inv[col][c] *= scale;
        }

        for r in 0..N {
            if r == col {
                continue;
            }
            let factor = lhs[r][col];
            if factor == 0.0 {
                continue;
            }
            for c in 0..N {
                lhs[r][c] -= factor * lhs[col][c];
                inv[r][c] -= factor * inv[col][c];
            }
        }
    }

    if inv.iter().flatten().all(|x| x.is_finite()) {
        Some(inv)
    } else {
        None
    }
}

// ── Eigen-decomposition ──────────────────────────────────────────────────────

/// Eigenvalues in ascending order of discovery rank (dominant last) and
/// their unit eigenvectors stored as rows.
#[derive(Clone, Copy, Debug)]
pub struct Eigen<const N: usize> {
    pub values: [f32; N],
    pub vectors: [[f32; N]; N],
}

/// Iterate `x ← A·x / max(A·x)` from `seed`. `Ok(None)` when the seed has
/// no component along any remaining eigenvector.
fn power_iterate<const N: usize>(
    work: &[[f32; N]; N],
    seed: [f32; N],
    floor: f32,
) -> Result<Option<(f32, [f32; N])>, CalError> {
    let mut x = seed;
    let mut lambda = 0.0f32;

    for iter in 0..EIG_MAX_ITER {
        let mut y = [0.0f32; N];
        for (i, yi) in y.iter_mut().enumerate() {
            *yi = work[i].iter().zip(x.iter()).map(|(w, v)| w * v).sum();
        }
        let next = y[abs_max_index(&y)];
        if next.abs() <= floor {
            if iter == 0 {
                return Ok(None);
            }
            return Ok(Some((0.0, x)));
        }
        for (xi, yi) in x.iter_mut().zip(y.iter()) {
            *xi = yi / next;
        }
        let change = ((next - lambda) / next).abs() * 100.0;
        lambda = next;
        if change <= EIG_TOL_PCT {
            return if lambda.is_finite() {
                Ok(Some((lambda, x)))
            } else {
                Err(CalError::NoConvergence)
            };
        }
    }
    Err(CalError::NoConvergence)
}

/// Power method with deflation for a symmetric matrix.
///
/// Each pass finds the dominant eigenpair of the working matrix, stores it
/// from the back of the output, and removes it with `A -= λ·x·xᵀ`. The
/// all-ones start vector is tried first, then the unit axes.
pub fn mat_eigs_f<const N: usize>(a: &[[f32; N]; N]) -> Result<Eigen<N>, CalError> {
    if N > MAX_EIG_DIM {
        return Err(CalError::NoConvergence);
    }
    let scale = a.iter().flatten().fold(0.0f32, |m, x| m.max(x.abs()));
    let floor = scale * 1e-6;
    let mut work = *a;
    let mut out = Eigen {
        values: [0.0; N],
        vectors: [[0.0; N]; N],
    };

    for found in 0..N {
        let mut pair = power_iterate(&work, [1.0f32; N], floor)?;
        let mut axis = 0;
        while pair.is_none() && axis < N {
            let mut seed = [0.0f32; N];
            seed[axis] = 1.0;
            pair = power_iterate(&work, seed, floor)?;
            axis += 1;
        }
        let (lambda, mut x) = pair.unwrap_or((0.0, [1.0f32; N]));

        norm_f(&mut x);
        let slot = N - 1 - found;
        out.values[slot] = lambda;
        out.vectors[slot] = x;

        for r in 0..N {
            for c in 0..N {
                work[r][c] -= lambda * x[r] * x[c];
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn multiply_and_transpose() {
        let a = [[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let at = mat_trans_f(&a);
        let p = mat_mult_f(&a, &at);
        assert_eq!(p, [[14.0, 32.0], [32.0, 77.0]]);
        let d = mat_sub_f(&p, &mat_scale_f(&mat_eye_f::<2>(), 14.0));
        assert_eq!(d[0][0], 0.0);
        assert_eq!(d[1][1], 63.0);
    }

    #[test]
    fn inverse_of_known_matrix() {
        let a = [[4.0f32, 7.0, 2.0], [3.0, 6.0, 1.0], [2.0, 5.0, 3.0]];
        let inv = mat_inv_f(&a).expect("invertible");
        let eye = mat_mult_f(&a, &inv);
        for r in 0..3 {
            for c in 0..3 {
                let want = if r == c { 1.0 } else { 0.0 };
                assert!(close(eye[r][c], want, 1e-5), "{r},{c}: {}", eye[r][c]);
            }
        }
    }

    #[test]
    fn inverse_needs_row_swap() {
        let a = [[0.0f32, 1.0], [1.0, 0.0]];
        let inv = mat_inv_f(&a).expect("permutation is invertible");
        assert_eq!(inv, a);
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let a = [[1.0f32, 2.0, 3.0], [2.0, 4.0, 6.0], [1.0, 0.0, 1.0]];
        assert!(mat_inv_f(&a).is_none());
        assert!(mat_inv_f(&[[0.0f32; 4]; 4]).is_none());
    }

    #[test]
    fn eigen_of_symmetric_pair() {
        let a = [[2.0f32, 1.0], [1.0, 2.0]];
        let e = mat_eigs_f(&a).expect("converges");
        assert!(close(e.values[1], 3.0, 1e-4));
        assert!(close(e.values[0], 1.0, 1e-3));
        let h = core::f32::consts::FRAC_1_SQRT_2;
        assert!(close(e.vectors[1][0].abs(), h, 1e-3));
        assert!(close(e.vectors[1][1].abs(), h, 1e-3));
        // Eigenvectors are orthogonal.
        let dot: f32 = e.vectors[0].iter().zip(e.vectors[1].iter()).map(|(a, b)| a * b).sum();
        assert!(dot.abs() < 1e-3);
    }

    #[test]
    fn eigen_reconstructs_matrix() {
        let a = [[5.0f32, 1.0, 0.5], [1.0, 4.0, 0.25], [0.5, 0.25, 2.0]];
        let e = mat_eigs_f(&a).expect("converges");
        assert!(e.values[0] <= e.values[1] && e.values[1] <= e.values[2]);
        for r in 0..3 {
            for c in 0..3 {
                let sum: f32 = (0..3)
                    .map(|k| e.values[k] * e.vectors[k][r] * e.vectors[k][c])
                    .sum();
                assert!(close(sum, a[r][c], 1e-3), "{r},{c}: {sum}");
            }
        }
    }

    #[test]
    fn norm_scales_to_unit_length() {
        let mut v = [3.0f32, 4.0];
        assert_eq!(norm_f(&mut v), 5.0);
        assert!(close(v[0], 0.6, 1e-6) && close(v[1], 0.8, 1e-6));
        assert_eq!(abs_max_index(&[1.0, -7.0, 3.0]), 1);
    }
}
