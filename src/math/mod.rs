//! Numeric kernels.
//!
//! `fixed` holds the Q15 integer arithmetic the attitude pipeline runs on,
//! `approx` the table-interpolated trig, root and log approximations, and
//! `linalg` the small float matrix routines used by the ellipsoid fit.

pub mod approx;
pub mod fixed;
pub mod linalg;
