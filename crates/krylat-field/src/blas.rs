//! Level-1 BLAS kernels over raw complex storage.
//!
//! These are the reductions and updates every Krylov iteration is built from.
//! With the `parallel` feature, vectors at or above [`PARALLEL_THRESHOLD`]
//! components are processed with rayon; shorter ones run sequentially since
//! the fork/join overhead dominates.

use num_complex::Complex64 as C64;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Minimum vector length for the parallel code path.
pub const PARALLEL_THRESHOLD: usize = 1 << 13;

/// Conjugate inner product `sum(conj(x_i) * y_i)`.
pub fn cdot(x: &[C64], y: &[C64]) -> C64 {
    assert_eq!(x.len(), y.len(), "cdot length mismatch");

    #[cfg(feature = "parallel")]
    {
        if x.len() >= PARALLEL_THRESHOLD {
            return x
                .par_iter()
                .zip(y.par_iter())
                .map(|(a, b)| a.conj() * b)
                .sum();
        }
    }

    x.iter().zip(y).map(|(a, b)| a.conj() * b).sum()
}

/// Squared 2-norm `sum(|x_i|^2)`.
pub fn norm2(x: &[C64]) -> f64 {
    #[cfg(feature = "parallel")]
    {
        if x.len() >= PARALLEL_THRESHOLD {
            return x.par_iter().map(|z| z.norm_sqr()).sum();
        }
    }

    x.iter().map(|z| z.norm_sqr()).sum()
}

/// Elementwise update `y_i = f(y_i, x_i)`.
pub fn zip_update<F>(y: &mut [C64], x: &[C64], f: F)
where
    F: Fn(C64, C64) -> C64 + Sync + Send,
{
    assert_eq!(y.len(), x.len(), "zip_update length mismatch");

    #[cfg(feature = "parallel")]
    {
        if y.len() >= PARALLEL_THRESHOLD {
            y.par_iter_mut()
                .zip(x.par_iter())
                .for_each(|(yi, &xi)| *yi = f(*yi, xi));
            return;
        }
    }

    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi = f(*yi, xi);
    }
}

/// Elementwise update `y_i = f(y_i)`.
pub fn map_in_place<F>(y: &mut [C64], f: F)
where
    F: Fn(C64) -> C64 + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        if y.len() >= PARALLEL_THRESHOLD {
            y.par_iter_mut().for_each(|yi| *yi = f(*yi));
            return;
        }
    }

    for yi in y.iter_mut() {
        *yi = f(*yi);
    }
}
