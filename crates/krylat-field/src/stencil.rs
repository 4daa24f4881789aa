//! Nearest-neighbour lattice stencil operator.
//!
//! A stand-in for a discretized fermion operator: a diagonal mass term plus
//! hopping to the eight nearest neighbours of every site,
//!
//! ```text
//! (A x)(s) = (m + 2*NDIM) x(s) - sum_mu [ (1 - a) x(s + mu) + (1 + a) x(s - mu) ]
//! ```
//!
//! With asymmetry `a = 0` the operator is Hermitian with spectrum in
//! `[m, m + 4*NDIM]`. A non-zero `a` leaves the Hermitian part unchanged but
//! makes the operator non-normal, which is what BiCGstab, GCR and MR are for.

use num_complex::Complex64 as C64;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "parallel")]
use crate::blas::PARALLEL_THRESHOLD;
use crate::geometry::{LatticeGeometry, NDIM};
use crate::operator::{AdjointOperator, LinearOperator};

/// Hopping stencil with mass and forward/backward asymmetry.
#[derive(Debug, Clone)]
pub struct StencilOperator {
    geometry: LatticeGeometry,
    mass: f64,
    asymmetry: f64,
    /// Per site: forward neighbours then backward neighbours.
    neighbours: Vec<[usize; 2 * NDIM]>,
}

impl StencilOperator {
    /// Hermitian stencil with the given mass.
    pub fn new(geometry: LatticeGeometry, mass: f64) -> Self {
        let neighbours = (0..geometry.volume())
            .map(|site| {
                let mut nb = [0; 2 * NDIM];
                for mu in 0..NDIM {
                    nb[mu] = geometry.neighbour(site, mu, true);
                    nb[NDIM + mu] = geometry.neighbour(site, mu, false);
                }
                nb
            })
            .collect();

        Self {
            geometry,
            mass,
            asymmetry: 0.0,
            neighbours,
        }
    }

    /// Set the forward/backward hopping asymmetry.
    pub fn with_asymmetry(mut self, asymmetry: f64) -> Self {
        self.asymmetry = asymmetry;
        self
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn asymmetry(&self) -> f64 {
        self.asymmetry
    }

    /// Smallest and largest eigenvalue of the Hermitian part.
    pub fn spectral_bounds(&self) -> (f64, f64) {
        (self.mass, self.mass + 4.0 * NDIM as f64)
    }

    fn hop(&self, x: &[C64], y: &mut [C64], forward: f64, backward: f64) {
        let dof = self.geometry.dof_per_site();
        let diag = self.mass + 2.0 * NDIM as f64;

        let site_kernel = |site: usize, ys: &mut [C64]| {
            let nb = &self.neighbours[site];
            for (c, yc) in ys.iter_mut().enumerate() {
                let mut hop = C64::new(0.0, 0.0);
                for mu in 0..NDIM {
                    hop += x[nb[mu] * dof + c] * forward + x[nb[NDIM + mu] * dof + c] * backward;
                }
                *yc = x[site * dof + c] * diag - hop;
            }
        };

        #[cfg(feature = "parallel")]
        {
            if y.len() >= PARALLEL_THRESHOLD {
                y.par_chunks_mut(dof)
                    .enumerate()
                    .for_each(|(site, ys)| site_kernel(site, ys));
                return;
            }
        }

        for (site, ys) in y.chunks_mut(dof).enumerate() {
            site_kernel(site, ys);
        }
    }
}

impl LinearOperator for StencilOperator {
    fn geometry(&self) -> LatticeGeometry {
        self.geometry
    }

    fn apply_slice(&self, x: &[C64], y: &mut [C64]) {
        self.hop(x, y, 1.0 - self.asymmetry, 1.0 + self.asymmetry);
    }
}

impl AdjointOperator for StencilOperator {
    fn apply_dagger_slice(&self, x: &[C64], y: &mut [C64]) {
        self.hop(x, y, 1.0 + self.asymmetry, 1.0 - self.asymmetry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldVector;
    use crate::precision::Precision;

    fn geometry() -> LatticeGeometry {
        LatticeGeometry::new([4, 4, 2, 2], 2).unwrap()
    }

    #[test]
    fn constant_field_is_eigenvector_with_mass() {
        let g = geometry();
        let op = StencilOperator::new(g, 0.3);
        let ones = vec![C64::new(1.0, 0.0); g.len()];
        let x = FieldVector::from_vec(g, Precision::Double, ones).unwrap();
        let mut y = x.similar();
        op.apply(&x, &mut y);
        for yi in y.as_slice() {
            assert!((yi - C64::new(0.3, 0.0)).norm() < 1e-12);
        }
    }

    #[test]
    fn hermitian_without_asymmetry() {
        let g = geometry();
        let op = StencilOperator::new(g, 0.1);
        let x = FieldVector::random(g, Precision::Double, 11);
        let y = FieldVector::random(g, Precision::Double, 12);
        let mut ax = x.similar();
        let mut ay = y.similar();
        op.apply(&x, &mut ax);
        op.apply(&y, &mut ay);
        assert!((y.cdot(&ax) - ay.cdot(&x)).norm() < 1e-10);
    }

    #[test]
    fn dagger_is_adjoint_with_asymmetry() {
        let g = geometry();
        let op = StencilOperator::new(g, 0.1).with_asymmetry(0.4);
        let x = FieldVector::random(g, Precision::Double, 21);
        let y = FieldVector::random(g, Precision::Double, 22);
        let mut ax = x.similar();
        let mut ady = y.similar();
        op.apply(&x, &mut ax);
        op.apply_dagger(&y, &mut ady);
        // <y, A x> == <A^dagger y, x>
        assert!((y.cdot(&ax) - ady.cdot(&x)).norm() < 1e-10);

        // and A is no longer Hermitian
        let mut ay = y.similar();
        op.apply(&y, &mut ay);
        assert!((y.cdot(&ax) - ay.cdot(&x)).norm() > 1e-6);
    }

    #[test]
    fn rayleigh_quotient_within_bounds() {
        let g = geometry();
        let op = StencilOperator::new(g, 0.5);
        let (lo, hi) = op.spectral_bounds();
        let x = FieldVector::random(g, Precision::Double, 5);
        let mut ax = x.similar();
        op.apply(&x, &mut ax);
        let rq = x.re_dot(&ax) / x.norm2();
        assert!(rq >= lo - 1e-12 && rq <= hi + 1e-12);
    }
}
