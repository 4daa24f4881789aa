//! Minimal-residual chronological extrapolation.
//!
//! Given basis vectors `p[i]` and their images `q[i] = A p[i]`, the guess
//! `x = sum_i a_i p[i]` minimizing `|b - A x|` solves the small normal
//! equations `sum_j <q_i, q_j> a_j = <q_i, b>`. [`ChronoBasis`] maintains
//! such a basis from the solutions of a sequence of related solves.

use krylat_field::{C64, FieldVector, LatticeGeometry, LinearOperator, Precision};
use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};
use crate::profile::{TimeProfile, interval};
use crate::solver::check_geometry;

/// Builds an initial guess from previously accepted solutions.
pub struct MinResExt<'a> {
    mat: &'a dyn LinearOperator,
}

impl<'a> MinResExt<'a> {
    pub fn new(mat: &'a dyn LinearOperator) -> Self {
        Self { mat }
    }

    /// Overwrite `x` with the best guess in the span of `p` and return its
    /// residual norm `|b - A x|`.
    ///
    /// `b` is used as scratch and holds that residual afterwards. With an
    /// empty basis `x` is left as it is and the residual of the caller's
    /// guess is returned.
    pub fn extrapolate(
        &self,
        x: &mut FieldVector,
        b: &mut FieldVector,
        p: &[FieldVector],
        q: &[FieldVector],
        profile: &mut TimeProfile,
    ) -> Result<f64> {
        if p.len() != q.len() {
            return Err(Error::InvalidConfig(format!(
                "{} basis vectors but {} images",
                p.len(),
                q.len()
            )));
        }
        let geometry = self.mat.geometry();
        check_geometry(geometry, x.geometry())?;
        check_geometry(geometry, b.geometry())?;
        for v in p.iter().chain(q) {
            check_geometry(geometry, v.geometry())?;
        }

        profile.start(interval::COMPUTE);
        let result = self.project(x, b, p, q);
        profile.stop(interval::COMPUTE);
        result
    }

    fn project(
        &self,
        x: &mut FieldVector,
        b: &mut FieldVector,
        p: &[FieldVector],
        q: &[FieldVector],
    ) -> Result<f64> {
        let n = p.len();
        if n == 0 {
            let mut ax = x.similar_with_precision(Precision::Double);
            self.mat.apply(x, &mut ax);
            b.axpy(-1.0, &ax);
            return Ok(b.norm());
        }

        let gram = DMatrix::<C64>::from_fn(n, n, |i, j| q[i].cdot(&q[j]));
        let rhs = DVector::<C64>::from_fn(n, |i, _| q[i].cdot(b));
        let coeffs = gram.lu().solve(&rhs).ok_or(Error::SingularProjection)?;
        if coeffs.iter().any(|a| !(a.re.is_finite() && a.im.is_finite())) {
            return Err(Error::SingularProjection);
        }

        x.zero();
        for (a, (pi, qi)) in coeffs.iter().zip(p.iter().zip(q)) {
            x.caxpy(*a, pi);
            b.caxpy(-*a, qi);
        }
        let residual = b.norm();
        log::debug!("chronological guess from {} vectors, |r| = {:e}", n, residual);
        Ok(residual)
    }
}

/// A bounded history of orthonormal solution vectors and their images.
///
/// When full, pushing a new solution drops the oldest one.
pub struct ChronoBasis<'a> {
    ext: MinResExt<'a>,
    geometry: LatticeGeometry,
    capacity: usize,
    p: Vec<FieldVector>,
    q: Vec<FieldVector>,
}

impl<'a> ChronoBasis<'a> {
    pub fn new(mat: &'a dyn LinearOperator, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig(
                "chronological basis needs room for at least one vector".into(),
            ));
        }
        Ok(Self {
            ext: MinResExt::new(mat),
            geometry: mat.geometry(),
            capacity,
            p: Vec::with_capacity(capacity),
            q: Vec::with_capacity(capacity),
        })
    }

    pub fn len(&self) -> usize {
        self.p.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.p.clear();
        self.q.clear();
    }

    /// Add a solution to the basis.
    ///
    /// Returns `false` if the solution already lies in the span of the
    /// basis and was not added.
    pub fn push(&mut self, solution: &FieldVector) -> Result<bool> {
        check_geometry(self.geometry, solution.geometry())?;
        let mut v = solution.to_precision(Precision::Double);
        let norm_before = v.norm();
        if norm_before == 0.0 {
            return Ok(false);
        }
        for pi in &self.p {
            let proj = pi.cdot(&v);
            v.caxpy(-proj, pi);
        }
        let norm = v.norm();
        if norm <= 1e3 * f64::EPSILON * norm_before {
            log::debug!("chronological basis: solution already in span, skipped");
            return Ok(false);
        }
        v.scale(1.0 / norm);

        let mut av = v.similar();
        self.ext.mat.apply(&v, &mut av);
        if self.p.len() == self.capacity {
            self.p.remove(0);
            self.q.remove(0);
        }
        self.p.push(v);
        self.q.push(av);
        Ok(true)
    }

    /// Overwrite `x` with the best guess for `A x = b`; returns `|b - A x|`.
    pub fn guess(
        &self,
        x: &mut FieldVector,
        b: &FieldVector,
        profile: &mut TimeProfile,
    ) -> Result<f64> {
        let mut scratch = b.clone();
        self.ext.extrapolate(x, &mut scratch, &self.p, &self.q, profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krylat_field::{DenseOperator, DiagonalOperator};

    #[test]
    fn empty_basis_keeps_guess() {
        let op = DenseOperator::from_row_slice(2, &[2.0, 1.0, 1.0, 3.0]).unwrap();
        let g = op.geometry();
        let mut x = FieldVector::from_real(g, Precision::Double, &[0.3, -0.2]).unwrap();
        let guess = x.clone();
        let mut b = FieldVector::from_real(g, Precision::Double, &[1.0, 1.0]).unwrap();
        let ext = MinResExt::new(&op);
        let mut profile = TimeProfile::new("test");
        let residual = ext.extrapolate(&mut x, &mut b, &[], &[], &mut profile).unwrap();

        assert_eq!(x, guess);
        // A x = [0.4, -0.3]
        let expected = (0.6f64 * 0.6 + 1.3 * 1.3).sqrt();
        assert!((residual - expected).abs() < 1e-14);
    }

    #[test]
    fn exact_when_solution_is_in_span() {
        let op = DiagonalOperator::from_real(&[1.0, 2.0, 4.0]).unwrap();
        let g = op.geometry();
        let p = vec![
            FieldVector::from_real(g, Precision::Double, &[1.0, 1.0, 0.0]).unwrap(),
            FieldVector::from_real(g, Precision::Double, &[0.0, 0.0, 1.0]).unwrap(),
        ];
        let q: Vec<_> = p
            .iter()
            .map(|v| {
                let mut av = v.similar();
                op.apply(v, &mut av);
                av
            })
            .collect();
        // b = A (2 p0 - p1)
        let mut b = FieldVector::from_real(g, Precision::Double, &[2.0, 4.0, -4.0]).unwrap();
        let mut x = b.similar();
        let ext = MinResExt::new(&op);
        let mut profile = TimeProfile::new("test");
        let residual = ext.extrapolate(&mut x, &mut b, &p, &q, &mut profile).unwrap();

        assert!(residual < 1e-14);
        let expected = [2.0, 2.0, -1.0];
        for (xi, e) in x.as_slice().iter().zip(expected) {
            assert!((xi.re - e).abs() < 1e-14);
        }
    }

    #[test]
    fn dependent_basis_is_singular() {
        let op = DiagonalOperator::from_real(&[1.0, 2.0]).unwrap();
        let g = op.geometry();
        let v = FieldVector::from_real(g, Precision::Double, &[1.0, 0.0]).unwrap();
        let p = vec![v.clone(), v.clone()];
        let q = p.clone();
        let mut b = v.clone();
        let mut x = v.similar();
        let ext = MinResExt::new(&op);
        let mut profile = TimeProfile::new("test");
        assert_eq!(
            ext.extrapolate(&mut x, &mut b, &p, &q, &mut profile),
            Err(Error::SingularProjection)
        );
    }

    #[test]
    fn chrono_basis_rolls_over() {
        let op = DiagonalOperator::from_real(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        let g = op.geometry();
        let mut basis = ChronoBasis::new(&op, 2).unwrap();
        for i in 0..3 {
            let e = FieldVector::point_source(g, Precision::Double, i);
            assert!(basis.push(&e).unwrap());
        }
        assert_eq!(basis.len(), 2);

        // e0 has been dropped; the basis spans e1 and e2
        let b = FieldVector::from_real(g, Precision::Double, &[0.0, 2.0, 3.0, 0.0]).unwrap();
        let mut x = b.similar();
        let mut profile = TimeProfile::new("test");
        let residual = basis.guess(&mut x, &b, &mut profile).unwrap();
        assert!(residual < 1e-14);
        assert!((x.as_slice()[1].re - 1.0).abs() < 1e-14);

        let dup = FieldVector::point_source(g, Precision::Double, 2);
        assert!(!basis.push(&dup).unwrap());
    }
}
