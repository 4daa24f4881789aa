//! Lattice field vectors.

use num_complex::Complex64 as C64;
use num_traits::{One, Zero};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::blas;
use crate::error::{FieldError, Result};
use crate::geometry::LatticeGeometry;
use crate::precision::Precision;

/// A complex field over a lattice.
///
/// Every mutating operation rounds its result to the field's [`Precision`],
/// so a field tagged `Single` behaves like single-precision storage even
/// though its components are held as `Complex64`. Arithmetic between fields
/// of different precision is allowed; the destination's precision wins.
///
/// Binary operations require both operands to share one geometry and panic
/// otherwise; solvers check geometry before touching any field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldVector {
    geometry: LatticeGeometry,
    precision: Precision,
    data: Vec<C64>,
}

impl FieldVector {
    /// A zero field.
    pub fn zeros(geometry: LatticeGeometry, precision: Precision) -> Self {
        Self {
            geometry,
            precision,
            data: vec![C64::zero(); geometry.len()],
        }
    }

    /// Wrap existing storage, rounding it to `precision`.
    pub fn from_vec(
        geometry: LatticeGeometry,
        precision: Precision,
        mut data: Vec<C64>,
    ) -> Result<Self> {
        if data.len() != geometry.len() {
            return Err(FieldError::LengthMismatch {
                expected: geometry.len(),
                actual: data.len(),
            });
        }
        blas::map_in_place(&mut data, move |z| precision.round_c(z));
        Ok(Self {
            geometry,
            precision,
            data,
        })
    }

    /// Build a field from real components (imaginary parts zero).
    pub fn from_real(
        geometry: LatticeGeometry,
        precision: Precision,
        values: &[f64],
    ) -> Result<Self> {
        let data = values.iter().map(|&v| C64::new(v, 0.0)).collect();
        Self::from_vec(geometry, precision, data)
    }

    /// Unit source at a single component.
    pub fn point_source(geometry: LatticeGeometry, precision: Precision, index: usize) -> Self {
        let mut field = Self::zeros(geometry, precision);
        field.data[index] = C64::one();
        field
    }

    /// Reproducible field with components uniform in `[-1, 1)`.
    pub fn random(geometry: LatticeGeometry, precision: Precision, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let data = (0..geometry.len())
            .map(|_| {
                let re: f64 = rng.random_range(-1.0..1.0);
                let im: f64 = rng.random_range(-1.0..1.0);
                precision.round_c(C64::new(re, im))
            })
            .collect();
        Self {
            geometry,
            precision,
            data,
        }
    }

    /// A zero field with the same geometry and precision.
    pub fn similar(&self) -> Self {
        Self::zeros(self.geometry, self.precision)
    }

    /// A zero field with the same geometry and a different precision.
    pub fn similar_with_precision(&self, precision: Precision) -> Self {
        Self::zeros(self.geometry, precision)
    }

    /// Copy of this field converted to another precision.
    pub fn to_precision(&self, precision: Precision) -> Self {
        let mut out = self.similar_with_precision(precision);
        out.copy_from(self);
        out
    }

    #[inline]
    pub fn geometry(&self) -> LatticeGeometry {
        self.geometry
    }

    #[inline]
    pub fn precision(&self) -> Precision {
        self.precision
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[C64] {
        &self.data
    }

    /// Raw mutable storage.
    ///
    /// Writes through this slice bypass precision rounding; call
    /// [`quantize_to`](Self::quantize_to) afterwards if that matters.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [C64] {
        &mut self.data
    }

    /// Round the contents to the coarser of `precision` and the field's own.
    pub fn quantize_to(&mut self, precision: Precision) {
        let p = precision.min(self.precision);
        if p != Precision::Double {
            blas::map_in_place(&mut self.data, move |z| p.round_c(z));
        }
    }

    fn check_layout(&self, other: &FieldVector) {
        assert_eq!(
            self.geometry, other.geometry,
            "field geometry mismatch: {} vs {}",
            self.geometry, other.geometry
        );
    }

    /// `self = other`, converting precision.
    pub fn copy_from(&mut self, other: &FieldVector) {
        self.check_layout(other);
        let p = self.precision;
        blas::zip_update(&mut self.data, &other.data, move |_, x| p.round_c(x));
    }

    /// `self = 0`.
    pub fn zero(&mut self) {
        self.data.fill(C64::zero());
    }

    /// Squared 2-norm.
    pub fn norm2(&self) -> f64 {
        blas::norm2(&self.data)
    }

    /// 2-norm.
    pub fn norm(&self) -> f64 {
        self.norm2().sqrt()
    }

    /// Inner product `<self, other>`, conjugate-linear in `self`.
    pub fn cdot(&self, other: &FieldVector) -> C64 {
        self.check_layout(other);
        blas::cdot(&self.data, &other.data)
    }

    /// Real part of `<self, other>`.
    pub fn re_dot(&self, other: &FieldVector) -> f64 {
        self.cdot(other).re
    }

    /// `self += a * x`.
    pub fn axpy(&mut self, a: f64, x: &FieldVector) {
        self.caxpy(C64::new(a, 0.0), x);
    }

    /// `self += a * x` with complex `a`.
    pub fn caxpy(&mut self, a: C64, x: &FieldVector) {
        self.check_layout(x);
        let p = self.precision;
        blas::zip_update(&mut self.data, &x.data, move |y, x| p.round_c(y + a * x));
    }

    /// `self = x + a * self`.
    pub fn xpay(&mut self, x: &FieldVector, a: f64) {
        self.cxpay(x, C64::new(a, 0.0));
    }

    /// `self = x + a * self` with complex `a`.
    pub fn cxpay(&mut self, x: &FieldVector, a: C64) {
        self.check_layout(x);
        let p = self.precision;
        blas::zip_update(&mut self.data, &x.data, move |y, x| p.round_c(x + a * y));
    }

    /// `self *= a`.
    pub fn scale(&mut self, a: f64) {
        self.cscale(C64::new(a, 0.0));
    }

    /// `self *= a` with complex `a`.
    pub fn cscale(&mut self, a: C64) {
        let p = self.precision;
        blas::map_in_place(&mut self.data, move |y| p.round_c(a * y));
    }

    /// `self += a * x`, returning the new squared norm of `self`.
    pub fn axpy_norm(&mut self, a: f64, x: &FieldVector) -> f64 {
        self.axpy(a, x);
        self.norm2()
    }

    /// `self = x - self`, returning the new squared norm of `self`.
    pub fn xmy_norm(&mut self, x: &FieldVector) -> f64 {
        self.check_layout(x);
        let p = self.precision;
        blas::zip_update(&mut self.data, &x.data, move |y, x| p.round_c(x - y));
        self.norm2()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(n: usize) -> LatticeGeometry {
        LatticeGeometry::flat(n).unwrap()
    }

    #[test]
    fn from_vec_checks_length() {
        let err = FieldVector::from_vec(geometry(3), Precision::Double, vec![C64::new(0.0, 0.0)]);
        assert_eq!(
            err.unwrap_err(),
            FieldError::LengthMismatch {
                expected: 3,
                actual: 1
            }
        );
    }

    #[test]
    fn axpy_and_norm() {
        let g = geometry(2);
        let x = FieldVector::from_real(g, Precision::Double, &[1.0, 2.0]).unwrap();
        let mut y = FieldVector::from_real(g, Precision::Double, &[3.0, 4.0]).unwrap();
        let n2 = y.axpy_norm(-1.0, &x);
        assert_eq!(y.as_slice(), &[C64::new(2.0, 0.0), C64::new(2.0, 0.0)]);
        assert!((n2 - 8.0).abs() < 1e-15);
    }

    #[test]
    fn xpay_and_xmy() {
        let g = geometry(2);
        let x = FieldVector::from_real(g, Precision::Double, &[1.0, 1.0]).unwrap();
        let mut y = FieldVector::from_real(g, Precision::Double, &[2.0, 4.0]).unwrap();
        y.xpay(&x, 0.5);
        assert_eq!(y.as_slice(), &[C64::new(2.0, 0.0), C64::new(3.0, 0.0)]);

        let n2 = y.xmy_norm(&x);
        assert_eq!(y.as_slice(), &[C64::new(-1.0, 0.0), C64::new(-2.0, 0.0)]);
        assert!((n2 - 5.0).abs() < 1e-15);
    }

    #[test]
    fn cdot_is_hermitian() {
        let g = geometry(4);
        let x = FieldVector::random(g, Precision::Double, 1);
        let y = FieldVector::random(g, Precision::Double, 2);
        let xy = x.cdot(&y);
        let yx = y.cdot(&x);
        assert!((xy - yx.conj()).norm() < 1e-14);
        assert!((x.cdot(&x).re - x.norm2()).abs() < 1e-14);
    }

    #[test]
    fn writes_round_to_destination_precision() {
        let g = geometry(1);
        let x = FieldVector::from_real(g, Precision::Double, &[1.0 / 3.0]).unwrap();
        let mut y = FieldVector::zeros(g, Precision::Single);
        y.copy_from(&x);
        assert_eq!(y.as_slice()[0].re, (1.0f64 / 3.0) as f32 as f64);

        // converting back up keeps the single-precision value
        let z = y.to_precision(Precision::Double);
        assert_eq!(z.as_slice()[0].re, y.as_slice()[0].re);
    }

    #[test]
    fn random_is_reproducible() {
        let g = geometry(16);
        let a = FieldVector::random(g, Precision::Double, 7);
        let b = FieldVector::random(g, Precision::Double, 7);
        let c = FieldVector::random(g, Precision::Double, 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_slice().iter().all(|z| z.re.abs() <= 1.0 && z.im.abs() <= 1.0));
    }

    #[test]
    fn point_source_has_unit_norm() {
        let g = LatticeGeometry::new([2, 2, 2, 2], 3).unwrap();
        let src = FieldVector::point_source(g, Precision::Double, 5);
        assert!((src.norm() - 1.0).abs() < 1e-15);
    }

    #[test]
    #[should_panic(expected = "geometry mismatch")]
    fn mismatched_geometry_panics() {
        let a = FieldVector::zeros(geometry(2), Precision::Double);
        let b = FieldVector::zeros(geometry(3), Precision::Double);
        let _ = a.cdot(&b);
    }
}
