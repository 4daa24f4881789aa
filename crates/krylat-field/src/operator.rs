//! Matrix-free linear operators.
//!
//! Solvers only ever see an operator through [`LinearOperator::apply`]. The
//! kernel itself ([`LinearOperator::apply_slice`]) works on raw storage; the
//! provided `apply` checks the field layout and rounds the result to the
//! operator's precision, which is what makes a reduced-precision operator
//! variant "sloppy".

use num_complex::Complex64 as C64;

use crate::blas;
use crate::field::FieldVector;
use crate::geometry::LatticeGeometry;
use crate::precision::Precision;

/// A linear map `y = A x` over lattice fields.
pub trait LinearOperator: Send + Sync {
    /// Layout of the fields this operator acts on.
    fn geometry(&self) -> LatticeGeometry;

    /// Precision the operator's output is produced in.
    fn precision(&self) -> Precision {
        Precision::Double
    }

    /// Kernel: `y = A x` on raw storage of length `geometry().len()`.
    fn apply_slice(&self, x: &[C64], y: &mut [C64]);

    /// `y = A x`.
    fn apply(&self, x: &FieldVector, y: &mut FieldVector) {
        let geometry = self.geometry();
        assert_eq!(x.geometry(), geometry, "operator input geometry mismatch");
        assert_eq!(y.geometry(), geometry, "operator output geometry mismatch");
        self.apply_slice(x.as_slice(), y.as_mut_slice());
        y.quantize_to(self.precision());
    }
}

/// An operator whose adjoint `A^dagger` can also be applied.
pub trait AdjointOperator: LinearOperator {
    /// Kernel: `y = A^dagger x` on raw storage.
    fn apply_dagger_slice(&self, x: &[C64], y: &mut [C64]);

    /// `y = A^dagger x`.
    fn apply_dagger(&self, x: &FieldVector, y: &mut FieldVector) {
        let geometry = self.geometry();
        assert_eq!(x.geometry(), geometry, "operator input geometry mismatch");
        assert_eq!(y.geometry(), geometry, "operator output geometry mismatch");
        self.apply_dagger_slice(x.as_slice(), y.as_mut_slice());
        y.quantize_to(self.precision());
    }
}

impl<T: LinearOperator + ?Sized> LinearOperator for &T {
    fn geometry(&self) -> LatticeGeometry {
        (**self).geometry()
    }

    fn precision(&self) -> Precision {
        (**self).precision()
    }

    fn apply_slice(&self, x: &[C64], y: &mut [C64]) {
        (**self).apply_slice(x, y)
    }
}

impl<T: AdjointOperator + ?Sized> AdjointOperator for &T {
    fn apply_dagger_slice(&self, x: &[C64], y: &mut [C64]) {
        (**self).apply_dagger_slice(x, y)
    }
}

// ============================================================================
// Adapters
// ============================================================================

/// `A + shift * I`.
#[derive(Debug, Clone)]
pub struct ShiftedOperator<O> {
    inner: O,
    shift: f64,
}

impl<O: LinearOperator> ShiftedOperator<O> {
    pub fn new(inner: O, shift: f64) -> Self {
        Self { inner, shift }
    }

    pub fn shift(&self) -> f64 {
        self.shift
    }
}

impl<O: LinearOperator> LinearOperator for ShiftedOperator<O> {
    fn geometry(&self) -> LatticeGeometry {
        self.inner.geometry()
    }

    fn precision(&self) -> Precision {
        self.inner.precision()
    }

    fn apply_slice(&self, x: &[C64], y: &mut [C64]) {
        self.inner.apply_slice(x, y);
        if self.shift != 0.0 {
            let shift = self.shift;
            blas::zip_update(y, x, move |yi, xi| yi + xi * shift);
        }
    }
}

impl<O: AdjointOperator> AdjointOperator for ShiftedOperator<O> {
    fn apply_dagger_slice(&self, x: &[C64], y: &mut [C64]) {
        self.inner.apply_dagger_slice(x, y);
        if self.shift != 0.0 {
            let shift = self.shift;
            blas::zip_update(y, x, move |yi, xi| yi + xi * shift);
        }
    }
}

/// Normal operator `A^dagger A`, Hermitian positive semi-definite.
///
/// Lets CG run on systems whose operator is not Hermitian.
#[derive(Debug, Clone)]
pub struct NormalOperator<O> {
    inner: O,
}

impl<O: AdjointOperator> NormalOperator<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }
}

impl<O: AdjointOperator> LinearOperator for NormalOperator<O> {
    fn geometry(&self) -> LatticeGeometry {
        self.inner.geometry()
    }

    fn precision(&self) -> Precision {
        self.inner.precision()
    }

    fn apply_slice(&self, x: &[C64], y: &mut [C64]) {
        let mut tmp = vec![C64::new(0.0, 0.0); x.len()];
        self.inner.apply_slice(x, &mut tmp);
        self.inner.apply_dagger_slice(&tmp, y);
    }
}

impl<O: AdjointOperator> AdjointOperator for NormalOperator<O> {
    fn apply_dagger_slice(&self, x: &[C64], y: &mut [C64]) {
        self.apply_slice(x, y);
    }
}

/// The same map as `inner`, tagged with a different output precision.
///
/// This is how the sloppy and preconditioner variants of an operator are
/// formed from the full-precision one.
#[derive(Debug, Clone)]
pub struct PrecisionOperator<O> {
    inner: O,
    precision: Precision,
}

impl<O: LinearOperator> PrecisionOperator<O> {
    pub fn new(inner: O, precision: Precision) -> Self {
        Self { inner, precision }
    }
}

impl<O: LinearOperator> LinearOperator for PrecisionOperator<O> {
    fn geometry(&self) -> LatticeGeometry {
        self.inner.geometry()
    }

    fn precision(&self) -> Precision {
        self.precision
    }

    fn apply_slice(&self, x: &[C64], y: &mut [C64]) {
        // round the input too, as a lower precision kernel would read it
        if self.precision == Precision::Double {
            self.inner.apply_slice(x, y);
        } else {
            let p = self.precision;
            let xr: Vec<C64> = x.iter().map(|&z| p.round_c(z)).collect();
            self.inner.apply_slice(&xr, y);
        }
    }
}

impl<O: AdjointOperator> AdjointOperator for PrecisionOperator<O> {
    fn apply_dagger_slice(&self, x: &[C64], y: &mut [C64]) {
        if self.precision == Precision::Double {
            self.inner.apply_dagger_slice(x, y);
        } else {
            let p = self.precision;
            let xr: Vec<C64> = x.iter().map(|&z| p.round_c(z)).collect();
            self.inner.apply_dagger_slice(&xr, y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dense::{DenseOperator, DiagonalOperator};

    #[test]
    fn shifted_operator_adds_identity() {
        let op = DiagonalOperator::from_real(&[1.0, 2.0]).unwrap();
        let shifted = ShiftedOperator::new(&op, 0.5);
        let g = op.geometry();
        let x = FieldVector::from_real(g, Precision::Double, &[1.0, 1.0]).unwrap();
        let mut y = x.similar();
        shifted.apply(&x, &mut y);
        assert_eq!(y.as_slice(), &[C64::new(1.5, 0.0), C64::new(2.5, 0.0)]);
    }

    #[test]
    fn normal_operator_is_hermitian() {
        // non-symmetric A
        let op = DenseOperator::from_row_slice(2, &[1.0, 2.0, 0.0, 3.0]).unwrap();
        let normal = NormalOperator::new(&op);
        let g = op.geometry();
        let x = FieldVector::random(g, Precision::Double, 3);
        let y = FieldVector::random(g, Precision::Double, 4);
        let mut ax = x.similar();
        let mut ay = y.similar();
        normal.apply(&x, &mut ax);
        normal.apply(&y, &mut ay);
        // <y, A x> == <A y, x>
        assert!((y.cdot(&ax) - ay.cdot(&x)).norm() < 1e-12);
        assert!(x.re_dot(&ax) > 0.0);
    }

    #[test]
    fn precision_operator_rounds_output() {
        let op = DiagonalOperator::from_real(&[1.0 / 3.0]).unwrap();
        let sloppy = PrecisionOperator::new(&op, Precision::Single);
        assert_eq!(sloppy.precision(), Precision::Single);

        let g = op.geometry();
        let x = FieldVector::from_real(g, Precision::Double, &[1.0]).unwrap();
        let mut y = x.similar();
        sloppy.apply(&x, &mut y);
        assert_eq!(y.as_slice()[0].re, (1.0f64 / 3.0) as f32 as f64);
        // the field keeps its own tag
        assert_eq!(y.precision(), Precision::Double);
    }

    #[test]
    #[should_panic(expected = "geometry mismatch")]
    fn apply_checks_geometry() {
        let op = DiagonalOperator::from_real(&[1.0, 2.0]).unwrap();
        let g3 = LatticeGeometry::flat(3).unwrap();
        let x = FieldVector::zeros(g3, Precision::Double);
        let mut y = x.similar();
        op.apply(&x, &mut y);
    }
}
