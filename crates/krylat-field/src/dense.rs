//! Dense and diagonal operators for small systems.
//!
//! These are mostly useful for tests and for coarse-grid operators small
//! enough to store explicitly.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64 as C64;

use crate::error::{FieldError, Result};
use crate::geometry::LatticeGeometry;
use crate::operator::{AdjointOperator, LinearOperator};

/// Explicit dense matrix operator on a flat geometry.
#[derive(Debug, Clone)]
pub struct DenseOperator {
    matrix: DMatrix<C64>,
    geometry: LatticeGeometry,
}

impl DenseOperator {
    /// Wrap a square complex matrix.
    pub fn from_matrix(matrix: DMatrix<C64>) -> Result<Self> {
        if matrix.nrows() != matrix.ncols() {
            return Err(FieldError::InvalidOperator(format!(
                "matrix must be square, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        let geometry = LatticeGeometry::flat(matrix.nrows())?;
        Ok(Self { matrix, geometry })
    }

    /// Build from real entries in row-major order.
    pub fn from_row_slice(n: usize, values: &[f64]) -> Result<Self> {
        if values.len() != n * n {
            return Err(FieldError::LengthMismatch {
                expected: n * n,
                actual: values.len(),
            });
        }
        let data: Vec<C64> = values.iter().map(|&v| C64::new(v, 0.0)).collect();
        Self::from_matrix(DMatrix::from_row_slice(n, n, &data))
    }

    pub fn matrix(&self) -> &DMatrix<C64> {
        &self.matrix
    }
}

impl LinearOperator for DenseOperator {
    fn geometry(&self) -> LatticeGeometry {
        self.geometry
    }

    fn apply_slice(&self, x: &[C64], y: &mut [C64]) {
        let product = &self.matrix * DVector::from_column_slice(x);
        y.copy_from_slice(product.as_slice());
    }
}

impl AdjointOperator for DenseOperator {
    fn apply_dagger_slice(&self, x: &[C64], y: &mut [C64]) {
        let product = self.matrix.ad_mul(&DVector::from_column_slice(x));
        y.copy_from_slice(product.as_slice());
    }
}

/// Diagonal operator `y_i = d_i x_i`.
#[derive(Debug, Clone)]
pub struct DiagonalOperator {
    diag: Vec<C64>,
    geometry: LatticeGeometry,
}

impl DiagonalOperator {
    /// Diagonal operator on an arbitrary geometry.
    pub fn new(geometry: LatticeGeometry, diag: Vec<C64>) -> Result<Self> {
        if diag.len() != geometry.len() {
            return Err(FieldError::LengthMismatch {
                expected: geometry.len(),
                actual: diag.len(),
            });
        }
        Ok(Self { diag, geometry })
    }

    /// Real diagonal on a flat geometry.
    pub fn from_real(diag: &[f64]) -> Result<Self> {
        let geometry = LatticeGeometry::flat(diag.len())?;
        Self::new(geometry, diag.iter().map(|&d| C64::new(d, 0.0)).collect())
    }

    pub fn diagonal(&self) -> &[C64] {
        &self.diag
    }
}

impl LinearOperator for DiagonalOperator {
    fn geometry(&self) -> LatticeGeometry {
        self.geometry
    }

    fn apply_slice(&self, x: &[C64], y: &mut [C64]) {
        for ((yi, &xi), &di) in y.iter_mut().zip(x).zip(&self.diag) {
            *yi = di * xi;
        }
    }
}

impl AdjointOperator for DiagonalOperator {
    fn apply_dagger_slice(&self, x: &[C64], y: &mut [C64]) {
        for ((yi, &xi), &di) in y.iter_mut().zip(x).zip(&self.diag) {
            *yi = di.conj() * xi;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldVector;
    use crate::precision::Precision;

    #[test]
    fn dense_rejects_non_square() {
        let m = DMatrix::<C64>::zeros(2, 3);
        assert!(DenseOperator::from_matrix(m).is_err());
        assert!(DenseOperator::from_row_slice(2, &[1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn dense_apply_and_adjoint() {
        let op = DenseOperator::from_row_slice(2, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let g = op.geometry();
        let x = FieldVector::from_real(g, Precision::Double, &[1.0, 1.0]).unwrap();
        let mut y = x.similar();

        op.apply(&x, &mut y);
        assert_eq!(y.as_slice(), &[C64::new(3.0, 0.0), C64::new(7.0, 0.0)]);

        op.apply_dagger(&x, &mut y);
        assert_eq!(y.as_slice(), &[C64::new(4.0, 0.0), C64::new(6.0, 0.0)]);
    }

    #[test]
    fn diagonal_apply() {
        let op = DiagonalOperator::from_real(&[2.0, 4.0, 5.0]).unwrap();
        let g = op.geometry();
        let x = FieldVector::from_real(g, Precision::Double, &[1.0, 2.0, 3.0]).unwrap();
        let mut y = x.similar();
        op.apply(&x, &mut y);
        assert_eq!(
            y.as_slice(),
            &[C64::new(2.0, 0.0), C64::new(8.0, 0.0), C64::new(15.0, 0.0)]
        );
    }

    #[test]
    fn diagonal_length_checked() {
        let g = LatticeGeometry::flat(3).unwrap();
        assert!(DiagonalOperator::new(g, vec![C64::new(1.0, 0.0)]).is_err());
    }
}
