//! Sparse matrix operator backed by faer.
//!
//! Wraps a faer compressed-sparse-column matrix so an explicitly assembled
//! operator (a coarse-grid operator, say, or an imported matrix) can be fed
//! to the Krylov solvers like any stencil.

use faer::prelude::*;
use faer::sparse::{SparseColMat, Triplet};
use num_complex::Complex64 as C64;

use crate::error::{FieldError, Result};
use crate::geometry::LatticeGeometry;
use crate::operator::{AdjointOperator, LinearOperator};

/// Sparse complex operator in CSC form.
pub struct SparseOperator {
    matrix: SparseColMat<usize, c64>,
    geometry: LatticeGeometry,
}

impl SparseOperator {
    /// Create from triplets (row, col, value) on the given geometry.
    ///
    /// Duplicate entries at the same position are summed.
    pub fn from_triplets(
        geometry: LatticeGeometry,
        triplets: &[(usize, usize, C64)],
    ) -> Result<Self> {
        let n = geometry.len();
        if let Some(&(r, c, _)) = triplets.iter().find(|&&(r, c, _)| r >= n || c >= n) {
            return Err(FieldError::InvalidOperator(format!(
                "entry ({}, {}) outside {}x{} matrix",
                r, c, n, n
            )));
        }
        let faer_triplets: Vec<_> = triplets
            .iter()
            .map(|&(r, c, v)| Triplet::new(r, c, c64::new(v.re, v.im)))
            .collect();

        let matrix = SparseColMat::<usize, c64>::try_new_from_triplets(n, n, &faer_triplets)
            .map_err(|e| FieldError::InvalidOperator(format!("{:?}", e)))?;

        Ok(Self { matrix, geometry })
    }

    /// Create from real triplets on a flat geometry of size `n`.
    pub fn from_real_triplets(n: usize, triplets: &[(usize, usize, f64)]) -> Result<Self> {
        let geometry = LatticeGeometry::flat(n)?;
        let complex: Vec<_> = triplets
            .iter()
            .map(|&(r, c, v)| (r, c, C64::new(v, 0.0)))
            .collect();
        Self::from_triplets(geometry, &complex)
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.matrix.as_ref().val().len()
    }

    /// Get a reference to the underlying matrix.
    pub fn matrix(&self) -> &SparseColMat<usize, c64> {
        &self.matrix
    }
}

impl LinearOperator for SparseOperator {
    fn geometry(&self) -> LatticeGeometry {
        self.geometry
    }

    fn apply_slice(&self, x: &[C64], y: &mut [C64]) {
        let n = self.matrix.nrows();
        assert_eq!(x.len(), n);
        assert_eq!(y.len(), n);

        y.fill(C64::new(0.0, 0.0));

        // For each column j, add A[:, j] * x[j] to y
        let mat_ref = self.matrix.as_ref();
        let col_ptrs = mat_ref.col_ptr();
        let row_indices = mat_ref.row_idx();
        let values = mat_ref.val();

        for j in 0..n {
            let xj = x[j];
            for idx in col_ptrs[j]..col_ptrs[j + 1] {
                let aij = values[idx];
                y[row_indices[idx]] += C64::new(aij.re, aij.im) * xj;
            }
        }
    }
}

impl AdjointOperator for SparseOperator {
    fn apply_dagger_slice(&self, x: &[C64], y: &mut [C64]) {
        let n = self.matrix.nrows();
        assert_eq!(x.len(), n);
        assert_eq!(y.len(), n);

        // Column j of A is row j of A^dagger
        let mat_ref = self.matrix.as_ref();
        let col_ptrs = mat_ref.col_ptr();
        let row_indices = mat_ref.row_idx();
        let values = mat_ref.val();

        for (j, yj) in y.iter_mut().enumerate() {
            let mut sum = C64::new(0.0, 0.0);
            for idx in col_ptrs[j]..col_ptrs[j + 1] {
                let aij = values[idx];
                sum += C64::new(aij.re, -aij.im) * x[row_indices[idx]];
            }
            *yj = sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldVector;
    use crate::precision::Precision;

    #[test]
    fn sparse_apply_matches_dense() {
        let triplets = vec![(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)];
        let op = SparseOperator::from_real_triplets(2, &triplets).unwrap();
        assert_eq!(op.nnz(), 4);

        let x = FieldVector::from_real(op.geometry(), Precision::Double, &[1.0, 1.0]).unwrap();
        let mut y = x.similar();
        op.apply(&x, &mut y);
        assert_eq!(y.as_slice(), &[C64::new(5.0, 0.0), C64::new(4.0, 0.0)]);
    }

    #[test]
    fn duplicate_triplets_are_summed() {
        let triplets = vec![(0, 0, 2.0), (0, 0, 3.0)];
        let op = SparseOperator::from_real_triplets(1, &triplets).unwrap();
        let x = FieldVector::from_real(op.geometry(), Precision::Double, &[2.0]).unwrap();
        let mut y = x.similar();
        op.apply(&x, &mut y);
        assert!((y.as_slice()[0].re - 10.0).abs() < 1e-15);
    }

    #[test]
    fn adjoint_conjugates_and_transposes() {
        let g = LatticeGeometry::flat(2).unwrap();
        let triplets = vec![(0, 1, C64::new(0.0, 2.0))];
        let op = SparseOperator::from_triplets(g, &triplets).unwrap();

        let x = FieldVector::from_real(g, Precision::Double, &[1.0, 0.0]).unwrap();
        let mut y = x.similar();
        op.apply_dagger(&x, &mut y);
        // (A^dagger)_{10} = conj(2i) = -2i
        assert_eq!(y.as_slice(), &[C64::new(0.0, 0.0), C64::new(0.0, -2.0)]);
    }

    #[test]
    fn out_of_range_triplet_rejected() {
        let triplets = vec![(5, 0, 1.0)];
        assert!(SparseOperator::from_real_triplets(2, &triplets).is_err());
    }
}
