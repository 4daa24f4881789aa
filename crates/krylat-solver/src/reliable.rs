//! Reliable updates for mixed-precision iteration.
//!
//! The Krylov recurrences run against the sloppy operator and accumulate a
//! partial solution in sloppy precision. Whenever the iterated residual has
//! dropped by `delta` relative to the largest residual seen since the last
//! update, the partial solution is folded into the full-precision solution
//! and the residual is recomputed from scratch with the full operator.

use krylat_field::{FieldVector, LinearOperator};

/// Trigger state for reliable updates.
#[derive(Debug, Clone)]
pub struct ReliableUpdates {
    delta: f64,
    max_r: f64,
    count: usize,
}

impl ReliableUpdates {
    /// `r_norm` is the residual norm the iteration starts from.
    pub fn new(delta: f64, r_norm: f64) -> Self {
        Self {
            delta,
            max_r: r_norm,
            count: 0,
        }
    }

    /// Whether updates are switched on at all.
    pub fn enabled(&self) -> bool {
        self.delta > 0.0
    }

    /// Record the current iterated residual norm and report whether an
    /// update is due.
    pub fn observe(&mut self, r_norm: f64) -> bool {
        if r_norm > self.max_r {
            self.max_r = r_norm;
        }
        self.enabled() && r_norm < self.delta * self.max_r
    }

    /// Restart the window after an update that produced residual `r_norm`.
    pub fn reset(&mut self, r_norm: f64) {
        self.max_r = r_norm;
        self.count += 1;
    }

    /// Updates performed so far.
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Fold `x_sloppy` into `y` and recompute the residual with `mat`.
///
/// Afterwards `x_sloppy` is zero, `r = b - A y` in full precision and
/// `r_sloppy` holds the same residual in sloppy precision. Returns `|r|^2`.
pub(crate) fn fold_and_recompute(
    mat: &dyn LinearOperator,
    b: &FieldVector,
    y: &mut FieldVector,
    x_sloppy: &mut FieldVector,
    r: &mut FieldVector,
    r_sloppy: &mut FieldVector,
) -> f64 {
    y.axpy(1.0, x_sloppy);
    x_sloppy.zero();
    mat.apply(y, r);
    let r2 = r.xmy_norm(b);
    r_sloppy.copy_from(r);
    r2
}

#[cfg(test)]
mod tests {
    use super::*;
    use krylat_field::{DiagonalOperator, Precision};

    #[test]
    fn triggers_on_relative_drop() {
        let mut reliable = ReliableUpdates::new(0.1, 1.0);
        assert!(!reliable.observe(0.5));
        assert!(!reliable.observe(2.0));
        // window maximum is now 2.0
        assert!(!reliable.observe(0.3));
        assert!(reliable.observe(0.15));
        reliable.reset(0.15);
        assert_eq!(reliable.count(), 1);
        assert!(!reliable.observe(0.02));
        assert!(reliable.observe(0.01));
    }

    #[test]
    fn zero_delta_never_triggers() {
        let mut reliable = ReliableUpdates::new(0.0, 1.0);
        assert!(!reliable.enabled());
        assert!(!reliable.observe(1e-30));
    }

    #[test]
    fn fold_recomputes_true_residual() {
        let op = DiagonalOperator::from_real(&[2.0, 4.0]).unwrap();
        let g = op.geometry();
        let b = FieldVector::from_real(g, Precision::Double, &[2.0, 4.0]).unwrap();
        let mut y = FieldVector::from_real(g, Precision::Double, &[0.5, 0.0]).unwrap();
        let mut xs = FieldVector::from_real(g, Precision::Single, &[0.5, 1.0]).unwrap();
        let mut r = y.similar();
        let mut rs = xs.similar();

        let r2 = fold_and_recompute(&op, &b, &mut y, &mut xs, &mut r, &mut rs);
        assert!(r2 < 1e-28);
        assert_eq!(xs.norm2(), 0.0);
        assert!((y.as_slice()[1].re - 1.0).abs() < 1e-15);
        assert_eq!(rs.precision(), Precision::Single);
    }
}
