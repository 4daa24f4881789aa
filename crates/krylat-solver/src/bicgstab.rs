//! Stabilized biconjugate gradient.
//!
//! For non-Hermitian operators. Each iteration takes a biconjugate step
//! along `p` followed by a minimal-residual stabilization step along `s`.
//! The recurrence runs on the sloppy operator with reliable updates like
//! [`Cg`](crate::Cg); after every reliable update the shadow residual is
//! reset to the recomputed residual.
//!
//! When a step denominator vanishes the iteration restarts from the
//! current solution. A breakdown right after a restart, or more than
//! `max_restarts` restarts, ends the solve with
//! [`SolverStatus::Breakdown`].
//!
//! Scratch fields are owned by the solver and never alias `input` or `out`.

use std::time::Instant;

use krylat_field::{C64, FieldVector, LatticeGeometry, LinearOperator, Precision};

use crate::error::Result;
use crate::param::{InvertParam, SolverKind};
use crate::precon_cg::Preconditioner;
use crate::profile::{TimeProfile, interval};
use crate::reliable::{ReliableUpdates, fold_and_recompute};
use crate::solver::{
    Finish, SolveOutcome, Solver, SolverStatus, check_fields, check_operators, trivial_solve,
    true_residual, vanishes,
};

struct Workspace {
    /// Full-precision solution.
    y: FieldVector,
    /// Full-precision residual.
    r: FieldVector,
    r_sloppy: FieldVector,
    /// Shadow residual.
    r0: FieldVector,
    x_sloppy: FieldVector,
    p: FieldVector,
    v: FieldVector,
    t: FieldVector,
    // preconditioned directions and inner-solve staging
    p_hat: FieldVector,
    s_hat: FieldVector,
    r_pre: FieldVector,
    z_pre: FieldVector,
}

/// Reset shadow residual and direction to `r`; returns the new `rho`.
fn reset_shadow(r0: &mut FieldVector, p: &mut FieldVector, r: &FieldVector) -> C64 {
    r0.copy_from(r);
    p.copy_from(r);
    r0.cdot(r)
}

/// Stabilized biconjugate gradient with an optional right preconditioner.
pub struct BiCgStab<'a> {
    mat: &'a dyn LinearOperator,
    mat_sloppy: &'a dyn LinearOperator,
    param: InvertParam,
    geometry: LatticeGeometry,
    precon: Preconditioner<'a>,
    work: Workspace,
}

impl<'a> BiCgStab<'a> {
    pub fn new(
        mat: &'a dyn LinearOperator,
        mat_sloppy: &'a dyn LinearOperator,
        mat_precon: &'a dyn LinearOperator,
        param: InvertParam,
    ) -> Result<Self> {
        param.validate()?;
        let geometry = check_operators(&param, mat, mat_sloppy, Some(mat_precon))?;
        let precon = Preconditioner::new(&param, mat_precon)?;

        let full = FieldVector::zeros(geometry, param.precision);
        let sloppy = FieldVector::zeros(geometry, param.precision_sloppy);
        let pre = FieldVector::zeros(geometry, param.precision_precondition);
        let work = Workspace {
            y: full.clone(),
            r: full,
            r_sloppy: sloppy.clone(),
            r0: sloppy.clone(),
            x_sloppy: sloppy.clone(),
            p: sloppy.clone(),
            v: sloppy.clone(),
            t: sloppy.clone(),
            p_hat: sloppy.clone(),
            s_hat: sloppy,
            r_pre: pre.clone(),
            z_pre: pre,
        };
        Ok(Self {
            mat,
            mat_sloppy,
            param,
            geometry,
            precon,
            work,
        })
    }
}

impl Solver for BiCgStab<'_> {
    fn kind(&self) -> SolverKind {
        SolverKind::BiCgStab
    }

    fn param(&self) -> &InvertParam {
        &self.param
    }

    fn solve(
        &mut self,
        out: &mut FieldVector,
        input: &FieldVector,
        profile: &mut TimeProfile,
    ) -> Result<SolveOutcome> {
        check_fields(self.geometry, out, input)?;
        let kind = self.kind();
        let started = Instant::now();
        profile.start(interval::PREAMBLE);

        let b2 = input.norm2();
        if b2 == 0.0 {
            profile.stop(interval::PREAMBLE);
            return Ok(trivial_solve(kind, out, &mut self.param));
        }

        let Workspace {
            y,
            r,
            r_sloppy,
            r0,
            x_sloppy,
            p,
            v,
            t,
            p_hat,
            s_hat,
            r_pre,
            z_pre,
        } = &mut self.work;
        let precon = &mut self.precon;
        let preconditioned = precon.kind().is_some();

        y.copy_from(out);
        self.mat.apply(y, r);
        let mut r2 = r.xmy_norm(input);
        r_sloppy.copy_from(r);
        x_sloppy.zero();
        let mut rho = reset_shadow(r0, p, r_sloppy);
        let mut r0_norm = r2.sqrt();

        let precision: Precision = self.param.precision_sloppy;
        let stop = self.param.tol * self.param.tol * b2;
        let mixed = self.param.precision_sloppy != self.param.precision;
        let mut reliable = ReliableUpdates::new(self.param.reliable_delta, r2.sqrt());
        let mut history = vec![(r2 / b2).sqrt()];
        let mut status = SolverStatus::MaxIterations;
        let mut k = 0;
        let mut restarts = 0;
        let mut since_restart = 0;
        profile.stop(interval::PREAMBLE);

        profile.start(interval::COMPUTE);
        loop {
            if r2 <= stop {
                status = SolverStatus::Converged;
                break;
            }
            if k >= self.param.maxiter {
                break;
            }

            let mut breakdown = None;

            // biconjugate step
            if preconditioned {
                precon.apply(p_hat, p, r_pre, z_pre, profile)?;
            } else {
                p_hat.copy_from(p);
            }
            self.mat_sloppy.apply(p_hat, v);
            let r0v = r0.cdot(v);
            if vanishes(r0v.norm(), r0_norm * v.norm(), precision) {
                breakdown = Some("<r0, v>");
            } else {
                let alpha = rho / r0v;
                x_sloppy.caxpy(alpha, p_hat);
                r_sloppy.caxpy(-alpha, v);
                let s2 = r_sloppy.norm2();
                k += 1;
                since_restart += 1;

                if s2 <= stop {
                    r2 = s2;
                    if mixed {
                        r2 = fold_and_recompute(self.mat, input, y, x_sloppy, r, r_sloppy);
                        reliable.reset(r2.sqrt());
                        rho = reset_shadow(r0, p, r_sloppy);
                        r0_norm = r2.sqrt();
                    }
                    history.push((r2 / b2).sqrt());
                    continue;
                }

                // stabilization step
                if preconditioned {
                    precon.apply(s_hat, r_sloppy, r_pre, z_pre, profile)?;
                } else {
                    s_hat.copy_from(r_sloppy);
                }
                self.mat_sloppy.apply(s_hat, t);
                let tt = t.norm2();
                let ts = t.cdot(r_sloppy);
                if !(tt.is_finite() && tt > 0.0)
                    || vanishes(ts.norm(), (tt * s2).sqrt(), precision)
                {
                    r2 = s2;
                    breakdown = Some("<t, s>");
                } else {
                    let omega = ts / tt;
                    x_sloppy.caxpy(omega, s_hat);
                    r_sloppy.caxpy(-omega, t);
                    r2 = r_sloppy.norm2();

                    if reliable.observe(r2.sqrt()) || (mixed && r2 <= stop) {
                        r2 = fold_and_recompute(self.mat, input, y, x_sloppy, r, r_sloppy);
                        reliable.reset(r2.sqrt());
                        rho = reset_shadow(r0, p, r_sloppy);
                        r0_norm = r2.sqrt();
                        log::debug!(
                            "{}: reliable update {} at iteration {}, true |r|^2 = {:e}",
                            kind,
                            reliable.count(),
                            k,
                            r2
                        );
                    } else {
                        let rho_new = r0.cdot(r_sloppy);
                        if vanishes(rho_new.norm(), r0_norm * r2.sqrt(), precision) {
                            breakdown = Some("rho");
                        } else {
                            let beta = (rho_new / rho) * (alpha / omega);
                            p.caxpy(-omega, v);
                            p.cxpay(r_sloppy, beta);
                            rho = rho_new;
                        }
                    }
                }
                history.push((r2 / b2).sqrt());
                log::debug!("{}: {} iterations, <r,r> = {:e}", kind, k, r2);
            }

            if let Some(what) = breakdown {
                if since_restart == 0 || restarts >= self.param.max_restarts {
                    log::warn!("{}: {} vanished at iteration {}, giving up", kind, what, k);
                    status = SolverStatus::Breakdown;
                    break;
                }
                restarts += 1;
                since_restart = 0;
                log::warn!(
                    "{}: {} vanished at iteration {}, restart {} from current solution",
                    kind,
                    what,
                    k,
                    restarts
                );
                r2 = fold_and_recompute(self.mat, input, y, x_sloppy, r, r_sloppy);
                reliable.reset(r2.sqrt());
                rho = reset_shadow(r0, p, r_sloppy);
                r0_norm = r2.sqrt();
            }
        }
        profile.stop(interval::COMPUTE);

        profile.start(interval::EPILOGUE);
        y.axpy(1.0, x_sloppy);
        out.copy_from(y);
        let residual = true_residual(self.mat, y, input, b2, r);
        profile.stop(interval::EPILOGUE);

        Ok(Finish {
            status,
            iterations: k,
            residual,
            history,
            started,
        }
        .report(kind, &mut self.param))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krylat_field::{DenseOperator, PrecisionOperator, StencilOperator};

    #[test]
    fn solves_nonhermitian_stencil() {
        let g = LatticeGeometry::new([4, 4, 4, 4], 2).unwrap();
        let op = StencilOperator::new(g, 0.5).with_asymmetry(0.4);
        let b = FieldVector::random(g, Precision::Double, 5);
        let mut x = b.similar();
        let param = InvertParam::for_solver(SolverKind::BiCgStab);
        let mut solver = BiCgStab::new(&op, &op, &op, param).unwrap();
        let (outcome, _) = solver.solve_timed(&mut x, &b).unwrap();

        assert!(outcome.converged());
        assert!(outcome.residual < 1e-9);
    }

    #[test]
    fn input_is_untouched() {
        let op = DenseOperator::from_row_slice(2, &[2.0, 1.0, 0.0, 3.0]).unwrap();
        let b = FieldVector::from_real(op.geometry(), Precision::Double, &[1.0, 2.0]).unwrap();
        let before = b.clone();
        let mut x = b.similar();
        let mut solver =
            BiCgStab::new(&op, &op, &op, InvertParam::for_solver(SolverKind::BiCgStab)).unwrap();
        let (outcome, _) = solver.solve_timed(&mut x, &b).unwrap();
        assert!(outcome.converged());
        assert_eq!(b, before);
        // x = [1/6, 2/3]
        assert!((x.as_slice()[0].re - 1.0 / 6.0).abs() < 1e-10);
        assert!((x.as_slice()[1].re - 2.0 / 3.0).abs() < 1e-10);
    }

    #[test]
    fn mixed_precision_with_reliable_updates() {
        let g = LatticeGeometry::new([4, 4, 4, 4], 1).unwrap();
        let op = StencilOperator::new(g, 1.0).with_asymmetry(0.2);
        let sloppy = PrecisionOperator::new(&op, Precision::Single);
        let param = InvertParam {
            precision_sloppy: Precision::Single,
            ..InvertParam::for_solver(SolverKind::BiCgStab)
        };
        let b = FieldVector::random(g, Precision::Double, 9);
        let mut x = b.similar();
        let mut solver = BiCgStab::new(&op, &sloppy, &op, param).unwrap();
        let (outcome, _) = solver.solve_timed(&mut x, &b).unwrap();
        assert!(outcome.converged());
        assert!(outcome.residual < 1e-9);
    }

    #[test]
    fn rotation_breaks_down() {
        // <b, A b> = 0 for a rotation, so the first step cannot be taken
        let op = DenseOperator::from_row_slice(2, &[0.0, 1.0, -1.0, 0.0]).unwrap();
        let b = FieldVector::from_real(op.geometry(), Precision::Double, &[1.0, 0.0]).unwrap();
        let mut x = b.similar();
        let mut solver =
            BiCgStab::new(&op, &op, &op, InvertParam::for_solver(SolverKind::BiCgStab)).unwrap();
        let (outcome, _) = solver.solve_timed(&mut x, &b).unwrap();
        assert_eq!(outcome.status, SolverStatus::Breakdown);
        assert_eq!(outcome.iterations, 0);
        assert!((outcome.residual - 1.0).abs() < 1e-15);
    }

    #[test]
    fn right_preconditioned_with_mr() {
        let g = LatticeGeometry::new([4, 4, 4, 4], 1).unwrap();
        let op = StencilOperator::new(g, 4.0).with_asymmetry(0.3);
        let param = InvertParam::for_solver(SolverKind::BiCgStab).with_preconditioner(
            SolverKind::Mr,
            0.1,
            4,
        );
        let b = FieldVector::random(g, Precision::Double, 2);
        let mut x = b.similar();
        let mut solver = BiCgStab::new(&op, &op, &op, param).unwrap();
        let (outcome, profile) = solver.solve_timed(&mut x, &b).unwrap();
        assert!(outcome.converged());
        assert!(outcome.residual < 1e-9);
        assert!(profile.count("precon/compute") > 0);
    }

    fn asymmetric(scale: f64) -> DenseOperator {
        let values = [
            4.0, 1.0, 0.0, 0.0, -1.0, 4.0, 1.0, 0.0, 0.0, -1.0, 4.0, 1.0, 0.0, 0.0, -1.0, 4.0,
        ];
        DenseOperator::from_row_slice(4, &values.map(|v| v * scale)).unwrap()
    }

    #[test]
    fn small_operator_scale_still_converges() {
        let mut solutions = Vec::new();
        for scale in [1.0, 1e-9] {
            let op = asymmetric(scale);
            let rhs = [1.0, 2.0, 3.0, 4.0];
            let b = FieldVector::from_real(op.geometry(), Precision::Double, &rhs).unwrap();
            let mut x = b.similar();
            let param = InvertParam::for_solver(SolverKind::BiCgStab).with_tol(1e-10);
            let mut solver = BiCgStab::new(&op, &op, &op, param).unwrap();
            let (outcome, _) = solver.solve_timed(&mut x, &b).unwrap();
            assert_eq!(outcome.status, SolverStatus::Converged);
            assert!(outcome.residual < 1e-9);
            solutions.push(x);
        }
        for (unit, small) in solutions[0].as_slice().iter().zip(solutions[1].as_slice()) {
            assert!((*small * 1e-9 - *unit).norm() < 1e-8 * unit.norm().max(1.0));
        }
    }

    #[test]
    fn restarts_after_rho_vanishes_then_converges() {
        // span{e2, e3} is invariant and one step from e1 lands inside it,
        // so <r0, r> = 0 exactly while the residual is still nonzero
        let op = DenseOperator::from_row_slice(3, &[2.0, 0.0, 0.0, 1.0, 3.0, 1.0, 1.0, -1.0, 3.0])
            .unwrap();
        let b = FieldVector::from_real(op.geometry(), Precision::Double, &[1.0, 0.0, 0.0]).unwrap();
        let base = InvertParam {
            reliable_delta: 0.0,
            ..InvertParam::for_solver(SolverKind::BiCgStab).with_tol(1e-10)
        };

        let no_restart = InvertParam {
            max_restarts: 0,
            ..base.clone()
        };
        let mut x = b.similar();
        let mut solver = BiCgStab::new(&op, &op, &op, no_restart).unwrap();
        let (outcome, _) = solver.solve_timed(&mut x, &b).unwrap();
        assert_eq!(outcome.status, SolverStatus::Breakdown);
        assert_eq!(outcome.iterations, 1);

        let mut x = b.similar();
        let mut solver = BiCgStab::new(&op, &op, &op, base).unwrap();
        let (outcome, _) = solver.solve_timed(&mut x, &b).unwrap();
        assert_eq!(outcome.status, SolverStatus::Converged);
        assert!(outcome.iterations > 1);
        assert!(outcome.residual < 1e-10);
        let expected = [0.5, -0.1, -0.2];
        for (xi, e) in x.as_slice().iter().zip(expected) {
            assert!((xi.re - e).abs() < 1e-10);
        }
    }
}
