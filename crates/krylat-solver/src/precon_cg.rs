//! Preconditioned conjugate gradient.
//!
//! Same outer iteration as [`Cg`](crate::Cg), but each step solves
//! `M z = r` with an inner solver built from the preconditioner part of
//! the parameters. An inner iterative solve is not a fixed linear map, so
//! the search directions use the flexible (Polak-Ribiere) form of beta.
//! Without an inner solver configured, `z = r`.

use std::time::Instant;

use krylat_field::{FieldVector, LatticeGeometry, LinearOperator};

use crate::error::Result;
use crate::param::{InvertParam, SolverKind};
use crate::profile::{TimeProfile, interval};
use crate::reliable::{ReliableUpdates, fold_and_recompute};
use crate::solver::{
    AnySolver, Finish, SolveOutcome, Solver, SolverStatus, check_fields, check_operators,
    create_preconditioner, trivial_solve, true_residual,
};

struct Workspace {
    y: FieldVector,
    r: FieldVector,
    x_sloppy: FieldVector,
    r_sloppy: FieldVector,
    r_old: FieldVector,
    z: FieldVector,
    p: FieldVector,
    ap: FieldVector,
    /// Inner solve input, in preconditioner precision.
    r_pre: FieldVector,
    /// Inner solve output, in preconditioner precision.
    z_pre: FieldVector,
}

/// Apply the inner solver, or the identity when there is none.
///
/// Shared with [`Gcr`](crate::Gcr).
pub(crate) struct Preconditioner<'a> {
    solver: Option<Box<AnySolver<'a>>>,
    /// Residual storage lent to an inner [`SimpleCg`](crate::SimpleCg).
    residual: Option<FieldVector>,
    profile: TimeProfile,
}

impl<'a> Preconditioner<'a> {
    pub(crate) fn new(param: &InvertParam, mat_precon: &'a dyn LinearOperator) -> Result<Self> {
        let solver = create_preconditioner(param, mat_precon)?;
        let residual = match solver.as_deref() {
            Some(AnySolver::SimpleCg(cg)) => Some(cg.residual_scratch()),
            _ => None,
        };
        Ok(Self {
            solver,
            residual,
            profile: TimeProfile::new("precon"),
        })
    }

    /// `z = M^-1 r`, staging through the preconditioner-precision fields.
    pub(crate) fn apply(
        &mut self,
        z: &mut FieldVector,
        r: &FieldVector,
        r_pre: &mut FieldVector,
        z_pre: &mut FieldVector,
        profile: &mut TimeProfile,
    ) -> Result<()> {
        let Some(solver) = self.solver.as_mut() else {
            z.copy_from(r);
            return Ok(());
        };
        r_pre.copy_from(r);
        z_pre.zero();
        let outcome = match (&mut **solver, self.residual.as_mut()) {
            (AnySolver::SimpleCg(cg), Some(residual)) => {
                cg.solve_with_scratch(z_pre, r_pre, residual, &mut self.profile)?
            }
            (solver, _) => solver.solve(z_pre, r_pre, &mut self.profile)?,
        };
        log::debug!(
            "{} preconditioner: {} iterations, |r|/|b| = {:e}",
            solver.kind(),
            outcome.iterations,
            outcome.residual
        );
        profile.merge_nested("precon", &self.profile);
        self.profile.reset();
        z.copy_from(z_pre);
        Ok(())
    }

    pub(crate) fn kind(&self) -> Option<SolverKind> {
        self.solver.as_ref().map(|s| s.kind())
    }
}

/// Conjugate gradient with an inner-solver preconditioner.
pub struct PreconCg<'a> {
    mat: &'a dyn LinearOperator,
    mat_sloppy: &'a dyn LinearOperator,
    param: InvertParam,
    geometry: LatticeGeometry,
    precon: Preconditioner<'a>,
    work: Workspace,
}

impl<'a> PreconCg<'a> {
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
            x_sloppy: sloppy.clone(),
            r_sloppy: sloppy.clone(),
            r_old: sloppy.clone(),
            z: sloppy.clone(),
            p: sloppy.clone(),
            ap: sloppy,
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

    /// Algorithm of the inner solve, if one is configured.
    pub fn preconditioner(&self) -> Option<SolverKind> {
        self.precon.kind()
    }
}

impl Solver for PreconCg<'_> {
    fn kind(&self) -> SolverKind {
        SolverKind::PreconCg
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
            x_sloppy,
            r_sloppy,
            r_old,
            z,
            p,
            ap,
            r_pre,
            z_pre,
        } = &mut self.work;
        let precon = &mut self.precon;

        y.copy_from(out);
        self.mat.apply(y, r);
        let mut r2 = r.xmy_norm(input);
        r_sloppy.copy_from(r);
        x_sloppy.zero();

        let stop = self.param.tol * self.param.tol * b2;
        let mixed = self.param.precision_sloppy != self.param.precision;
        let mut reliable = ReliableUpdates::new(self.param.reliable_delta, r2.sqrt());
        let mut history = vec![(r2 / b2).sqrt()];
        let mut status = SolverStatus::MaxIterations;
        let mut k = 0;
        profile.stop(interval::PREAMBLE);

        profile.start(interval::COMPUTE);
        let mut rz = 0.0;
        if r2 > stop {
            precon.apply(z, r_sloppy, r_pre, z_pre, profile)?;
            p.copy_from(z);
            rz = r_sloppy.re_dot(z);
        }
        while k < self.param.maxiter {
            if r2 <= stop {
                status = SolverStatus::Converged;
                break;
            }
            if !(rz.is_finite() && rz > 0.0) {
                log::warn!("{}: <r, z> = {:e} at iteration {}", kind, rz, k);
                status = SolverStatus::Breakdown;
                break;
            }

            self.mat_sloppy.apply(p, ap);
            let p_ap = p.re_dot(ap);
            if !(p_ap.is_finite() && p_ap > 0.0) {
                log::warn!("{}: <p, Ap> = {:e} at iteration {}", kind, p_ap, k);
                status = SolverStatus::Breakdown;
                break;
            }

            let alpha = rz / p_ap;
            x_sloppy.axpy(alpha, p);
            r_old.copy_from(r_sloppy);
            r2 = r_sloppy.axpy_norm(-alpha, ap);
            k += 1;

            if reliable.observe(r2.sqrt()) || (mixed && r2 <= stop) {
                r2 = fold_and_recompute(self.mat, input, y, x_sloppy, r, r_sloppy);
                reliable.reset(r2.sqrt());
                log::debug!(
                    "{}: reliable update {} at iteration {}, true |r|^2 = {:e}",
                    kind,
                    reliable.count(),
                    k,
                    r2
                );
            }
            history.push((r2 / b2).sqrt());
            log::debug!("{}: {} iterations, <r,r> = {:e}", kind, k, r2);
            if r2 <= stop {
                continue;
            }

            precon.apply(z, r_sloppy, r_pre, z_pre, profile)?;
            let rz_new = r_sloppy.re_dot(z);
            let beta = (rz_new - z.re_dot(r_old)) / rz;
            p.xpay(z, beta);
            rz = rz_new;
        }
        if status == SolverStatus::MaxIterations && r2 <= stop {
            status = SolverStatus::Converged;
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
    use krylat_field::{DiagonalOperator, Precision, PrecisionOperator, StencilOperator};

    fn system() -> (StencilOperator, FieldVector) {
        let g = LatticeGeometry::new([4, 4, 4, 4], 1).unwrap();
        let op = StencilOperator::new(g, 0.2);
        let b = FieldVector::random(g, Precision::Double, 11);
        (op, b)
    }

    #[test]
    fn inner_cg_reduces_outer_iterations() {
        let (op, b) = system();

        let mut plain = PreconCg::new(&op, &op, &op, InvertParam::for_solver(SolverKind::PreconCg))
            .unwrap();
        assert_eq!(plain.preconditioner(), None);
        let mut x = b.similar();
        let (plain_outcome, _) = plain.solve_timed(&mut x, &b).unwrap();
        assert!(plain_outcome.converged());

        let param = InvertParam::for_solver(SolverKind::PreconCg).with_preconditioner(
            SolverKind::SimpleCg,
            0.1,
            8,
        );
        let mut precon = PreconCg::new(&op, &op, &op, param).unwrap();
        assert_eq!(precon.preconditioner(), Some(SolverKind::SimpleCg));
        assert_eq!(
            precon.precon.residual.as_ref().map(|r| r.precision()),
            Some(Precision::Double)
        );
        let mut x = b.similar();
        let (outcome, profile) = precon.solve_timed(&mut x, &b).unwrap();

        assert!(outcome.converged());
        assert!(outcome.residual < 1e-9);
        assert!(outcome.iterations < plain_outcome.iterations);
        assert!(profile.count("precon/compute") >= outcome.iterations);
    }

    #[test]
    fn half_precision_preconditioner() {
        let (op, b) = system();
        let half = PrecisionOperator::new(&op, Precision::Half);
        let param = InvertParam {
            precision_precondition: Precision::Half,
            ..InvertParam::for_solver(SolverKind::PreconCg).with_preconditioner(
                SolverKind::Mr,
                0.1,
                4,
            )
        };
        let mut solver = PreconCg::new(&op, &op, &half, param).unwrap();
        assert!(solver.precon.residual.is_none());
        let mut x = b.similar();
        let (outcome, _) = solver.solve_timed(&mut x, &b).unwrap();
        assert!(outcome.converged());
        assert!(outcome.residual < 1e-9);
    }

    #[test]
    fn half_precision_inner_solve_on_small_operator() {
        let op = DiagonalOperator::from_real(&[0.02, 0.03, 0.04, 0.06]).unwrap();
        let half = PrecisionOperator::new(&op, Precision::Half);
        let b = FieldVector::from_real(op.geometry(), Precision::Double, &[1.0; 4]).unwrap();
        let param = InvertParam {
            precision_precondition: Precision::Half,
            ..InvertParam::for_solver(SolverKind::PreconCg)
                .with_tol(1e-10)
                .with_preconditioner(SolverKind::Mr, 0.1, 4)
        };
        let mut solver = PreconCg::new(&op, &op, &half, param).unwrap();
        let mut x = b.similar();
        let (outcome, _) = solver.solve_timed(&mut x, &b).unwrap();
        assert_eq!(outcome.status, SolverStatus::Converged);
        assert!(outcome.residual < 1e-9);
    }
}
