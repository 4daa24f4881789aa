//! Conjugate gradient with reliable updates.
//!
//! The recurrence runs on the sloppy operator. A partial solution is
//! accumulated in sloppy precision and periodically folded into the
//! full-precision solution, at which point the residual is recomputed with
//! the full operator (see [`crate::reliable`]). The operator must be
//! Hermitian positive definite.

use std::time::Instant;

use krylat_field::{FieldVector, LatticeGeometry, LinearOperator};

use crate::error::Result;
use crate::param::{InvertParam, SolverKind};
use crate::profile::{TimeProfile, interval};
use crate::reliable::{ReliableUpdates, fold_and_recompute};
use crate::solver::{
    Finish, SolveOutcome, Solver, SolverStatus, check_fields, check_operators, trivial_solve,
    true_residual,
};

struct Workspace {
    /// Full-precision solution.
    y: FieldVector,
    /// Full-precision residual.
    r: FieldVector,
    x_sloppy: FieldVector,
    r_sloppy: FieldVector,
    p: FieldVector,
    ap: FieldVector,
}

/// Mixed-precision conjugate gradient.
pub struct Cg<'a> {
    mat: &'a dyn LinearOperator,
    mat_sloppy: &'a dyn LinearOperator,
    param: InvertParam,
    geometry: LatticeGeometry,
    work: Workspace,
}

impl<'a> Cg<'a> {
    pub fn new(
        mat: &'a dyn LinearOperator,
        mat_sloppy: &'a dyn LinearOperator,
        param: InvertParam,
    ) -> Result<Self> {
        param.validate()?;
        let geometry = check_operators(&param, mat, mat_sloppy, None)?;
        let full = FieldVector::zeros(geometry, param.precision);
        let sloppy = FieldVector::zeros(geometry, param.precision_sloppy);
        let work = Workspace {
            y: full.clone(),
            r: full,
            x_sloppy: sloppy.clone(),
            r_sloppy: sloppy.clone(),
            p: sloppy.clone(),
            ap: sloppy,
        };
        Ok(Self {
            mat,
            mat_sloppy,
            param,
            geometry,
            work,
        })
    }
}

impl Solver for Cg<'_> {
    fn kind(&self) -> SolverKind {
        SolverKind::Cg
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
        let started = Instant::now();
        profile.start(interval::PREAMBLE);

        let kind = self.kind();
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
            p,
            ap,
        } = &mut self.work;

        y.copy_from(out);
        self.mat.apply(y, r);
        let mut r2 = r.xmy_norm(input);
        r_sloppy.copy_from(r);
        x_sloppy.zero();
        p.copy_from(r_sloppy);

        let stop = self.param.tol * self.param.tol * b2;
        let mixed = self.param.precision_sloppy != self.param.precision;
        let mut reliable = ReliableUpdates::new(self.param.reliable_delta, r2.sqrt());
        let mut history = vec![(r2 / b2).sqrt()];
        let mut status = SolverStatus::MaxIterations;
        let mut k = 0;
        profile.stop(interval::PREAMBLE);

        profile.start(interval::COMPUTE);
        while k < self.param.maxiter {
            if r2 <= stop {
                status = SolverStatus::Converged;
                break;
            }

            self.mat_sloppy.apply(p, ap);
            let p_ap = p.re_dot(ap);
            if !(p_ap.is_finite() && p_ap > 0.0) {
                log::warn!("{}: <p, Ap> = {:e} at iteration {}", kind, p_ap, k);
                status = SolverStatus::Breakdown;
                break;
            }

            let alpha = r2 / p_ap;
            x_sloppy.axpy(alpha, p);
            let r2_old = r2;
            r2 = r_sloppy.axpy_norm(-alpha, ap);
            k += 1;

            let update = reliable.observe(r2.sqrt()) || (mixed && r2 <= stop);
            if update {
                r2 = fold_and_recompute(self.mat, input, y, x_sloppy, r, r_sloppy);
                reliable.reset(r2.sqrt());
                log::debug!(
                    "{}: reliable update {} at iteration {}, true |r|^2 = {:e}",
                    kind,
                    reliable.count(),
                    k,
                    r2
                );
                // restore the orthogonality of p against the new residual
                if r2 > 0.0 {
                    let rp = r_sloppy.re_dot(p) / r2;
                    p.axpy(-rp, r_sloppy);
                }
            }

            let beta = r2 / r2_old;
            p.xpay(r_sloppy, beta);

            history.push((r2 / b2).sqrt());
            log::debug!("{}: {} iterations, <r,r> = {:e}", kind, k, r2);
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
