//! Flexible generalized conjugate residual.
//!
//! Every iteration preconditions the current residual with a fresh inner
//! solve, applies the operator, and orthogonalizes the image against the
//! stored images with modified Gram-Schmidt. Because the orthogonality is
//! enforced explicitly, the preconditioner may change from one iteration
//! to the next (a loose inner Krylov solve, say).
//!
//! At most `gcr_nkrylov` directions are kept (0 keeps all of them). When
//! the basis is full, the solution is folded into full precision, the
//! residual recomputed and the basis discarded.

use std::time::Instant;

use krylat_field::{FieldVector, LatticeGeometry, LinearOperator};

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
    y: FieldVector,
    r: FieldVector,
    x_sloppy: FieldVector,
    r_sloppy: FieldVector,
    z: FieldVector,
    az: FieldVector,
    r_pre: FieldVector,
    z_pre: FieldVector,
    /// Search directions.
    p: Vec<FieldVector>,
    /// Orthonormal images `A p`.
    ap: Vec<FieldVector>,
}

/// GCR with an optional inner-solver preconditioner.
pub struct Gcr<'a> {
    mat: &'a dyn LinearOperator,
    mat_sloppy: &'a dyn LinearOperator,
    param: InvertParam,
    geometry: LatticeGeometry,
    precon: Preconditioner<'a>,
    work: Workspace,
}

impl<'a> Gcr<'a> {
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
            z: sloppy.clone(),
            az: sloppy.clone(),
            r_pre: pre.clone(),
            z_pre: pre,
            p: vec![sloppy.clone(); param.gcr_nkrylov],
            ap: vec![sloppy; param.gcr_nkrylov],
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

impl Solver for Gcr<'_> {
    fn kind(&self) -> SolverKind {
        SolverKind::Gcr
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
            z,
            az,
            r_pre,
            z_pre,
            p,
            ap,
        } = &mut self.work;
        let precon = &mut self.precon;

        y.copy_from(out);
        self.mat.apply(y, r);
        let mut r2 = r.xmy_norm(input);
        r_sloppy.copy_from(r);
        x_sloppy.zero();

        let nkrylov = self.param.gcr_nkrylov;
        let precision = self.param.precision_sloppy;
        let stop = self.param.tol * self.param.tol * b2;
        let mixed = self.param.precision_sloppy != self.param.precision;
        let mut reliable = ReliableUpdates::new(self.param.reliable_delta, r2.sqrt());
        let mut history = vec![(r2 / b2).sqrt()];
        let mut status = SolverStatus::MaxIterations;
        let mut k = 0;
        let mut basis = 0;
        let mut restarts = 0;
        profile.stop(interval::PREAMBLE);

        profile.start(interval::COMPUTE);
        while k < self.param.maxiter {
            if r2 <= stop {
                status = SolverStatus::Converged;
                break;
            }

            precon.apply(z, r_sloppy, r_pre, z_pre, profile)?;
            self.mat_sloppy.apply(z, az);
            let norm_before = az.norm();
            for (pj, apj) in p.iter().zip(ap.iter()).take(basis) {
                let beta = apj.cdot(az);
                az.caxpy(-beta, apj);
                z.caxpy(-beta, pj);
            }
            let norm = az.norm();
            if vanishes(norm, norm_before, precision) {
                log::warn!(
                    "{}: direction {} lies in the span of the basis at iteration {}",
                    kind,
                    basis,
                    k
                );
                status = SolverStatus::Breakdown;
                break;
            }
            az.scale(1.0 / norm);
            z.scale(1.0 / norm);

            let alpha = az.cdot(r_sloppy);
            x_sloppy.caxpy(alpha, z);
            r_sloppy.caxpy(-alpha, az);
            r2 = r_sloppy.norm2();
            k += 1;

            if basis < p.len() {
                std::mem::swap(&mut p[basis], &mut *z);
                std::mem::swap(&mut ap[basis], &mut *az);
            } else {
                p.push(z.clone());
                ap.push(az.clone());
            }
            basis += 1;

            let restart = nkrylov > 0 && basis == nkrylov;
            if restart || reliable.observe(r2.sqrt()) || (mixed && r2 <= stop) {
                r2 = fold_and_recompute(self.mat, input, y, x_sloppy, r, r_sloppy);
                reliable.reset(r2.sqrt());
                if restart {
                    basis = 0;
                    restarts += 1;
                    log::debug!("{}: restart {} at iteration {}", kind, restarts, k);
                }
            }
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
