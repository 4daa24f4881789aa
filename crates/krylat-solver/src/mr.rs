//! Minimal residual iteration.
//!
//! Each step minimizes `|r - alpha A r|` over `alpha`, optionally
//! over-relaxed by `omega`. No search history is kept. Converges for any
//! operator whose Hermitian part is positive definite.

use std::time::Instant;

use krylat_field::{C64, FieldVector, LatticeGeometry, LinearOperator};

use crate::error::Result;
use crate::param::{InvertParam, SolverKind};
use crate::profile::{TimeProfile, interval};
use crate::solver::{
    Finish, SolveOutcome, Solver, SolverStatus, check_fields, trivial_solve, true_residual,
    vanishes,
};

/// Minimal residual solver on a single operator.
pub struct Mr<'a> {
    mat: &'a dyn LinearOperator,
    param: InvertParam,
    geometry: LatticeGeometry,
    r: FieldVector,
    ar: FieldVector,
    x: FieldVector,
}

impl<'a> Mr<'a> {
    pub fn new(mat: &'a dyn LinearOperator, param: InvertParam) -> Result<Self> {
        param.validate()?;
        let geometry = mat.geometry();
        let r = FieldVector::zeros(geometry, mat.precision());
        Ok(Self {
            mat,
            param,
            geometry,
            ar: r.clone(),
            x: r.clone(),
            r,
        })
    }
}

impl Solver for Mr<'_> {
    fn kind(&self) -> SolverKind {
        SolverKind::Mr
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

        let b2 = input.norm2();
        if b2 == 0.0 {
            return Ok(trivial_solve(kind, out, &mut self.param));
        }

        profile.start(interval::COMPUTE);
        let (r, ar, x) = (&mut self.r, &mut self.ar, &mut self.x);
        x.copy_from(out);
        self.mat.apply(x, r);
        let mut r2 = r.xmy_norm(input);

        let omega = self.param.omega;
        let precision = self.mat.precision();
        let stop = self.param.tol * self.param.tol * b2;
        let mut history = vec![(r2 / b2).sqrt()];
        let mut status = SolverStatus::MaxIterations;
        let mut k = 0;
        while k < self.param.maxiter {
            if r2 <= stop {
                status = SolverStatus::Converged;
                break;
            }
            self.mat.apply(r, ar);
            let ar2 = ar.norm2();
            let ar_r = ar.cdot(r);
            // stagnation: A r has no component along r
            if !(ar2.is_finite() && ar2 > 0.0)
                || vanishes(ar_r.norm(), (ar2 * r2).sqrt(), precision)
            {
                status = SolverStatus::Breakdown;
                break;
            }
            let alpha: C64 = ar_r / ar2 * omega;
            x.caxpy(alpha, r);
            r.caxpy(-alpha, ar);
            r2 = r.norm2();
            k += 1;
            history.push((r2 / b2).sqrt());
            log::debug!("{}: {} iterations, <r,r> = {:e}", kind, k, r2);
        }
        if status == SolverStatus::MaxIterations && r2 <= stop {
            status = SolverStatus::Converged;
        }
        profile.stop(interval::COMPUTE);

        out.copy_from(x);
        let residual = true_residual(self.mat, x, input, b2, ar);
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
