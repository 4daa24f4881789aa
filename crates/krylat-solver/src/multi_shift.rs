//! Multi-shift conjugate gradient.
//!
//! Solves `(A + s_j) x_j = b` for every shift `s_j` in `param.offset` with
//! one Krylov space. The recurrence runs on the smallest shift (the worst
//! conditioned system); every other system reuses its residual scaled by a
//! per-shift factor `zeta`, so each extra shift costs a few field updates
//! per iteration and no operator applications.
//!
//! A shift whose residual `|zeta_j| |r|` meets its tolerance is frozen: its
//! solution and direction stop being updated. The shared residual and the
//! base direction keep going until every shift is frozen.
//!
//! The shared recurrence runs on the sloppy operator. Afterwards each
//! shift's true residual is recomputed with the full operator, and any
//! converged shift that misses its tolerance is refined by a full-precision
//! [`Cg`] on the shifted operator starting from the multi-shift solution.
//! Refinement gets only the iterations left over from `param.maxiter`.

use std::time::Instant;

use krylat_field::{FieldVector, LatticeGeometry, LinearOperator, ShiftedOperator};

use crate::cg::Cg;
use crate::error::{Error, Result};
use crate::param::{InvertParam, SolverKind};
use crate::profile::{TimeProfile, interval};
use crate::solver::{Solver, SolverStatus, check_geometry, check_operators};

/// Diagnostics of one shifted system.
#[derive(Debug, Clone)]
pub struct ShiftOutcome {
    pub shift: f64,
    pub status: SolverStatus,
    /// Shared iterations until the shift froze, plus refinement iterations.
    pub iterations: usize,
    /// Refinement iterations alone.
    pub refine_iterations: usize,
    /// True relative residual of the returned solution.
    pub residual: f64,
    /// Iterated relative residual when the shared recurrence stopped.
    pub iterated_residual: f64,
}

/// Diagnostics of a multi-shift solve.
#[derive(Debug, Clone)]
pub struct MultiShiftOutcome {
    /// Per shift, in the order of `param.offset`.
    pub shifts: Vec<ShiftOutcome>,
    /// Iterations of the shared recurrence.
    pub iterations: usize,
    pub secs: f64,
}

impl MultiShiftOutcome {
    /// Whether every shift converged.
    pub fn converged(&self) -> bool {
        self.shifts.iter().all(|s| s.status.is_converged())
    }

    /// Write the diagnostics back into `param`.
    pub fn record(&self, param: &mut InvertParam) {
        param.iter = self.iterations;
        param.secs = self.secs;
        param.true_res = self.shifts.iter().map(|s| s.residual).fold(0.0, f64::max);
        param.true_res_offset = self.shifts.iter().map(|s| s.residual).collect();
        param.iter_res_offset = self.shifts.iter().map(|s| s.iterated_residual).collect();
    }
}

/// A solver for a family of shifted systems sharing one right-hand side.
pub trait MultiShiftSolver {
    fn param(&self) -> &InvertParam;

    /// Solve `(A + offset[j]) outs[j] = input` for every shift.
    ///
    /// `outs` must hold one field per shift. Initial guesses are not used;
    /// every `outs[j]` is overwritten.
    fn solve(
        &mut self,
        outs: &mut [FieldVector],
        input: &FieldVector,
        profile: &mut TimeProfile,
    ) -> Result<MultiShiftOutcome>;
}

/// Per-shift recurrence state.
struct ShiftState {
    /// Shift relative to the base system.
    shift: f64,
    zeta: f64,
    zeta_old: f64,
    active: bool,
    frozen_at: usize,
    iterated: f64,
}

/// Multi-shift CG for Hermitian positive definite `A + s`.
pub struct MultiShiftCg<'a> {
    mat: &'a dyn LinearOperator,
    mat_sloppy: &'a dyn LinearOperator,
    param: InvertParam,
    geometry: LatticeGeometry,
    base: usize,
    r: FieldVector,
    ap: FieldVector,
    x: Vec<FieldVector>,
    p: Vec<FieldVector>,
}

impl<'a> MultiShiftCg<'a> {
    pub fn new(
        mat: &'a dyn LinearOperator,
        mat_sloppy: &'a dyn LinearOperator,
        param: InvertParam,
    ) -> Result<Self> {
        param.validate()?;
        if param.offset.is_empty() {
            return Err(Error::InvalidConfig("multi-shift solve without shifts".into()));
        }
        let geometry = check_operators(&param, mat, mat_sloppy, None)?;
        let base = param
            .offset
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);

        let sloppy = FieldVector::zeros(geometry, param.precision_sloppy);
        let n = param.offset.len();
        Ok(Self {
            mat,
            mat_sloppy,
            geometry,
            base,
            r: sloppy.clone(),
            ap: sloppy.clone(),
            x: vec![sloppy.clone(); n],
            p: vec![sloppy; n],
            param,
        })
    }

    /// Index of the shift the recurrence runs on.
    pub fn base_shift(&self) -> usize {
        self.base
    }

    /// Run the shared recurrence; solutions end up in `self.x`.
    fn iterate(&mut self, input: &FieldVector, b2: f64, states: &mut [ShiftState]) -> usize {
        let base = self.base;
        let base_op = ShiftedOperator::new(self.mat_sloppy, self.param.offset[base]);

        self.r.copy_from(input);
        for (x, p) in self.x.iter_mut().zip(self.p.iter_mut()) {
            x.zero();
            p.copy_from(input);
        }

        let mut r2 = b2;
        let mut alpha_old = 1.0;
        let mut beta_old = 0.0;
        let mut k = 0;
        while k < self.param.maxiter && states.iter().any(|s| s.active) {
            base_op.apply(&self.p[base], &mut self.ap);
            let p_ap = self.p[base].re_dot(&self.ap);
            if !(p_ap.is_finite() && p_ap > 0.0) {
                log::warn!(
                    "{}: <p, Ap> = {:e} at iteration {}",
                    SolverKind::MultiShiftCg,
                    p_ap,
                    k
                );
                for state in states.iter_mut().filter(|s| s.active) {
                    state.active = false;
                    state.frozen_at = k;
                    state.iterated = state.zeta.abs() * (r2 / b2).sqrt();
                }
                return k;
            }
            let alpha = r2 / p_ap;

            // zeta_{k+1} for every system still being tracked
            let mut zeta_new = vec![1.0; states.len()];
            for (j, state) in states.iter().enumerate() {
                if !(state.active || j == base) {
                    continue;
                }
                let denom = alpha * beta_old * (state.zeta_old - state.zeta)
                    + state.zeta_old * alpha_old * (1.0 + alpha * state.shift);
                zeta_new[j] = state.zeta * state.zeta_old * alpha_old / denom;
                if state.active {
                    let alpha_j = alpha * zeta_new[j] / state.zeta;
                    self.x[j].axpy(alpha_j, &self.p[j]);
                }
            }

            let r2_new = self.r.axpy_norm(-alpha, &self.ap);
            let beta = r2_new / r2;
            k += 1;

            for (j, state) in states.iter_mut().enumerate() {
                if !(state.active || j == base) {
                    continue;
                }
                let ratio = zeta_new[j] / state.zeta;
                let beta_j = beta * ratio * ratio;
                self.p[j].scale(beta_j);
                self.p[j].axpy(zeta_new[j], &self.r);
                state.zeta_old = state.zeta;
                state.zeta = zeta_new[j];

                let res2 = state.zeta * state.zeta * r2_new;
                let tol = self.param.shift_tol(j);
                if state.active && res2 <= tol * tol * b2 {
                    state.active = false;
                    state.frozen_at = k;
                    state.iterated = (res2 / b2).sqrt();
                    log::debug!(
                        "{}: shift {} converged after {} iterations",
                        SolverKind::MultiShiftCg,
                        j,
                        k
                    );
                }
            }

            alpha_old = alpha;
            beta_old = beta;
            r2 = r2_new;
            log::debug!(
                "{}: {} iterations, base <r,r> = {:e}",
                SolverKind::MultiShiftCg,
                k,
                r2
            );
        }

        for state in states.iter_mut().filter(|s| s.active) {
            state.frozen_at = k;
            state.iterated = state.zeta.abs() * (r2 / b2).sqrt();
        }
        k
    }
}

impl MultiShiftSolver for MultiShiftCg<'_> {
    fn param(&self) -> &InvertParam {
        &self.param
    }

    fn solve(
        &mut self,
        outs: &mut [FieldVector],
        input: &FieldVector,
        profile: &mut TimeProfile,
    ) -> Result<MultiShiftOutcome> {
        let n = self.param.offset.len();
        if outs.len() != n {
            return Err(Error::InvalidConfig(format!(
                "{} solution fields for {} shifts",
                outs.len(),
                n
            )));
        }
        check_geometry(self.geometry, input.geometry())?;
        for out in outs.iter() {
            check_geometry(self.geometry, out.geometry())?;
        }
        let started = Instant::now();

        let b2 = input.norm2();
        if b2 == 0.0 {
            outs.iter_mut().for_each(FieldVector::zero);
            let outcome = MultiShiftOutcome {
                shifts: self
                    .param
                    .offset
                    .iter()
                    .map(|&shift| ShiftOutcome {
                        shift,
                        status: SolverStatus::Converged,
                        iterations: 0,
                        refine_iterations: 0,
                        residual: 0.0,
                        iterated_residual: 0.0,
                    })
                    .collect(),
                iterations: 0,
                secs: 0.0,
            };
            outcome.record(&mut self.param);
            return Ok(outcome);
        }

        profile.start(interval::COMPUTE);
        let sigma_base = self.param.offset[self.base];
        let mut states: Vec<ShiftState> = self
            .param
            .offset
            .iter()
            .map(|&sigma| ShiftState {
                shift: sigma - sigma_base,
                zeta: 1.0,
                zeta_old: 1.0,
                active: true,
                frozen_at: 0,
                iterated: 1.0,
            })
            .collect();
        let iterations = self.iterate(input, b2, &mut states);
        profile.stop(interval::COMPUTE);

        profile.start(interval::EPILOGUE);
        let mut shifts = Vec::with_capacity(n);
        let mut scratch = FieldVector::zeros(self.geometry, self.param.precision);
        for (j, (out, state)) in outs.iter_mut().zip(&states).enumerate() {
            out.copy_from(&self.x[j]);
            let sigma = self.param.offset[j];
            let tol = self.param.shift_tol(j);
            let shifted = ShiftedOperator::new(self.mat, sigma);

            shifted.apply(out, &mut scratch);
            let mut residual = (scratch.xmy_norm(input) / b2).sqrt();
            let mut status = if state.active {
                SolverStatus::MaxIterations
            } else if state.iterated <= tol {
                SolverStatus::Converged
            } else {
                SolverStatus::Breakdown
            };

            // refinement shares the iteration budget with the recurrence
            let remaining = self.param.maxiter.saturating_sub(state.frozen_at);
            let mut refine_iterations = 0;
            if residual > tol && status == SolverStatus::Converged && remaining > 0 {
                log::debug!(
                    "{}: refining shift {} from true residual {:e}",
                    SolverKind::MultiShiftCg,
                    j,
                    residual
                );
                let refine_param = InvertParam {
                    inv_type: SolverKind::Cg,
                    tol,
                    maxiter: remaining,
                    precision_sloppy: self.param.precision,
                    inv_type_precondition: None,
                    offset: Vec::new(),
                    tol_offset: Vec::new(),
                    ..self.param.clone()
                };
                let mut cg = Cg::new(&shifted, &shifted, refine_param)?;
                let mut inner = TimeProfile::new("refine");
                let outcome = cg.solve(out, input, &mut inner)?;
                profile.merge_nested("refine", &inner);
                refine_iterations = outcome.iterations;
                residual = outcome.residual;
                status = outcome.status;
            }

            shifts.push(ShiftOutcome {
                shift: sigma,
                status,
                iterations: state.frozen_at + refine_iterations,
                refine_iterations,
                residual,
                iterated_residual: state.iterated,
            });
        }
        profile.stop(interval::EPILOGUE);

        let outcome = MultiShiftOutcome {
            shifts,
            iterations,
            secs: started.elapsed().as_secs_f64(),
        };
        if outcome.converged() {
            log::info!(
                "{}: {} shifts converged in {} iterations",
                SolverKind::MultiShiftCg,
                n,
                iterations
            );
        } else {
            log::warn!(
                "{}: not every shift converged after {} iterations",
                SolverKind::MultiShiftCg,
                iterations
            );
        }
        outcome.record(&mut self.param);
        Ok(outcome)
    }
}
