//! Inverter configuration.
//!
//! [`InvertParam`] is the flat record of numerical knobs handed to every
//! solver. Solvers read it at construction and only ever write the output
//! diagnostics (`true_res`, `iter`, `secs` and the per-shift tables).

use std::fmt;
use std::str::FromStr;

use krylat_field::Precision;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Algorithm discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SolverKind {
    /// Conjugate gradient with reliable updates.
    #[default]
    #[serde(rename = "cg")]
    Cg,
    /// Single-precision CG without reliable updates, used as an inner solve.
    #[serde(rename = "simple-cg")]
    SimpleCg,
    /// CG with an inner-solver preconditioner.
    #[serde(rename = "precon-cg", alias = "pcg")]
    PreconCg,
    /// Stabilized biconjugate gradient.
    #[serde(rename = "bicgstab")]
    BiCgStab,
    /// Flexible generalized conjugate residual.
    #[serde(rename = "gcr")]
    Gcr,
    /// Minimal residual.
    #[serde(rename = "mr")]
    Mr,
    /// Multi-shift CG over a family of shifted systems.
    #[serde(rename = "multi-shift-cg", alias = "multishift")]
    MultiShiftCg,
}

impl SolverKind {
    /// All algorithms, in declaration order.
    pub const ALL: [SolverKind; 7] = [
        SolverKind::Cg,
        SolverKind::SimpleCg,
        SolverKind::PreconCg,
        SolverKind::BiCgStab,
        SolverKind::Gcr,
        SolverKind::Mr,
        SolverKind::MultiShiftCg,
    ];

    /// Parse from a string.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().replace('_', "-").as_str() {
            "cg" => Some(Self::Cg),
            "simple-cg" | "simplecg" => Some(Self::SimpleCg),
            "precon-cg" | "preconcg" | "pcg" => Some(Self::PreconCg),
            "bicgstab" | "bi-cg-stab" => Some(Self::BiCgStab),
            "gcr" => Some(Self::Gcr),
            "mr" => Some(Self::Mr),
            "multi-shift-cg" | "multishift-cg" | "multishift" => Some(Self::MultiShiftCg),
            _ => None,
        }
    }

    /// Display name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cg => "CG",
            Self::SimpleCg => "SimpleCG",
            Self::PreconCg => "PreconCG",
            Self::BiCgStab => "BiCGstab",
            Self::Gcr => "GCR",
            Self::Mr => "MR",
            Self::MultiShiftCg => "MultiShiftCG",
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SolverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| Error::UnknownSolver(s.to_string()))
    }
}

/// Inverter parameters.
///
/// Deserializes from partial records: any field left out takes its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvertParam {
    /// Outer algorithm.
    pub inv_type: SolverKind,
    /// Target relative residual `|b - Ax| / |b|`.
    pub tol: f64,
    /// Iteration budget.
    pub maxiter: usize,
    /// Relative residual drop that triggers a reliable update (0 disables).
    pub reliable_delta: f64,

    /// Precision of the full operator.
    pub precision: Precision,
    /// Precision of the sloppy operator.
    pub precision_sloppy: Precision,
    /// Precision of the preconditioning operator.
    pub precision_precondition: Precision,

    /// Inner solver used as preconditioner by PreconCG and GCR.
    pub inv_type_precondition: Option<SolverKind>,
    /// Tolerance of the inner solve.
    pub tol_precondition: f64,
    /// Iteration budget of the inner solve.
    pub maxiter_precondition: usize,

    /// GCR directions kept before a restart (0 keeps all).
    pub gcr_nkrylov: usize,
    /// MR over-relaxation factor.
    pub omega: f64,
    /// BiCGstab restarts allowed after breakdown.
    pub max_restarts: usize,

    /// Shifts for multi-shift solves, and the masses for mass extrapolation.
    pub offset: Vec<f64>,
    /// Per-shift tolerances (empty: every shift uses `tol`).
    pub tol_offset: Vec<f64>,

    /// Near-null-space vectors produced by the multigrid setup.
    pub num_null_vectors: usize,
    /// Smoothing steps applied to each null-space candidate.
    pub null_smoother_iters: usize,

    /// Output: achieved true relative residual.
    pub true_res: f64,
    /// Output: iterations performed.
    pub iter: usize,
    /// Output: wall-clock seconds spent in the solve.
    pub secs: f64,
    /// Output: true relative residual per shift.
    pub true_res_offset: Vec<f64>,
    /// Output: iterated relative residual per shift.
    pub iter_res_offset: Vec<f64>,
}

impl Default for InvertParam {
    fn default() -> Self {
        Self {
            inv_type: SolverKind::Cg,
            tol: 1e-10,
            maxiter: 1000,
            reliable_delta: 0.1,
            precision: Precision::Double,
            precision_sloppy: Precision::Double,
            precision_precondition: Precision::Double,
            inv_type_precondition: None,
            tol_precondition: 1e-1,
            maxiter_precondition: 10,
            gcr_nkrylov: 16,
            omega: 1.0,
            max_restarts: 8,
            offset: Vec::new(),
            tol_offset: Vec::new(),
            num_null_vectors: 4,
            null_smoother_iters: 8,
            true_res: 0.0,
            iter: 0,
            secs: 0.0,
            true_res_offset: Vec::new(),
            iter_res_offset: Vec::new(),
        }
    }
}

impl InvertParam {
    /// Parameters for the given algorithm with default knobs.
    pub fn for_solver(inv_type: SolverKind) -> Self {
        Self {
            inv_type,
            ..Default::default()
        }
    }

    /// Set the tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set the iteration budget.
    pub fn with_maxiter(mut self, maxiter: usize) -> Self {
        self.maxiter = maxiter;
        self
    }

    /// Set the inner preconditioner solve.
    pub fn with_preconditioner(mut self, kind: SolverKind, tol: f64, maxiter: usize) -> Self {
        self.inv_type_precondition = Some(kind);
        self.tol_precondition = tol;
        self.maxiter_precondition = maxiter;
        self
    }

    /// Set the multi-shift offsets.
    pub fn with_offsets(mut self, offset: Vec<f64>) -> Self {
        self.offset = offset;
        self
    }

    /// Check every input knob.
    pub fn validate(&self) -> Result<()> {
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                self.tol
            )));
        }
        if self.maxiter == 0 {
            return Err(Error::InvalidConfig("maxiter must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.reliable_delta) {
            return Err(Error::InvalidConfig(format!(
                "reliable_delta must lie in [0, 1), got {}",
                self.reliable_delta
            )));
        }
        if self.inv_type_precondition.is_some() {
            if !(self.tol_precondition.is_finite() && self.tol_precondition > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "preconditioner tolerance must be positive, got {}",
                    self.tol_precondition
                )));
            }
            if self.maxiter_precondition == 0 {
                return Err(Error::InvalidConfig(
                    "maxiter_precondition must be at least 1".into(),
                ));
            }
        }
        if !(self.omega > 0.0 && self.omega < 2.0) {
            return Err(Error::InvalidConfig(format!(
                "omega must lie in (0, 2), got {}",
                self.omega
            )));
        }
        if let Some(shift) = self.offset.iter().find(|s| !s.is_finite()) {
            return Err(Error::InvalidConfig(format!("non-finite shift {}", shift)));
        }
        if !self.tol_offset.is_empty() {
            if self.tol_offset.len() != self.offset.len() {
                return Err(Error::InvalidConfig(format!(
                    "{} shift tolerances for {} shifts",
                    self.tol_offset.len(),
                    self.offset.len()
                )));
            }
            if self.tol_offset.iter().any(|t| !(t.is_finite() && *t > 0.0)) {
                return Err(Error::InvalidConfig("shift tolerances must be positive".into()));
            }
        }
        Ok(())
    }

    /// Tolerance for shift `index`.
    pub fn shift_tol(&self, index: usize) -> f64 {
        self.tol_offset.get(index).copied().unwrap_or(self.tol)
    }

    /// Parameters for the inner preconditioner solve, if one is configured.
    ///
    /// The inner solve runs entirely in the preconditioner precision, with
    /// no reliable updates and no preconditioner of its own.
    pub fn preconditioner(&self) -> Option<InvertParam> {
        let kind = self.inv_type_precondition?;
        Some(InvertParam {
            inv_type: kind,
            tol: self.tol_precondition,
            maxiter: self.maxiter_precondition,
            reliable_delta: 0.0,
            precision: self.precision_precondition,
            precision_sloppy: self.precision_precondition,
            precision_precondition: self.precision_precondition,
            inv_type_precondition: None,
            offset: Vec::new(),
            tol_offset: Vec::new(),
            true_res: 0.0,
            iter: 0,
            secs: 0.0,
            true_res_offset: Vec::new(),
            iter_res_offset: Vec::new(),
            ..self.clone()
        })
    }
}
