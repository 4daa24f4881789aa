//! A sequence of solves with slowly drifting sources, each started from
//! the chronological minimum-residual guess.

use anyhow::{Result, bail};
use krylat_field::FieldVector;
use krylat_solver::{ChronoBasis, InvertParam, Solver, SolverKind, TimeProfile, create};

use crate::operator::{LatticeArgs, OperatorSet, SourceArgs};
use crate::output::{print_header, print_profile};

/// Per-step diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct ChronoStep {
    /// `|b - A x0| / |b|` of the extrapolated guess.
    pub guess_residual: f64,
    pub iterations: usize,
    pub residual: f64,
}

pub fn run_chrono(
    lattice: &LatticeArgs,
    source: &SourceArgs,
    param: InvertParam,
    steps: usize,
    history: usize,
    drift: f64,
) -> Result<Vec<ChronoStep>> {
    if param.inv_type == SolverKind::MultiShiftCg {
        bail!("chronological guesses need a single right-hand-side solver");
    }
    let stencil = lattice.stencil()?;
    let ops = OperatorSet::new(&stencil, &param);
    let geometry = ops.geometry();
    let b0 = source.build(geometry, param.precision)?;
    let drift_seed = source.seed.unwrap_or(0).wrapping_add(1);

    print_header(&format!("{} Chronological Sequence", param.inv_type.name()));
    println!("Lattice: {}", geometry);
    println!("Steps:   {} (history {}, drift {})", steps, history, drift);
    println!();

    let mut profile = TimeProfile::new("chrono");
    let mut solver = create(&param, &ops.mat, &ops.sloppy, &ops.precon, &mut profile)?;
    let mut basis = ChronoBasis::new(&ops.mat, history)?;

    println!(
        "  {:>5}  {:>14}  {:>6}  {:>14}",
        "step", "guess", "iter", "residual"
    );
    let mut trace = Vec::with_capacity(steps);
    for k in 0..steps {
        let mut b = b0.clone();
        let kick_seed = drift_seed.wrapping_add(k as u64);
        let kick = FieldVector::random(geometry, param.precision, kick_seed);
        b.axpy(drift, &kick);

        let mut x = b.similar();
        let guess = basis.guess(&mut x, &b, &mut profile)? / b.norm();
        let outcome = solver.solve(&mut x, &b, &mut profile)?;
        basis.push(&x)?;

        println!(
            "  {:>5}  {:>14.6e}  {:>6}  {:>14.6e}",
            k, guess, outcome.iterations, outcome.residual
        );
        trace.push(ChronoStep {
            guess_residual: guess,
            iterations: outcome.iterations,
            residual: outcome.residual,
        });
    }
    println!();
    print_profile(&profile);
    Ok(trace)
}
