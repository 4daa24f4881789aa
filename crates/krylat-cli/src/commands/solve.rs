//! Single right-hand-side solve.

use std::path::Path;

use anyhow::{Result, bail};
use krylat_solver::{InvertParam, SolveOutcome, Solver, SolverKind, TimeProfile, create};

use crate::operator::{LatticeArgs, OperatorSet, SourceArgs};
use crate::output::{print_header, print_outcome, print_profile, save_param};

/// Solve `A x = b` with the solver named in `param`.
pub fn run_solve(
    lattice: &LatticeArgs,
    source: &SourceArgs,
    mut param: InvertParam,
    save: Option<&Path>,
    verbose: bool,
) -> Result<SolveOutcome> {
    if param.inv_type == SolverKind::MultiShiftCg {
        bail!("multi-shift CG solves a family of systems, use the multishift subcommand");
    }
    let stencil = lattice.stencil()?;
    let ops = OperatorSet::new(&stencil, &param);
    let b = source.build(ops.geometry(), param.precision)?;

    print_header(&format!("{} Solve", param.inv_type.name()));
    println!("Lattice:   {}", ops.geometry());
    println!(
        "Precision: {} / {} / {}",
        param.precision, param.precision_sloppy, param.precision_precondition
    );
    if let Some(kind) = param.inv_type_precondition {
        println!("Preconditioner: {}", kind);
    }
    println!();

    let mut profile = TimeProfile::new("solve");
    let mut solver = create(&param, &ops.mat, &ops.sloppy, &ops.precon, &mut profile)?;
    let mut x = b.similar();
    let outcome = solver.solve(&mut x, &b, &mut profile)?;

    print_outcome(&outcome, verbose);
    print_profile(&profile);

    if let Some(path) = save {
        outcome.record(&mut param);
        save_param(&param, path)?;
    }
    Ok(outcome)
}
