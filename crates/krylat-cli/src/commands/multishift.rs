//! Multi-shift solve, optionally checking mass extrapolation.

use std::path::Path;

use anyhow::{Result, bail};
use krylat_field::FieldVector;
use krylat_solver::{
    InvertParam, MultiShiftCg, MultiShiftOutcome, MultiShiftSolver, SolverKind, TimeProfile,
    poly_mass_ext,
};

use crate::operator::{LatticeArgs, OperatorSet, SourceArgs};
use crate::output::{print_header, print_multishift, print_profile, save_param};

/// Solve `(A + s_i) x_i = b` for every shift in `param.offset`.
///
/// With `extrapolate = Some(i)`, solution `i` is also predicted from the
/// others by polynomial extrapolation and the relative error reported.
pub fn run_multishift(
    lattice: &LatticeArgs,
    source: &SourceArgs,
    mut param: InvertParam,
    extrapolate: Option<usize>,
    save: Option<&Path>,
) -> Result<MultiShiftOutcome> {
    param.inv_type = SolverKind::MultiShiftCg;
    if param.offset.is_empty() {
        bail!("no shifts given, pass --shifts or set \"offset\" in the parameter file");
    }
    if let Some(idx) = extrapolate {
        if idx >= param.offset.len() {
            bail!("extrapolation index {} outside {} shifts", idx, param.offset.len());
        }
    }

    let stencil = lattice.stencil()?;
    let ops = OperatorSet::new(&stencil, &param);
    let b = source.build(ops.geometry(), param.precision)?;

    print_header("Multi-shift CG Solve");
    println!("Lattice: {}", ops.geometry());
    println!("Shifts:  {:?}", param.offset);
    println!();

    let mut profile = TimeProfile::new("multishift");
    let mut solver = MultiShiftCg::new(&ops.mat, &ops.sloppy, param.clone())?;
    let mut outs = vec![b.similar(); param.offset.len()];
    let outcome = solver.solve(&mut outs, &b, &mut profile)?;

    print_multishift(&outcome);

    if let Some(idx) = extrapolate {
        let error = extrapolation_error(&mut outs, &param, idx)?;
        println!(
            "Extrapolated shift {} from {} solutions: relative error {:.6e}",
            param.offset[idx],
            outs.len() - 1,
            error
        );
        println!();
    }
    print_profile(&profile);

    if let Some(path) = save {
        outcome.record(&mut param);
        save_param(&param, path)?;
    }
    Ok(outcome)
}

/// Replace `outs[idx]` by its extrapolation; returns `|x_ext - x| / |x|`.
fn extrapolation_error(outs: &mut [FieldVector], param: &InvertParam, idx: usize) -> Result<f64> {
    let solved = outs[idx].clone();
    poly_mass_ext(outs, param, idx)?;
    let mut diff = outs[idx].clone();
    diff.axpy(-1.0, &solved);
    Ok(diff.norm() / solved.norm())
}
