//! Diagnostics printing.

use std::path::Path;

use anyhow::{Context, Result};
use krylat_solver::{InvertParam, MultiShiftOutcome, SolveOutcome, TimeProfile};

/// Print a section title underlined to its width.
pub fn print_header(title: &str) {
    println!("{}", title);
    println!("{}", "=".repeat(title.len()));
    println!();
}

/// Print the diagnostics of a single right-hand-side solve.
pub fn print_outcome(outcome: &SolveOutcome, verbose: bool) {
    println!("Status:      {:?}", outcome.status);
    println!("Iterations:  {}", outcome.iterations);
    println!("|b - Ax|/|b| = {:.6e}", outcome.residual);
    println!("Time:        {:.6} s", outcome.secs);

    if verbose && !outcome.history.is_empty() {
        println!();
        println!("Residual history:");
        for (k, r) in outcome.history.iter().enumerate() {
            println!("  {:>6}  {:.6e}", k, r);
        }
    }
    println!();
}

/// Print one row per shift of a multi-shift solve.
pub fn print_multishift(outcome: &MultiShiftOutcome) {
    println!(
        "  {:>12}  {:>14}  {:>6}  {:>7}  {:>14}  {:>14}",
        "shift", "status", "iter", "refine", "iterated", "true"
    );
    for s in &outcome.shifts {
        println!(
            "  {:>12.6}  {:>14}  {:>6}  {:>7}  {:>14.6e}  {:>14.6e}",
            s.shift,
            format!("{:?}", s.status),
            s.iterations,
            s.refine_iterations,
            s.iterated_residual,
            s.residual
        );
    }
    println!();
    println!("Shared iterations: {}", outcome.iterations);
    println!("Time:              {:.6} s", outcome.secs);
    println!();
}

pub fn print_profile(profile: &TimeProfile) {
    println!("{}", profile);
    println!();
}

/// Write `param`, diagnostics included, as pretty JSON.
pub fn save_param(param: &InvertParam, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(param)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    log::info!("wrote parameters to {}", path.display());
    Ok(())
}
