//! krylat command-line driver.
//!
//! Builds the reference stencil operator, loads solver parameters from
//! JSON and runs single, multi-shift, chronological or null-space setup
//! solves, printing diagnostics and timings.

mod commands;
mod operator;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use krylat_solver::SolverKind;

use crate::commands::{load_param, run_chrono, run_multishift, run_setup, run_solve};
use crate::operator::{LatticeArgs, SourceArgs};

#[derive(Parser)]
#[command(name = "krylat")]
#[command(about = "Mixed-precision Krylov solvers on a 4-D lattice stencil")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve A x = b with a single right-hand-side solver
    Solve {
        #[command(flatten)]
        lattice: LatticeArgs,

        #[command(flatten)]
        source: SourceArgs,

        /// Parameter file (JSON); missing keys take their defaults
        #[arg(short, long)]
        param: Option<PathBuf>,

        /// Solver algorithm, overriding the parameter file
        #[arg(long)]
        solver: Option<SolverKind>,

        /// Relative residual tolerance
        #[arg(long)]
        tol: Option<f64>,

        /// Iteration limit
        #[arg(long)]
        maxiter: Option<usize>,

        /// Write the parameters with the solve diagnostics to this file
        #[arg(long)]
        save: Option<PathBuf>,

        /// Print the residual history
        #[arg(short, long)]
        verbose: bool,
    },

    /// Solve (A + s) x = b for a set of shifts at once
    Multishift {
        #[command(flatten)]
        lattice: LatticeArgs,

        #[command(flatten)]
        source: SourceArgs,

        #[arg(short, long)]
        param: Option<PathBuf>,

        /// Shifts, comma separated, overriding the parameter file
        #[arg(long, value_delimiter = ',')]
        shifts: Vec<f64>,

        #[arg(long)]
        tol: Option<f64>,

        #[arg(long)]
        maxiter: Option<usize>,

        /// Also predict this shift's solution from the others
        #[arg(long)]
        extrapolate: Option<usize>,

        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Solve a sequence of drifting sources using chronological guesses
    Chrono {
        #[command(flatten)]
        lattice: LatticeArgs,

        #[command(flatten)]
        source: SourceArgs,

        #[arg(short, long)]
        param: Option<PathBuf>,

        #[arg(long)]
        solver: Option<SolverKind>,

        /// Number of solves
        #[arg(long, default_value_t = 8)]
        steps: usize,

        /// Solutions kept in the chronological basis
        #[arg(long, default_value_t = 4)]
        history: usize,

        /// Size of the random change to the source between solves
        #[arg(long, default_value_t = 1e-2)]
        drift: f64,
    },

    /// Generate near-null-space vectors for a multigrid preconditioner
    Setup {
        #[command(flatten)]
        lattice: LatticeArgs,

        #[command(flatten)]
        source: SourceArgs,

        #[arg(short, long)]
        param: Option<PathBuf>,

        /// Number of vectors, overriding the parameter file
        #[arg(long)]
        nvec: Option<usize>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Run a subcommand; `Ok(false)` means it ran but did not converge.
fn run(command: Commands) -> Result<bool> {
    match command {
        Commands::Solve {
            lattice,
            source,
            param,
            solver,
            tol,
            maxiter,
            save,
            verbose,
        } => {
            let param = load_param(param.as_deref(), solver, tol, maxiter)?;
            let outcome = run_solve(&lattice, &source, param, save.as_deref(), verbose)?;
            Ok(outcome.converged())
        }
        Commands::Multishift {
            lattice,
            source,
            param,
            shifts,
            tol,
            maxiter,
            extrapolate,
            save,
        } => {
            let mut param = load_param(param.as_deref(), None, tol, maxiter)?;
            if !shifts.is_empty() {
                param = param.with_offsets(shifts);
                param.validate()?;
            }
            let outcome = run_multishift(&lattice, &source, param, extrapolate, save.as_deref())?;
            Ok(outcome.converged())
        }
        Commands::Chrono {
            lattice,
            source,
            param,
            solver,
            steps,
            history,
            drift,
        } => {
            let param = load_param(param.as_deref(), solver, None, None)?;
            let tol = param.tol;
            let trace = run_chrono(&lattice, &source, param, steps, history, drift)?;
            let total: usize = trace.iter().map(|s| s.iterations).sum();
            let worst_guess = trace.iter().skip(1).map(|s| s.guess_residual).fold(0.0, f64::max);
            println!("Total iterations: {}", total);
            println!("Worst extrapolated guess: {:.6e}", worst_guess);
            Ok(trace.iter().all(|s| s.residual <= tol))
        }
        Commands::Setup {
            lattice,
            source,
            param,
            nvec,
        } => {
            let mut param = load_param(param.as_deref(), None, None, None)?;
            if let Some(n) = nvec {
                param.num_null_vectors = n;
            }
            run_setup(&lattice, &source, param)?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_solver_names() {
        let cli = Cli::try_parse_from([
            "krylat", "solve", "--solver", "bicgstab", "--dims", "2,2,2,2", "--mass", "1.0",
        ])
        .unwrap();
        match cli.command {
            Commands::Solve { solver, lattice, .. } => {
                assert_eq!(solver, Some(SolverKind::BiCgStab));
                assert_eq!(lattice.dims, vec![2, 2, 2, 2]);
            }
            _ => panic!("expected solve"),
        }
    }
}
