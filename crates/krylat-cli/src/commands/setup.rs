//! Near-null-space setup for a multigrid preconditioner.

use anyhow::Result;
use krylat_solver::{AlphaSa, InvertParam, NullSpaceSetup, TimeProfile};

use crate::operator::{LatticeArgs, OperatorSet, SourceArgs};
use crate::output::{print_header, print_profile};

pub fn run_setup(
    lattice: &LatticeArgs,
    source: &SourceArgs,
    param: InvertParam,
) -> Result<NullSpaceSetup> {
    let stencil = lattice.stencil()?;
    let ops = OperatorSet::new(&stencil, &param);
    let seed = source.build(ops.geometry(), param.precision)?;

    print_header("alphaSA Null-Space Setup");
    println!("Lattice: {}", ops.geometry());
    println!(
        "Vectors: {} ({} smoothing steps each)",
        param.num_null_vectors, param.null_smoother_iters
    );
    println!();

    let mut profile = TimeProfile::new("setup");
    let mut setup = AlphaSa::new(&ops.mat, param)?;
    let mut vectors = setup.allocate();
    let result = setup.setup(&mut vectors, &seed, &mut profile)?;

    println!("Rayleigh quotients:");
    for (i, q) in result.rayleigh.iter().enumerate() {
        println!("  e{:<3} {:.6e}", i, q);
    }
    println!();

    let aggregation = &result.aggregation;
    println!("Aggregation:");
    println!("  block        {:?}", aggregation.block());
    println!("  coarse dims  {:?}", aggregation.coarse_dims());
    println!("  aggregates   {}", aggregation.num_aggregates());
    println!("  coarse size  {}", aggregation.coarse_len(vectors.len()));

    // fraction of the source the coarse space sees
    let coarse = aggregation.restrict(&vectors, &seed);
    let mut back = seed.similar();
    aggregation.prolong(&vectors, &coarse, &mut back);
    println!("  |P R b|/|b|  {:.6e}", back.norm() / seed.norm());
    println!();
    print_profile(&profile);
    Ok(result)
}
