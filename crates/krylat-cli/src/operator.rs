//! Lattice operator construction from command-line arguments.

use anyhow::{Result, bail};
use clap::Args;
use krylat_field::{
    FieldVector, LatticeGeometry, LinearOperator, Precision, PrecisionOperator, StencilOperator,
};
use krylat_solver::InvertParam;

/// Options describing the reference stencil operator.
#[derive(Args, Debug, Clone)]
pub struct LatticeArgs {
    /// Lattice extents, four comma-separated values
    #[arg(long, value_delimiter = ',', default_value = "4,4,4,4")]
    pub dims: Vec<usize>,

    /// Components per site
    #[arg(long, default_value_t = 2)]
    pub dof: usize,

    /// Mass term added to the hopping stencil
    #[arg(long, default_value_t = 0.5)]
    pub mass: f64,

    /// Forward/backward hopping asymmetry (non-zero makes the operator non-Hermitian)
    #[arg(long, default_value_t = 0.0)]
    pub asymmetry: f64,
}

/// Right-hand side selection.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Use a reproducible random source with this seed instead of a point source
    #[arg(long)]
    pub seed: Option<u64>,

    /// Component index of the point source
    #[arg(long, default_value_t = 0)]
    pub point: usize,
}

impl LatticeArgs {
    pub fn geometry(&self) -> Result<LatticeGeometry> {
        let dims: [usize; 4] = match self.dims.as_slice().try_into() {
            Ok(dims) => dims,
            Err(_) => bail!("--dims needs four extents, got {}", self.dims.len()),
        };
        Ok(LatticeGeometry::new(dims, self.dof)?)
    }

    pub fn stencil(&self) -> Result<StencilOperator> {
        let geometry = self.geometry()?;
        log::info!(
            "stencil operator on {} (mass {}, asymmetry {})",
            geometry,
            self.mass,
            self.asymmetry
        );
        Ok(StencilOperator::new(geometry, self.mass).with_asymmetry(self.asymmetry))
    }
}

impl SourceArgs {
    /// Build the source in `precision`.
    pub fn build(&self, geometry: LatticeGeometry, precision: Precision) -> Result<FieldVector> {
        match self.seed {
            Some(seed) => Ok(FieldVector::random(geometry, precision, seed)),
            None => {
                if self.point >= geometry.len() {
                    bail!(
                        "point source index {} outside field of length {}",
                        self.point,
                        geometry.len()
                    );
                }
                Ok(FieldVector::point_source(geometry, precision, self.point))
            }
        }
    }
}

/// The full, sloppy and preconditioner views of one operator, tagged with
/// the precisions `param` asks for.
pub struct OperatorSet<'a> {
    pub mat: PrecisionOperator<&'a StencilOperator>,
    pub sloppy: PrecisionOperator<&'a StencilOperator>,
    pub precon: PrecisionOperator<&'a StencilOperator>,
}

impl<'a> OperatorSet<'a> {
    pub fn new(stencil: &'a StencilOperator, param: &InvertParam) -> Self {
        Self {
            mat: PrecisionOperator::new(stencil, param.precision),
            sloppy: PrecisionOperator::new(stencil, param.precision_sloppy),
            precon: PrecisionOperator::new(stencil, param.precision_precondition),
        }
    }

    pub fn geometry(&self) -> LatticeGeometry {
        self.mat.geometry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lattice(dims: Vec<usize>) -> LatticeArgs {
        LatticeArgs {
            dims,
            dof: 1,
            mass: 1.0,
            asymmetry: 0.0,
        }
    }

    #[test]
    fn rejects_wrong_number_of_extents() {
        assert!(lattice(vec![4, 4, 4]).geometry().is_err());
        assert_eq!(lattice(vec![2, 3, 4, 5]).geometry().unwrap().volume(), 120);
    }

    #[test]
    fn operator_set_follows_param_precisions() {
        let stencil = lattice(vec![2, 2, 2, 2]).stencil().unwrap();
        let param = InvertParam {
            precision_sloppy: Precision::Half,
            ..InvertParam::default()
        };
        let ops = OperatorSet::new(&stencil, &param);
        assert_eq!(ops.mat.precision(), Precision::Double);
        assert_eq!(ops.sloppy.precision(), Precision::Half);
    }

    #[test]
    fn point_source_out_of_range() {
        let g = LatticeGeometry::new([2, 2, 2, 2], 1).unwrap();
        let source = SourceArgs {
            seed: None,
            point: 16,
        };
        assert!(source.build(g, Precision::Double).is_err());
    }
}
