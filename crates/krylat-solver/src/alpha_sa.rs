//! Adaptive smoothed-aggregation setup.
//!
//! Produces near-null-space vectors of the operator: fields `e` with
//! `|A e|` small compared with `|e|`, from which a coarse-grid operator for
//! a multigrid preconditioner is built.
//!
//! The heuristic:
//! 1. Candidate 0 starts from the supplied field, the rest from
//!    reproducible random fields.
//! 2. Each candidate is relaxed with `null_smoother_iters` minimal-residual
//!    steps on `A e = 0`, which damps the large-eigenvalue components.
//! 3. It is Gram-Schmidt orthonormalized against the earlier candidates
//!    and its Rayleigh quotient `Re <e, A e>` recorded.
//!
//! The coarse space is formed by geometric aggregation: the lattice is cut
//! into 2x2x2x2 blocks (extents of 1 are not blocked), and every candidate
//! restricted to one block spans one coarse degree of freedom.

use krylat_field::{C64, FieldVector, LatticeGeometry, LinearOperator, NDIM, Precision};
use num_traits::Zero;

use crate::error::{Error, Result};
use crate::param::InvertParam;
use crate::profile::{TimeProfile, interval};
use crate::solver::check_geometry;

/// Block extent used for aggregation along every dimension.
pub const BLOCK_EXTENT: usize = 2;

/// Seed offset for random candidates.
const SEED_BASE: u64 = 0x5eed;

/// Reseeding attempts for a candidate that collapses under
/// orthogonalization.
const MAX_RESEEDS: usize = 4;

/// Geometric aggregation of lattice sites into blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    block: [usize; NDIM],
    coarse_dims: [usize; NDIM],
    dof_per_site: usize,
    site_to_aggregate: Vec<usize>,
}

impl Aggregation {
    /// Cut `geometry` into blocks of `BLOCK_EXTENT` sites per dimension.
    pub fn geometric(geometry: LatticeGeometry) -> Self {
        let dims = geometry.dims();
        let mut block = [1; NDIM];
        let mut coarse_dims = [1; NDIM];
        for mu in 0..NDIM {
            block[mu] = BLOCK_EXTENT.min(dims[mu]);
            coarse_dims[mu] = dims[mu].div_ceil(block[mu]);
        }
        let site_to_aggregate = (0..geometry.volume())
            .map(|site| {
                let x = geometry.coords(site);
                let mut index = 0;
                for mu in (0..NDIM).rev() {
                    index = index * coarse_dims[mu] + x[mu] / block[mu];
                }
                index
            })
            .collect();
        Self {
            block,
            coarse_dims,
            dof_per_site: geometry.dof_per_site(),
            site_to_aggregate,
        }
    }

    pub fn block(&self) -> [usize; NDIM] {
        self.block
    }

    pub fn coarse_dims(&self) -> [usize; NDIM] {
        self.coarse_dims
    }

    pub fn num_aggregates(&self) -> usize {
        self.coarse_dims.iter().product()
    }

    /// Aggregate containing `site`.
    pub fn aggregate_of(&self, site: usize) -> usize {
        self.site_to_aggregate[site]
    }

    /// Dimension of the coarse space spanned by `num_vectors` candidates.
    pub fn coarse_len(&self, num_vectors: usize) -> usize {
        self.num_aggregates() * num_vectors
    }

    /// Coarse coefficients `c[a * n + i] = <e_i|_a, v|_a>`.
    pub fn restrict(&self, candidates: &[FieldVector], v: &FieldVector) -> Vec<C64> {
        let n = candidates.len();
        let mut coarse = vec![C64::zero(); self.coarse_len(n)];
        let dof = self.dof_per_site;
        for (i, e) in candidates.iter().enumerate() {
            let es = e.as_slice();
            let vs = v.as_slice();
            for (site, &agg) in self.site_to_aggregate.iter().enumerate() {
                let range = site * dof..(site + 1) * dof;
                let local: C64 = es[range.clone()]
                    .iter()
                    .zip(&vs[range])
                    .map(|(a, b)| a.conj() * b)
                    .sum();
                coarse[agg * n + i] += local;
            }
        }
        coarse
    }

    /// Fine field `v = sum_{a,i} c[a * n + i] e_i|_a`.
    pub fn prolong(&self, candidates: &[FieldVector], coarse: &[C64], v: &mut FieldVector) {
        let n = candidates.len();
        let dof = self.dof_per_site;
        let precision = v.precision();
        let out = v.as_mut_slice();
        out.fill(C64::zero());
        for (i, e) in candidates.iter().enumerate() {
            let es = e.as_slice();
            for (site, &agg) in self.site_to_aggregate.iter().enumerate() {
                let c = coarse[agg * n + i];
                for k in site * dof..(site + 1) * dof {
                    out[k] += c * es[k];
                }
            }
        }
        v.quantize_to(precision);
    }
}

/// Result of the null-space setup.
#[derive(Debug, Clone)]
pub struct NullSpaceSetup {
    /// `Re <e_i, A e_i>` of each orthonormal candidate.
    pub rayleigh: Vec<f64>,
    pub aggregation: Aggregation,
}

/// Near-null-space setup for a multigrid preconditioner.
pub struct AlphaSa<'a> {
    mat: &'a dyn LinearOperator,
    param: InvertParam,
    r: FieldVector,
    ar: FieldVector,
}

impl<'a> AlphaSa<'a> {
    pub fn new(mat: &'a dyn LinearOperator, param: InvertParam) -> Result<Self> {
        param.validate()?;
        if param.num_null_vectors == 0 {
            return Err(Error::InvalidConfig("num_null_vectors must be at least 1".into()));
        }
        let r = FieldVector::zeros(mat.geometry(), mat.precision());
        Ok(Self {
            mat,
            param,
            ar: r.clone(),
            r,
        })
    }

    pub fn param(&self) -> &InvertParam {
        &self.param
    }

    /// Fields to receive `num_null_vectors` candidates.
    pub fn allocate(&self) -> Vec<FieldVector> {
        vec![
            FieldVector::zeros(self.mat.geometry(), self.param.precision);
            self.param.num_null_vectors
        ]
    }

    /// Fill `outs` with orthonormal near-null-space vectors.
    pub fn setup(
        &mut self,
        outs: &mut [FieldVector],
        input: &FieldVector,
        profile: &mut TimeProfile,
    ) -> Result<NullSpaceSetup> {
        let geometry = self.mat.geometry();
        check_geometry(geometry, input.geometry())?;
        for out in outs.iter() {
            check_geometry(geometry, out.geometry())?;
        }

        profile.start(interval::COMPUTE);
        let result = self.generate(outs, input);
        profile.stop(interval::COMPUTE);
        let rayleigh = result?;

        log::info!(
            "alphaSA: {} null-space vectors, Rayleigh quotients {:?}",
            outs.len(),
            rayleigh
        );
        Ok(NullSpaceSetup {
            rayleigh,
            aggregation: Aggregation::geometric(geometry),
        })
    }

    fn generate(&mut self, outs: &mut [FieldVector], input: &FieldVector) -> Result<Vec<f64>> {
        let mut rayleigh = Vec::with_capacity(outs.len());
        for i in 0..outs.len() {
            let (done, rest) = outs.split_at_mut(i);
            let e = &mut rest[0];

            let geometry = e.geometry();
            let mut accepted = false;
            for attempt in 0..=MAX_RESEEDS {
                if i == 0 && attempt == 0 && input.norm2() > 0.0 {
                    e.copy_from(input);
                } else {
                    let seed = SEED_BASE + (i * (MAX_RESEEDS + 1) + attempt) as u64;
                    e.copy_from(&FieldVector::random(geometry, Precision::Double, seed));
                }
                self.smooth(e);

                // two Gram-Schmidt passes
                let norm_before = e.norm();
                for _ in 0..2 {
                    for prev in done.iter() {
                        let proj = prev.cdot(e);
                        e.caxpy(-proj, prev);
                    }
                }
                let norm = e.norm();
                if norm > 1e3 * e.precision().epsilon() * norm_before {
                    e.scale(1.0 / norm);
                    accepted = true;
                    break;
                }
                log::warn!("alphaSA: candidate {} collapsed, reseeding", i);
            }
            if !accepted {
                return Err(Error::SingularProjection);
            }

            self.mat.apply(e, &mut self.ar);
            rayleigh.push(e.re_dot(&self.ar));
        }
        Ok(rayleigh)
    }

    /// Minimal-residual relaxation of `A e = 0`.
    fn smooth(&mut self, e: &mut FieldVector) {
        for _ in 0..self.param.null_smoother_iters {
            self.mat.apply(e, &mut self.r);
            self.r.scale(-1.0);
            self.mat.apply(&self.r, &mut self.ar);
            let ar2 = self.ar.norm2();
            if ar2 == 0.0 {
                break;
            }
            let alpha = self.ar.cdot(&self.r) / ar2;
            e.caxpy(alpha, &self.r);
        }
    }
}
