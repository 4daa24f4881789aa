//! Four-dimensional lattice geometry and site indexing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FieldError, Result};

/// Number of space-time dimensions.
pub const NDIM: usize = 4;

/// Shape of a field: lattice extents plus complex components per site.
///
/// Sites are ordered lexicographically with the first dimension running
/// fastest. Neighbour lookups wrap periodically in every direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LatticeGeometry {
    dims: [usize; NDIM],
    dof_per_site: usize,
}

impl LatticeGeometry {
    /// Create a geometry from lattice extents and components per site.
    pub fn new(dims: [usize; NDIM], dof_per_site: usize) -> Result<Self> {
        if dims.iter().any(|&d| d == 0) {
            return Err(FieldError::InvalidGeometry(format!(
                "zero lattice extent in {:?}",
                dims
            )));
        }
        if dof_per_site == 0 {
            return Err(FieldError::InvalidGeometry(
                "sites must carry at least one component".to_string(),
            ));
        }
        Ok(Self { dims, dof_per_site })
    }

    /// A one-dimensional layout of `n` scalar components.
    ///
    /// Used for small test systems that have no lattice structure.
    pub fn flat(n: usize) -> Result<Self> {
        Self::new([n, 1, 1, 1], 1)
    }

    /// Lattice extents.
    #[inline]
    pub fn dims(&self) -> [usize; NDIM] {
        self.dims
    }

    /// Complex components stored per site.
    #[inline]
    pub fn dof_per_site(&self) -> usize {
        self.dof_per_site
    }

    /// Number of lattice sites.
    #[inline]
    pub fn volume(&self) -> usize {
        self.dims.iter().product()
    }

    /// Total number of complex components in a field.
    #[inline]
    pub fn len(&self) -> usize {
        self.volume() * self.dof_per_site
    }

    /// Always false: a valid geometry holds at least one component.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lexicographic site index of a coordinate.
    pub fn site_index(&self, coords: [usize; NDIM]) -> usize {
        let mut index = 0;
        for mu in (0..NDIM).rev() {
            index = index * self.dims[mu] + coords[mu] % self.dims[mu];
        }
        index
    }

    /// Coordinate of a lexicographic site index.
    pub fn coords(&self, mut site: usize) -> [usize; NDIM] {
        let mut coords = [0; NDIM];
        for (mu, c) in coords.iter_mut().enumerate() {
            *c = site % self.dims[mu];
            site /= self.dims[mu];
        }
        coords
    }

    /// Periodic neighbour of `site` one step along `mu`.
    pub fn neighbour(&self, site: usize, mu: usize, forward: bool) -> usize {
        let mut coords = self.coords(site);
        let extent = self.dims[mu];
        coords[mu] = if forward {
            (coords[mu] + 1) % extent
        } else {
            (coords[mu] + extent - 1) % extent
        };
        self.site_index(coords)
    }
}

impl fmt::Display for LatticeGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z, t] = self.dims;
        write!(f, "{}x{}x{}x{} ({} dof/site)", x, y, z, t, self.dof_per_site)
    }
}
