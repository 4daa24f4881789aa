//! Polynomial extrapolation in the mass.
//!
//! Solutions of `A(m_i) x_i = b` for several masses `m_i` vary smoothly
//! with the mass. The Lagrange polynomial through every known solution,
//! evaluated at the target mass, is a cheap initial guess for the target
//! solve.

use krylat_field::{C64, FieldVector, Precision};

use crate::error::{Error, Result};
use crate::param::InvertParam;
use crate::solver::check_geometry;

/// Lagrange weights of the points `masses[i]`, `i != target`, at
/// `masses[target]`.
pub fn lagrange_weights(masses: &[f64], target: usize) -> Result<Vec<f64>> {
    let m = masses
        .get(target)
        .copied()
        .ok_or_else(|| Error::InvalidConfig(format!("target index {} out of range", target)))?;
    let mut weights = vec![0.0; masses.len()];
    for (i, &mi) in masses.iter().enumerate() {
        if i == target {
            continue;
        }
        let mut w = 1.0;
        for (j, &mj) in masses.iter().enumerate() {
            if j == target || j == i {
                continue;
            }
            if mi == mj {
                return Err(Error::InvalidConfig(format!(
                    "duplicate mass {} at {} and {}",
                    mi, i, j
                )));
            }
            w *= (m - mj) / (mi - mj);
        }
        weights[i] = w;
    }
    Ok(weights)
}

/// Overwrite `x[idx]` with the extrapolation of the other solutions to
/// mass `param.offset[idx]`.
///
/// `param.offset[i]` is the mass of `x[i]`.
pub fn poly_mass_ext(x: &mut [FieldVector], param: &InvertParam, idx: usize) -> Result<()> {
    if x.len() != param.offset.len() {
        return Err(Error::InvalidConfig(format!(
            "{} solutions for {} masses",
            x.len(),
            param.offset.len()
        )));
    }
    if x.len() < 2 {
        return Err(Error::InvalidConfig(
            "mass extrapolation needs at least one known solution".into(),
        ));
    }
    let weights = lagrange_weights(&param.offset, idx)?;
    let geometry = x[idx].geometry();
    for xi in x.iter() {
        check_geometry(geometry, xi.geometry())?;
    }

    let mut guess = FieldVector::zeros(geometry, Precision::Double);
    for (i, xi) in x.iter().enumerate() {
        if i != idx {
            guess.caxpy(C64::new(weights[i], 0.0), xi);
        }
    }
    x[idx].copy_from(&guess);
    log::debug!(
        "extrapolated solution {} to mass {} from {} solutions",
        idx,
        param.offset[idx],
        x.len() - 1
    );
    Ok(())
}
