//! Subcommand runners.

pub mod chrono;
pub mod multishift;
pub mod setup;
pub mod solve;

use std::path::Path;

use anyhow::{Context, Result};
use krylat_solver::{InvertParam, SolverKind};

pub use chrono::run_chrono;
pub use multishift::run_multishift;
pub use setup::run_setup;
pub use solve::run_solve;

/// Load parameters from a JSON file, or start from defaults.
///
/// Missing keys keep their default values. `solver`, `tol` and `maxiter`
/// override whatever the file says.
pub fn load_param(
    path: Option<&Path>,
    solver: Option<SolverKind>,
    tol: Option<f64>,
    maxiter: Option<usize>,
) -> Result<InvertParam> {
    let mut param = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => InvertParam::default(),
    };
    if let Some(kind) = solver {
        param.inv_type = kind;
    }
    if let Some(tol) = tol {
        param.tol = tol;
    }
    if let Some(maxiter) = maxiter {
        param.maxiter = maxiter;
    }
    param.validate()?;
    Ok(param)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "inv_type": "bicgstab", "tol": 1e-8 }}"#).unwrap();

        let param = load_param(Some(file.path()), None, None, Some(50)).unwrap();
        assert_eq!(param.inv_type, SolverKind::BiCgStab);
        assert_eq!(param.tol, 1e-8);
        assert_eq!(param.maxiter, 50);
        assert_eq!(param.reliable_delta, InvertParam::default().reliable_delta);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "tol": -1.0 }}"#).unwrap();
        assert!(load_param(Some(file.path()), None, None, None).is_err());
        assert!(load_param(None, None, Some(0.0), None).is_err());
    }

    #[test]
    fn command_line_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "inv_type": "gcr" }}"#).unwrap();
        let param = load_param(Some(file.path()), Some(SolverKind::Mr), None, None).unwrap();
        assert_eq!(param.inv_type, SolverKind::Mr);
    }
}
