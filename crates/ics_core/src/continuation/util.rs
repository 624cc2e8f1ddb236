//! Tangent computation for the pseudo-arclength driver.

use crate::error::IcError;
use crate::newton::solve_linear_system;
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector, SymmetricEigen};

/// Unit tangent `[w, v...]` of the solution curve with `w = 1` before
/// normalization: solves `(∂h/∂x) v = -∂h/∂φ` using the columns of the
/// extended Jacobian `[∂h/∂φ | ∂h/∂x]`.
pub fn phi_forward_tangent(j_ext: &DMatrix<f64>) -> Result<DVector<f64>> {
    let dim = check_extended_shape(j_ext)?;
    let j_x = j_ext.columns(1, dim).into_owned();
    let rhs = -j_ext.column(0).into_owned();
    let v = solve_linear_system(j_x, rhs, "homotopy tangent")?;

    let mut tangent = DVector::zeros(dim + 1);
    tangent[0] = 1.0;
    tangent.rows_mut(1, dim).copy_from(&v);
    Ok(tangent.normalize())
}

/// Unit null vector of the n × (n + 1) extended Jacobian.
///
/// Uses the Gram matrix eigendecomposition first, falling back to a
/// bordered linear solve if that fails.
pub fn compute_nullspace_tangent(j_ext: &DMatrix<f64>) -> Result<DVector<f64>> {
    check_extended_shape(j_ext)?;
    let tangent = match try_gram_eigen(j_ext) {
        Some(vec) => vec,
        None => compute_tangent_linear_solve(j_ext)?,
    };
    Ok(tangent.normalize())
}

/// Flips `tangent` so it points along `previous`.
pub fn orient_along(tangent: DVector<f64>, previous: &DVector<f64>) -> DVector<f64> {
    if tangent.dot(previous) < 0.0 {
        -tangent
    } else {
        tangent
    }
}

fn check_extended_shape(j_ext: &DMatrix<f64>) -> Result<usize> {
    let dim = j_ext.nrows();
    if dim == 0 {
        bail!("Failed to compute tangent: zero-dimensional system");
    }
    if j_ext.ncols() != dim + 1 {
        return Err(IcError::DimensionMismatch {
            expected: dim + 1,
            got: j_ext.ncols(),
        }
        .into());
    }
    Ok(dim)
}

fn try_gram_eigen(j_ext: &DMatrix<f64>) -> Option<DVector<f64>> {
    let gram = j_ext.transpose() * j_ext;
    if gram.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let identity = DMatrix::identity(gram.nrows(), gram.ncols());
    let mut epsilon = 0.0;

    for _ in 0..5 {
        let adjusted = if epsilon == 0.0 {
            gram.clone()
        } else {
            &gram + identity.scale(epsilon)
        };

        let eig = SymmetricEigen::new(adjusted);
        let smallest = eig
            .eigenvalues
            .iter()
            .enumerate()
            .filter(|(_, val)| val.is_finite())
            .min_by(|a, b| a.1.total_cmp(b.1));

        let Some((min_idx, _)) = smallest else {
            epsilon = if epsilon == 0.0 { 1e-12 } else { epsilon * 10.0 };
            continue;
        };

        let vec = eig.eigenvectors.column(min_idx).into_owned();
        if vec.norm_squared() == 0.0 || vec.iter().any(|v| !v.is_finite()) {
            return None;
        }
        return Some(vec);
    }

    None
}

/// Borders the extended Jacobian with each unit row in turn until the
/// system `[J_ext; e_col] t = [0; 1]` is solvable.
fn compute_tangent_linear_solve(j_ext: &DMatrix<f64>) -> Result<DVector<f64>> {
    let dim = check_extended_shape(j_ext)?;

    let mut a = DMatrix::zeros(dim + 1, dim + 1);
    a.view_mut((0, 0), (dim, dim + 1)).copy_from(j_ext);
    let mut rhs = DVector::zeros(dim + 1);
    rhs[dim] = 1.0;

    for col in 0..=dim {
        a.row_mut(dim).fill(0.0);
        a[(dim, col)] = 1.0;

        if let Some(solution) = a.clone().lu().solve(&rhs) {
            if solution.iter().all(|v| v.is_finite()) && solution.norm_squared() != 0.0 {
                return Ok(solution);
            }
        }
    }

    bail!(IcError::SingularJacobian("tangent bordered solve"))
}
