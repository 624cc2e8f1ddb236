use crate::autodiff::{Dual, JacobianProvider};
use crate::error::IcError;
use crate::traits::VectorFunction;
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NewtonSettings {
    /// Convergence threshold on the Euclidean norm of the Newton step.
    pub tolerance: f64,
    pub max_iter: usize,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iter: 100,
        }
    }
}

impl NewtonSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance > 0.0) || !self.tolerance.is_finite() {
            bail!(IcError::InvalidSettings(format!(
                "tolerance must be positive and finite, got {}",
                self.tolerance
            )));
        }
        if self.max_iter == 0 {
            bail!(IcError::InvalidSettings("max_iter must be at least 1".into()));
        }
        Ok(())
    }
}

/// Newton-Raphson on `f(x) = 0` with an explicit Jacobian callback.
///
/// Each iteration solves `J(x) dx = -f(x)` and stops once `|dx| < tolerance`.
/// The step, not the residual, is the stopping criterion.
pub fn newton_raphson<F, J>(
    mut f: F,
    mut jac: J,
    x0: &DVector<f64>,
    settings: NewtonSettings,
) -> Result<DVector<f64>>
where
    F: FnMut(&DVector<f64>) -> Result<DVector<f64>>,
    J: FnMut(&DVector<f64>) -> Result<DMatrix<f64>>,
{
    settings.validate()?;
    let mut x = x0.clone();
    let mut step_norm = f64::INFINITY;

    for iteration in 0..settings.max_iter {
        let residual = f(&x)?;
        let jacobian = jac(&x)?;
        let delta = solve_linear_system(jacobian, -residual, "Newton step")?;

        step_norm = delta.norm();
        x += &delta;

        if step_norm < settings.tolerance {
            log::trace!(
                "Newton converged after {} iterations (step norm {:e})",
                iteration + 1,
                step_norm
            );
            return Ok(x);
        }
        if !step_norm.is_finite() {
            break;
        }
    }

    let residual_norm = f(&x).map(|r| r.norm()).unwrap_or(f64::NAN);
    Err(IcError::NewtonDidNotConverge {
        iterations: settings.max_iter,
        step_norm,
        residual_norm,
    }
    .into())
}

/// Newton on a vector function, with Jacobians from `provider`.
pub fn solve_root<F, P>(
    f: &F,
    provider: &P,
    x0: &DVector<f64>,
    settings: NewtonSettings,
) -> Result<DVector<f64>>
where
    F: VectorFunction<f64> + VectorFunction<Dual> + ?Sized,
    P: JacobianProvider,
{
    newton_raphson(
        |x| evaluate(f, x),
        |x| provider.jacobian(f, x.as_slice()),
        x0,
        settings,
    )
}

/// Evaluates `f` at `x` into a fresh vector.
pub fn evaluate<F>(f: &F, x: &DVector<f64>) -> Result<DVector<f64>>
where
    F: VectorFunction<f64> + ?Sized,
{
    if x.len() != f.input_dim() {
        return Err(IcError::DimensionMismatch {
            expected: f.input_dim(),
            got: x.len(),
        }
        .into());
    }
    let mut out = DVector::zeros(f.output_dim());
    f.apply(x.as_slice(), out.as_mut_slice());
    Ok(out)
}

/// Solves the square system `a * x = b` by LU.
///
/// A zero pivot or a non-finite solution is reported as
/// [`IcError::SingularJacobian`] tagged with `context`.
pub fn solve_linear_system(
    a: DMatrix<f64>,
    b: DVector<f64>,
    context: &'static str,
) -> Result<DVector<f64>> {
    if !a.is_square() {
        return Err(IcError::DimensionMismatch {
            expected: a.nrows(),
            got: a.ncols(),
        }
        .into());
    }
    match a.lu().solve(&b) {
        Some(x) if x.iter().all(|v| v.is_finite()) => Ok(x),
        _ => Err(IcError::SingularJacobian(context).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::ForwardJacobian;
    use crate::traits::{Dimensions, Scalar};
    use approx::assert_relative_eq;

    struct Circle;

    impl Dimensions for Circle {
        fn input_dim(&self) -> usize {
            2
        }
        fn output_dim(&self) -> usize {
            2
        }
    }

    // x^2 + y^2 = 4, x = y
    impl<T: Scalar> VectorFunction<T> for Circle {
        fn apply(&self, x: &[T], out: &mut [T]) {
            out[0] = x[0] * x[0] + x[1] * x[1] - T::lift(4.0);
            out[1] = x[0] - x[1];
        }
    }

    #[test]
    fn converges_quadratically_from_nearby_guess() {
        let x0 = DVector::from_vec(vec![1.0, 2.0]);
        let root = solve_root(&Circle, &ForwardJacobian, &x0, NewtonSettings::default()).unwrap();
        let expected = 2f64.sqrt();
        assert_relative_eq!(root[0], expected, epsilon = 1e-12);
        assert_relative_eq!(root[1], expected, epsilon = 1e-12);
    }

    #[test]
    fn linear_system_needs_one_step() {
        let x0 = DVector::from_vec(vec![10.0]);
        let root = newton_raphson(
            |x| Ok(DVector::from_vec(vec![3.0 * x[0] - 6.0])),
            |_| Ok(DMatrix::from_element(1, 1, 3.0)),
            &x0,
            NewtonSettings::default(),
        )
        .unwrap();
        assert_relative_eq!(root[0], 2.0);
    }

    #[test]
    fn reports_non_convergence() {
        // x^2 + 1 has no real root.
        let x0 = DVector::from_vec(vec![0.5]);
        let settings = NewtonSettings {
            tolerance: 1e-12,
            max_iter: 20,
        };
        let err = newton_raphson(
            |x| Ok(DVector::from_vec(vec![x[0] * x[0] + 1.0])),
            |x| Ok(DMatrix::from_element(1, 1, 2.0 * x[0])),
            &x0,
            settings,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IcError>(),
            Some(IcError::NewtonDidNotConverge { .. }) | Some(IcError::SingularJacobian(_))
        ));
    }

    #[test]
    fn singular_jacobian_is_an_error() {
        let x0 = DVector::from_vec(vec![1.0, 1.0]);
        let err = newton_raphson(
            |x| Ok(DVector::from_vec(vec![x[0] + x[1] - 1.0, 2.0 * x[0] + 2.0 * x[1]])),
            |_| Ok(DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 2.0, 2.0])),
            &x0,
            NewtonSettings::default(),
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<IcError>(),
            Some(&IcError::SingularJacobian("Newton step"))
        );
    }

    #[test]
    fn rejects_invalid_settings() {
        let bad = NewtonSettings {
            tolerance: -1.0,
            max_iter: 10,
        };
        assert!(bad.validate().is_err());
        let zero_iter = NewtonSettings {
            tolerance: 1e-8,
            max_iter: 0,
        };
        assert!(zero_iter.validate().is_err());
    }
}
