//! Direct root finding on the IC residual without a homotopy: a
//! Levenberg-Marquardt least-squares solve that stops once the residual
//! vanishes.

use crate::autodiff::{Dual, JacobianProvider};
use crate::error::IcError;
use crate::newton::evaluate;
use crate::traits::VectorFunction;
use anyhow::Result;
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectSolver {
    /// Levenberg-Marquardt with Nielsen's damping update.
    #[default]
    Lm,
}

impl fmt::Display for DirectSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectSolver::Lm => f.write_str("lm"),
        }
    }
}

impl FromStr for DirectSolver {
    type Err = IcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lm" => Ok(DirectSolver::Lm),
            other => Err(IcError::UnsupportedSolver(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DirectSettings {
    pub solver: DirectSolver,
    /// Absolute residual tolerance, also used for the relative step and
    /// residual tests.
    pub tolerance: f64,
    pub max_iter: usize,
    /// Initial damping relative to the largest diagonal entry of `JᵀJ`.
    pub initial_damping: f64,
}

impl Default for DirectSettings {
    fn default() -> Self {
        Self {
            solver: DirectSolver::Lm,
            tolerance: 1e-10,
            max_iter: 200,
            initial_damping: 1e-3,
        }
    }
}

impl DirectSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance > 0.0) || !self.tolerance.is_finite() {
            return Err(IcError::InvalidSettings(format!(
                "tolerance must be positive and finite, got {}",
                self.tolerance
            ))
            .into());
        }
        if self.max_iter == 0 {
            return Err(IcError::InvalidSettings("max_iter must be at least 1".into()).into());
        }
        if !(self.initial_damping > 0.0) || !self.initial_damping.is_finite() {
            return Err(IcError::InvalidSettings(format!(
                "initial_damping must be positive and finite, got {}",
                self.initial_damping
            ))
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DirectReport {
    pub solution: DVector<f64>,
    pub residual_norm: f64,
    pub iterations: usize,
}

/// Minimizes `½|f(x)|²` from `x0` and succeeds only if the minimum is a
/// root: either `|f| <= tolerance`, or the step has shrunk below
/// `tolerance · (|x| + tolerance)` while `|f| <= tolerance · max(1, |f(x0)|)`.
///
/// Steps solve `(JᵀJ + μI) h = -Jᵀf`. Accepted steps shrink μ by
/// `max(1/3, 1 - (2ρ - 1)³)`, rejected steps grow it by a doubling factor ν.
pub fn levenberg_marquardt<F, J>(
    mut f: F,
    mut jac: J,
    x0: &DVector<f64>,
    settings: &DirectSettings,
) -> Result<DirectReport>
where
    F: FnMut(&DVector<f64>) -> Result<DVector<f64>>,
    J: FnMut(&DVector<f64>) -> Result<DMatrix<f64>>,
{
    settings.validate()?;
    let n = x0.len();
    let mut x = x0.clone();
    let mut r = f(&x)?;
    let residual_scale = settings.tolerance * r.norm().max(1.0);
    let mut cost = 0.5 * r.norm_squared();
    let mut j = jac(&x)?;
    let mut jtj = j.transpose() * &j;
    let mut g = j.transpose() * &r;

    let mut mu = settings.initial_damping * jtj.diagonal().max().max(f64::EPSILON);
    let mut nu = 2.0;
    let mut iterations = 0;
    let mut stalled = false;

    while iterations < settings.max_iter {
        if r.norm() <= settings.tolerance {
            debug!("LM converged after {} iterations", iterations);
            return Ok(DirectReport {
                solution: x,
                residual_norm: r.norm(),
                iterations,
            });
        }
        iterations += 1;

        let mut damped = jtj.clone();
        for i in 0..n {
            damped[(i, i)] += mu;
        }
        let Some(h) = damped.lu().solve(&(-&g)) else {
            mu *= nu;
            nu *= 2.0;
            continue;
        };

        if h.norm() <= f64::EPSILON * (x.norm() + f64::EPSILON) {
            stalled = true;
            break;
        }

        let x_try = &x + &h;
        let r_try = f(&x_try)?;
        let cost_try = 0.5 * r_try.norm_squared();
        let predicted = 0.5 * h.dot(&(&h * mu - &g));
        let rho = (cost - cost_try) / predicted;

        if cost_try.is_finite() && predicted > 0.0 && rho > 0.0 {
            x = x_try;
            r = r_try;
            cost = cost_try;
            j = jac(&x)?;
            jtj = j.transpose() * &j;
            g = j.transpose() * &r;
            mu *= (1.0f64 / 3.0).max(1.0 - (2.0 * rho - 1.0).powi(3));
            nu = 2.0;

            if h.norm() <= settings.tolerance * (x.norm() + settings.tolerance)
                && r.norm() <= residual_scale
            {
                debug!("LM converged on step size after {} iterations", iterations);
                return Ok(DirectReport {
                    solution: x,
                    residual_norm: r.norm(),
                    iterations,
                });
            }
        } else {
            mu *= nu;
            nu *= 2.0;
        }
    }

    if r.norm() <= settings.tolerance || (stalled && r.norm() <= residual_scale) {
        return Ok(DirectReport {
            solution: x,
            residual_norm: r.norm(),
            iterations,
        });
    }

    if stalled {
        warn!("LM stalled at residual norm {:e}", r.norm());
    }
    Err(IcError::DirectSolverFailed {
        residual_norm: r.norm(),
        iterations,
    }
    .into())
}

/// Direct solve of `f(x) = 0` for a vector function.
pub fn direct_roots<F, P>(
    f: &F,
    x0: &DVector<f64>,
    settings: &DirectSettings,
    provider: &P,
) -> Result<DirectReport>
where
    F: VectorFunction<f64> + VectorFunction<Dual> + ?Sized,
    P: JacobianProvider,
{
    match settings.solver {
        DirectSolver::Lm => levenberg_marquardt(
            |x| evaluate(f, x),
            |x| provider.jacobian(f, x.as_slice()),
            x0,
            settings,
        ),
    }
}
