pub mod problem;
pub mod util;

use crate::autodiff::{Dual, JacobianProvider};
use crate::error::IcError;
use crate::homotopy::{augment, Homotopy, HomotopyKind};
use crate::newton::{newton_raphson, solve_linear_system, NewtonSettings};
use crate::traits::VectorFunction;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use problem::ContinuationProblem;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::str::FromStr;
use util::{compute_nullspace_tangent, orient_along, phi_forward_tangent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationDriver {
    /// Fixed φ grid with an Euler predictor.
    PredictorCorrector,
    /// Arclength-parametrized stepping through (x, φ).
    #[default]
    PseudoArclength,
}

impl ContinuationDriver {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContinuationDriver::PredictorCorrector => "predictor_corrector",
            ContinuationDriver::PseudoArclength => "pseudo_arclength",
        }
    }
}

impl fmt::Display for ContinuationDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContinuationDriver {
    type Err = IcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "predictor_corrector" => Ok(ContinuationDriver::PredictorCorrector),
            "pseudo_arclength" => Ok(ContinuationDriver::PseudoArclength),
            other => Err(IcError::UnsupportedDriver(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HomotopySettings {
    #[serde(rename = "type")]
    pub kind: HomotopyKind,
    pub driver: ContinuationDriver,
    /// Arclength step (pseudo-arclength only).
    pub ds: f64,
    /// Grid size for predictor-corrector, step budget for pseudo-arclength.
    pub num_steps: usize,
    /// Settings of every inner Newton solve.
    #[serde(flatten)]
    pub newton: NewtonSettings,
}

impl Default for HomotopySettings {
    fn default() -> Self {
        Self {
            kind: HomotopyKind::Newton,
            driver: ContinuationDriver::PseudoArclength,
            ds: 0.1,
            num_steps: 500,
            newton: NewtonSettings::default(),
        }
    }
}

impl HomotopySettings {
    pub fn validate(&self) -> Result<()> {
        self.newton.validate()?;
        match self.driver {
            ContinuationDriver::PredictorCorrector => check_grid(self.num_steps)?,
            ContinuationDriver::PseudoArclength => check_arclength(self.ds, self.num_steps)?,
        }
        Ok(())
    }
}

fn check_grid(num_steps: usize) -> Result<()> {
    if num_steps < 2 {
        return Err(IcError::InvalidSettings(format!(
            "predictor-corrector needs num_steps >= 2, got {}",
            num_steps
        ))
        .into());
    }
    Ok(())
}

fn check_arclength(ds: f64, num_steps: usize) -> Result<()> {
    if !(ds > 0.0) || !ds.is_finite() {
        return Err(IcError::InvalidSettings(format!(
            "ds must be positive and finite, got {}",
            ds
        ))
        .into());
    }
    if num_steps == 0 {
        return Err(IcError::InvalidSettings("num_steps must be at least 1".into()).into());
    }
    Ok(())
}

/// Points visited while following a homotopy from φ = 0 to φ = 1.
///
/// The last entry is always the φ = 1 solution, with φ exactly `1.0`.
#[derive(Debug, Clone)]
pub struct HomotopyPath {
    pub solution: DVector<f64>,
    pub phis: Vec<f64>,
    pub states: Vec<Vec<f64>>,
    /// Arclength from the start point, measured in (φ, x).
    pub arclengths: Vec<f64>,
}

impl HomotopyPath {
    fn new(dim: usize) -> Self {
        Self {
            solution: DVector::zeros(dim),
            phis: Vec::new(),
            states: Vec::new(),
            arclengths: Vec::new(),
        }
    }

    fn push(&mut self, phi: f64, state: &DVector<f64>, arclength: f64) {
        self.phis.push(phi);
        self.states.push(state.iter().cloned().collect());
        self.arclengths.push(arclength);
    }

    fn finish(mut self, solution: DVector<f64>, arclength: f64) -> Self {
        self.push(1.0, &solution, arclength);
        self.solution = solution;
        self
    }

    pub fn len(&self) -> usize {
        self.phis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phis.is_empty()
    }
}

/// Marches φ over `linspace(0, 1, num_steps)`, correcting with Newton at
/// each grid point and predicting the next start with the Euler step
/// `dx/dφ = -(∂h/∂x)⁻¹ ∂h/∂φ`.
pub fn predictor_corrector<P: ContinuationProblem>(
    problem: &mut P,
    x0: &DVector<f64>,
    num_steps: usize,
    newton: NewtonSettings,
) -> Result<HomotopyPath> {
    check_grid(num_steps)?;
    let dim = check_start(problem, x0)?;
    let dphi = 1.0 / (num_steps - 1) as f64;

    let mut path = HomotopyPath::new(dim);
    let mut guess = x0.clone();
    let mut arclength = 0.0;
    let mut previous: Option<(f64, DVector<f64>)> = None;

    for k in 0..num_steps {
        let phi = if k + 1 == num_steps { 1.0 } else { k as f64 * dphi };
        let x = correct_at_phi(problem, phi, &guess, newton)
            .with_context(|| format!("corrector failed at phi = {}", phi))?;

        if let Some((prev_phi, prev_x)) = &previous {
            arclength += ((phi - prev_phi).powi(2) + (&x - prev_x).norm_squared()).sqrt();
        }

        if k + 1 == num_steps {
            return Ok(path.finish(x, arclength));
        }

        debug!("Predictor-corrector step {}: phi = {:.6}", k, phi);
        path.push(phi, &x, arclength);

        let j_ext = problem.extended_jacobian(&augment(phi, &x))?;
        let dx_dphi = solve_linear_system(
            j_ext.columns(1, dim).into_owned(),
            -j_ext.column(0).into_owned(),
            "Euler predictor",
        )?;
        guess = &x + dx_dphi * dphi;
        previous = Some((phi, x));
    }

    // num_steps >= 2, so the loop always returns at the final grid point.
    Err(IcError::InvalidSettings(format!("num_steps = {}", num_steps)).into())
}

/// Pseudo-arclength continuation in (x, φ) with step `ds`.
///
/// Stops as soon as a corrected point reaches φ ≥ 1, then corrects once
/// more at φ = 1 exactly. Points past φ = 1 are not recorded. Fails with
/// [`IcError::ContinuationIncomplete`] if `num_steps` steps do not get
/// there.
pub fn pseudo_arclength<P: ContinuationProblem>(
    problem: &mut P,
    x0: &DVector<f64>,
    ds: f64,
    num_steps: usize,
    newton: NewtonSettings,
) -> Result<HomotopyPath> {
    check_arclength(ds, num_steps)?;
    let dim = check_start(problem, x0)?;

    let start = correct_at_phi(problem, 0.0, x0, newton)
        .context("initial correction at phi = 0 failed")?;

    let mut path = HomotopyPath::new(dim);
    path.push(0.0, &start, 0.0);

    let mut aug = augment(0.0, &start);
    let mut prev_tangent = DVector::zeros(dim + 1);
    prev_tangent[0] = 1.0;
    let mut arclength = 0.0;
    let mut reached = false;

    for step in 0..num_steps {
        let j_ext = problem.extended_jacobian(&aug)?;
        let tangent = match phi_forward_tangent(&j_ext) {
            Ok(tangent) => tangent,
            Err(err) if matches!(err.downcast_ref::<IcError>(), Some(IcError::SingularJacobian(_))) => {
                warn!(
                    "Singular dh/dx at phi = {:.6}; using null-space tangent",
                    aug[0]
                );
                orient_along(compute_nullspace_tangent(&j_ext)?, &prev_tangent)
            }
            Err(err) => return Err(err),
        };

        let predicted = &aug + &tangent * ds;
        aug = correct_on_arc(problem, &aug, &tangent, ds, &predicted, newton)
            .with_context(|| format!("arclength corrector failed at step {}", step))?;
        arclength += ds;
        prev_tangent = tangent;

        let phi = aug[0];
        debug!("Pseudo-arclength step {}: phi = {:.6}", step, phi);
        if phi >= 1.0 {
            info!("Reached phi = {:.6} at step {}", phi, step);
            reached = true;
            break;
        }
        path.push(phi, &aug.rows(1, dim).into_owned(), arclength);
    }

    if !reached {
        return Err(IcError::ContinuationIncomplete {
            phi: aug[0],
            ds,
            num_steps,
        }
        .into());
    }

    let solution = correct_at_phi(problem, 1.0, &aug.rows(1, dim).into_owned(), newton)
        .context("final correction at phi = 1 failed")?;
    Ok(path.finish(solution, arclength))
}

/// Builds the configured homotopy for `f` anchored at `x0` and follows it
/// to φ = 1.
pub fn homotopy_roots<F, P>(
    f: &F,
    x0: &DVector<f64>,
    settings: &HomotopySettings,
    provider: &P,
) -> Result<HomotopyPath>
where
    F: VectorFunction<f64> + VectorFunction<Dual> + ?Sized,
    P: JacobianProvider,
{
    settings.validate()?;
    let mut homotopy = Homotopy::new(f, provider, x0, settings.kind)?;
    info!(
        "Solving by {} homotopy with {} continuation",
        settings.kind, settings.driver
    );

    match settings.driver {
        ContinuationDriver::PredictorCorrector => {
            predictor_corrector(&mut homotopy, x0, settings.num_steps, settings.newton)
        }
        ContinuationDriver::PseudoArclength => pseudo_arclength(
            &mut homotopy,
            x0,
            settings.ds,
            settings.num_steps,
            settings.newton,
        ),
    }
}

fn check_start<P: ContinuationProblem>(problem: &P, x0: &DVector<f64>) -> Result<usize> {
    let dim = problem.dimension();
    if x0.len() != dim {
        return Err(IcError::DimensionMismatch {
            expected: dim,
            got: x0.len(),
        }
        .into());
    }
    Ok(dim)
}

/// Newton in x with φ held fixed.
fn correct_at_phi<P: ContinuationProblem>(
    problem: &mut P,
    phi: f64,
    guess: &DVector<f64>,
    settings: NewtonSettings,
) -> Result<DVector<f64>> {
    let dim = problem.dimension();
    let problem = RefCell::new(problem);
    newton_raphson(
        |x| {
            let mut out = DVector::zeros(dim);
            problem.borrow_mut().residual(&augment(phi, x), &mut out)?;
            Ok(out)
        },
        |x| {
            let j_ext = problem.borrow_mut().extended_jacobian(&augment(phi, x))?;
            Ok(j_ext.columns(1, dim).into_owned())
        },
        guess,
        settings,
    )
}

/// Newton on `[h(y); t·(y - anchor) - ds] = 0` over the augmented state.
fn correct_on_arc<P: ContinuationProblem>(
    problem: &mut P,
    anchor: &DVector<f64>,
    tangent: &DVector<f64>,
    ds: f64,
    predicted: &DVector<f64>,
    settings: NewtonSettings,
) -> Result<DVector<f64>> {
    let dim = problem.dimension();
    let problem = RefCell::new(problem);
    newton_raphson(
        |y| {
            let mut h = DVector::zeros(dim);
            problem.borrow_mut().residual(y, &mut h)?;
            let mut g = DVector::zeros(dim + 1);
            g.rows_mut(0, dim).copy_from(&h);
            g[dim] = tangent.dot(&(y - anchor)) - ds;
            Ok(g)
        },
        |y| {
            let j_ext = problem.borrow_mut().extended_jacobian(y)?;
            let mut a = DMatrix::zeros(dim + 1, dim + 1);
            a.view_mut((0, 0), (dim, dim + 1)).copy_from(&j_ext);
            for i in 0..dim + 1 {
                a[(dim, i)] = tangent[i];
            }
            Ok(a)
        },
        predicted,
        settings,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::ForwardJacobian;
    use crate::traits::{Dimensions, Scalar};

    // x0^2 = 4, x1 = x0
    struct Target;

    impl Dimensions for Target {
        fn input_dim(&self) -> usize {
            2
        }
        fn output_dim(&self) -> usize {
            2
        }
    }

    impl<T: Scalar> VectorFunction<T> for Target {
        fn apply(&self, x: &[T], out: &mut [T]) {
            out[0] = x[0] * x[0] - T::lift(4.0);
            out[1] = x[1] - x[0];
        }
    }

    fn start() -> DVector<f64> {
        DVector::from_vec(vec![1.0, 1.0])
    }

    fn assert_reaches_root(path: &HomotopyPath) {
        assert!((path.solution[0] - 2.0).abs() < 1e-9);
        assert!((path.solution[1] - 2.0).abs() < 1e-9);
        assert_eq!(path.phis.last().copied(), Some(1.0));
        assert_eq!(path.states.len(), path.phis.len());
        assert_eq!(path.arclengths.len(), path.phis.len());
    }

    #[test]
    fn every_kind_and_driver_reaches_the_root() {
        for kind in [
            HomotopyKind::FixedPoint,
            HomotopyKind::Newton,
            HomotopyKind::Affine,
        ] {
            for driver in [
                ContinuationDriver::PredictorCorrector,
                ContinuationDriver::PseudoArclength,
            ] {
                let settings = HomotopySettings {
                    kind,
                    driver,
                    num_steps: if driver == ContinuationDriver::PredictorCorrector {
                        20
                    } else {
                        500
                    },
                    ..HomotopySettings::default()
                };
                let path = homotopy_roots(&Target, &start(), &settings, &ForwardJacobian)
                    .unwrap_or_else(|e| panic!("{kind}/{driver}: {e:#}"));
                assert_reaches_root(&path);
            }
        }
    }

    #[test]
    fn arclength_phi_sequence_is_monotone() {
        let path =
            homotopy_roots(&Target, &start(), &HomotopySettings::default(), &ForwardJacobian)
                .unwrap();
        assert!(path.len() > 2);
        assert_eq!(path.phis[0], 0.0);
        assert!(path.phis.windows(2).all(|w| w[0] <= w[1]));
        assert!(path.arclengths.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn predictor_corrector_uses_linspace_grid() {
        let settings = HomotopySettings {
            driver: ContinuationDriver::PredictorCorrector,
            num_steps: 5,
            ..HomotopySettings::default()
        };
        let path = homotopy_roots(&Target, &start(), &settings, &ForwardJacobian).unwrap();
        assert_eq!(path.phis, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_reaches_root(&path);
    }

    #[test]
    fn running_out_of_steps_is_reported() {
        let settings = HomotopySettings {
            ds: 0.1,
            num_steps: 2,
            ..HomotopySettings::default()
        };
        let err = homotopy_roots(&Target, &start(), &settings, &ForwardJacobian).unwrap_err();
        match err.downcast_ref::<IcError>() {
            Some(IcError::ContinuationIncomplete { phi, ds, num_steps }) => {
                assert!(*phi < 1.0);
                assert_eq!(*ds, 0.1);
                assert_eq!(*num_steps, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(format!("{err}").contains("Consider increasing `num_steps`"));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let grid = HomotopySettings {
            driver: ContinuationDriver::PredictorCorrector,
            num_steps: 1,
            ..HomotopySettings::default()
        };
        assert!(grid.validate().is_err());

        let step = HomotopySettings {
            ds: 0.0,
            ..HomotopySettings::default()
        };
        let err = homotopy_roots(&Target, &start(), &step, &ForwardJacobian).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IcError>(),
            Some(IcError::InvalidSettings(_))
        ));
    }

    #[test]
    fn parses_driver_names() {
        assert_eq!(
            "predictor_corrector".parse::<ContinuationDriver>(),
            Ok(ContinuationDriver::PredictorCorrector)
        );
        assert_eq!(
            "arc".parse::<ContinuationDriver>(),
            Err(IcError::UnsupportedDriver("arc".into()))
        );
    }
}
