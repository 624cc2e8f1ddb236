//! Entry points: consistent initial conditions for a DAE at t = 0.

use crate::autodiff::{ForwardJacobian, JacobianProvider};
use crate::config::IcConfig;
use crate::continuation::homotopy_roots;
use crate::direct::direct_roots;
use crate::symbolic::{Symbol, SymbolicBackend, Values};
use crate::system::make_system_of_ics;
use anyhow::{Context, Result};
use log::{info, warn};
use nalgebra::DVector;

/// Solved initial conditions, reported against the caller's unknowns.
#[derive(Debug, Clone)]
pub struct ConsistentIcs {
    /// X, in the order given to the solver.
    pub unknowns: Vec<Symbol>,
    /// One value per entry of `unknowns`.
    pub values: Vec<f64>,
    /// Unknowns that were solved for rather than fixed.
    pub free: Vec<Symbol>,
    /// Residual norm at the returned point.
    pub residual_norm: f64,
}

impl ConsistentIcs {
    pub fn get(&self, sym: &Symbol) -> Option<f64> {
        self.unknowns
            .iter()
            .position(|u| u == sym)
            .map(|i| self.values[i])
    }

    pub fn to_values(&self) -> Values {
        self.unknowns
            .iter()
            .cloned()
            .zip(self.values.iter().copied())
            .collect()
    }
}

/// Values for every unknown in `unknowns` (same order) such that the
/// equations hold at t = 0.
///
/// `ics` and `knowns` are honoured exactly (knowns win on conflict);
/// `ics_weak` only seeds the free unknowns and must cover all of them.
#[allow(clippy::too_many_arguments)]
pub fn compute_consistent_initial_conditions<B: SymbolicBackend>(
    backend: &B,
    time: &Symbol,
    eqs: &[B::Expr],
    unknowns: &[Symbol],
    ics: &Values,
    ics_weak: &Values,
    knowns: &Values,
    config: &IcConfig,
) -> Result<Vec<f64>> {
    compute_consistent_initial_conditions_with(
        backend,
        time,
        eqs,
        unknowns,
        ics,
        ics_weak,
        knowns,
        config,
        &ForwardJacobian,
    )
}

/// [`compute_consistent_initial_conditions`] with a caller-chosen Jacobian
/// provider.
#[allow(clippy::too_many_arguments)]
pub fn compute_consistent_initial_conditions_with<B, P>(
    backend: &B,
    time: &Symbol,
    eqs: &[B::Expr],
    unknowns: &[Symbol],
    ics: &Values,
    ics_weak: &Values,
    knowns: &Values,
    config: &IcConfig,
    provider: &P,
) -> Result<Vec<f64>>
where
    B: SymbolicBackend,
    P: JacobianProvider,
{
    solve_initial_conditions(
        backend, time, eqs, unknowns, ics, ics_weak, knowns, config, provider,
    )
    .map(|report| report.values)
}

/// Full report variant of [`compute_consistent_initial_conditions_with`].
#[allow(clippy::too_many_arguments)]
pub fn solve_initial_conditions<B, P>(
    backend: &B,
    time: &Symbol,
    eqs: &[B::Expr],
    unknowns: &[Symbol],
    ics: &Values,
    ics_weak: &Values,
    knowns: &Values,
    config: &IcConfig,
    provider: &P,
) -> Result<ConsistentIcs>
where
    B: SymbolicBackend,
    P: JacobianProvider,
{
    config.validate()?;
    let system = make_system_of_ics(backend, time, eqs, unknowns, ics, knowns)?;
    let free = system.free_symbols();

    let solution = if free.is_empty() {
        DVector::zeros(0)
    } else {
        let x0 = system
            .guess_from(ics_weak)
            .context("ics_weak must supply a guess for every free unknown")?;
        info!(
            "Solving for {} of {} initial conditions by {}",
            free.len(),
            unknowns.len(),
            config.method_name()
        );
        match config {
            IcConfig::Direct(settings) => {
                direct_roots(&system.residual, &x0, settings, provider)?.solution
            }
            IcConfig::Homotopy(settings) => {
                homotopy_roots(&system.residual, &x0, settings, provider)?.solution
            }
        }
    };

    let values = system.assemble(solution.as_slice())?;
    let residual_norm = system.residual_norm(solution.as_slice());
    if free.is_empty() && residual_norm > config.tolerance() {
        warn!(
            "All {} unknowns are fixed but the equations are violated (residual norm {:e})",
            unknowns.len(),
            residual_norm
        );
    }

    Ok(ConsistentIcs {
        unknowns: unknowns.to_vec(),
        values,
        free,
        residual_norm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::process_equations;
    use crate::continuation::HomotopySettings;
    use crate::error::IcError;
    use crate::symbolic::ExprEngine;
    use std::collections::HashSet;

    fn values(pairs: &[(Symbol, f64)]) -> Values {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn fixed_values_pass_through_and_free_ones_are_solved() {
        let engine = ExprEngine;
        let eqs = engine
            .parse_equations(&["der(x) = -x + y", "0 = y - 2 * x"])
            .unwrap();
        let known: HashSet<Symbol> = [Symbol::var("t")].into_iter().collect();
        let classified = process_equations(&engine, &eqs, &known);

        let ics = values(&[(Symbol::var("x"), 1.5)]);
        let weak = values(&[(Symbol::der("x", 1), 0.0), (Symbol::var("y"), 0.0)]);

        for config in [IcConfig::default(), IcConfig::Homotopy(HomotopySettings::default())] {
            let report = solve_initial_conditions(
                &engine,
                &Symbol::var("t"),
                &eqs,
                &classified.unknowns,
                &ics,
                &weak,
                &Values::new(),
                &config,
                &ForwardJacobian,
            )
            .unwrap();

            assert_eq!(report.unknowns, classified.unknowns);
            assert_eq!(report.get(&Symbol::var("x")), Some(1.5));
            assert!((report.get(&Symbol::var("y")).unwrap() - 3.0).abs() < 1e-9);
            assert!((report.get(&Symbol::der("x", 1)).unwrap() - 1.5).abs() < 1e-9);
            assert!(report.residual_norm < 1e-9);
            assert_eq!(report.free, vec![Symbol::der("x", 1), Symbol::var("y")]);
        }
    }

    #[test]
    fn fully_determined_system_needs_no_guess() {
        let engine = ExprEngine;
        let eqs = engine.parse_equations(&["y - 2"]).unwrap();
        let unknowns = vec![Symbol::var("y")];
        let result = compute_consistent_initial_conditions(
            &engine,
            &Symbol::var("t"),
            &eqs,
            &unknowns,
            &values(&[(Symbol::var("y"), 2.0)]),
            &Values::new(),
            &Values::new(),
            &IcConfig::default(),
        )
        .unwrap();
        assert_eq!(result, vec![2.0]);
    }

    #[test]
    fn inconsistent_fixed_values_report_their_residual() {
        let engine = ExprEngine;
        let eqs = engine.parse_equations(&["y - 2"]).unwrap();
        let unknowns = vec![Symbol::var("y")];
        let report = solve_initial_conditions(
            &engine,
            &Symbol::var("t"),
            &eqs,
            &unknowns,
            &values(&[(Symbol::var("y"), 3.0)]),
            &Values::new(),
            &Values::new(),
            &IcConfig::default(),
            &ForwardJacobian,
        )
        .unwrap();
        assert_eq!(report.values, vec![3.0]);
        assert!(report.free.is_empty());
        assert!((report.residual_norm - 1.0).abs() < 1e-12);
    }

    #[test]
    fn missing_weak_guess_is_reported() {
        let engine = ExprEngine;
        let eqs = engine.parse_equations(&["x + y - 1", "x - y"]).unwrap();
        let unknowns = vec![Symbol::var("x"), Symbol::var("y")];
        let err = compute_consistent_initial_conditions(
            &engine,
            &Symbol::var("t"),
            &eqs,
            &unknowns,
            &Values::new(),
            &values(&[(Symbol::var("x"), 0.0)]),
            &Values::new(),
            &IcConfig::default(),
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<IcError>(),
            Some(&IcError::MissingGuess("y".into()))
        );
    }
}
