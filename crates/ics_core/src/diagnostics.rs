//! Conditioning of the IC problem and which fixed values to trade for
//! better-posed ones.
//!
//! Every function here is read-only: repeated calls with the same inputs
//! give the same numbers.

use crate::autodiff::{ForwardJacobian, JacobianProvider};
use crate::error::IcError;
use crate::symbolic::{Symbol, SymbolicBackend, Values};
use crate::system::{make_system_of_ics, IcSystem};
use anyhow::Result;
use log::debug;
use nalgebra::DMatrix;
use rayon::prelude::*;

/// 2-norm condition number `σ_max / σ_min`.
///
/// Exactly singular matrices give `∞`; so do matrices with non-finite
/// entries. An empty matrix is perfectly conditioned.
pub fn condition_number(matrix: &DMatrix<f64>) -> f64 {
    if matrix.is_empty() {
        return 1.0;
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return f64::INFINITY;
    }

    let singular_values = matrix.clone().svd(false, false).singular_values;
    let max = singular_values.max();
    let min = singular_values.min();
    if min == 0.0 {
        f64::INFINITY
    } else {
        max / min
    }
}

/// Condition number of the residual Jacobian with respect to every unknown
/// not in `knowns`, evaluated at `ics ∪ ics_weak` (ics take priority).
#[allow(clippy::too_many_arguments)]
pub fn compute_condition_number<B: SymbolicBackend>(
    backend: &B,
    time: &Symbol,
    eqs: &[B::Expr],
    unknowns: &[Symbol],
    ics: &Values,
    ics_weak: &Values,
    knowns: &Values,
) -> Result<f64> {
    let (_, jacobian) = jacobian_at_guess(backend, time, eqs, unknowns, ics, ics_weak, knowns)?;
    Ok(condition_number(&jacobian))
}

/// Ranks the entries of `ics` by how strongly the residual depends on them
/// (column-wise max |J| at `ics ∪ ics_weak`), weakest first.
///
/// Fixed values with the least influence are the cheapest to release when
/// the IC problem turns out to be over-determined. Ties keep X order.
#[allow(clippy::too_many_arguments)]
pub fn order_vars_by_impact<B: SymbolicBackend>(
    backend: &B,
    time: &Symbol,
    eqs: &[B::Expr],
    unknowns: &[Symbol],
    ics: &Values,
    ics_weak: &Values,
    knowns: &Values,
) -> Result<Vec<(Symbol, f64)>> {
    let (system, jacobian) =
        jacobian_at_guess(backend, time, eqs, unknowns, ics, ics_weak, knowns)?;

    let mut impacts: Vec<(Symbol, f64)> = system
        .free_symbols()
        .into_iter()
        .enumerate()
        .filter(|(_, sym)| ics.contains_key(sym))
        .map(|(col, sym)| {
            let impact = jacobian.column(col).amax();
            (sym, impact)
        })
        .collect();

    impacts.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(impacts)
}

/// Condition number after fixing `new_vars` at their `ics_weak` values in
/// addition to `ics`.
#[allow(clippy::too_many_arguments)]
pub fn check_solvability_with_added_ics<B: SymbolicBackend>(
    backend: &B,
    time: &Symbol,
    eqs: &[B::Expr],
    unknowns: &[Symbol],
    ics: &Values,
    ics_weak: &Values,
    knowns: &Values,
    new_vars: &[Symbol],
) -> Result<f64> {
    let mut extended = ics.clone();
    for var in new_vars {
        let value = ics_weak
            .get(var)
            .ok_or_else(|| IcError::MissingGuess(var.to_string()))?;
        extended.insert(var.clone(), *value);
    }

    let system = make_system_of_ics(backend, time, eqs, unknowns, &extended, knowns)?;
    let x = system.guess_from(ics_weak)?;
    let jacobian = ForwardJacobian.jacobian(&system.residual, x.as_slice())?;
    let cond = condition_number(&jacobian);
    debug!("Condition number with {} added ics: {:e}", new_vars.len(), cond);
    Ok(cond)
}

/// Scores every candidate set of extra fixed variables and returns
/// `(candidate index, condition number)`, best conditioned first.
#[allow(clippy::too_many_arguments)]
pub fn rank_candidate_sets<B>(
    backend: &B,
    time: &Symbol,
    eqs: &[B::Expr],
    unknowns: &[Symbol],
    ics: &Values,
    ics_weak: &Values,
    knowns: &Values,
    candidates: &[Vec<Symbol>],
) -> Result<Vec<(usize, f64)>>
where
    B: SymbolicBackend + Sync,
{
    let mut ranked = candidates
        .par_iter()
        .enumerate()
        .map(|(idx, new_vars)| {
            check_solvability_with_added_ics(
                backend, time, eqs, unknowns, ics, ics_weak, knowns, new_vars,
            )
            .map(|cond| (idx, cond))
        })
        .collect::<Result<Vec<_>>>()?;

    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    Ok(ranked)
}

/// Jacobian with respect to all non-known unknowns, at the weak guess
/// overridden by `ics`.
fn jacobian_at_guess<B: SymbolicBackend>(
    backend: &B,
    time: &Symbol,
    eqs: &[B::Expr],
    unknowns: &[Symbol],
    ics: &Values,
    ics_weak: &Values,
    knowns: &Values,
) -> Result<(IcSystem<B::Compiled>, DMatrix<f64>)> {
    let system = make_system_of_ics(backend, time, eqs, unknowns, &Values::new(), knowns)?;

    let mut point = ics_weak.clone();
    point.extend(ics.iter().map(|(k, v)| (k.clone(), *v)));

    let x = system.guess_from(&point)?;
    let jacobian = ForwardJacobian.jacobian(&system.residual, x.as_slice())?;
    Ok((system, jacobian))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::ExprEngine;

    fn values(pairs: &[(&str, f64)]) -> Values {
        pairs.iter().map(|(k, v)| (Symbol::var(k), *v)).collect()
    }

    fn vars(names: &[&str]) -> Vec<Symbol> {
        names.iter().map(|n| Symbol::var(n)).collect()
    }

    #[test]
    fn condition_number_of_known_matrices() {
        let identity = DMatrix::<f64>::identity(3, 3);
        assert!((condition_number(&identity) - 1.0).abs() < 1e-12);

        let diag = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![10.0, 0.1]));
        assert!((condition_number(&diag) - 100.0).abs() < 1e-9);

        let singular = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 2.0, 2.0]);
        let cond = condition_number(&singular);
        assert!(cond > 1e12 || cond.is_infinite());

        assert_eq!(condition_number(&DMatrix::zeros(2, 2)), f64::INFINITY);
    }

    #[test]
    fn rank_deficient_system_is_flagged() {
        let engine = ExprEngine;
        let eqs = engine
            .parse_equations(&["x + y - 1", "2 * x + 2 * y - 2"])
            .unwrap();
        let cond = compute_condition_number(
            &engine,
            &Symbol::var("t"),
            &eqs,
            &vars(&["x", "y"]),
            &Values::new(),
            &values(&[("x", 0.3), ("y", 0.7)]),
            &Values::new(),
        )
        .unwrap();
        assert!(cond > 1e12 || cond.is_infinite());
    }

    #[test]
    fn ics_take_priority_over_weak_guesses() {
        let engine = ExprEngine;
        let eqs = engine.parse_equations(&["x * x", "y"]).unwrap();
        let unknowns = vars(&["x", "y"]);
        let weak = values(&[("x", 1.0), ("y", 0.0)]);

        // J = diag(2x, 1)
        let at_weak = compute_condition_number(
            &engine,
            &Symbol::var("t"),
            &eqs,
            &unknowns,
            &Values::new(),
            &weak,
            &Values::new(),
        )
        .unwrap();
        let at_ics = compute_condition_number(
            &engine,
            &Symbol::var("t"),
            &eqs,
            &unknowns,
            &values(&[("x", 0.5)]),
            &weak,
            &Values::new(),
        )
        .unwrap();
        assert!((at_weak - 2.0).abs() < 1e-9);
        assert!((at_ics - 1.0).abs() < 1e-9);
    }

    #[test]
    fn impact_order_is_ascending_over_ics_only() {
        let engine = ExprEngine;
        let eqs = engine
            .parse_equations(&["a + 10 * b + 0.5 * c", "c - 3 * a"])
            .unwrap();
        let unknowns = vars(&["a", "b", "c"]);
        let ics = values(&[("a", 1.0), ("b", 2.0)]);
        let weak = values(&[("c", 0.0)]);

        let ordered = order_vars_by_impact(
            &engine,
            &Symbol::var("t"),
            &eqs,
            &unknowns,
            &ics,
            &weak,
            &Values::new(),
        )
        .unwrap();

        assert_eq!(
            ordered,
            vec![(Symbol::var("a"), 3.0), (Symbol::var("b"), 10.0)]
        );
    }

    #[test]
    fn adding_ics_changes_conditioning_and_is_repeatable() {
        let engine = ExprEngine;
        let eqs = engine.parse_equations(&["x + y - 1"]).unwrap();
        let unknowns = vars(&["x", "y"]);
        let weak = values(&[("x", 0.5), ("y", 0.5)]);
        let t = Symbol::var("t");

        let run = |new_vars: &[Symbol]| {
            check_solvability_with_added_ics(
                &engine,
                &t,
                &eqs,
                &unknowns,
                &Values::new(),
                &weak,
                &Values::new(),
                new_vars,
            )
            .unwrap()
        };

        let fixed_x = run(vars(&["x"]).as_slice());
        assert!((fixed_x - 1.0).abs() < 1e-12);
        assert_eq!(fixed_x, run(vars(&["x"]).as_slice()));

        let err = check_solvability_with_added_ics(
            &engine,
            &t,
            &eqs,
            &unknowns,
            &Values::new(),
            &weak,
            &Values::new(),
            &vars(&["z"]),
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<IcError>(),
            Some(&IcError::MissingGuess("z".into()))
        );
    }

    #[test]
    fn candidate_sets_are_ranked_best_first() {
        let engine = ExprEngine;
        let eqs = engine
            .parse_equations(&["x + y + z - 1", "1e-6 * x + y - z", "x - 2 * z", "w - y"])
            .unwrap();
        let unknowns = vars(&["x", "y", "z", "w"]);
        let weak = values(&[("x", 0.1), ("y", 0.2), ("z", 0.3), ("w", 0.4)]);
        let candidates = vec![vars(&["w"]), vars(&["x"]), vars(&["y"])];

        let ranked = rank_candidate_sets(
            &engine,
            &Symbol::var("t"),
            &eqs,
            &unknowns,
            &Values::new(),
            &weak,
            &Values::new(),
            &candidates,
        )
        .unwrap();

        assert_eq!(ranked.len(), 3);
        assert!(ranked.windows(2).all(|w| w[0].1 <= w[1].1));
        let mut indices: Vec<usize> = ranked.iter().map(|(i, _)| *i).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);

        let again = rank_candidate_sets(
            &engine,
            &Symbol::var("t"),
            &eqs,
            &unknowns,
            &Values::new(),
            &weak,
            &Values::new(),
            &candidates,
        )
        .unwrap();
        assert_eq!(ranked, again);
    }
}
