//! Numeric residual `F(x_free) = f(0, X)` built from a DAE equation set with
//! some unknowns fixed.

use crate::error::IcError;
use crate::rename::RenameMap;
use crate::symbolic::{Replacement, Substitution, Symbol, SymbolicBackend, Values};
use crate::traits::{Dimensions, Scalar, VectorFunction};
use anyhow::{Context, Result};
use nalgebra::DVector;

/// Compiled residual with the time input pinned to zero.
///
/// The backend compiles over `[t, x_free...]`; callers only ever see
/// `x_free`.
#[derive(Debug, Clone)]
pub struct IcResidual<C> {
    compiled: C,
    n_free: usize,
}

impl<C: Dimensions> Dimensions for IcResidual<C> {
    fn input_dim(&self) -> usize {
        self.n_free
    }

    fn output_dim(&self) -> usize {
        self.compiled.output_dim()
    }
}

impl<T: Scalar, C: VectorFunction<T>> VectorFunction<T> for IcResidual<C> {
    fn apply(&self, x: &[T], out: &mut [T]) {
        debug_assert_eq!(x.len(), self.n_free);
        let mut inputs = Vec::with_capacity(x.len() + 1);
        inputs.push(T::zero());
        inputs.extend_from_slice(x);
        self.compiled.apply(&inputs, out);
    }
}

/// Everything needed to solve for, and report, one set of initial
/// conditions.
#[derive(Debug, Clone)]
pub struct IcSystem<C> {
    pub residual: IcResidual<C>,
    /// All unknowns, derivatives replaced by their dummies, in caller order.
    pub x: Vec<Symbol>,
    /// Unknowns without a fixed value, same order as `x`.
    pub x_free: Vec<Symbol>,
    /// Fixed values (ics merged with knowns), keyed by dummy where renamed.
    pub values: Values,
    pub renames: RenameMap,
}

impl<C> IcSystem<C> {
    /// `x_free` mapped back to the caller's symbols.
    pub fn free_symbols(&self) -> Vec<Symbol> {
        self.x_free.iter().map(|s| self.renames.to_true(s)).collect()
    }

    pub fn is_square(&self) -> bool
    where
        C: Dimensions,
    {
        self.residual.input_dim() == self.residual.output_dim()
    }

    /// Initial point for the free variables read from `guesses`
    /// (keyed by true symbols).
    pub fn guess_from(&self, guesses: &Values) -> Result<DVector<f64>> {
        let rekeyed = self.renames.rekey(guesses);
        let mut x0 = DVector::zeros(self.x_free.len());
        for (i, sym) in self.x_free.iter().enumerate() {
            x0[i] = *rekeyed
                .get(sym)
                .ok_or_else(|| IcError::MissingGuess(self.renames.to_true(sym).to_string()))?;
        }
        Ok(x0)
    }

    /// Full-length answer in `x` order: solved values for free variables,
    /// fixed values for the rest.
    pub fn assemble(&self, solution: &[f64]) -> Result<Vec<f64>> {
        if solution.len() != self.x_free.len() {
            return Err(IcError::DimensionMismatch {
                expected: self.x_free.len(),
                got: solution.len(),
            }
            .into());
        }

        let mut free = solution.iter().copied();
        let mut full = Vec::with_capacity(self.x.len());
        for sym in &self.x {
            let value = match self.values.get(sym) {
                Some(&value) => value,
                None => free
                    .next()
                    .ok_or_else(|| IcError::MissingGuess(self.renames.to_true(sym).to_string()))?,
            };
            full.push(value);
        }
        Ok(full)
    }

    /// Euclidean norm of the residual at `x_free`.
    pub fn residual_norm(&self, x_free: &[f64]) -> f64
    where
        C: VectorFunction<f64>,
    {
        let mut out = vec![0.0; self.residual.output_dim()];
        self.residual.apply(x_free, &mut out);
        out.iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}

/// Builds the IC residual for `eqs` over `unknowns`.
///
/// `knowns` override `ics` on shared keys. Derivative unknowns are renamed
/// to dummies, then fixed values are substituted: derivative-keyed values
/// first so their atoms vanish before base-variable values touch the
/// expression, then the rest. Whatever unknowns remain form `x_free`, and
/// the result is compiled over `[time, x_free...]`.
pub fn make_system_of_ics<B: SymbolicBackend>(
    backend: &B,
    time: &Symbol,
    eqs: &[B::Expr],
    unknowns: &[Symbol],
    ics: &Values,
    knowns: &Values,
) -> Result<IcSystem<B::Compiled>> {
    let mut merged = ics.clone();
    merged.extend(knowns.iter().map(|(k, v)| (k.clone(), *v)));

    let renames = RenameMap::for_derivatives(unknowns);
    let values = renames.rekey(&merged);

    let rename_subs = renames.substitution();
    let (der_subs, other_subs): (Substitution<'_>, Substitution<'_>) = merged
        .iter()
        .map(|(sym, &v)| (renames.to_dummy(sym), Replacement::Value(v), sym.is_derivative()))
        .fold(
            (Substitution::new(), Substitution::new()),
            |(mut der, mut other), (key, replacement, is_der)| {
                if is_der {
                    der.insert(key, replacement);
                } else {
                    other.insert(key, replacement);
                }
                (der, other)
            },
        );

    let substituted: Vec<B::Expr> = eqs
        .iter()
        .map(|eq| {
            let renamed = backend.substitute(eq, &rename_subs);
            let without_derivatives = backend.substitute(&renamed, &der_subs);
            backend.substitute(&without_derivatives, &other_subs)
        })
        .collect();

    let x: Vec<Symbol> = unknowns.iter().map(|u| renames.to_dummy(u)).collect();
    let x_free: Vec<Symbol> = x
        .iter()
        .filter(|sym| !values.contains_key(*sym))
        .cloned()
        .collect();

    let mut inputs = Vec::with_capacity(x_free.len() + 1);
    inputs.push(time.clone());
    inputs.extend(x_free.iter().cloned());

    let compiled = backend
        .lambdify(&substituted, &inputs)
        .context("failed to compile the initial-condition residual")?;

    log::debug!(
        "IC system: {} equations, {} unknowns, {} free, {} renamed derivatives",
        eqs.len(),
        x.len(),
        x_free.len(),
        renames.len()
    );

    Ok(IcSystem {
        residual: IcResidual {
            compiled,
            n_free: x_free.len(),
        },
        x,
        x_free,
        values,
        renames,
    })
}
