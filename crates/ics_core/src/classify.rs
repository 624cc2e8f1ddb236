//! Partitioning of DAE unknowns into differential states, their time
//! derivatives, and algebraic variables.
//!
//! The time symbol is not special to the classifier: include it in the
//! known set so it is never reported as an algebraic unknown.

use crate::rename::RenameMap;
use crate::symbolic::{Symbol, SymbolicBackend};
use std::collections::{BTreeMap, HashSet};

/// Result of classifying a whole equation set: `f(x, x_dot, y) = 0`.
#[derive(Debug, Clone)]
pub struct ClassifiedSystem<E> {
    /// Differential variables (bases of `x_dot`).
    pub x: Vec<Symbol>,
    /// Derivative atoms.
    pub x_dot: Vec<Symbol>,
    /// Algebraic variables.
    pub y: Vec<Symbol>,
    /// `x ++ x_dot ++ y`, deduplicated. This order is the order of every
    /// full-length answer vector.
    pub unknowns: Vec<Symbol>,
    /// Unknowns referenced by each equation, indexed like the input.
    pub vars_in_eqs: Vec<Vec<Symbol>>,
    /// Position -> equation.
    pub eq_index: BTreeMap<usize, E>,
}

impl<E> ClassifiedSystem<E> {
    /// Structural incidence: `[eq][unknown]` is true when the equation
    /// references that unknown.
    pub fn incidence(&self) -> Vec<Vec<bool>> {
        self.vars_in_eqs
            .iter()
            .map(|vars| self.unknowns.iter().map(|u| vars.contains(u)).collect())
            .collect()
    }
}

/// A symbol counts as known when
/// (a) it is in `known`,
/// (b) it is a derivative whose base variable is in `known`, or
/// (c) it is a plain variable and some derivative of it is in `known`.
pub fn is_known(sym: &Symbol, known: &HashSet<Symbol>) -> bool {
    if known.contains(sym) {
        return true;
    }
    match sym {
        Symbol::Der { .. } => sym.base().map_or(false, |base| known.contains(&base)),
        Symbol::Var(name) => known
            .iter()
            .any(|k| matches!(k, Symbol::Der { base, .. } if base == name)),
        Symbol::Dummy(_) => false,
    }
}

/// Splits the atoms of one equation into (derivative atoms, algebraic
/// atoms), both excluding known symbols.
///
/// Derivatives are swapped for dummies before algebraic atoms are read, so
/// a derivative never shows up as an algebraic variable; the derivative
/// atoms themselves come from the original expression.
pub fn extract_vars<B: SymbolicBackend>(
    backend: &B,
    eq: &B::Expr,
    known: &HashSet<Symbol>,
) -> (Vec<Symbol>, Vec<Symbol>) {
    let derivatives = backend.derivative_atoms(eq);
    let renames = RenameMap::for_derivatives(&derivatives);
    let dummy_eq = backend.substitute(eq, &renames.substitution());

    let a_vars = backend
        .plain_atoms(&dummy_eq)
        .into_iter()
        .filter(|sym| !matches!(sym, Symbol::Dummy(_)))
        .filter(|sym| !is_known(sym, known))
        .collect();

    let d_vars = derivatives
        .into_iter()
        .filter(|sym| !is_known(sym, known))
        .collect();

    (d_vars, a_vars)
}

/// Classifies every equation and assembles x, x_dot, y and X.
pub fn process_equations<B: SymbolicBackend>(
    backend: &B,
    eqs: &[B::Expr],
    known: &HashSet<Symbol>,
) -> ClassifiedSystem<B::Expr> {
    let mut x_dot: Vec<Symbol> = Vec::new();
    let mut a_vars: Vec<Symbol> = Vec::new();
    let mut vars_in_eqs = Vec::with_capacity(eqs.len());
    let mut eq_index = BTreeMap::new();

    for (idx, eq) in eqs.iter().enumerate() {
        let (eq_d_vars, eq_a_vars) = extract_vars(backend, eq, known);
        push_unique(&mut x_dot, eq_d_vars.iter().cloned());
        push_unique(&mut a_vars, eq_a_vars.iter().cloned());

        let mut referenced = eq_d_vars;
        push_unique(&mut referenced, eq_a_vars);
        vars_in_eqs.push(referenced);
        eq_index.insert(idx, eq.clone());
    }

    let mut x = Vec::new();
    push_unique(&mut x, x_dot.iter().filter_map(Symbol::base));
    let y: Vec<Symbol> = a_vars.into_iter().filter(|v| !x.contains(v)).collect();

    let mut unknowns = x.clone();
    push_unique(&mut unknowns, x_dot.iter().cloned());
    push_unique(&mut unknowns, y.iter().cloned());

    ClassifiedSystem {
        x,
        x_dot,
        y,
        unknowns,
        vars_in_eqs,
        eq_index,
    }
}

fn push_unique(target: &mut Vec<Symbol>, items: impl IntoIterator<Item = Symbol>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}
