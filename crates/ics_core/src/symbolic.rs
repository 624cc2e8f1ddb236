//! Symbolic backend interface.
//!
//! The classifier, system builder, orchestrator and diagnostics only ever
//! talk to equations through [`SymbolicBackend`]: atom extraction,
//! structural substitution, and compilation to a numeric callable.
//! [`ExprEngine`] implements it on top of the bundled expression engine.

use crate::autodiff::Dual;
use crate::equation_engine::{parse, CompiledSystem, Expr};
use crate::traits::VectorFunction;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identity of a variable appearing in an equation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Symbol {
    /// Plain unknown, parameter, or the time symbol.
    Var(String),
    /// Time derivative of `base`; two atoms are equal iff base and order match.
    Der { base: String, order: u32 },
    /// Placeholder scalar allocated by a `RenameMap`. Never produced by parsing.
    Dummy(u32),
}

impl Symbol {
    pub fn var(name: &str) -> Self {
        Symbol::Var(name.to_string())
    }

    pub fn der(base: &str, order: u32) -> Self {
        Symbol::Der {
            base: base.to_string(),
            order,
        }
    }

    pub fn is_derivative(&self) -> bool {
        matches!(self, Symbol::Der { .. })
    }

    /// The undifferentiated variable of a derivative atom.
    pub fn base(&self) -> Option<Symbol> {
        match self {
            Symbol::Der { base, .. } => Some(Symbol::Var(base.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Var(name) => write!(f, "{}", name),
            Symbol::Der { base, order: 1 } => write!(f, "der({})", base),
            Symbol::Der { base, order } => write!(f, "der({}, {})", base, order),
            Symbol::Dummy(id) => write!(f, "_dummy{}", id),
        }
    }
}

/// What a symbol is replaced with during substitution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Replacement<'a> {
    Symbol(&'a Symbol),
    Value(f64),
}

pub type Substitution<'a> = HashMap<Symbol, Replacement<'a>>;

/// Numeric variable assignments (ics, weak guesses, knowns).
pub type Values = HashMap<Symbol, f64>;

/// The four capabilities the solver needs from a computer-algebra layer.
pub trait SymbolicBackend {
    type Expr: Clone + fmt::Display + Send + Sync;
    type Compiled: VectorFunction<f64> + VectorFunction<Dual> + Send + Sync;

    /// Derivative atoms, deduplicated in first-appearance order.
    fn derivative_atoms(&self, expr: &Self::Expr) -> Vec<Symbol>;

    /// Non-derivative atoms (plain variables and dummies).
    fn plain_atoms(&self, expr: &Self::Expr) -> Vec<Symbol>;

    fn substitute(&self, expr: &Self::Expr, subs: &Substitution<'_>) -> Self::Expr;

    /// Compiles `exprs` into one vector function of `inputs` (in order).
    /// Any remaining symbol that is not an input is an error.
    fn lambdify(&self, exprs: &[Self::Expr], inputs: &[Symbol]) -> Result<Self::Compiled>;
}

/// Backend over the bundled parser, AST and bytecode VM.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprEngine;

impl ExprEngine {
    /// Parses `lhs = rhs` (or bare `expr`, read as `expr = 0`) equations.
    pub fn parse_equations<S: AsRef<str>>(&self, sources: &[S]) -> Result<Vec<Expr>> {
        sources
            .iter()
            .enumerate()
            .map(|(i, src)| {
                parse(src.as_ref()).with_context(|| format!("equation {} failed to parse", i))
            })
            .collect()
    }
}

impl SymbolicBackend for ExprEngine {
    type Expr = Expr;
    type Compiled = CompiledSystem;

    fn derivative_atoms(&self, expr: &Expr) -> Vec<Symbol> {
        expr.atoms(Symbol::is_derivative)
    }

    fn plain_atoms(&self, expr: &Expr) -> Vec<Symbol> {
        expr.atoms(|sym| !sym.is_derivative())
    }

    fn substitute(&self, expr: &Expr, subs: &Substitution<'_>) -> Expr {
        let map: HashMap<Symbol, Expr> = subs
            .iter()
            .map(|(key, replacement)| {
                let value = match replacement {
                    Replacement::Symbol(sym) => Expr::Symbol((*sym).clone()),
                    Replacement::Value(v) => Expr::Number(*v),
                };
                (key.clone(), value)
            })
            .collect();
        expr.substitute(&map)
    }

    fn lambdify(&self, exprs: &[Expr], inputs: &[Symbol]) -> Result<CompiledSystem> {
        CompiledSystem::compile(exprs, inputs)
    }
}
