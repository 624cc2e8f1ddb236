use crate::symbolic::{Replacement, Substitution, Symbol, Values};
use std::collections::HashMap;

/// Bijection between true symbols (derivative atoms) and placeholder dummies.
///
/// Derivatives are swapped for plain placeholder scalars before any
/// structural analysis or compilation, then mapped back when results are
/// reported. Dummy ids are allocated here, so they can never collide with
/// user-facing names.
#[derive(Debug, Clone, Default)]
pub struct RenameMap {
    true_to_dummy: HashMap<Symbol, Symbol>,
    dummy_to_true: HashMap<Symbol, Symbol>,
    next_id: u32,
}

impl RenameMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates one dummy per derivative atom in `symbols`.
    pub fn for_derivatives<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> Self {
        let mut map = Self::new();
        for sym in symbols.into_iter().filter(|s| s.is_derivative()) {
            map.dummy_for(sym);
        }
        map
    }

    /// Returns the dummy of `sym`, allocating one on first use.
    pub fn dummy_for(&mut self, sym: &Symbol) -> Symbol {
        if let Some(dummy) = self.true_to_dummy.get(sym) {
            return dummy.clone();
        }
        let dummy = Symbol::Dummy(self.next_id);
        self.next_id += 1;
        self.true_to_dummy.insert(sym.clone(), dummy.clone());
        self.dummy_to_true.insert(dummy.clone(), sym.clone());
        dummy
    }

    /// Dummy for a renamed symbol, the symbol itself otherwise.
    pub fn to_dummy(&self, sym: &Symbol) -> Symbol {
        self.true_to_dummy.get(sym).unwrap_or(sym).clone()
    }

    /// Inverse of [`RenameMap::to_dummy`].
    pub fn to_true(&self, sym: &Symbol) -> Symbol {
        self.dummy_to_true.get(sym).unwrap_or(sym).clone()
    }

    pub fn is_renamed(&self, sym: &Symbol) -> bool {
        self.true_to_dummy.contains_key(sym)
    }

    /// Re-keys every renamed symbol in `values` under its dummy.
    pub fn rekey(&self, values: &Values) -> Values {
        values
            .iter()
            .map(|(sym, &v)| (self.to_dummy(sym), v))
            .collect()
    }

    /// Inverse of [`RenameMap::rekey`].
    pub fn restore(&self, values: &Values) -> Values {
        values
            .iter()
            .map(|(sym, &v)| (self.to_true(sym), v))
            .collect()
    }

    /// True -> dummy substitution for use with a symbolic backend.
    pub fn substitution(&self) -> Substitution<'_> {
        self.true_to_dummy
            .iter()
            .map(|(sym, dummy)| (sym.clone(), Replacement::Symbol(dummy)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.true_to_dummy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.true_to_dummy.is_empty()
    }
}
