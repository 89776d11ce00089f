use slotmap::{
    new_key_type,
    SlotMap,
};
use tracing::debug;

pub use scope::{
    Scope,
    ScopeId,
    ScopeState,
};

use crate::{
    codegen::{
        spill::Residency,
        Tick,
    },
    error::{
        AllocResult,
        ScopeError,
        SymbolError,
    },
};

pub mod scope;

new_key_type! {
    pub struct SymbolId;
}

/// A program symbol. Owned exclusively by the [`SymbolTable`]; every other
/// component refers to it by [`SymbolId`].
#[derive(Debug, Clone)]
pub struct Symbol {
    scope: ScopeId,
    declared_at: Tick,
    last_use: Tick,
    len: u32,
    align: u32,
    active: bool,
    residency: Residency,
}

impl Symbol {
    pub const fn scope(&self) -> ScopeId {
        self.scope
    }

    pub const fn declared_at(&self) -> Tick {
        self.declared_at
    }

    pub const fn last_use(&self) -> Tick {
        self.last_use
    }

    pub const fn len(&self) -> u32 {
        self.len
    }

    pub const fn align(&self) -> u32 {
        self.align
    }

    pub const fn is_active(&self) -> bool {
        self.active
    }

    pub const fn residency(&self) -> &Residency {
        &self.residency
    }

    pub(crate) fn residency_mut(&mut self) -> &mut Residency {
        &mut self.residency
    }

    fn deactivate(&mut self) {
        self.active = false;
        self.residency.deactivate();
    }
}

/// Owns symbol and scope identity, and drives activation state through scope
/// begin/end/reactivate. A root scope exists from construction and can never
/// be popped.
#[derive(Debug)]
pub struct SymbolTable {
    symbols: SlotMap<SymbolId, Symbol>,
    scopes: SlotMap<ScopeId, Scope>,
    /// Active scopes, root first. Never empty.
    stack: Vec<ScopeId>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut scopes = SlotMap::with_key();
        let root = scopes.insert(Scope::new());
        Self {
            symbols: SlotMap::with_key(),
            scopes,
            stack: vec![root],
        }
    }

    pub fn root(&self) -> ScopeId {
        self.stack[0]
    }

    pub fn current_scope(&self) -> ScopeId {
        *self.stack.last().expect("the scope stack is never empty")
    }

    pub fn scope(&self, scope: ScopeId) -> AllocResult<&Scope> {
        self.scopes
            .get(scope)
            .ok_or_else(|| ScopeError::UnknownScope(scope).into())
    }

    pub fn members_of(&self, scope: ScopeId) -> AllocResult<&[SymbolId]> {
        Ok(self.scope(scope)?.members())
    }

    pub fn begin_scope(&mut self) -> ScopeId {
        let scope = self.scopes.insert(Scope::new());
        self.stack.push(scope);
        debug!("Began scope {scope:?}");
        scope
    }

    /// Pops the top scope, marks it stale and deactivates its members.
    pub fn end_scope(&mut self) -> AllocResult<ScopeId> {
        if self.stack.len() == 1 {
            return Err(ScopeError::RootScope.into());
        }
        let scope = self.stack.pop().expect("checked above");
        self.scopes[scope].set_state(ScopeState::Stale);
        let members = self.scopes[scope].members().to_vec();
        for symbol in members {
            self.symbols[symbol].deactivate();
        }
        debug!("Ended scope {scope:?}");
        Ok(scope)
    }

    /// Pushes a previously-ended scope back onto the active stack and marks
    /// its members active again. Register and memory residency is NOT
    /// restored; members return to declared-but-unassigned.
    pub fn activate_scope(&mut self, scope: ScopeId) -> AllocResult<()> {
        let entry = self
            .scopes
            .get(scope)
            .ok_or(ScopeError::UnknownScope(scope))?;
        if self.stack.contains(&scope) {
            return Err(ScopeError::AlreadyActive(scope).into());
        }
        if entry.state() != ScopeState::Stale {
            return Err(ScopeError::NotStale(scope).into());
        }
        self.scopes[scope].set_state(ScopeState::Active);
        self.stack.push(scope);
        let members = self.scopes[scope].members().to_vec();
        for symbol in members {
            let entry = &mut self.symbols[symbol];
            debug_assert_eq!(*entry.residency(), Residency::default());
            entry.active = true;
        }
        debug!("Reactivated scope {scope:?}");
        Ok(())
    }

    /// Declares a new symbol in the current top scope: active, unassigned.
    pub fn declare(&mut self, len: u32, align: u32, now: Tick) -> AllocResult<SymbolId> {
        if len == 0 || !align.is_power_of_two() {
            return Err(SymbolError::BadLayout { len, align }.into());
        }
        let scope = self.current_scope();
        let symbol = self.symbols.insert(Symbol {
            scope,
            declared_at: now,
            last_use: now,
            len,
            align,
            active: true,
            residency: Residency::default(),
        });
        self.scopes[scope].push_member(symbol);
        debug!("Declared {symbol:?} (len {len}, align {align}) in {scope:?}");
        Ok(symbol)
    }

    /// Early deactivation inside the owning scope. A second removal of the
    /// same symbol is an error.
    pub fn remove(&mut self, symbol: SymbolId) -> AllocResult<()> {
        let entry = self
            .symbols
            .get_mut(symbol)
            .ok_or(SymbolError::UnknownSymbol(symbol))?;
        if !entry.active {
            return Err(SymbolError::Inactive {
                symbol,
                op: "remove",
            }
            .into());
        }
        entry.deactivate();
        debug!("Removed {symbol:?}");
        Ok(())
    }

    pub fn lookup(&self, symbol: SymbolId) -> AllocResult<&Symbol> {
        self.symbols
            .get(symbol)
            .ok_or_else(|| SymbolError::UnknownSymbol(symbol).into())
    }

    pub fn is_active(&self, symbol: SymbolId) -> bool {
        self.symbols
            .get(symbol)
            .map_or(false, |entry| entry.active)
    }

    pub fn symbols(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols.iter()
    }

    /// Looks the symbol up and requires it to be active; `op` names the
    /// caller for error context.
    pub(crate) fn expect_active(
        &mut self,
        symbol: SymbolId,
        op: &'static str,
    ) -> AllocResult<&mut Symbol> {
        let entry = self
            .symbols
            .get_mut(symbol)
            .ok_or(SymbolError::UnknownSymbol(symbol))?;
        if !entry.active {
            return Err(SymbolError::Inactive { symbol, op }.into());
        }
        Ok(entry)
    }

    /// Stamps a use of the symbol at `now`.
    pub(crate) fn touch(&mut self, symbol: SymbolId, now: Tick) -> AllocResult<()> {
        self.expect_active(symbol, "touch")?.last_use = now;
        Ok(())
    }

    pub(crate) fn residency_mut(&mut self, symbol: SymbolId) -> AllocResult<&mut Residency> {
        Ok(self.expect_active(symbol, "residency update")?.residency_mut())
    }
}
