use slotmap::new_key_type;
use strum_macros::Display;

use crate::codegen::sym::SymbolId;

new_key_type! {
    pub struct ScopeId;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
pub enum ScopeState {
    /// On the active stack; members are visible.
    Active,
    /// Ended. Members are deactivated but the scope may be reactivated.
    Stale,
}

/// A lexical region of symbol visibility. Scopes normally follow stack
/// discipline; a stale scope may be pushed back out of order via
/// reactivation.
#[derive(Debug, Clone)]
pub struct Scope {
    state: ScopeState,
    members: Vec<SymbolId>,
}

impl Scope {
    pub(crate) fn new() -> Self {
        Self {
            state: ScopeState::Active,
            members: Vec::new(),
        }
    }

    pub const fn state(&self) -> ScopeState {
        self.state
    }

    pub fn members(&self) -> &[SymbolId] {
        &self.members
    }

    pub(crate) fn set_state(&mut self, state: ScopeState) {
        self.state = state;
    }

    pub(crate) fn push_member(&mut self, symbol: SymbolId) {
        self.members.push(symbol);
    }
}
