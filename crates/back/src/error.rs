use std::fmt::{
    Display,
    Formatter,
};

use derive_more::From;

use crate::codegen::{
    machine::PhysReg,
    sym::{
        ScopeId,
        SymbolId,
    },
};

/// Any of these aborts compilation of the current function. They signal a
/// logic defect in the caller, not a recoverable runtime condition, so the
/// allocator instance must be discarded and rebuilt afterwards.
#[derive(Debug, Clone, PartialEq, Eq, From)]
pub enum AllocError {
    Scope(ScopeError),
    Symbol(SymbolError),
    Association(AssociationError),
    Spill(SpillError),
    InvalidRegister(InvalidRegister),
}

pub type AllocResult<T> = Result<T, AllocError>;

impl Display for AllocError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scope(err) => write!(f, "{err}"),
            Self::Symbol(err) => write!(f, "{err}"),
            Self::Association(err) => write!(f, "{err}"),
            Self::Spill(err) => write!(f, "{err}"),
            Self::InvalidRegister(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AllocError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeError {
    /// The root scope must outlive the allocator; popping it is never valid.
    RootScope,
    UnknownScope(ScopeId),
    /// `activate_scope` on a scope that was never ended.
    NotStale(ScopeId),
    /// `activate_scope` on a scope that is already on the active stack.
    AlreadyActive(ScopeId),
}

impl Display for ScopeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RootScope => write!(f, "attempted to end the root scope"),
            Self::UnknownScope(scope) => write!(f, "unknown scope {scope:?}"),
            Self::NotStale(scope) => {
                write!(f, "scope {scope:?} cannot be activated: it is not stale")
            }
            Self::AlreadyActive(scope) => {
                write!(f, "scope {scope:?} is already on the active stack")
            }
        }
    }
}

impl std::error::Error for ScopeError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolError {
    UnknownSymbol(SymbolId),
    /// Operation on a symbol that has been deactivated by scope end or
    /// explicit removal.
    Inactive {
        symbol: SymbolId,
        op: &'static str,
    },
    /// Zero length or non-power-of-two alignment at declaration.
    BadLayout {
        len: u32,
        align: u32,
    },
}

impl Display for SymbolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSymbol(symbol) => write!(f, "unknown symbol {symbol:?}"),
            Self::Inactive { symbol, op } => {
                write!(f, "{op} on inactive symbol {symbol:?}")
            }
            Self::BadLayout { len, align } => {
                write!(f, "invalid symbol layout: len {len}, align {align}")
            }
        }
    }
}

impl std::error::Error for SymbolError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationError {
    UnknownSymbol(SymbolId),
    /// `weaken` demotes a strong link in place; the symbol held none.
    NotStrong(SymbolId),
    /// `weaken` on an old symbol violates a hard precondition.
    AlreadyOld(SymbolId),
}

impl Display for AssociationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSymbol(symbol) => {
                write!(f, "symbol {symbol:?} has no register association")
            }
            Self::NotStrong(symbol) => {
                write!(f, "cannot weaken {symbol:?}: association is not strong")
            }
            Self::AlreadyOld(symbol) => {
                write!(f, "cannot weaken {symbol:?}: association is already old")
            }
        }
    }
}

impl std::error::Error for AssociationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpillError {
    /// The symbol already owns a live, non-stale region.
    DuplicateSpill(SymbolId),
    /// Spilling a symbol whose value is not register-resident.
    NotInRegister(SymbolId),
    /// Post-mutation validation of the region list failed.
    Layout {
        detail: String,
    },
}

impl Display for SpillError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateSpill(symbol) => {
                write!(f, "symbol {symbol:?} already owns a spill region")
            }
            Self::NotInRegister(symbol) => {
                write!(f, "cannot spill {symbol:?}: no register-resident value")
            }
            Self::Layout { detail } => write!(f, "spill arena layout violation: {detail}"),
        }
    }
}

impl std::error::Error for SpillError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidRegister {
    OutOfRange(PhysReg),
    Reserved(PhysReg),
    /// `acquire` with an empty allowed-register set.
    EmptySet,
}

impl Display for InvalidRegister {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange(reg) => write!(f, "register id {} is out of range", reg.index()),
            Self::Reserved(reg) => write!(f, "register id {} is reserved", reg.index()),
            Self::EmptySet => write!(f, "empty allowed-register set"),
        }
    }
}

impl std::error::Error for InvalidRegister {}
