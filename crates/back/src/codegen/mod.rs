pub use machine::{
    Abi,
    PhysReg,
    RegClass,
    RegisterFile,
};
pub use register_allocator::Allocator;
pub use sym::{
    ScopeId,
    SymbolId,
    SymbolTable,
};

pub mod machine;
pub mod register_allocator;
pub mod spill;
pub mod sym;
pub mod targets;

/// Monotonic recency counter. Owned by the [`Allocator`] instance and
/// threaded through every operation that records a use.
pub type Tick = u64;
