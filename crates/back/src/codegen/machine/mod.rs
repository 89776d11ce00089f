pub use isa::{
    Abi,
    RegClass,
    RegClassDesc,
    TargetIsa,
};
pub use reg::{
    PhysReg,
    RegisterFile,
};

pub mod isa;
pub mod reg;
