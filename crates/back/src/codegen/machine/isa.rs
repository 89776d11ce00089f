use strum_macros::{
    Display,
    EnumIter,
};

use crate::codegen::machine::reg::PhysReg;

/// A partition of the physical register id space. Classes differ in the
/// default byte size and alignment a spilled value of that class occupies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum RegClass {
    Scalar,
    Vector,
    Mask,
}

/// Calling conventions the allocator needs to distinguish. Reservation and
/// preservation of registers depend on it; nothing else in the core does.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Abi {
    #[default]
    Standard,
    /// In-kernel convention: no preserved vector or mask window.
    Kernel,
}

/// One contiguous run of register ids sharing a class.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegClassDesc {
    pub class: RegClass,
    /// First register id of the run.
    pub first: u16,
    pub count: u16,
    /// Byte size of a spilled value of this class.
    pub spill_size: u32,
    pub spill_align: u32,
}

impl RegClassDesc {
    pub fn contains(&self, reg: PhysReg) -> bool {
        let id = u32::from(reg.raw());
        u32::from(self.first) <= id && id < u32::from(self.first) + u32::from(self.count)
    }

    /// Position of `reg` within this run.
    pub fn ordinal(&self, reg: PhysReg) -> u16 {
        debug_assert!(self.contains(reg));
        reg.raw() - self.first
    }
}

/// Static, architecture-provided description of the register set. Consumed
/// once by [`super::RegisterFile::of`]; the allocator never calls into the
/// target again.
pub trait TargetIsa {
    /// Class runs ordered by `first`. Together they must cover the id space
    /// exactly: the first run starts at 0 and each run begins where the
    /// previous one ends.
    fn classes() -> &'static [RegClassDesc];

    fn reg_name(reg: PhysReg) -> String;

    /// Registers the allocator must never hand out (stack/frame/link plumbing
    /// and similar fixed roles).
    fn is_reserved(reg: PhysReg, abi: Abi) -> bool;

    /// Registers the prologue must save before the generated code may clobber
    /// them.
    fn is_preserved(reg: PhysReg, abi: Abi) -> bool;
}
