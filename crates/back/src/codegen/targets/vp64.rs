use crate::codegen::machine::{
    Abi,
    PhysReg,
    RegClass,
    RegClassDesc,
    TargetIsa,
};

/// 64-bit vector processor: 64 scalar registers (`s0..s63`), 64 vector
/// registers of 32 lanes (`v0..v63`), 16 mask registers (`m0..m15`).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Vp64;

const SCALARS: RegClassDesc = RegClassDesc {
    class: RegClass::Scalar,
    first: 0,
    count: 64,
    spill_size: 8,
    spill_align: 8,
};

const VECTORS: RegClassDesc = RegClassDesc {
    class: RegClass::Vector,
    first: 64,
    count: 64,
    spill_size: 256,
    spill_align: 32,
};

const MASKS: RegClassDesc = RegClassDesc {
    class: RegClass::Mask,
    first: 128,
    count: 16,
    spill_size: 32,
    spill_align: 8,
};

const CLASSES: [RegClassDesc; 3] = [SCALARS, VECTORS, MASKS];

impl Vp64 {
    pub const STACK_LIMIT: PhysReg = PhysReg::from_raw_unchecked(8);
    pub const FRAME_POINTER: PhysReg = PhysReg::from_raw_unchecked(9);
    pub const LINK: PhysReg = PhysReg::from_raw_unchecked(10);
    pub const STACK_POINTER: PhysReg = PhysReg::from_raw_unchecked(11);
    pub const THREAD_POINTER: PhysReg = PhysReg::from_raw_unchecked(14);
    /// `m0` reads as all-ones and cannot be written.
    pub const FULL_MASK: PhysReg = PhysReg::from_raw_unchecked(128);
}

impl TargetIsa for Vp64 {
    fn classes() -> &'static [RegClassDesc] {
        &CLASSES
    }

    fn reg_name(reg: PhysReg) -> String {
        let desc = CLASSES
            .iter()
            .find(|desc| desc.contains(reg))
            .unwrap_or_else(|| panic!("register id {} outside the class table", reg.index()));
        let prefix = match desc.class {
            RegClass::Scalar => 's',
            RegClass::Vector => 'v',
            RegClass::Mask => 'm',
        };
        format!("{prefix}{}", desc.ordinal(reg))
    }

    fn is_reserved(reg: PhysReg, _abi: Abi) -> bool {
        [
            Self::STACK_LIMIT,
            Self::FRAME_POINTER,
            Self::LINK,
            Self::STACK_POINTER,
            Self::THREAD_POINTER,
            Self::FULL_MASK,
        ]
        .contains(&reg)
    }

    fn is_preserved(reg: PhysReg, abi: Abi) -> bool {
        let id = reg.raw();
        let scalar_window = (18..=33).contains(&id);
        match abi {
            Abi::Standard => {
                scalar_window || (120..=127).contains(&id) || (136..=143).contains(&id)
            }
            Abi::Kernel => scalar_window,
        }
    }
}
