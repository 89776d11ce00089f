use crate::codegen::machine::isa::{
    Abi,
    RegClass,
    RegClassDesc,
    TargetIsa,
};

index_vec::define_index_type! {
    /// Physical register id. The id space is closed and partitioned into
    /// contiguous class runs by the target description.
    pub struct PhysReg = u16;
    DISPLAY_FORMAT = "r{}";
}

/// Immutable register description built once from a [`TargetIsa`].
///
/// All lookups are total over the validated id space; ids are checked at the
/// allocator API boundary before they ever reach this table, so the accessors
/// here treat an out-of-range id as a programming error.
#[derive(Clone)]
pub struct RegisterFile {
    classes: Vec<RegClassDesc>,
    total: u16,
    reserved: fn(PhysReg, Abi) -> bool,
    preserved: fn(PhysReg, Abi) -> bool,
    namer: fn(PhysReg) -> String,
}

impl std::fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterFile")
            .field("classes", &self.classes)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

impl RegisterFile {
    /// Builds the table for a target, validating that the class runs
    /// partition the id space exactly.
    ///
    /// # Panics
    ///
    /// Panics on a malformed target description. The class table is static
    /// configuration data; a hole or overlap in it is a defect in the target
    /// definition, not a runtime condition.
    pub fn of<I: TargetIsa>() -> Self {
        let classes: Vec<RegClassDesc> = I::classes().to_vec();
        assert!(!classes.is_empty(), "target defines no register classes");
        let mut next = 0u32;
        for desc in &classes {
            assert_eq!(
                u32::from(desc.first),
                next,
                "register class {} does not start where the previous class ends",
                desc.class
            );
            assert!(desc.count > 0, "register class {} is empty", desc.class);
            assert!(
                desc.spill_size > 0 && desc.spill_align.is_power_of_two(),
                "register class {} has an invalid spill layout",
                desc.class
            );
            next += u32::from(desc.count);
        }
        let total = u16::try_from(next).expect("register id space exceeds u16");
        Self {
            classes,
            total,
            reserved: I::is_reserved,
            preserved: I::is_preserved,
            namer: I::reg_name,
        }
    }

    pub fn len(&self) -> usize {
        usize::from(self.total)
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn contains(&self, reg: PhysReg) -> bool {
        reg.raw() < self.total
    }

    pub fn class_of(&self, reg: PhysReg) -> RegClass {
        self.desc_of(reg).class
    }

    pub fn desc_of(&self, reg: PhysReg) -> &RegClassDesc {
        self.classes
            .iter()
            .find(|desc| desc.contains(reg))
            .unwrap_or_else(|| panic!("register id {} outside the class table", reg.index()))
    }

    pub fn desc(&self, class: RegClass) -> &RegClassDesc {
        self.classes
            .iter()
            .find(|desc| desc.class == class)
            .unwrap_or_else(|| panic!("target defines no {class} class"))
    }

    /// Byte size a spilled value of `class` occupies by default.
    pub fn default_size(&self, class: RegClass) -> u32 {
        self.desc(class).spill_size
    }

    pub fn default_align(&self, class: RegClass) -> u32 {
        self.desc(class).spill_align
    }

    pub fn is_reserved(&self, reg: PhysReg, abi: Abi) -> bool {
        (self.reserved)(reg, abi)
    }

    pub fn is_preserved(&self, reg: PhysReg, abi: Abi) -> bool {
        (self.preserved)(reg, abi)
    }

    pub fn name(&self, reg: PhysReg) -> String {
        (self.namer)(reg)
    }

    pub fn regs(&self) -> impl Iterator<Item = PhysReg> {
        (0..self.total).map(PhysReg::from_raw)
    }

    pub fn regs_of(&self, class: RegClass) -> impl Iterator<Item = PhysReg> {
        let desc = *self.desc(class);
        (desc.first..desc.first + desc.count).map(PhysReg::from_raw)
    }

    /// Registers the allocator may hand out under `abi`.
    pub fn allocatable(&self, abi: Abi) -> Vec<PhysReg> {
        self.regs().filter(|reg| !self.is_reserved(*reg, abi)).collect()
    }
}
