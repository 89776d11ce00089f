use std::fmt::{
    Display,
    Formatter,
};

use itertools::Itertools;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use tracing::debug;

pub use links::{
    Link,
    RegisterLinks,
    Tier,
};

use crate::{
    codegen::{
        machine::{
            Abi,
            PhysReg,
            RegClass,
            RegisterFile,
        },
        spill::SpillArena,
        sym::{
            ScopeId,
            SymbolId,
            SymbolTable,
        },
        Tick,
    },
    error::{
        AllocResult,
        InvalidRegister,
        SpillError,
    },
};

pub mod links;

/// The policy layer over register, symbol, spill, and association
/// bookkeeping. One instance is exclusive to one function's code-generation
/// pass; after any error the instance must be discarded.
#[derive(Debug)]
pub struct Allocator {
    regs: RegisterFile,
    abi: Abi,
    symbols: SymbolTable,
    arena: SpillArena,
    links: RegisterLinks,
    clock: Tick,
    /// Registers ever handed out, for prologue save/restore sizing.
    used: FxHashSet<PhysReg>,
}

impl Allocator {
    pub fn new(regs: RegisterFile, abi: Abi) -> Self {
        let links = RegisterLinks::new(regs.len());
        Self {
            regs,
            abi,
            symbols: SymbolTable::new(),
            arena: SpillArena::new(),
            links,
            clock: 0,
            used: FxHashSet::default(),
        }
    }

    pub const fn abi(&self) -> Abi {
        self.abi
    }

    pub const fn register_file(&self) -> &RegisterFile {
        &self.regs
    }

    pub const fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub const fn arena(&self) -> &SpillArena {
        &self.arena
    }

    pub const fn links(&self) -> &RegisterLinks {
        &self.links
    }

    fn tick(&mut self) -> Tick {
        self.clock += 1;
        self.clock
    }

    fn check_reg(&self, reg: PhysReg) -> AllocResult<()> {
        if !self.regs.contains(reg) {
            return Err(InvalidRegister::OutOfRange(reg).into());
        }
        if self.regs.is_reserved(reg, self.abi) {
            return Err(InvalidRegister::Reserved(reg).into());
        }
        Ok(())
    }

    pub fn declare(&mut self, len: u32, align: u32) -> AllocResult<SymbolId> {
        let now = self.tick();
        self.symbols.declare(len, align, now)
    }

    /// Declares a symbol sized and aligned for a whole register of `class`.
    pub fn declare_default(&mut self, class: RegClass) -> AllocResult<SymbolId> {
        let len = self.regs.default_size(class);
        let align = self.regs.default_align(class);
        self.declare(len, align)
    }

    pub fn begin_scope(&mut self) -> ScopeId {
        self.symbols.begin_scope()
    }

    /// Ends the top scope. Members lose their register associations for
    /// good; their spill regions stay behind until the next [`Self::gc`].
    pub fn end_scope(&mut self) -> AllocResult<ScopeId> {
        let scope = self.symbols.end_scope()?;
        let members = self.symbols.members_of(scope)?.to_vec();
        for symbol in members {
            self.links.erase(symbol);
        }
        Ok(scope)
    }

    pub fn activate_scope(&mut self, scope: ScopeId) -> AllocResult<()> {
        self.symbols.activate_scope(scope)
    }

    /// Early removal of a single symbol; the scope permanently forgets it.
    pub fn remove(&mut self, symbol: SymbolId) -> AllocResult<()> {
        self.symbols.remove(symbol)?;
        self.links.erase(symbol);
        Ok(())
    }

    /// Places `symbol` in a register drawn from `allowed` and makes it the
    /// strong occupant. Selection, in strict priority order:
    ///
    /// 1. an empty register (no strong, no weak occupant), lowest id first;
    /// 2. the symbol's own weak/old register when no strong occupant took it;
    /// 3. a register holding only weak occupants, least recently used first;
    /// 4. eviction of the strong occupant with the globally oldest last use,
    ///    spilling it first when its value exists nowhere else.
    pub fn acquire(&mut self, symbol: SymbolId, allowed: &[PhysReg]) -> AllocResult<PhysReg> {
        if allowed.is_empty() {
            return Err(InvalidRegister::EmptySet.into());
        }
        let mut candidates: SmallVec<[PhysReg; 8]> = SmallVec::from_slice(allowed);
        candidates.sort_unstable();
        candidates.dedup();
        for reg in &candidates {
            self.check_reg(*reg)?;
        }
        self.symbols.expect_active(symbol, "acquire")?;

        if let Some(link) = self.links.link(symbol) {
            if link.tier == Tier::Strong && candidates.contains(&link.reg) {
                let now = self.tick();
                self.symbols.touch(symbol, now)?;
                return Ok(link.reg);
            }
        }

        let reg = self.select(symbol, &candidates)?;
        self.links.strengthen(symbol, reg);
        self.used.insert(reg);

        let had_fresh_memory = self.symbols.lookup(symbol)?.residency().has_fresh_memory();
        let residency = self.symbols.residency_mut(symbol)?;
        residency.set_register(true);
        if had_fresh_memory {
            // Reloaded, not rewritten: both copies stay in sync.
            residency.clear_staleness();
        }
        let now = self.tick();
        self.symbols.touch(symbol, now)?;
        debug!("Acquired {} for {symbol:?}", self.regs.name(reg));
        Ok(reg)
    }

    fn select(&mut self, symbol: SymbolId, candidates: &[PhysReg]) -> AllocResult<PhysReg> {
        if let Some(reg) = candidates
            .iter()
            .copied()
            .find(|reg| self.links.is_empty_reg(*reg))
        {
            debug!("Picked empty register {reg} for {symbol:?}");
            return Ok(reg);
        }

        if let Some(link) = self.links.link(symbol) {
            if link.tier != Tier::Strong
                && candidates.contains(&link.reg)
                && self.links.strong_of(link.reg).is_none()
            {
                debug!("Reusing {} register {} for {symbol:?}", link.tier, link.reg);
                return Ok(link.reg);
            }
        }

        if let Some(reg) = candidates
            .iter()
            .copied()
            .filter(|reg| {
                self.links.strong_of(*reg).is_none() && !self.links.weaks_of(*reg).is_empty()
            })
            .min_by_key(|reg| {
                self.links
                    .weaks_of(*reg)
                    .iter()
                    .map(|weak| self.last_use_of(*weak))
                    .max()
                    .unwrap_or(0)
            })
        {
            debug!("Picked weak-only register {reg} for {symbol:?}");
            return Ok(reg);
        }

        let (reg, victim) = candidates
            .iter()
            .copied()
            .filter_map(|reg| self.links.strong_of(reg).map(|occupant| (reg, occupant)))
            .min_by_key(|(_, occupant)| self.last_use_of(*occupant))
            .expect("every candidate register has a strong occupant at this point");

        let needs_spill = {
            let entry = self.symbols.lookup(victim)?;
            entry.is_active() && !entry.residency().has_fresh_memory()
        };
        if needs_spill {
            // Never drop a live value silently.
            self.ensure_spilled(victim)?;
        }
        self.symbols.residency_mut(victim)?.set_register(false);
        debug!("Evicting {victim:?} from {reg} for {symbol:?}");
        Ok(reg)
    }

    fn last_use_of(&self, symbol: SymbolId) -> Tick {
        self.symbols
            .lookup(symbol)
            .map(|entry| entry.last_use())
            .unwrap_or_else(|_| panic!("linked symbol {symbol:?} missing from the table"))
    }

    /// Records a use. A write marks the register copy newer than any memory
    /// copy.
    pub fn touch(&mut self, symbol: SymbolId, write: bool) -> AllocResult<()> {
        let now = self.tick();
        self.symbols.touch(symbol, now)?;
        if write {
            self.symbols.residency_mut(symbol)?.set_register(true);
        }
        Ok(())
    }

    /// Writes the symbol's register value to its spill region, creating one
    /// if needed. Returns the region offset, or `None` when a fresh memory
    /// copy already made the spill a no-op.
    pub fn spill(&mut self, symbol: SymbolId) -> AllocResult<Option<i32>> {
        let entry = self.symbols.expect_active(symbol, "spill")?;
        if !entry.residency().in_register() {
            return Err(SpillError::NotInRegister(symbol).into());
        }
        self.ensure_spilled(symbol)
    }

    fn ensure_spilled(&mut self, symbol: SymbolId) -> AllocResult<Option<i32>> {
        let entry = self.symbols.lookup(symbol)?;
        let (len, align) = (entry.len(), entry.align());
        let residency = *entry.residency();
        if residency.has_fresh_memory() {
            return Ok(None);
        }
        if let Some(region) = self.arena.region_of(symbol) {
            if residency.in_memory() {
                let offset = region.offset;
                self.symbols.residency_mut(symbol)?.clear_staleness();
                debug!("Refreshed spill region at {offset} for {symbol:?}");
                return Ok(Some(offset));
            }
            // Leftover region the owner no longer counts on; reclaim it
            // instead of waiting for gc.
            self.arena.release(symbol);
        }
        let offset = self.arena.allocate(symbol, len, align)?;
        let residency = self.symbols.residency_mut(symbol)?;
        residency.set_memory(true);
        residency.clear_staleness();
        debug!("Spilled {symbol:?} to {offset}");
        Ok(Some(offset))
    }

    /// Retires the register association and forgets the location state. The
    /// spill region, if any, stays behind for [`Self::gc`].
    pub fn release(&mut self, symbol: SymbolId) -> AllocResult<()> {
        self.symbols.lookup(symbol)?;
        self.links.retire(symbol);
        if self.symbols.is_active(symbol) {
            self.symbols.residency_mut(symbol)?.deactivate();
        }
        debug!("Released {symbol:?}");
        Ok(())
    }

    /// Reclaims spill regions owned by inactive symbols or superseded by
    /// fresher register values. Returns the number of regions dropped.
    pub fn gc(&mut self) -> usize {
        self.arena.gc(&self.symbols)
    }

    /// Most negative spill offset reached; sizes the local-variable stack
    /// area.
    pub const fn footprint(&self) -> i32 {
        self.arena.footprint()
    }

    /// Registers handed out so far that the ABI obliges the prologue to save
    /// and restore.
    pub fn clobbered_preserved(&self) -> Vec<PhysReg> {
        self.used
            .iter()
            .copied()
            .filter(|reg| self.regs.is_preserved(*reg, self.abi))
            .sorted()
            .collect()
    }

    /// Human-readable associations and spill layout.
    pub const fn dump(&self) -> AllocatorDump<'_> {
        AllocatorDump(self)
    }
}

pub struct AllocatorDump<'alloc>(&'alloc Allocator);

impl Display for AllocatorDump<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "associations:")?;
        for reg in self.0.regs.regs() {
            let strong = self.0.links.strong_of(reg);
            let weaks = self.0.links.weaks_of(reg);
            if strong.is_none() && weaks.is_empty() {
                continue;
            }
            write!(f, "  {}:", self.0.regs.name(reg))?;
            if let Some(symbol) = strong {
                write!(f, " strong {symbol:?}")?;
            }
            if !weaks.is_empty() {
                write!(f, " weak {weaks:?}")?;
            }
            writeln!(f)?;
        }
        write!(f, "{}", self.0.arena)
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use crate::{
        codegen::{
            machine::{
                Abi,
                PhysReg,
                RegClass,
                RegisterFile,
            },
            spill::Location,
            targets::vp64::Vp64,
        },
        error::{
            AllocError,
            InvalidRegister,
            SymbolError,
        },
    };

    use super::Allocator;

    fn allocator() -> Allocator {
        Allocator::new(RegisterFile::of::<Vp64>(), Abi::Standard)
    }

    fn scalars(ids: impl IntoIterator<Item = u16>) -> Vec<PhysReg> {
        ids.into_iter().map(PhysReg::from_raw).collect()
    }

    #[test]
    #[traced_test]
    fn eviction_spills_the_least_recently_used_symbol() {
        let mut alloc = allocator();
        let allowed = scalars(0..4);
        let syms: Vec<_> = (0..4).map(|_| alloc.declare(8, 8).unwrap()).collect();
        for symbol in &syms {
            alloc.acquire(*symbol, &allowed).unwrap();
        }

        let extra = alloc.declare(8, 8).unwrap();
        let reg = alloc.acquire(extra, &allowed).unwrap();

        // The first-acquired symbol is the globally least recently used.
        assert_eq!(reg, PhysReg::from_raw(0));
        assert!(alloc.links().is_weak(syms[0]));
        for symbol in &syms[1..] {
            assert!(alloc.links().is_strong(*symbol));
        }
        assert!(alloc.links().is_strong(extra));

        // Exactly one spill: one 8-byte, 8-aligned slot.
        assert_eq!(alloc.arena().regions().len(), 1);
        let region = alloc.arena().region_of(syms[0]).unwrap();
        assert_eq!((region.offset, region.len), (-8, 8));
        assert_eq!(alloc.footprint(), -8);
        assert_eq!(
            alloc.symbols().lookup(syms[0]).unwrap().residency().location(),
            Location::Memory
        );
    }

    #[test]
    fn empty_registers_win_by_lowest_id() {
        let mut alloc = allocator();
        let x = alloc.declare(8, 8).unwrap();
        assert_eq!(
            alloc.acquire(x, &scalars([7, 3, 5])).unwrap(),
            PhysReg::from_raw(3)
        );
    }

    #[test]
    fn acquire_is_stable_for_the_strong_occupant() {
        let mut alloc = allocator();
        let allowed = scalars(0..2);
        let x = alloc.declare(8, 8).unwrap();
        let first = alloc.acquire(x, &allowed).unwrap();
        let second = alloc.acquire(x, &allowed).unwrap();
        assert_eq!(first, second);
        assert!(alloc.links().is_strong(x));
    }

    #[test]
    #[traced_test]
    fn locality_beats_older_weak_occupants() {
        let mut alloc = allocator();
        let (r0, r1, r2) = (scalars([0]), scalars([1]), scalars([2]));

        let d = alloc.declare(8, 8).unwrap();
        alloc.acquire(d, &r2).unwrap();
        let e = alloc.declare(8, 8).unwrap();
        alloc.acquire(e, &r2).unwrap(); // evicts d; d weak on r2, oldest

        let a = alloc.declare(8, 8).unwrap();
        alloc.acquire(a, &r0).unwrap();
        let f = alloc.declare(8, 8).unwrap();
        alloc.acquire(f, &r0).unwrap(); // evicts a; a weak on r0

        let b = alloc.declare(8, 8).unwrap();
        alloc.acquire(b, &r1).unwrap();

        alloc.release(e).unwrap();
        alloc.release(f).unwrap();

        // r2's weak occupant d is older than a, so the recency rule alone
        // would pick r2; a still returns to its own register.
        let reg = alloc.acquire(a, &scalars(0..3)).unwrap();
        assert_eq!(reg, PhysReg::from_raw(0));
        assert!(alloc.links().is_strong(a));
    }

    #[test]
    fn weak_only_registers_are_taken_in_lru_order() {
        let mut alloc = allocator();

        let d = alloc.declare(8, 8).unwrap();
        alloc.acquire(d, &scalars([2])).unwrap();
        let e = alloc.declare(8, 8).unwrap();
        alloc.acquire(e, &scalars([2])).unwrap(); // evicts d; d weak, oldest

        let a = alloc.declare(8, 8).unwrap();
        alloc.acquire(a, &scalars([0])).unwrap();
        let f = alloc.declare(8, 8).unwrap();
        alloc.acquire(f, &scalars([0])).unwrap(); // evicts a; a weak, newer

        alloc.release(e).unwrap();
        alloc.release(f).unwrap();

        // Both r0 and r2 hold only weak occupants; the one with the least
        // recently used squatter loses its register first.
        let g = alloc.declare(8, 8).unwrap();
        let reg = alloc.acquire(g, &scalars([0, 2])).unwrap();
        assert_eq!(reg, PhysReg::from_raw(2));
    }

    #[test]
    fn reserved_and_out_of_range_registers_are_rejected() {
        let mut alloc = allocator();
        let x = alloc.declare(8, 8).unwrap();
        assert_eq!(
            alloc.acquire(x, &[Vp64::STACK_POINTER]),
            Err(AllocError::InvalidRegister(InvalidRegister::Reserved(
                Vp64::STACK_POINTER
            )))
        );
        let bogus = PhysReg::from_raw(200);
        assert_eq!(
            alloc.acquire(x, &[bogus]),
            Err(AllocError::InvalidRegister(InvalidRegister::OutOfRange(
                bogus
            )))
        );
        assert_eq!(
            alloc.acquire(x, &[]),
            Err(AllocError::InvalidRegister(InvalidRegister::EmptySet))
        );
    }

    #[test]
    fn inactive_symbols_cannot_be_acquired() {
        let mut alloc = allocator();
        let x = alloc.declare(8, 8).unwrap();
        alloc.remove(x).unwrap();
        assert_eq!(
            alloc.acquire(x, &scalars([0])),
            Err(AllocError::Symbol(SymbolError::Inactive {
                symbol: x,
                op: "acquire",
            }))
        );
    }

    #[test]
    #[traced_test]
    fn spill_reacquire_round_trip_preserves_layout() {
        let mut alloc = allocator();
        let r0 = scalars([0]);
        let r1 = scalars([1]);

        let x = alloc.declare(8, 8).unwrap();
        alloc.acquire(x, &r0).unwrap();
        let y = alloc.declare(16, 8).unwrap();
        alloc.acquire(y, &r1).unwrap();

        let y_offset = alloc.spill(y).unwrap().unwrap();
        let x_offset = alloc.spill(x).unwrap().unwrap();
        assert_eq!(alloc.spill(x).unwrap(), None); // already fresh

        // Evict x, then bring it back.
        let z = alloc.declare(8, 8).unwrap();
        alloc.acquire(z, &r0).unwrap();
        assert!(alloc.links().is_weak(x));
        let reg = alloc.acquire(x, &r0).unwrap();
        assert_eq!(reg, PhysReg::from_raw(0));

        let region = alloc.arena().region_of(x).unwrap();
        assert_eq!((region.offset, region.len), (x_offset, 8));
        let unrelated = alloc.arena().region_of(y).unwrap();
        assert_eq!((unrelated.offset, unrelated.len), (y_offset, 16));
        let residency = alloc.symbols().lookup(x).unwrap().residency();
        assert_eq!(residency.location(), Location::Both);
        assert_eq!(residency.staleness(), 0);
    }

    #[test]
    fn write_touches_age_spilled_copies_until_gc() {
        let mut alloc = allocator();
        let x = alloc.declare(8, 8).unwrap();
        alloc.acquire(x, &scalars([0])).unwrap();
        alloc.spill(x).unwrap();
        assert_eq!(alloc.gc(), 0);

        alloc.touch(x, true).unwrap();
        assert_eq!(
            alloc.symbols().lookup(x).unwrap().residency().staleness(),
            1
        );
        assert_eq!(alloc.gc(), 1);
        assert!(alloc.arena().region_of(x).is_none());
        // Idempotent without intervening mutation.
        assert_eq!(alloc.gc(), 0);
    }

    #[test]
    #[traced_test]
    fn scope_reactivation_yields_unassigned_symbols() {
        let mut alloc = allocator();
        let scope = alloc.begin_scope();
        let x = alloc.declare(8, 8).unwrap();
        alloc.acquire(x, &scalars([0])).unwrap();
        alloc.spill(x).unwrap();
        alloc.end_scope().unwrap();

        assert!(!alloc.symbols().is_active(x));
        assert_eq!(alloc.gc(), 1);

        alloc.activate_scope(scope).unwrap();
        let entry = alloc.symbols().lookup(x).unwrap();
        assert!(entry.is_active());
        assert_eq!(entry.residency().location(), Location::Unset);
        assert_eq!(alloc.links().tier_of(x), None);

        // The symbol allocates from scratch, as if newly declared.
        let reg = alloc.acquire(x, &scalars([1])).unwrap();
        assert_eq!(reg, PhysReg::from_raw(1));
    }

    #[test]
    fn released_symbols_keep_their_region_until_gc() {
        let mut alloc = allocator();
        let x = alloc.declare(8, 8).unwrap();
        alloc.acquire(x, &scalars([0])).unwrap();
        alloc.spill(x).unwrap();
        alloc.release(x).unwrap();

        assert!(alloc.links().is_old(x));
        assert_eq!(
            alloc.symbols().lookup(x).unwrap().residency().location(),
            Location::Unset
        );
        assert!(alloc.arena().region_of(x).is_some());
        assert_eq!(alloc.gc(), 1);
        assert!(alloc.arena().region_of(x).is_none());
    }

    #[test]
    fn clobbered_preserved_registers_are_reported_sorted() {
        let mut alloc = allocator();
        let allowed = scalars([20, 0, 18]);
        for _ in 0..3 {
            let symbol = alloc.declare(8, 8).unwrap();
            alloc.acquire(symbol, &allowed).unwrap();
        }
        assert_eq!(alloc.clobbered_preserved(), scalars([18, 20]));
    }

    #[test]
    fn vector_symbols_spill_with_class_layout() {
        let mut alloc = allocator();
        let v = alloc.declare_default(RegClass::Vector).unwrap();
        let v0 = PhysReg::from_raw(64);
        assert_eq!(alloc.acquire(v, &[v0]).unwrap(), v0);
        assert_eq!(alloc.spill(v).unwrap(), Some(-256));
        assert_eq!(alloc.footprint(), -256);
        let region = alloc.arena().region_of(v).unwrap();
        assert_eq!(region.len, 256);
        assert_eq!(region.offset % 32, 0);
    }

    #[test]
    fn dump_renders_associations_and_layout() {
        let mut alloc = allocator();
        let x = alloc.declare(8, 8).unwrap();
        alloc.acquire(x, &scalars([3])).unwrap();
        alloc.spill(x).unwrap();
        let dump = alloc.dump().to_string();
        assert!(dump.contains("s3"));
        assert!(dump.contains("strong"));
        assert!(dump.contains("spill arena"));
    }
}
