use index_vec::IndexVec;
use slotmap::SecondaryMap;
use smallvec::SmallVec;
use strum_macros::Display;
use tracing::debug;

use crate::{
    codegen::{
        machine::PhysReg,
        sym::SymbolId,
    },
    error::{
        AllocResult,
        AssociationError,
    },
};

/// Lifecycle of a symbol's link to a register: authoritative, superseded,
/// historical.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
pub enum Tier {
    Strong,
    Weak,
    Old,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Link {
    pub reg: PhysReg,
    pub tier: Tier,
}

#[derive(Debug, Clone, Default)]
struct RegSlot {
    strong: Option<SymbolId>,
    /// Superseded occupants in supersession order, oldest first.
    weaks: SmallVec<[SymbolId; 2]>,
}

/// Tiered symbol↔register association bookkeeping.
///
/// Per register: at most one strong symbol and any number of weak ones. Per
/// symbol: at most one link, so the strong/weak/old sets are disjoint by
/// construction. Old symbols keep their last register for locality but hold
/// no claim on it.
#[derive(Debug)]
pub struct RegisterLinks {
    slots: IndexVec<PhysReg, RegSlot>,
    links: SecondaryMap<SymbolId, Link>,
}

impl RegisterLinks {
    pub fn new(num_regs: usize) -> Self {
        Self {
            slots: (0..num_regs).map(|_| RegSlot::default()).collect(),
            links: SecondaryMap::new(),
        }
    }

    /// Makes `symbol` the unique strong occupant of `reg`. A prior strong
    /// occupant is demoted to weak; a prior link of `symbol` elsewhere is
    /// fully detached first.
    pub fn strengthen(&mut self, symbol: SymbolId, reg: PhysReg) {
        self.detach(symbol);
        if let Some(prev) = self.slots[reg].strong.take() {
            debug!("Demoting {prev:?} to weak on {reg}");
            self.slots[reg].weaks.push(prev);
            self.links[prev] = Link {
                reg,
                tier: Tier::Weak,
            };
        }
        self.slots[reg].strong = Some(symbol);
        self.links.insert(
            symbol,
            Link {
                reg,
                tier: Tier::Strong,
            },
        );
        debug!("{symbol:?} is now strong on {reg}");
    }

    /// Demotes a strong symbol to weak in place. Weakening an old symbol is
    /// a hard precondition violation; so is weakening a symbol that is not
    /// strong.
    pub fn weaken(&mut self, symbol: SymbolId) -> AllocResult<()> {
        let link = self
            .links
            .get(symbol)
            .copied()
            .ok_or(AssociationError::UnknownSymbol(symbol))?;
        match link.tier {
            Tier::Old => Err(AssociationError::AlreadyOld(symbol).into()),
            Tier::Weak => Err(AssociationError::NotStrong(symbol).into()),
            Tier::Strong => {
                self.slots[link.reg].strong = None;
                self.slots[link.reg].weaks.push(symbol);
                self.links[symbol].tier = Tier::Weak;
                debug!("Weakened {symbol:?} on {}", link.reg);
                Ok(())
            }
        }
    }

    /// Moves a symbol out of strong/weak into old: the register claim is
    /// released but the register id is kept for locality. Idempotent, and a
    /// no-op for a never-linked symbol.
    pub fn retire(&mut self, symbol: SymbolId) {
        let Some(link) = self.links.get(symbol).copied() else {
            return;
        };
        match link.tier {
            Tier::Old => {}
            Tier::Strong | Tier::Weak => {
                self.unslot(symbol, link);
                self.links[symbol].tier = Tier::Old;
                debug!("Retired {symbol:?} (last register {})", link.reg);
            }
        }
    }

    /// Total removal, for when a scope permanently forgets a symbol.
    pub fn erase(&mut self, symbol: SymbolId) {
        self.detach(symbol);
        self.links.remove(symbol);
    }

    pub fn strong_of(&self, reg: PhysReg) -> Option<SymbolId> {
        self.slots[reg].strong
    }

    pub fn weaks_of(&self, reg: PhysReg) -> &[SymbolId] {
        &self.slots[reg].weaks
    }

    pub fn is_empty_reg(&self, reg: PhysReg) -> bool {
        let slot = &self.slots[reg];
        slot.strong.is_none() && slot.weaks.is_empty()
    }

    pub fn link(&self, symbol: SymbolId) -> Option<Link> {
        self.links.get(symbol).copied()
    }

    /// The register the symbol is or was last associated with.
    pub fn register_of(&self, symbol: SymbolId) -> Option<PhysReg> {
        self.link(symbol).map(|link| link.reg)
    }

    pub fn is_strong(&self, symbol: SymbolId) -> bool {
        self.tier_of(symbol) == Some(Tier::Strong)
    }

    pub fn is_weak(&self, symbol: SymbolId) -> bool {
        self.tier_of(symbol) == Some(Tier::Weak)
    }

    pub fn is_old(&self, symbol: SymbolId) -> bool {
        self.tier_of(symbol) == Some(Tier::Old)
    }

    pub fn tier_of(&self, symbol: SymbolId) -> Option<Tier> {
        self.link(symbol).map(|link| link.tier)
    }

    /// Removes the symbol from any slot lists it occupies; the link entry
    /// itself is left to the caller.
    fn detach(&mut self, symbol: SymbolId) {
        let Some(link) = self.links.get(symbol).copied() else {
            return;
        };
        self.unslot(symbol, link);
    }

    fn unslot(&mut self, symbol: SymbolId, link: Link) {
        match link.tier {
            Tier::Strong => {
                debug_assert_eq!(self.slots[link.reg].strong, Some(symbol));
                self.slots[link.reg].strong = None;
            }
            Tier::Weak => {
                self.slots[link.reg].weaks.retain(|weak| *weak != symbol);
            }
            Tier::Old => {}
        }
    }
}
