//! Per-bank linear-scan register allocator (C5).
//!
//! One instance runs per register bank (GPR, FPR). Registers are tracked
//! as a flat array of "slots", each either free or holding one value's
//! current authoritative copy or a duplicate of a copy also held
//! elsewhere (in another register, or the stack). Picking an eviction
//! victim is a next-use ranking problem over at most 16 live registers,
//! which is exactly what the fixed-size sorting networks in
//! [`crate::sorting_network`] are built for: pack each occupied slot's
//! next-use value together with its register index into one `u32`
//! (next-use in the high bits so ordering by value orders by next-use),
//! run the network once, and the occupant with the farthest next use
//! sits at the back.

use crate::regalloc::{RegBank, RegIdx};
use crate::sorting_network::sort_descend;
use crate::graph::NodeId;

pub const NO_NEXT_USE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct Occupant {
    value: NodeId,
    output_ordinal: u8,
    /// The use index (from the C4 use list) at which this register's
    /// content is next read, or `NO_NEXT_USE` if it's dead.
    next_use: u32,
    /// True if this register holds a copy that is not the sole
    /// authoritative location of the value (another register or a
    /// spill slot also holds it).
    is_duplicate: bool,
}

/// Tracks the live contents of one bank's fixed register file during a
/// single forward pass over a basic block.
pub struct RegisterBankAllocator {
    bank: RegBank,
    slots: Vec<Option<Occupant>>,
}

impl RegisterBankAllocator {
    pub fn new(bank: RegBank, num_registers: u8) -> RegisterBankAllocator {
        RegisterBankAllocator { bank, slots: vec![None; num_registers as usize] }
    }

    pub fn bank(&self) -> RegBank {
        self.bank
    }

    pub fn num_registers(&self) -> usize {
        self.slots.len()
    }

    pub fn is_free(&self, reg: RegIdx) -> bool {
        self.slots[reg.0 as usize].is_none()
    }

    pub fn find_register_holding(&self, value: NodeId, output_ordinal: u8) -> Option<RegIdx> {
        self.slots.iter().position(|s| matches!(s, Some(o) if o.value == value && o.output_ordinal == output_ordinal)).map(|i| RegIdx(i as u8))
    }

    fn first_free(&self) -> Option<RegIdx> {
        self.slots.iter().position(Option::is_none).map(|i| RegIdx(i as u8))
    }

    /// Picks the best register to evict: the occupied slot whose next
    /// use is farthest away (or never, for a dead value). Runs the
    /// sorting network over (next_use, index) pairs packed into one
    /// `u32` and returns the slot that ends up first after a descending
    /// sort (largest next-use value first).
    fn find_eviction_victim(&self) -> Option<RegIdx> {
        let mut packed: Vec<u32> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|o| (o.next_use, i as u32)))
            .map(|(next_use, i)| (next_use << 5) | i)
            .collect();
        if packed.is_empty() {
            return None;
        }
        if packed.len() >= 2 {
            sort_descend(&mut packed);
        }
        Some(RegIdx((packed[0] & 0x1F) as u8))
    }

    /// Loads `value` into a register, evicting the farthest-next-use
    /// occupant if the bank is full. Returns the register it now lives
    /// in. The caller (C8) is responsible for emitting the actual
    /// load/spill machine code into the C7 operation log; this call
    /// only updates bookkeeping.
    pub fn load_register(&mut self, value: NodeId, output_ordinal: u8, next_use: u32) -> RegIdx {
        if let Some(existing) = self.find_register_holding(value, output_ordinal) {
            self.slots[existing.0 as usize].as_mut().unwrap().next_use = next_use;
            return existing;
        }
        let reg = self.first_free().unwrap_or_else(|| self.find_eviction_victim().expect("bank has at least one register"));
        self.slots[reg.0 as usize] = Some(Occupant { value, output_ordinal, next_use, is_duplicate: false });
        reg
    }

    /// Copies a value already in `src` into `dst` as a duplicate (both
    /// registers now hold valid copies).
    pub fn duplicate_register(&mut self, src: RegIdx, dst: RegIdx) {
        let occ = self.slots[src.0 as usize].expect("duplicate source must be occupied");
        self.slots[src.0 as usize].as_mut().unwrap().is_duplicate = true;
        self.slots[dst.0 as usize] = Some(Occupant { is_duplicate: true, ..occ });
    }

    /// Moves a value's sole copy from `src` to `dst`, freeing `src`.
    pub fn relocate_register(&mut self, src: RegIdx, dst: RegIdx) {
        let occ = self.slots[src.0 as usize].take().expect("relocate source must be occupied");
        self.slots[dst.0 as usize] = Some(occ);
    }

    /// Evicts whatever is in `reg` unconditionally, freeing it. Returns
    /// the evicted value so the caller can decide whether a spill store
    /// is actually needed (skipped if a duplicate already exists
    /// elsewhere, per the value manager's authoritative-location map).
    pub fn evict_register(&mut self, reg: RegIdx) -> Option<(NodeId, u8, bool)> {
        self.slots[reg.0 as usize].take().map(|o| (o.value, o.output_ordinal, o.is_duplicate))
    }

    pub fn kill_register(&mut self, reg: RegIdx) {
        self.slots[reg.0 as usize] = None;
    }

    /// Forces eviction of every live register with a next-use past
    /// `boundary_use_index`, used when a spill-everything node (C4's
    /// `spill_everything_indices`) is about to execute.
    pub fn evict_until(&mut self, boundary_use_index: u32) -> Vec<(NodeId, u8)> {
        let mut evicted = Vec::new();
        for slot in self.slots.iter_mut() {
            if let Some(o) = slot {
                if o.next_use >= boundary_use_index {
                    evicted.push((o.value, o.output_ordinal));
                    *slot = None;
                }
            }
        }
        evicted
    }

    /// Evicts every live register unconditionally (a full spill point).
    pub fn spill_everything(&mut self) -> Vec<(NodeId, u8)> {
        let mut evicted = Vec::new();
        for slot in self.slots.iter_mut() {
            if let Some(o) = slot.take() {
                evicted.push((o.value, o.output_ordinal));
            }
        }
        evicted
    }

    /// Allocates a register for a value about to be read as a "range"
    /// operand (e.g. `CreateVariadicRes`'s elements): these are consumed
    /// immediately and never need to survive past the current node, so
    /// they're loaded with `next_use = NO_NEXT_USE` to make them the
    /// first eviction candidate afterwards.
    pub fn process_ranged_operand(&mut self, value: NodeId, output_ordinal: u8) -> RegIdx {
        self.load_register(value, output_ordinal, NO_NEXT_USE)
    }

    pub fn live_values(&self) -> impl Iterator<Item = (RegIdx, NodeId, u8)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| s.map(|o| (RegIdx(i as u8), o.value, o.output_ordinal)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_fill_free_registers_first() {
        let mut alloc = RegisterBankAllocator::new(RegBank::Gpr, 4);
        let r0 = alloc.load_register(NodeId(0), 0, 10);
        let r1 = alloc.load_register(NodeId(1), 0, 20);
        assert_ne!(r0.0, r1.0);
        assert_eq!(alloc.live_values().count(), 2);
    }

    #[test]
    fn reloading_same_value_reuses_its_register() {
        let mut alloc = RegisterBankAllocator::new(RegBank::Gpr, 4);
        let r0 = alloc.load_register(NodeId(5), 0, 10);
        let r0_again = alloc.load_register(NodeId(5), 0, 99);
        assert_eq!(r0, r0_again);
        assert_eq!(alloc.live_values().count(), 1);
    }

    #[test]
    fn eviction_picks_farthest_next_use() {
        let mut alloc = RegisterBankAllocator::new(RegBank::Gpr, 2);
        alloc.load_register(NodeId(0), 0, 10); // used soon
        alloc.load_register(NodeId(1), 0, 1000); // used far away
        // Bank is full; loading a third value must evict NodeId(1).
        alloc.load_register(NodeId(2), 0, 5);
        let live: Vec<_> = alloc.live_values().map(|(_, v, _)| v).collect();
        assert!(live.contains(&NodeId(0)));
        assert!(live.contains(&NodeId(2)));
        assert!(!live.contains(&NodeId(1)));
    }

    #[test]
    fn spill_everything_empties_the_bank() {
        let mut alloc = RegisterBankAllocator::new(RegBank::Gpr, 3);
        alloc.load_register(NodeId(0), 0, 10);
        alloc.load_register(NodeId(1), 0, 20);
        let evicted = alloc.spill_everything();
        assert_eq!(evicted.len(), 2);
        assert_eq!(alloc.live_values().count(), 0);
    }

    #[test]
    fn evict_until_only_evicts_past_boundary() {
        let mut alloc = RegisterBankAllocator::new(RegBank::Gpr, 3);
        alloc.load_register(NodeId(0), 0, 5);
        alloc.load_register(NodeId(1), 0, 50);
        let evicted = alloc.evict_until(30);
        assert_eq!(evicted, vec![(NodeId(1), 0)]);
        assert_eq!(alloc.live_values().count(), 1);
    }
}
