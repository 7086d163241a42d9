//! Codegen operation log (C7).
//!
//! An append-only, inline-variant record of everything C8 decided while
//! walking a block: register moves the allocator forced, and the main
//! stencil emission for each node. No entry points at another entry;
//! each is self-sized, so the materializer (C10) can replay the log
//! linearly without a side table. Running fast-path/slow-path/data
//! section byte totals are tracked alongside so the final JIT region
//! size is known before any memory is allocated.

use crate::graph::NodeId;
use crate::regalloc::{RegBank, RegIdx, SpillSlot};

/// One physical location an operand or output can resolve to once
/// codegen is emitting real bytes instead of symbolic `NodeId`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalSlot {
    Register { bank: RegBank, reg: RegIdx },
    Spill(SpillSlot),
    /// An immediate/constant materialized directly into the instruction
    /// stream rather than occupying a register or spill slot.
    Constant(i64),
}

#[derive(Debug, Clone)]
pub enum LogEntry {
    RegMove { bank: RegBank, src: RegIdx, dst: RegIdx },
    RegSpill { bank: RegBank, src: RegIdx, slot: SpillSlot },
    RegLoad { bank: RegBank, slot: SpillSlot, dst: RegIdx },
    /// Main per-node emission when the node supports register
    /// allocation: a stencil variant ordinal selected by C5's operand
    /// placement, the node producing it (for SlowPathData bookkeeping),
    /// and the physical operand/output slots the stencil consumes.
    CodegenOpRegAllocEnabled {
        node: NodeId,
        variant_ordinal: u32,
        operands: Vec<PhysicalSlot>,
        output: Option<PhysicalSlot>,
        branch_decision: Option<PhysicalSlot>,
    },
    /// Emitted instead of the above when the node forced a full spill
    /// (reg-alloc-disabled nodes, or CreateFunctionObject/Return).
    CodegenOpRegAllocDisabled {
        node: NodeId,
        variant_ordinal: u32,
        operands: Vec<PhysicalSlot>,
        output: Option<PhysicalSlot>,
    },
    /// Same as the two kinds above but carrying an opaque literal-data
    /// payload (e.g. the fixed-argument count baked into
    /// `Return_MoveVariadicRes`), filled in by a specialized C8 handler.
    CodegenCustomOp {
        node: NodeId,
        variant_ordinal: u32,
        operands: Vec<PhysicalSlot>,
        literal_data: Vec<u8>,
        reg_alloc_enabled: bool,
    },
}

/// Byte-length contribution of one stencil variant, looked up from the
/// `StencilLibrary` and accumulated into the log's running totals.
#[derive(Debug, Clone, Copy, Default)]
pub struct StencilSize {
    pub fast_path_len: u32,
    pub slow_path_len: u32,
    pub data_sec_len: u32,
    pub data_sec_align: u32,
}

#[derive(Debug, Default)]
pub struct CodegenOpLog {
    entries: Vec<LogEntry>,
    fast_path_total: u32,
    slow_path_total: u32,
    data_sec_total: u32,
    data_sec_align: u32,
}

impl CodegenOpLog {
    pub fn new() -> CodegenOpLog {
        CodegenOpLog::default()
    }

    pub fn push(&mut self, entry: LogEntry, size: StencilSize) {
        self.entries.push(entry);
        self.update_jit_code_size(size);
    }

    /// Grows the running section totals by `size`; the alignment
    /// requirement of the whole data section is the max over every
    /// stencil's own requirement.
    pub fn update_jit_code_size(&mut self, size: StencilSize) {
        self.fast_path_total += size.fast_path_len;
        self.slow_path_total += size.slow_path_len;
        self.data_sec_total += size.data_sec_len;
        self.data_sec_align = self.data_sec_align.max(size.data_sec_align.max(1));
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn fast_path_total(&self) -> u32 {
        self.fast_path_total
    }

    pub fn slow_path_total(&self) -> u32 {
        self.slow_path_total
    }

    pub fn data_sec_total(&self) -> u32 {
        self.data_sec_total
    }

    pub fn data_sec_align(&self) -> u32 {
        self.data_sec_align.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_totals_accumulate_across_entries() {
        let mut log = CodegenOpLog::new();
        log.push(
            LogEntry::RegMove { bank: RegBank::Gpr, src: RegIdx(0), dst: RegIdx(1) },
            StencilSize { fast_path_len: 4, slow_path_len: 0, data_sec_len: 0, data_sec_align: 1 },
        );
        log.push(
            LogEntry::RegSpill { bank: RegBank::Gpr, src: RegIdx(1), slot: SpillSlot(0) },
            StencilSize { fast_path_len: 5, slow_path_len: 8, data_sec_len: 8, data_sec_align: 8 },
        );
        assert_eq!(log.fast_path_total(), 9);
        assert_eq!(log.slow_path_total(), 8);
        assert_eq!(log.data_sec_total(), 8);
        assert_eq!(log.data_sec_align(), 8);
        assert_eq!(log.entries().len(), 2);
    }
}
