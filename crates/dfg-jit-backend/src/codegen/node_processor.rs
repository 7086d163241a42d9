//! Node processor (C8).
//!
//! Drives one basic block's nodes through the allocator and value
//! manager, phase by phase, appending a `CodegenOpLog` entry per node.
//! Most node kinds go through the generic phased path at the bottom of
//! [`process_node`]; `Return`, `CreateFunctionObject`,
//! `CreateVariadicRes`/`PrependVariadicRes` and `ShadowStore` have
//! specialized handlers mirroring the dedicated codegen fragments each
//! gets in the interpreter's bytecode builtins.
//!
//! The stencil library indexes its codegen functions by a combinatorial
//! ordinal — Group-1/Group-2 register-bank partition per operand, times
//! output/branch-decision reuse choice, times Group-1 passthrough count.
//! That ordinal space is generated ahead of time by the same build-time
//! tool that produces the stencils themselves (out of scope for this
//! crate). What this processor owns is *arriving at* a placement
//! (which bank and physical register/slot each operand and output
//! lands in) and packing that placement into a single ordinal via the
//! bit-per-operand-bank scheme below, which is a faithful but reduced
//! stand-in for the full combinatorial index: real variant selection
//! would also vary by passthrough count, which this core does not track
//! per-operand at this level of detail. The specialized handlers below
//! use small fixed literal ordinals (0, 1, 2, ...) in the same spirit,
//! standing in for the real per-fragment stencil selection this crate
//! doesn't have a schema for; see DESIGN.md.

use crate::codegen::log::{CodegenOpLog, LogEntry, PhysicalSlot, StencilSize};
use crate::config::CompileConfig;
use crate::graph::{Graph, NodeKind};
use crate::regalloc::bank::RegisterBankAllocator;
use crate::regalloc::use_list::{NodeRegAllocInfo, RegBank, ValueUseRaInfo, NO_NEXT_USE};
use crate::regalloc::value_manager::ValueManager;

pub struct Codegen<'a> {
    pub gpr: &'a mut RegisterBankAllocator,
    pub fpr: &'a mut RegisterBankAllocator,
    pub values: &'a mut ValueManager,
    pub log: &'a mut CodegenOpLog,
    pub config: &'a CompileConfig,
}

impl<'a> Codegen<'a> {
    fn bank_mut(&mut self, bank: RegBank) -> &mut RegisterBankAllocator {
        match bank {
            RegBank::Gpr => self.gpr,
            RegBank::Fpr => self.fpr,
        }
    }

    fn materialize(&mut self, use_info: &ValueUseRaInfo) -> PhysicalSlot {
        if use_info.is_ghost_like {
            // Ghost uses never need a register; they're satisfied from
            // wherever the value manager already has it (or, if it has
            // been spilled, straight from the spill slot).
            let loc = self.values.location_of(use_info.value, use_info.output_ordinal);
            if let Some(slot) = loc.spill_slot {
                return PhysicalSlot::Spill(slot);
            }
        }
        let bank_alloc = self.bank_mut(use_info.bank);
        let reg = bank_alloc.load_register(use_info.value, use_info.output_ordinal, use_info.next_use_after);
        self.values.record_register(use_info.value, use_info.output_ordinal, use_info.bank, reg);
        PhysicalSlot::Register { bank: use_info.bank, reg }
    }

    fn release_if_last_use(&mut self, use_info: &ValueUseRaInfo, reg: Option<crate::regalloc::RegIdx>) {
        if use_info.is_last_use() {
            if let Some(reg) = reg {
                self.bank_mut(use_info.bank).kill_register(reg);
            }
            self.values.clear_register(use_info.value, use_info.output_ordinal, use_info.bank);
        }
    }

    fn spill_all_past(&mut self, boundary: u32) {
        for (v, o) in self.gpr.evict_until(boundary) {
            self.values.clear_register(v, o, RegBank::Gpr);
        }
        for (v, o) in self.fpr.evict_until(boundary) {
            self.values.clear_register(v, o, RegBank::Fpr);
        }
    }

    fn spill_everything(&mut self) {
        for (v, o) in self.gpr.spill_everything() {
            self.values.clear_register(v, o, RegBank::Gpr);
        }
        for (v, o) in self.fpr.spill_everything() {
            self.values.clear_register(v, o, RegBank::Fpr);
        }
    }
}

fn encode_variant_ordinal(operands: &[PhysicalSlot]) -> u32 {
    let mut ordinal = 0u32;
    for (i, op) in operands.iter().enumerate().take(16) {
        if matches!(op, PhysicalSlot::Register { bank: RegBank::Fpr, .. }) {
            ordinal |= 1 << i;
        }
    }
    ordinal
}

fn physical_reg(slot: PhysicalSlot) -> Option<crate::regalloc::RegIdx> {
    match slot {
        PhysicalSlot::Register { reg, .. } => Some(reg),
        _ => None,
    }
}

fn output_bank(kind: &NodeKind) -> RegBank {
    // Only floating-point-producing built-ins would ever want the FPR
    // bank for their direct output; none of the built-in kinds modeled
    // here do (doubles arrive unboxed only through guest-language nodes,
    // whose bank choice the guest speculation rules already baked into
    // operand use-kinds, not the output itself).
    let _ = kind;
    RegBank::Gpr
}

/// Materializes the range phase (emitting no log entries of its own)
/// followed by the check phase (one `CodegenOpRegAllocEnabled` entry per
/// check), returning the range phase's physical slots. Shared by the
/// generic path and every specialized handler below, since both phases
/// are identical regardless of what the node's main emission looks like.
fn materialize_range_and_check_phases(ctx: &mut Codegen<'_>, info: &NodeRegAllocInfo) -> Vec<PhysicalSlot> {
    let mut range_operands = Vec::new();
    for u in info.range_uses.iter() {
        let slot = ctx.materialize(u);
        range_operands.push(slot);
        ctx.release_if_last_use(u, physical_reg(slot));
    }

    for u in info.check_uses.iter() {
        let slot = ctx.materialize(u);
        ctx.log.push(
            LogEntry::CodegenOpRegAllocEnabled {
                node: info.node,
                variant_ordinal: encode_variant_ordinal(&[slot]),
                operands: vec![slot],
                output: None,
                branch_decision: None,
            },
            StencilSize::default(),
        );
        ctx.release_if_last_use(u, physical_reg(slot));
    }

    range_operands
}

fn materialize_fixed_phase(ctx: &mut Codegen<'_>, info: &NodeRegAllocInfo) -> Vec<PhysicalSlot> {
    info.fixed_uses.iter().map(|u| ctx.materialize(u)).collect()
}

fn release_fixed_phase(ctx: &mut Codegen<'_>, info: &NodeRegAllocInfo) {
    for u in info.fixed_uses.iter() {
        let loc = ctx.values.location_of(u.value, u.output_ordinal);
        let reg = if u.bank == RegBank::Gpr { loc.gpr } else { loc.fpr };
        ctx.release_if_last_use(u, reg);
    }
}

/// Selects among the Ret0/Ret1/RetWithVariadicRes/RetNoVariadicRes
/// return specializations. This core doesn't track the full physical
/// interpreter-frame layout the slot offsets are computed against (only
/// spill slots), so `literal_data` carries just the return-value count
/// and (for the nil-fill case) each filled slot's ordinal, which is what
/// a real stencil would need on top of the physical register/slot
/// operands to pick the right store pattern.
fn process_return(ctx: &mut Codegen<'_>, info: &NodeRegAllocInfo) {
    let range_operands = materialize_range_and_check_phases(ctx, info);

    if !range_operands.is_empty() {
        let fixed_operands = materialize_fixed_phase(ctx, info);
        release_fixed_phase(ctx, info);
        ctx.spill_everything();
        // RetWithVariadicRes: the variadic tail has already been
        // assembled upstream (by CreateVariadicRes/PrependVariadicRes);
        // this op only needs to know where the fixed prefix values are.
        ctx.log.push(
            LogEntry::CodegenCustomOp {
                node: info.node,
                variant_ordinal: 0,
                operands: fixed_operands,
                literal_data: Vec::new(),
                reg_alloc_enabled: false,
            },
            StencilSize::default(),
        );
        return;
    }

    let fixed_operands = materialize_fixed_phase(ctx, info);
    release_fixed_phase(ctx, info);
    ctx.spill_everything();

    match fixed_operands.len() {
        // Ret0: no return values at all.
        0 => {
            ctx.log.push(
                LogEntry::CodegenCustomOp {
                    node: info.node,
                    variant_ordinal: 1,
                    operands: Vec::new(),
                    literal_data: Vec::new(),
                    reg_alloc_enabled: false,
                },
                StencilSize::default(),
            );
        }
        // Ret1: exactly one return value, stored at slot 0.
        1 => {
            ctx.log.push(
                LogEntry::CodegenCustomOp {
                    node: info.node,
                    variant_ordinal: 2,
                    operands: fixed_operands,
                    literal_data: vec![0],
                    reg_alloc_enabled: false,
                },
                StencilSize::default(),
            );
        }
        // RetNoVariadicRes: two or more return values, nil-filled up to
        // the configured minimum first (Ret0/Ret1 already cover that
        // minimum implicitly, hence the cutoff at >= 2 here).
        n => {
            let min_fill = ctx.config.min_nil_fill_return_values as usize;
            if n < min_fill {
                for idx in 0..(min_fill - n) {
                    ctx.log.push(
                        LogEntry::CodegenCustomOp {
                            node: info.node,
                            variant_ordinal: 3,
                            operands: Vec::new(),
                            literal_data: vec![(n + idx) as u8],
                            reg_alloc_enabled: true,
                        },
                        StencilSize::default(),
                    );
                }
            }
            ctx.log.push(
                LogEntry::CodegenCustomOp {
                    node: info.node,
                    variant_ordinal: 4,
                    operands: fixed_operands,
                    literal_data: vec![n as u8],
                    reg_alloc_enabled: false,
                },
                StencilSize::default(),
            );
        }
    }
}

/// Populates each upvalue slot from its corresponding fixed operand, one
/// `CodegenCustomOp` per upvalue carrying its target index as literal
/// data. A self-referencing upvalue (one whose operand is this node's
/// own not-yet-existent output) is deferred to last: the function
/// object must exist in a register before it can be written into its
/// own upvalue list.
fn process_create_function_object(ctx: &mut Codegen<'_>, info: &NodeRegAllocInfo) {
    let _ = materialize_range_and_check_phases(ctx, info);
    let fixed_operands = materialize_fixed_phase(ctx, info);
    ctx.spill_everything();

    let self_ref_ord = info.fixed_uses.iter().position(|u| u.value == info.node);
    let mut order: Vec<usize> = (0..fixed_operands.len()).collect();
    if let Some(idx) = self_ref_ord {
        order.retain(|&i| i != idx);
        order.push(idx);
    }

    for ord in order {
        let slot = fixed_operands[ord];
        ctx.log.push(
            LogEntry::CodegenCustomOp {
                node: info.node,
                variant_ordinal: 5,
                operands: vec![slot],
                literal_data: vec![ord as u8],
                reg_alloc_enabled: true,
            },
            StencilSize::default(),
        );
    }

    release_fixed_phase(ctx, info);

    let reg = ctx.bank_mut(RegBank::Gpr).load_register(info.node, 0, NO_NEXT_USE);
    ctx.values.record_register(info.node, 0, RegBank::Gpr, reg);
    ctx.log.push(
        LogEntry::CodegenOpRegAllocDisabled {
            node: info.node,
            variant_ordinal: 6,
            operands: Vec::new(),
            output: Some(PhysicalSlot::Register { bank: RegBank::Gpr, reg }),
        },
        StencilSize::default(),
    );
}

/// Stores each range operand into the variadic-result buffer at its
/// ordinal offset, one `CodegenCustomOp` per operand carrying the
/// offset as literal data, then a final op producing the buffer's start
/// address as this node's output.
fn process_variadic_res(ctx: &mut Codegen<'_>, info: &NodeRegAllocInfo) {
    let fixed_operands = materialize_fixed_phase(ctx, info);
    release_fixed_phase(ctx, info);

    let out_reg = ctx.bank_mut(RegBank::Gpr).load_register(info.node, 0, NO_NEXT_USE);
    ctx.values.record_register(info.node, 0, RegBank::Gpr, out_reg);
    let output = PhysicalSlot::Register { bank: RegBank::Gpr, reg: out_reg };

    for (idx, u) in info.range_uses.iter().enumerate() {
        let slot = ctx.materialize(u);
        ctx.release_if_last_use(u, physical_reg(slot));
        ctx.log.push(
            LogEntry::CodegenCustomOp {
                node: info.node,
                variant_ordinal: 7,
                operands: vec![slot],
                literal_data: vec![idx as u8],
                reg_alloc_enabled: true,
            },
            StencilSize::default(),
        );
    }

    ctx.log.push(
        LogEntry::CodegenOpRegAllocEnabled {
            node: info.node,
            variant_ordinal: encode_variant_ordinal(&fixed_operands),
            operands: fixed_operands,
            output: Some(output),
            branch_decision: None,
        },
        StencilSize::default(),
    );
}

/// Processes a single node's use phases and appends the corresponding
/// log entries. `boundary` is the next (smaller) spill-everything use
/// index from C4's stack, if one is still pending for this block.
pub fn process_node(ctx: &mut Codegen<'_>, graph: &Graph, info: &NodeRegAllocInfo, boundary: Option<u32>) {
    let node = graph.node(info.node);

    if let Some(b) = boundary {
        if info.base_use_index <= b {
            ctx.spill_all_past(b);
        }
    }

    // A plain ShadowStore's sole effect the value manager needs to know
    // about is recording its shadow-slot -> value mapping for OSR
    // recovery; this doesn't require a materialized register, so it
    // happens independent of the phased codegen below.
    // ShadowStoreUndefToRange and Phantom are deliberately excluded:
    // the former is always storing Undef, the latter has no runtime
    // value at all, so neither needs an OSR map entry.
    if let NodeKind::ShadowStore { shadow_slot } = &node.kind {
        if let Some(u) = info.fixed_uses.first() {
            ctx.values.process_shadow_store(*shadow_slot, *shadow_slot, u.value, u.output_ordinal);
            if ctx.config.enable_shadow_state_cross_checks {
                debug_assert!(ctx.values.recover_for_osr_exit(*shadow_slot).is_some());
            }
        }
    }

    match &node.kind {
        NodeKind::Return => {
            process_return(ctx, info);
            return;
        }
        NodeKind::CreateFunctionObject { .. } => {
            process_create_function_object(ctx, info);
            return;
        }
        NodeKind::CreateVariadicRes { .. } | NodeKind::PrependVariadicRes => {
            process_variadic_res(ctx, info);
            return;
        }
        _ => {}
    }

    let range_operands = materialize_range_and_check_phases(ctx, info);

    // Fixed-operand phase.
    let fixed_operands = materialize_fixed_phase(ctx, info);

    let reg_alloc_disabled = node.kind.reg_alloc_disabled();
    if reg_alloc_disabled {
        ctx.spill_everything();
    }

    let mut operands = range_operands.clone();
    operands.extend(fixed_operands.iter().copied());
    let output = if node.has_direct_output {
        let bank = output_bank(&node.kind);
        let reg = ctx.bank_mut(bank).load_register(info.node, 0, NO_NEXT_USE);
        ctx.values.record_register(info.node, 0, bank, reg);
        Some(PhysicalSlot::Register { bank, reg })
    } else {
        None
    };

    let entry = if reg_alloc_disabled {
        LogEntry::CodegenOpRegAllocDisabled {
            node: info.node,
            variant_ordinal: encode_variant_ordinal(&operands),
            operands,
            output,
        }
    } else {
        LogEntry::CodegenOpRegAllocEnabled {
            node: info.node,
            variant_ordinal: encode_variant_ordinal(&operands),
            operands,
            output,
            branch_decision: None,
        }
    };
    ctx.log.push(entry, StencilSize::default());

    release_fixed_phase(ctx, info);

    if let NodeKind::SetLocal { local } = &node.kind {
        let interpreter_slot = graph.local(*local).interpreter_slot;
        ctx.values.process_set_local(interpreter_slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileConfig;
    use crate::graph::{Edge, Node, TypeMask};
    use crate::regalloc::use_list::build_use_list;
    use crate::regalloc::value_manager::ValueManager;

    fn fresh_ctx(config: &CompileConfig) -> (RegisterBankAllocator, RegisterBankAllocator, ValueManager, CodegenOpLog) {
        (
            RegisterBankAllocator::new(RegBank::Gpr, config.num_gpr_registers),
            RegisterBankAllocator::new(RegBank::Fpr, config.num_fpr_registers),
            ValueManager::new(),
            CodegenOpLog::new(),
        )
    }

    #[test]
    fn simple_node_gets_output_register_and_log_entry() {
        let mut g = Graph::new(0, false);
        let entry = g.entry_block();
        let c0 = g.add_node(entry, Node::new(NodeKind::Constant { value: 7 }));
        let ret = g.add_node(entry, Node::new(NodeKind::Return).with_inputs([Edge::new(c0, 0, TypeMask::TOP)]));

        let list = build_use_list(&g, entry, None);
        let config = CompileConfig::default();
        let (mut gpr, mut fpr, mut values, mut log) = fresh_ctx(&config);
        let mut ctx = Codegen { gpr: &mut gpr, fpr: &mut fpr, values: &mut values, log: &mut log, config: &config };

        for info in &list.node_infos {
            process_node(&mut ctx, &g, info, list.spill_everything_indices.last().copied());
        }

        assert!(!log.entries().is_empty());
        let _ = ret;
    }

    #[test]
    fn return_with_no_values_emits_ret0_custom_op() {
        let mut g = Graph::new(0, false);
        let entry = g.entry_block();
        g.add_node(entry, Node::new(NodeKind::Return));

        let list = build_use_list(&g, entry, None);
        let config = CompileConfig::default();
        let (mut gpr, mut fpr, mut values, mut log) = fresh_ctx(&config);
        let mut ctx = Codegen { gpr: &mut gpr, fpr: &mut fpr, values: &mut values, log: &mut log, config: &config };

        for info in &list.node_infos {
            process_node(&mut ctx, &g, info, list.spill_everything_indices.last().copied());
        }

        let last = log.entries().last().expect("Return should append a custom op");
        match last {
            LogEntry::CodegenCustomOp { variant_ordinal, operands, literal_data, .. } => {
                assert_eq!(*variant_ordinal, 1);
                assert!(operands.is_empty());
                assert!(literal_data.is_empty());
            }
            other => panic!("expected Ret0 custom op, got {other:?}"),
        }
    }

    #[test]
    fn return_of_one_constant_emits_ret1_custom_op_with_slot_literal() {
        let mut g = Graph::new(0, false);
        let entry = g.entry_block();
        let c0 = g.add_node(entry, Node::new(NodeKind::Constant { value: 42 }));
        g.add_node(entry, Node::new(NodeKind::Return).with_inputs([Edge::new(c0, 0, TypeMask::TOP)]));

        let list = build_use_list(&g, entry, None);
        let config = CompileConfig::default();
        let (mut gpr, mut fpr, mut values, mut log) = fresh_ctx(&config);
        let mut ctx = Codegen { gpr: &mut gpr, fpr: &mut fpr, values: &mut values, log: &mut log, config: &config };

        for info in &list.node_infos {
            process_node(&mut ctx, &g, info, list.spill_everything_indices.last().copied());
        }

        let last = log.entries().last().expect("Return should append a custom op");
        match last {
            LogEntry::CodegenCustomOp { variant_ordinal, operands, literal_data, .. } => {
                assert_eq!(*variant_ordinal, 2);
                assert_eq!(operands.len(), 1);
                assert_eq!(literal_data, &vec![0u8]);
            }
            other => panic!("expected Ret1 custom op, got {other:?}"),
        }
    }

    #[test]
    fn shadow_store_node_updates_osr_recovery_map() {
        let mut g = Graph::new(0, false);
        let entry = g.entry_block();
        let c0 = g.add_node(entry, Node::new(NodeKind::Constant { value: 5 }));
        g.add_node(
            entry,
            Node::new(NodeKind::ShadowStore { shadow_slot: 3 }).with_inputs([Edge::new(c0, 0, TypeMask::TOP)]),
        );

        let list = build_use_list(&g, entry, None);
        let config = CompileConfig::default();
        let (mut gpr, mut fpr, mut values, mut log) = fresh_ctx(&config);
        let mut ctx = Codegen { gpr: &mut gpr, fpr: &mut fpr, values: &mut values, log: &mut log, config: &config };

        for info in &list.node_infos {
            process_node(&mut ctx, &g, info, list.spill_everything_indices.last().copied());
        }

        assert!(ctx.values.recover_for_osr_exit(3).is_some());
    }
}
