//! DFG JIT backend core.
//!
//! Given a [`graph::Graph`] already lowered from bytecode, [`compile_graph`]
//! runs speculation assignment (C3), sequences basic blocks (C9), drives
//! per-block register allocation and stencil codegen (C4-C8), and
//! materializes the result into an executable [`code_block::DfgCodeBlock`]
//! (C10). Everything upstream of the graph (bytecode decoding, IR
//! construction, inlining) and everything downstream (the stencil
//! library itself, the interpreter this JIT'd code returns into) lives
//! outside this crate; see the trait boundaries in [`codegen::stencil`]
//! and [`speculation::GuestSpeculationRules`].

pub mod automata;
pub mod blocks;
pub mod code_block;
pub mod codegen;
pub mod config;
pub mod error;
pub mod graph;
pub mod materializer;
pub mod regalloc;
pub mod sorting_network;
pub mod speculation;
pub mod typecheck;

use blocks::sequencer::sequence_blocks;
use code_block::DfgCodeBlock;
use codegen::log::CodegenOpLog;
use codegen::node_processor::{process_node, Codegen};
use codegen::stencil::{JitCodeAllocator, StencilLibrary};
use config::CompileConfig;
use error::Result;
use graph::{BlockId, Graph};
use materializer::{materialize, BlockArtifact};
use regalloc::bank::RegisterBankAllocator;
use regalloc::use_list::{build_use_list, RegBank};
use regalloc::value_manager::ValueManager;
use speculation::{run_speculation_assignment_pass, GuestSpeculationRules};
use typecheck::TypeCheckSelector;

/// Runs the full backend pipeline over `graph` and returns the compiled
/// code block. `global_object_ptr` and `reg_spill_region_slot` are
/// caller-owned values folded straight into the header; this core never
/// interprets them itself.
pub fn compile_graph(
    graph: &mut Graph,
    config: &CompileConfig,
    selector: &TypeCheckSelector,
    guest_rules: &dyn GuestSpeculationRules,
    stencils: &dyn StencilLibrary,
    allocator: &dyn JitCodeAllocator,
    global_object_ptr: usize,
    reg_spill_region_slot: u32,
) -> Result<DfgCodeBlock> {
    run_speculation_assignment_pass(graph, selector, guest_rules);

    let order = sequence_blocks(graph);

    let mut values = ValueManager::new();
    let mut artifacts = Vec::with_capacity(order.order.len());

    for &block_id in &order.order {
        let artifact = compile_block(graph, block_id, config, &mut values, stencils);
        artifacts.push(artifact);
    }

    let frame_num_slots = values.frame_slot_count();

    materialize(
        graph,
        &order,
        &artifacts,
        stencils,
        allocator,
        global_object_ptr,
        frame_num_slots,
        reg_spill_region_slot,
    )
}

/// Runs C4 through C8 for one basic block, appending to the shared
/// cross-block [`ValueManager`] (register banks are scoped to a single
/// block; the value manager's spill-slot bookkeeping and OSR shadow
/// chain survive across all of them).
fn compile_block(
    graph: &Graph,
    block_id: BlockId,
    config: &CompileConfig,
    values: &mut ValueManager,
    stencils: &dyn StencilLibrary,
) -> BlockArtifact {
    let branch_decision = match graph.block(block_id).successors.len() {
        2 => graph.block(block_id).nodes.last().copied(),
        _ => None,
    };

    let list = build_use_list(graph, block_id, branch_decision);

    let mut gpr = RegisterBankAllocator::new(RegBank::Gpr, config.num_gpr_registers);
    let mut fpr = RegisterBankAllocator::new(RegBank::Fpr, config.num_fpr_registers);
    let mut log = CodegenOpLog::new();

    {
        let mut ctx = Codegen { gpr: &mut gpr, fpr: &mut fpr, values, log: &mut log, config };
        let mut pending_boundaries = list.spill_everything_indices.clone();
        for info in &list.node_infos {
            let boundary = pending_boundaries.last().copied().filter(|&b| info.base_use_index <= b);
            if boundary.is_some() {
                pending_boundaries.pop();
            }
            process_node(&mut ctx, graph, info, boundary);
        }
    }

    let _ = stencils;
    BlockArtifact { log }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::stencil::{EmitRequest, MmapCodeAllocator, PatchCursor, StencilLayout};
    use crate::graph::{Edge, Node, NodeKind, TypeMask};
    use crate::speculation::UntypedGuestSpeculationRules;

    struct FlatStencils;
    impl StencilLibrary for FlatStencils {
        fn layout(&self, _variant_ordinal: u32) -> StencilLayout {
            StencilLayout { fast_path_len: 2, slow_path_len: 0, data_sec_len: 0, data_sec_align: 1 }
        }
        fn emit(&self, _request: &EmitRequest, mut cursor: PatchCursor<'_>) -> (usize, usize, usize, usize) {
            if cursor.fast_path.len() >= 2 {
                cursor.fast_path[0] = 0x90;
                cursor.fast_path[1] = 0x90;
            }
            (2, 0, 0, 0)
        }
        fn entry_stub_layout(&self, _num_fixed_args: u16, _has_variadic_args: bool) -> StencilLayout {
            StencilLayout::default()
        }
        fn emit_entry_stub(&self, _num_fixed_args: u16, _has_variadic_args: bool, _cursor: PatchCursor<'_>) -> (usize, usize, usize, usize) {
            (0, 0, 0, 0)
        }
    }

    #[test]
    fn compiles_a_constant_return_graph_end_to_end() {
        let mut g = Graph::new(0, false);
        let entry = g.entry_block();
        let c0 = g.add_node(entry, Node::new(NodeKind::Constant { value: 7 }));
        g.add_node(entry, Node::new(NodeKind::Return).with_inputs([Edge::new(c0, 0, TypeMask::TOP)]));

        let config = CompileConfig::default();
        let selector = TypeCheckSelector::new(Vec::new());
        let guest_rules = UntypedGuestSpeculationRules;
        let stencils = FlatStencils;
        let allocator = MmapCodeAllocator;

        let result = compile_graph(&mut g, &config, &selector, &guest_rules, &stencils, &allocator, 0xdead_beef, 0);
        let code_block = result.expect("a two-node linear graph should compile");
        assert!(!code_block.entry_ptr().is_null());
    }
}
