//! Use-list builder (C4).
//!
//! Numbers uses within a basic block by walking the block's nodes back to
//! front. For the k-th node counted from the block's end (the terminator
//! is k=0), its three operand phases get use indices `3k+1` (range
//! operands), `3k+2` (checks) and `3k+3` (fixed operands); a two-successor
//! block's branch-decision value gets the single highest index `3N+2`
//! where N is the node count. Use index therefore counts down towards the
//! end of the block, so "next use" pointers recorded during this backward
//! walk are exactly the index of the closest following use in forward
//! execution order, and ascending-sort-by-next-use brings the most urgent
//! value to the front, matching the cost model the C5 allocator sorts on.

use crate::graph::{BlockId, Edge, Graph, NodeId, UseKind};
use smallvec::SmallVec;

pub const NO_NEXT_USE: u32 = u32::MAX;

/// Which register bank a use should be materialized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegBank {
    Gpr,
    Fpr,
}

/// One operand's register-allocation metadata, attached to the use index
/// the operand was read at.
#[derive(Debug, Clone, Copy)]
pub struct ValueUseRaInfo {
    pub value: NodeId,
    pub output_ordinal: u8,
    pub bank: RegBank,
    pub use_index: u32,
    /// Index of the next use of this same value going forward in
    /// execution order, or `NO_NEXT_USE` if this is the value's last use
    /// in the block.
    pub next_use_after: u32,
    /// The use comes from a ghost-like consumer (Phantom/ShadowStore):
    /// it prolongs liveness for OSR purposes but never needs a register
    /// materialized for it.
    pub is_ghost_like: bool,
}

impl ValueUseRaInfo {
    pub fn is_last_use(&self) -> bool {
        self.next_use_after == NO_NEXT_USE
    }
}

/// Per-node register-allocation uses, split into the three phases in
/// increasing use-index order: range operands, then checks, then fixed
/// operands.
#[derive(Debug, Clone)]
pub struct NodeRegAllocInfo {
    pub node: NodeId,
    pub base_use_index: u32,
    pub range_uses: SmallVec<[ValueUseRaInfo; 2]>,
    pub check_uses: SmallVec<[ValueUseRaInfo; 2]>,
    pub fixed_uses: SmallVec<[ValueUseRaInfo; 4]>,
}

impl NodeRegAllocInfo {
    pub fn all_uses(&self) -> impl Iterator<Item = &ValueUseRaInfo> {
        self.range_uses.iter().chain(self.check_uses.iter()).chain(self.fixed_uses.iter())
    }
}

/// The built use list for one basic block.
#[derive(Debug, Clone)]
pub struct BlockUseList {
    /// In forward (program) block order, one entry per node.
    pub node_infos: Vec<NodeRegAllocInfo>,
    pub branch_decision_use: Option<ValueUseRaInfo>,
    /// Use indices at which every live value must be spilled (nodes whose
    /// kind disables register allocation across their execution), in
    /// descending order so C5 can pop the next boundary as it scans
    /// forward-to-back.
    pub spill_everything_indices: Vec<u32>,
}

fn bank_for_use_kind(uk: UseKind) -> RegBank {
    use crate::graph::TypeMask;
    if uk.is_proven() {
        let ord = uk.0 - UseKind::FIRST_PROVEN_USE_KIND;
        let bit = 1u32 << ord;
        if bit == TypeMask::DOUBLE.0 || bit == TypeMask::DOUBLE_NOT_NAN.0 {
            return RegBank::Fpr;
        }
    }
    RegBank::Gpr
}

/// Builds the use list for `block_id`. `branch_decision` is the node
/// whose direct output is consumed as the branch condition when the
/// block has two successors (supplied by the caller, since the decision
/// edge itself isn't modeled as a graph edge).
pub fn build_use_list(graph: &Graph, block_id: BlockId, branch_decision: Option<NodeId>) -> BlockUseList {
    let block = graph.block(block_id);
    let n = block.nodes.len() as u32;

    let mut next_use_for: rustc_hash::FxHashMap<(NodeId, u8), u32> = rustc_hash::FxHashMap::default();

    let branch_decision_use = branch_decision.map(|node| {
        let idx = 3 * n + 2;
        let prev = next_use_for.insert((node, 0), idx);
        ValueUseRaInfo {
            value: node,
            output_ordinal: 0,
            bank: RegBank::Gpr,
            use_index: idx,
            next_use_after: prev.unwrap_or(NO_NEXT_USE),
            is_ghost_like: false,
        }
    });

    let mut node_infos: Vec<NodeRegAllocInfo> = Vec::with_capacity(block.nodes.len());
    let mut spill_everything_indices = Vec::new();

    // k = 0 at the last node of the block; walk backward.
    for (k, &node_id) in block.nodes.iter().enumerate().rev() {
        let k = (block.nodes.len() - 1 - k) as u32;
        let base = 3 * k;
        let node = graph.node(node_id);
        let ghost = node.kind.is_ghost_like();

        let mut record = |edge: &Edge, phase_index: u32| -> ValueUseRaInfo {
            let key = (edge.source_node, edge.output_ordinal);
            let prev = next_use_for.insert(key, phase_index);
            ValueUseRaInfo {
                value: edge.source_node,
                output_ordinal: edge.output_ordinal,
                bank: bank_for_use_kind(edge.use_kind),
                use_index: phase_index,
                next_use_after: prev.unwrap_or(NO_NEXT_USE),
                is_ghost_like: ghost,
            }
        };

        let range_uses: SmallVec<[ValueUseRaInfo; 2]> =
            node.range_inputs.iter().map(|e| record(e, base + 1)).collect();
        // Checks are any input edges that require a non-trivial runtime
        // check; everything else is a plain fixed-operand read. Both
        // phases draw from `inputs`, so split by use-kind rather than by
        // a separate edge list.
        let (check_edges, fixed_edges): (Vec<&Edge>, Vec<&Edge>) =
            node.inputs.iter().partition(|e| e.use_kind.requires_non_trivial_runtime_check());
        let check_uses: SmallVec<[ValueUseRaInfo; 2]> = check_edges.iter().map(|e| record(e, base + 2)).collect();
        let fixed_uses: SmallVec<[ValueUseRaInfo; 4]> = fixed_edges.iter().map(|e| record(e, base + 3)).collect();

        if node.kind.reg_alloc_disabled() {
            spill_everything_indices.push(base + 3);
        }

        node_infos.push(NodeRegAllocInfo { node: node_id, base_use_index: base, range_uses, check_uses, fixed_uses });
    }
    node_infos.reverse();
    spill_everything_indices.sort_unstable_by(|a, b| b.cmp(a));

    BlockUseList { node_infos, branch_decision_use, spill_everything_indices }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BCKind, Graph, Node, NodeKind, TypeMask};

    #[test]
    fn linear_chain_next_use_points_forward() {
        let mut g = Graph::new(0, false);
        let entry = g.entry_block();
        let c0 = g.add_node(entry, Node::new(NodeKind::Constant { value: 0 }));
        let c1 = g.add_node(entry, Node::new(NodeKind::Constant { value: 1 }));
        let add = g.add_node(
            entry,
            Node::new(NodeKind::Guest { bc_kind: BCKind(1), variant_ord: None }).with_inputs([
                Edge::new(c0, 0, TypeMask::TOP),
                Edge::new(c1, 0, TypeMask::TOP),
            ]),
        );
        let ret = g.add_node(entry, Node::new(NodeKind::Return).with_inputs([Edge::new(add, 0, TypeMask::TOP)]));

        let list = build_use_list(&g, entry, None);
        assert_eq!(list.node_infos.len(), 4);

        // `add`'s two operands (c0, c1) are each used exactly once in the
        // block, so their single use has no following use.
        let add_info = list.node_infos.iter().find(|i| i.node == add).unwrap();
        for u in add_info.all_uses() {
            assert!(u.is_last_use());
        }
        // `ret`'s use of `add`'s output is the only use of `add` itself.
        let ret_info = list.node_infos.iter().find(|i| i.node == ret).unwrap();
        assert!(ret_info.fixed_uses[0].is_last_use());
    }

    #[test]
    fn diamond_reuse_records_next_use() {
        let mut g = Graph::new(0, false);
        let entry = g.entry_block();
        let c0 = g.add_node(entry, Node::new(NodeKind::Constant { value: 0 }));
        let use_a = g.add_node(
            entry,
            Node::new(NodeKind::Guest { bc_kind: BCKind(1), variant_ord: None })
                .with_inputs([Edge::new(c0, 0, TypeMask::TOP)]),
        );
        let use_b =
            g.add_node(entry, Node::new(NodeKind::Return).with_inputs([Edge::new(c0, 0, TypeMask::TOP)]));

        let list = build_use_list(&g, entry, None);
        // use_a executes before use_b; use_a's read of c0 must report
        // use_b's read as its next use (the one that happens sooner
        // going forward from use_a).
        let info_a = list.node_infos.iter().find(|i| i.node == use_a).unwrap();
        let use_in_a = info_a.fixed_uses.iter().find(|u| u.value == c0).unwrap();
        let info_b = list.node_infos.iter().find(|i| i.node == use_b).unwrap();
        let use_in_b = info_b.fixed_uses.iter().find(|u| u.value == c0).unwrap();
        assert_eq!(use_in_a.next_use_after, use_in_b.use_index);
        assert!(use_in_b.is_last_use());
    }

    #[test]
    fn reg_alloc_disabled_node_adds_spill_boundary() {
        let mut g = Graph::new(0, false);
        let entry = g.entry_block();
        let c0 = g.add_node(entry, Node::new(NodeKind::Constant { value: 0 }));
        g.add_node(entry, Node::new(NodeKind::Return).with_inputs([Edge::new(c0, 0, TypeMask::TOP)]));

        let list = build_use_list(&g, entry, None);
        assert_eq!(list.spill_everything_indices.len(), 1);
    }
}
