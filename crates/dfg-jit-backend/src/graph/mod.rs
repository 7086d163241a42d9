//! The input data model: `Graph`, `BasicBlock`, and the node arena they
//! index into. Nodes live in a flat per-`Graph` arena and are referenced
//! by index (`NodeId`) rather than pointer, so the whole arena drops in
//! one shot at graph drop and no individual node is ever freed early —
//! the same "bump-allocate, bulk free" discipline the source gets from a
//! raw arena, gotten here for free from `Vec`.

pub mod edge;
pub mod node;
pub mod types;

pub use edge::{Edge, UseKind};
pub use node::{BCKind, LocalId, Node, NodeId, NodeKind};
pub use types::TypeMask;

use smallvec::SmallVec;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Per-local metadata: accumulates the union of every `SetLocal`
/// speculation that can reach this local (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct LogicalVariableInfo {
    pub speculation_mask: TypeMask,
    pub interpreter_slot: u32,
}

/// An ordered list of nodes terminated by 0, 1, or 2 successors.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub nodes: Vec<NodeId>,
    pub successors: SmallVec<[BlockId; 2]>,
    /// Filled in by the block sequencer (C9).
    pub ord_in_codegen_order: Option<u32>,
    /// Filled in by the block sequencer (C9): true iff some predecessor
    /// reaches this block while it is still on the DFS stack.
    pub is_back_edge_target: bool,
}

impl BasicBlock {
    pub fn new() -> BasicBlock {
        BasicBlock::default()
    }
}

pub struct Graph {
    nodes: Vec<Node>,
    pub blocks: Vec<BasicBlock>,
    /// Boxed constant values, addressed via negative offset from the
    /// materialized `DfgCodeBlock` pointer (§3, §6).
    pub constants: Vec<i64>,
    pub locals: Vec<LogicalVariableInfo>,
    pub num_fixed_args: u16,
    pub has_variadic_args: bool,
}

impl Graph {
    pub fn new(num_fixed_args: u16, has_variadic_args: bool) -> Graph {
        Graph {
            nodes: Vec::new(),
            blocks: vec![BasicBlock::new()],
            constants: Vec::new(),
            locals: Vec::new(),
            num_fixed_args,
            has_variadic_args,
        }
    }

    pub fn entry_block(&self) -> BlockId {
        BlockId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0 as usize]
    }

    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(BasicBlock::new());
        BlockId((self.blocks.len() - 1) as u32)
    }

    /// Appends a node to the given block's node list and returns its id.
    pub fn add_node(&mut self, block: BlockId, node: Node) -> NodeId {
        self.nodes.push(node);
        let id = NodeId((self.nodes.len() - 1) as u32);
        self.block_mut(block).nodes.push(id);
        id
    }

    pub fn add_constant(&mut self, value: i64) -> u32 {
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    pub fn alloc_local(&mut self, interpreter_slot: u32) -> LocalId {
        let id = LocalId(self.locals.len() as u16);
        self.locals.push(LogicalVariableInfo {
            speculation_mask: TypeMask::BOTTOM,
            interpreter_slot,
        });
        id
    }

    pub fn local(&self, id: LocalId) -> &LogicalVariableInfo {
        &self.locals[id.0 as usize]
    }

    pub fn local_mut(&mut self, id: LocalId) -> &mut LogicalVariableInfo {
        &mut self.locals[id.0 as usize]
    }

    /// Visits every constant-like node (`Constant`, `UnboxedConstant`,
    /// `UndefValue`) across all blocks, in block/node order.
    pub fn for_each_constant_like_node(&self, mut f: impl FnMut(NodeId, &Node)) {
        for block in &self.blocks {
            for &nid in &block.nodes {
                let n = self.node(nid);
                if matches!(
                    n.kind,
                    NodeKind::Constant { .. } | NodeKind::UnboxedConstant { .. } | NodeKind::UndefValue
                ) {
                    f(nid, n);
                }
            }
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
}
