//! Basic-block sequencer (C9).
//!
//! A single DFS from the entry block fixes the final codegen order.
//! Any block still on the DFS stack when it is reached again is a
//! back-edge target: its predecessor needs NOP padding so the target
//! lands on a 16-byte boundary, since the fast path is emitted as one
//! contiguous byte stream with no per-block alignment otherwise.

use crate::graph::{BlockId, Graph};

/// The multi-byte x86-64 NOP encodings, indexed by length (1..=15), used
/// to pad a block boundary up to the next 16-byte-aligned address
/// without emitting a run of single-byte NOPs.
pub const MULTI_BYTE_NOPS: [&[u8]; 15] = [
    &[0x90],
    &[0x66, 0x90],
    &[0x0f, 0x1f, 0x00],
    &[0x0f, 0x1f, 0x40, 0x00],
    &[0x0f, 0x1f, 0x44, 0x00, 0x00],
    &[0x66, 0x0f, 0x1f, 0x44, 0x00, 0x00],
    &[0x0f, 0x1f, 0x80, 0x00, 0x00, 0x00, 0x00],
    &[0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x66, 0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x66, 0x66, 0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
];

/// Fills `len` bytes of padding with the longest NOPs that fit, falling
/// back to repeating the 15-byte encoding.
pub fn emit_nop_padding(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(15);
        out.extend_from_slice(MULTI_BYTE_NOPS[chunk - 1]);
        remaining -= chunk;
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// No successors: unreachable past this point.
    Unreachable,
    /// One successor, reached by fall-through (no jump needed).
    FallThrough,
    /// One successor, reached by an explicit 5-byte `jmp`.
    Jump,
    /// Two successors: conditional branch plus (unless the branch
    /// target is the fall-through block) a trailing `jmp`.
    Conditional { invert: bool, needs_trailing_jump: bool },
}

impl Terminator {
    pub fn byte_len(self) -> usize {
        match self {
            Terminator::Unreachable => 2,
            Terminator::FallThrough => 0,
            Terminator::Jump => 5,
            Terminator::Conditional { needs_trailing_jump, .. } => 6 + if needs_trailing_jump { 5 } else { 0 },
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockOrder {
    /// Codegen order, by `BlockId`.
    pub order: Vec<BlockId>,
    pub is_back_edge_target: Vec<bool>,
    pub terminators: Vec<Terminator>,
}

/// Runs the DFS and computes, for each block in its discovered order,
/// whether it is a back-edge target and what terminator its position in
/// the order implies.
pub fn sequence_blocks(graph: &Graph) -> BlockOrder {
    let n = graph.blocks.len();
    let mut visited = vec![false; n];
    let mut on_stack = vec![false; n];
    let mut is_back_edge_target = vec![false; n];
    let mut order = Vec::with_capacity(n);

    let mut stack = vec![(graph.entry_block(), 0usize)];
    visited[graph.entry_block().0 as usize] = true;
    on_stack[graph.entry_block().0 as usize] = true;
    order.push(graph.entry_block());

    while let Some((block, succ_idx)) = stack.pop() {
        let successors = &graph.block(block).successors;
        if succ_idx < successors.len() {
            let next = successors[succ_idx];
            stack.push((block, succ_idx + 1));
            let ni = next.0 as usize;
            if on_stack[ni] {
                is_back_edge_target[ni] = true;
            } else if !visited[ni] {
                visited[ni] = true;
                on_stack[ni] = true;
                order.push(next);
                stack.push((next, 0));
            }
        } else {
            on_stack[block.0 as usize] = false;
        }
    }

    // Any block unreachable from the entry by the successor graph still
    // needs a position (dead code the DFG still requires lowered, e.g.
    // behind a statically-false branch the speculation pass hasn't
    // pruned); append in id order for determinism.
    for i in 0..n {
        if !visited[i] {
            order.push(BlockId(i as u32));
        }
    }

    let fallthrough_of = |pos: usize| -> Option<BlockId> { order.get(pos + 1).copied() };

    let terminators: Vec<Terminator> = order
        .iter()
        .enumerate()
        .map(|(pos, &b)| {
            let successors = &graph.block(b).successors;
            match successors.len() {
                0 => Terminator::Unreachable,
                1 => {
                    if fallthrough_of(pos) == Some(successors[0]) {
                        Terminator::FallThrough
                    } else {
                        Terminator::Jump
                    }
                }
                2 => {
                    let branch_target = successors[0];
                    let default_target = successors[1];
                    let fallthrough = fallthrough_of(pos);
                    if fallthrough == Some(branch_target) {
                        // Swap roles so the taken edge (branch_target)
                        // never needs a trailing jmp.
                        Terminator::Conditional { invert: true, needs_trailing_jump: false }
                    } else {
                        Terminator::Conditional { invert: false, needs_trailing_jump: fallthrough != Some(default_target) }
                    }
                }
                _ => unreachable!("a basic block may have at most two successors"),
            }
        })
        .collect();

    BlockOrder { order, is_back_edge_target, terminators }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_blocks_fall_through() {
        let mut g = Graph::new(0, false);
        let b1 = g.add_block();
        g.block_mut(g.entry_block()).successors = smallvec::smallvec![b1];
        let seq = sequence_blocks(&g);
        assert_eq!(seq.order, vec![g.entry_block(), b1]);
        assert_eq!(seq.terminators[0], Terminator::FallThrough);
        assert_eq!(seq.terminators[1], Terminator::Unreachable);
    }

    #[test]
    fn back_edge_is_detected() {
        let mut g = Graph::new(0, false);
        let entry = g.entry_block();
        let loop_head = g.add_block();
        let exit = g.add_block();
        g.block_mut(entry).successors = smallvec::smallvec![loop_head];
        g.block_mut(loop_head).successors = smallvec::smallvec![loop_head, exit];
        let seq = sequence_blocks(&g);
        assert!(seq.is_back_edge_target[loop_head.0 as usize]);
    }

    #[test]
    fn nop_padding_fills_exact_length() {
        for len in 0..40 {
            assert_eq!(emit_nop_padding(len).len(), len);
        }
    }
}
