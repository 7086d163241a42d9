//! Code-block materializer (C10).
//!
//! Two passes over the already-built per-block operation logs: first a
//! dry run that asks the `StencilLibrary` for each entry's byte
//! contribution so the exact section sizes are known, then an
//! allocate-and-replay pass that asks the same library to write real
//! bytes into the now-fixed-size regions.
//!
//! Register shuffles (`RegMove`/`RegSpill`/`RegLoad`) are not
//! stencil-backed — they're synthesized directly as small fixed-size
//! placeholder encodings rather than routed through a real x86-64
//! encoder, since this crate does not embed one; see DESIGN.md.

use crate::blocks::sequencer::{emit_nop_padding, BlockOrder, Terminator};
use crate::code_block::{DfgCodeBlock, ExecutableCode, SlowPathDataStream};
use crate::codegen::log::{CodegenOpLog, LogEntry};
use crate::codegen::stencil::{EmitRequest, JitCodeAllocator, MappedJitRegion, PatchCursor, StencilLibrary};
use crate::error::{DfgBackendError, Result};
use crate::graph::Graph;

const REG_MOVE_LEN: usize = 4;
const REG_SPILL_LEN: usize = 5;
const REG_LOAD_LEN: usize = 5;
const TRAILING_PAD: usize = 7;

fn entry_fast_len(entry: &LogEntry, stencils: &dyn StencilLibrary) -> usize {
    match entry {
        LogEntry::RegMove { .. } => REG_MOVE_LEN,
        LogEntry::RegSpill { .. } => REG_SPILL_LEN,
        LogEntry::RegLoad { .. } => REG_LOAD_LEN,
        LogEntry::CodegenOpRegAllocEnabled { variant_ordinal, .. }
        | LogEntry::CodegenOpRegAllocDisabled { variant_ordinal, .. }
        | LogEntry::CodegenCustomOp { variant_ordinal, .. } => stencils.layout(*variant_ordinal).fast_path_len as usize,
    }
}

fn entry_slow_len(entry: &LogEntry, stencils: &dyn StencilLibrary) -> usize {
    match entry {
        LogEntry::RegMove { .. } | LogEntry::RegSpill { .. } | LogEntry::RegLoad { .. } => 0,
        LogEntry::CodegenOpRegAllocEnabled { variant_ordinal, .. }
        | LogEntry::CodegenOpRegAllocDisabled { variant_ordinal, .. }
        | LogEntry::CodegenCustomOp { variant_ordinal, .. } => stencils.layout(*variant_ordinal).slow_path_len as usize,
    }
}

fn entry_data_len(entry: &LogEntry, stencils: &dyn StencilLibrary) -> usize {
    match entry {
        LogEntry::RegMove { .. } | LogEntry::RegSpill { .. } | LogEntry::RegLoad { .. } => 0,
        LogEntry::CodegenOpRegAllocEnabled { variant_ordinal, .. }
        | LogEntry::CodegenOpRegAllocDisabled { variant_ordinal, .. }
        | LogEntry::CodegenCustomOp { variant_ordinal, .. } => stencils.layout(*variant_ordinal).data_sec_len as usize,
    }
}

/// If the block immediately following `pos` in codegen order is a
/// back-edge target, returns how many NOP bytes are needed to bring
/// `fast_len_so_far` up to the next 16-byte boundary; otherwise 0.
fn pad_len_if_next_is_back_edge_target(order: &BlockOrder, pos: usize, fast_len_so_far: usize) -> usize {
    let Some(&next_block) = order.order.get(pos + 1) else { return 0 };
    if !order.is_back_edge_target[next_block.0 as usize] {
        return 0;
    }
    let misalignment = fast_len_so_far % 16;
    if misalignment == 0 {
        0
    } else {
        16 - misalignment
    }
}

/// Everything C8 produced for one block, plus where it sits in the
/// final order.
pub struct BlockArtifact {
    pub log: CodegenOpLog,
}

/// Assembles the final `DfgCodeBlock` from the per-block logs, the
/// block order/terminators computed by C9, and the graph's constant
/// table. `num_fixed_args`/`has_variadic_args` select the entry stub.
pub fn materialize(
    graph: &Graph,
    order: &BlockOrder,
    blocks: &[BlockArtifact],
    stencils: &dyn StencilLibrary,
    allocator: &dyn JitCodeAllocator,
    global_object_ptr: usize,
    frame_num_slots: u32,
    reg_spill_region_slot: u32,
) -> Result<DfgCodeBlock> {
    let entry_layout = stencils.entry_stub_layout(graph.num_fixed_args, graph.has_variadic_args);

    let mut fast_total = entry_layout.fast_path_len as usize;
    let mut slow_total = entry_layout.slow_path_len as usize;
    let mut data_total = entry_layout.data_sec_len as usize;
    let data_align = (entry_layout.data_sec_align.max(1) as usize).max(1);

    for (pos, (artifact, term)) in blocks.iter().zip(order.terminators.iter()).enumerate() {
        for e in artifact.log.entries() {
            fast_total += entry_fast_len(e, stencils);
            slow_total += entry_slow_len(e, stencils);
            data_total += entry_data_len(e, stencils);
        }
        fast_total += term.byte_len();
        fast_total += pad_len_if_next_is_back_edge_target(order, pos, fast_total);
    }

    if frame_num_slots as usize > u16::MAX as usize {
        return Err(DfgBackendError::StackOverflow { slots: frame_num_slots as usize });
    }

    let data_gap = {
        let rem = data_total % data_align;
        if rem == 0 {
            0
        } else {
            data_align - rem
        }
    };
    let fast_path_offset = data_total + data_gap;
    let slow_path_offset = fast_path_offset + fast_total + TRAILING_PAD;
    let total_region_len = slow_path_offset + slow_total + TRAILING_PAD;

    log::debug!(
        "materializing DfgCodeBlock: data={data_total} fast={fast_total} slow={slow_total} total={total_region_len}"
    );

    let region_ptr = unsafe { allocator.alloc(total_region_len.max(1))? };
    let mut region = unsafe { MappedJitRegion::new(region_ptr, total_region_len.max(1)) };

    let mut slow_path_data = SlowPathDataStream::default();

    {
        let base = region.as_mut_ptr();
        let mut fast_cursor = fast_path_offset;
        let mut slow_cursor = slow_path_offset;
        let mut data_cursor = 0usize;

        {
            let stub_fast_len = entry_layout.fast_path_len as usize + TRAILING_PAD;
            let stub_slow_len = entry_layout.slow_path_len as usize + TRAILING_PAD;
            let stub_data_len = entry_layout.data_sec_len as usize + TRAILING_PAD;
            let (fw, sw, dw, _spdw) = unsafe {
                let fast_slice = std::slice::from_raw_parts_mut(base.add(fast_cursor), stub_fast_len);
                let slow_slice = std::slice::from_raw_parts_mut(base.add(slow_cursor), stub_slow_len);
                let data_slice = std::slice::from_raw_parts_mut(base.add(data_cursor), stub_data_len);
                let mut spd_buf = [0u8; 1];
                let cursor = PatchCursor { fast_path: fast_slice, slow_path: slow_slice, data_sec: data_slice, slow_path_data: &mut spd_buf };
                stencils.emit_entry_stub(graph.num_fixed_args, graph.has_variadic_args, cursor)
            };
            fast_cursor += fw.min(entry_layout.fast_path_len as usize + TRAILING_PAD);
            slow_cursor += sw.min(entry_layout.slow_path_len as usize + TRAILING_PAD);
            data_cursor += dw.min(entry_layout.data_sec_len as usize + TRAILING_PAD);
        }

        for (pos, (artifact, term)) in blocks.iter().zip(order.terminators.iter()).enumerate() {
            for e in artifact.log.entries() {
                let (fast_w, slow_w, data_w, spd_w) = replay_entry(e, base, &mut fast_cursor, &mut slow_cursor, &mut data_cursor, stencils, &mut slow_path_data);
                let _ = (fast_w, slow_w, data_w, spd_w);
            }
            fast_cursor += emit_terminator(base, fast_cursor, *term);
            let pad = pad_len_if_next_is_back_edge_target(order, pos, fast_cursor);
            if pad > 0 {
                let nops = emit_nop_padding(pad);
                unsafe { std::ptr::copy_nonoverlapping(nops.as_ptr(), base.add(fast_cursor), pad) };
                fast_cursor += pad;
            }
        }
        let _ = data_cursor;
    }

    unsafe {
        allocator.make_executable(region.as_mut_ptr(), total_region_len.max(1))?;
    }

    let executable = ExecutableCode::new(
        region,
        data_total as u32,
        fast_path_offset as u32,
        fast_total as u32,
        slow_path_offset as u32,
        slow_total as u32,
    );

    Ok(DfgCodeBlock {
        global_object_ptr,
        stack_frame_num_slots: frame_num_slots,
        stack_reg_spill_region_slot: reg_spill_region_slot,
        constant_table: graph.constants.clone(),
        slow_path_data,
        executable,
    })
}

#[allow(clippy::too_many_arguments)]
fn replay_entry(
    entry: &LogEntry,
    base: *mut u8,
    fast_cursor: &mut usize,
    slow_cursor: &mut usize,
    data_cursor: &mut usize,
    stencils: &dyn StencilLibrary,
    slow_path_data: &mut SlowPathDataStream,
) -> (usize, usize, usize, usize) {
    match entry {
        LogEntry::RegMove { .. } => {
            unsafe { std::ptr::write_bytes(base.add(*fast_cursor), 0x90, REG_MOVE_LEN) };
            *fast_cursor += REG_MOVE_LEN;
            (REG_MOVE_LEN, 0, 0, 0)
        }
        LogEntry::RegSpill { .. } => {
            unsafe { std::ptr::write_bytes(base.add(*fast_cursor), 0x90, REG_SPILL_LEN) };
            *fast_cursor += REG_SPILL_LEN;
            (REG_SPILL_LEN, 0, 0, 0)
        }
        LogEntry::RegLoad { .. } => {
            unsafe { std::ptr::write_bytes(base.add(*fast_cursor), 0x90, REG_LOAD_LEN) };
            *fast_cursor += REG_LOAD_LEN;
            (REG_LOAD_LEN, 0, 0, 0)
        }
        LogEntry::CodegenOpRegAllocEnabled { node, variant_ordinal, operands, output, branch_decision } => {
            let layout = stencils.layout(*variant_ordinal);
            let req = EmitRequest {
                node: *node,
                variant_ordinal: *variant_ordinal,
                operands: operands.clone(),
                output: *output,
                branch_decision: *branch_decision,
                literal_data: Vec::new(),
            };
            emit_via_stencil(stencils, &req, layout, base, fast_cursor, slow_cursor, data_cursor, slow_path_data)
        }
        LogEntry::CodegenOpRegAllocDisabled { node, variant_ordinal, operands, output } => {
            let layout = stencils.layout(*variant_ordinal);
            let req = EmitRequest {
                node: *node,
                variant_ordinal: *variant_ordinal,
                operands: operands.clone(),
                output: *output,
                branch_decision: None,
                literal_data: Vec::new(),
            };
            emit_via_stencil(stencils, &req, layout, base, fast_cursor, slow_cursor, data_cursor, slow_path_data)
        }
        LogEntry::CodegenCustomOp { node, variant_ordinal, operands, literal_data, .. } => {
            let layout = stencils.layout(*variant_ordinal);
            let req = EmitRequest {
                node: *node,
                variant_ordinal: *variant_ordinal,
                operands: operands.clone(),
                output: None,
                branch_decision: None,
                literal_data: literal_data.clone(),
            };
            emit_via_stencil(stencils, &req, layout, base, fast_cursor, slow_cursor, data_cursor, slow_path_data)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_via_stencil(
    stencils: &dyn StencilLibrary,
    req: &EmitRequest,
    layout: crate::codegen::stencil::StencilLayout,
    base: *mut u8,
    fast_cursor: &mut usize,
    slow_cursor: &mut usize,
    data_cursor: &mut usize,
    slow_path_data: &mut SlowPathDataStream,
) -> (usize, usize, usize, usize) {
    let fast_len = layout.fast_path_len as usize + TRAILING_PAD;
    let slow_len = layout.slow_path_len as usize + TRAILING_PAD;
    let data_len = layout.data_sec_len as usize + TRAILING_PAD;
    // A generous scratch buffer for SlowPathData bytes per entry; real
    // sizing would come from the stencil library too.
    let mut spd_buf = vec![0u8; 64];

    let (fw, sw, dw, spdw) = unsafe {
        let fast_slice = std::slice::from_raw_parts_mut(base.add(*fast_cursor), fast_len);
        let slow_slice = std::slice::from_raw_parts_mut(base.add(*slow_cursor), slow_len);
        let data_slice = std::slice::from_raw_parts_mut(base.add(*data_cursor), data_len);
        let cursor = PatchCursor {
            fast_path: fast_slice,
            slow_path: slow_slice,
            data_sec: data_slice,
            slow_path_data: &mut spd_buf,
        };
        stencils.emit(req, cursor)
    };

    *fast_cursor += fw.min(layout.fast_path_len as usize + TRAILING_PAD);
    *slow_cursor += sw.min(layout.slow_path_len as usize + TRAILING_PAD);
    *data_cursor += dw.min(layout.data_sec_len as usize + TRAILING_PAD);
    slow_path_data.bytes.extend_from_slice(&spd_buf[..spdw.min(spd_buf.len())]);
    (fw, sw, dw, spdw)
}

fn emit_terminator(base: *mut u8, at: usize, term: Terminator) -> usize {
    let bytes: Vec<u8> = match term {
        Terminator::Unreachable => vec![0x0f, 0x0b],
        Terminator::FallThrough => vec![],
        Terminator::Jump => {
            let mut v = vec![0xe9];
            v.extend_from_slice(&0i32.to_le_bytes());
            v
        }
        Terminator::Conditional { invert, needs_trailing_jump } => {
            let mut v = vec![0x85, 0xc0]; // test eax, eax (placeholder condition materialization)
            v.push(if invert { 0x74 } else { 0x75 }); // je/jne rel8 (placeholder short form)
            v.push(0x00);
            if needs_trailing_jump {
                v.push(0xe9);
                v.extend_from_slice(&0i32.to_le_bytes());
            }
            v
        }
    };
    let len = bytes.len();
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(at), len) };
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::sequencer::sequence_blocks;
    use crate::codegen::stencil::{MmapCodeAllocator, StencilLayout};

    struct NullStencils;
    impl StencilLibrary for NullStencils {
        fn layout(&self, _variant_ordinal: u32) -> StencilLayout {
            StencilLayout { fast_path_len: 1, slow_path_len: 0, data_sec_len: 0, data_sec_align: 1 }
        }
        fn emit(&self, _request: &EmitRequest, mut cursor: PatchCursor<'_>) -> (usize, usize, usize, usize) {
            if !cursor.fast_path.is_empty() {
                cursor.fast_path[0] = 0x90;
            }
            (1, 0, 0, 0)
        }
        fn entry_stub_layout(&self, _num_fixed_args: u16, _has_variadic_args: bool) -> StencilLayout {
            StencilLayout::default()
        }
        fn emit_entry_stub(&self, _num_fixed_args: u16, _has_variadic_args: bool, _cursor: PatchCursor<'_>) -> (usize, usize, usize, usize) {
            (0, 0, 0, 0)
        }
    }

    #[test]
    fn materializes_an_empty_graph_without_panicking() {
        let g = Graph::new(0, false);
        let order = sequence_blocks(&g);
        let blocks = vec![BlockArtifact { log: CodegenOpLog::new() }];
        let stencils = NullStencils;
        let allocator = MmapCodeAllocator;
        let result = materialize(&g, &order, &blocks, &stencils, &allocator, 0, 0, 0);
        assert!(result.is_ok());
    }
}
