//! The compiled artifact (§6 "Output"): `DfgCodeBlock` and the
//! executable memory it owns.

use crate::codegen::stencil::MappedJitRegion;

/// One variable-size SlowPathData record per JIT'd node, used by a slow
/// path or an OSR exit to recover register/stack state without
/// consulting the (by then discarded) compile-time log.
#[derive(Debug, Clone, Default)]
pub struct SlowPathDataStream {
    pub bytes: Vec<u8>,
}

/// The executable JIT memory backing a `DfgCodeBlock`, laid out as
/// `[data section][16-byte gap][fast path][7-byte pad][slow path][7-byte pad]`.
pub struct ExecutableCode {
    region: MappedJitRegion,
    pub data_sec_len: u32,
    pub fast_path_offset: u32,
    pub fast_path_len: u32,
    pub slow_path_offset: u32,
    pub slow_path_len: u32,
}

impl ExecutableCode {
    pub fn new(region: MappedJitRegion, data_sec_len: u32, fast_path_offset: u32, fast_path_len: u32, slow_path_offset: u32, slow_path_len: u32) -> ExecutableCode {
        ExecutableCode { region, data_sec_len, fast_path_offset, fast_path_len, slow_path_offset, slow_path_len }
    }

    pub fn entry_ptr(&self) -> *const u8 {
        unsafe { self.region.as_ptr().add(self.fast_path_offset as usize) }
    }

    pub fn region_len(&self) -> usize {
        self.region.len()
    }
}

// Mirrors the source's `unsafe impl Send + Sync for ExecutableCode`: the
// bytes are only ever written by the compile invocation that produced
// them; once `compile_graph` returns, nothing mutates the region again.
unsafe impl Send for ExecutableCode {}
unsafe impl Sync for ExecutableCode {}

/// Header fields plus the constant table and SlowPathData stream: the
/// single owned object `compile_graph` returns.
pub struct DfgCodeBlock {
    pub global_object_ptr: usize,
    pub stack_frame_num_slots: u32,
    pub stack_reg_spill_region_slot: u32,
    pub constant_table: Vec<i64>,
    pub slow_path_data: SlowPathDataStream,
    pub executable: ExecutableCode,
}

impl DfgCodeBlock {
    pub fn entry_ptr(&self) -> *const u8 {
        self.executable.entry_ptr()
    }
}

unsafe impl Send for DfgCodeBlock {}
unsafe impl Sync for DfgCodeBlock {}
