//! External collaborator contracts (§6): the precompiled stencil
//! library and the JIT memory allocator. Both are traits so an embedder
//! can supply its own stencil set (generated ahead of time by a
//! separate build-time tool, out of scope here) and its own memory
//! allocation policy (process-wide allocator, shared pool, etc).

use crate::error::Result;
use crate::graph::NodeId;

/// Write cursors into each of the four output regions a stencil emit
/// function may write into. Every emitter may write up to 7 bytes past
/// its nominal end (the trailing pad in the JIT region layout exists to
/// absorb exactly this).
pub struct PatchCursor<'a> {
    pub fast_path: &'a mut [u8],
    pub slow_path: &'a mut [u8],
    pub data_sec: &'a mut [u8],
    pub slow_path_data: &'a mut [u8],
}

/// A stencil variant's fixed byte-length contribution to each section,
/// known at library-build time (before any node has been processed).
#[derive(Debug, Clone, Copy, Default)]
pub struct StencilLayout {
    pub fast_path_len: u32,
    pub slow_path_len: u32,
    pub data_sec_len: u32,
    pub data_sec_align: u32,
}

/// The operand/output placement a stencil emitter needs to pick the
/// right addressing mode for each physical slot.
#[derive(Debug, Clone)]
pub struct EmitRequest {
    pub node: NodeId,
    pub variant_ordinal: u32,
    pub operands: Vec<crate::codegen::log::PhysicalSlot>,
    pub output: Option<crate::codegen::log::PhysicalSlot>,
    pub branch_decision: Option<crate::codegen::log::PhysicalSlot>,
    pub literal_data: Vec<u8>,
}

/// Precompiled machine-code stencils the backend stitches together.
/// Implementors are generated ahead of time; this crate only consumes
/// the trait.
pub trait StencilLibrary {
    fn layout(&self, variant_ordinal: u32) -> StencilLayout;

    /// Writes `request`'s stencil into `cursor`, advancing each of
    /// `cursor`'s four slices by however many bytes were written
    /// (returned as `(fast, slow, data, slow_path_data)`).
    fn emit(&self, request: &EmitRequest, cursor: PatchCursor<'_>) -> (usize, usize, usize, usize);

    /// Layout and emitter for the function-entry stub, selected by
    /// `(num_fixed_args, has_variadic_args)`.
    fn entry_stub_layout(&self, num_fixed_args: u16, has_variadic_args: bool) -> StencilLayout;
    fn emit_entry_stub(&self, num_fixed_args: u16, has_variadic_args: bool, cursor: PatchCursor<'_>) -> (usize, usize, usize, usize);
}

/// JIT executable memory allocator. `alloc` hands out a zeroed,
/// writable region; `make_executable` flips it to read/execute once
/// C10 has finished writing, matching the W^X discipline a real JIT
/// must follow. No `free` exists in this path: the backend never
/// reclaims JIT memory once a `DfgCodeBlock` is live.
pub trait JitCodeAllocator {
    /// # Safety
    /// The returned pointer is valid for `size` bytes, writable, and
    /// not executable until `make_executable` is called on it.
    unsafe fn alloc(&self, size: usize) -> Result<*mut u8>;

    /// # Safety
    /// `ptr`/`size` must be the exact pair returned by a prior `alloc`
    /// call on `self`, and no other reference to the region may be
    /// live when this is called.
    unsafe fn make_executable(&self, ptr: *mut u8, size: usize) -> Result<()>;
}

/// Default `JitCodeAllocator` backed by `mmap`/`mprotect` (C14).
pub struct MmapCodeAllocator;

impl JitCodeAllocator for MmapCodeAllocator {
    unsafe fn alloc(&self, size: usize) -> Result<*mut u8> {
        let ptr = libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if ptr == libc::MAP_FAILED {
            return Err(crate::error::DfgBackendError::JitAllocation { requested: size });
        }
        log::trace!("mmap'd {size} bytes of JIT memory at {ptr:p}");
        Ok(ptr as *mut u8)
    }

    unsafe fn make_executable(&self, ptr: *mut u8, size: usize) -> Result<()> {
        let rc = libc::mprotect(ptr as *mut libc::c_void, size, libc::PROT_READ | libc::PROT_EXEC);
        if rc != 0 {
            return Err(crate::error::DfgBackendError::JitAllocation { requested: size });
        }
        Ok(())
    }
}

/// Tracks one `mmap`-backed region so it can be unmapped on drop. The
/// allocator trait itself is stateless (pure syscall wrapper); this
/// wrapper is what `DfgCodeBlock` actually holds onto.
pub struct MappedJitRegion {
    ptr: *mut u8,
    size: usize,
}

impl MappedJitRegion {
    /// # Safety
    /// `ptr`/`size` must describe a live `mmap` region this struct now
    /// takes exclusive ownership of.
    pub unsafe fn new(ptr: *mut u8, size: usize) -> MappedJitRegion {
        MappedJitRegion { ptr, size }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl Drop for MappedJitRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
    }
}

// Raw JIT bytes are only ever written by the compile invocation that
// owns this region; once `compile_graph` returns, nothing further
// mutates them, so it is sound to share the region across threads.
unsafe impl Send for MappedJitRegion {}
unsafe impl Sync for MappedJitRegion {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmap_allocator_round_trips() {
        let alloc = MmapCodeAllocator;
        unsafe {
            let ptr = alloc.alloc(4096).expect("mmap should succeed for a small region");
            std::ptr::write_bytes(ptr, 0xcc, 4096);
            alloc.make_executable(ptr, 4096).expect("mprotect should succeed");
            let region = MappedJitRegion::new(ptr, 4096);
            assert_eq!(region.len(), 4096);
        }
    }
}
