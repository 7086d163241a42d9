//! Code emission: the operation log (C7), the stencil/allocator
//! collaborator traits (§6), and the per-node emission driver (C8).

pub mod log;
pub mod node_processor;
pub mod stencil;

pub use log::{CodegenOpLog, LogEntry};
pub use stencil::{JitCodeAllocator, PatchCursor, StencilLibrary};
