//! Error types for the DFG backend core.
//!
//! There are no recoverable errors in steady-state compilation of a
//! well-formed graph: a malformed graph or an exhausted external resource
//! is reported here, while a violated internal invariant panics (dense
//! `debug_assert!`s in test builds, bare structural `assert!`s in release).

use thiserror::Error;

/// Every fallible outcome the public entry point can return.
#[derive(Debug, Error)]
pub enum DfgBackendError {
    #[error("type-mask automata would exceed the node/size cap ({node_count} nodes, cap {cap})")]
    AutomataTooLarge { node_count: usize, cap: usize },

    #[error("automata edge offset {offset} does not fit in 16 bits")]
    OffsetOverflow { offset: i64 },

    #[error("JIT memory allocation of {requested} bytes failed")]
    JitAllocation { requested: usize },

    #[error("stack frame slot count {slots} exceeds 16-bit range")]
    StackOverflow { slots: usize },
}

pub type Result<T> = std::result::Result<T, DfgBackendError>;
