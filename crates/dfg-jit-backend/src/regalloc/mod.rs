//! Register allocation: the use-list builder (C4), the per-bank
//! allocator (C5), and the cross-bank value manager (C6).

pub mod bank;
pub mod use_list;
pub mod value_manager;

pub use bank::RegisterBankAllocator;
pub use use_list::{BlockUseList, NodeRegAllocInfo, RegBank, ValueUseRaInfo};
pub use value_manager::ValueManager;

/// Physical register index within one bank (0-based, bank-relative).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegIdx(pub u8);

/// A frame-relative spill slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpillSlot(pub u32);
