//! Basic-block sequencing and terminator emission (C9).

pub mod sequencer;

pub use sequencer::{BlockOrder, Terminator};
