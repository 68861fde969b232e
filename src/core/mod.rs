//! Core types and constants for the BPF runtime.
//!
//! This module contains fundamental types, error definitions, logging,
//! instruction representations, and disassembly used throughout the runtime.

pub mod disasm;
pub mod error;
pub mod log;
pub mod types;

pub use disasm::*;
pub use error::*;
pub use log::*;
pub use types::*;
