//! # BPF Runtime
//!
//! A userspace runtime for the restricted 64-bit eBPF instruction set:
//! programs are structurally verified, then interpreted or JIT-compiled,
//! and executed against bounded in-memory maps that both the host and
//! the running program may read and write.
//!
//! ## Quick Start
//!
//! ```rust
//! use bpf_runtime::core::types::*;
//! use bpf_runtime::prog::{BpfProg, BpfProgAttr, BpfProgType};
//! use bpf_runtime::verifier;
//!
//! // r0 = 42; exit
//! let insns = vec![
//!     BpfInsn::new(BPF_ALU64 | BPF_MOV | BPF_K, 0, 0, 0, 42),
//!     BpfInsn::new(BPF_JMP | BPF_EXIT, 0, 0, 0, 0),
//! ];
//!
//! verifier::verify(&insns).expect("program is admissible");
//!
//! let prog = BpfProg::new(&BpfProgAttr {
//!     prog_type: BpfProgType::Test,
//!     insns: &insns,
//! })
//! .unwrap();
//!
//! let ret = unsafe { prog.run(std::ptr::null_mut(), 0) };
//! assert_eq!(ret, 42);
//! ```
//!
//! ## Module Structure
//!
//! - [`core`]: instruction encoding, error definitions, logging, disassembly
//! - [`mem`]: the fixed-block allocator and the epoch capability
//! - [`maps`]: the map front-end and its array / hash-table backends
//! - [`prog`]: the program object and its attached-map table
//! - [`verifier`]: the structural admission check
//! - [`vm`]: the interpreter, the helper table and the x86_64 JIT

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Core types, error definitions, and basic utilities
pub mod core;

/// Memory management: block allocator and epoch capability
pub mod mem;

/// Maps: bounded key/value containers
pub mod maps;

/// Program objects
pub mod prog;

/// Structural program verifier
pub mod verifier;

/// Virtual machine: interpreter, helpers, JIT
pub mod vm;

// ============================================================================
// Prelude - commonly used re-exports
// ============================================================================

/// Commonly used types and traits
pub mod prelude {
    pub use crate::core::error::{BpfError, Result};
    pub use crate::core::types::BpfInsn;
    pub use crate::maps::{BpfMap, BpfMapAttr, BpfMapType, MapUpdateFlag};
    pub use crate::prog::{BpfProg, BpfProgAttr, BpfProgType};
    pub use crate::verifier::verify;
}

// Re-export error types at crate root for convenience
pub use crate::core::error::{BpfError, Result};
