// SPDX-License-Identifier: GPL-2.0

//! Error types for the BPF runtime

use core::fmt;

/// Result type alias for runtime operations
pub type Result<T> = core::result::Result<T, BpfError>;

/// Errors surfaced by program loading, map operations and the JIT.
///
/// Variants carry the detail a diagnostic needs; [`BpfError::to_errno`]
/// collapses them onto the errno-style codes the control plane reports.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BpfError {
    // invalid-argument family
    EmptyProgram,
    ProgramTooLarge(usize),
    MissingExit,
    JumpOutOfRange { pc: usize, target: i64, len: usize },
    JumpIntoLddw { pc: usize, target: usize },
    TruncatedLddw(usize),
    MalformedLddwPair(usize),
    InvalidRegister { pc: usize, reg: u8 },
    FramePointerWrite(usize),
    DivisionByZeroImm(usize),
    UnknownOpcode { pc: usize, code: u8 },
    UnknownHelper { pc: usize, id: i32 },
    InvalidKeySize(u32),
    InvalidValueSize(u32),
    InvalidMaxEntries,
    InvalidFlags(u32),
    InvalidSlot(u32),
    InvalidBlockSize(usize),
    InvalidKey,
    KeyOutOfRange(u32),

    // map operation outcomes
    NotFound,
    AlreadyExists,
    SlotInUse(u32),
    NoCapacity,
    OutOfMemory,
    PermissionDenied,

    // JIT: not user-visible through exec, triggers interpreter fall-back
    JitUnsupported(&'static str),
    JitUnavailable,
}

impl fmt::Display for BpfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BpfError::EmptyProgram => write!(f, "empty program"),
            BpfError::ProgramTooLarge(n) => write!(f, "program too large: {} instructions", n),
            BpfError::MissingExit => write!(f, "last instruction is not EXIT"),
            BpfError::JumpOutOfRange { pc, target, len } => {
                write!(f, "jump out of range at {}: target {}, prog_len {}", pc, target, len)
            }
            BpfError::JumpIntoLddw { pc, target } => {
                write!(f, "jump at {} lands inside LD_IMM64 pair at {}", pc, target)
            }
            BpfError::TruncatedLddw(pc) => write!(f, "LD_IMM64 at {} missing second slot", pc),
            BpfError::MalformedLddwPair(pc) => {
                write!(f, "LD_IMM64 at {} has non-zero second slot fields", pc)
            }
            BpfError::InvalidRegister { pc, reg } => {
                write!(f, "invalid register r{} at {}", reg, pc)
            }
            BpfError::FramePointerWrite(pc) => write!(f, "write to frame pointer at {}", pc),
            BpfError::DivisionByZeroImm(pc) => {
                write!(f, "division by zero immediate at {}", pc)
            }
            BpfError::UnknownOpcode { pc, code } => {
                write!(f, "unknown opcode {:#04x} at {}", code, pc)
            }
            BpfError::UnknownHelper { pc, id } => write!(f, "unknown helper {} at {}", id, pc),
            BpfError::InvalidKeySize(n) => write!(f, "invalid key size {}", n),
            BpfError::InvalidValueSize(n) => write!(f, "invalid value size {}", n),
            BpfError::InvalidMaxEntries => write!(f, "max_entries must be non-zero"),
            BpfError::InvalidFlags(bits) => write!(f, "unknown map flags {:#x}", bits),
            BpfError::InvalidSlot(slot) => write!(f, "map slot {} out of range", slot),
            BpfError::InvalidBlockSize(n) => write!(f, "invalid block size {}", n),
            BpfError::InvalidKey => write!(f, "key does not match map key size"),
            BpfError::KeyOutOfRange(idx) => write!(f, "index {} past max_entries", idx),
            BpfError::NotFound => write!(f, "no such element"),
            BpfError::AlreadyExists => write!(f, "element already exists"),
            BpfError::SlotInUse(slot) => write!(f, "map slot {} already bound", slot),
            BpfError::NoCapacity => write!(f, "map is at max_entries"),
            BpfError::OutOfMemory => write!(f, "out of memory"),
            BpfError::PermissionDenied => write!(f, "permission denied"),
            BpfError::JitUnsupported(what) => write!(f, "JIT: unsupported instruction: {}", what),
            BpfError::JitUnavailable => write!(f, "JIT unavailable on this target"),
        }
    }
}

impl std::error::Error for BpfError {}

impl BpfError {
    /// Convert to a negative errno value.
    ///
    /// These correspond to the errno codes the C control plane reports:
    /// - EINVAL (22): invalid argument
    /// - ENOENT (2): no such element
    /// - EEXIST (17): element exists
    /// - EBUSY (16): capacity exhausted
    /// - ENOMEM (12): out of memory
    /// - EPERM (1): permission denied (reserved)
    pub fn to_errno(&self) -> i64 {
        match self {
            BpfError::NotFound => -2,                                // ENOENT
            BpfError::AlreadyExists | BpfError::SlotInUse(_) => -17, // EEXIST
            BpfError::NoCapacity => -16,                             // EBUSY
            BpfError::OutOfMemory => -12,                            // ENOMEM
            BpfError::PermissionDenied => -1,                        // EPERM

            // All other errors are EINVAL
            _ => -22, // EINVAL
        }
    }
}
