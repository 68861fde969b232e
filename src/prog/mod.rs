//! Program objects
//!
//! A program binds verified bytecode, its type, the maps it may reach
//! through helper calls, and an optional JIT image into one loadable
//! unit. Bytecode refers to attached maps by slot index, never by raw
//! pointer, so the instruction stream stays position-independent.

use std::sync::Arc;

use crate::core::error::{BpfError, Result};
use crate::core::types::{BpfInsn, MAX_ATTACHED_MAPS, MAX_INSNS};
use crate::maps::BpfMap;
use crate::vm::jit::JitImage;

/// The closed set of program types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BpfProgType {
    /// Test programs: run against a caller-supplied context buffer
    Test,
}

/// Per-type behavior resolved at init.
///
/// Test programs have no attach or detach hooks, so the record carries
/// the type name and whether the map helpers are available.
#[derive(Debug)]
pub struct ProgTypeOps {
    /// Human-readable type name
    pub name: &'static str,
    /// Whether the map helper family is callable
    pub map_helpers: bool,
}

static TEST_PROG_OPS: ProgTypeOps = ProgTypeOps {
    name: "TEST",
    map_helpers: true,
};

impl BpfProgType {
    /// Resolve the per-type behavior record.
    pub fn ops(&self) -> &'static ProgTypeOps {
        match self {
            BpfProgType::Test => &TEST_PROG_OPS,
        }
    }

    /// Human-readable type name
    pub fn name(&self) -> &'static str {
        self.ops().name
    }
}

/// Program construction attributes.
#[derive(Debug, Clone, Copy)]
pub struct BpfProgAttr<'a> {
    /// Program type
    pub prog_type: BpfProgType,
    /// Instructions, copied into the program at init
    pub insns: &'a [BpfInsn],
}

/// A loadable program: owned bytecode, type, attached maps, optional JIT
/// image.
pub struct BpfProg {
    prog_type: BpfProgType,
    ops: &'static ProgTypeOps,
    insns: Box<[BpfInsn]>,
    maps: [Option<Arc<BpfMap>>; MAX_ATTACHED_MAPS],
    jit: Option<JitImage>,
}

impl BpfProg {
    /// Validate `attr` and build the program.
    ///
    /// The instruction vector must be non-empty and at most [`MAX_INSNS`]
    /// long; it is copied into an owned buffer. Two inits from equal
    /// attrs yield programs with equal bytecode and type.
    pub fn new(attr: &BpfProgAttr<'_>) -> Result<Self> {
        if attr.insns.is_empty() {
            return Err(BpfError::EmptyProgram);
        }
        if attr.insns.len() > MAX_INSNS {
            return Err(BpfError::ProgramTooLarge(attr.insns.len()));
        }

        const NO_MAP: Option<Arc<BpfMap>> = None;
        Ok(Self {
            prog_type: attr.prog_type,
            ops: attr.prog_type.ops(),
            insns: attr.insns.to_vec().into_boxed_slice(),
            maps: [NO_MAP; MAX_ATTACHED_MAPS],
            jit: None,
        })
    }

    /// Program type
    pub fn prog_type(&self) -> BpfProgType {
        self.prog_type
    }

    /// Per-type behavior record
    pub fn ops(&self) -> &'static ProgTypeOps {
        self.ops
    }

    /// The owned instruction vector
    pub fn insns(&self) -> &[BpfInsn] {
        &self.insns
    }

    /// Bind `map` into `slot`.
    ///
    /// Fails with invalid-argument on an out-of-range slot and with
    /// exists-error when the slot is already bound.
    pub fn attach_map(&mut self, slot: u32, map: Arc<BpfMap>) -> Result<()> {
        let idx = slot as usize;
        if idx >= MAX_ATTACHED_MAPS {
            return Err(BpfError::InvalidSlot(slot));
        }
        if self.maps[idx].is_some() {
            return Err(BpfError::SlotInUse(slot));
        }
        self.maps[idx] = Some(map);
        Ok(())
    }

    /// The map bound to `slot`, if any.
    pub fn map_at(&self, slot: u32) -> Option<&Arc<BpfMap>> {
        self.maps.get(slot as usize).and_then(|m| m.as_ref())
    }

    /// Compile this program to native code.
    ///
    /// On success subsequent [`Self::run`] calls use the image. Errors
    /// leave the interpreter in charge; the two back-ends are
    /// interchangeable.
    pub fn jit_compile(&mut self) -> Result<()> {
        let image = crate::vm::jit::compile(self)?;
        self.jit = Some(image);
        Ok(())
    }

    /// The JIT image, when one has been compiled.
    pub fn jit_image(&self) -> Option<&JitImage> {
        self.jit.as_ref()
    }

    /// Execute against a context buffer; returns R0.
    ///
    /// # Safety
    ///
    /// `ctx` must point to `ctx_len` readable and writable bytes (or be
    /// null with `ctx_len == 0`), and the program must have been accepted
    /// by the verifier. The structural checks do not prove memory safety
    /// of the program's own pointer arithmetic.
    pub unsafe fn run(&self, ctx: *mut u8, ctx_len: usize) -> u64 {
        crate::vm::exec(self, ctx, ctx_len)
    }
}

impl std::fmt::Debug for BpfProg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpfProg")
            .field("type", &self.prog_type.name())
            .field("insns", &self.insns.len())
            .field("attached_maps", &self.maps.iter().filter(|m| m.is_some()).count())
            .field("jit", &self.jit.is_some())
            .finish()
    }
}
