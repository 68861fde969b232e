//! Virtual machine for BPF programs.
//!
//! Two interchangeable back-ends execute verified bytecode: a
//! decode-and-dispatch interpreter and, on x86_64, a template JIT. Both
//! obey the same entry contract (R1 = context pointer, R10 = scratch
//! stack top, every other register zero, result in R0) and produce
//! bit-equivalent results; the interpreter is the fallback whenever no
//! JIT image exists.

pub mod helpers;
pub mod interpreter;
pub mod jit;

use crate::mem::epoch;
use crate::prog::BpfProg;

/// Execute `prog` against a context buffer and return R0.
///
/// The epoch stays pinned for the whole execution, so interior map
/// pointers obtained through helpers remain valid until return.
///
/// # Safety
///
/// `ctx` must point to `ctx_len` readable and writable bytes (or be null
/// with `ctx_len == 0`), and `prog` must have been accepted by the
/// verifier. The structural checks do not prove the program's own memory
/// accesses safe.
pub unsafe fn exec(prog: &BpfProg, ctx: *mut u8, ctx_len: usize) -> u64 {
    // Each back-end pins exactly once; pinning twice on one thread could
    // deadlock against a queued synchronize().
    match prog.jit_image() {
        Some(image) => image.call(ctx, ctx_len, prog),
        None => {
            let guard = epoch::pin();
            interpreter::exec(prog, ctx, ctx_len, &guard)
        }
    }
}
