//! x86_64 template JIT
//!
//! Translates verified bytecode into native code obeying the same entry
//! contract as the interpreter, one template per instruction, with a
//! two-pass fixup for branch targets. BPF registers live in hardware
//! registers; the mapping keeps helper arguments R1..R5 in the SysV
//! argument registers so a CALL collapses to a single native call.
//!
//! The emitted function counts instructions in a counter slot below the
//! scratch stack and aborts with R0 = 0 at the same instruction the
//! interpreter would, keeping the back-ends bit-equivalent.

use crate::core::error::Result;
use crate::mem::epoch::EpochGuard;
use crate::prog::BpfProg;

/// Everything a helper shim needs from the calling execution.
#[repr(C)]
pub(crate) struct JitCtx<'a> {
    pub(crate) prog: &'a BpfProg,
    pub(crate) guard: &'a EpochGuard,
}

/// An owned executable mapping plus its entry point.
pub struct JitImage {
    #[cfg(target_arch = "x86_64")]
    inner: x86_64::Image,
    #[cfg(not(target_arch = "x86_64"))]
    never: std::convert::Infallible,
}

// The mapping is immutable and position-independent once protected.
unsafe impl Send for JitImage {}
unsafe impl Sync for JitImage {}

impl JitImage {
    /// Size of the native code in bytes.
    pub fn code_len(&self) -> usize {
        #[cfg(target_arch = "x86_64")]
        {
            self.inner.code_len
        }
        #[cfg(not(target_arch = "x86_64"))]
        match self.never {}
    }

    /// Run the image. Entry contract and safety requirements match
    /// [`crate::vm::exec`].
    pub(crate) unsafe fn call(&self, ctx: *mut u8, ctx_len: usize, prog: &BpfProg) -> u64 {
        #[cfg(target_arch = "x86_64")]
        {
            let guard = crate::mem::epoch::pin();
            let jctx = JitCtx { prog, guard: &guard };
            (self.inner.entry)(ctx, ctx_len as u64, &jctx)
        }
        #[cfg(not(target_arch = "x86_64"))]
        match self.never {}
    }
}

/// Compile `prog` to native code.
///
/// Fails with `JitUnavailable` off x86_64 and `JitUnsupported` for
/// instructions without a template; the caller then stays on the
/// interpreter.
pub fn compile(prog: &BpfProg) -> Result<JitImage> {
    #[cfg(target_arch = "x86_64")]
    {
        Ok(JitImage {
            inner: x86_64::compile(prog)?,
        })
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = prog;
        Err(crate::core::error::BpfError::JitUnavailable)
    }
}

#[cfg(target_arch = "x86_64")]
mod x86_64 {
    use super::JitCtx;
    use crate::core::error::{BpfError, Result};
    use crate::core::types::*;
    use crate::vm::helpers;

    /// BPF register → hardware register. R1..R5 land in the SysV
    /// argument registers rdi/rsi/rdx/rcx/r8; R6..R9 in callee-saved
    /// registers; R0 in rax; R10 in rbp.
    const REG_MAP: [u8; MAX_BPF_REG] = [
        0,  // R0  -> rax
        7,  // R1  -> rdi
        6,  // R2  -> rsi
        2,  // R3  -> rdx
        1,  // R4  -> rcx
        8,  // R5  -> r8
        3,  // R6  -> rbx
        13, // R7  -> r13
        14, // R8  -> r14
        15, // R9  -> r15
        5,  // R10 -> rbp
    ];

    /// Scratch register for templates, never holds BPF state.
    const R11: u8 = 11;
    /// Holds the `JitCtx` pointer across the whole execution.
    const R12: u8 = 12;

    const RAX: u8 = 0;
    const RCX: u8 = 1;
    const RDX: u8 = 2;
    const RSP: u8 = 4;
    const R9: u8 = 9;

    /// Frame: [rsp] counter, [rsp+8 .. rsp+8+512) BPF stack, rbp one
    /// past the top.
    const FRAME: i32 = 8 + BPF_STACK_SIZE as i32;

    /// Pseudo-pc jump destinations resolved in the fixup pass.
    const TARGET_EXIT: isize = -1;
    const TARGET_LIMIT: isize = -2;

    type Entry = unsafe extern "C" fn(*mut u8, u64, *const JitCtx<'_>) -> u64;

    pub(super) struct Image {
        map: *mut u8,
        map_len: usize,
        pub(super) code_len: usize,
        pub(super) entry: Entry,
    }

    impl Drop for Image {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.map as *mut libc::c_void, self.map_len);
            }
        }
    }

    struct Jump {
        at: usize,
        target_pc: isize,
    }

    struct Emitter {
        code: Vec<u8>,
        /// Native offset of each BPF instruction's template
        pc_offsets: Vec<usize>,
        jumps: Vec<Jump>,
        exit_offset: usize,
        limit_offset: usize,
    }

    impl Emitter {
        fn new(ninsns: usize) -> Self {
            Self {
                code: Vec::with_capacity(ninsns * 16 + 128),
                pc_offsets: vec![0; ninsns],
                jumps: Vec::new(),
                exit_offset: 0,
                limit_offset: 0,
            }
        }

        fn emit1(&mut self, byte: u8) {
            self.code.push(byte);
        }

        fn emit(&mut self, bytes: &[u8]) {
            self.code.extend_from_slice(bytes);
        }

        fn emit_u32(&mut self, v: u32) {
            self.emit(&v.to_le_bytes());
        }

        fn emit_u64(&mut self, v: u64) {
            self.emit(&v.to_le_bytes());
        }

        /// REX prefix; emitted only when required.
        fn rex_opt(&mut self, w: bool, reg: u8, rm: u8) {
            let rex = 0x40 | (w as u8) << 3 | ((reg >> 3) & 1) << 2 | ((rm >> 3) & 1);
            if rex != 0x40 {
                self.emit1(rex);
            }
        }

        fn rex(&mut self, w: bool, reg: u8, rm: u8) {
            self.emit1(0x40 | (w as u8) << 3 | ((reg >> 3) & 1) << 2 | ((rm >> 3) & 1));
        }

        fn modrm_reg(&mut self, reg: u8, rm: u8) {
            self.emit1(0xc0 | (reg & 7) << 3 | (rm & 7));
        }

        /// ModRM for [base + disp32]. No BPF register maps to rsp or
        /// r12, so no SIB byte is ever needed.
        fn modrm_disp(&mut self, reg: u8, base: u8, disp: i32) {
            self.emit1(0x80 | (reg & 7) << 3 | (base & 7));
            self.emit_u32(disp as u32);
        }

        /// Two-byte ALU op, register form: `opcode r/m, reg`.
        fn alu_reg(&mut self, w: bool, opcode: u8, src: u8, dst: u8) {
            self.rex_opt(w, src, dst);
            self.emit1(opcode);
            self.modrm_reg(src, dst);
        }

        /// Group-1 ALU with immediate: `0x81 /ext r/m, imm32`.
        fn alu_imm(&mut self, w: bool, ext: u8, dst: u8, imm: i32) {
            self.rex_opt(w, 0, dst);
            self.emit1(0x81);
            self.modrm_reg(ext, dst);
            self.emit_u32(imm as u32);
        }

        fn mov_reg(&mut self, w: bool, src: u8, dst: u8) {
            self.alu_reg(w, 0x89, src, dst);
        }

        /// `mov r64, imm64`
        fn mov_imm64(&mut self, dst: u8, imm: u64) {
            self.rex(true, 0, dst);
            self.emit1(0xb8 | (dst & 7));
            self.emit_u64(imm);
        }

        /// `mov r/m64, imm32` (sign-extends) or `mov r32, imm32`.
        fn mov_imm32(&mut self, w: bool, dst: u8, imm: i32) {
            self.rex_opt(w, 0, dst);
            self.emit1(0xc7);
            self.modrm_reg(0, dst);
            self.emit_u32(imm as u32);
        }

        fn push(&mut self, reg: u8) {
            self.rex_opt(false, 0, reg);
            self.emit1(0x50 | (reg & 7));
        }

        fn pop(&mut self, reg: u8) {
            self.rex_opt(false, 0, reg);
            self.emit1(0x58 | (reg & 7));
        }

        /// Conditional jump to a BPF pc (or pseudo target), patched later.
        fn jcc_pc(&mut self, cc: u8, target_pc: isize) {
            self.emit(&[0x0f, cc]);
            self.jumps.push(Jump {
                at: self.code.len(),
                target_pc,
            });
            self.emit_u32(0);
        }

        /// Unconditional jump to a BPF pc (or pseudo target).
        fn jmp_pc(&mut self, target_pc: isize) {
            self.emit1(0xe9);
            self.jumps.push(Jump {
                at: self.code.len(),
                target_pc,
            });
            self.emit_u32(0);
        }

        /// Conditional jump over a local stretch; returns the patch site.
        fn jcc_local(&mut self, cc: u8) -> usize {
            self.emit(&[0x0f, cc]);
            let at = self.code.len();
            self.emit_u32(0);
            at
        }

        fn jmp_local(&mut self) -> usize {
            self.emit1(0xe9);
            let at = self.code.len();
            self.emit_u32(0);
            at
        }

        /// Point a local jump at the current position.
        fn patch_local(&mut self, at: usize) {
            let rel = (self.code.len() - (at + 4)) as u32;
            self.code[at..at + 4].copy_from_slice(&rel.to_le_bytes());
        }

        fn resolve_jumps(&mut self) -> Result<()> {
            for jump in &self.jumps {
                let dest = match jump.target_pc {
                    TARGET_EXIT => self.exit_offset,
                    TARGET_LIMIT => self.limit_offset,
                    pc => self.pc_offsets[pc as usize],
                };
                let rel = dest as i64 - (jump.at as i64 + 4);
                let rel = i32::try_from(rel)
                    .map_err(|_| BpfError::JitUnsupported("branch displacement"))?;
                self.code[jump.at..jump.at + 4].copy_from_slice(&rel.to_le_bytes());
            }
            Ok(())
        }
    }

    fn condition_code(op: u8) -> u8 {
        match op {
            BPF_JEQ => 0x84,  // je
            BPF_JNE => 0x85,  // jne
            BPF_JGT => 0x87,  // ja
            BPF_JGE => 0x83,  // jae
            BPF_JLT => 0x82,  // jb
            BPF_JLE => 0x86,  // jbe
            BPF_JSGT => 0x8f, // jg
            BPF_JSGE => 0x8d, // jge
            BPF_JSLT => 0x8c, // jl
            BPF_JSLE => 0x8e, // jle
            _ => 0x85,        // JSET: jne after test
        }
    }

    /// Group-1 /ext selectors for the BPF ALU ops that map directly.
    fn alu_ext(op: u8) -> Option<u8> {
        match op {
            BPF_ADD => Some(0),
            BPF_OR => Some(1),
            BPF_AND => Some(4),
            BPF_SUB => Some(5),
            BPF_XOR => Some(6),
            _ => None,
        }
    }

    /// Register-form opcodes for the same ops.
    fn alu_opcode(op: u8) -> Option<u8> {
        match op {
            BPF_ADD => Some(0x01),
            BPF_OR => Some(0x09),
            BPF_AND => Some(0x21),
            BPF_SUB => Some(0x29),
            BPF_XOR => Some(0x31),
            _ => None,
        }
    }

    pub(super) fn compile(prog: &crate::prog::BpfProg) -> Result<Image> {
        let insns = prog.insns();

        // The templates rely on the structural invariants (register
        // ranges, LD_IMM64 pairing, in-range branch targets).
        crate::verifier::verify(insns)?;

        let mut e = Emitter::new(insns.len());

        emit_prologue(&mut e);

        let mut pc = 0;
        while pc < insns.len() {
            e.pc_offsets[pc] = e.code.len();
            let insn = &insns[pc];

            // Instruction budget: abort once the counter goes negative,
            // exactly where the interpreter gives up.
            e.emit(&[0x48, 0x83, 0x2c, 0x24, 0x01]); // sub qword [rsp], 1
            e.jcc_pc(0x88, TARGET_LIMIT); // js

            if insn.is_lddw() {
                let hi = insns[pc + 1].imm as u32 as u64;
                let imm = insn.imm as u32 as u64 | (hi << 32);
                e.mov_imm64(REG_MAP[insn.dst_reg as usize], imm);
                pc += 2;
                continue;
            }

            emit_insn(&mut e, insn, pc)?;
            pc += 1;
        }

        emit_epilogue(&mut e);
        e.resolve_jumps()?;

        finalize(e.code)
    }

    fn emit_prologue(e: &mut Emitter) {
        for reg in [5u8, 3, 12, 13, 14, 15] {
            e.push(reg);
        }
        e.alu_imm(true, 5, RSP, FRAME); // sub rsp, FRAME

        // JitCtx pointer out of the way of BPF R3
        e.mov_reg(true, RDX, R12);

        // instruction budget at [rsp]
        e.mov_imm64(RAX, INSN_EXEC_LIMIT);
        e.rex(true, RAX, RSP);
        e.emit1(0x89); // mov [rsp], rax
        e.emit1(0x04);
        e.emit1(0x24);

        // R10 = one past the top of the scratch stack
        e.rex(true, 5, RSP);
        e.emit1(0x8d); // lea rbp, [rsp + FRAME - ...]
        e.emit1(0xac);
        e.emit1(0x24);
        e.emit_u32(FRAME as u32);

        // R1 arrived in rdi; every other register starts zero (rsi held
        // the length argument, which is not a register).
        for bpf_reg in [0usize, 2, 3, 4, 5, 6, 7, 8, 9] {
            let hw = REG_MAP[bpf_reg];
            e.alu_reg(false, 0x31, hw, hw); // xor r32, r32
        }
    }

    fn emit_epilogue(e: &mut Emitter) {
        // Abort path: R0 = 0, fall through into the exit path.
        e.limit_offset = e.code.len();
        e.alu_reg(false, 0x31, RAX, RAX);

        e.exit_offset = e.code.len();
        e.alu_imm(true, 0, RSP, FRAME); // add rsp, FRAME
        for reg in [15u8, 14, 13, 12, 3, 5] {
            e.pop(reg);
        }
        e.emit1(0xc3); // ret
    }

    fn emit_insn(e: &mut Emitter, insn: &BpfInsn, pc: usize) -> Result<()> {
        let dst = REG_MAP[insn.dst_reg as usize];
        let src = REG_MAP[insn.src_reg as usize];

        match insn.class() {
            BPF_ALU64 => emit_alu(e, insn, true, dst, src),
            BPF_ALU => {
                if insn.op() == BPF_END {
                    emit_endian(e, insn, dst);
                    Ok(())
                } else {
                    emit_alu(e, insn, false, dst, src)
                }
            }
            BPF_LDX => {
                emit_load(e, insn, dst, src);
                Ok(())
            }
            BPF_ST | BPF_STX => {
                emit_store(e, insn, dst, src);
                Ok(())
            }
            BPF_JMP => emit_jmp(e, insn, pc, dst, src),
            _ => Err(BpfError::JitUnsupported("instruction class")),
        }
    }

    fn emit_alu(e: &mut Emitter, insn: &BpfInsn, w: bool, dst: u8, src: u8) -> Result<()> {
        let op = insn.op();
        let is_reg = insn.src() == BPF_X;

        if let (Some(opcode), Some(ext)) = (alu_opcode(op), alu_ext(op)) {
            if is_reg {
                e.alu_reg(w, opcode, src, dst);
            } else {
                e.alu_imm(w, ext, dst, insn.imm);
            }
            return Ok(());
        }

        match op {
            BPF_MOV => {
                if is_reg {
                    e.mov_reg(w, src, dst);
                } else {
                    e.mov_imm32(w, dst, insn.imm);
                }
            }
            BPF_NEG => {
                e.rex_opt(w, 0, dst);
                e.emit1(0xf7);
                e.modrm_reg(3, dst);
            }
            BPF_MUL => {
                if is_reg {
                    e.rex_opt(w, dst, src);
                    e.emit(&[0x0f, 0xaf]); // imul dst, src
                    e.modrm_reg(dst, src);
                } else {
                    e.rex_opt(w, dst, dst);
                    e.emit1(0x69); // imul dst, dst, imm32
                    e.modrm_reg(dst, dst);
                    e.emit_u32(insn.imm as u32);
                }
            }
            BPF_DIV | BPF_MOD => emit_div_mod(e, insn, w, dst, src),
            BPF_LSH | BPF_RSH | BPF_ARSH => emit_shift(e, insn, w, dst, src),
            _ => return Err(BpfError::JitUnsupported("alu op")),
        }
        Ok(())
    }

    /// Division and modulo with the runtime-zero semantics the
    /// interpreter defines: quotient 0, remainder = dividend.
    fn emit_div_mod(e: &mut Emitter, insn: &BpfInsn, w: bool, dst: u8, src: u8) {
        let is_mod = insn.op() == BPF_MOD;

        // divisor -> r11, widened the way the interpreter widens the
        // immediate (sign-extend for 64-bit, zero-extend for 32-bit)
        if insn.src() == BPF_X {
            e.mov_reg(true, src, R11);
        } else {
            e.mov_imm32(w, R11, insn.imm);
        }

        e.push(RAX);
        e.push(RDX);
        e.mov_reg(true, dst, RAX);

        // test r11, r11 (width matters for the 32-bit variant)
        e.rex_opt(w, R11, R11);
        e.emit1(0x85);
        e.modrm_reg(R11, R11);
        let zero = e.jcc_local(0x84); // je

        e.alu_reg(false, 0x31, RDX, RDX); // xor edx, edx
        e.rex_opt(w, 0, R11);
        e.emit1(0xf7); // div r11
        e.modrm_reg(6, R11);
        let result = if is_mod { RDX } else { RAX };
        e.mov_reg(true, result, R11);
        let done = e.jmp_local();

        e.patch_local(zero);
        if is_mod {
            e.mov_reg(true, RAX, R11); // remainder: the dividend
        } else {
            e.alu_reg(false, 0x31, R11, R11); // quotient: zero
        }

        e.patch_local(done);
        e.pop(RDX);
        e.pop(RAX);
        if w {
            e.mov_reg(true, R11, dst);
        } else {
            e.mov_reg(false, R11, dst); // 32-bit write zero-extends
        }
    }

    fn emit_shift(e: &mut Emitter, insn: &BpfInsn, w: bool, dst: u8, src: u8) {
        let ext = match insn.op() {
            BPF_LSH => 4,
            BPF_RSH => 5,
            _ => 7, // BPF_ARSH: sar
        };

        if insn.src() == BPF_K {
            // The hardware masks the count exactly as the ISA does.
            e.rex_opt(w, 0, dst);
            e.emit1(0xc1);
            e.modrm_reg(ext, dst);
            e.emit1(insn.imm as u8);
            return;
        }

        // Count must be in cl; rcx carries BPF R4.
        e.push(RCX);
        e.mov_reg(true, dst, R11);
        e.mov_reg(true, src, RCX);
        e.rex_opt(w, 0, R11);
        e.emit1(0xd3);
        e.modrm_reg(ext, R11);
        e.pop(RCX);
        // a 32-bit destination write zero-extends on its own
        e.mov_reg(w, R11, dst);
    }

    fn emit_endian(e: &mut Emitter, insn: &BpfInsn, dst: u8) {
        let to_be = insn.src() == BPF_TO_BE;
        match (insn.imm, to_be) {
            (16, false) => {
                // movzx r32, r16: truncate to the converted width
                e.rex_opt(false, dst, dst);
                e.emit(&[0x0f, 0xb7]);
                e.modrm_reg(dst, dst);
            }
            (16, true) => {
                // ror r16, 8 then zero-extend
                e.emit1(0x66);
                e.rex_opt(false, 0, dst);
                e.emit1(0xc1);
                e.modrm_reg(1, dst);
                e.emit1(8);
                e.rex_opt(false, dst, dst);
                e.emit(&[0x0f, 0xb7]);
                e.modrm_reg(dst, dst);
            }
            (32, false) => {
                e.mov_reg(false, dst, dst); // zero-extend
            }
            (32, true) => {
                e.rex_opt(false, 0, dst);
                e.emit1(0x0f);
                e.emit1(0xc8 | (dst & 7)); // bswap r32
            }
            (_, false) => {} // le64: identity
            (_, true) => {
                e.rex(true, 0, dst);
                e.emit1(0x0f);
                e.emit1(0xc8 | (dst & 7)); // bswap r64
            }
        }
    }

    fn emit_load(e: &mut Emitter, insn: &BpfInsn, dst: u8, src: u8) {
        let off = insn.off as i32;
        if insn.mode() == BPF_MEMSX {
            match insn.size() {
                BPF_B => {
                    e.rex(true, dst, src);
                    e.emit(&[0x0f, 0xbe]); // movsx r64, m8
                }
                BPF_H => {
                    e.rex(true, dst, src);
                    e.emit(&[0x0f, 0xbf]); // movsx r64, m16
                }
                _ => {
                    e.rex(true, dst, src);
                    e.emit1(0x63); // movsxd r64, m32
                }
            }
            e.modrm_disp(dst, src, off);
            return;
        }

        match insn.size() {
            BPF_B => {
                e.rex_opt(false, dst, src);
                e.emit(&[0x0f, 0xb6]); // movzx r32, m8
            }
            BPF_H => {
                e.rex_opt(false, dst, src);
                e.emit(&[0x0f, 0xb7]); // movzx r32, m16
            }
            BPF_W => {
                e.rex_opt(false, dst, src);
                e.emit1(0x8b); // mov r32, m32
            }
            _ => {
                e.rex(true, dst, src);
                e.emit1(0x8b); // mov r64, m64
            }
        }
        e.modrm_disp(dst, src, off);
    }

    fn emit_store(e: &mut Emitter, insn: &BpfInsn, dst: u8, src: u8) {
        let off = insn.off as i32;

        if insn.class() == BPF_STX {
            match insn.size() {
                BPF_B => {
                    // always emit REX so sil/dil encode correctly
                    e.rex(false, src, dst);
                    e.emit1(0x88);
                }
                BPF_H => {
                    e.emit1(0x66);
                    e.rex_opt(false, src, dst);
                    e.emit1(0x89);
                }
                BPF_W => {
                    e.rex_opt(false, src, dst);
                    e.emit1(0x89);
                }
                _ => {
                    e.rex(true, src, dst);
                    e.emit1(0x89);
                }
            }
            e.modrm_disp(src, dst, off);
            return;
        }

        match insn.size() {
            BPF_B => {
                e.rex_opt(false, 0, dst);
                e.emit1(0xc6);
                e.modrm_disp(0, dst, off);
                e.emit1(insn.imm as u8);
            }
            BPF_H => {
                e.emit1(0x66);
                e.rex_opt(false, 0, dst);
                e.emit1(0xc7);
                e.modrm_disp(0, dst, off);
                e.emit(&(insn.imm as u16).to_le_bytes());
            }
            BPF_W => {
                e.rex_opt(false, 0, dst);
                e.emit1(0xc7);
                e.modrm_disp(0, dst, off);
                e.emit_u32(insn.imm as u32);
            }
            _ => {
                e.rex(true, 0, dst);
                e.emit1(0xc7); // mov m64, imm32 (sign-extends)
                e.modrm_disp(0, dst, off);
                e.emit_u32(insn.imm as u32);
            }
        }
    }

    fn emit_jmp(e: &mut Emitter, insn: &BpfInsn, pc: usize, dst: u8, src: u8) -> Result<()> {
        let target = pc as isize + 1 + insn.off as isize;

        match insn.op() {
            BPF_EXIT => {
                e.jmp_pc(TARGET_EXIT);
            }
            BPF_JA => {
                e.jmp_pc(target);
            }
            BPF_CALL => {
                emit_helper_call(e, insn.imm)?;
            }
            op => {
                if op == BPF_JSET {
                    if insn.src() == BPF_X {
                        e.alu_reg(true, 0x85, src, dst); // test dst, src
                    } else {
                        e.rex(true, 0, dst);
                        e.emit1(0xf7); // test r/m64, imm32
                        e.modrm_reg(0, dst);
                        e.emit_u32(insn.imm as u32);
                    }
                } else if insn.src() == BPF_X {
                    e.alu_reg(true, 0x39, src, dst); // cmp dst, src
                } else {
                    e.alu_imm(true, 7, dst, insn.imm); // cmp dst, imm32
                }
                e.jcc_pc(condition_code(op), target);
            }
        }
        Ok(())
    }

    fn emit_helper_call(e: &mut Emitter, id: i32) -> Result<()> {
        let shim = match id {
            helpers::HELPER_MAP_LOOKUP_ELEM => shim_map_lookup as usize,
            helpers::HELPER_MAP_UPDATE_ELEM => shim_map_update as usize,
            helpers::HELPER_MAP_DELETE_ELEM => shim_map_delete as usize,
            _ => return Err(BpfError::JitUnsupported("helper id")),
        };

        // R1..R5 already sit in the first five SysV argument registers.
        // Preserve them across the call so both back-ends leave the
        // scratch registers alone; pad to keep rsp 16-aligned.
        for reg in [7u8, 6, 2, 1, 8] {
            e.push(reg);
        }
        e.alu_imm(true, 5, RSP, 8); // sub rsp, 8

        e.mov_reg(true, R12, R9); // sixth argument: the JitCtx
        e.mov_imm64(RAX, shim as u64);
        e.emit(&[0xff, 0xd0]); // call rax

        e.alu_imm(true, 0, RSP, 8); // add rsp, 8
        for reg in [8u8, 1, 2, 6, 7] {
            e.pop(reg);
        }
        Ok(())
    }

    unsafe extern "C" fn shim_map_lookup(
        r1: u64,
        r2: u64,
        r3: u64,
        r4: u64,
        r5: u64,
        ctx: *const JitCtx<'_>,
    ) -> u64 {
        let ctx = &*ctx;
        helpers::call(
            ctx.prog,
            ctx.guard,
            helpers::HELPER_MAP_LOOKUP_ELEM,
            [r1, r2, r3, r4, r5],
        )
    }

    unsafe extern "C" fn shim_map_update(
        r1: u64,
        r2: u64,
        r3: u64,
        r4: u64,
        r5: u64,
        ctx: *const JitCtx<'_>,
    ) -> u64 {
        let ctx = &*ctx;
        helpers::call(
            ctx.prog,
            ctx.guard,
            helpers::HELPER_MAP_UPDATE_ELEM,
            [r1, r2, r3, r4, r5],
        )
    }

    unsafe extern "C" fn shim_map_delete(
        r1: u64,
        r2: u64,
        r3: u64,
        r4: u64,
        r5: u64,
        ctx: *const JitCtx<'_>,
    ) -> u64 {
        let ctx = &*ctx;
        helpers::call(
            ctx.prog,
            ctx.guard,
            helpers::HELPER_MAP_DELETE_ELEM,
            [r1, r2, r3, r4, r5],
        )
    }

    /// Copy the code into a fresh mapping and seal it W^X.
    fn finalize(code: Vec<u8>) -> Result<Image> {
        let page = crate::mem::allocator::page_size();
        let map_len = code.len().div_ceil(page) * page;

        unsafe {
            let map = libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if map == libc::MAP_FAILED {
                return Err(BpfError::OutOfMemory);
            }

            std::ptr::copy_nonoverlapping(code.as_ptr(), map as *mut u8, code.len());

            if libc::mprotect(map, map_len, libc::PROT_READ | libc::PROT_EXEC) != 0 {
                libc::munmap(map, map_len);
                return Err(BpfError::OutOfMemory);
            }

            Ok(Image {
                map: map as *mut u8,
                map_len,
                code_len: code.len(),
                entry: std::mem::transmute::<*mut u8, Entry>(map as *mut u8),
            })
        }
    }
}
