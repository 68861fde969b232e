//! BPF program disassembler
//!
//! Renders bytecode into a human-readable listing. Shares the instruction
//! encoding with the verifier and the VM; used by the trace log and tests.

use crate::core::types::*;
use crate::vm::helpers::helper_name;

/// Disassemble a single instruction.
///
/// `hi` supplies the second slot of a LD_IMM64 pair when `insn` is its
/// first slot.
pub fn disasm_insn(insn: &BpfInsn, idx: usize, hi: Option<&BpfInsn>) -> String {
    let class = insn.class();

    match class {
        BPF_ALU | BPF_ALU64 => disasm_alu(insn, class == BPF_ALU64),
        BPF_LDX => disasm_ldx(insn),
        BPF_STX => disasm_stx(insn),
        BPF_ST => disasm_st(insn),
        BPF_LD => disasm_ld(insn, hi),
        BPF_JMP => disasm_jmp(insn, idx),
        _ => format!(".byte {:#04x}", insn.code),
    }
}

/// Disassemble a whole program, one numbered line per slot.
pub fn disasm_prog(insns: &[BpfInsn]) -> String {
    let mut out = String::new();
    let mut pc = 0;
    while pc < insns.len() {
        let insn = &insns[pc];
        let hi = if insn.is_lddw() { insns.get(pc + 1) } else { None };
        out.push_str(&format!("{:4}: {}\n", pc, disasm_insn(insn, pc, hi)));
        pc += if insn.is_lddw() { 2 } else { 1 };
    }
    out
}

fn size_suffix(size: u8) -> &'static str {
    match size {
        BPF_B => "b",
        BPF_H => "h",
        BPF_W => "w",
        BPF_DW => "dw",
        _ => "?",
    }
}

fn disasm_alu(insn: &BpfInsn, is_64: bool) -> String {
    let suffix = if is_64 { "64" } else { "32" };

    let op_name = match insn.op() {
        BPF_ADD => "add",
        BPF_SUB => "sub",
        BPF_MUL => "mul",
        BPF_DIV => "div",
        BPF_OR => "or",
        BPF_AND => "and",
        BPF_LSH => "lsh",
        BPF_RSH => "rsh",
        BPF_MOD => "mod",
        BPF_XOR => "xor",
        BPF_MOV => "mov",
        BPF_ARSH => "arsh",
        BPF_NEG => return format!("neg{} r{}", suffix, insn.dst_reg),
        BPF_END => {
            let dir = if insn.src() == BPF_TO_BE { "be" } else { "le" };
            return format!("{}{} r{}", dir, insn.imm, insn.dst_reg);
        }
        _ => return format!(".alu {:#04x}", insn.code),
    };

    if insn.src() == BPF_X {
        format!("{}{} r{}, r{}", op_name, suffix, insn.dst_reg, insn.src_reg)
    } else {
        format!("{}{} r{}, {}", op_name, suffix, insn.dst_reg, insn.imm)
    }
}

fn disasm_ldx(insn: &BpfInsn) -> String {
    let sx = if insn.mode() == BPF_MEMSX { "sx" } else { "" };
    format!(
        "ldx{}{} r{}, [r{}{:+}]",
        size_suffix(insn.size()),
        sx,
        insn.dst_reg,
        insn.src_reg,
        insn.off
    )
}

fn disasm_stx(insn: &BpfInsn) -> String {
    format!(
        "stx{} [r{}{:+}], r{}",
        size_suffix(insn.size()),
        insn.dst_reg,
        insn.off,
        insn.src_reg
    )
}

fn disasm_st(insn: &BpfInsn) -> String {
    format!(
        "st{} [r{}{:+}], {}",
        size_suffix(insn.size()),
        insn.dst_reg,
        insn.off,
        insn.imm
    )
}

fn disasm_ld(insn: &BpfInsn, hi: Option<&BpfInsn>) -> String {
    if insn.is_lddw() {
        let lo = insn.imm as u32 as u64;
        match hi {
            Some(hi) => format!(
                "lddw r{}, {:#x}",
                insn.dst_reg,
                lo | ((hi.imm as u32 as u64) << 32)
            ),
            None => format!("lddw r{}, <truncated>", insn.dst_reg),
        }
    } else {
        format!(".ld {:#04x}", insn.code)
    }
}

fn disasm_jmp(insn: &BpfInsn, idx: usize) -> String {
    let op_name = match insn.op() {
        BPF_JA => return format!("ja {:+} -> {}", insn.off, idx as i64 + 1 + insn.off as i64),
        BPF_EXIT => return "exit".to_string(),
        BPF_CALL => {
            return match helper_name(insn.imm) {
                Some(name) => format!("call {}#{}", name, insn.imm),
                None => format!("call #{}", insn.imm),
            };
        }
        BPF_JEQ => "jeq",
        BPF_JGT => "jgt",
        BPF_JGE => "jge",
        BPF_JSET => "jset",
        BPF_JNE => "jne",
        BPF_JSGT => "jsgt",
        BPF_JSGE => "jsge",
        BPF_JLT => "jlt",
        BPF_JLE => "jle",
        BPF_JSLT => "jslt",
        BPF_JSLE => "jsle",
        _ => return format!(".jmp {:#04x}", insn.code),
    };

    let target = idx as i64 + 1 + insn.off as i64;
    if insn.src() == BPF_X {
        format!("{} r{}, r{}, -> {}", op_name, insn.dst_reg, insn.src_reg, target)
    } else {
        format!("{} r{}, {}, -> {}", op_name, insn.dst_reg, insn.imm, target)
    }
}
