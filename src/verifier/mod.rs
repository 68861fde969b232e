//! Structural program verifier
//!
//! One pass over the instruction vector decides admissibility: opcode
//! validity, register ranges, branch targets, LD_IMM64 pairing, a final
//! EXIT, and no division by a zero immediate. Data-flow analysis
//! (pointer tracking, bounds proofs) is deliberately not performed;
//! callers that admit untrusted programs layer that on top.

use crate::core::error::{BpfError, Result};
use crate::core::log::RuntimeLog;
use crate::core::types::*;
use crate::vm::helpers;

/// Verify `insns`, discarding diagnostics.
pub fn verify(insns: &[BpfInsn]) -> Result<()> {
    let mut log = RuntimeLog::default();
    verify_with_log(insns, &mut log)
}

/// Verify `insns`, reporting each rejection into `log`.
pub fn verify_with_log(insns: &[BpfInsn], log: &mut RuntimeLog) -> Result<()> {
    check(insns).inspect_err(|e| log.error(&format!("{}", e)))?;
    log.info(&format!("verified: {} instructions", insns.len()));
    Ok(())
}

fn check(insns: &[BpfInsn]) -> Result<()> {
    if insns.is_empty() {
        return Err(BpfError::EmptyProgram);
    }
    if insns.len() > MAX_INSNS {
        return Err(BpfError::ProgramTooLarge(insns.len()));
    }

    let starts = insn_starts(insns)?;

    if !insns[insns.len() - 1].is_exit() {
        return Err(BpfError::MissingExit);
    }

    let mut pc = 0;
    while pc < insns.len() {
        let insn = &insns[pc];
        check_insn(insns, &starts, pc)?;
        pc += if insn.is_lddw() { 2 } else { 1 };
    }

    Ok(())
}

/// Walk the vector once, validating LD_IMM64 pairing and recording which
/// slots begin an instruction (the pair counts as one).
fn insn_starts(insns: &[BpfInsn]) -> Result<Vec<bool>> {
    let mut starts = vec![false; insns.len()];
    let mut pc = 0;
    while pc < insns.len() {
        starts[pc] = true;
        let insn = &insns[pc];
        if insn.is_lddw() {
            let hi = insns.get(pc + 1).ok_or(BpfError::TruncatedLddw(pc))?;
            if hi.code != 0 || hi.dst_reg != 0 || hi.src_reg != 0 || hi.off != 0 {
                return Err(BpfError::MalformedLddwPair(pc));
            }
            pc += 2;
        } else {
            pc += 1;
        }
    }
    Ok(starts)
}

/// Which register an instruction defines, if any.
///
/// Stores use `dst_reg` as an address base without writing it, so they
/// define nothing; CALL clobbers R0 without encoding it.
fn insn_def_reg(insn: &BpfInsn) -> Option<u8> {
    match insn.class() {
        BPF_ALU | BPF_ALU64 | BPF_LDX | BPF_LD => Some(insn.dst_reg),
        BPF_JMP if insn.is_call() => Some(BPF_REG_0 as u8),
        _ => None,
    }
}

fn check_insn(insns: &[BpfInsn], starts: &[bool], pc: usize) -> Result<()> {
    let insn = &insns[pc];

    check_opcode(insn, pc)?;

    if insn.dst_reg as usize >= MAX_BPF_REG {
        return Err(BpfError::InvalidRegister { pc, reg: insn.dst_reg });
    }
    if insn.src_reg as usize >= MAX_BPF_REG {
        return Err(BpfError::InvalidRegister { pc, reg: insn.src_reg });
    }

    // R10 is the read-only frame pointer.
    if insn_def_reg(insn) == Some(BPF_REG_FP as u8) {
        return Err(BpfError::FramePointerWrite(pc));
    }

    match insn.class() {
        BPF_ALU | BPF_ALU64 => {
            if matches!(insn.op(), BPF_DIV | BPF_MOD) && insn.src() == BPF_K && insn.imm == 0 {
                return Err(BpfError::DivisionByZeroImm(pc));
            }
        }
        BPF_JMP => {
            if insn.is_call() {
                if !helpers::helper_exists(insn.imm) {
                    return Err(BpfError::UnknownHelper { pc, id: insn.imm });
                }
            } else if !insn.is_exit() {
                check_branch_target(insns, starts, pc, insn.off)?;
            }
        }
        _ => {}
    }

    Ok(())
}

fn check_branch_target(
    insns: &[BpfInsn],
    starts: &[bool],
    pc: usize,
    off: i16,
) -> Result<()> {
    let target = pc as i64 + 1 + off as i64;
    if target < 0 || target >= insns.len() as i64 {
        return Err(BpfError::JumpOutOfRange {
            pc,
            target,
            len: insns.len(),
        });
    }
    let target = target as usize;
    if !starts[target] {
        return Err(BpfError::JumpIntoLddw { pc, target });
    }
    Ok(())
}

/// The defined opcode table. Everything else is rejected.
fn check_opcode(insn: &BpfInsn, pc: usize) -> Result<()> {
    let unknown = || BpfError::UnknownOpcode { pc, code: insn.code };

    match insn.class() {
        BPF_ALU | BPF_ALU64 => match insn.op() {
            BPF_ADD | BPF_SUB | BPF_MUL | BPF_DIV | BPF_OR | BPF_AND | BPF_LSH | BPF_RSH
            | BPF_MOD | BPF_XOR | BPF_MOV | BPF_ARSH => Ok(()),
            BPF_NEG if insn.src() == BPF_K => Ok(()),
            // Endian conversion lives in the 32-bit ALU class; the src
            // bit selects the direction and imm the width.
            BPF_END if insn.class() == BPF_ALU && matches!(insn.imm, 16 | 32 | 64) => Ok(()),
            _ => Err(unknown()),
        },
        BPF_LDX => match (insn.mode(), insn.size()) {
            (BPF_MEM, BPF_B | BPF_H | BPF_W | BPF_DW) => Ok(()),
            (BPF_MEMSX, BPF_B | BPF_H | BPF_W) => Ok(()),
            _ => Err(unknown()),
        },
        BPF_ST | BPF_STX => match (insn.mode(), insn.size()) {
            (BPF_MEM, BPF_B | BPF_H | BPF_W | BPF_DW) => Ok(()),
            _ => Err(unknown()),
        },
        BPF_LD => {
            if insn.is_lddw() {
                Ok(())
            } else {
                Err(unknown())
            }
        }
        BPF_JMP => match insn.op() {
            BPF_JA | BPF_CALL | BPF_EXIT => {
                if insn.src() == BPF_K {
                    Ok(())
                } else {
                    Err(unknown())
                }
            }
            BPF_JEQ | BPF_JGT | BPF_JGE | BPF_JSET | BPF_JNE | BPF_JSGT | BPF_JSGE | BPF_JLT
            | BPF_JLE | BPF_JSLT | BPF_JSLE => Ok(()),
            _ => Err(unknown()),
        },
        _ => Err(unknown()),
    }
}
