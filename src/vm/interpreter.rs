//! Interpreter for BPF programs.
//!
//! A decode-and-dispatch loop over the register architecture. Memory
//! accesses go straight through program-supplied addresses; the caller
//! vouches for them. Execution is bounded by [`INSN_EXEC_LIMIT`]; the
//! only regular termination is EXIT.

use crate::core::types::*;
use crate::mem::epoch::EpochGuard;
use crate::prog::BpfProg;
use crate::vm::helpers;

/// Run `prog` in the interpreter. See [`crate::vm::exec`] for the entry
/// contract and safety requirements.
pub(crate) unsafe fn exec(
    prog: &BpfProg,
    ctx: *mut u8,
    _ctx_len: usize,
    guard: &EpochGuard,
) -> u64 {
    let insns = prog.insns();
    let mut stack = [0u8; BPF_STACK_SIZE];
    let mut reg = [0u64; MAX_BPF_REG];

    // R1 carries the context pointer; every other register starts zero.
    // The length is part of the entry contract but not a register.
    reg[1] = ctx as u64;
    reg[BPF_REG_FP] = stack.as_mut_ptr().add(BPF_STACK_SIZE) as u64;

    let mut pc = 0usize;
    let mut executed = 0u64;

    while pc < insns.len() {
        executed += 1;
        if executed > INSN_EXEC_LIMIT {
            return 0;
        }

        let insn = insns[pc];
        let dst = insn.dst_reg as usize;
        let src = insn.src_reg as usize;
        pc += 1;

        match insn.class() {
            BPF_ALU64 => {
                let rhs = if insn.src() == BPF_X {
                    reg[src]
                } else {
                    insn.imm as i64 as u64
                };
                reg[dst] = alu64(insn.op(), reg[dst], rhs);
            }

            BPF_ALU => {
                if insn.op() == BPF_END {
                    reg[dst] = endian(&insn, reg[dst]);
                } else {
                    let rhs = if insn.src() == BPF_X {
                        reg[src] as u32
                    } else {
                        insn.imm as u32
                    };
                    reg[dst] = alu32(insn.op(), reg[dst] as u32, rhs) as u64;
                }
            }

            BPF_LD => {
                // LD_IMM64: the verifier guarantees the second slot.
                let hi = insns[pc].imm as u32 as u64;
                reg[dst] = insn.imm as u32 as u64 | (hi << 32);
                pc += 1;
            }

            BPF_LDX => {
                let addr = reg[src].wrapping_add(insn.off as i64 as u64) as *const u8;
                reg[dst] = if insn.mode() == BPF_MEMSX {
                    match insn.size() {
                        BPF_B => addr.cast::<i8>().read_unaligned() as i64 as u64,
                        BPF_H => addr.cast::<i16>().read_unaligned() as i64 as u64,
                        _ => addr.cast::<i32>().read_unaligned() as i64 as u64,
                    }
                } else {
                    match insn.size() {
                        BPF_B => addr.cast::<u8>().read_unaligned() as u64,
                        BPF_H => addr.cast::<u16>().read_unaligned() as u64,
                        BPF_W => addr.cast::<u32>().read_unaligned() as u64,
                        _ => addr.cast::<u64>().read_unaligned(),
                    }
                };
            }

            BPF_ST | BPF_STX => {
                let addr = reg[dst].wrapping_add(insn.off as i64 as u64) as *mut u8;
                let val = if insn.class() == BPF_STX {
                    reg[src]
                } else {
                    insn.imm as i64 as u64
                };
                match insn.size() {
                    BPF_B => addr.cast::<u8>().write_unaligned(val as u8),
                    BPF_H => addr.cast::<u16>().write_unaligned(val as u16),
                    BPF_W => addr.cast::<u32>().write_unaligned(val as u32),
                    _ => addr.cast::<u64>().write_unaligned(val),
                }
            }

            BPF_JMP => {
                match insn.op() {
                    BPF_EXIT => return reg[0],
                    BPF_CALL => {
                        let args = [reg[1], reg[2], reg[3], reg[4], reg[5]];
                        reg[0] = helpers::call(prog, guard, insn.imm, args);
                    }
                    BPF_JA => pc = (pc as i64 + insn.off as i64) as usize,
                    op => {
                        let rhs = if insn.src() == BPF_X {
                            reg[src]
                        } else {
                            insn.imm as i64 as u64
                        };
                        if branch_taken(op, reg[dst], rhs) {
                            pc = (pc as i64 + insn.off as i64) as usize;
                        }
                    }
                }
            }

            // Unreachable for verified programs.
            _ => return 0,
        }
    }

    0
}

fn alu64(op: u8, lhs: u64, rhs: u64) -> u64 {
    match op {
        BPF_ADD => lhs.wrapping_add(rhs),
        BPF_SUB => lhs.wrapping_sub(rhs),
        BPF_MUL => lhs.wrapping_mul(rhs),
        // Runtime zero divisor: quotient is defined as zero, remainder
        // as the dividend.
        BPF_DIV => {
            if rhs == 0 {
                0
            } else {
                lhs / rhs
            }
        }
        BPF_MOD => {
            if rhs == 0 {
                lhs
            } else {
                lhs % rhs
            }
        }
        BPF_OR => lhs | rhs,
        BPF_AND => lhs & rhs,
        BPF_XOR => lhs ^ rhs,
        BPF_LSH => lhs.wrapping_shl(rhs as u32 & 63),
        BPF_RSH => lhs.wrapping_shr(rhs as u32 & 63),
        BPF_ARSH => ((lhs as i64).wrapping_shr(rhs as u32 & 63)) as u64,
        BPF_NEG => (lhs as i64).wrapping_neg() as u64,
        BPF_MOV => rhs,
        _ => lhs,
    }
}

fn alu32(op: u8, lhs: u32, rhs: u32) -> u32 {
    match op {
        BPF_ADD => lhs.wrapping_add(rhs),
        BPF_SUB => lhs.wrapping_sub(rhs),
        BPF_MUL => lhs.wrapping_mul(rhs),
        BPF_DIV => {
            if rhs == 0 {
                0
            } else {
                lhs / rhs
            }
        }
        BPF_MOD => {
            if rhs == 0 {
                lhs
            } else {
                lhs % rhs
            }
        }
        BPF_OR => lhs | rhs,
        BPF_AND => lhs & rhs,
        BPF_XOR => lhs ^ rhs,
        BPF_LSH => lhs.wrapping_shl(rhs & 31),
        BPF_RSH => lhs.wrapping_shr(rhs & 31),
        BPF_ARSH => ((lhs as i32).wrapping_shr(rhs & 31)) as u32,
        BPF_NEG => (lhs as i32).wrapping_neg() as u32,
        BPF_MOV => rhs,
        _ => lhs,
    }
}

fn endian(insn: &BpfInsn, val: u64) -> u64 {
    let to_be = insn.src() == BPF_TO_BE;
    match insn.imm {
        16 => {
            let half = if to_be {
                (val as u16).to_be()
            } else {
                (val as u16).to_le()
            };
            half as u64
        }
        32 => {
            let word = if to_be {
                (val as u32).to_be()
            } else {
                (val as u32).to_le()
            };
            word as u64
        }
        _ => {
            if to_be {
                val.to_be()
            } else {
                val.to_le()
            }
        }
    }
}

fn branch_taken(op: u8, lhs: u64, rhs: u64) -> bool {
    match op {
        BPF_JEQ => lhs == rhs,
        BPF_JNE => lhs != rhs,
        BPF_JGT => lhs > rhs,
        BPF_JGE => lhs >= rhs,
        BPF_JLT => lhs < rhs,
        BPF_JLE => lhs <= rhs,
        BPF_JSET => lhs & rhs != 0,
        BPF_JSGT => (lhs as i64) > (rhs as i64),
        BPF_JSGE => (lhs as i64) >= (rhs as i64),
        BPF_JSLT => (lhs as i64) < (rhs as i64),
        BPF_JSLE => (lhs as i64) <= (rhs as i64),
        _ => false,
    }
}
