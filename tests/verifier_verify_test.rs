// SPDX-License-Identifier: GPL-2.0
//! Tests for bpf_runtime::verifier

use bpf_runtime::core::log::{LogLevel, RuntimeLog};
use bpf_runtime::core::types::*;
use bpf_runtime::verifier::{verify, verify_with_log};
use bpf_runtime::BpfError;

fn insn(code: u8, dst: u8, src: u8, off: i16, imm: i32) -> BpfInsn {
    BpfInsn::new(code, dst, src, off, imm)
}

fn exit() -> BpfInsn {
    insn(BPF_JMP | BPF_EXIT, 0, 0, 0, 0)
}

#[test]
fn test_accepts_representative_program() {
    let [lo, hi] = lddw(3, 0x1_0000_0000);
    let prog = vec![
        insn(BPF_ALU64 | BPF_MOV | BPF_K, 0, 0, 0, 0),
        insn(BPF_ALU64 | BPF_MOV | BPF_K, 1, 0, 0, 10),
        lo,
        hi,
        insn(BPF_STX | BPF_MEM | BPF_DW, 10, 3, -8, 0),
        insn(BPF_LDX | BPF_MEM | BPF_DW, 4, 10, -8, 0),
        insn(BPF_ALU64 | BPF_ADD | BPF_X, 0, 4, 0, 0),
        insn(BPF_ALU64 | BPF_SUB | BPF_K, 1, 0, 0, 1),
        insn(BPF_JMP | BPF_JNE | BPF_K, 1, 0, -3, 0),
        exit(),
    ];
    assert!(verify(&prog).is_ok());
}

#[test]
fn test_empty_and_oversized() {
    assert!(matches!(verify(&[]), Err(BpfError::EmptyProgram)));

    let long = vec![exit(); MAX_INSNS + 1];
    assert!(matches!(verify(&long), Err(BpfError::ProgramTooLarge(_))));
}

#[test]
fn test_last_insn_must_be_exit() {
    let prog = [insn(BPF_ALU64 | BPF_MOV | BPF_K, 0, 0, 0, 1)];
    assert!(matches!(verify(&prog), Err(BpfError::MissingExit)));

    // An earlier exit does not count.
    let prog = [exit(), insn(BPF_ALU64 | BPF_MOV | BPF_K, 0, 0, 0, 1)];
    assert!(matches!(verify(&prog), Err(BpfError::MissingExit)));
}

#[test]
fn test_branch_target_bounds() {
    // conditional past the end
    let prog = [insn(BPF_JMP | BPF_JEQ | BPF_K, 0, 0, 9, 0), exit()];
    assert!(matches!(verify(&prog), Err(BpfError::JumpOutOfRange { .. })));

    // backwards before the start
    let prog = [insn(BPF_JMP | BPF_JA, 0, 0, -5, 0), exit()];
    assert!(matches!(verify(&prog), Err(BpfError::JumpOutOfRange { .. })));

    // off = -1 targets the jump itself: legal structurally
    let prog = [insn(BPF_JMP | BPF_JA, 0, 0, -1, 0), exit()];
    assert!(verify(&prog).is_ok());
}

#[test]
fn test_lddw_pair_rules() {
    // second slot missing
    let prog = [insn(BPF_LD | BPF_IMM | BPF_DW, 1, 0, 0, 5)];
    assert!(matches!(verify(&prog), Err(BpfError::TruncatedLddw(0))));

    // second slot carries stray fields
    let prog = [
        insn(BPF_LD | BPF_IMM | BPF_DW, 1, 0, 0, 5),
        insn(0, 0, 1, 0, 0),
        exit(),
    ];
    assert!(matches!(verify(&prog), Err(BpfError::MalformedLddwPair(0))));

    // branching into the pair's second slot
    let [lo, hi] = lddw(2, 77);
    let prog = [insn(BPF_JMP | BPF_JA, 0, 0, 1, 0), lo, hi, exit()];
    assert!(matches!(verify(&prog), Err(BpfError::JumpIntoLddw { .. })));

    // a branch over the whole pair is fine
    let [lo, hi] = lddw(2, 77);
    let prog = [insn(BPF_JMP | BPF_JA, 0, 0, 2, 0), lo, hi, exit()];
    assert!(verify(&prog).is_ok());
}

#[test]
fn test_register_rules() {
    // 4-bit register fields past R10
    let prog = [insn(BPF_ALU64 | BPF_MOV | BPF_X, 0, 12, 0, 0), exit()];
    assert!(matches!(
        verify(&prog),
        Err(BpfError::InvalidRegister { pc: 0, reg: 12 })
    ));

    // the frame pointer is read-only...
    let prog = [insn(BPF_ALU64 | BPF_ADD | BPF_K, 10, 0, 0, 8), exit()];
    assert!(matches!(verify(&prog), Err(BpfError::FramePointerWrite(0))));

    let prog = [insn(BPF_LDX | BPF_MEM | BPF_W, 10, 1, 0, 0), exit()];
    assert!(matches!(verify(&prog), Err(BpfError::FramePointerWrite(0))));

    // ...but stores may use it as the address base
    let prog = [insn(BPF_ST | BPF_MEM | BPF_W, 10, 0, -4, 7), exit()];
    assert!(verify(&prog).is_ok());

    // and it may be read as a source
    let prog = [insn(BPF_ALU64 | BPF_MOV | BPF_X, 1, 10, 0, 0), exit()];
    assert!(verify(&prog).is_ok());
}

#[test]
fn test_division_by_zero_immediate() {
    for op in [BPF_DIV, BPF_MOD] {
        for class in [BPF_ALU, BPF_ALU64] {
            let prog = [insn(class | op | BPF_K, 1, 0, 0, 0), exit()];
            assert!(
                matches!(verify(&prog), Err(BpfError::DivisionByZeroImm(0))),
                "class {:#x} op {:#x}",
                class,
                op
            );
        }
    }

    // register divisors are admitted
    let prog = [insn(BPF_ALU64 | BPF_DIV | BPF_X, 1, 2, 0, 0), exit()];
    assert!(verify(&prog).is_ok());
}

#[test]
fn test_opcode_table() {
    // JMP32 class value is not part of this ISA
    let prog = [insn(0x06 | BPF_JEQ | BPF_K, 0, 0, 0, 0), exit()];
    assert!(matches!(verify(&prog), Err(BpfError::UnknownOpcode { .. })));

    // LD other than LD_IMM64
    let prog = [insn(BPF_LD | 0x20 | BPF_W, 0, 0, 0, 0), exit()];
    assert!(matches!(verify(&prog), Err(BpfError::UnknownOpcode { .. })));

    // stray high bits in an ALU op
    let prog = [insn(BPF_ALU64 | 0xe0, 0, 0, 0, 0), exit()];
    assert!(matches!(verify(&prog), Err(BpfError::UnknownOpcode { .. })));

    // endian conversion only with a defined width
    let prog = [insn(BPF_ALU | BPF_END | BPF_TO_BE, 0, 0, 0, 48), exit()];
    assert!(matches!(verify(&prog), Err(BpfError::UnknownOpcode { .. })));
    let prog = [insn(BPF_ALU | BPF_END | BPF_TO_BE, 0, 0, 0, 16), exit()];
    assert!(verify(&prog).is_ok());
}

#[test]
fn test_call_requires_known_helper() {
    let prog = [insn(BPF_JMP | BPF_CALL, 0, 0, 0, 1), exit()];
    assert!(verify(&prog).is_ok());

    let prog = [insn(BPF_JMP | BPF_CALL, 0, 0, 0, 42), exit()];
    assert!(matches!(
        verify(&prog),
        Err(BpfError::UnknownHelper { pc: 0, id: 42 })
    ));
}

#[test]
fn test_rejection_reaches_the_log() {
    let mut log = RuntimeLog::new(LogLevel::Info);
    let prog = [insn(BPF_JMP | BPF_JA, 0, 0, 3, 0), exit()];
    assert!(verify_with_log(&prog, &mut log).is_err());
    assert!(log.contents().contains("jump out of range"));

    log.clear();
    assert!(verify_with_log(&[exit()], &mut log).is_ok());
    assert!(log.contents().contains("verified"));
}
