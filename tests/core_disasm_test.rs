// SPDX-License-Identifier: GPL-2.0
//! Tests for bpf_runtime::core::disasm

use bpf_runtime::core::disasm::{disasm_insn, disasm_prog};
use bpf_runtime::core::types::*;
use bpf_runtime::vm::helpers::HELPER_MAP_LOOKUP_ELEM;

fn insn(code: u8, dst: u8, src: u8, off: i16, imm: i32) -> BpfInsn {
    BpfInsn::new(code, dst, src, off, imm)
}

#[test]
fn test_alu_mnemonics() {
    assert_eq!(
        disasm_insn(&insn(BPF_ALU64 | BPF_ADD | BPF_K, 1, 0, 0, 5), 0, None),
        "add64 r1, 5"
    );
    assert_eq!(
        disasm_insn(&insn(BPF_ALU | BPF_XOR | BPF_X, 2, 3, 0, 0), 0, None),
        "xor32 r2, r3"
    );
    assert_eq!(
        disasm_insn(&insn(BPF_ALU64 | BPF_NEG, 4, 0, 0, 0), 0, None),
        "neg64 r4"
    );
    assert_eq!(
        disasm_insn(&insn(BPF_ALU | BPF_END | BPF_TO_BE, 1, 0, 0, 16), 0, None),
        "be16 r1"
    );
}

#[test]
fn test_memory_mnemonics() {
    assert_eq!(
        disasm_insn(&insn(BPF_LDX | BPF_MEM | BPF_W, 0, 1, 4, 0), 0, None),
        "ldxw r0, [r1+4]"
    );
    assert_eq!(
        disasm_insn(&insn(BPF_LDX | BPF_MEMSX | BPF_B, 0, 10, -1, 0), 0, None),
        "ldxbsx r0, [r10-1]"
    );
    assert_eq!(
        disasm_insn(&insn(BPF_STX | BPF_MEM | BPF_DW, 10, 1, -8, 0), 0, None),
        "stxdw [r10-8], r1"
    );
    assert_eq!(
        disasm_insn(&insn(BPF_ST | BPF_MEM | BPF_H, 10, 0, -2, 7), 0, None),
        "sth [r10-2], 7"
    );
}

#[test]
fn test_jump_mnemonics() {
    assert_eq!(
        disasm_insn(&insn(BPF_JMP | BPF_JSGE | BPF_K, 1, 0, 3, -4), 10, None),
        "jsge r1, -4, -> 14"
    );
    assert_eq!(
        disasm_insn(&insn(BPF_JMP | BPF_EXIT, 0, 0, 0, 0), 0, None),
        "exit"
    );
    assert_eq!(
        disasm_insn(
            &insn(BPF_JMP | BPF_CALL, 0, 0, 0, HELPER_MAP_LOOKUP_ELEM),
            0,
            None
        ),
        "call map_lookup_elem#1"
    );
}

#[test]
fn test_program_listing() {
    let [lo, hi] = lddw(1, 0xdead_beef);
    let prog = vec![
        insn(BPF_ALU64 | BPF_MOV | BPF_K, 0, 0, 0, 0),
        lo,
        hi,
        insn(BPF_JMP | BPF_EXIT, 0, 0, 0, 0),
    ];

    let listing = disasm_prog(&prog);
    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines.len(), 3); // the pair renders as one line
    assert!(lines[0].contains("mov64 r0, 0"));
    assert!(lines[1].contains("lddw r1, 0xdeadbeef"));
    assert!(lines[2].contains("exit"));
}
