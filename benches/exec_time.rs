//! Performance benchmarks for the BPF runtime
//!
//! Run with: cargo bench
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bpf_runtime::core::types::*;
use bpf_runtime::maps::{BpfMap, BpfMapAttr, BpfMapType, MapUpdateFlag};
use bpf_runtime::prog::{BpfProg, BpfProgAttr, BpfProgType};
use bpf_runtime::verifier;

fn insn(code: u8, dst: u8, src: u8, off: i16, imm: i32) -> BpfInsn {
    BpfInsn::new(code, dst, src, off, imm)
}

/// sum(1..=n) with a backwards conditional jump
fn loop_program(n: i32) -> Vec<BpfInsn> {
    vec![
        insn(BPF_ALU64 | BPF_MOV | BPF_K, 0, 0, 0, 0),
        insn(BPF_ALU64 | BPF_MOV | BPF_K, 1, 0, 0, n),
        insn(BPF_ALU64 | BPF_ADD | BPF_X, 0, 1, 0, 0),
        insn(BPF_ALU64 | BPF_SUB | BPF_K, 1, 0, 0, 1),
        insn(BPF_JMP | BPF_JNE | BPF_K, 1, 0, -3, 0),
        insn(BPF_JMP | BPF_EXIT, 0, 0, 0, 0),
    ]
}

fn load(insns: &[BpfInsn]) -> BpfProg {
    verifier::verify(insns).unwrap();
    BpfProg::new(&BpfProgAttr {
        prog_type: BpfProgType::Test,
        insns,
    })
    .unwrap()
}

fn bench_verifier(c: &mut Criterion) {
    let mut insns = vec![insn(BPF_ALU64 | BPF_MOV | BPF_K, 0, 0, 0, 0); 4095];
    insns.push(insn(BPF_JMP | BPF_EXIT, 0, 0, 0, 0));

    c.bench_function("verifier/linear_4096", |b| {
        b.iter(|| verifier::verify(black_box(&insns)).unwrap())
    });
}

fn bench_interpreter(c: &mut Criterion) {
    let prog = load(&loop_program(1000));

    c.bench_function("interpreter/loop_1000", |b| {
        b.iter(|| unsafe { prog.run(std::ptr::null_mut(), 0) })
    });
}

#[cfg(target_arch = "x86_64")]
fn bench_jit(c: &mut Criterion) {
    let mut prog = load(&loop_program(1000));
    prog.jit_compile().unwrap();

    c.bench_function("jit/loop_1000", |b| {
        b.iter(|| unsafe { prog.run(std::ptr::null_mut(), 0) })
    });
}

#[cfg(not(target_arch = "x86_64"))]
fn bench_jit(_c: &mut Criterion) {}

fn bench_hashtable(c: &mut Criterion) {
    let map = BpfMap::new(&BpfMapAttr {
        map_type: BpfMapType::HashTable,
        key_size: 4,
        value_size: 8,
        max_entries: 1024,
        flags: 0,
    })
    .unwrap();

    for i in 0..1024u32 {
        map.update_from_user(&i.to_le_bytes(), &(i as u64).to_le_bytes(), MapUpdateFlag::Any)
            .unwrap();
    }

    c.bench_function("hashtable/lookup_hit", |b| {
        let key = 512u32.to_le_bytes();
        b.iter(|| map.lookup_from_user(black_box(&key)).unwrap())
    });

    c.bench_function("hashtable/overwrite", |b| {
        let key = 512u32.to_le_bytes();
        let value = 7u64.to_le_bytes();
        b.iter(|| map.update_from_user(black_box(&key), &value, MapUpdateFlag::Any).unwrap())
    });
}

criterion_group!(
    benches,
    bench_verifier,
    bench_interpreter,
    bench_jit,
    bench_hashtable
);
criterion_main!(benches);
