//! Performance benchmarks for `jitasm_rs`.
//!
//! Measures:
//! - Single instruction emission latency (per architecture)
//! - Instruction-stream throughput
//! - Label-heavy workloads (forward-reference patching)
//! - Builder record + finalize replay
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use jitasm_rs::aarch64::x;
use jitasm_rs::asm::Assembler;
use jitasm_rs::builder::Builder;
use jitasm_rs::emitter::Emitter;
use jitasm_rs::holder::{CodeHolder, CodeRef};
use jitasm_rs::inst::InstId;
use jitasm_rs::operand::{Arch, Environment};
use jitasm_rs::x86::{RAX, RBX};

fn code(arch: Arch) -> CodeRef {
    CodeHolder::new(Environment::new(arch)).into_ref()
}

// ─── Single-Instruction Latency ──────────────────────────────────────────────

fn bench_single_instruction(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_instruction");

    group.bench_function("x86_64_nop", |b| {
        b.iter(|| {
            let code = code(Arch::X86_64);
            let mut a = Assembler::new(&code).unwrap();
            a.emit(black_box(InstId::Nop), &[]).unwrap();
        })
    });

    group.bench_function("x86_64_mov_reg_imm", |b| {
        b.iter(|| {
            let code = code(Arch::X86_64);
            let mut a = Assembler::new(&code).unwrap();
            a.emit2(black_box(InstId::Mov), RAX, 0x1234i64).unwrap();
        })
    });

    group.bench_function("aarch64_movz", |b| {
        b.iter(|| {
            let code = code(Arch::Aarch64);
            let mut a = Assembler::new(&code).unwrap();
            a.emit2(black_box(InstId::Movz), x(0), 0x1234i64).unwrap();
        })
    });

    group.finish();
}

// ─── Stream throughput ───────────────────────────────────────────────────────

fn bench_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("x86_64_1000_alu", |b| {
        b.iter(|| {
            let code = code(Arch::X86_64);
            let mut a = Assembler::new(&code).unwrap();
            for i in 0..1000i64 {
                match i % 4 {
                    0 => a.emit2(InstId::Mov, RAX, i).unwrap(),
                    1 => a.emit2(InstId::Add, RAX, RBX).unwrap(),
                    2 => a.emit2(InstId::Xor, RAX, RAX).unwrap(),
                    _ => a.emit(InstId::Nop, &[]).unwrap(),
                }
            }
            black_box(code.borrow_mut().flatten_to_vec().unwrap())
        })
    });

    group.finish();
}

// ─── Label-heavy workload ────────────────────────────────────────────────────

fn bench_labels(c: &mut Criterion) {
    let mut group = c.benchmark_group("labels");

    group.bench_function("x86_64_200_forward_branches", |b| {
        b.iter(|| {
            let code = code(Arch::X86_64);
            let mut a = Assembler::new(&code).unwrap();
            let mut labels = Vec::with_capacity(200);
            for _ in 0..200 {
                let l = a.new_label().unwrap();
                a.emit(InstId::Jmp, &[l.into()]).unwrap();
                labels.push(l);
            }
            for l in labels {
                a.bind(l).unwrap();
            }
            black_box(a.offset())
        })
    });

    group.finish();
}

// ─── Builder replay ──────────────────────────────────────────────────────────

fn bench_builder(c: &mut Criterion) {
    let mut group = c.benchmark_group("builder");
    group.throughput(Throughput::Elements(500));

    group.bench_function("record_and_finalize_500", |b| {
        b.iter(|| {
            let code = code(Arch::X86_64);
            let mut bld = Builder::new(&code).unwrap();
            for i in 0..500i64 {
                bld.emit2(InstId::Mov, RAX, i).unwrap();
            }
            bld.finalize().unwrap();
            black_box(code.borrow().attached_emitter_count())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_instruction,
    bench_stream,
    bench_labels,
    bench_builder
);
criterion_main!(benches);
