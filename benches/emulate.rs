#![allow(unused)]
extern crate vmpeel;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use vmpeel::emulation::{KnownValue, OpSize};
use vmpeel::prelude::*;

/// A representative deobfuscation workload: constant setup, bit mixing, and
/// stack traffic, the instruction diet of a typical virtualized handler.
const TRACE: &[(&str, &[u8])] = &[
    ("mov eax, 0x12345678", &[0xb8, 0x78, 0x56, 0x34, 0x12]),
    ("xor ecx, ecx", &[0x33, 0xc9]),
    ("add ecx, 0x10", &[0x83, 0xc1, 0x10]),
    ("shl eax, 3", &[0xc1, 0xe0, 0x03]),
    ("xor eax, ecx", &[0x33, 0xc1]),
    ("push eax", &[0x50]),
    ("ror eax, 7", &[0xc1, 0xc8, 0x07]),
    ("test eax, eax", &[0x85, 0xc0]),
    ("pop edx", &[0x5a]),
    ("sub eax, edx", &[0x2b, 0xc2]),
];

fn bench_decode_execute_loop(c: &mut Criterion) {
    let trace_bytes: usize = TRACE.iter().map(|(_, bytes)| bytes.len()).sum();

    let mut group = c.benchmark_group("emulate");
    group.throughput(Throughput::Bytes(trace_bytes as u64));
    group.bench_function("handler_trace", |b| {
        let mut emu = Emulator::new(EmulatorConfig::default()).unwrap();
        let mut va = 0x0040_1000u32;
        b.iter(|| {
            for (_, bytes) in TRACE {
                emu.run(black_box(va), black_box(bytes)).unwrap();
                va = va.wrapping_add(bytes.len() as u32);
            }
            black_box(emu.reg(Gpr::Eax))
        });
    });
    group.finish();
}

fn bench_single_instruction(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.bench_function("mov_imm", |b| {
        let mut emu = Emulator::new(EmulatorConfig::default()).unwrap();
        let code = [0xb8, 0x34, 0x12, 0x00, 0x00];
        b.iter(|| emu.run(black_box(0x0040_1000), black_box(&code)).unwrap());
    });
    group.bench_function("modrm_sib_load", |b| {
        let mut emu = Emulator::new(EmulatorConfig::default()).unwrap();
        let base = emu.stack_base();
        emu.set_reg(Gpr::Ebx, KnownValue::known(base + 0x100));
        emu.set_reg(Gpr::Esi, KnownValue::known(4));
        // mov eax, [ebx+esi*4+8]
        let code = [0x8b, 0x44, 0xb3, 0x08];
        b.iter(|| emu.run(black_box(0x0040_1000), black_box(&code)).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_decode_execute_loop, bench_single_instruction);
criterion_main!(benches);
