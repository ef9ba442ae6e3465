//! Interpreted vs compiled execution
//!
//! Measures the same prototypes run by the reference interpreter and by
//! native code: a numeric for loop (runtime helpers on every iteration)
//! and recursive fib (call dispatch).

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use tessera_jit::{JitConfig, JitEngine};
use tessera_runtime::bytecode::rk;
use tessera_runtime::vm::MULTRET;
use tessera_runtime::{FunctionHandle, OpCode, Proto, ProtoBuilder, State, Value};

fn sum_loop() -> Arc<Proto> {
    let mut b = ProtoBuilder::new("sum").with_params(1).with_max_stack(6);
    let zero = b.constant(Value::integer(0));
    let one = b.constant(Value::integer(1));
    b.emit_abx(OpCode::LoadK, 1, zero);
    b.emit_abx(OpCode::LoadK, 2, one);
    b.emit_abc(OpCode::Move, 3, 0, 0);
    b.emit_abx(OpCode::LoadK, 4, one);
    let prep = b.emit_asbx(OpCode::ForPrep, 2, 0);
    let body = b.emit_abc(OpCode::Add, 1, 1, 5);
    let looping = b.emit_asbx(OpCode::ForLoop, 2, 0);
    b.patch_jump_to(prep, looping);
    b.patch_jump_to(looping, body);
    b.emit_abc(OpCode::Return, 1, 2, 0);
    b.build()
}

/// Registered as function 0
fn fib() -> Arc<Proto> {
    let mut b = ProtoBuilder::new("fib").with_params(1).with_max_stack(6);
    let two = b.constant(Value::integer(2));
    let one = b.constant(Value::integer(1));
    let this = b.constant(Value::function(FunctionHandle(0)));
    b.emit_abc(OpCode::Lt, 1, 0, rk::as_constant(two));
    let to_base = b.emit_jump();
    b.emit_abx(OpCode::LoadK, 1, this);
    b.emit_abc(OpCode::Sub, 2, 0, rk::as_constant(one));
    b.emit_abc(OpCode::Call, 1, 2, 2);
    b.emit_abx(OpCode::LoadK, 2, this);
    b.emit_abc(OpCode::Sub, 3, 0, rk::as_constant(two));
    b.emit_abc(OpCode::Call, 2, 2, 2);
    b.emit_abc(OpCode::Add, 1, 1, 2);
    b.emit_abc(OpCode::Return, 1, 2, 0);
    b.patch_jump(to_base);
    b.emit_abc(OpCode::Return, 0, 2, 0);
    b.build()
}

/// An interpreting state and a compiling state, each with `proto` as
/// function 0
fn states(proto: fn() -> Arc<Proto>) -> (State, Value, State, Value) {
    let mut interp = State::new();
    let f = interp.register_script(proto());

    let config = JitConfig {
        verify_ir: false,
        ..JitConfig::default()
    };
    let engine = Arc::new(JitEngine::new(config).expect("host ISA"));
    let mut native = State::with_compiler(engine);
    let g = native.register_script(proto());
    (interp, f, native, g)
}

fn bench_sum_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("sum_loop");
    let (mut interp, f, mut native, g) = states(sum_loop);
    for n in [100i64, 10_000] {
        group.bench_with_input(BenchmarkId::new("interpreted", n), &n, |b, &n| {
            b.iter(|| interp.call(f, &[Value::integer(black_box(n))], MULTRET))
        });
        group.bench_with_input(BenchmarkId::new("compiled", n), &n, |b, &n| {
            b.iter(|| native.call(g, &[Value::integer(black_box(n))], MULTRET))
        });
    }
    group.finish();
}

fn bench_fib(c: &mut Criterion) {
    let mut group = c.benchmark_group("fib");
    let (mut interp, f, mut native, g) = states(fib);
    for n in [10i64, 20] {
        group.bench_with_input(BenchmarkId::new("interpreted", n), &n, |b, &n| {
            b.iter(|| interp.call(f, &[Value::integer(black_box(n))], 1))
        });
        group.bench_with_input(BenchmarkId::new("compiled", n), &n, |b, &n| {
            b.iter(|| native.call(g, &[Value::integer(black_box(n))], 1))
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let engine = JitEngine::new(JitConfig::default()).expect("host ISA");
    let proto = fib();
    c.bench_function("compile_fib", |b| {
        b.iter(|| engine.compile_function(black_box(&proto)))
    });
}

criterion_group!(benches, bench_sum_loop, bench_fib, bench_compile);
criterion_main!(benches);
