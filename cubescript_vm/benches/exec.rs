//! Compile and dispatch throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cubescript_core::state::CsState;
use cubescript_vm::{init_libs, run_code_int, run_int, LIB_ALL};
use std::rc::Rc;

fn fresh_state() -> CsState {
    let mut cs = CsState::new();
    cs.set_error_sink(Rc::new(|_| {}));
    init_libs(&mut cs, LIB_ALL).unwrap();
    cs
}

fn bench_compile_and_run(c: &mut Criterion) {
    let mut cs = fresh_state();
    c.bench_function("compile+run arithmetic", |b| {
        b.iter(|| run_int(&mut cs, black_box("+ 1 2 3 4 5")).unwrap())
    });
}

fn bench_precompiled(c: &mut Criterion) {
    let mut cs = fresh_state();
    let code = cubescript_compiler::compile_ret(
        &mut cs,
        "loopconcat i 32 [* $i $i]",
        cubescript_core::RetType::Int,
    );
    c.bench_function("run precompiled loop", |b| {
        b.iter(|| run_code_int(&mut cs, black_box(&code)).unwrap())
    });
}

fn bench_alias_calls(c: &mut Criterion) {
    let mut cs = fresh_state();
    run_int(&mut cs, "alias sq [* $arg1 $arg1]").unwrap();
    let code = cubescript_compiler::compile_ret(
        &mut cs,
        "sq 12",
        cubescript_core::RetType::Int,
    );
    c.bench_function("alias call", |b| {
        b.iter(|| run_code_int(&mut cs, black_box(&code)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_compile_and_run,
    bench_precompiled,
    bench_alias_calls
);
criterion_main!(benches);
