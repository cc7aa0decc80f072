//! Criterion benchmarks for prolog lowering.
//!
//! Measures throughput of `lower_program` over synthetic modules mixing
//! nonisolated, actor-isolated and global-actor functions, with and without
//! data-race checks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use isogen_compiler::options::{LowerOptions, RuntimeIntrinsics};
use isogen_compiler::{lower_function, lower_program};
use isogen_core::decl::{
    Capture, CaptureInfo, ClosureExpr, DeclContext, FunctionDecl, FunctionKind, FunctionRef,
    ParamDecl, Program, VarKind,
};
use isogen_core::isolation::{ActorInstance, ActorIsolation};
use isogen_core::types::{NominalDecl, NominalKind, StorageKind, Type};

/// A module with `n` groups of declarations. Each group has an async actor
/// method, a sync local function capturing the actor, a global-actor
/// function, a nonisolated async function and a global-actor closure.
fn synthetic_program(n: usize) -> Program {
    let mut program = Program::new();
    let main_impl = program.types.add(NominalDecl::new("MainActorImpl", NominalKind::Actor));
    let main_decl = NominalDecl::new("MainActor", NominalKind::Struct).with_shared_instance(
        "shared",
        Type::nominal(main_impl),
        StorageKind::Stored,
    );
    let main = Type::nominal(program.types.add(main_decl));

    for i in 0..n {
        let actor_decl =
            program.types.add(NominalDecl::new(format!("Actor{}", i), NominalKind::Actor));
        let actor = Type::nominal(actor_decl);
        let self_var = program.add_var("self", actor, VarKind::SelfParam);

        let mut method = FunctionDecl::new(
            format!("Actor{}.run", i),
            FunctionKind::Func,
            ActorIsolation::ActorInstance(ActorInstance::self_parameter(self_var)),
        );
        method.is_async = true;
        method.self_param = Some(ParamDecl::guaranteed(self_var));
        method.parent = DeclContext::Nominal(actor_decl);
        let method = program.add_function(method);

        let mut local = FunctionDecl::new(
            format!("Actor{}.run.step", i),
            FunctionKind::Func,
            ActorIsolation::ActorInstance(ActorInstance::capture(self_var)),
        );
        local.is_local_capture = true;
        local.captures = CaptureInfo::new(vec![Capture::isolated(self_var)]);
        local.parent = DeclContext::Function(method);
        program.add_function(local);

        let render = FunctionDecl::new(
            format!("render{}", i),
            FunctionKind::Func,
            ActorIsolation::GlobalActor(main.clone()),
        );
        program.add_function(render);

        let mut fetch = FunctionDecl::new(
            format!("fetch{}", i),
            FunctionKind::Func,
            ActorIsolation::Nonisolated,
        );
        fetch.is_async = true;
        program.add_function(fetch);

        let mut closure = ClosureExpr::new(
            format!("closure{}", i),
            ActorIsolation::GlobalActor(main.clone()),
            DeclContext::Module,
        );
        closure.requires_dynamic_isolation_checking = true;
        program.add_closure(closure);
    }
    program
}

fn bench_lower_program(c: &mut Criterion) {
    let sizes = [("small", 10), ("medium", 100), ("large", 1000)];
    let intrinsics = RuntimeIntrinsics::default();
    let unchecked = LowerOptions::default();
    let checked = LowerOptions {
        actor_data_race_checks: true,
        ..LowerOptions::default()
    };

    let mut group = c.benchmark_group("lower_program");
    for (label, n) in &sizes {
        let program = synthetic_program(*n);
        let functions = program.function_ids().count() + program.closure_ids().count();
        group.throughput(Throughput::Elements(functions as u64));
        group.bench_with_input(BenchmarkId::new("unchecked", label), &program, |b, p| {
            b.iter(|| lower_program(black_box(p), &unchecked, &intrinsics))
        });
        group.bench_with_input(BenchmarkId::new("checked", label), &program, |b, p| {
            b.iter(|| lower_program(black_box(p), &checked, &intrinsics))
        });
    }
    group.finish();
}

fn bench_single_prolog(c: &mut Criterion) {
    let program = synthetic_program(1);
    let intrinsics = RuntimeIntrinsics::default();
    let options = LowerOptions {
        actor_data_race_checks: true,
        ..LowerOptions::default()
    };

    let mut group = c.benchmark_group("lower_function");
    for id in program.function_ids() {
        let name = program.function(id).name.clone();
        let function = FunctionRef::Func(id);
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| lower_function(black_box(&program), function, &options, &intrinsics))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_lower_program, bench_single_prolog);
criterion_main!(benches);
