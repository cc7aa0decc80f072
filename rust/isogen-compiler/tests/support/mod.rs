//! Program-building helpers shared by the integration suites.

#![allow(dead_code)]

use isogen_compiler::compiler::ir::{InstKind, IrFunction, Location, ValueId};
use isogen_compiler::options::LowerOptions;
use isogen_core::decl::{
    DeclContext, FuncId, FunctionDecl, FunctionKind, ParamDecl, Program, VarId, VarKind,
};
use isogen_core::isolation::{ActorInstance, ActorIsolation};
use isogen_core::span::{FileId, SourceFile, Span};
use isogen_core::types::{NominalDecl, NominalKind, StorageKind, Type};

pub const CHECK_INTRINSIC: &str = "_checkExpectedExecutor";

pub fn loc() -> Location {
    Location::regular(Span::dummy())
}

pub fn checks_on() -> LowerOptions {
    LowerOptions {
        actor_data_race_checks: true,
        ..LowerOptions::default()
    }
}

/// A program with one registered source file, so spans resolve to a path.
pub fn program() -> (Program, FileId) {
    let mut program = Program::new();
    let file = program.add_file(SourceFile::new("Sources/App/Counter.swift"));
    (program, file)
}

pub fn span(file: FileId, line: usize) -> Span {
    Span::new(file, 0, 1, line, 1)
}

pub fn add_actor(program: &mut Program, name: &str) -> Type {
    let decl = program.types.add(NominalDecl::new(name, NominalKind::Actor));
    Type::nominal(decl)
}

pub fn add_distributed_actor(program: &mut Program, name: &str) -> Type {
    let decl = program.types.add(NominalDecl::new(name, NominalKind::DistributedActor));
    Type::nominal(decl)
}

/// A global actor `name` whose stored `shared` member is an instance of a
/// fresh actor type.
pub fn add_global_actor(program: &mut Program, name: &str) -> Type {
    let instance = add_actor(program, &format!("{}Actor", name));
    let decl = NominalDecl::new(name, NominalKind::Struct).with_shared_instance(
        "shared",
        instance,
        StorageKind::Stored,
    );
    Type::nominal(program.types.add(decl))
}

pub fn add_func(
    program: &mut Program,
    name: &str,
    isolation: ActorIsolation,
    is_async: bool,
) -> FuncId {
    let mut decl = FunctionDecl::new(name, FunctionKind::Func, isolation);
    decl.is_async = is_async;
    program.add_function(decl)
}

/// A method of `actor` isolated to its guaranteed `self`.
pub fn add_actor_method(
    program: &mut Program,
    name: &str,
    actor: &Type,
    kind: FunctionKind,
    is_async: bool,
) -> (FuncId, VarId) {
    let self_var = program.add_var("self", actor.clone(), VarKind::SelfParam);
    let mut decl = FunctionDecl::new(
        name,
        kind,
        ActorIsolation::ActorInstance(ActorInstance::self_parameter(self_var)),
    );
    decl.is_async = is_async;
    decl.self_param = Some(match kind {
        FunctionKind::Constructor => ParamDecl::owned(self_var),
        _ => ParamDecl::guaranteed(self_var),
    });
    if let Some(nominal) = actor.nominal_decl() {
        decl.parent = DeclContext::Nominal(nominal);
    }
    (program.add_function(decl), self_var)
}

pub fn entry_args(func: &IrFunction) -> Vec<ValueId> {
    func.block(func.entry()).args.clone()
}

/// Calls of the executor check intrinsic.
pub fn check_calls(func: &IrFunction) -> Vec<Vec<ValueId>> {
    func.instructions()
        .filter_map(|i| match &i.kind {
            InstKind::Apply { callee, args, .. }
                if is_function_ref(func, *callee, CHECK_INTRINSIC) =>
            {
                Some(args.clone())
            }
            _ => None,
        })
        .collect()
}

pub fn is_function_ref(func: &IrFunction, value: ValueId, name: &str) -> bool {
    matches!(
        func.defining_instruction(value).map(|i| &i.kind),
        Some(InstKind::FunctionRef { name: n, .. }) if n == name
    )
}

/// Operands of every `extract_executor`.
pub fn extracted(func: &IrFunction) -> Vec<ValueId> {
    func.instructions()
        .filter_map(|i| match i.kind {
            InstKind::ExtractExecutor { operand, .. } => Some(operand),
            _ => None,
        })
        .collect()
}

pub fn count(func: &IrFunction, pred: impl Fn(&InstKind) -> bool) -> usize {
    func.count_instructions(pred)
}
