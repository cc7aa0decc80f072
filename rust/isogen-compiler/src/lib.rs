//! Isogen Compiler
//!
//! Actor-isolation lowering: turns the static isolation of functions,
//! closures and initializers into executor hops, runtime executor checks
//! and the isolation payload carried by `@isolated(any)` function values.

pub mod compiler;
pub mod options;

use compiler::function::FunctionLowering;
use compiler::ir::IrFunction;
use isogen_core::decl::{FunctionKind, FunctionRef, Program, ProgramError};
use isogen_core::types::KnownProtocol;
use options::{ConfigError, LowerOptions, RuntimeIntrinsics};
use thiserror::Error;
use tracing::debug;

/// Internal-consistency failures. Each one means the type checker and the
/// lowering disagree about a declaration; none is a user error.
#[derive(Debug, Error)]
pub enum LowerError {
    #[error("'{function}' cannot have erased isolation")]
    ErasedIsolationOnDeclaration { function: String },
    #[error("executor emission for erased isolation in '{function}'")]
    ErasedIsolationExecutor { function: String },
    #[error("deinit '{function}' cannot have erased isolation")]
    ErasedDestructorIsolation { function: String },
    #[error("parameter-isolated function value in '{function}' has no static isolation")]
    ParameterIsolationHasNoStaticToken { function: String },
    #[error("caller-isolation-inheriting '{function}' has no isolated parameter")]
    CallerIsolationWithoutIsolatedParam { function: String },
    #[error("caller-isolation-inheriting '{function}' is not async")]
    CallerIsolationInSyncFunction { function: String },
    #[error("actor-instance isolation in '{function}' without an actor value")]
    ActorInstanceWithoutActor { function: String },
    #[error("'{function}': {isolation} isolation is not parameter isolation")]
    UnexpectedParameterIsolation { function: String, isolation: String },
    #[error("'{function}': {isolation} isolation has no executor to check")]
    NoExecutorForIsolation { function: String, isolation: String },
    #[error("no shared actor instance in global actor '{ty}'")]
    MissingGlobalActorShared { ty: String },
    #[error("'{ty}' does not conform to {protocol}")]
    MissingConformance { ty: String, protocol: KnownProtocol },
    #[error("explicit hop to an actor in non-async '{function}'")]
    HopToActorOutsideAsync { function: String },
    #[error("explicit hop to an actor in '{function}', which is {isolation}")]
    HopToActorFromIsolatedContext { function: String, isolation: String },
    #[error("closure '{function}' is isolated to an actor instance that is not a capture")]
    ClosureIsolationNotCapture { function: String },
    #[error("isolated capture '{var}' of '{function}' is not captured by value")]
    IsolatedCaptureNotConstant { function: String, var: String },
    #[error("'{function}' has no value for capture #{index}")]
    MissingCaptureValue { function: String, index: usize },
    #[error("lazy expected executor outside an actor initializer isolated to self: '{function}'")]
    LazyExecutorOutsideActorInit { function: String },
    #[error("expected executor of '{function}' set twice")]
    ExpectedExecutorAlreadySet { function: String },
    #[error("expected executor used before the prolog set it")]
    ExpectedExecutorNotSet,
    #[error("'{function}' does not need an expected executor")]
    ExpectedExecutorUnnecessary { function: String },
    #[error("unknown function {0:?}")]
    UnknownFunction(FunctionRef),
    #[error("malformed program: {0}")]
    InvalidProgram(#[from] ProgramError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("multiple errors: {0:?}")]
    Multiple(Vec<LowerError>),
}

impl LowerError {
    /// Combine a list of errors. Returns `None` for an empty list, the
    /// error itself for a single-element list, and flattens nested
    /// `Multiple` variants.
    pub fn from_multiple(errors: Vec<LowerError>) -> Option<LowerError> {
        let mut flattened: Vec<LowerError> = errors
            .into_iter()
            .flat_map(|e| match e {
                LowerError::Multiple(inner) => inner,
                other => vec![other],
            })
            .collect();
        match flattened.len() {
            0 => None,
            1 => flattened.pop(),
            _ => Some(LowerError::Multiple(flattened)),
        }
    }
}

/// Lower the entry of one function or closure: bind its arguments, emit the
/// expected-executor prolog, and close it with a return.
pub fn lower_function(
    program: &Program,
    function: FunctionRef,
    options: &LowerOptions,
    intrinsics: &RuntimeIntrinsics,
) -> Result<IrFunction, LowerError> {
    let lowering = lower_prolog(program, function, options, intrinsics)?;
    Ok(lowering.finish())
}

/// Like [`lower_function`], but hands back the lowering after the prolog so
/// the caller can emit a body.
pub fn lower_prolog<'p>(
    program: &'p Program,
    function: FunctionRef,
    options: &'p LowerOptions,
    intrinsics: &'p RuntimeIntrinsics,
) -> Result<FunctionLowering<'p>, LowerError> {
    if !program.contains(function) {
        return Err(LowerError::UnknownFunction(function));
    }
    program.validate_function(function)?;
    debug!(function = %program.name_of(function), "lowering");
    let mut lowering = FunctionLowering::new(program, function, options, intrinsics);
    let is_constructor = matches!(
        function,
        FunctionRef::Func(id) if program.function(id).kind == FunctionKind::Constructor
    );
    if is_constructor {
        lowering.emit_constructor_expected_executor_prolog()?;
    } else {
        lowering.emit_expected_executor_prolog()?;
    }
    Ok(lowering)
}

/// Lower every function and closure of `program`, collecting all failures.
pub fn lower_program(
    program: &Program,
    options: &LowerOptions,
    intrinsics: &RuntimeIntrinsics,
) -> Result<Vec<IrFunction>, LowerError> {
    let functions = program
        .function_ids()
        .map(FunctionRef::Func)
        .chain(program.closure_ids().map(FunctionRef::Closure));

    let mut lowered = Vec::new();
    let mut errors = Vec::new();
    for function in functions {
        match lower_function(program, function, options, intrinsics) {
            Ok(ir) => lowered.push(ir),
            Err(e) => errors.push(e),
        }
    }
    if let Some(combined) = LowerError::from_multiple(errors) {
        return Err(combined);
    }
    Ok(lowered)
}

/// Lower a program with options loaded from a TOML file.
pub fn lower_program_with_config(
    program: &Program,
    config: &std::path::Path,
    intrinsics: &RuntimeIntrinsics,
) -> Result<Vec<IrFunction>, LowerError> {
    let options = LowerOptions::load_from(config)?;
    lower_program(program, &options, intrinsics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_multiple_flattens() {
        assert!(LowerError::from_multiple(vec![]).is_none());
        let single = LowerError::from_multiple(vec![LowerError::ExpectedExecutorNotSet]).unwrap();
        assert!(matches!(single, LowerError::ExpectedExecutorNotSet));
        let nested = LowerError::from_multiple(vec![
            LowerError::Multiple(vec![
                LowerError::ExpectedExecutorNotSet,
                LowerError::ExpectedExecutorNotSet,
            ]),
            LowerError::ExpectedExecutorNotSet,
        ])
        .unwrap();
        match nested {
            LowerError::Multiple(inner) => assert_eq!(inner.len(), 3),
            other => panic!("expected Multiple, got {:?}", other),
        }
    }

    #[test]
    fn unknown_function_is_rejected() {
        let program = Program::new();
        let err = lower_function(
            &program,
            FunctionRef::Func(isogen_core::decl::FuncId(7)),
            &LowerOptions::default(),
            &RuntimeIntrinsics::default(),
        )
        .unwrap_err();
        assert!(matches!(err, LowerError::UnknownFunction(_)));
    }

    #[test]
    fn error_messages_name_the_function() {
        let err = LowerError::CallerIsolationInSyncFunction {
            function: "run".to_string(),
        };
        assert_eq!(err.to_string(), "caller-isolation-inheriting 'run' is not async");
    }
}
