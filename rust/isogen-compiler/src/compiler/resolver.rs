//! Executor resolution: from a static isolation to a runtime executor
//! reference.
//!
//! None of these operations hop. An actor's executor is represented by a
//! borrow of the actor reference itself; projecting the low-level executor
//! token out of it is left to a later pass.

use crate::compiler::function::FunctionLowering;
use crate::compiler::ir::{BuiltinName, Location, ValueId};
use crate::compiler::managed::ManagedValue;
use crate::LowerError;
use isogen_core::isolation::ActorIsolation;
use isogen_core::types::{SubstitutionMap, Type};
use tracing::trace;

impl FunctionLowering<'_> {
    /// The executor for `isolation`, or `None` when no specific executor is
    /// required.
    ///
    /// Caller-inheriting isolation yields `None` here; the prolog reads the
    /// isolated parameter directly instead.
    pub fn emit_executor(
        &mut self,
        loc: Location,
        isolation: &ActorIsolation,
        maybe_self: Option<ManagedValue>,
    ) -> Result<Option<ValueId>, LowerError> {
        match isolation {
            ActorIsolation::Unspecified
            | ActorIsolation::Nonisolated
            | ActorIsolation::NonisolatedUnsafe
            | ActorIsolation::CallerIsolationInheriting => Ok(None),
            ActorIsolation::Erased => Err(LowerError::ErasedIsolationExecutor {
                function: self.name().to_string(),
            }),
            ActorIsolation::ActorInstance(_) => {
                let actor = maybe_self.ok_or_else(|| LowerError::ActorInstanceWithoutActor {
                    function: self.name().to_string(),
                })?;
                Ok(Some(self.emit_load_actor_executor(loc, &actor)))
            }
            ActorIsolation::GlobalActor(global_actor) => {
                let global_actor = global_actor.map_into_context();
                self.emit_load_global_actor_executor(&global_actor).map(Some)
            }
        }
    }

    /// Borrow `actor` for use as an executor. Inside a formal evaluation
    /// scope the borrow is a formal access.
    pub fn emit_load_actor_executor(&mut self, loc: Location, actor: &ManagedValue) -> ValueId {
        let borrowed = if self.is_in_formal_evaluation_scope() {
            actor.formal_access_borrow(self, loc)
        } else {
            actor.borrow(self, loc)
        };
        borrowed.value()
    }

    /// Executor of the shared instance of `global_actor`.
    pub fn emit_load_global_actor_executor(
        &mut self,
        global_actor: &Type,
    ) -> Result<ValueId, LowerError> {
        let loc = self.function_loc().as_auto_generated();
        let (shared, _) = self.emit_load_of_global_actor_shared(loc, global_actor)?;
        Ok(self.emit_load_actor_executor(loc, &shared))
    }

    /// The generic executor: `Optional<Builtin.Executor>.none`.
    pub fn emit_generic_executor(&mut self, loc: Location) -> ValueId {
        trace!(function = %self.name(), "generic executor");
        self.builder.create_optional_none(loc, Type::optional_executor())
    }

    pub fn emit_main_executor(&mut self, loc: Location) -> ValueId {
        self.builder.create_builtin(
            loc,
            BuiltinName::BuildMainActorExecutorRef,
            Type::executor(),
            SubstitutionMap::empty(),
            Vec::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::function::FunctionLowering;
    use crate::compiler::ir::{InstKind, Location};
    use crate::options::{LowerOptions, RuntimeIntrinsics};
    use crate::LowerError;
    use isogen_core::decl::{FunctionDecl, FunctionKind, FunctionRef, Program};
    use isogen_core::isolation::ActorIsolation;
    use isogen_core::span::Span;
    use isogen_core::types::Type;

    fn loc() -> Location {
        Location::regular(Span::dummy())
    }

    fn program_with(isolation: ActorIsolation) -> (Program, FunctionRef) {
        let mut program = Program::new();
        let id = program.add_function(FunctionDecl::new("f", FunctionKind::Func, isolation));
        (program, FunctionRef::Func(id))
    }

    #[test]
    fn nonisolated_like_and_caller_inheriting_have_no_executor() {
        let (program, f) = program_with(ActorIsolation::Nonisolated);
        let options = LowerOptions::default();
        let intrinsics = RuntimeIntrinsics::default();
        let mut lowering = FunctionLowering::new(&program, f, &options, &intrinsics);
        for isolation in [
            ActorIsolation::Unspecified,
            ActorIsolation::Nonisolated,
            ActorIsolation::NonisolatedUnsafe,
            ActorIsolation::CallerIsolationInheriting,
        ] {
            assert_eq!(lowering.emit_executor(loc(), &isolation, None).unwrap(), None);
        }
        assert_eq!(lowering.builder().function().instructions().count(), 0);
    }

    #[test]
    fn erased_isolation_has_no_static_executor() {
        let (program, f) = program_with(ActorIsolation::Nonisolated);
        let options = LowerOptions::default();
        let intrinsics = RuntimeIntrinsics::default();
        let mut lowering = FunctionLowering::new(&program, f, &options, &intrinsics);
        let err = lowering
            .emit_executor(loc(), &ActorIsolation::Erased, None)
            .unwrap_err();
        assert!(matches!(err, LowerError::ErasedIsolationExecutor { .. }));
    }

    #[test]
    fn generic_executor_is_an_absent_optional() {
        let (program, f) = program_with(ActorIsolation::Nonisolated);
        let options = LowerOptions::default();
        let intrinsics = RuntimeIntrinsics::default();
        let mut lowering = FunctionLowering::new(&program, f, &options, &intrinsics);
        let v = lowering.emit_generic_executor(loc());
        let func = lowering.finish();
        assert_eq!(func.value_type(v), &Type::optional_executor());
        assert!(matches!(
            func.defining_instruction(v).map(|i| &i.kind),
            Some(InstKind::OptionalNone { .. })
        ));
    }

    #[test]
    fn main_executor_uses_builtin() {
        let (program, f) = program_with(ActorIsolation::Nonisolated);
        let options = LowerOptions::default();
        let intrinsics = RuntimeIntrinsics::default();
        let mut lowering = FunctionLowering::new(&program, f, &options, &intrinsics);
        let v = lowering.emit_main_executor(loc());
        let func = lowering.finish();
        assert_eq!(func.value_type(v), &Type::executor());
        assert_eq!(
            func.count_instructions(|k| matches!(k, InstKind::Builtin { .. })),
            1
        );
    }
}
