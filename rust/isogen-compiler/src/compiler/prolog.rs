//! Function entry prolog: establishes the expected executor and either hops
//! to it (async) or checks it (sync).

use crate::compiler::executor::RewriteHook;
use crate::compiler::function::FunctionLowering;
use crate::compiler::ir::Location;
use crate::compiler::managed::ManagedValue;
use crate::LowerError;
use isogen_core::decl::{DeclContext, FunctionKind, FunctionRef, VarId};
use isogen_core::isolation::ActorIsolation;
use isogen_core::types::Type;
use tracing::debug;

impl FunctionLowering<'_> {
    /// Whether a synchronous function should check at entry that it runs
    /// on its expected executor.
    pub fn want_data_race_checks(&self) -> Result<bool, LowerError> {
        if self.is_async() || self.is_defer() {
            return Ok(false);
        }
        if self.options().actor_data_race_checks
            && !self.is_in_actor_destructor(self.function_ref().into())?
        {
            return Ok(true);
        }
        if self.options().dynamic_actor_isolation_checking {
            if let FunctionRef::Closure(id) = self.function_ref() {
                if self.program().closure(id).requires_dynamic_isolation_checking {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Whether `dc` is nested in the destructor of an actor. Such a
    /// destructor holds the only reference to its actor but does not run
    /// on the actor's executor.
    pub fn is_in_actor_destructor(&self, dc: DeclContext) -> Result<bool, LowerError> {
        let program = self.program();
        let mut current = dc;
        while !current.is_module_scope() && !current.is_type_context() {
            if let DeclContext::Function(id) = current {
                let decl = program.function(id);
                if decl.kind == FunctionKind::Destructor {
                    return match &decl.isolation {
                        ActorIsolation::ActorInstance(_) => Ok(true),
                        ActorIsolation::GlobalActor(_)
                        | ActorIsolation::Unspecified
                        | ActorIsolation::Nonisolated
                        | ActorIsolation::NonisolatedUnsafe
                        | ActorIsolation::CallerIsolationInheriting => Ok(false),
                        ActorIsolation::Erased => Err(LowerError::ErasedDestructorIsolation {
                            function: decl.name.clone(),
                        }),
                    };
                }
            }
            match program.parent_of(current) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Ok(false)
    }

    fn is_defer(&self) -> bool {
        match self.function_ref() {
            FunctionRef::Func(id) => self.program().function(id).kind == FunctionKind::Defer,
            FunctionRef::Closure(_) => false,
        }
    }

    pub fn unsafely_inherits_executor(&self) -> bool {
        match self.function_ref() {
            FunctionRef::Func(id) => self.program().function(id).attrs.unsafe_inherit_executor,
            FunctionRef::Closure(_) => false,
        }
    }

    // ── Expected executor sources ───────────────────────────────────

    fn prolog_loc(&self) -> Location {
        self.function_loc().as_auto_generated()
    }

    fn set_expected_executor_for_generic(&mut self) -> Result<(), LowerError> {
        let executor = self.emit_generic_executor(self.prolog_loc());
        self.expected_executor.set(executor, self.name())
    }

    fn set_expected_executor_for_global_actor(
        &mut self,
        global_actor: &Type,
    ) -> Result<(), LowerError> {
        let executor = self.emit_load_global_actor_executor(global_actor)?;
        self.expected_executor.set(executor, self.name())
    }

    fn set_expected_executor_for_local_var(&mut self, var: VarId) -> Result<(), LowerError> {
        let loc = self.prolog_loc();
        let actor = self.emit_rvalue_for_decl(loc, var);
        let executor = self.emit_load_actor_executor(loc, &actor);
        self.expected_executor.set(executor, self.name())
    }

    fn set_expected_executor_for_argument(
        &mut self,
        argument: ManagedValue,
    ) -> Result<(), LowerError> {
        let executor = self.emit_load_actor_executor(self.prolog_loc(), &argument);
        self.expected_executor.set(executor, self.name())
    }

    fn set_expected_executor_for_parameter_isolation(
        &mut self,
        isolation: &ActorIsolation,
    ) -> Result<(), LowerError> {
        match isolation {
            ActorIsolation::ActorInstance(instance) => {
                if isolation.is_actor_instance_for_self_parameter() {
                    let self_arg = self.self_argument().ok_or_else(|| {
                        LowerError::ActorInstanceWithoutActor {
                            function: self.name().to_string(),
                        }
                    })?;
                    return self.set_expected_executor_for_argument(self_arg);
                }
                self.set_expected_executor_for_local_var(instance.var)
            }
            ActorIsolation::CallerIsolationInheriting => {
                let isolated = self.isolated_argument().ok_or_else(|| {
                    LowerError::CallerIsolationWithoutIsolatedParam {
                        function: self.name().to_string(),
                    }
                })?;
                self.set_expected_executor_for_argument(isolated)
            }
            ActorIsolation::Unspecified
            | ActorIsolation::Nonisolated
            | ActorIsolation::NonisolatedUnsafe
            | ActorIsolation::GlobalActor(_)
            | ActorIsolation::Erased => Err(LowerError::UnexpectedParameterIsolation {
                function: self.name().to_string(),
                isolation: isolation.to_string(),
            }),
        }
    }

    fn require_async_for_caller_isolation(&self) -> Result<(), LowerError> {
        if self.is_async() {
            Ok(())
        } else {
            Err(LowerError::CallerIsolationInSyncFunction {
                function: self.name().to_string(),
            })
        }
    }

    /// The prolog runs once; a second run would emit another entry hop.
    fn require_expected_executor_unset(&self) -> Result<(), LowerError> {
        if self.expected_executor.is_valid() {
            return Err(LowerError::ExpectedExecutorAlreadySet {
                function: self.name().to_string(),
            });
        }
        Ok(())
    }

    // ── Prolog ──────────────────────────────────────────────────────

    /// Decide the expected executor for this function and enforce it at
    /// entry.
    pub fn emit_expected_executor_prolog(&mut self) -> Result<(), LowerError> {
        self.require_expected_executor_unset()?;
        let want_checks = self.want_data_race_checks()?;
        let is_async = self.is_async();
        let program = self.program();
        let isolation = program.isolation_of(self.function_ref());
        debug!(
            function = %self.name(),
            %isolation,
            is_async,
            want_checks,
            "emitting expected executor prolog"
        );

        match self.function_ref() {
            FunctionRef::Func(id) => {
                let decl = program.function(id);
                match isolation {
                    ActorIsolation::Unspecified
                    | ActorIsolation::Nonisolated
                    | ActorIsolation::NonisolatedUnsafe => {}
                    ActorIsolation::Erased => {
                        return Err(LowerError::ErasedIsolationOnDeclaration {
                            function: decl.name.clone(),
                        });
                    }
                    ActorIsolation::ActorInstance(_) => {
                        // A sync method is only entered from code already
                        // isolated to its actor, so it gets no entry check.
                        // Local functions may escape that context: they are
                        // checked, reading the actor from the capture so the
                        // instance is identical to the enclosing function's.
                        if is_async || (want_checks && decl.is_local_capture) {
                            match decl.captures.isolated_param_capture() {
                                Some(var) => self.set_expected_executor_for_local_var(var)?,
                                None => {
                                    self.set_expected_executor_for_parameter_isolation(isolation)?
                                }
                            }
                        }
                    }
                    ActorIsolation::CallerIsolationInheriting => {
                        self.require_async_for_caller_isolation()?;
                        self.set_expected_executor_for_parameter_isolation(isolation)?;
                    }
                    ActorIsolation::GlobalActor(global_actor) => {
                        if is_async || want_checks {
                            let global_actor = global_actor.map_into_context();
                            self.set_expected_executor_for_global_actor(&global_actor)?;
                        }
                    }
                }
            }
            FunctionRef::Closure(id) => {
                let closure = program.closure(id);
                let want_executor = is_async || want_checks;
                match isolation {
                    ActorIsolation::Unspecified
                    | ActorIsolation::Nonisolated
                    | ActorIsolation::NonisolatedUnsafe => {}
                    ActorIsolation::CallerIsolationInheriting => {
                        self.require_async_for_caller_isolation()?;
                        self.set_expected_executor_for_parameter_isolation(isolation)?;
                    }
                    ActorIsolation::Erased => {
                        return Err(LowerError::ErasedIsolationOnDeclaration {
                            function: closure.name.clone(),
                        });
                    }
                    ActorIsolation::ActorInstance(instance) => {
                        if want_executor {
                            self.set_expected_executor_for_local_var(instance.var)?;
                        }
                    }
                    ActorIsolation::GlobalActor(global_actor) => {
                        if want_executor {
                            let global_actor = global_actor.map_into_context();
                            self.set_expected_executor_for_global_actor(&global_actor)?;
                        }
                    }
                }
            }
        }

        if !self.expected_executor.is_valid() {
            if is_async && !self.unsafely_inherits_executor() {
                self.set_expected_executor_for_generic()?;
            } else {
                self.expected_executor.set_unnecessary(self.name())?;
            }
        }

        if !self.expected_executor.is_necessary() {
            return Ok(());
        }
        let executor = self
            .expected_executor
            .eager()
            .ok_or(LowerError::ExpectedExecutorNotSet)?;
        if is_async {
            let loc = self.function_loc().as_debug_only();
            self.builder.create_hop_to_executor(loc, executor, false);
        } else {
            let loc = self.prolog_loc();
            self.emit_precondition_check_expected_executor(loc, executor);
        }
        Ok(())
    }

    /// Prolog for initializers. Async initializers isolated to their own
    /// `self` cannot read `self` yet: the expected executor is lazy, the
    /// function starts on the generic executor, and a rewrite hook marks
    /// where the real hop goes once `self` is initialized.
    pub fn emit_constructor_expected_executor_prolog(&mut self) -> Result<(), LowerError> {
        self.require_expected_executor_unset()?;
        let program = self.program();
        let FunctionRef::Func(id) = self.function_ref() else {
            return self.emit_expected_executor_prolog();
        };
        let ctor = program.function(id);
        if ctor.kind != FunctionKind::Constructor {
            return self.emit_expected_executor_prolog();
        }

        if ctor.is_async {
            let self_isolation = (ctor.isolation.actor_instance(), ctor.implicit_self_decl());
            if let (Some(instance), Some(self_var)) = self_isolation {
                if instance.var == self_var {
                    debug!(function = %ctor.name, "actor initializer uses lazy expected executor");
                    self.expected_executor.set_lazy(&ctor.name)?;

                    let self_span = program.span_of(self.function_ref());
                    let loc = Location::regular(self_span).mark_prologue().as_auto_generated();
                    let initial = self.emit_generic_executor(loc);
                    self.builder.create_hop_to_executor(loc, initial, false);

                    let self_ty = program.var(self_var).ty.map_into_context();
                    let distributed = program.types.is_distributed_actor(&self_ty);
                    self.builder
                        .create_isolation_rewrite_hook(loc, self_var, distributed);
                    self.builder.function_mut().set_rewrite_hook(RewriteHook {
                        self_var,
                        distributed,
                        loc,
                    });
                    return Ok(());
                }
            }
        }

        self.emit_expected_executor_prolog()
    }

    /// Hop to a global actor at entry of top-level code and make it the
    /// expected executor.
    pub fn emit_prolog_global_actor_hop(
        &mut self,
        loc: Location,
        global_actor: &Type,
    ) -> Result<(), LowerError> {
        self.require_expected_executor_unset()?;
        let executor = self.emit_load_global_actor_executor(global_actor)?;
        self.expected_executor.set(executor, self.name())?;
        self.builder
            .create_hop_to_executor(loc.as_debug_only(), executor, false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::function::FunctionLowering;
    use crate::options::{LowerOptions, RuntimeIntrinsics};
    use crate::LowerError;
    use isogen_core::decl::{
        ClosureExpr, DeclContext, FuncId, FunctionDecl, FunctionKind, FunctionRef, Program, VarKind,
    };
    use isogen_core::isolation::{ActorInstance, ActorIsolation};
    use isogen_core::types::Type;

    fn deinit(program: &mut Program, isolation: ActorIsolation) -> DeclContext {
        let decl = FunctionDecl::new("deinit", FunctionKind::Destructor, isolation);
        let id = program.add_function(decl);
        DeclContext::Function(id)
    }

    #[test]
    fn closures_inside_actor_deinit_are_in_actor_destructor() {
        let mut program = Program::new();
        let self_var = program.add_var("self", Type::Void, VarKind::SelfParam);
        let isolation = ActorIsolation::ActorInstance(ActorInstance::self_parameter(self_var));
        let dc = deinit(&mut program, isolation);
        let closure = program.add_closure(ClosureExpr::new("c", ActorIsolation::Nonisolated, dc));
        let options = LowerOptions::default();
        let intrinsics = RuntimeIntrinsics::default();
        let closure_ref = FunctionRef::Closure(closure);
        let lowering = FunctionLowering::new(&program, closure_ref, &options, &intrinsics);
        assert!(lowering.is_in_actor_destructor(DeclContext::Closure(closure)).unwrap());
        assert!(!lowering.is_in_actor_destructor(DeclContext::Module).unwrap());
    }

    #[test]
    fn global_actor_deinit_is_not_an_actor_destructor() {
        let mut program = Program::new();
        let dc = deinit(&mut program, ActorIsolation::GlobalActor(Type::Void));
        let options = LowerOptions::default();
        let intrinsics = RuntimeIntrinsics::default();
        let deinit_ref = FunctionRef::Func(FuncId(0));
        let lowering = FunctionLowering::new(&program, deinit_ref, &options, &intrinsics);
        assert!(!lowering.is_in_actor_destructor(dc).unwrap());
    }

    #[test]
    fn erased_deinit_is_an_error() {
        let mut program = Program::new();
        let dc = deinit(&mut program, ActorIsolation::Erased);
        let options = LowerOptions::default();
        let intrinsics = RuntimeIntrinsics::default();
        let deinit_ref = FunctionRef::Func(FuncId(0));
        let lowering = FunctionLowering::new(&program, deinit_ref, &options, &intrinsics);
        assert!(matches!(
            lowering.is_in_actor_destructor(dc),
            Err(LowerError::ErasedDestructorIsolation { .. })
        ));
    }

    #[test]
    fn defer_bodies_never_check() {
        let mut program = Program::new();
        let decl = FunctionDecl::new("defer", FunctionKind::Defer, ActorIsolation::Nonisolated);
        let id = program.add_function(decl);
        let options = LowerOptions {
            actor_data_race_checks: true,
            ..LowerOptions::default()
        };
        let intrinsics = RuntimeIntrinsics::default();
        let lowering =
            FunctionLowering::new(&program, FunctionRef::Func(id), &options, &intrinsics);
        assert!(!lowering.want_data_race_checks().unwrap());
    }

    #[test]
    fn closures_requiring_dynamic_checks_want_them() {
        let mut program = Program::new();
        let mut closure = ClosureExpr::new("c", ActorIsolation::Nonisolated, DeclContext::Module);
        closure.requires_dynamic_isolation_checking = true;
        let id = program.add_closure(closure);
        let intrinsics = RuntimeIntrinsics::default();

        let options = LowerOptions::default();
        let lowering =
            FunctionLowering::new(&program, FunctionRef::Closure(id), &options, &intrinsics);
        assert!(lowering.want_data_race_checks().unwrap());

        let options = LowerOptions {
            dynamic_actor_isolation_checking: false,
            ..LowerOptions::default()
        };
        let lowering =
            FunctionLowering::new(&program, FunctionRef::Closure(id), &options, &intrinsics);
        assert!(!lowering.want_data_race_checks().unwrap());
    }
}
