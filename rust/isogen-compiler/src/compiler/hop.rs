//! Hops between executors, hops back, and runtime executor checks.

use crate::compiler::cleanup::{Cleanup, CleanupHandle};
use crate::compiler::executor::{ExecutorBreadcrumb, ExpectedExecutor};
use crate::compiler::function::FunctionLowering;
use crate::compiler::ir::{BuiltinName, Location, ValueId};
use crate::compiler::managed::ManagedValue;
use crate::LowerError;
use isogen_core::decl::{FunctionKind, FunctionRef};
use isogen_core::isolation::{ActorIsolation, FunctionTypeIsolation};
use isogen_core::types::{BuiltinType, FunctionType, KnownProtocol, SubstitutionMap, Type};
use tracing::trace;

/// Name of the `DistributedActor.asLocalActor` getter the flow-sensitive
/// distributed builtin is later rewritten to call.
const AS_LOCAL_ACTOR_GETTER: &str = "DistributedActor.asLocalActor.getter";

impl FunctionLowering<'_> {
    /// Hop to the executor of `isolation`, if it has one.
    pub fn emit_hop_to_target_actor(
        &mut self,
        loc: Location,
        isolation: Option<&ActorIsolation>,
        maybe_self: Option<ManagedValue>,
    ) -> Result<ExecutorBreadcrumb, LowerError> {
        let Some(isolation) = isolation else {
            return Ok(ExecutorBreadcrumb::new());
        };
        match self.emit_executor(loc, isolation, maybe_self)? {
            Some(executor) => Ok(self.emit_hop_to_target_executor(loc, executor)),
            None => Ok(ExecutorBreadcrumb::new()),
        }
    }

    /// Hop to `executor`. The returned breadcrumb hops back.
    pub fn emit_hop_to_target_executor(
        &mut self,
        loc: Location,
        executor: ValueId,
    ) -> ExecutorBreadcrumb {
        trace!(function = %self.name(), ?executor, "hop to target executor");
        self.builder
            .create_hop_to_executor(loc.as_debug_only(), executor, false);
        ExecutorBreadcrumb::returning()
    }

    /// Hop to `actor` whenever the current scope is left, on every exit
    /// edge.
    pub fn emit_scoped_hop_to_target_actor(
        &mut self,
        _loc: Location,
        actor: ValueId,
    ) -> CleanupHandle {
        self.cleanups.push(Cleanup::HopToExecutor(actor))
    }

    /// Explicit hop with no hop back. Only actor-independent async code may
    /// do this.
    pub fn emit_hop_to_actor_value(
        &mut self,
        loc: Location,
        actor: ManagedValue,
    ) -> Result<(), LowerError> {
        if !self.is_async() {
            return Err(LowerError::HopToActorOutsideAsync {
                function: self.name().to_string(),
            });
        }
        let isolation = self.program().isolation_of(self.function_ref());
        match isolation {
            ActorIsolation::Unspecified
            | ActorIsolation::Nonisolated
            | ActorIsolation::NonisolatedUnsafe => {}
            ActorIsolation::ActorInstance(_)
            | ActorIsolation::GlobalActor(_)
            | ActorIsolation::CallerIsolationInheriting
            | ActorIsolation::Erased => {
                return Err(LowerError::HopToActorFromIsolatedContext {
                    function: self.name().to_string(),
                    isolation: isolation.to_string(),
                });
            }
        }
        let executor = self.emit_load_actor_executor(loc, &actor);
        self.builder
            .create_hop_to_executor(loc.as_debug_only(), executor, true);
        Ok(())
    }

    /// Call `callee` on the executor of `isolation` and hop back afterwards.
    pub fn emit_isolated_apply(
        &mut self,
        loc: Location,
        callee: ValueId,
        isolation: &ActorIsolation,
        maybe_self: Option<ManagedValue>,
        args: Vec<ValueId>,
        result_ty: Type,
    ) -> Result<ValueId, LowerError> {
        let breadcrumb = self.emit_hop_to_target_actor(loc, Some(isolation), maybe_self)?;
        let result = self
            .builder
            .create_apply(loc, callee, SubstitutionMap::empty(), args, result_ty);
        breadcrumb.emit(self, loc)?;
        Ok(result)
    }

    /// The function's expected executor: the eager value, or for an actor
    /// initializer the flow-sensitive isolation of `self`.
    pub fn emit_expected_executor(&mut self, loc: Location) -> Result<ManagedValue, LowerError> {
        match self.expected_executor {
            ExpectedExecutor::Eager(executor) => {
                let ty = self.builder.function().value_type(executor).clone();
                Ok(ManagedValue::for_borrowed(executor, ty))
            }
            ExpectedExecutor::Lazy => {
                let isolation = self.program().isolation_of(self.function_ref());
                self.emit_flow_sensitive_self_isolation(loc, isolation)
            }
            ExpectedExecutor::Unnecessary => Err(LowerError::ExpectedExecutorUnnecessary {
                function: self.name().to_string(),
            }),
            ExpectedExecutor::Invalid => Err(LowerError::ExpectedExecutorNotSet),
        }
    }

    /// Isolation of `self` in an actor initializer, which is `none` until
    /// `self` is initialized. Emitted as a builtin the definite
    /// initialization pass rewrites.
    pub fn emit_flow_sensitive_self_isolation(
        &mut self,
        loc: Location,
        isolation: &ActorIsolation,
    ) -> Result<ManagedValue, LowerError> {
        let program = self.program();
        let function = self.name();
        let lazy_error = || LowerError::LazyExecutorOutsideActorInit {
            function: function.to_string(),
        };
        let FunctionRef::Func(id) = self.function_ref() else {
            return Err(lazy_error());
        };
        let ctor = program.function(id);
        let Some(isolated_var) = isolation.actor_instance().map(|i| i.var) else {
            return Err(lazy_error());
        };
        let is_self_isolated_init = ctor.kind == FunctionKind::Constructor
            && Some(isolated_var) == ctor.implicit_self_decl();
        if !is_self_isolated_init {
            return Err(lazy_error());
        }

        let actor_type = program.var(isolated_var).ty.map_into_context();
        let types = &program.types;
        if !types.is_any_actor_type(&actor_type) {
            return Err(lazy_error());
        }

        let (builtin, protocol) = if types.is_distributed_actor(&actor_type) {
            // Only referenced here; the rewrite needs it to exist.
            let getter_ty = Type::function(FunctionType {
                params: vec![actor_type.clone()],
                result: Type::any_actor(),
                is_async: false,
                isolation: FunctionTypeIsolation::NonIsolated,
            });
            self.builder
                .create_function_ref(loc, AS_LOCAL_ACTOR_GETTER, getter_ty);
            (BuiltinName::FlowSensitiveDistributedSelfIsolation, KnownProtocol::DistributedActor)
        } else {
            (BuiltinName::FlowSensitiveSelfIsolation, KnownProtocol::Actor)
        };
        let conformance = types.lookup_conformance(&actor_type, protocol);
        if conformance.is_invalid() {
            return Err(LowerError::MissingConformance {
                ty: types.display(&actor_type).to_string(),
                protocol,
            });
        }

        let subs = SubstitutionMap::protocol_substitutions(actor_type, conformance);
        let actor = self.emit_value_of_local_var(loc, isolated_var);
        let result_ty = Type::opaque_isolation();
        let call = self
            .builder
            .create_builtin(loc, builtin, result_ty.clone(), subs, vec![actor]);
        Ok(ManagedValue::for_owned(self, call, result_ty))
    }

    // ── Runtime checks ──────────────────────────────────────────────

    /// The check intrinsic exists and the deployment target guarantees it.
    pub fn is_check_expected_executor_intrinsic_available(&self) -> bool {
        let Some(intrinsic) = &self.intrinsics().check_expected_executor else {
            return false;
        };
        let options = self.options();
        if options.disable_availability_checking {
            return true;
        }
        options
            .deployment_availability()
            .is_contained_in(&intrinsic.availability)
    }

    /// Check that the current executor is the one selected by `isolation`.
    pub fn emit_precondition_check_for_isolation(
        &mut self,
        loc: Location,
        isolation: &ActorIsolation,
        actor_self: Option<ManagedValue>,
    ) -> Result<(), LowerError> {
        if !self.is_check_expected_executor_intrinsic_available() {
            return Ok(());
        }
        let executor = self
            .emit_executor(loc, isolation, actor_self)?
            .ok_or_else(|| LowerError::NoExecutorForIsolation {
                function: self.name().to_string(),
                isolation: isolation.to_string(),
            })?;
        self.emit_precondition_check_expected_executor(loc, executor);
        Ok(())
    }

    /// Trap at runtime unless running on `executor_or_actor`. An optional
    /// that is `none` expects no particular executor and is not checked.
    pub fn emit_precondition_check_expected_executor(
        &mut self,
        loc: Location,
        executor_or_actor: ValueId,
    ) {
        let Some(intrinsic) = self.intrinsics().check_expected_executor.as_ref() else {
            return;
        };
        if !self.is_check_expected_executor_intrinsic_available() {
            trace!(function = %self.name(), "check intrinsic unavailable; skipping");
            return;
        }
        let loc = loc.as_auto_generated();
        trace!(function = %self.name(), intrinsic = %intrinsic.name, "emitting executor check");

        let is_optional = self
            .builder
            .function()
            .value_type(executor_or_actor)
            .optional_object_type()
            .is_some();
        let mut checked = executor_or_actor;
        let mut none_bb = None;
        if is_optional {
            let none = self.builder.create_block();
            let some = self.builder.create_block_before(none);
            checked = self.builder.create_switch_optional(executor_or_actor, some, none);
            self.builder.emit_block(some);
            none_bb = Some(none);
        }

        let executor = self.builder.create_extract_executor(loc, checked);
        let mut args = self.emit_source_location_args(loc);
        args.push(executor);
        let check_ty = Type::function(FunctionType {
            params: vec![
                Type::Builtin(BuiltinType::RawPointer),
                Type::Builtin(BuiltinType::Word),
                Type::Builtin(BuiltinType::Int1),
                Type::Builtin(BuiltinType::Word),
                Type::executor(),
            ],
            result: Type::Void,
            is_async: false,
            isolation: FunctionTypeIsolation::NonIsolated,
        });
        let callee = self.builder.create_function_ref(loc, &intrinsic.name, check_ty);
        self.builder
            .create_apply(loc, callee, SubstitutionMap::empty(), args, Type::Void);

        if let Some(none) = none_bb {
            let cont = self.builder.create_block_after(none);
            self.builder.create_branch(cont, Vec::new());
            self.builder.emit_block(none);
            self.builder.create_branch(cont, Vec::new());
            self.builder.emit_block(cont);
        }
    }

    /// File name pointer, file name length, is-ASCII flag and line.
    fn emit_source_location_args(&mut self, loc: Location) -> Vec<ValueId> {
        // a dummy span names no file
        let file = if loc.span.is_dummy() {
            None
        } else {
            self.program().file(loc.span.file)
        };
        let path = file.map(|f| f.path.as_str()).unwrap_or("");
        let is_ascii = file.map_or(true, |f| f.is_ascii());
        let filename = self.builder.create_string_literal(loc, path);
        let length = self
            .builder
            .create_integer_literal(loc, BuiltinType::Word, path.len() as i64);
        let ascii = self
            .builder
            .create_integer_literal(loc, BuiltinType::Int1, i64::from(is_ascii));
        let line = self
            .builder
            .create_integer_literal(loc, BuiltinType::Word, loc.span.line as i64);
        vec![filename, length, ascii, line]
    }
}
