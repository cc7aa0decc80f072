//! Isolation carried by function values, and the isolation of closures.
//!
//! An `@isolated(any)` function value carries its isolation as a
//! `(any Actor)?` next to its invocation data; it is read with a
//! borrow-only projection.

use crate::compiler::function::FunctionLowering;
use crate::compiler::ir::{Location, ValueId};
use crate::compiler::managed::ManagedValue;
use crate::LowerError;
use isogen_core::decl::{Capture, CaptureKind, FunctionRef, Program, VarId};
use isogen_core::isolation::{ActorIsolation, FunctionTypeIsolation};

/// Declared isolation of a closure or local function.
pub fn closure_isolation_info(program: &Program, constant: FunctionRef) -> &ActorIsolation {
    program.isolation_of(constant)
}

impl FunctionLowering<'_> {
    /// The isolation of a function value of a type with `isolation`, as
    /// `(any Actor)?`.
    pub fn emit_function_type_isolation(
        &mut self,
        loc: Location,
        isolation: &FunctionTypeIsolation,
        function: &ManagedValue,
    ) -> Result<ManagedValue, LowerError> {
        match isolation {
            FunctionTypeIsolation::Parameter => Err(LowerError::ParameterIsolationHasNoStaticToken {
                function: self.name().to_string(),
            }),
            FunctionTypeIsolation::NonIsolated | FunctionTypeIsolation::NonIsolatedCaller => {
                Ok(self.emit_non_isolated_isolation(loc))
            }
            FunctionTypeIsolation::GlobalActor(global_actor) => {
                self.emit_global_actor_isolation(loc, global_actor)
            }
            FunctionTypeIsolation::Erased => {
                self.enter_scope();
                let isolation = self.emit_load_erased_isolation(loc, function);
                let copied = isolation.copy(self, loc);
                Ok(self.pop_scope_preserving_value(loc, copied))
            }
        }
    }

    /// Borrow the isolation out of an `@isolated(any)` function value. The
    /// function value is not consumed.
    pub fn emit_load_erased_isolation(
        &mut self,
        loc: Location,
        function: &ManagedValue,
    ) -> ManagedValue {
        let function = function.borrow(self, loc);
        let isolation = self
            .builder
            .create_function_extract_isolation(loc, function.value());
        let ty = self.builder.function().value_type(isolation).clone();
        ManagedValue::for_borrowed(isolation, ty)
    }

    /// The executor of an `@isolated(any)` function value: its carried
    /// isolation, projected later.
    pub fn emit_load_erased_executor(&mut self, loc: Location, function: &ManagedValue) -> ValueId {
        self.emit_load_erased_isolation(loc, function).unmanaged_value()
    }

    /// Isolation of the closure `constant` as `(any Actor)?`, given the
    /// values of its lowered captures.
    pub fn emit_closure_isolation(
        &mut self,
        loc: Location,
        constant: FunctionRef,
        captures: &[ManagedValue],
    ) -> Result<ManagedValue, LowerError> {
        let program = self.program();
        let isolation = closure_isolation_info(program, constant);
        match isolation {
            ActorIsolation::Unspecified
            | ActorIsolation::Nonisolated
            | ActorIsolation::CallerIsolationInheriting
            | ActorIsolation::NonisolatedUnsafe => Ok(self.emit_non_isolated_isolation(loc)),
            ActorIsolation::Erased => Err(LowerError::ErasedIsolationOnDeclaration {
                function: program.name_of(constant).to_string(),
            }),
            ActorIsolation::GlobalActor(global_actor) => {
                self.emit_global_actor_isolation(loc, &global_actor.map_into_context())
            }
            ActorIsolation::ActorInstance(instance) => {
                if !isolation.is_actor_instance_for_capture() {
                    return Err(LowerError::ClosureIsolationNotCapture {
                        function: program.name_of(constant).to_string(),
                    });
                }
                self.emit_load_of_capture_isolation(loc, instance.var, constant, captures)
            }
        }
    }

    /// Copy the captured actor out of `captures` and erase it. Top-level
    /// code may isolate to a variable it never formally captures; that
    /// variable is read directly.
    fn emit_load_of_capture_isolation(
        &mut self,
        loc: Location,
        isolated_capture: VarId,
        constant: FunctionRef,
        captures: &[ManagedValue],
    ) -> Result<ManagedValue, LowerError> {
        let program = self.program();
        let var_type = program.var(isolated_capture).ty.map_into_context();
        let lowered = program.lowered_captures(constant);

        for (index, capture) in lowered.captures.iter().enumerate() {
            let Capture::Var { var, kind, .. } = capture else {
                continue;
            };
            if *var != isolated_capture {
                continue;
            }
            if *kind != CaptureKind::Constant {
                return Err(LowerError::IsolatedCaptureNotConstant {
                    function: program.name_of(constant).to_string(),
                    var: program.var(*var).name.clone(),
                });
            }
            let captured = captures.get(index).ok_or_else(|| LowerError::MissingCaptureValue {
                function: program.name_of(constant).to_string(),
                index,
            })?;
            let value = captured.copy(self, loc);
            return self.emit_actor_instance_isolation(loc, value, &var_type);
        }

        let value = self.emit_rvalue_for_decl(loc, isolated_capture);
        self.emit_actor_instance_isolation(loc, value, &var_type)
    }
}
