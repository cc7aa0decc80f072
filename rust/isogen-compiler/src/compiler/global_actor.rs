//! Loading the shared instance of a global actor.

use crate::compiler::function::FunctionLowering;
use crate::compiler::ir::Location;
use crate::compiler::managed::ManagedValue;
use crate::LowerError;
use isogen_core::isolation::FunctionTypeIsolation;
use isogen_core::types::{FunctionType, MetatypeRepr, StorageKind, Type};
use tracing::debug;

impl FunctionLowering<'_> {
    /// Read the shared instance of `actor_type`, returning the owned instance
    /// and its type as seen through `actor_type`.
    ///
    /// The instance type is not necessarily `actor_type`: the member may be
    /// declared with any actor type, possibly mentioning the global actor's
    /// generic parameters.
    pub fn emit_load_of_global_actor_shared(
        &mut self,
        loc: Location,
        actor_type: &Type,
    ) -> Result<(ManagedValue, Type), LowerError> {
        let types = &self.program().types;
        let missing = || LowerError::MissingGlobalActorShared {
            ty: types.display(actor_type).to_string(),
        };
        let nominal = types.nominal_of(actor_type).ok_or_else(missing)?;
        let shared = nominal.global_actor_shared.as_ref().ok_or_else(missing)?;

        let instance_type = types.type_of_member(actor_type, &shared.ty);
        let subs = types.context_substitution_map(actor_type);
        let repr = if nominal.resilient {
            MetatypeRepr::Thick
        } else {
            MetatypeRepr::Thin
        };
        debug!(
            function = %self.name(),
            actor = %types.display(actor_type),
            member = %shared.name,
            ?repr,
            "loading global actor shared instance"
        );

        let metatype = self.builder.create_metatype(loc, actor_type.clone(), repr);
        let use_getter = nominal.resilient || shared.storage == StorageKind::Computed;
        let value = if use_getter {
            let getter_ty = Type::function(FunctionType {
                params: vec![Type::metatype(actor_type.clone(), repr)],
                result: instance_type.clone(),
                is_async: false,
                isolation: FunctionTypeIsolation::NonIsolated,
            });
            let getter_name = format!("{}.{}.getter", nominal.name, shared.name);
            let getter = self.builder.create_function_ref(loc, &getter_name, getter_ty);
            self.builder
                .create_apply(loc, getter, subs, vec![metatype], instance_type.clone())
        } else {
            let global = format!("{}.{}", nominal.name, shared.name);
            self.builder.create_global_load(loc, &global, instance_type.clone())
        };

        let instance = ManagedValue::for_owned(self, value, instance_type.clone());
        Ok((instance, instance_type))
    }

    /// The shared instance of `global_actor_type`, erased to
    /// `Optional<any Actor>`.
    pub fn emit_global_actor_isolation(
        &mut self,
        loc: Location,
        global_actor_type: &Type,
    ) -> Result<ManagedValue, LowerError> {
        let (instance, instance_type) =
            self.emit_load_of_global_actor_shared(loc, global_actor_type)?;
        self.emit_actor_instance_isolation(loc, instance, &instance_type)
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
    use isogen_core::types::{MetatypeRepr, NominalDecl, NominalKind, StorageKind, Type};

    fn loc() -> Location {
        Location::regular(Span::dummy())
    }

    fn lower_with<R>(program: &Program, body: impl FnOnce(&mut FunctionLowering<'_>) -> R) -> R {
        let options = LowerOptions::default();
        let intrinsics = RuntimeIntrinsics::default();
        let f = FunctionRef::Func(isogen_core::decl::FuncId(0));
        let mut lowering = FunctionLowering::new(program, f, &options, &intrinsics);
        body(&mut lowering)
    }

    fn base_program() -> Program {
        let mut program = Program::new();
        program.add_function(FunctionDecl::new(
            "f",
            FunctionKind::Func,
            ActorIsolation::Nonisolated,
        ));
        program
    }

    #[test]
    fn stored_shared_instance_is_a_direct_global_load() {
        let mut program = base_program();
        let actor = program.types.add(NominalDecl::new("MyActor", NominalKind::Actor));
        let global = program.types.add(
            NominalDecl::new("G", NominalKind::Struct).with_shared_instance(
                "shared",
                Type::nominal(actor),
                StorageKind::Stored,
            ),
        );
        let (instance, ty) = lower_with(&program, |l| {
            l.emit_load_of_global_actor_shared(loc(), &Type::nominal(global))
                .unwrap()
        });
        assert_eq!(ty, Type::nominal(actor));
        assert!(instance.has_cleanup());

        lower_with(&program, |l| {
            l.emit_load_of_global_actor_shared(loc(), &Type::nominal(global))
                .unwrap();
            let func = l.builder().function();
            assert_eq!(func.count_instructions(|k| matches!(k, InstKind::GlobalLoad { .. })), 1);
            assert_eq!(func.count_instructions(|k| matches!(k, InstKind::Apply { .. })), 0);
            let metatype = func
                .instructions()
                .find_map(|i| match i.kind {
                    InstKind::Metatype { result } => Some(result),
                    _ => None,
                })
                .unwrap();
            assert_eq!(
                func.value_type(metatype),
                &Type::metatype(Type::nominal(global), MetatypeRepr::Thin)
            );
        });
    }

    #[test]
    fn resilient_global_actor_uses_getter_and_thick_metatype() {
        let mut program = base_program();
        let actor = program.types.add(NominalDecl::new("MyActor", NominalKind::Actor));
        let global = program.types.add(
            NominalDecl::new("G", NominalKind::Struct)
                .resilient()
                .with_shared_instance("shared", Type::nominal(actor), StorageKind::Stored),
        );
        lower_with(&program, |l| {
            l.emit_load_of_global_actor_shared(loc(), &Type::nominal(global))
                .unwrap();
            let func = l.builder().function();
            assert_eq!(func.count_instructions(|k| matches!(k, InstKind::GlobalLoad { .. })), 0);
            assert_eq!(func.count_instructions(|k| matches!(k, InstKind::Apply { .. })), 1);
            assert!(func.instructions().any(|i| matches!(
                &i.kind,
                InstKind::FunctionRef { name, .. } if name == "G.shared.getter"
            )));
        });
    }

    #[test]
    fn generic_member_type_is_substituted() {
        let mut program = base_program();
        let actor = program
            .types
            .add(NominalDecl::new("Box", NominalKind::Actor).with_generic_params(&["T"]));
        let param = Type::GenericParam {
            name: "T".to_string(),
            constraint: None,
        };
        let global = program.types.add(
            NominalDecl::new("G", NominalKind::Struct)
                .with_generic_params(&["T"])
                .with_shared_instance(
                    "shared",
                    Type::bound_nominal(actor, vec![param]),
                    StorageKind::Computed,
                ),
        );
        let int = program.types.add(NominalDecl::new("Int", NominalKind::Struct));
        let bound = Type::bound_nominal(global, vec![Type::nominal(int)]);
        let (_, ty) = lower_with(&program, |l| {
            l.emit_load_of_global_actor_shared(loc(), &bound).unwrap()
        });
        assert_eq!(ty, Type::bound_nominal(actor, vec![Type::nominal(int)]));
    }

    #[test]
    fn missing_shared_member_is_an_error() {
        let mut program = base_program();
        let not_global = program.types.add(NominalDecl::new("Plain", NominalKind::Struct));
        let err = lower_with(&program, |l| {
            l.emit_load_of_global_actor_shared(loc(), &Type::nominal(not_global))
                .unwrap_err()
        });
        assert!(matches!(err, LowerError::MissingGlobalActorShared { ref ty } if ty == "Plain"));
    }
}
