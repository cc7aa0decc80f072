//! Erasing actor references to `any Actor` and `(any Actor)?`.
//!
//! Distributed actors do not conform to `Actor`; they are erased through
//! the synthesized `DistributedActorAsActor` conformance, which routes
//! through the local-actor projection of a possibly remote instance.

use crate::compiler::function::FunctionLowering;
use crate::compiler::ir::{Location, OwnershipKind};
use crate::compiler::managed::{ManagedValue, Ownership};
use crate::LowerError;
use isogen_core::types::{
    KnownProtocol, ProtocolConformanceRef, SubstitutionMap, SynthesizedConformance, Type,
};

impl FunctionLowering<'_> {
    /// Erase `actor`, of formal type `actor_type`, to `Optional<any Actor>`.
    ///
    /// An optional actor keeps its `none`.
    pub fn emit_actor_instance_isolation(
        &mut self,
        loc: Location,
        actor: ManagedValue,
        actor_type: &Type,
    ) -> Result<ManagedValue, LowerError> {
        let opaque = Type::opaque_isolation();
        if *actor_type == opaque {
            return Ok(actor);
        }

        if let Some(object_type) = actor_type.optional_object_type() {
            return self.emit_optional_to_opaque_isolation(loc, actor, object_type);
        }

        let any_actor = self.emit_non_optional_actor_instance_isolation(loc, actor, actor_type)?;
        let wrapped = self.builder.create_optional_some(loc, any_actor.value());
        Ok(any_actor.with_value(wrapped, opaque))
    }

    /// Erase a non-optional actor to exactly `any Actor`.
    pub fn emit_non_optional_actor_instance_isolation(
        &mut self,
        loc: Location,
        actor: ManagedValue,
        actor_type: &Type,
    ) -> Result<ManagedValue, LowerError> {
        let any_actor = Type::any_actor();
        if *actor.ty() == any_actor || *actor_type == any_actor {
            return Ok(actor);
        }

        let types = &self.program().types;
        if types.is_distributed_actor(actor_type) {
            return self.emit_distributed_actor_isolation(loc, actor, actor_type);
        }

        let conformance = types.lookup_conformance(actor_type, KnownProtocol::Actor);
        if conformance.is_invalid() {
            return Err(LowerError::MissingConformance {
                ty: types.display(actor_type).to_string(),
                protocol: KnownProtocol::Actor,
            });
        }
        let erased = self.builder.create_init_existential(
            loc,
            actor.value(),
            any_actor.clone(),
            vec![conformance],
        );
        Ok(actor.with_value(erased, any_actor))
    }

    /// Erase a non-optional distributed actor to `any Actor`, opening it
    /// first if it is an existential.
    pub fn emit_distributed_actor_isolation(
        &mut self,
        loc: Location,
        actor: ManagedValue,
        actor_type: &Type,
    ) -> Result<ManagedValue, LowerError> {
        let (actor, actor_type) = match actor_type {
            Type::Existential(protocol) => {
                let opened = self.fresh_opened_archetype(*protocol);
                let value = self
                    .builder
                    .create_open_existential(loc, actor.value(), opened.clone());
                (actor.with_value(value, opened.clone()), opened)
            }
            other => (actor, other.clone()),
        };

        let types = &self.program().types;
        let conformance = types.lookup_conformance(&actor_type, KnownProtocol::DistributedActor);
        if conformance.is_invalid() {
            return Err(LowerError::MissingConformance {
                ty: types.display(&actor_type).to_string(),
                protocol: KnownProtocol::DistributedActor,
            });
        }
        let subs = SubstitutionMap::protocol_substitutions(actor_type, conformance);
        self.emit_distributed_actor_as_any_actor(loc, subs, actor)
    }

    /// Erase the distributed actor bound by `distributed_actor_subs` using
    /// the synthesized conformance specialized for it.
    pub fn emit_distributed_actor_as_any_actor(
        &mut self,
        loc: Location,
        distributed_actor_subs: SubstitutionMap,
        actor: ManagedValue,
    ) -> Result<ManagedValue, LowerError> {
        let distributed_type = distributed_actor_subs
            .replacement_types()
            .next()
            .cloned()
            .ok_or_else(|| LowerError::MissingConformance {
                ty: self.program().types.display(actor.ty()).to_string(),
                protocol: KnownProtocol::DistributedActor,
            })?;
        let conformance = ProtocolConformanceRef::Specialized {
            ty: distributed_type,
            protocol: KnownProtocol::Actor,
            generic: SynthesizedConformance::DistributedActorAsActor,
            subs: Box::new(distributed_actor_subs),
        };
        let any_actor = Type::any_actor();
        let erased = self.builder.create_init_existential(
            loc,
            actor.value(),
            any_actor.clone(),
            vec![conformance],
        );
        Ok(actor.with_value(erased, any_actor))
    }

    /// `Optional<any Actor>.none`.
    pub fn emit_non_isolated_isolation(&mut self, loc: Location) -> ManagedValue {
        let ty = Type::opaque_isolation();
        let none = self.builder.create_optional_none(loc, ty.clone());
        ManagedValue::for_trivial(none, ty)
    }

    /// `T?` to `(any Actor)?`: erase the payload on the `some` path, pass
    /// `none` through.
    fn emit_optional_to_opaque_isolation(
        &mut self,
        loc: Location,
        actor: ManagedValue,
        object_type: &Type,
    ) -> Result<ManagedValue, LowerError> {
        let opaque = Type::opaque_isolation();
        let ownership = actor.ownership();
        let operand = actor.forward(self);
        let ir_ownership = self.builder.function().value(operand).ownership;

        let none_bb = self.builder.create_block();
        let some_bb = self.builder.create_block_before(none_bb);
        let cont_bb = self.builder.create_block_after(none_bb);
        let result = self.builder.add_block_arg(cont_bb, opaque.clone(), ir_ownership);

        let payload = self.builder.create_switch_optional(operand, some_bb, none_bb);
        self.builder.emit_block(some_bb);
        let payload = match ir_ownership {
            OwnershipKind::Owned => ManagedValue::for_unmanaged_owned(payload, object_type.clone()),
            OwnershipKind::Guaranteed => ManagedValue::for_borrowed(payload, object_type.clone()),
            OwnershipKind::None => ManagedValue::for_trivial(payload, object_type.clone()),
        };
        let erased = self.emit_non_optional_actor_instance_isolation(loc, payload, object_type)?;
        let wrapped = self.builder.create_optional_some(loc, erased.value());
        self.builder.create_branch(cont_bb, vec![wrapped]);

        self.builder.emit_block(none_bb);
        let none = self.builder.create_optional_none(loc, opaque.clone());
        self.builder.create_branch(cont_bb, vec![none]);

        self.builder.emit_block(cont_bb);
        Ok(match ownership {
            Ownership::Owned(_) => ManagedValue::for_owned(self, result, opaque),
            Ownership::UnmanagedOwned => ManagedValue::for_unmanaged_owned(result, opaque),
            Ownership::Borrowed => ManagedValue::for_borrowed(result, opaque),
            Ownership::Trivial => ManagedValue::for_trivial(result, opaque),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::function::FunctionLowering;
    use crate::compiler::ir::{InstKind, Location, Terminator};
    use crate::compiler::managed::ManagedValue;
    use crate::options::{LowerOptions, RuntimeIntrinsics};
    use isogen_core::decl::{FunctionDecl, FunctionKind, FunctionRef, ParamDecl, Program, VarKind};
    use isogen_core::isolation::ActorIsolation;
    use isogen_core::span::Span;
    use isogen_core::types::{
        KnownProtocol, NominalDecl, NominalKind, ProtocolConformanceRef, SynthesizedConformance,
        Type,
    };

    fn loc() -> Location {
        Location::regular(Span::dummy())
    }

    /// A function taking one guaranteed parameter of type `param_ty`.
    fn program_with_param(param_ty: impl FnOnce(&mut Program) -> Type) -> Program {
        let mut program = Program::new();
        let ty = param_ty(&mut program);
        let var = program.add_var("a", ty, VarKind::Param);
        let mut decl = FunctionDecl::new("f", FunctionKind::Func, ActorIsolation::Nonisolated);
        decl.params.push(ParamDecl::guaranteed(var));
        program.add_function(decl);
        program
    }

    fn erase(program: &Program) -> (crate::compiler::ir::IrFunction, ManagedValue) {
        let options = LowerOptions::default();
        let intrinsics = RuntimeIntrinsics::default();
        let f = FunctionRef::Func(isogen_core::decl::FuncId(0));
        let mut lowering = FunctionLowering::new(program, f, &options, &intrinsics);
        let var = program.function(isogen_core::decl::FuncId(0)).params[0].var;
        let arg = lowering.emit_rvalue_for_decl(loc(), var);
        let ty = arg.ty().clone();
        let erased = lowering.emit_actor_instance_isolation(loc(), arg, &ty).unwrap();
        lowering.emit_return(loc(), None);
        (lowering.finish(), erased)
    }

    fn recorded_conformances(
        func: &crate::compiler::ir::IrFunction,
    ) -> Vec<ProtocolConformanceRef> {
        func.instructions()
            .filter_map(|i| match &i.kind {
                InstKind::InitExistential { conformances, .. } => Some(conformances.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn opaque_isolation_is_returned_unchanged() {
        let program = program_with_param(|_| Type::opaque_isolation());
        let (func, erased) = erase(&program);
        assert_eq!(erased.ty(), &Type::opaque_isolation());
        assert_eq!(func.instructions().count(), 0);
    }

    #[test]
    fn local_actor_uses_plain_actor_conformance() {
        let program = program_with_param(|p| {
            Type::nominal(p.types.add(NominalDecl::new("Counter", NominalKind::Actor)))
        });
        let (func, erased) = erase(&program);
        assert_eq!(erased.ty(), &Type::opaque_isolation());
        let confs = recorded_conformances(&func);
        assert_eq!(confs.len(), 1);
        assert!(matches!(
            confs[0],
            ProtocolConformanceRef::Concrete {
                protocol: KnownProtocol::Actor,
                ..
            }
        ));
        assert_eq!(func.count_instructions(|k| matches!(k, InstKind::OptionalSome { .. })), 1);
    }

    #[test]
    fn distributed_actor_uses_synthesized_conformance() {
        let program = program_with_param(|p| {
            let worker = p.types.add(NominalDecl::new("Worker", NominalKind::DistributedActor));
            Type::nominal(worker)
        });
        let (func, _) = erase(&program);
        let confs = recorded_conformances(&func);
        assert_eq!(confs.len(), 1);
        match &confs[0] {
            ProtocolConformanceRef::Specialized {
                protocol,
                generic,
                subs,
                ..
            } => {
                assert_eq!(*protocol, KnownProtocol::Actor);
                assert_eq!(*generic, SynthesizedConformance::DistributedActorAsActor);
                assert!(matches!(
                    subs.conformances[0],
                    ProtocolConformanceRef::Concrete {
                        protocol: KnownProtocol::DistributedActor,
                        ..
                    }
                ));
            }
            other => panic!("expected specialized conformance, got {:?}", other),
        }
    }

    #[test]
    fn distributed_existential_is_opened_first() {
        let program = program_with_param(|_| Type::Existential(KnownProtocol::DistributedActor));
        let (func, _) = erase(&program);
        assert_eq!(func.count_instructions(|k| matches!(k, InstKind::OpenExistential { .. })), 1);
        match &recorded_conformances(&func)[0] {
            ProtocolConformanceRef::Specialized { ty, subs, .. } => {
                assert!(matches!(ty, Type::OpenedArchetype { .. }));
                assert!(matches!(
                    subs.conformances[0],
                    ProtocolConformanceRef::Abstract { .. }
                ));
            }
            other => panic!("expected specialized conformance, got {:?}", other),
        }
    }

    #[test]
    fn optional_actor_preserves_none() {
        let program = program_with_param(|p| {
            let counter = p.types.add(NominalDecl::new("Counter", NominalKind::Actor));
            Type::optional(Type::nominal(counter))
        });
        let (func, erased) = erase(&program);
        assert_eq!(erased.ty(), &Type::opaque_isolation());
        assert!(erased.is_borrowed());
        assert!(matches!(
            func.block(func.entry()).terminator,
            Some(Terminator::SwitchOptional { .. })
        ));
        // The none path produces `(any Actor)?.none`, never an existential.
        let none_values: Vec<_> = func
            .instructions()
            .filter_map(|i| match i.kind {
                InstKind::OptionalNone { result } => Some(result),
                _ => None,
            })
            .collect();
        assert_eq!(none_values.len(), 1);
        assert_eq!(func.value_type(none_values[0]), &Type::opaque_isolation());
        assert_eq!(func.count_instructions(|k| matches!(k, InstKind::InitExistential { .. })), 1);
    }
}
