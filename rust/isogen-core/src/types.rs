//! Formal types as produced by the type checker.
//!
//! The lowering pass only inspects types; it never creates nominal
//! declarations. Everything it needs to know about a nominal type (its
//! kind, generic parameters, resilience, and global-actor shared instance)
//! lives in [`NominalDecl`], owned by a [`NominalTable`].

use crate::isolation::FunctionTypeIsolation;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Nominal declarations ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NominalId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NominalKind {
    Struct,
    Class,
    Actor,
    DistributedActor,
}

/// How a member is stored. Computed members are always read through their
/// getter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    Stored,
    Computed,
}

/// The `shared` singleton member a global-actor type must expose.
///
/// `ty` is the member's declared type and may mention the enclosing type's
/// generic parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedInstance {
    pub name: String,
    pub ty: Type,
    pub storage: StorageKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NominalDecl {
    pub name: String,
    pub kind: NominalKind,
    pub generic_params: Vec<String>,
    /// Whether the layout is opaque to the module being lowered.
    pub resilient: bool,
    /// `Some` only for global actors.
    pub global_actor_shared: Option<SharedInstance>,
}

impl NominalDecl {
    pub fn new(name: impl Into<String>, kind: NominalKind) -> Self {
        Self {
            name: name.into(),
            kind,
            generic_params: Vec::new(),
            resilient: false,
            global_actor_shared: None,
        }
    }

    pub fn with_generic_params(mut self, params: &[&str]) -> Self {
        self.generic_params = params.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn resilient(mut self) -> Self {
        self.resilient = true;
        self
    }

    pub fn with_shared_instance(mut self, name: &str, ty: Type, storage: StorageKind) -> Self {
        self.global_actor_shared = Some(SharedInstance {
            name: name.to_string(),
            ty,
            storage,
        });
        self
    }

    pub fn is_global_actor(&self) -> bool {
        self.global_actor_shared.is_some()
    }
}

// ── Protocols & conformances ────────────────────────────────────────

/// Protocols the lowering pass has to reason about.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum KnownProtocol {
    Actor,
    DistributedActor,
}

impl KnownProtocol {
    /// Name of the single generic parameter of the protocol's signature.
    pub const SELF_PARAM: &'static str = "Self";
}

/// Conformances synthesized by the compiler rather than declared in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum SynthesizedConformance {
    /// `DistributedActor: Actor`, routed through the `asLocalActor`
    /// projection of a possibly-remote instance.
    DistributedActorAsActor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolConformanceRef {
    Invalid,
    /// Conformance of an archetype, known from its requirements.
    Abstract { ty: Type, protocol: KnownProtocol },
    /// Conformance declared on a nominal type.
    Concrete { ty: Type, protocol: KnownProtocol },
    /// A synthesized generic conformance specialized for `ty`.
    Specialized {
        ty: Type,
        protocol: KnownProtocol,
        generic: SynthesizedConformance,
        subs: Box<SubstitutionMap>,
    },
}

impl ProtocolConformanceRef {
    pub fn is_invalid(&self) -> bool {
        matches!(self, ProtocolConformanceRef::Invalid)
    }

    pub fn protocol(&self) -> Option<KnownProtocol> {
        match self {
            ProtocolConformanceRef::Invalid => None,
            ProtocolConformanceRef::Abstract { protocol, .. }
            | ProtocolConformanceRef::Concrete { protocol, .. }
            | ProtocolConformanceRef::Specialized { protocol, .. } => Some(*protocol),
        }
    }
}

// ── Substitutions ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionMap {
    pub replacements: Vec<(String, Type)>,
    pub conformances: Vec<ProtocolConformanceRef>,
}

impl SubstitutionMap {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `<Self: P>` with `Self := ty`.
    pub fn protocol_substitutions(ty: Type, conformance: ProtocolConformanceRef) -> Self {
        Self {
            replacements: vec![(KnownProtocol::SELF_PARAM.to_string(), ty)],
            conformances: vec![conformance],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty() && self.conformances.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Type> {
        self.replacements
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, ty)| ty)
    }

    pub fn replacement_types(&self) -> impl Iterator<Item = &Type> {
        self.replacements.iter().map(|(_, ty)| ty)
    }
}

// ── Types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetatypeRepr {
    /// No runtime value; the type is statically known.
    Thin,
    /// Carries the type's runtime metadata.
    Thick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
pub enum BuiltinType {
    /// A serial executor reference.
    Executor,
    RawPointer,
    Int1,
    Word,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub result: Type,
    pub is_async: bool,
    pub isolation: FunctionTypeIsolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    Nominal { decl: NominalId, args: Vec<Type> },
    Optional(Box<Type>),
    /// `any P`.
    Existential(KnownProtocol),
    /// The archetype produced by opening an `any P` value.
    OpenedArchetype { id: u32, constraint: KnownProtocol },
    /// A generic parameter as written in an interface type.
    GenericParam { name: String, constraint: Option<KnownProtocol> },
    /// A generic parameter mapped into a function's generic context.
    Archetype { name: String, constraint: Option<KnownProtocol> },
    Metatype { instance: Box<Type>, repr: MetatypeRepr },
    Function(Box<FunctionType>),
    Builtin(BuiltinType),
    Void,
}

impl Type {
    pub fn nominal(decl: NominalId) -> Self {
        Type::Nominal { decl, args: Vec::new() }
    }

    pub fn bound_nominal(decl: NominalId, args: Vec<Type>) -> Self {
        Type::Nominal { decl, args }
    }

    pub fn optional(ty: Type) -> Self {
        Type::Optional(Box::new(ty))
    }

    /// `any Actor`
    pub fn any_actor() -> Self {
        Type::Existential(KnownProtocol::Actor)
    }

    /// `(any Actor)?`, the type isolation values are carried as.
    pub fn opaque_isolation() -> Self {
        Type::optional(Type::any_actor())
    }

    pub fn executor() -> Self {
        Type::Builtin(BuiltinType::Executor)
    }

    pub fn optional_executor() -> Self {
        Type::optional(Type::executor())
    }

    pub fn metatype(instance: Type, repr: MetatypeRepr) -> Self {
        Type::Metatype {
            instance: Box::new(instance),
            repr,
        }
    }

    pub fn function(ft: FunctionType) -> Self {
        Type::Function(Box::new(ft))
    }

    pub fn optional_object_type(&self) -> Option<&Type> {
        match self {
            Type::Optional(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_existential(&self) -> bool {
        matches!(self, Type::Existential(_))
    }

    pub fn nominal_decl(&self) -> Option<NominalId> {
        match self {
            Type::Nominal { decl, .. } => Some(*decl),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            Type::Function(ft) => Some(ft),
            _ => None,
        }
    }

    pub fn is_trivial(&self) -> bool {
        matches!(self, Type::Builtin(_) | Type::Metatype { .. } | Type::Void)
    }

    /// Apply a substitution map to every generic parameter in this type.
    /// Parameters the map does not mention are left alone.
    pub fn subst(&self, subs: &SubstitutionMap) -> Type {
        match self {
            Type::GenericParam { name, .. } => match subs.get(name) {
                Some(replacement) => replacement.clone(),
                None => self.clone(),
            },
            Type::Nominal { decl, args } => Type::Nominal {
                decl: *decl,
                args: args.iter().map(|a| a.subst(subs)).collect(),
            },
            Type::Optional(inner) => Type::optional(inner.subst(subs)),
            Type::Metatype { instance, repr } => Type::metatype(instance.subst(subs), *repr),
            Type::Function(ft) => Type::function(FunctionType {
                params: ft.params.iter().map(|p| p.subst(subs)).collect(),
                result: ft.result.subst(subs),
                is_async: ft.is_async,
                isolation: ft.isolation.clone(),
            }),
            Type::Existential(_)
            | Type::OpenedArchetype { .. }
            | Type::Archetype { .. }
            | Type::Builtin(_)
            | Type::Void => self.clone(),
        }
    }

    /// Map interface generic parameters to context archetypes.
    pub fn map_into_context(&self) -> Type {
        match self {
            Type::GenericParam { name, constraint } => Type::Archetype {
                name: name.clone(),
                constraint: *constraint,
            },
            Type::Nominal { decl, args } => Type::Nominal {
                decl: *decl,
                args: args.iter().map(Type::map_into_context).collect(),
            },
            Type::Optional(inner) => Type::optional(inner.map_into_context()),
            Type::Metatype { instance, repr } => Type::metatype(instance.map_into_context(), *repr),
            Type::Function(ft) => Type::function(FunctionType {
                params: ft.params.iter().map(Type::map_into_context).collect(),
                result: ft.result.map_into_context(),
                is_async: ft.is_async,
                isolation: ft.isolation.clone(),
            }),
            Type::Existential(_)
            | Type::OpenedArchetype { .. }
            | Type::Archetype { .. }
            | Type::Builtin(_)
            | Type::Void => self.clone(),
        }
    }

    fn archetype_constraint(&self) -> Option<KnownProtocol> {
        match self {
            Type::OpenedArchetype { constraint, .. } => Some(*constraint),
            Type::GenericParam { constraint, .. } | Type::Archetype { constraint, .. } => {
                *constraint
            }
            _ => None,
        }
    }
}

// ── Nominal table ───────────────────────────────────────────────────

/// Owner of all nominal declarations; answers the type queries the
/// lowering pass needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NominalTable {
    decls: Vec<NominalDecl>,
}

impl NominalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, decl: NominalDecl) -> NominalId {
        let id = NominalId(self.decls.len() as u32);
        self.decls.push(decl);
        id
    }

    pub fn get(&self, id: NominalId) -> &NominalDecl {
        &self.decls[id.0 as usize]
    }

    pub fn contains(&self, id: NominalId) -> bool {
        (id.0 as usize) < self.decls.len()
    }

    pub fn nominal_of(&self, ty: &Type) -> Option<&NominalDecl> {
        ty.nominal_decl().map(|id| self.get(id))
    }

    /// True for any type whose values are actors: actor and distributed
    /// actor nominals, `any Actor`/`any DistributedActor`, and archetypes
    /// constrained to either protocol.
    pub fn is_any_actor_type(&self, ty: &Type) -> bool {
        match ty {
            Type::Nominal { decl, .. } => matches!(
                self.get(*decl).kind,
                NominalKind::Actor | NominalKind::DistributedActor
            ),
            Type::Existential(_) => true,
            other => other.archetype_constraint().is_some(),
        }
    }

    pub fn is_distributed_actor(&self, ty: &Type) -> bool {
        match ty {
            Type::Nominal { decl, .. } => self.get(*decl).kind == NominalKind::DistributedActor,
            Type::Existential(protocol) => *protocol == KnownProtocol::DistributedActor,
            other => other.archetype_constraint() == Some(KnownProtocol::DistributedActor),
        }
    }

    /// Look up how `ty` conforms to `protocol`.
    ///
    /// Distributed actors do not conform to `Actor`; callers that need that
    /// relationship must use the synthesized conformance.
    pub fn lookup_conformance(&self, ty: &Type, protocol: KnownProtocol) -> ProtocolConformanceRef {
        match ty {
            Type::Nominal { decl, .. } => {
                let conforms = matches!(
                    (self.get(*decl).kind, protocol),
                    (NominalKind::Actor, KnownProtocol::Actor)
                        | (NominalKind::DistributedActor, KnownProtocol::DistributedActor)
                );
                if conforms {
                    ProtocolConformanceRef::Concrete {
                        ty: ty.clone(),
                        protocol,
                    }
                } else {
                    ProtocolConformanceRef::Invalid
                }
            }
            other => match other.archetype_constraint() {
                Some(constraint) if constraint == protocol => ProtocolConformanceRef::Abstract {
                    ty: ty.clone(),
                    protocol,
                },
                _ => ProtocolConformanceRef::Invalid,
            },
        }
    }

    /// Substitutions binding a bound nominal's generic parameters to its
    /// arguments.
    pub fn context_substitution_map(&self, ty: &Type) -> SubstitutionMap {
        match ty {
            Type::Nominal { decl, args } => SubstitutionMap {
                replacements: self
                    .get(*decl)
                    .generic_params
                    .iter()
                    .cloned()
                    .zip(args.iter().cloned())
                    .collect(),
                conformances: Vec::new(),
            },
            _ => SubstitutionMap::empty(),
        }
    }

    /// The type of a member declared with `member_ty`, as seen on `base`.
    pub fn type_of_member(&self, base: &Type, member_ty: &Type) -> Type {
        member_ty.subst(&self.context_substitution_map(base))
    }

    /// Human-readable spelling, for logging.
    pub fn display<'a>(&'a self, ty: &'a Type) -> TypeDisplay<'a> {
        TypeDisplay { table: self, ty }
    }
}

pub struct TypeDisplay<'a> {
    table: &'a NominalTable,
    ty: &'a Type,
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            Type::Nominal { decl, args } => {
                write!(f, "{}", self.table.get(*decl).name)?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", self.table.display(arg))?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            Type::Optional(inner) => write!(f, "{}?", self.table.display(inner)),
            Type::Existential(p) => write!(f, "any {}", p),
            Type::OpenedArchetype { id, constraint } => {
                write!(f, "@opened({}) any {}", id, constraint)
            }
            Type::GenericParam { name, .. } | Type::Archetype { name, .. } => write!(f, "{}", name),
            Type::Metatype { instance, repr } => match repr {
                MetatypeRepr::Thin => write!(f, "@thin {}.Type", self.table.display(instance)),
                MetatypeRepr::Thick => write!(f, "@thick {}.Type", self.table.display(instance)),
            },
            Type::Function(ft) => {
                write!(f, "(")?;
                for (i, p) in ft.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", self.table.display(p))?;
                }
                write!(f, ")")?;
                if ft.is_async {
                    write!(f, " async")?;
                }
                write!(f, " -> {}", self.table.display(&ft.result))
            }
            Type::Builtin(b) => write!(f, "Builtin.{}", b),
            Type::Void => write!(f, "()"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> (NominalTable, NominalId, NominalId, NominalId) {
        let mut t = NominalTable::new();
        let actor = t.add(NominalDecl::new("Counter", NominalKind::Actor));
        let dist = t.add(NominalDecl::new("Worker", NominalKind::DistributedActor));
        let class = t.add(NominalDecl::new("Box", NominalKind::Class));
        (t, actor, dist, class)
    }

    #[test]
    fn actor_conforms_to_actor_only() {
        let (t, actor, _, _) = table();
        let ty = Type::nominal(actor);
        assert_eq!(
            t.lookup_conformance(&ty, KnownProtocol::Actor).protocol(),
            Some(KnownProtocol::Actor)
        );
        assert!(t
            .lookup_conformance(&ty, KnownProtocol::DistributedActor)
            .is_invalid());
    }

    #[test]
    fn distributed_actor_does_not_conform_to_actor() {
        let (t, _, dist, _) = table();
        let ty = Type::nominal(dist);
        assert!(t.lookup_conformance(&ty, KnownProtocol::Actor).is_invalid());
        assert!(t.is_distributed_actor(&ty));
        assert!(t.is_any_actor_type(&ty));
    }

    #[test]
    fn class_is_not_an_actor() {
        let (t, _, _, class) = table();
        assert!(!t.is_any_actor_type(&Type::nominal(class)));
    }

    #[test]
    fn opened_archetype_conforms_abstractly() {
        let (t, _, _, _) = table();
        let opened = Type::OpenedArchetype {
            id: 0,
            constraint: KnownProtocol::DistributedActor,
        };
        assert!(matches!(
            t.lookup_conformance(&opened, KnownProtocol::DistributedActor),
            ProtocolConformanceRef::Abstract { .. }
        ));
    }

    #[test]
    fn member_type_is_substituted() {
        let mut t = NominalTable::new();
        let inner =
            t.add(NominalDecl::new("Inner", NominalKind::Actor).with_generic_params(&["T"]));
        let generic_param = Type::GenericParam {
            name: "T".into(),
            constraint: None,
        };
        let shared_ty = Type::bound_nominal(inner, vec![generic_param]);
        let ga = t.add(
            NominalDecl::new("Lane", NominalKind::Struct)
                .with_generic_params(&["T"])
                .with_shared_instance("shared", shared_ty.clone(), StorageKind::Stored),
        );
        let word = Type::Builtin(BuiltinType::Word);
        let base = Type::bound_nominal(ga, vec![word.clone()]);
        let member = t.type_of_member(&base, &shared_ty);
        assert_eq!(member, Type::bound_nominal(inner, vec![word]));
        assert_eq!(t.display(&member).to_string(), "Inner<Builtin.Word>");
    }

    #[test]
    fn map_into_context_produces_archetypes() {
        let param = Type::GenericParam {
            name: "A".into(),
            constraint: Some(KnownProtocol::Actor),
        };
        assert_eq!(
            Type::optional(param).map_into_context(),
            Type::optional(Type::Archetype {
                name: "A".into(),
                constraint: Some(KnownProtocol::Actor)
            })
        );
    }
}
