//! Declarations of the type-checked program.
//!
//! Everything here is read-only input to lowering: variables, functions,
//! closures, their parameters and lowered capture lists, and the
//! declaration-context tree that links them.

use crate::isolation::{ActorIsolation, FunctionTypeIsolation};
use crate::span::{FileId, SourceFile, Span};
use crate::types::{NominalId, NominalTable, Type};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Ids ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClosureId(pub u32);

/// A lowerable body: either a declared function or a closure expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionRef {
    Func(FuncId),
    Closure(ClosureId),
}

// ── Variables ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarKind {
    SelfParam,
    Param,
    Local,
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub ty: Type,
    pub kind: VarKind,
}

// ── Parameters & captures ───────────────────────────────────────────

/// Ownership convention of an incoming argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamConvention {
    /// Borrowed from the caller for the duration of the call.
    Guaranteed,
    /// Passed at +1; the callee owns it.
    Owned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub var: VarId,
    pub convention: ParamConvention,
    /// Marked `isolated`.
    pub is_isolated: bool,
}

impl ParamDecl {
    pub fn guaranteed(var: VarId) -> Self {
        Self {
            var,
            convention: ParamConvention::Guaranteed,
            is_isolated: false,
        }
    }

    pub fn owned(var: VarId) -> Self {
        Self {
            var,
            convention: ParamConvention::Owned,
            is_isolated: false,
        }
    }

    pub fn isolated(mut self) -> Self {
        self.is_isolated = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureKind {
    /// Captured by value.
    Constant,
    /// Captured in a heap box (mutable variables).
    Box,
    /// Captured as the address of its storage.
    StorageAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capture {
    /// Metadata for a dynamic `Self` type; carries no variable.
    DynamicSelfMetadata,
    Var {
        var: VarId,
        kind: CaptureKind,
        /// This capture is the isolated parameter of the enclosing context.
        is_isolated: bool,
    },
}

impl Capture {
    pub fn constant(var: VarId) -> Self {
        Capture::Var {
            var,
            kind: CaptureKind::Constant,
            is_isolated: false,
        }
    }

    pub fn isolated(var: VarId) -> Self {
        Capture::Var {
            var,
            kind: CaptureKind::Constant,
            is_isolated: true,
        }
    }

    pub fn var(&self) -> Option<VarId> {
        match self {
            Capture::DynamicSelfMetadata => None,
            Capture::Var { var, .. } => Some(*var),
        }
    }
}

/// Lowered captures of one function or closure, in argument order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureInfo {
    pub captures: Vec<Capture>,
}

impl CaptureInfo {
    pub fn new(captures: Vec<Capture>) -> Self {
        Self { captures }
    }

    pub fn isolated_param_capture(&self) -> Option<VarId> {
        self.captures.iter().find_map(|c| match c {
            Capture::Var {
                var,
                is_isolated: true,
                ..
            } => Some(*var),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }
}

// ── Functions & closures ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    Func,
    Constructor,
    Destructor,
    /// Body of a `defer` statement.
    Defer,
    Accessor,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionAttrs {
    /// `@_unsafeInheritExecutor`
    pub unsafe_inherit_executor: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub kind: FunctionKind,
    pub is_async: bool,
    /// A local function that captures from its enclosing context.
    pub is_local_capture: bool,
    pub attrs: FunctionAttrs,
    pub isolation: ActorIsolation,
    pub self_param: Option<ParamDecl>,
    pub params: Vec<ParamDecl>,
    pub captures: CaptureInfo,
    pub parent: DeclContext,
    pub span: Span,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>, kind: FunctionKind, isolation: ActorIsolation) -> Self {
        Self {
            name: name.into(),
            kind,
            is_async: false,
            is_local_capture: false,
            attrs: FunctionAttrs::default(),
            isolation,
            self_param: None,
            params: Vec::new(),
            captures: CaptureInfo::default(),
            parent: DeclContext::Module,
            span: Span::dummy(),
        }
    }

    pub fn implicit_self_decl(&self) -> Option<VarId> {
        self.self_param.map(|p| p.var)
    }

    pub fn isolated_param(&self) -> Option<&ParamDecl> {
        self.self_param
            .iter()
            .chain(self.params.iter())
            .find(|p| p.is_isolated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureExpr {
    pub name: String,
    pub is_async: bool,
    pub isolation: ActorIsolation,
    /// Set by the type checker when the closure may be called from code
    /// that cannot prove it runs on the closure's actor.
    pub requires_dynamic_isolation_checking: bool,
    pub params: Vec<ParamDecl>,
    pub captures: CaptureInfo,
    pub parent: DeclContext,
    pub span: Span,
}

impl ClosureExpr {
    pub fn new(name: impl Into<String>, isolation: ActorIsolation, parent: DeclContext) -> Self {
        Self {
            name: name.into(),
            is_async: false,
            isolation,
            requires_dynamic_isolation_checking: false,
            params: Vec::new(),
            captures: CaptureInfo::default(),
            parent,
            span: Span::dummy(),
        }
    }

    pub fn isolated_param(&self) -> Option<&ParamDecl> {
        self.params.iter().find(|p| p.is_isolated)
    }
}

/// Position of a declaration in the context tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclContext {
    Module,
    Nominal(NominalId),
    Function(FuncId),
    Closure(ClosureId),
}

impl DeclContext {
    pub fn is_module_scope(&self) -> bool {
        matches!(self, DeclContext::Module)
    }

    pub fn is_type_context(&self) -> bool {
        matches!(self, DeclContext::Nominal(_))
    }
}

impl From<FunctionRef> for DeclContext {
    fn from(f: FunctionRef) -> Self {
        match f {
            FunctionRef::Func(id) => DeclContext::Function(id),
            FunctionRef::Closure(id) => DeclContext::Closure(id),
        }
    }
}

// ── Program ─────────────────────────────────────────────────────────

/// Arena of everything the type checker produced for one module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub types: NominalTable,
    vars: Vec<VarDecl>,
    functions: Vec<FunctionDecl>,
    closures: Vec<ClosureExpr>,
    files: Vec<SourceFile>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, file: SourceFile) -> FileId {
        let id = FileId(self.files.len() as u32);
        self.files.push(file);
        id
    }

    pub fn file(&self, id: FileId) -> Option<&SourceFile> {
        self.files.get(id.0 as usize)
    }

    pub fn add_var(&mut self, name: impl Into<String>, ty: Type, kind: VarKind) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(VarDecl {
            name: name.into(),
            ty,
            kind,
        });
        id
    }

    pub fn var(&self, id: VarId) -> &VarDecl {
        &self.vars[id.0 as usize]
    }

    pub fn add_function(&mut self, decl: FunctionDecl) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(decl);
        id
    }

    pub fn function(&self, id: FuncId) -> &FunctionDecl {
        &self.functions[id.0 as usize]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut FunctionDecl {
        &mut self.functions[id.0 as usize]
    }

    pub fn add_closure(&mut self, closure: ClosureExpr) -> ClosureId {
        let id = ClosureId(self.closures.len() as u32);
        self.closures.push(closure);
        id
    }

    pub fn closure(&self, id: ClosureId) -> &ClosureExpr {
        &self.closures[id.0 as usize]
    }

    /// Whether `f` names a function or closure in this program.
    pub fn contains(&self, f: FunctionRef) -> bool {
        match f {
            FunctionRef::Func(id) => (id.0 as usize) < self.functions.len(),
            FunctionRef::Closure(id) => (id.0 as usize) < self.closures.len(),
        }
    }

    pub fn function_ids(&self) -> impl Iterator<Item = FuncId> {
        (0..self.functions.len() as u32).map(FuncId)
    }

    pub fn closure_ids(&self) -> impl Iterator<Item = ClosureId> {
        (0..self.closures.len() as u32).map(ClosureId)
    }

    /// Declared isolation of a function or closure.
    pub fn isolation_of(&self, f: FunctionRef) -> &ActorIsolation {
        match f {
            FunctionRef::Func(id) => &self.function(id).isolation,
            FunctionRef::Closure(id) => &self.closure(id).isolation,
        }
    }

    pub fn lowered_captures(&self, f: FunctionRef) -> &CaptureInfo {
        match f {
            FunctionRef::Func(id) => &self.function(id).captures,
            FunctionRef::Closure(id) => &self.closure(id).captures,
        }
    }

    pub fn is_async(&self, f: FunctionRef) -> bool {
        match f {
            FunctionRef::Func(id) => self.function(id).is_async,
            FunctionRef::Closure(id) => self.closure(id).is_async,
        }
    }

    pub fn name_of(&self, f: FunctionRef) -> &str {
        match f {
            FunctionRef::Func(id) => &self.function(id).name,
            FunctionRef::Closure(id) => &self.closure(id).name,
        }
    }

    pub fn span_of(&self, f: FunctionRef) -> Span {
        match f {
            FunctionRef::Func(id) => self.function(id).span,
            FunctionRef::Closure(id) => self.closure(id).span,
        }
    }

    /// Enclosing context, or `None` at module scope.
    pub fn parent_of(&self, dc: DeclContext) -> Option<DeclContext> {
        match dc {
            DeclContext::Module => None,
            DeclContext::Nominal(_) => Some(DeclContext::Module),
            DeclContext::Function(id) => Some(self.function(id).parent),
            DeclContext::Closure(id) => Some(self.closure(id).parent),
        }
    }
}

// ── Validation ──────────────────────────────────────────────────────

/// A reference in a [`Program`] that does not resolve.
///
/// Accessors like [`Program::var`] index their arena directly; lowering
/// validates a function once up front so a malformed program fails with
/// one of these instead of a panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    #[error("'{owner}' refers to unknown variable {var:?}")]
    UnknownVar { owner: String, var: VarId },
    #[error("'{owner}' refers to unknown nominal type {decl:?}")]
    UnknownNominal { owner: String, decl: NominalId },
    #[error("'{owner}' has unknown parent context {parent:?}")]
    UnknownParent { owner: String, parent: DeclContext },
    #[error("parent contexts of '{owner}' form a cycle")]
    ParentCycle { owner: String },
}

impl Program {
    /// Check that every declaration lowering `f` reaches resolves: its
    /// isolation, parameters, captures, the types of those variables and
    /// its chain of parent contexts.
    pub fn validate_function(&self, f: FunctionRef) -> Result<(), ProgramError> {
        let owner = self.name_of(f);
        let (isolation, params, self_param) = match f {
            FunctionRef::Func(id) => {
                let decl = self.function(id);
                (&decl.isolation, &decl.params, decl.self_param)
            }
            FunctionRef::Closure(id) => {
                let closure = self.closure(id);
                (&closure.isolation, &closure.params, None)
            }
        };

        match isolation {
            ActorIsolation::ActorInstance(instance) => self.check_var(owner, instance.var)?,
            ActorIsolation::GlobalActor(ty) => self.check_global_actor(owner, ty)?,
            ActorIsolation::Unspecified
            | ActorIsolation::Nonisolated
            | ActorIsolation::NonisolatedUnsafe
            | ActorIsolation::CallerIsolationInheriting
            | ActorIsolation::Erased => {}
        }
        for param in self_param.iter().chain(params.iter()) {
            self.check_var(owner, param.var)?;
        }
        for var in self.lowered_captures(f).captures.iter().filter_map(Capture::var) {
            self.check_var(owner, var)?;
        }
        self.check_parents(owner, DeclContext::from(f))
    }

    fn check_var(&self, owner: &str, var: VarId) -> Result<(), ProgramError> {
        let decl = self.vars.get(var.0 as usize).ok_or_else(|| ProgramError::UnknownVar {
            owner: owner.to_string(),
            var,
        })?;
        self.check_type(owner, &decl.ty)
    }

    /// A global actor type and the type of its shared instance.
    fn check_global_actor(&self, owner: &str, ty: &Type) -> Result<(), ProgramError> {
        self.check_type(owner, ty)?;
        let shared = self
            .types
            .nominal_of(ty)
            .and_then(|decl| decl.global_actor_shared.as_ref());
        match shared {
            Some(shared) => self.check_type(owner, &shared.ty),
            None => Ok(()),
        }
    }

    fn check_type(&self, owner: &str, ty: &Type) -> Result<(), ProgramError> {
        match ty {
            Type::Nominal { decl, args } => {
                if !self.types.contains(*decl) {
                    return Err(ProgramError::UnknownNominal {
                        owner: owner.to_string(),
                        decl: *decl,
                    });
                }
                args.iter().try_for_each(|arg| self.check_type(owner, arg))
            }
            Type::Optional(inner) => self.check_type(owner, inner),
            Type::Metatype { instance, .. } => self.check_type(owner, instance),
            Type::Function(function) => {
                for param in &function.params {
                    self.check_type(owner, param)?;
                }
                self.check_type(owner, &function.result)?;
                match &function.isolation {
                    FunctionTypeIsolation::GlobalActor(actor) => {
                        self.check_global_actor(owner, actor)
                    }
                    FunctionTypeIsolation::Parameter
                    | FunctionTypeIsolation::NonIsolated
                    | FunctionTypeIsolation::NonIsolatedCaller
                    | FunctionTypeIsolation::Erased => Ok(()),
                }
            }
            Type::Existential(_)
            | Type::OpenedArchetype { .. }
            | Type::GenericParam { .. }
            | Type::Archetype { .. }
            | Type::Builtin(_)
            | Type::Void => Ok(()),
        }
    }

    fn check_parents(&self, owner: &str, start: DeclContext) -> Result<(), ProgramError> {
        // a chain longer than the number of contexts revisits one
        let limit = self.functions.len() + self.closures.len() + 1;
        let mut dc = start;
        for _ in 0..=limit {
            let parent = match dc {
                DeclContext::Module => return Ok(()),
                DeclContext::Nominal(id) if self.types.contains(id) => return Ok(()),
                DeclContext::Function(id) if (id.0 as usize) < self.functions.len() => {
                    self.function(id).parent
                }
                DeclContext::Closure(id) if (id.0 as usize) < self.closures.len() => {
                    self.closure(id).parent
                }
                _ => {
                    return Err(ProgramError::UnknownParent {
                        owner: owner.to_string(),
                        parent: dc,
                    })
                }
            };
            dc = parent;
        }
        Err(ProgramError::ParentCycle {
            owner: owner.to_string(),
        })
    }
}
