//! Lowered IR data types.
//!
//! A lowered function is a list of basic blocks in layout order. Every value
//! is either a block argument or the result of an instruction, and carries
//! its formal type and ownership kind.

use crate::compiler::executor::RewriteHook;
use isogen_core::decl::VarId;
use isogen_core::span::Span;
use isogen_core::types::{ProtocolConformanceRef, SubstitutionMap, Type};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlockId(pub u32);

/// Ownership of an IR value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OwnershipKind {
    /// Trivial; no ownership to track.
    None,
    /// Borrowed for a bounded region.
    Guaranteed,
    /// Owned; someone must consume or destroy it.
    Owned,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueInfo {
    pub ty: Type,
    pub ownership: OwnershipKind,
}

// ── Locations ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LocationKind {
    Regular,
    /// Compiler-synthesized; debuggers do not step into it.
    AutoGenerated,
    /// Only carries a line for the debugger.
    DebugOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub span: Span,
    pub kind: LocationKind,
    pub prologue: bool,
}

impl Location {
    pub fn regular(span: Span) -> Self {
        Self {
            span,
            kind: LocationKind::Regular,
            prologue: false,
        }
    }

    pub fn auto_generated(span: Span) -> Self {
        Self {
            span,
            kind: LocationKind::AutoGenerated,
            prologue: false,
        }
    }

    pub fn debug_only(span: Span) -> Self {
        Self {
            span,
            kind: LocationKind::DebugOnly,
            prologue: false,
        }
    }

    pub fn as_auto_generated(mut self) -> Self {
        self.kind = LocationKind::AutoGenerated;
        self
    }

    pub fn as_debug_only(mut self) -> Self {
        self.kind = LocationKind::DebugOnly;
        self
    }

    pub fn mark_prologue(mut self) -> Self {
        self.prologue = true;
        self
    }
}

// ── Instructions ────────────────────────────────────────────────────

/// Builtins the pass emits calls to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum_macros::Display,
    strum_macros::AsRefStr,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "camelCase")]
pub enum BuiltinName {
    BuildMainActorExecutorRef,
    FlowSensitiveSelfIsolation,
    FlowSensitiveDistributedSelfIsolation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InstKind {
    /// Switch the current execution context to `executor`.
    HopToExecutor { executor: ValueId, mandatory: bool },
    OptionalNone { result: ValueId },
    OptionalSome { operand: ValueId, result: ValueId },
    /// Metatype value; the representation is in the result's type.
    Metatype { result: ValueId },
    Builtin {
        name: BuiltinName,
        subs: SubstitutionMap,
        args: Vec<ValueId>,
        result: ValueId,
    },
    FunctionRef { name: String, result: ValueId },
    /// Direct read of a global or static stored property.
    GlobalLoad { global: String, result: ValueId },
    Apply {
        callee: ValueId,
        subs: SubstitutionMap,
        args: Vec<ValueId>,
        result: ValueId,
    },
    BeginBorrow { operand: ValueId, result: ValueId, formal: bool },
    EndBorrow { operand: ValueId },
    CopyValue { operand: ValueId, result: ValueId },
    DestroyValue { operand: ValueId },
    OpenExistential { operand: ValueId, result: ValueId },
    InitExistential {
        operand: ValueId,
        result: ValueId,
        conformances: Vec<ProtocolConformanceRef>,
    },
    /// Project the serial executor out of an actor reference.
    ExtractExecutor { operand: ValueId, result: ValueId },
    /// Borrow the `(any Actor)?` carried by an `@isolated(any)` function.
    FunctionExtractIsolation { function: ValueId, result: ValueId },
    /// Ordinary read of a variable not bound in this function.
    LoadVar { var: VarId, result: ValueId },
    StringLiteral { value: String, result: ValueId },
    IntegerLiteral { value: i64, result: ValueId },
    /// Placeholder left for the definite-initialization pass, which inserts
    /// the real hop once `self` is known to be initialized.
    IsolationRewriteHook { self_var: VarId, distributed: bool },
}

impl InstKind {
    pub fn result(&self) -> Option<ValueId> {
        match self {
            InstKind::OptionalNone { result }
            | InstKind::OptionalSome { result, .. }
            | InstKind::Metatype { result }
            | InstKind::Builtin { result, .. }
            | InstKind::FunctionRef { result, .. }
            | InstKind::GlobalLoad { result, .. }
            | InstKind::Apply { result, .. }
            | InstKind::BeginBorrow { result, .. }
            | InstKind::CopyValue { result, .. }
            | InstKind::OpenExistential { result, .. }
            | InstKind::InitExistential { result, .. }
            | InstKind::ExtractExecutor { result, .. }
            | InstKind::FunctionExtractIsolation { result, .. }
            | InstKind::LoadVar { result, .. }
            | InstKind::StringLiteral { result, .. }
            | InstKind::IntegerLiteral { result, .. } => Some(*result),
            InstKind::HopToExecutor { .. }
            | InstKind::EndBorrow { .. }
            | InstKind::DestroyValue { .. }
            | InstKind::IsolationRewriteHook { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    pub kind: InstKind,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Terminator {
    Return(Option<ValueId>),
    Throw(ValueId),
    Branch { target: BlockId, args: Vec<ValueId> },
    /// Transfers to `some` with the payload as its single argument, or to
    /// `none` with no arguments.
    SwitchOptional { operand: ValueId, some: BlockId, none: BlockId },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub args: Vec<ValueId>,
    pub instructions: Vec<Instruction>,
    pub terminator: Option<Terminator>,
}

// ── Functions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct IrFunction {
    pub name: String,
    pub is_async: bool,
    pub blocks: Vec<BasicBlock>,
    /// Block ids in layout order.
    pub layout: Vec<BlockId>,
    pub values: Vec<ValueInfo>,
    rewrite_hook: Option<RewriteHook>,
}

impl IrFunction {
    pub fn new(name: impl Into<String>, is_async: bool) -> Self {
        Self {
            name: name.into(),
            is_async,
            blocks: Vec::new(),
            layout: Vec::new(),
            values: Vec::new(),
            rewrite_hook: None,
        }
    }

    pub fn entry(&self) -> BlockId {
        self.layout[0]
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0 as usize]
    }

    pub fn value(&self, id: ValueId) -> &ValueInfo {
        &self.values[id.0 as usize]
    }

    pub fn value_type(&self, id: ValueId) -> &Type {
        &self.value(id).ty
    }

    /// All instructions in layout order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.layout
            .iter()
            .flat_map(move |b| self.block(*b).instructions.iter())
    }

    pub fn count_instructions(&self, pred: impl Fn(&InstKind) -> bool) -> usize {
        self.instructions().filter(|i| pred(&i.kind)).count()
    }

    /// `(executor, mandatory)` for every hop, in layout order.
    pub fn hops(&self) -> Vec<(ValueId, bool)> {
        self.instructions()
            .filter_map(|i| match i.kind {
                InstKind::HopToExecutor {
                    executor,
                    mandatory,
                } => Some((executor, mandatory)),
                _ => None,
            })
            .collect()
    }

    /// The instruction that defines `value`, if it is not a block argument.
    pub fn defining_instruction(&self, value: ValueId) -> Option<&Instruction> {
        self.instructions().find(|i| i.kind.result() == Some(value))
    }

    pub fn rewrite_hook(&self) -> Option<&RewriteHook> {
        self.rewrite_hook.as_ref()
    }

    /// Hand the rewrite hook to the pass that resolves it. Subsequent calls
    /// return `None`.
    pub fn take_rewrite_hook(&mut self) -> Option<RewriteHook> {
        self.rewrite_hook.take()
    }

    pub(crate) fn set_rewrite_hook(&mut self, hook: RewriteHook) {
        self.rewrite_hook = Some(hook);
    }
}
