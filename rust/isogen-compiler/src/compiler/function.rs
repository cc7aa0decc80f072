//! Per-function lowering state.
//!
//! A [`FunctionLowering`] is created for one function or closure, binds the
//! incoming arguments and captures as entry-block arguments, and owns the
//! builder, the cleanup stack and the expected executor until the lowered
//! function is finished.

use crate::compiler::builder::IrBuilder;
use crate::compiler::cleanup::{Cleanup, CleanupDepth, CleanupStack, ExitKind};
use crate::compiler::executor::ExpectedExecutor;
use crate::compiler::ir::{IrFunction, Location, OwnershipKind, ValueId};
use crate::compiler::managed::{ManagedValue, Ownership};
use crate::options::{LowerOptions, RuntimeIntrinsics};
use isogen_core::decl::{Capture, FunctionRef, ParamConvention, ParamDecl, Program, VarId};
use isogen_core::types::{KnownProtocol, MetatypeRepr, Type};
use std::collections::HashMap;
use tracing::trace;

pub struct FunctionLowering<'p> {
    program: &'p Program,
    options: &'p LowerOptions,
    intrinsics: &'p RuntimeIntrinsics,
    function: FunctionRef,
    pub(crate) builder: IrBuilder,
    pub(crate) cleanups: CleanupStack,
    pub(crate) expected_executor: ExpectedExecutor,
    /// Cleanup depth at entry of each open scope, outermost first.
    scopes: Vec<CleanupDepth>,
    /// Arguments and captured variables, by declaration.
    bound_vars: HashMap<VarId, ManagedValue>,
    self_var: Option<VarId>,
    isolated_param: Option<VarId>,
    /// One entry per lowered capture, in capture order.
    capture_args: Vec<ManagedValue>,
    formal_evaluation_depth: usize,
    next_opened_id: u32,
}

impl<'p> FunctionLowering<'p> {
    pub fn new(
        program: &'p Program,
        function: FunctionRef,
        options: &'p LowerOptions,
        intrinsics: &'p RuntimeIntrinsics,
    ) -> Self {
        let builder = IrBuilder::new(program.name_of(function), program.is_async(function));
        let mut lowering = Self {
            program,
            options,
            intrinsics,
            function,
            builder,
            cleanups: CleanupStack::new(),
            expected_executor: ExpectedExecutor::default(),
            scopes: Vec::new(),
            bound_vars: HashMap::new(),
            self_var: None,
            isolated_param: None,
            capture_args: Vec::new(),
            formal_evaluation_depth: 0,
            next_opened_id: 0,
        };
        lowering.scopes.push(lowering.cleanups.depth());
        lowering.bind_arguments();
        lowering
    }

    fn bind_arguments(&mut self) {
        let program = self.program;
        let (self_param, params, isolated) = match self.function {
            FunctionRef::Func(id) => {
                let decl = program.function(id);
                (decl.self_param, decl.params.as_slice(), decl.isolated_param().map(|p| p.var))
            }
            FunctionRef::Closure(id) => {
                let closure = program.closure(id);
                (None, closure.params.as_slice(), closure.isolated_param().map(|p| p.var))
            }
        };

        if let Some(param) = self_param {
            self.bind_param(param);
            self.self_var = Some(param.var);
        }
        for param in params {
            self.bind_param(*param);
        }
        self.isolated_param = isolated;

        let entry = self.builder.function().entry();
        for capture in &program.lowered_captures(self.function).captures {
            let arg = match capture {
                Capture::DynamicSelfMetadata => {
                    let ty = Type::metatype(Type::Void, MetatypeRepr::Thick);
                    let v = self.builder.add_block_arg(entry, ty.clone(), OwnershipKind::None);
                    ManagedValue::for_trivial(v, ty)
                }
                Capture::Var { var, .. } => {
                    let ty = program.var(*var).ty.map_into_context();
                    let ownership = if ty.is_trivial() {
                        OwnershipKind::None
                    } else {
                        OwnershipKind::Guaranteed
                    };
                    let v = self.builder.add_block_arg(entry, ty.clone(), ownership);
                    let mv = ManagedValue::for_borrowed(v, ty);
                    self.bound_vars.insert(*var, mv.clone());
                    mv
                }
            };
            self.capture_args.push(arg);
        }
    }

    fn bind_param(&mut self, param: ParamDecl) {
        let ty = self.program.var(param.var).ty.map_into_context();
        let ownership = match (ty.is_trivial(), param.convention) {
            (true, _) => OwnershipKind::None,
            (false, ParamConvention::Guaranteed) => OwnershipKind::Guaranteed,
            (false, ParamConvention::Owned) => OwnershipKind::Owned,
        };
        let entry = self.builder.function().entry();
        let v = self.builder.add_block_arg(entry, ty.clone(), ownership);
        let argument = ManagedValue::for_argument(v, ty, param.convention);
        self.bound_vars.insert(param.var, argument);
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn program(&self) -> &'p Program {
        self.program
    }

    pub fn options(&self) -> &'p LowerOptions {
        self.options
    }

    pub fn intrinsics(&self) -> &'p RuntimeIntrinsics {
        self.intrinsics
    }

    pub fn function_ref(&self) -> FunctionRef {
        self.function
    }

    pub fn name(&self) -> &'p str {
        self.program.name_of(self.function)
    }

    pub fn is_async(&self) -> bool {
        self.program.is_async(self.function)
    }

    pub fn expected_executor(&self) -> ExpectedExecutor {
        self.expected_executor
    }

    pub fn builder(&self) -> &IrBuilder {
        &self.builder
    }

    pub fn capture_args(&self) -> &[ManagedValue] {
        &self.capture_args
    }

    /// The incoming `self` argument, if the function has one.
    pub fn self_argument(&self) -> Option<ManagedValue> {
        self.self_var.and_then(|v| self.bound_vars.get(&v).cloned())
    }

    /// The incoming argument marked `isolated`, if any.
    pub fn isolated_argument(&self) -> Option<ManagedValue> {
        self.isolated_param
            .and_then(|v| self.bound_vars.get(&v).cloned())
    }

    /// Location of the function declaration itself.
    pub fn function_loc(&self) -> Location {
        Location::regular(self.program.span_of(self.function))
    }

    pub(crate) fn fresh_opened_archetype(&mut self, constraint: KnownProtocol) -> Type {
        let id = self.next_opened_id;
        self.next_opened_id += 1;
        Type::OpenedArchetype { id, constraint }
    }

    // ── Declaration references ──────────────────────────────────────

    /// Ordinary read of `var`: the bound argument or capture if there is
    /// one, otherwise an owned load.
    pub fn emit_rvalue_for_decl(&mut self, loc: Location, var: VarId) -> ManagedValue {
        if let Some(bound) = self.bound_vars.get(&var) {
            return bound.clone();
        }
        let ty = self.program.var(var).ty.map_into_context();
        let v = self.builder.create_load_var(loc, var, ty.clone());
        ManagedValue::for_owned(self, v, ty)
    }

    /// The raw value of a local, without taking on any cleanup.
    pub(crate) fn emit_value_of_local_var(&mut self, loc: Location, var: VarId) -> ValueId {
        match self.bound_vars.get(&var) {
            Some(bound) => bound.value(),
            None => {
                let ty = self.program.var(var).ty.map_into_context();
                self.builder.create_load_var(loc, var, ty)
            }
        }
    }

    // ── Scopes ──────────────────────────────────────────────────────

    pub fn enter_scope(&mut self) {
        self.scopes.push(self.cleanups.depth());
    }

    /// Leave the innermost scope, emitting its cleanups on the fallthrough
    /// edge if the current block is still open.
    pub fn pop_scope(&mut self, loc: Location) {
        let Some(depth) = self.scopes.pop() else {
            return;
        };
        if self.builder.has_valid_insertion_point() {
            self.emit_cleanups_above(depth, loc, ExitKind::Fallthrough);
        }
        self.cleanups.truncate(depth);
    }

    /// Run `body` in a fresh scope. The scope is popped whether or not
    /// `body` succeeds.
    pub fn in_scope<T>(
        &mut self,
        loc: Location,
        body: impl FnOnce(&mut Self) -> Result<T, crate::LowerError>,
    ) -> Result<T, crate::LowerError> {
        self.enter_scope();
        let result = body(self);
        self.pop_scope(loc);
        result
    }

    /// Pop the innermost scope, keeping `value` alive in the enclosing one.
    pub fn pop_scope_preserving_value(
        &mut self,
        loc: Location,
        value: ManagedValue,
    ) -> ManagedValue {
        let value = match value.ownership() {
            Ownership::Borrowed => value.copy(self, loc),
            _ => value,
        };
        let ty = value.ty().clone();
        let ownership = value.ownership();
        let raw = value.forward(self);
        self.pop_scope(loc);
        match ownership {
            Ownership::Owned(_) => ManagedValue::for_owned(self, raw, ty),
            Ownership::UnmanagedOwned => ManagedValue::for_unmanaged_owned(raw, ty),
            Ownership::Trivial => ManagedValue::for_trivial(raw, ty),
            Ownership::Borrowed => ManagedValue::for_borrowed(raw, ty),
        }
    }

    pub fn is_in_formal_evaluation_scope(&self) -> bool {
        self.formal_evaluation_depth > 0
    }

    /// Run `body` as one formal access: borrows taken inside are formal
    /// accesses and end with the scope.
    pub fn in_formal_evaluation_scope<T>(
        &mut self,
        loc: Location,
        body: impl FnOnce(&mut Self) -> Result<T, crate::LowerError>,
    ) -> Result<T, crate::LowerError> {
        self.formal_evaluation_depth += 1;
        let result = self.in_scope(loc, body);
        self.formal_evaluation_depth -= 1;
        result
    }

    // ── Exits ───────────────────────────────────────────────────────

    fn emit_cleanups_above(&mut self, depth: CleanupDepth, loc: Location, exit: ExitKind) {
        for cleanup in self.cleanups.active_above(depth) {
            trace!(function = %self.name(), ?cleanup, ?exit, "emitting cleanup");
            match cleanup {
                Cleanup::DestroyValue(v) => self.builder.create_destroy_value(loc, v),
                Cleanup::EndBorrow(v) => self.builder.create_end_borrow(loc, v),
                Cleanup::HopToExecutor(v) => self.builder.create_hop_to_executor(loc, v, false),
            }
        }
    }

    fn function_depth(&self) -> CleanupDepth {
        self.scopes
            .first()
            .copied()
            .unwrap_or_else(|| self.cleanups.depth())
    }

    /// Return from the function. Every active cleanup, in every open scope,
    /// is emitted on the return edge.
    pub fn emit_return(&mut self, loc: Location, value: Option<ManagedValue>) {
        let value = value.map(|v| v.forward(self));
        let depth = self.function_depth();
        self.emit_cleanups_above(depth, loc, ExitKind::Return);
        self.builder.create_return(value);
    }

    /// Propagate `error` out of the function, emitting every active cleanup.
    pub fn emit_throw(&mut self, loc: Location, error: ManagedValue) {
        let error = error.forward(self);
        let depth = self.function_depth();
        self.emit_cleanups_above(depth, loc, ExitKind::Throw);
        self.builder.create_throw(error);
    }

    /// Close the function with a `return` if the current block is still
    /// open and hand back the lowered body.
    pub fn finish(mut self) -> IrFunction {
        if self.builder.has_valid_insertion_point() {
            let loc = self.function_loc().as_auto_generated();
            self.emit_return(loc, None);
        }
        self.builder.finish()
    }
}
