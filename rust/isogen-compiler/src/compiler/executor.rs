//! Per-function executor bookkeeping.

use crate::compiler::function::FunctionLowering;
use crate::compiler::ir::{Location, ValueId};
use crate::LowerError;
use isogen_core::decl::VarId;
use serde::Serialize;
use tracing::trace;

/// The executor a function expects to be running on.
///
/// Starts `Invalid`, is set exactly once by the prolog, and is read by
/// every path that has to restore the expected context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedExecutor {
    #[default]
    Invalid,
    /// No hop or check is needed.
    Unnecessary,
    /// Computed at entry and reused.
    Eager(ValueId),
    /// Recomputed on each use; `self` of an async actor initializer is not
    /// readable before it is fully initialized.
    Lazy,
}

impl ExpectedExecutor {
    pub fn is_valid(&self) -> bool {
        !matches!(self, ExpectedExecutor::Invalid)
    }

    pub fn is_necessary(&self) -> bool {
        matches!(self, ExpectedExecutor::Eager(_) | ExpectedExecutor::Lazy)
    }

    pub fn is_eager(&self) -> bool {
        matches!(self, ExpectedExecutor::Eager(_))
    }

    pub fn eager(&self) -> Option<ValueId> {
        match self {
            ExpectedExecutor::Eager(v) => Some(*v),
            _ => None,
        }
    }

    fn transition(&mut self, to: ExpectedExecutor, function: &str) -> Result<(), LowerError> {
        if self.is_valid() {
            return Err(LowerError::ExpectedExecutorAlreadySet {
                function: function.to_string(),
            });
        }
        *self = to;
        Ok(())
    }

    pub fn set(&mut self, executor: ValueId, function: &str) -> Result<(), LowerError> {
        self.transition(ExpectedExecutor::Eager(executor), function)
    }

    pub fn set_unnecessary(&mut self, function: &str) -> Result<(), LowerError> {
        self.transition(ExpectedExecutor::Unnecessary, function)
    }

    pub fn set_lazy(&mut self, function: &str) -> Result<(), LowerError> {
        self.transition(ExpectedExecutor::Lazy, function)
    }
}

/// Obligation to hop back to the expected executor after a temporary hop.
///
/// Consumed by [`ExecutorBreadcrumb::emit`]; a breadcrumb cannot be emitted
/// twice.
#[derive(Debug, Default, PartialEq, Eq)]
#[must_use = "a breadcrumb must be emitted on the scope's exit"]
pub struct ExecutorBreadcrumb {
    must_return_to_executor: bool,
}

impl ExecutorBreadcrumb {
    /// A breadcrumb with nothing to undo.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn returning() -> Self {
        Self {
            must_return_to_executor: true,
        }
    }

    pub fn must_return_to_executor(&self) -> bool {
        self.must_return_to_executor
    }

    /// Hop back to the function's expected executor if this breadcrumb
    /// recorded a hop away from it.
    pub fn emit(
        self,
        lowering: &mut FunctionLowering<'_>,
        loc: Location,
    ) -> Result<(), LowerError> {
        if !self.must_return_to_executor {
            return Ok(());
        }
        if !lowering.expected_executor().is_valid() {
            return Err(LowerError::ExpectedExecutorNotSet);
        }
        if !lowering.expected_executor().is_necessary() {
            return Ok(());
        }
        trace!(function = %lowering.name(), "emitting breadcrumb hop");
        lowering.in_scope(loc, |l| {
            let executor = l.emit_expected_executor(loc)?;
            l.builder
                .create_hop_to_executor(loc.as_debug_only(), executor.value(), false);
            Ok(())
        })
    }
}

/// Marker for the definite-initialization pass: the true executor of an
/// async actor initializer is `self`, once `self` is initialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteHook {
    pub self_var: VarId,
    pub distributed: bool,
    pub loc: Location,
}
