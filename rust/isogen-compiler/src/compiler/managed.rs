//! Values paired with their ownership obligations.

use crate::compiler::cleanup::{Cleanup, CleanupHandle};
use crate::compiler::function::FunctionLowering;
use crate::compiler::ir::{Location, ValueId};
use isogen_core::decl::ParamConvention;
use isogen_core::types::Type;

/// How a [`ManagedValue`] holds its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Borrowed; valid for the enclosing borrow scope. Never destroyed here.
    Borrowed,
    /// Owned with a destroy cleanup on the cleanup stack.
    Owned(CleanupHandle),
    /// Owned, but someone else is responsible for destroying it.
    UnmanagedOwned,
    /// No ownership at all.
    Trivial,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManagedValue {
    value: ValueId,
    ty: Type,
    ownership: Ownership,
}

impl ManagedValue {
    pub fn for_borrowed(value: ValueId, ty: Type) -> Self {
        Self {
            value,
            ty,
            ownership: Ownership::Borrowed,
        }
    }

    pub fn for_unmanaged_owned(value: ValueId, ty: Type) -> Self {
        Self {
            value,
            ty,
            ownership: Ownership::UnmanagedOwned,
        }
    }

    pub fn for_trivial(value: ValueId, ty: Type) -> Self {
        Self {
            value,
            ty,
            ownership: Ownership::Trivial,
        }
    }

    /// Take ownership of `value`, registering a destroy cleanup.
    pub fn for_owned(lowering: &mut FunctionLowering<'_>, value: ValueId, ty: Type) -> Self {
        if ty.is_trivial() {
            return Self::for_trivial(value, ty);
        }
        let handle = lowering.cleanups.push(Cleanup::DestroyValue(value));
        Self {
            value,
            ty,
            ownership: Ownership::Owned(handle),
        }
    }

    /// An incoming argument: borrowed if the caller guarantees it, otherwise
    /// owned without taking over its destruction.
    pub fn for_argument(value: ValueId, ty: Type, convention: ParamConvention) -> Self {
        match convention {
            ParamConvention::Guaranteed => Self::for_borrowed(value, ty),
            ParamConvention::Owned => Self::for_unmanaged_owned(value, ty),
        }
    }

    pub fn value(&self) -> ValueId {
        self.value
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn has_cleanup(&self) -> bool {
        matches!(self.ownership, Ownership::Owned(_))
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self.ownership, Ownership::Borrowed | Ownership::Trivial)
    }

    /// Same value, new type. Used after conversions that forward ownership.
    pub(crate) fn with_value(&self, value: ValueId, ty: Type) -> ManagedValue {
        Self {
            value,
            ty,
            ownership: self.ownership,
        }
    }

    /// The raw value, leaving any cleanup in place.
    pub fn unmanaged_value(&self) -> ValueId {
        self.value
    }

    /// Borrow for the current scope. Borrowed and trivial values are
    /// returned as-is; owned values get a `begin_borrow` whose `end_borrow`
    /// is a cleanup of the innermost scope.
    pub fn borrow(&self, lowering: &mut FunctionLowering<'_>, loc: Location) -> ManagedValue {
        self.borrow_impl(lowering, loc, false)
    }

    /// Like [`ManagedValue::borrow`], inside a formal evaluation scope.
    pub fn formal_access_borrow(
        &self,
        lowering: &mut FunctionLowering<'_>,
        loc: Location,
    ) -> ManagedValue {
        self.borrow_impl(lowering, loc, true)
    }

    fn borrow_impl(
        &self,
        lowering: &mut FunctionLowering<'_>,
        loc: Location,
        formal: bool,
    ) -> ManagedValue {
        match self.ownership {
            Ownership::Borrowed | Ownership::Trivial => self.clone(),
            Ownership::Owned(_) | Ownership::UnmanagedOwned => {
                let borrowed = lowering.builder.create_begin_borrow(loc, self.value, formal);
                lowering.cleanups.push(Cleanup::EndBorrow(borrowed));
                Self::for_borrowed(borrowed, self.ty.clone())
            }
        }
    }

    /// An independently owned copy.
    pub fn copy(&self, lowering: &mut FunctionLowering<'_>, loc: Location) -> ManagedValue {
        if self.ownership == Ownership::Trivial || self.ty.is_trivial() {
            return self.clone();
        }
        let copied = lowering.builder.create_copy_value(loc, self.value);
        Self::for_owned(lowering, copied, self.ty.clone())
    }

    /// Give up the cleanup and return the raw value. The caller is now
    /// responsible for consuming it.
    pub fn forward(self, lowering: &mut FunctionLowering<'_>) -> ValueId {
        if let Ownership::Owned(handle) = self.ownership {
            lowering.cleanups.forward(handle);
        }
        self.value
    }
}
