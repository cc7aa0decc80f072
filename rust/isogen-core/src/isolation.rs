//! Static isolation descriptors.
//!
//! [`ActorIsolation`] is attached to every function, closure, and
//! initializer by the type checker. [`FunctionTypeIsolation`] is recorded
//! on function *types* and describes how a function value's isolation is
//! known at runtime.

use crate::decl::VarId;
use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the actor value of an actor-instance isolation comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceSource {
    /// The implicit `self` of a method or initializer.
    SelfParameter,
    /// A parameter marked `isolated`.
    Parameter,
    /// A variable captured by a closure or local function.
    Capture,
}

/// Isolation to one specific actor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorInstance {
    pub var: VarId,
    pub source: InstanceSource,
}

impl ActorInstance {
    pub fn self_parameter(var: VarId) -> Self {
        Self {
            var,
            source: InstanceSource::SelfParameter,
        }
    }

    pub fn parameter(var: VarId) -> Self {
        Self {
            var,
            source: InstanceSource::Parameter,
        }
    }

    pub fn capture(var: VarId) -> Self {
        Self {
            var,
            source: InstanceSource::Capture,
        }
    }

    pub fn is_for_self_parameter(&self) -> bool {
        self.source == InstanceSource::SelfParameter
    }

    pub fn is_for_capture(&self) -> bool {
        self.source == InstanceSource::Capture
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorIsolation {
    /// Nothing declared; lowered like `Nonisolated`.
    Unspecified,
    Nonisolated,
    NonisolatedUnsafe,
    ActorInstance(ActorInstance),
    /// Isolated to the shared instance of a global-actor type.
    GlobalActor(Type),
    /// Isolation comes from the caller through an `isolated` parameter.
    CallerIsolationInheriting,
    /// Only valid on function types, never on a declaration.
    Erased,
}

impl ActorIsolation {
    pub fn is_actor_instance_isolated(&self) -> bool {
        matches!(self, ActorIsolation::ActorInstance(_))
    }

    pub fn actor_instance(&self) -> Option<ActorInstance> {
        match self {
            ActorIsolation::ActorInstance(instance) => Some(*instance),
            _ => None,
        }
    }

    pub fn is_actor_instance_for_self_parameter(&self) -> bool {
        self.actor_instance().is_some_and(|i| i.is_for_self_parameter())
    }

    pub fn is_actor_instance_for_capture(&self) -> bool {
        self.actor_instance().is_some_and(|i| i.is_for_capture())
    }

    pub fn global_actor(&self) -> Option<&Type> {
        match self {
            ActorIsolation::GlobalActor(ty) => Some(ty),
            _ => None,
        }
    }

    /// `Unspecified`, `Nonisolated` or `NonisolatedUnsafe`.
    pub fn is_nonisolated_like(&self) -> bool {
        matches!(
            self,
            ActorIsolation::Unspecified
                | ActorIsolation::Nonisolated
                | ActorIsolation::NonisolatedUnsafe
        )
    }
}

impl fmt::Display for ActorIsolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorIsolation::Unspecified => write!(f, "unspecified"),
            ActorIsolation::Nonisolated => write!(f, "nonisolated"),
            ActorIsolation::NonisolatedUnsafe => write!(f, "nonisolated(unsafe)"),
            ActorIsolation::ActorInstance(instance) => match instance.source {
                InstanceSource::SelfParameter => write!(f, "actor-instance(self)"),
                InstanceSource::Parameter => write!(f, "actor-instance(param #{})", instance.var.0),
                InstanceSource::Capture => write!(f, "actor-instance(capture #{})", instance.var.0),
            },
            ActorIsolation::GlobalActor(_) => write!(f, "global-actor"),
            ActorIsolation::CallerIsolationInheriting => write!(f, "caller-isolation-inheriting"),
            ActorIsolation::Erased => write!(f, "erased"),
        }
    }
}

/// How a function value's isolation is recorded in its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionTypeIsolation {
    /// Supplied per call through an `isolated` argument.
    Parameter,
    NonIsolated,
    NonIsolatedCaller,
    GlobalActor(Type),
    /// `@isolated(any)`: an `(any Actor)?` travels with the function value.
    Erased,
}
