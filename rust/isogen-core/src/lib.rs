//! Isogen Core
//!
//! The type-checked program consumed by the isolation lowering pass:
//! formal types, declarations, isolation descriptors, and availability.

pub mod availability;
pub mod decl;
pub mod isolation;
pub mod span;
pub mod types;
