//! Lowered function serialization to JSON.

use crate::compiler::ir::IrFunction;

/// Emit a lowered function as pretty-printed JSON.
pub fn emit_json(function: &IrFunction) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(function)
}

/// Emit a lowered function as compact JSON (for hashing and golden tests).
pub fn emit_canonical_json(function: &IrFunction) -> Result<String, serde_json::Error> {
    serde_json::to_string(function)
}

/// Emit several lowered functions as one JSON array.
pub fn emit_module_json(functions: &[IrFunction]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(functions)
}
