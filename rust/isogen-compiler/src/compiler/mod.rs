pub mod builder;
pub mod cleanup;
pub mod emit;
pub mod erasure;
pub mod executor;
pub mod function;
pub mod function_isolation;
pub mod global_actor;
pub mod hop;
pub mod ir;
pub mod managed;
pub mod prolog;
pub mod resolver;
