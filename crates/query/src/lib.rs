//! livesql Query - SQL compiler for the livesql PostgreSQL backend.
//!
//! This crate turns statements into SQL text with positional parameters:
//!
//! - `compiler`: `QueryCompiler`, the entry point for every statement kind
//! - `diff`: the single-statement snapshot diff
//! - `ddl`: own schema, snapshot table, notify function and triggers
//! - `ident`: identifier and literal quoting
//!
//! Nothing here performs I/O.

mod builder;
pub mod compiler;
pub mod ddl;
pub mod diff;
pub mod ident;

pub use compiler::{CompiledStatement, QueryCompiler, ResultShape};
