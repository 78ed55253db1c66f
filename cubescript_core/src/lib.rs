//! Core runtime state for the cubescript language: the tagged value
//! model, the refcounted bytecode block representation, the identifier
//! table with its typed-variable and alias machinery, and the
//! per-thread interpreter state.
//!
//! The compiler (`cubescript_compiler`) consumes this crate to resolve
//! and create identifiers while emitting code; the executor
//! (`cubescript_vm`) consumes it to run that code. Hosts embed the
//! language by constructing a [`CsState`], registering variables and
//! commands on it, and handing it to the executor crate's `run`
//! functions.

#![allow(clippy::new_without_default)]

pub mod bcode;
pub mod error;
pub mod ident;
pub mod list;
pub mod state;
pub mod strpool;
pub mod strutil;
pub mod value;

pub use bcode::{CodeBlock, CodeRef, MacroStr, Op, RetType};
pub use error::{CsError, CsResult, StackNode, StackTrace};
pub use ident::{
    AliasData, Builtin, CommandCb, CommandData, Ident, IdentClass, IdentKind, VarCb, IDF_ARG,
    IDF_HEX, IDF_OVERRIDDEN, IDF_OVERRIDE, IDF_PERSIST, IDF_READONLY, IDF_UNKNOWN,
    MAX_ARGUMENTS, MAX_COM_ARGS, MAX_RESULTS,
};
pub use state::{CsState, ErrorSink, Frame, HookFn, SharedState, DEFAULT_MAX_CALL_DEPTH};
pub use strpool::StringPool;
pub use value::{
    float_to_str, int_to_str, is_numeric_name, parse_float, parse_int, str_to_bool, CsFloat,
    CsInt, Value,
};
