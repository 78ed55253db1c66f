//! Bytecode executor and standard library for cubescript.
//!
//! The decode-and-dispatch loop lives in [`exec`]; [`dispatch`] holds
//! the format-string marshaling and alias invocation it leans on; the
//! [`run`] module is the host-facing surface; [`stdlib`] registers the
//! command libraries through the same registration interface any
//! embedder uses.
//!
//! ```no_run
//! use cubescript_core::CsState;
//!
//! let mut cs = CsState::new();
//! cubescript_vm::init_libs(&mut cs, cubescript_vm::LIB_ALL).unwrap();
//! let n = cubescript_vm::run_int(&mut cs, "+ 1 2 3").unwrap();
//! assert_eq!(n, 6);
//! ```

#![allow(clippy::new_without_default)]

pub mod dispatch;
pub mod exec;
pub mod run;
pub mod stdlib;

pub use dispatch::{conc, exec_alias, exec_command};
pub use exec::run_code;
pub use run::{
    run, run_bool, run_code_bool, run_code_int, run_code_ret, run_file, run_float, run_ident,
    run_int, run_loop_body, run_loop_body_ret, run_str, LoopState,
};
pub use stdlib::{init_libs, LIB_ALL, LIB_BASE, LIB_IO, LIB_LIST, LIB_MATH, LIB_STRING};
