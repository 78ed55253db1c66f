//! Host-facing evaluation: compile-and-run a string, run a precompiled
//! block, run an identifier with arguments, with typed convenience
//! variants. Errors surface as `CsError`; the failed call's result
//! reads as null.

use crate::dispatch::{exec_alias, exec_command};
use crate::exec::run_code;
use cubescript_core::bcode::{CodeRef, RetType};
use cubescript_core::state::CsState;
use cubescript_core::value::{CsFloat, CsInt, Value};
use cubescript_core::{CsError, CsResult, IdentClass, MAX_ARGUMENTS};
use std::path::Path;
use std::rc::Rc;

/// Run a precompiled block and return its result.
pub fn run_code_ret(cs: &mut CsState, code: &CodeRef) -> CsResult<Value> {
    let mut v = Value::Null;
    run_code(cs, code, &mut v)?;
    Ok(v)
}

/// Run a precompiled block for its boolean result.
pub fn run_code_bool(cs: &mut CsState, code: &CodeRef) -> CsResult<bool> {
    Ok(run_code_ret(cs, code)?.get_bool())
}

/// Run a precompiled block for its integer result.
pub fn run_code_int(cs: &mut CsState, code: &CodeRef) -> CsResult<CsInt> {
    Ok(run_code_ret(cs, code)?.get_int())
}

/// Compile and run a source string.
pub fn run(cs: &mut CsState, src: &str) -> CsResult<Value> {
    let code = cubescript_compiler::compile(cs, src);
    run_code_ret(cs, &code)
}

/// Compile and run, coercing the result to an integer.
pub fn run_int(cs: &mut CsState, src: &str) -> CsResult<CsInt> {
    let code = cubescript_compiler::compile_ret(cs, src, RetType::Int);
    Ok(run_code_ret(cs, &code)?.get_int())
}

/// Compile and run, coercing the result to a float.
pub fn run_float(cs: &mut CsState, src: &str) -> CsResult<CsFloat> {
    let code = cubescript_compiler::compile_ret(cs, src, RetType::Float);
    Ok(run_code_ret(cs, &code)?.get_float())
}

/// Compile and run, reading the result as a boolean.
pub fn run_bool(cs: &mut CsState, src: &str) -> CsResult<bool> {
    Ok(run(cs, src)?.get_bool())
}

/// Compile and run, coercing the result to a string.
pub fn run_str(cs: &mut CsState, src: &str) -> CsResult<Rc<str>> {
    let code = cubescript_compiler::compile_ret(cs, src, RetType::Str);
    Ok(run_code_ret(cs, &code)?.get_str())
}

/// Invoke an identifier with an argument array, the way a late-bound
/// call would: commands dispatch through their format string, variables
/// print or assign, aliases run under an argument frame.
pub fn run_ident(cs: &mut CsState, id: usize, args: &mut [Value]) -> CsResult<Value> {
    let mut ret = Value::Null;
    match cs.ident_class(id) {
        IdentClass::Command => {
            exec_command(cs, id, args, false, &mut ret)?;
        }
        IdentClass::Ivar => {
            if args.is_empty() {
                cs.print_var(id)?;
            } else {
                cs.set_var_int_checked_multi(id, args);
            }
        }
        IdentClass::Fvar => {
            if args.is_empty() {
                cs.print_var(id)?;
            } else {
                let v = args[0].force_float();
                cs.set_var_float_checked(id, v);
            }
        }
        IdentClass::Svar => {
            if args.is_empty() {
                cs.print_var(id)?;
            } else {
                let v = args[0].force_str();
                cs.set_var_str_checked(id, &v);
            }
        }
        IdentClass::Alias => {
            if id < MAX_ARGUMENTS && !cs.is_arg_used(id) {
                return Ok(ret);
            }
            if cs.alias_value(id).is_null() {
                return Ok(ret);
            }
            exec_alias(cs, id, args, &mut ret, RetType::Null)?;
        }
    }
    Ok(ret)
}

/// Read and run a script file, recording it as the diagnostic source so
/// errors carry `file:line:` positions. `Ok(false)` means the file
/// could not be read.
pub fn run_file(cs: &mut CsState, path: impl AsRef<Path>) -> CsResult<bool> {
    let path = path.as_ref();
    let Ok(text) = std::fs::read_to_string(path) else {
        return Ok(false);
    };
    let name: Rc<str> = Rc::from(path.to_string_lossy().as_ref());
    let src: Rc<str> = Rc::from(text.as_str());
    tracing::debug!(target: "cubescript::vm", file = %name, bytes = src.len(), "running file");
    let old = cs.set_source(Some(name), Some(src.clone()));
    let code = cubescript_compiler::compile_rc(cs, src, RetType::Int);
    let mut v = Value::Null;
    let r = run_code(cs, &code, &mut v);
    cs.set_source(old.0, old.1);
    r.map(|_| true)
}

/// What a loop body's execution asked of the surrounding loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Proceed to the next iteration.
    Normal,
    /// Terminate the loop.
    Break,
}

/// Run one loop-body iteration, catching the `break`/`continue`
/// sentinels that only loop combinators may absorb.
pub fn run_loop_body(cs: &mut CsState, body: &CodeRef) -> CsResult<LoopState> {
    Ok(run_loop_body_ret(cs, body)?.0)
}

/// Like [`run_loop_body`], also yielding the iteration's result (null
/// when the body broke or continued).
pub fn run_loop_body_ret(cs: &mut CsState, body: &CodeRef) -> CsResult<(LoopState, Value)> {
    cs.loop_level += 1;
    let mut v = Value::Null;
    let r = run_code(cs, body, &mut v);
    cs.loop_level -= 1;
    match r {
        Ok(()) => Ok((LoopState::Normal, v)),
        Err(CsError::Break) => Ok((LoopState::Break, Value::Null)),
        Err(CsError::Continue) => Ok((LoopState::Normal, Value::Null)),
        Err(e) => Err(e),
    }
}
