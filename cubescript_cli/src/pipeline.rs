//! Non-interactive execution: files and `-e` expressions.

use cubescript_core::state::CsState;
use cubescript_core::value::Value;
use std::process::ExitCode;

/// Render a value the way the REPL would echo it.
pub fn display_value(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        other => Some(other.get_str().to_string()),
    }
}

/// Run a script file.
pub fn run_script(cs: &mut CsState, path: &str) -> ExitCode {
    match cubescript_vm::run_file(cs, path) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            eprintln!("cubescript: could not read \"{path}\"");
            ExitCode::from(2)
        }
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

/// Run an expression and print its result.
pub fn run_expression(cs: &mut CsState, expr: &str) -> ExitCode {
    match cubescript_vm::run(cs, expr) {
        Ok(v) => {
            if let Some(text) = display_value(&v) {
                println!("{text}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

/// Print an error with its alias stack, if any.
pub fn report_error(err: &cubescript_core::CsError) {
    eprintln!("cubescript: {err}");
    if let Some(stack) = err.stack() {
        let rendered = stack.to_string();
        if !rendered.is_empty() {
            eprintln!("{rendered}");
        }
    }
}
