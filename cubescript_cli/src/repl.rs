//! Interactive read-eval-print loop.

use crate::pipeline::{display_value, report_error};
use cubescript_core::state::CsState;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::process::ExitCode;

/// Run the interactive session until EOF or `.quit`.
pub fn run_repl(cs: &mut CsState, quiet: bool) -> ExitCode {
    if !quiet {
        println!("{}", crate::args::version_string());
        println!("type .quit or press ctrl-d to exit");
    }
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(err) => {
            eprintln!("cubescript: cannot open terminal: {err}");
            return ExitCode::FAILURE;
        }
    };
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed == ".quit" {
                    break;
                }
                let _ = editor.add_history_entry(trimmed);
                match cubescript_vm::run(cs, &line) {
                    Ok(v) => {
                        if let Some(text) = display_value(&v) {
                            println!("{text}");
                        }
                    }
                    Err(err) => report_error(&err),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("cubescript: {err}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
