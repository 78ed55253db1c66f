//! Command-line driver for the cubescript interpreter.

mod args;
mod pipeline;
mod repl;

use args::ExecutionMode;
use cubescript_core::state::CsState;
use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let parsed = match args::parse_args(&raw) {
        Ok(p) => p,
        Err(err) => {
            eprintln!("cubescript: {err}");
            eprintln!("{}", args::help_text());
            return ExitCode::from(2);
        }
    };

    match &parsed.mode {
        ExecutionMode::PrintVersion => {
            println!("{}", args::version_string());
            return ExitCode::SUCCESS;
        }
        ExecutionMode::PrintHelp => {
            println!("{}", args::help_text());
            return ExitCode::SUCCESS;
        }
        _ => {}
    }

    let mut cs = CsState::new();
    if let Err(err) = cubescript_vm::init_libs(&mut cs, cubescript_vm::LIB_ALL) {
        eprintln!("cubescript: failed to register libraries: {err}");
        return ExitCode::FAILURE;
    }

    let code = match &parsed.mode {
        ExecutionMode::Script(path) => pipeline::run_script(&mut cs, path),
        ExecutionMode::Command(expr) => pipeline::run_expression(&mut cs, expr),
        ExecutionMode::Repl => return repl::run_repl(&mut cs, parsed.quiet),
        _ => unreachable!("handled above"),
    };
    if parsed.interactive {
        return repl::run_repl(&mut cs, parsed.quiet);
    }
    code
}
