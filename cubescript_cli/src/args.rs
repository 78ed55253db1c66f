//! Command-line argument handling.

/// What the invocation asked for.
#[derive(Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Interactive session.
    Repl,
    /// Run a script file.
    Script(String),
    /// Run the expression given with `-e`.
    Command(String),
    /// Print the version banner.
    PrintVersion,
    /// Print usage.
    PrintHelp,
}

/// Parsed invocation.
#[derive(Debug)]
pub struct ParsedArgs {
    pub mode: ExecutionMode,
    /// Drop into the REPL after running a script or expression.
    pub interactive: bool,
    /// Suppress the REPL banner.
    pub quiet: bool,
}

/// Parse raw arguments (without the program name).
pub fn parse_args(raw: &[String]) -> Result<ParsedArgs, String> {
    let mut mode = None;
    let mut interactive = false;
    let mut quiet = false;
    let mut it = raw.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(ParsedArgs {
                mode: ExecutionMode::PrintHelp,
                interactive,
                quiet,
            }),
            "-v" | "--version" => return Ok(ParsedArgs {
                mode: ExecutionMode::PrintVersion,
                interactive,
                quiet,
            }),
            "-i" => interactive = true,
            "-q" => quiet = true,
            "-e" => {
                let expr = it
                    .next()
                    .ok_or_else(|| "-e requires an expression".to_string())?;
                if mode.is_some() {
                    return Err("multiple inputs given".into());
                }
                mode = Some(ExecutionMode::Command(expr.clone()));
            }
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(format!("unknown option: {flag}"));
            }
            path => {
                if mode.is_some() {
                    return Err("multiple inputs given".into());
                }
                mode = Some(ExecutionMode::Script(path.to_string()));
            }
        }
    }
    Ok(ParsedArgs {
        mode: mode.unwrap_or(ExecutionMode::Repl),
        interactive,
        quiet,
    })
}

/// Version banner.
pub fn version_string() -> String {
    format!("cubescript {}", env!("CARGO_PKG_VERSION"))
}

/// Usage text.
pub fn help_text() -> &'static str {
    "usage: cubescript [options] [script]\n\
     \n\
     options:\n\
       -e EXPR     run EXPR and print its result\n\
       -i          enter the REPL after running the input\n\
       -q          suppress the REPL banner\n\
       -v          print version\n\
       -h          print this help"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<ParsedArgs, String> {
        let raw: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        parse_args(&raw)
    }

    #[test]
    fn no_args_is_repl() {
        assert_eq!(parse(&[]).unwrap().mode, ExecutionMode::Repl);
    }

    #[test]
    fn script_path() {
        let p = parse(&["boot.cfg"]).unwrap();
        assert_eq!(p.mode, ExecutionMode::Script("boot.cfg".into()));
    }

    #[test]
    fn expression_flag() {
        let p = parse(&["-e", "+ 1 2"]).unwrap();
        assert_eq!(p.mode, ExecutionMode::Command("+ 1 2".into()));
        assert!(parse(&["-e"]).is_err());
    }

    #[test]
    fn interactive_with_script() {
        let p = parse(&["-i", "boot.cfg"]).unwrap();
        assert!(p.interactive);
        assert_eq!(p.mode, ExecutionMode::Script("boot.cfg".into()));
    }

    #[test]
    fn rejects_unknown_flags_and_double_input() {
        assert!(parse(&["-z"]).is_err());
        assert!(parse(&["a.cfg", "b.cfg"]).is_err());
    }
}
