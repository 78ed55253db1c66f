//! Control and introspection commands.
//!
//! The control forms (`do`, `if`, `&&` and the rest) are ordinary commands whose
//! "syntax" comes from their format strings handing them unevaluated
//! code blocks; the compiler additionally special-cases the tagged ones
//! into jumps where the operands are literal blocks, so these callbacks
//! only run for late-bound or non-literal calls.

use crate::exec::run_code;
use crate::run::run_code_bool;
use cubescript_core::state::CsState;
use cubescript_core::value::Value;
use cubescript_core::{Builtin, CsError, CsResult, IdentClass, MAX_ARGUMENTS};
use std::rc::Rc;

pub fn init(cs: &mut CsState) -> CsResult<()> {
    cs.new_command_special(
        "do",
        "e",
        Builtin::Do,
        Some(Rc::new(|cs, args, res| {
            if let Some(body) = args[0].get_code() {
                run_code(cs, &body, res)?;
            }
            Ok(())
        })),
    )?;

    cs.new_command_special(
        "doargs",
        "e",
        Builtin::DoArgs,
        Some(Rc::new(|cs, args, res| {
            if let Some(body) = args[0].get_code() {
                if cs.has_alias_frame() {
                    cs.with_caller_args(|cs| run_code(cs, &body, res))?;
                } else {
                    run_code(cs, &body, res)?;
                }
            }
            Ok(())
        })),
    )?;

    cs.new_command_special(
        "if",
        "tee",
        Builtin::If,
        Some(Rc::new(|cs, args, res| {
            let branch = if args[0].get_bool() { 1 } else { 2 };
            if let Some(body) = args[branch].get_code() {
                run_code(cs, &body, res)?;
            }
            Ok(())
        })),
    )?;

    cs.new_command_special(
        "result",
        "T",
        Builtin::Result,
        Some(Rc::new(|_, args, res| {
            *res = std::mem::take(&mut args[0]);
            Ok(())
        })),
    )?;

    cs.new_command_special(
        "!",
        "t",
        Builtin::Not,
        Some(Rc::new(|_, args, res| {
            *res = Value::from(!args[0].get_bool());
            Ok(())
        })),
    )?;

    cs.new_command_special(
        "&&",
        "E1V",
        Builtin::And,
        Some(Rc::new(|cs, args, res| {
            if args.is_empty() {
                *res = Value::Int(1);
                return Ok(());
            }
            for a in args.iter_mut() {
                match a.get_code() {
                    Some(body) => run_code(cs, &body, res)?,
                    None => *res = std::mem::take(a),
                }
                if !res.get_bool() {
                    break;
                }
            }
            Ok(())
        })),
    )?;

    cs.new_command_special(
        "||",
        "E1V",
        Builtin::Or,
        Some(Rc::new(|cs, args, res| {
            if args.is_empty() {
                *res = Value::Int(0);
                return Ok(());
            }
            for a in args.iter_mut() {
                match a.get_code() {
                    Some(body) => run_code(cs, &body, res)?,
                    None => *res = std::mem::take(a),
                }
                if res.get_bool() {
                    break;
                }
            }
            Ok(())
        })),
    )?;

    cs.new_command_special("local", "", Builtin::Local, None)?;

    cs.new_command_special(
        "break",
        "",
        Builtin::Break,
        Some(Rc::new(|cs, _, _| {
            if cs.loop_level > 0 {
                Err(CsError::Break)
            } else {
                Err(cs.error("no loop to break"))
            }
        })),
    )?;

    cs.new_command_special(
        "continue",
        "",
        Builtin::Continue,
        Some(Rc::new(|cs, _, _| {
            if cs.loop_level > 0 {
                Err(CsError::Continue)
            } else {
                Err(cs.error("no loop to continue"))
            }
        })),
    )?;

    cs.new_command("?", "tTT", |_, args, res| {
        let pick = if args[0].get_bool() { 1 } else { 2 };
        *res = std::mem::take(&mut args[pick]);
        Ok(())
    })?;

    cs.new_command("cond", "ee2V", |cs, args, res| {
        let mut i = 0;
        while i < args.len() {
            if i + 1 < args.len() {
                if let Some(test) = args[i].get_code() {
                    if run_code_bool(cs, &test)? {
                        if let Some(body) = args[i + 1].get_code() {
                            run_code(cs, &body, res)?;
                        }
                        break;
                    }
                }
            } else {
                if let Some(body) = args[i].get_code() {
                    run_code(cs, &body, res)?;
                }
                break;
            }
            i += 2;
        }
        Ok(())
    })?;

    cs.new_command("case", "ite2V", |cs, args, res| {
        let val = args[0].get_int();
        let mut i = 1;
        while i + 1 < args.len() {
            if args[i].is_null() || args[i].get_int() == val {
                if let Some(body) = args[i + 1].get_code() {
                    run_code(cs, &body, res)?;
                }
                break;
            }
            i += 2;
        }
        Ok(())
    })?;

    cs.new_command("casef", "fte2V", |cs, args, res| {
        let val = args[0].get_float();
        let mut i = 1;
        while i + 1 < args.len() {
            if args[i].is_null() || args[i].get_float() == val {
                if let Some(body) = args[i + 1].get_code() {
                    run_code(cs, &body, res)?;
                }
                break;
            }
            i += 2;
        }
        Ok(())
    })?;

    cs.new_command("cases", "ste2V", |cs, args, res| {
        let val = args[0].get_str();
        let mut i = 1;
        while i + 1 < args.len() {
            if args[i].is_null() || args[i].get_str() == val {
                if let Some(body) = args[i + 1].get_code() {
                    run_code(cs, &body, res)?;
                }
                break;
            }
            i += 2;
        }
        Ok(())
    })?;

    cs.new_command("push", "rTe", |cs, args, res| {
        let Some(id) = args[0].get_ident() else {
            return Ok(());
        };
        if cs.ident_class(id) != IdentClass::Alias || id < MAX_ARGUMENTS {
            return Ok(());
        }
        cs.push_arg(id, std::mem::take(&mut args[1]));
        let r = match args[2].get_code() {
            Some(body) => run_code(cs, &body, res),
            None => Ok(()),
        };
        cs.pop_arg(id);
        r
    })?;

    cs.new_command("pushif", "rTe", |cs, args, res| {
        let Some(id) = args[0].get_ident() else {
            return Ok(());
        };
        if cs.ident_class(id) != IdentClass::Alias || id < MAX_ARGUMENTS {
            return Ok(());
        }
        if !args[1].get_bool() {
            return Ok(());
        }
        cs.push_arg(id, std::mem::take(&mut args[1]));
        let r = match args[2].get_code() {
            Some(body) => run_code(cs, &body, res),
            None => Ok(()),
        };
        cs.pop_arg(id);
        r
    })?;

    cs.new_command("nodebug", "e", |cs, args, res| {
        cs.nodebug += 1;
        let r = match args[0].get_code() {
            Some(body) => run_code(cs, &body, res),
            None => Ok(()),
        };
        cs.nodebug -= 1;
        r
    })?;

    cs.new_command("alias", "sT", |cs, args, _| {
        let name = args[0].get_str();
        cs.set_alias(&name, std::mem::take(&mut args[1]));
        Ok(())
    })?;

    cs.new_command("resetvar", "s", |cs, args, res| {
        let ok = cs.reset_var(&args[0].get_str());
        *res = Value::from(ok);
        Ok(())
    })?;

    cs.new_command("getvarmin", "s", |cs, args, res| {
        *res = Value::Int(cs.get_var_min_int(&args[0].get_str()).unwrap_or(0));
        Ok(())
    })?;
    cs.new_command("getvarmax", "s", |cs, args, res| {
        *res = Value::Int(cs.get_var_max_int(&args[0].get_str()).unwrap_or(0));
        Ok(())
    })?;
    cs.new_command("getfvarmin", "s", |cs, args, res| {
        *res = Value::Float(cs.get_var_min_float(&args[0].get_str()).unwrap_or(0.0));
        Ok(())
    })?;
    cs.new_command("getfvarmax", "s", |cs, args, res| {
        *res = Value::Float(cs.get_var_max_float(&args[0].get_str()).unwrap_or(0.0));
        Ok(())
    })?;

    cs.new_command("identexists", "s", |cs, args, res| {
        *res = Value::from(cs.have_ident(&args[0].get_str()));
        Ok(())
    })?;

    cs.new_command("getalias", "s", |cs, args, res| {
        let v = cs.get_alias_val(&args[0].get_str()).unwrap_or_else(|| Rc::from(""));
        *res = Value::Str(v);
        Ok(())
    })?;

    Ok(())
}
