//! Command dispatch and alias invocation.
//!
//! `exec_command` marshals a slice of stack values into the typed
//! argument vector a command's format string describes: present
//! arguments are coerced in place, missing trailing arguments are
//! synthesized from the per-type defaults, repeat marks cycle excess
//! actuals through the preceding group, and `C`/`V` collapse or forward
//! the remainder.
//!
//! `exec_alias` establishes an argument frame: actuals are pushed into
//! the reserved `argN` aliases, the alias body is compiled on demand and
//! cached, and on the way out every binding the call introduced is
//! popped again, including arguments the body itself assigned.

use crate::exec::run_code;
use cubescript_core::bcode::RetType;
use cubescript_core::state::{CsState, Frame};
use cubescript_core::value::{float_to_str, int_to_str, CsInt, Value};
use cubescript_core::{CsResult, IDF_OVERRIDDEN, MAX_ARGUMENTS};
use cubescript_compiler::{force_code, force_cond};
use smallvec::SmallVec;
use std::rc::Rc;

/// Join values into one string, textualizing numbers and skipping
/// null/code/ident handles.
#[must_use]
pub fn conc(vals: &[Value], space: bool) -> String {
    let mut out = String::new();
    for (i, v) in vals.iter().enumerate() {
        if space && i > 0 {
            out.push(' ');
        }
        match v {
            Value::Int(n) => out.push_str(&int_to_str(*n)),
            Value::Float(f) => out.push_str(&float_to_str(*f)),
            Value::Str(s) => out.push_str(s),
            Value::Macro(m) => out.push_str(m.as_str()),
            _ => {}
        }
    }
    out
}

/// Invoke a command with the given actuals, applying its format-string
/// contract. `lookup` marks invocation from lookup position, where the
/// argument-count parameter reads as -1.
pub fn exec_command(
    cs: &mut CsState,
    id: usize,
    args: &mut [Value],
    lookup: bool,
    result: &mut Value,
) -> CsResult<()> {
    let fmt = cs.command_fmt(id).unwrap_or_else(|| Rc::from(""));
    let Some(cb) = cs.command_cb(id) else {
        return Ok(());
    };
    let numargs = args.len();
    let mut buf: SmallVec<[Value; 16]> = args.iter_mut().map(std::mem::take).collect();
    let fb = fmt.as_bytes();
    let mut count = 0usize;
    let mut fakeargs = 0usize;
    let mut rep = false;
    let mut fi = 0usize;
    while fi < fb.len() {
        let c = fb[fi];
        let missing = count >= buf.len();
        match c {
            b'i' | b'b' => {
                if missing {
                    if rep {
                        fi += 1;
                        continue;
                    }
                    buf.push(Value::Int(if c == b'b' { CsInt::MIN } else { 0 }));
                    fakeargs += 1;
                } else {
                    buf[count].force_int();
                }
                count += 1;
            }
            b'f' => {
                if missing {
                    if rep {
                        fi += 1;
                        continue;
                    }
                    buf.push(Value::Float(0.0));
                    fakeargs += 1;
                } else {
                    buf[count].force_float();
                }
                count += 1;
            }
            b'F' => {
                if missing {
                    if rep {
                        fi += 1;
                        continue;
                    }
                    let prev = if count > 0 { buf[count - 1].get_float() } else { 0.0 };
                    buf.push(Value::Float(prev));
                    fakeargs += 1;
                } else {
                    buf[count].force_float();
                }
                count += 1;
            }
            b'S' | b's' => {
                if missing {
                    if rep {
                        fi += 1;
                        continue;
                    }
                    buf.push(Value::from(""));
                    fakeargs += 1;
                } else {
                    buf[count].force_str();
                }
                count += 1;
            }
            b'T' | b't' => {
                if missing {
                    if rep {
                        fi += 1;
                        continue;
                    }
                    buf.push(Value::Null);
                    fakeargs += 1;
                }
                count += 1;
            }
            b'E' => {
                if missing {
                    if rep {
                        fi += 1;
                        continue;
                    }
                    buf.push(Value::Null);
                    fakeargs += 1;
                } else {
                    force_cond(cs, &mut buf[count]);
                }
                count += 1;
            }
            b'e' => {
                if missing {
                    if rep {
                        fi += 1;
                        continue;
                    }
                    buf.push(Value::Code(cs.empty_code(RetType::Null)));
                    fakeargs += 1;
                } else {
                    force_code(cs, &mut buf[count]);
                }
                count += 1;
            }
            b'r' => {
                if missing {
                    if rep {
                        fi += 1;
                        continue;
                    }
                    buf.push(Value::Ident(cs.dummy_idx()));
                    fakeargs += 1;
                } else {
                    cs.force_ident(&mut buf[count]);
                }
                count += 1;
            }
            b'$' => {
                if missing {
                    buf.push(Value::Ident(id));
                } else {
                    buf[count] = Value::Ident(id);
                }
                count += 1;
            }
            b'N' => {
                let n = if lookup {
                    -1
                } else {
                    (count - fakeargs) as CsInt
                };
                if missing {
                    buf.push(Value::Int(n));
                } else {
                    buf[count] = Value::Int(n);
                }
                count += 1;
            }
            b'C' => {
                let joined = conc(&buf, true);
                let mut one = [Value::from(joined)];
                return cb(cs, &mut one, result);
            }
            b'V' => {
                return cb(cs, &mut buf, result);
            }
            d @ b'1'..=b'4' => {
                if count < numargs {
                    fi -= (d - b'0') as usize;
                    rep = true;
                    continue;
                }
            }
            _ => {}
        }
        fi += 1;
    }
    buf.truncate(count);
    cb(cs, &mut buf, result)
}

/// Call an alias: push the actuals as `arg1..argN`, run the (cached)
/// compiled body under a fresh frame, then restore every binding.
pub fn exec_alias(
    cs: &mut CsState,
    id: usize,
    args: &mut [Value],
    result: &mut Value,
    ret: RetType,
) -> CsResult<()> {
    let callargs = args.len();
    for (i, a) in args.iter_mut().enumerate() {
        cs.push_arg(i, std::mem::take(a));
    }
    let oldargs = cs.set_numargs(callargs as CsInt);
    let oldflags = cs.identflags;
    cs.identflags |= cs.ident_flags(id) & IDF_OVERRIDDEN;
    let call_mask = if callargs == 0 {
        0
    } else {
        (1u32 << callargs) - 1
    };
    cs.callstack.push(Frame {
        id: Some(id),
        usedargs: call_mask,
    });
    let code = match cs.alias_code(id) {
        Some(c) => c,
        None => {
            let src = cs.alias_value(id).get_str();
            tracing::trace!(target: "cubescript::vm", alias = %cs.ident_name(id), "compiling alias body");
            let compiled = cubescript_compiler::compile(cs, &src);
            cs.set_alias_code(id, compiled.clone());
            compiled
        }
    };
    let res = run_code(cs, &code, result);
    let link = cs.callstack.pop().unwrap_or(Frame {
        id: None,
        usedargs: 0,
    });
    cs.identflags = oldflags;
    for i in 0..callargs {
        cs.pop_arg(i);
    }
    // arguments the body bound beyond the actuals
    let extra = link.usedargs & !call_mask;
    for i in callargs..MAX_ARGUMENTS {
        if extra & (1 << i) != 0 {
            cs.pop_arg(i);
        }
    }
    cs.set_numargs(oldargs);
    if res.is_ok() {
        result.force(ret);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conc_textualizes() {
        let vals = [
            Value::Int(1),
            Value::from("two"),
            Value::Float(3.0),
            Value::Null,
        ];
        assert_eq!(conc(&vals, true), "1 two 3.0 ");
        assert_eq!(conc(&vals, false), "1two3.0");
    }

    #[test]
    fn missing_args_are_synthesized() {
        let mut cs = CsState::new();
        cs.new_command("probe", "ibs", |_, args, res| {
            *res = Value::from(format!(
                "{}|{}|{}",
                args[0].get_int(),
                args[1].get_int(),
                args[2].get_str()
            ));
            Ok(())
        })
        .unwrap();
        let id = cs.get_ident("probe").unwrap();
        let mut res = Value::Null;
        exec_command(&mut cs, id, &mut [], false, &mut res).unwrap();
        assert_eq!(&*res.get_str(), format!("0|{}|", CsInt::MIN).as_str());
    }

    #[test]
    fn excess_args_are_discarded() {
        let mut cs = CsState::new();
        cs.new_command("one", "i", |_, args, res| {
            *res = Value::Int(args.len() as CsInt);
            Ok(())
        })
        .unwrap();
        let id = cs.get_ident("one").unwrap();
        let mut res = Value::Null;
        let mut args = [Value::Int(1), Value::Int(2), Value::Int(3)];
        exec_command(&mut cs, id, &mut args, false, &mut res).unwrap();
        assert_eq!(res.get_int(), 1);
    }

    #[test]
    fn repeat_group_cycles() {
        let mut cs = CsState::new();
        cs.new_command("sum", "i1V", |_, args, res| {
            *res = Value::Int(args.iter().map(Value::get_int).sum());
            Ok(())
        })
        .unwrap();
        let id = cs.get_ident("sum").unwrap();
        let mut res = Value::Null;
        let mut args = [Value::from("1"), Value::from("2"), Value::from("3")];
        exec_command(&mut cs, id, &mut args, false, &mut res).unwrap();
        assert_eq!(res.get_int(), 6);
    }

    #[test]
    fn count_parameter_reports_actuals() {
        let mut cs = CsState::new();
        cs.new_command("argc", "iiN", |_, args, res| {
            *res = args[2].clone();
            Ok(())
        })
        .unwrap();
        let id = cs.get_ident("argc").unwrap();
        let mut res = Value::Null;
        let mut args = [Value::Int(9)];
        exec_command(&mut cs, id, &mut args, false, &mut res).unwrap();
        // one actual, one synthesized: N counts only the actuals
        assert_eq!(res.get_int(), 1);
    }
}
