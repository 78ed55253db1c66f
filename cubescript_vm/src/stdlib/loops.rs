//! Loop combinators. All of them run their bodies through
//! [`run_loop_body`], which is where `break`/`continue` are absorbed.

use crate::run::{run_code_bool, run_loop_body, run_loop_body_ret, LoopState};
use cubescript_core::bcode::CodeRef;
use cubescript_core::state::CsState;
use cubescript_core::value::{CsInt, Value};
use cubescript_core::{CsResult, IdentClass};

/// Bind the iteration variable: the first iteration shadows the alias,
/// later ones rebind in place.
fn set_iter(cs: &mut CsState, id: usize, v: Value, pushed: &mut bool) {
    if *pushed {
        cs.rebind_alias(id, v);
    } else {
        cs.push_arg(id, v);
        *pushed = true;
    }
}

fn do_loop(
    cs: &mut CsState,
    id: usize,
    offset: CsInt,
    n: CsInt,
    step: CsInt,
    cond: Option<&CodeRef>,
    body: &CodeRef,
) -> CsResult<()> {
    if n <= 0 || cs.ident_class(id) != IdentClass::Alias {
        return Ok(());
    }
    let mut pushed = false;
    let mut err = None;
    for i in 0..n {
        set_iter(cs, id, Value::Int(offset + i * step), &mut pushed);
        if let Some(c) = cond {
            match run_code_bool(cs, c) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
        }
        match run_loop_body(cs, body) {
            Ok(LoopState::Normal) => {}
            Ok(LoopState::Break) => break,
            Err(e) => {
                err = Some(e);
                break;
            }
        }
    }
    if pushed {
        cs.pop_arg(id);
    }
    err.map_or(Ok(()), Err)
}

fn loop_conc(
    cs: &mut CsState,
    id: usize,
    offset: CsInt,
    n: CsInt,
    step: CsInt,
    body: &CodeRef,
    space: bool,
) -> CsResult<Value> {
    if n <= 0 || cs.ident_class(id) != IdentClass::Alias {
        return Ok(Value::Null);
    }
    let mut pushed = false;
    let mut err = None;
    let mut out = String::new();
    for i in 0..n {
        set_iter(cs, id, Value::Int(offset + i * step), &mut pushed);
        match run_loop_body_ret(cs, body) {
            Ok((LoopState::Normal, v)) => {
                if space && i > 0 {
                    out.push(' ');
                }
                out.push_str(&v.get_str());
            }
            Ok((LoopState::Break, _)) => break,
            Err(e) => {
                err = Some(e);
                break;
            }
        }
    }
    if pushed {
        cs.pop_arg(id);
    }
    err.map_or(Ok(Value::from(out)), Err)
}

struct LoopArgs {
    id: usize,
    offset: CsInt,
    step: CsInt,
    n: CsInt,
    rest: usize,
}

/// Decode the shared `r [i [i]] i` prefix of the loop commands.
fn loop_args(args: &[Value], has_offset: bool, has_step: bool) -> Option<LoopArgs> {
    let id = args[0].get_ident()?;
    let mut at = 1;
    let offset = if has_offset {
        at += 1;
        args[at - 1].get_int()
    } else {
        0
    };
    let step = if has_step {
        at += 1;
        args[at - 1].get_int()
    } else {
        1
    };
    let n = args[at].get_int();
    Some(LoopArgs {
        id,
        offset,
        step,
        n,
        rest: at + 1,
    })
}

pub fn init(cs: &mut CsState) -> CsResult<()> {
    macro_rules! plain_loop {
        ($name:expr, $fmt:expr, $offset:expr, $step:expr) => {
            cs.new_command($name, $fmt, |cs, args, _| {
                let Some(la) = loop_args(args, $offset, $step) else {
                    return Ok(());
                };
                let Some(body) = args[la.rest].get_code() else {
                    return Ok(());
                };
                do_loop(cs, la.id, la.offset, la.n, la.step, None, &body)
            })?;
        };
    }
    plain_loop!("loop", "rie", false, false);
    plain_loop!("loop+", "riie", true, false);
    plain_loop!("loop*", "riie", false, true);
    plain_loop!("loop+*", "riiie", true, true);

    macro_rules! while_loop {
        ($name:expr, $fmt:expr, $offset:expr, $step:expr) => {
            cs.new_command($name, $fmt, |cs, args, _| {
                let Some(la) = loop_args(args, $offset, $step) else {
                    return Ok(());
                };
                let (Some(cond), Some(body)) =
                    (args[la.rest].get_code(), args[la.rest + 1].get_code())
                else {
                    return Ok(());
                };
                do_loop(cs, la.id, la.offset, la.n, la.step, Some(&cond), &body)
            })?;
        };
    }
    while_loop!("loopwhile", "riee", false, false);
    while_loop!("loopwhile+", "riiee", true, false);
    while_loop!("loopwhile*", "riiee", false, true);
    while_loop!("loopwhile+*", "riiiee", true, true);

    cs.new_command("while", "ee", |cs, args, _| {
        let (Some(cond), Some(body)) = (args[0].get_code(), args[1].get_code()) else {
            return Ok(());
        };
        while run_code_bool(cs, &cond)? {
            if run_loop_body(cs, &body)? == LoopState::Break {
                break;
            }
        }
        Ok(())
    })?;

    macro_rules! conc_loop {
        ($name:expr, $fmt:expr, $offset:expr, $step:expr, $space:expr) => {
            cs.new_command($name, $fmt, |cs, args, res| {
                let Some(la) = loop_args(args, $offset, $step) else {
                    return Ok(());
                };
                let Some(body) = args[la.rest].get_code() else {
                    return Ok(());
                };
                *res = loop_conc(cs, la.id, la.offset, la.n, la.step, &body, $space)?;
                Ok(())
            })?;
        };
    }
    conc_loop!("loopconcat", "rie", false, false, true);
    conc_loop!("loopconcat+", "riie", true, false, true);
    conc_loop!("loopconcat*", "riie", false, true, true);
    conc_loop!("loopconcat+*", "riiie", true, true, true);
    conc_loop!("loopconcatword", "rie", false, false, false);
    conc_loop!("loopconcatword+", "riie", true, false, false);
    conc_loop!("loopconcatword*", "riie", false, true, false);
    conc_loop!("loopconcatword+*", "riiie", true, true, false);

    Ok(())
}
