//! List commands, built on the textual list parser. Lists stay strings
//! end to end; iteration commands bind elements to alias variables and
//! run caller-supplied bodies.

use crate::run::{run_code_bool, run_loop_body, run_loop_body_ret, LoopState};
use cubescript_core::bcode::CodeRef;
use cubescript_core::list::{list_length, ListParser};
use cubescript_core::state::CsState;
use cubescript_core::strutil::unescape_string;
use cubescript_core::value::{parse_float, parse_int, CsInt, Value};
use cubescript_core::{CsError, CsResult, IdentClass};
use std::rc::Rc;

fn is_alias(cs: &CsState, id: usize) -> bool {
    cs.ident_class(id) == IdentClass::Alias
}

/// Bind a loop variable, shadowing on the first iteration.
fn set_iter(cs: &mut CsState, id: usize, v: Value, pushed: &mut bool) {
    if *pushed {
        cs.rebind_alias(id, v);
    } else {
        cs.push_arg(id, v);
        *pushed = true;
    }
}

/// Index of the first element equal to `needle`, or -1.
fn list_includes(list: &str, needle: &str) -> CsInt {
    let mut p = ListParser::new(list);
    let mut offset = 0;
    while p.parse() {
        if p.item() == needle {
            return offset;
        }
        offset += 1;
    }
    -1
}

fn loop_list_conc(
    cs: &mut CsState,
    id: usize,
    list: &str,
    body: &CodeRef,
    space: bool,
) -> CsResult<Value> {
    if !is_alias(cs, id) {
        return Ok(Value::Null);
    }
    let mut pushed = false;
    let mut err = None;
    let mut out = String::new();
    let mut n = 0usize;
    let mut p = ListParser::new(list);
    while p.parse() {
        set_iter(cs, id, Value::from(p.element()), &mut pushed);
        match run_loop_body_ret(cs, body) {
            Ok((LoopState::Normal, v)) => {
                if space && n > 0 {
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
        n += 1;
    }
    if pushed {
        cs.pop_arg(id);
    }
    err.map_or(Ok(Value::from(out)), Err)
}

pub fn init(cs: &mut CsState) -> CsResult<()> {
    cs.new_command("listlen", "s", |_, args, res| {
        *res = Value::Int(list_length(&args[0].get_str()) as CsInt);
        Ok(())
    })?;

    cs.new_command("at", "si1V", |_, args, res| {
        if args.is_empty() {
            return Ok(());
        }
        let s = args[0].get_str();
        // each index is applied to the top-level list; the last one wins
        let mut out = s.to_string();
        for idx in &args[1..] {
            let mut pos = idx.get_int();
            let mut p = ListParser::new(&s);
            let mut found = None;
            while pos >= 0 {
                if !p.parse() {
                    break;
                }
                if pos == 0 {
                    found = Some(p.element());
                    break;
                }
                pos -= 1;
            }
            out = found.unwrap_or_default();
        }
        *res = Value::from(out);
        Ok(())
    })?;

    cs.new_command("sublist", "siiN", |_, args, res| {
        let s = args[0].get_str();
        let offset = args[1].get_int().max(0);
        let explicit_count = args[3].get_int() >= 3;
        let count = args[2].get_int().max(0);
        let mut p = ListParser::new(&s);
        for _ in 0..offset {
            if !p.parse() {
                break;
            }
        }
        if !explicit_count {
            if offset > 0 {
                p.skip();
            }
            *res = Value::from(p.remainder().to_string());
            return Ok(());
        }
        let list_start = s.len() - p.remainder().len();
        let mut qend = list_start;
        let mut remaining = count;
        while remaining > 0 && p.parse() {
            qend = p.quote_end();
            remaining -= 1;
        }
        *res = Value::from(s[list_start..qend].to_string());
        Ok(())
    })?;

    cs.new_command("listfind", "rse", |cs, args, res| {
        let Some(id) = args[0].get_ident() else {
            return Ok(());
        };
        if !is_alias(cs, id) {
            *res = Value::Int(-1);
            return Ok(());
        }
        let list = args[1].get_str();
        let Some(body) = args[2].get_code() else {
            return Ok(());
        };
        let mut pushed = false;
        let mut err = None;
        let mut found = -1;
        let mut n: CsInt = -1;
        let mut p = ListParser::new(&list);
        while p.parse() {
            n += 1;
            set_iter(cs, id, Value::from(p.item()), &mut pushed);
            match run_code_bool(cs, &body) {
                Ok(true) => {
                    found = n;
                    break;
                }
                Ok(false) => {}
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
        }
        if pushed {
            cs.pop_arg(id);
        }
        *res = Value::Int(found);
        err.map_or(Ok(()), Err)
    })?;

    cs.new_command("listassoc", "rse", |cs, args, res| {
        let Some(id) = args[0].get_ident() else {
            return Ok(());
        };
        if !is_alias(cs, id) {
            return Ok(());
        }
        let list = args[1].get_str();
        let Some(body) = args[2].get_code() else {
            return Ok(());
        };
        let mut pushed = false;
        let mut err = None;
        let mut p = ListParser::new(&list);
        while p.parse() {
            set_iter(cs, id, Value::from(p.item()), &mut pushed);
            match run_code_bool(cs, &body) {
                Ok(true) => {
                    if p.parse() {
                        *res = Value::from(p.element());
                    }
                    break;
                }
                Ok(false) => {}
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
            if !p.parse() {
                break;
            }
        }
        if pushed {
            cs.pop_arg(id);
        }
        err.map_or(Ok(()), Err)
    })?;

    macro_rules! list_find_typed {
        ($name:expr, $fmt:expr, $get:expr, $cmp:expr) => {
            cs.new_command($name, $fmt, move |_, args, res| {
                let list = args[0].get_str();
                let needle = $get(&args[1]);
                let skip = args[2].get_int();
                let mut n: CsInt = 0;
                let mut p = ListParser::new(&list);
                let mut found = -1;
                'scan: while p.parse() {
                    if $cmp(p.item(), &needle) {
                        found = n;
                        break;
                    }
                    n += 1;
                    for _ in 0..skip {
                        if !p.parse() {
                            break 'scan;
                        }
                        n += 1;
                    }
                }
                *res = Value::Int(found);
                Ok(())
            })?;
        };
    }
    list_find_typed!("listfind=", "sii", |v: &Value| v.get_int(), |item: &str,
                                                                   n: &CsInt| {
        parse_int(item) == *n
    });
    list_find_typed!("listfind=f", "sfi", |v: &Value| v.get_float(), |item: &str,
                                                                      n: &f64| {
        parse_float(item) == *n
    });
    list_find_typed!("listfind=s", "ssi", |v: &Value| v.get_str(), |item: &str,
                                                                    n: &Rc<str>| {
        item == &**n
    });

    macro_rules! list_assoc_typed {
        ($name:expr, $fmt:expr, $get:expr, $cmp:expr) => {
            cs.new_command($name, $fmt, move |_, args, res| {
                let list = args[0].get_str();
                let needle = $get(&args[1]);
                let mut p = ListParser::new(&list);
                while p.parse() {
                    if $cmp(p.item(), &needle) {
                        if p.parse() {
                            *res = Value::from(p.element());
                        }
                        break;
                    }
                    if !p.parse() {
                        break;
                    }
                }
                Ok(())
            })?;
        };
    }
    list_assoc_typed!("listassoc=", "si", |v: &Value| v.get_int(), |item: &str,
                                                                    n: &CsInt| {
        parse_int(item) == *n
    });
    list_assoc_typed!("listassoc=f", "sf", |v: &Value| v.get_float(), |item: &str,
                                                                       n: &f64| {
        parse_float(item) == *n
    });
    list_assoc_typed!("listassoc=s", "ss", |v: &Value| v.get_str(), |item: &str,
                                                                     n: &Rc<str>| {
        item == &**n
    });

    cs.new_command("looplist", "rse", |cs, args, _| {
        let Some(id) = args[0].get_ident() else {
            return Ok(());
        };
        if !is_alias(cs, id) {
            return Ok(());
        }
        let list = args[1].get_str();
        let Some(body) = args[2].get_code() else {
            return Ok(());
        };
        let mut pushed = false;
        let mut err = None;
        let mut p = ListParser::new(&list);
        while p.parse() {
            set_iter(cs, id, Value::from(p.element()), &mut pushed);
            match run_loop_body(cs, &body) {
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
    })?;

    cs.new_command("looplist2", "rrse", |cs, args, _| {
        let (Some(id), Some(id2)) = (args[0].get_ident(), args[1].get_ident()) else {
            return Ok(());
        };
        if !is_alias(cs, id) || !is_alias(cs, id2) {
            return Ok(());
        }
        let list = args[2].get_str();
        let Some(body) = args[3].get_code() else {
            return Ok(());
        };
        let mut pushed = [false; 2];
        let mut err = None;
        let mut p = ListParser::new(&list);
        while p.parse() {
            set_iter(cs, id, Value::from(p.element()), &mut pushed[0]);
            let second = if p.parse() { p.element() } else { String::new() };
            set_iter(cs, id2, Value::from(second), &mut pushed[1]);
            match run_loop_body(cs, &body) {
                Ok(LoopState::Normal) => {}
                Ok(LoopState::Break) => break,
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
        }
        if pushed[0] {
            cs.pop_arg(id);
        }
        if pushed[1] {
            cs.pop_arg(id2);
        }
        err.map_or(Ok(()), Err)
    })?;

    cs.new_command("looplist3", "rrrse", |cs, args, _| {
        let (Some(id), Some(id2), Some(id3)) = (
            args[0].get_ident(),
            args[1].get_ident(),
            args[2].get_ident(),
        ) else {
            return Ok(());
        };
        if !is_alias(cs, id) || !is_alias(cs, id2) || !is_alias(cs, id3) {
            return Ok(());
        }
        let list = args[3].get_str();
        let Some(body) = args[4].get_code() else {
            return Ok(());
        };
        let mut pushed = [false; 3];
        let mut err = None;
        let mut p = ListParser::new(&list);
        while p.parse() {
            set_iter(cs, id, Value::from(p.element()), &mut pushed[0]);
            let second = if p.parse() { p.element() } else { String::new() };
            set_iter(cs, id2, Value::from(second), &mut pushed[1]);
            let third = if p.parse() { p.element() } else { String::new() };
            set_iter(cs, id3, Value::from(third), &mut pushed[2]);
            match run_loop_body(cs, &body) {
                Ok(LoopState::Normal) => {}
                Ok(LoopState::Break) => break,
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
        }
        if pushed[0] {
            cs.pop_arg(id);
        }
        if pushed[1] {
            cs.pop_arg(id2);
        }
        if pushed[2] {
            cs.pop_arg(id3);
        }
        err.map_or(Ok(()), Err)
    })?;

    cs.new_command("looplistconcat", "rse", |cs, args, res| {
        let Some(id) = args[0].get_ident() else {
            return Ok(());
        };
        let list = args[1].get_str();
        let Some(body) = args[2].get_code() else {
            return Ok(());
        };
        *res = loop_list_conc(cs, id, &list, &body, true)?;
        Ok(())
    })?;

    cs.new_command("looplistconcatword", "rse", |cs, args, res| {
        let Some(id) = args[0].get_ident() else {
            return Ok(());
        };
        let list = args[1].get_str();
        let Some(body) = args[2].get_code() else {
            return Ok(());
        };
        *res = loop_list_conc(cs, id, &list, &body, false)?;
        Ok(())
    })?;

    cs.new_command("listfilter", "rse", |cs, args, res| {
        let Some(id) = args[0].get_ident() else {
            return Ok(());
        };
        if !is_alias(cs, id) {
            return Ok(());
        }
        let list = args[1].get_str();
        let Some(body) = args[2].get_code() else {
            return Ok(());
        };
        let mut pushed = false;
        let mut err = None;
        let mut out = String::new();
        let mut p = ListParser::new(&list);
        while p.parse() {
            set_iter(cs, id, Value::from(p.item()), &mut pushed);
            match run_code_bool(cs, &body) {
                Ok(true) => {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(p.quoted());
                }
                Ok(false) => {}
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
        }
        if pushed {
            cs.pop_arg(id);
        }
        *res = Value::from(out);
        err.map_or(Ok(()), Err)
    })?;

    cs.new_command("listcount", "rse", |cs, args, res| {
        let Some(id) = args[0].get_ident() else {
            return Ok(());
        };
        if !is_alias(cs, id) {
            return Ok(());
        }
        let list = args[1].get_str();
        let Some(body) = args[2].get_code() else {
            return Ok(());
        };
        let mut pushed = false;
        let mut err = None;
        let mut count: CsInt = 0;
        let mut p = ListParser::new(&list);
        while p.parse() {
            set_iter(cs, id, Value::from(p.item()), &mut pushed);
            match run_code_bool(cs, &body) {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
        }
        if pushed {
            cs.pop_arg(id);
        }
        *res = Value::Int(count);
        err.map_or(Ok(()), Err)
    })?;

    cs.new_command("prettylist", "ss", |_, args, res| {
        let list = args[0].get_str();
        let conj = args[1].get_str();
        let len = list_length(&list);
        let mut out = String::new();
        let mut n = 0usize;
        let mut p = ListParser::new(&list);
        while p.parse() {
            if p.quoted().starts_with('"') {
                out.push_str(&unescape_string(p.item()));
            } else {
                out.push_str(p.item());
            }
            if n + 1 < len {
                if len > 2 || conj.is_empty() {
                    out.push(',');
                }
                if n + 2 == len && !conj.is_empty() {
                    out.push(' ');
                    out.push_str(&conj);
                }
                out.push(' ');
            }
            n += 1;
        }
        *res = Value::from(out);
        Ok(())
    })?;

    cs.new_command("indexof", "ss", |_, args, res| {
        *res = Value::Int(list_includes(&args[0].get_str(), &args[1].get_str()));
        Ok(())
    })?;

    cs.new_command("listdel", "ss", |_, args, res| {
        let list = args[0].get_str();
        let elems = args[1].get_str();
        let mut out = String::new();
        let mut p = ListParser::new(&list);
        while p.parse() {
            if list_includes(&elems, p.item()) < 0 {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(p.quoted());
            }
        }
        *res = Value::from(out);
        Ok(())
    })?;

    cs.new_command("listintersect", "ss", |_, args, res| {
        let list = args[0].get_str();
        let elems = args[1].get_str();
        let mut out = String::new();
        let mut p = ListParser::new(&list);
        while p.parse() {
            if list_includes(&elems, p.item()) >= 0 {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(p.quoted());
            }
        }
        *res = Value::from(out);
        Ok(())
    })?;

    cs.new_command("listunion", "ss", |_, args, res| {
        let list = args[0].get_str();
        let elems = args[1].get_str();
        let mut out = list.to_string();
        let mut p = ListParser::new(&elems);
        while p.parse() {
            if list_includes(&list, p.item()) < 0 {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(p.quoted());
            }
        }
        *res = Value::from(out);
        Ok(())
    })?;

    cs.new_command("listsplice", "ssii", |_, args, res| {
        let s = args[0].get_str();
        let vals = args[1].get_str();
        let offset = args[2].get_int().max(0);
        let count = args[3].get_int().max(0);
        let mut p = ListParser::new(&s);
        for _ in 0..offset {
            if !p.parse() {
                break;
            }
        }
        let mut out = s[..p.quote_end()].to_string();
        if !vals.is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&vals);
        }
        for _ in 0..count {
            if !p.parse() {
                break;
            }
        }
        p.skip();
        let rest = p.remainder();
        if !rest.is_empty() && !rest.starts_with(')') && !rest.starts_with(']') {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(rest);
        }
        *res = Value::from(out);
        Ok(())
    })?;

    cs.new_command("sortlist", "srree", |cs, args, res| {
        let list = args[0].get_str();
        let (Some(x), Some(y)) = (args[1].get_ident(), args[2].get_ident()) else {
            return Ok(());
        };
        let body = args[3].get_code();
        let unique = args[4].get_code().filter(|c| !c.is_empty());
        *res = do_sort(cs, &list, x, y, body.as_ref(), unique.as_ref())?;
        Ok(())
    })?;

    cs.new_command("uniquelist", "srre", |cs, args, res| {
        let list = args[0].get_str();
        let (Some(x), Some(y)) = (args[1].get_ident(), args[2].get_ident()) else {
            return Ok(());
        };
        let unique = args[3].get_code();
        *res = do_sort(cs, &list, x, y, None, unique.as_ref())?;
        Ok(())
    })?;

    Ok(())
}

fn sort_cmp(
    cs: &mut CsState,
    x: usize,
    y: usize,
    a: &Rc<str>,
    b: &Rc<str>,
    body: &CodeRef,
) -> CsResult<bool> {
    cs.rebind_alias(x, Value::Str(a.clone()));
    cs.rebind_alias(y, Value::Str(b.clone()));
    run_code_bool(cs, body)
}

/// Sort and/or deduplicate a list under script-defined predicates. The
/// comparison aliases are shadowed for the duration.
fn do_sort(
    cs: &mut CsState,
    list: &str,
    x: usize,
    y: usize,
    body: Option<&CodeRef>,
    unique: Option<&CodeRef>,
) -> CsResult<Value> {
    if x == y || !is_alias(cs, x) || !is_alias(cs, y) {
        return Ok(Value::from(list));
    }
    let mut items: Vec<(Rc<str>, Option<String>)> = Vec::new();
    let mut p = ListParser::new(list);
    while p.parse() {
        items.push((Rc::from(p.item()), Some(p.quoted().to_string())));
    }
    if items.is_empty() {
        return Ok(Value::from(list));
    }
    cs.push_arg(x, Value::Null);
    cs.push_arg(y, Value::Null);
    let mut err: Option<CsError> = None;
    if let Some(body) = body {
        'sort: for i in 1..items.len() {
            let mut j = i;
            while j > 0 {
                match sort_cmp(cs, x, y, &items[j].0, &items[j - 1].0, body) {
                    Ok(true) => {
                        items.swap(j, j - 1);
                        j -= 1;
                    }
                    Ok(false) => break,
                    Err(e) => {
                        err = Some(e);
                        break 'sort;
                    }
                }
            }
        }
        if err.is_none() {
            if let Some(unique) = unique {
                for i in 1..items.len() {
                    match sort_cmp(cs, x, y, &items[i - 1].0, &items[i].0, unique) {
                        Ok(true) => items[i].1 = None,
                        Ok(false) => {}
                        Err(e) => {
                            err = Some(e);
                            break;
                        }
                    }
                }
            }
        }
    } else if let Some(unique) = unique {
        'dedup: for i in 1..items.len() {
            for j in 0..i {
                if items[j].1.is_none() {
                    continue;
                }
                match sort_cmp(cs, x, y, &items[i].0, &items[j].0, unique) {
                    Ok(true) => {
                        items[i].1 = None;
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        err = Some(e);
                        break 'dedup;
                    }
                }
            }
        }
    }
    cs.pop_arg(x);
    cs.pop_arg(y);
    if let Some(e) = err {
        return Err(e);
    }
    let joined = items
        .iter()
        .filter_map(|(_, q)| q.as_deref())
        .collect::<Vec<_>>()
        .join(" ");
    Ok(Value::from(joined))
}
