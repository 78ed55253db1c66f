//! String commands. Strings are treated as byte sequences (the language
//! is 8-bit clean); slicing goes through lossy UTF-8 reconstruction so
//! odd offsets cannot panic.

use crate::dispatch::conc;
use cubescript_core::state::CsState;
use cubescript_core::strutil::{escape_string, unescape_string};
use cubescript_core::value::{CsInt, Value};
use cubescript_core::CsResult;

fn bytes_lossy(b: &[u8]) -> String {
    String::from_utf8_lossy(b).into_owned()
}

pub fn init(cs: &mut CsState) -> CsResult<()> {
    cs.new_command("strstr", "ss", |_, args, res| {
        let hay = args[0].get_str();
        let needle = args[1].get_str();
        let at = hay.find(&*needle).map_or(-1, |i| i as CsInt);
        *res = Value::Int(at);
        Ok(())
    })?;

    cs.new_command("strlen", "s", |_, args, res| {
        *res = Value::Int(args[0].get_str().len() as CsInt);
        Ok(())
    })?;

    cs.new_command("strcode", "si", |_, args, res| {
        let s = args[0].get_str();
        let i = args[1].get_int();
        let code = if i >= 0 {
            s.as_bytes().get(i as usize).copied().unwrap_or(0)
        } else {
            0
        };
        *res = Value::Int(CsInt::from(code));
        Ok(())
    })?;

    cs.new_command("codestr", "i", |_, args, res| {
        let code = args[0].get_int();
        let mut s = String::new();
        if code != 0 {
            s.push((code as u8) as char);
        }
        *res = Value::from(s);
        Ok(())
    })?;

    cs.new_command("strlower", "s", |_, args, res| {
        *res = Value::from(args[0].get_str().to_ascii_lowercase());
        Ok(())
    })?;

    cs.new_command("strupper", "s", |_, args, res| {
        *res = Value::from(args[0].get_str().to_ascii_uppercase());
        Ok(())
    })?;

    cs.new_command("escape", "s", |_, args, res| {
        *res = Value::from(escape_string(&args[0].get_str()));
        Ok(())
    })?;

    cs.new_command("unescape", "s", |_, args, res| {
        let s = args[0].get_str();
        let inner = s
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
            .unwrap_or(&s);
        *res = Value::from(unescape_string(inner));
        Ok(())
    })?;

    cs.new_command("concat", "V", |_, args, res| {
        *res = Value::from(conc(args, true));
        Ok(())
    })?;

    cs.new_command("concatword", "V", |_, args, res| {
        *res = Value::from(conc(args, false));
        Ok(())
    })?;

    cs.new_command("format", "V", |_, args, res| {
        if args.is_empty() {
            return Ok(());
        }
        let fmt = args[0].get_str();
        let mut out = String::with_capacity(fmt.len());
        let mut it = fmt.chars().peekable();
        while let Some(c) = it.next() {
            if c == '%' {
                match it.next() {
                    Some(d @ '1'..='9') => {
                        let i = d as usize - '0' as usize;
                        if let Some(sub) = args.get(i) {
                            out.push_str(&sub.get_str());
                        }
                    }
                    Some(other) => out.push(other),
                    None => {}
                }
            } else {
                out.push(c);
            }
        }
        *res = Value::from(out);
        Ok(())
    })?;

    cs.new_command("tohex", "ii", |_, args, res| {
        let v = args[0].get_int();
        let width = args[1].get_int().max(1) as usize;
        *res = Value::from(format!("0x{v:0width$X}"));
        Ok(())
    })?;

    cs.new_command("substr", "siiN", |_, args, res| {
        let s = args[0].get_str();
        let b = s.as_bytes();
        let len = b.len() as CsInt;
        let start = args[1].get_int().clamp(0, len) as usize;
        let count = if args[3].get_int() >= 3 {
            args[2].get_int().clamp(0, len - start as CsInt) as usize
        } else {
            b.len() - start
        };
        *res = Value::from(bytes_lossy(&b[start..start + count]));
        Ok(())
    })?;

    macro_rules! str_cmp {
        ($name:expr, $op:expr) => {
            cs.new_command($name, "s1V", move |_, args, res| {
                let op: fn(&str, &str) -> bool = $op;
                let val = if args.len() >= 2 {
                    let mut ok = true;
                    for pair in args.windows(2) {
                        ok = op(&pair[0].get_str(), &pair[1].get_str());
                        if !ok {
                            break;
                        }
                    }
                    ok
                } else {
                    let first = args.first().map(Value::get_str);
                    op(first.as_deref().unwrap_or(""), "")
                };
                *res = Value::from(val);
                Ok(())
            })?;
        };
    }
    str_cmp!("strcmp", |a, b| a == b);
    str_cmp!("=s", |a, b| a == b);
    str_cmp!("!=s", |a, b| a != b);
    str_cmp!("<s", |a, b| a < b);
    str_cmp!(">s", |a, b| a > b);
    str_cmp!("<=s", |a, b| a <= b);
    str_cmp!(">=s", |a, b| a >= b);

    cs.new_command("strreplace", "ssss", |_, args, res| {
        let s = args[0].get_str();
        let oldval = args[1].get_str();
        let newval = args[2].get_str();
        let newval2 = args[3].get_str();
        let newval2 = if newval2.is_empty() { &newval } else { &newval2 };
        if oldval.is_empty() {
            *res = Value::Str(s);
            return Ok(());
        }
        let mut out = String::with_capacity(s.len());
        let mut rest = &*s;
        let mut i = 0usize;
        while let Some(at) = rest.find(&*oldval) {
            out.push_str(&rest[..at]);
            out.push_str(if i % 2 == 0 { &newval } else { newval2 });
            rest = &rest[at + oldval.len()..];
            i += 1;
        }
        out.push_str(rest);
        *res = Value::from(out);
        Ok(())
    })?;

    cs.new_command("strsplice", "ssii", |_, args, res| {
        let s = args[0].get_str();
        let vals = args[1].get_str();
        let b = s.as_bytes();
        let slen = b.len() as CsInt;
        let offset = args[2].get_int().clamp(0, slen) as usize;
        let count = args[3].get_int().clamp(0, slen - offset as CsInt) as usize;
        let mut out = Vec::with_capacity(b.len() - count + vals.len());
        out.extend_from_slice(&b[..offset]);
        out.extend_from_slice(vals.as_bytes());
        out.extend_from_slice(&b[offset + count..]);
        *res = Value::from(bytes_lossy(&out));
        Ok(())
    })?;

    Ok(())
}
