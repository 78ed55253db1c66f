//! The decode-and-dispatch loop.
//!
//! Executes one instruction range of a code block against a value
//! stack. `Enter` runs the following range as a nested activation and
//! pushes its result; `Exit` coerces the accumulated result and returns
//! control to the enclosing activation. Every activation owns its stack
//! slice, so recursion depth is the only shared budget, bounded by the
//! state's call-depth cap.

use crate::dispatch::{conc, exec_alias, exec_command};
use cubescript_core::bcode::{payload, payload_signed, CodeBlock, CodeRef, MacroStr, Op, RetType, OP_MASK};
use cubescript_core::state::CsState;
use cubescript_core::value::{float_to_str, int_to_str, is_numeric_name, CsFloat, CsInt, Value};
use cubescript_core::{CsError, CsResult, IdentClass, IDF_UNKNOWN, MAX_ARGUMENTS};
use cubescript_compiler::{force_code, force_cond};
use smallvec::SmallVec;
use std::rc::Rc;

type Stack = SmallVec<[Value; 16]>;

/// Run a compiled block from its entry point, leaving the result in
/// `result`.
pub fn run_code(cs: &mut CsState, code: &CodeRef, result: &mut Value) -> CsResult<()> {
    let block = code.block().clone();
    exec(cs, &block, code.entry(), result).map(|_| ())
}

fn exec(
    cs: &mut CsState,
    block: &Rc<CodeBlock>,
    pc: usize,
    result: &mut Value,
) -> CsResult<usize> {
    result.force_null();
    if cs.rundepth >= cs.max_call_depth() {
        return Err(cs.error("exceeded recursion limit"));
    }
    cs.rundepth += 1;
    let out = exec_loop(cs, block, pc, result);
    cs.rundepth -= 1;
    out
}

fn bad_code(what: &str) -> CsError {
    CsError::Internal(format!("malformed bytecode: {what}"))
}

fn lookup_default(ret: RetType) -> Value {
    match ret {
        RetType::Str => Value::from(""),
        RetType::Int => Value::Int(0),
        RetType::Float => Value::Float(0.0),
        RetType::Null => Value::Null,
    }
}

/// Read an alias binding under the representation a lookup instruction
/// requests.
fn alias_lookup(cs: &CsState, idx: usize, ret: RetType) -> Value {
    let v = cs.alias_value(idx);
    match ret {
        RetType::Str => match v {
            Value::Str(_) | Value::Macro(_) => v,
            other => Value::Str(other.get_str()),
        },
        RetType::Int => Value::Int(v.get_int()),
        RetType::Float => Value::Float(v.get_float()),
        RetType::Null => v.get_val(),
    }
}

fn ivar_lookup(cs: &CsState, idx: usize, ret: RetType) -> Value {
    let v = cs.ivar_value(idx);
    match ret {
        RetType::Str => Value::Str(Rc::from(int_to_str(v).as_str())),
        RetType::Float => Value::Float(v as CsFloat),
        _ => Value::Int(v),
    }
}

fn fvar_lookup(cs: &CsState, idx: usize, ret: RetType) -> Value {
    let v = cs.fvar_value(idx);
    match ret {
        RetType::Str => Value::Str(Rc::from(float_to_str(v).as_str())),
        RetType::Int => Value::Int(v as CsInt),
        _ => Value::Float(v),
    }
}

fn svar_lookup(cs: &CsState, idx: usize, ret: RetType) -> Value {
    let v = cs.svar_value(idx);
    match ret {
        RetType::Int => Value::Int(Value::Str(v).get_int()),
        RetType::Float => Value::Float(Value::Str(v).get_float()),
        _ => Value::Str(v),
    }
}

/// Resolve a name taken off the stack at run time, as the `LookupU`
/// family does. Returns the replacement value, or `None` to leave the
/// operand untouched.
fn lookup_dynamic(cs: &mut CsState, name: &str, ret: RetType) -> CsResult<Option<Value>> {
    let Some(id) = cs.get_ident(name) else {
        cs.diagnostic(format!("unknown alias lookup: {name}"));
        return Ok(Some(lookup_default(ret)));
    };
    match cs.ident_class(id) {
        IdentClass::Alias => {
            if cs.ident_flags(id) & IDF_UNKNOWN != 0 {
                cs.diagnostic(format!("unknown alias lookup: {name}"));
                return Ok(Some(lookup_default(ret)));
            }
            if id < MAX_ARGUMENTS && !cs.is_arg_used(id) {
                return Ok(Some(lookup_default(ret)));
            }
            Ok(Some(alias_lookup(cs, id, ret)))
        }
        IdentClass::Svar => Ok(Some(svar_lookup(cs, id, ret))),
        IdentClass::Ivar => Ok(Some(ivar_lookup(cs, id, ret))),
        IdentClass::Fvar => Ok(Some(fvar_lookup(cs, id, ret))),
        IdentClass::Command => {
            let mut v = Value::Null;
            exec_command(cs, id, &mut [], true, &mut v)?;
            v.force(ret);
            Ok(Some(v))
        }
    }
}

fn exec_loop(
    cs: &mut CsState,
    block: &Rc<CodeBlock>,
    mut pc: usize,
    result: &mut Value,
) -> CsResult<usize> {
    let code = block.code();
    let mut stack: Stack = SmallVec::new();
    loop {
        cs.run_call_hook()?;
        let &word = code.get(pc).ok_or_else(|| bad_code("ran past block end"))?;
        pc += 1;
        let op = Op::of(word & OP_MASK).ok_or_else(|| bad_code("unknown opcode"))?;
        let ret = RetType::of(word);
        match op {
            Op::Start | Op::Offset => {}

            Op::Null => {
                *result = lookup_default(ret);
            }
            Op::False => {
                *result = match ret {
                    RetType::Str => Value::from("0"),
                    RetType::Float => Value::Float(0.0),
                    _ => Value::Int(0),
                };
            }
            Op::True => {
                *result = match ret {
                    RetType::Str => Value::from("1"),
                    RetType::Float => Value::Float(1.0),
                    _ => Value::Int(1),
                };
            }
            Op::Not => {
                let v = stack.pop().unwrap_or_default();
                let b = !v.get_bool();
                *result = match ret {
                    RetType::Str => Value::from(if b { "1" } else { "0" }),
                    RetType::Float => Value::Float(if b { 1.0 } else { 0.0 }),
                    _ => Value::Int(b as CsInt),
                };
            }
            Op::Pop => {
                stack.pop();
            }

            Op::Enter => {
                let mut v = Value::Null;
                pc = exec(cs, block, pc, &mut v)?;
                stack.push(v);
            }
            Op::EnterResult => {
                pc = exec(cs, block, pc, result)?;
            }
            Op::Exit => {
                result.force(ret);
                return Ok(pc);
            }
            Op::ResultArg => {
                result.force(ret);
                stack.push(std::mem::take(result));
            }
            Op::Result => {
                *result = stack.pop().unwrap_or_default();
                result.force(ret);
            }
            Op::Print => {
                cs.print_var(payload(word) as usize)?;
            }

            Op::Local => {
                let numlocals = payload(word) as usize;
                let offset = stack.len().saturating_sub(numlocals);
                let mut ids = Vec::with_capacity(numlocals);
                for slot in &mut stack[offset..] {
                    let mut v = std::mem::take(slot);
                    ids.push(cs.force_ident(&mut v));
                }
                stack.truncate(offset);
                for id in &ids {
                    cs.push_alias(*id);
                }
                let nested = exec(cs, block, pc, result);
                for id in ids.iter().rev() {
                    cs.pop_alias(*id);
                }
                return nested;
            }

            Op::Do => {
                let v = stack.pop().unwrap_or_default();
                if let Some(body) = v.get_code() {
                    run_code(cs, &body, result)?;
                }
                result.force(ret);
            }
            Op::DoArgs => {
                let v = stack.pop().unwrap_or_default();
                if let Some(body) = v.get_code() {
                    if cs.has_alias_frame() {
                        cs.with_caller_args(|cs| run_code(cs, &body, result))?;
                    } else {
                        run_code(cs, &body, result)?;
                    }
                }
                result.force(ret);
            }

            Op::Jump => {
                pc += payload(word) as usize;
            }
            Op::JumpTrue => {
                let v = stack.pop().unwrap_or_default();
                if v.get_bool() {
                    pc += payload(word) as usize;
                }
            }
            Op::JumpFalse => {
                let v = stack.pop().unwrap_or_default();
                if !v.get_bool() {
                    pc += payload(word) as usize;
                }
            }
            Op::JumpResultTrue => {
                let v = stack.pop().unwrap_or_default();
                match v.get_code() {
                    Some(body) => run_code(cs, &body, result)?,
                    None => *result = v,
                }
                if result.get_bool() {
                    pc += payload(word) as usize;
                }
            }
            Op::JumpResultFalse => {
                let v = stack.pop().unwrap_or_default();
                match v.get_code() {
                    Some(body) => run_code(cs, &body, result)?,
                    None => *result = v,
                }
                if !result.get_bool() {
                    pc += payload(word) as usize;
                }
            }

            Op::Macro => {
                stack.push(Value::Macro(MacroStr::new(block.clone(), payload(word))));
            }
            Op::Val => match ret {
                RetType::Str => {
                    stack.push(Value::Str(block.const_str(payload(word)).clone()));
                }
                RetType::Int => {
                    let lo = *code.get(pc).ok_or_else(|| bad_code("truncated int"))?;
                    let hi = *code.get(pc + 1).ok_or_else(|| bad_code("truncated int"))?;
                    pc += 2;
                    stack.push(Value::Int(((u64::from(hi) << 32) | u64::from(lo)) as CsInt));
                }
                RetType::Float => {
                    let lo = *code.get(pc).ok_or_else(|| bad_code("truncated float"))?;
                    let hi = *code.get(pc + 1).ok_or_else(|| bad_code("truncated float"))?;
                    pc += 2;
                    stack.push(Value::Float(CsFloat::from_bits(
                        (u64::from(hi) << 32) | u64::from(lo),
                    )));
                }
                RetType::Null => stack.push(Value::Null),
            },
            Op::ValInline => match ret {
                RetType::Str => {
                    let mut s = String::new();
                    for shift in [8u32, 16, 24] {
                        let b = ((word >> shift) & 0xFF) as u8;
                        if b == 0 {
                            break;
                        }
                        s.push(b as char);
                    }
                    stack.push(Value::from(s));
                }
                RetType::Int => stack.push(Value::Int(CsInt::from(payload_signed(word)))),
                RetType::Float => {
                    stack.push(Value::Float(CsFloat::from(payload_signed(word))));
                }
                RetType::Null => stack.push(Value::Null),
            },

            Op::Dup => {
                let top = stack.last().cloned().unwrap_or_default();
                let dup = match ret {
                    RetType::Null => top.get_val(),
                    RetType::Int => Value::Int(top.get_int()),
                    RetType::Float => Value::Float(top.get_float()),
                    RetType::Str => Value::Str(top.get_str()),
                };
                stack.push(dup);
            }
            Op::Force => {
                if let Some(top) = stack.last_mut() {
                    top.force(ret);
                }
            }

            Op::Empty => {
                stack.push(Value::Code(cs.empty_code(ret)));
            }
            Op::Block => {
                let len = payload(word) as usize;
                stack.push(Value::Code(CodeRef::at(block.clone(), pc + 1)));
                pc += len;
            }
            Op::Compile => {
                if let Some(top) = stack.last_mut() {
                    force_code(cs, top);
                }
            }
            Op::Cond => {
                if let Some(top) = stack.last_mut() {
                    force_cond(cs, top);
                }
            }

            Op::Ident => {
                stack.push(Value::Ident(payload(word) as usize));
            }
            Op::IdentArg => {
                let idx = payload(word) as usize;
                if !cs.is_arg_used(idx) {
                    cs.push_arg(idx, Value::Null);
                    cs.mark_arg_used(idx);
                }
                stack.push(Value::Ident(idx));
            }
            Op::IdentU => {
                let top = stack.pop().unwrap_or_default();
                let idx = match top.as_str() {
                    Some(s) => {
                        let name = s.to_string();
                        cs.new_ident(&name, IDF_UNKNOWN)
                    }
                    None => cs.dummy_idx(),
                };
                if idx < MAX_ARGUMENTS && !cs.is_arg_used(idx) {
                    cs.push_arg(idx, Value::Null);
                    cs.mark_arg_used(idx);
                }
                stack.push(Value::Ident(idx));
            }

            Op::Lookup | Op::LookupM => {
                let idx = payload(word) as usize;
                if cs.ident_flags(idx) & IDF_UNKNOWN != 0 {
                    let name = cs.ident_name(idx);
                    cs.diagnostic(format!("unknown alias lookup: {name}"));
                }
                stack.push(alias_lookup(cs, idx, ret));
            }
            Op::LookupArg | Op::LookupMArg => {
                let idx = payload(word) as usize;
                if cs.is_arg_used(idx) {
                    stack.push(alias_lookup(cs, idx, ret));
                } else {
                    stack.push(lookup_default(ret));
                }
            }
            Op::LookupU | Op::LookupMU => {
                let name = match stack.last().and_then(Value::as_str) {
                    Some(s) => s.to_string(),
                    None => continue,
                };
                if let Some(v) = lookup_dynamic(cs, &name, ret)? {
                    if let Some(top) = stack.last_mut() {
                        *top = v;
                    }
                }
            }

            Op::Svar => {
                stack.push(svar_lookup(cs, payload(word) as usize, ret));
            }
            Op::SvarM => {
                stack.push(Value::Str(cs.svar_value(payload(word) as usize)));
            }
            Op::Svar1 => {
                let v = stack.pop().unwrap_or_default();
                cs.set_var_str_checked(payload(word) as usize, &v.get_str());
            }

            Op::Ivar => {
                stack.push(ivar_lookup(cs, payload(word) as usize, ret));
            }
            Op::Ivar1 => {
                let v = stack.pop().unwrap_or_default();
                cs.set_var_int_checked(payload(word) as usize, v.get_int());
            }
            Op::Ivar2 => {
                let b = stack.pop().unwrap_or_default().get_int();
                let a = stack.pop().unwrap_or_default().get_int();
                cs.set_var_int_checked(payload(word) as usize, (a << 16) | (b << 8));
            }
            Op::Ivar3 => {
                let c = stack.pop().unwrap_or_default().get_int();
                let b = stack.pop().unwrap_or_default().get_int();
                let a = stack.pop().unwrap_or_default().get_int();
                cs.set_var_int_checked(payload(word) as usize, (a << 16) | (b << 8) | c);
            }

            Op::Fvar => {
                stack.push(fvar_lookup(cs, payload(word) as usize, ret));
            }
            Op::Fvar1 => {
                let v = stack.pop().unwrap_or_default();
                cs.set_var_float_checked(payload(word) as usize, v.get_float());
            }

            Op::Com => {
                let idx = payload(word) as usize;
                let declared = cs.command_numargs(idx);
                let offset = stack.len().saturating_sub(declared);
                result.force_null();
                exec_command(cs, idx, &mut stack[offset..], false, result)?;
                result.force(ret);
                stack.truncate(offset);
            }
            Op::ComV => {
                let idx = (payload(word) >> 5) as usize;
                let callargs = (payload(word) & 0x1F) as usize;
                let offset = stack.len().saturating_sub(callargs);
                result.force_null();
                let cb = cs.command_cb(idx);
                if let Some(cb) = cb {
                    cb(cs, &mut stack[offset..], result)?;
                }
                result.force(ret);
                stack.truncate(offset);
            }
            Op::ComC => {
                let idx = (payload(word) >> 5) as usize;
                let callargs = (payload(word) & 0x1F) as usize;
                let offset = stack.len().saturating_sub(callargs);
                result.force_null();
                let joined = conc(&stack[offset..], true);
                let cb = cs.command_cb(idx);
                if let Some(cb) = cb {
                    let mut one = [Value::from(joined)];
                    cb(cs, &mut one, result)?;
                }
                result.force(ret);
                stack.truncate(offset);
            }

            Op::Conc | Op::ConcW => {
                let numconc = payload(word) as usize;
                let offset = stack.len().saturating_sub(numconc);
                let joined = conc(&stack[offset..], op == Op::Conc);
                stack.truncate(offset);
                let mut v = Value::from(joined);
                v.force(ret);
                stack.push(v);
            }
            Op::ConcM => {
                let numconc = payload(word) as usize;
                let offset = stack.len().saturating_sub(numconc);
                let joined = conc(&stack[offset..], false);
                stack.truncate(offset);
                *result = Value::from(joined);
                result.force(ret);
            }

            Op::Alias => {
                let v = stack.pop().unwrap_or_default();
                cs.set_alias_idx(payload(word) as usize, v);
            }
            Op::AliasArg => {
                let v = stack.pop().unwrap_or_default();
                cs.set_arg(payload(word) as usize, v);
            }
            Op::AliasU => {
                let v = stack.pop().unwrap_or_default();
                let name = stack.pop().unwrap_or_default();
                cs.set_alias(&name.get_str(), v);
            }

            Op::Call => {
                let idx = (payload(word) >> 5) as usize;
                let callargs = (payload(word) & 0x1F) as usize;
                let offset = stack.len().saturating_sub(callargs);
                result.force_null();
                if cs.ident_flags(idx) & IDF_UNKNOWN != 0 {
                    let name = cs.ident_name(idx);
                    cs.diagnostic(format!("unknown command: {name}"));
                    stack.truncate(offset);
                    result.force(ret);
                } else {
                    let r = exec_alias(cs, idx, &mut stack[offset..], result, ret);
                    stack.truncate(offset);
                    r?;
                }
            }
            Op::CallArg => {
                let idx = (payload(word) >> 5) as usize;
                let callargs = (payload(word) & 0x1F) as usize;
                let offset = stack.len().saturating_sub(callargs);
                result.force_null();
                if !cs.is_arg_used(idx) {
                    stack.truncate(offset);
                    result.force(ret);
                } else {
                    let r = exec_alias(cs, idx, &mut stack[offset..], result, ret);
                    stack.truncate(offset);
                    r?;
                }
            }
            Op::CallU => {
                let callargs = payload(word) as usize;
                let offset = stack.len().saturating_sub(callargs);
                let name_slot = offset.checked_sub(1).ok_or_else(|| bad_code("call underflow"))?;
                let name = match stack[name_slot].as_str() {
                    Some(s) => s.to_string(),
                    None => {
                        *result = stack[name_slot].clone();
                        result.force(ret);
                        stack.truncate(name_slot);
                        continue;
                    }
                };
                match cs.get_ident(&name) {
                    None => {
                        if is_numeric_name(&name) {
                            *result = stack[name_slot].clone();
                            result.force(ret);
                        } else {
                            cs.diagnostic(format!("unknown command: {name}"));
                            result.force_null();
                            result.force(ret);
                        }
                        stack.truncate(name_slot);
                    }
                    Some(id) => match cs.ident_class(id) {
                        IdentClass::Command => {
                            if cs.ident_builtin(id) == Some(cubescript_core::Builtin::Local) {
                                let mut ids = Vec::with_capacity(callargs);
                                for slot in &mut stack[offset..] {
                                    let mut v = std::mem::take(slot);
                                    ids.push(cs.force_ident(&mut v));
                                }
                                stack.truncate(name_slot);
                                for i in &ids {
                                    cs.push_alias(*i);
                                }
                                let nested = exec(cs, block, pc, result);
                                for i in ids.iter().rev() {
                                    cs.pop_alias(*i);
                                }
                                return nested;
                            }
                            result.force_null();
                            let r = exec_command(cs, id, &mut stack[offset..], false, result);
                            stack.truncate(name_slot);
                            r?;
                            result.force(ret);
                        }
                        IdentClass::Ivar => {
                            if callargs == 0 {
                                cs.print_var(id)?;
                            } else {
                                cs.set_var_int_checked_multi(id, &mut stack[offset..]);
                            }
                            stack.truncate(name_slot);
                            result.force(ret);
                        }
                        IdentClass::Fvar => {
                            if callargs == 0 {
                                cs.print_var(id)?;
                            } else {
                                let v = stack[offset].get_float();
                                cs.set_var_float_checked(id, v);
                            }
                            stack.truncate(name_slot);
                            result.force(ret);
                        }
                        IdentClass::Svar => {
                            if callargs == 0 {
                                cs.print_var(id)?;
                            } else {
                                let v = stack[offset].get_str();
                                cs.set_var_str_checked(id, &v);
                            }
                            stack.truncate(name_slot);
                            result.force(ret);
                        }
                        IdentClass::Alias => {
                            if id < MAX_ARGUMENTS && !cs.is_arg_used(id) {
                                stack.truncate(name_slot);
                                result.force(ret);
                            } else if cs.alias_value(id).is_null() {
                                if is_numeric_name(&name) {
                                    *result = stack[name_slot].clone();
                                    result.force(ret);
                                } else {
                                    cs.diagnostic(format!("unknown command: {name}"));
                                    result.force_null();
                                    result.force(ret);
                                }
                                stack.truncate(name_slot);
                            } else {
                                result.force_null();
                                let r = exec_alias(cs, id, &mut stack[offset..], result, ret);
                                stack.truncate(name_slot);
                                r?;
                            }
                        }
                    },
                }
            }
        }
    }
}
