//! Block compilation: `@`-substitution against bracket depth, verbatim
//! block text, and parser recovery diagnostics.

use cubescript_compiler::{compile, compile_rc};
use cubescript_core::bcode::{payload, CodeRef, Op, RetType, OP_MASK};
use cubescript_core::state::CsState;
use cubescript_core::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Decode a block into its opcode sequence and the string constants the
/// instructions reference, skipping the out-of-line literal words that
/// follow `Val` int/float instructions.
fn walk(code: &CodeRef) -> (Vec<Op>, Vec<String>) {
    let block = code.block();
    let words = block.code();
    let mut ops = Vec::new();
    let mut consts = Vec::new();
    let mut pc = 0;
    while pc < words.len() {
        let w = words[pc];
        pc += 1;
        let op = Op::of(w & OP_MASK).expect("well-formed instruction stream");
        match op {
            Op::Val => match RetType::of(w) {
                RetType::Str => consts.push(block.const_str(payload(w)).to_string()),
                RetType::Int | RetType::Float => pc += 2,
                RetType::Null => {}
            },
            Op::Macro => consts.push(block.const_str(payload(w)).to_string()),
            _ => {}
        }
        ops.push(op);
    }
    (ops, consts)
}

/// Route diagnostics into a buffer the test can inspect.
fn capture_sink(cs: &mut CsState) -> Rc<RefCell<Vec<String>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    cs.set_error_sink(Rc::new(move |msg: &str| {
        sink.borrow_mut().push(msg.to_string());
    }));
    log
}

fn state() -> (CsState, Rc<RefCell<Vec<String>>>) {
    let mut cs = CsState::new();
    let log = capture_sink(&mut cs);
    (cs, log)
}

#[test]
fn substitution_at_matching_depth() {
    let (mut cs, log) = state();
    cs.set_alias("y", Value::from("7"));
    let code = compile(&mut cs, "x = [val @y]");
    let (ops, consts) = walk(&code);
    // the literal prefix and the alias lookup get concatenated
    assert!(ops.contains(&Op::LookupM));
    assert!(ops.contains(&Op::ConcW));
    assert!(consts.iter().any(|c| c == "val "));
    assert!(log.borrow().is_empty());
}

#[test]
fn substitution_specializes_on_ident_kind() {
    let (mut cs, _log) = state();
    cs.new_ivar("num", 0, 100, 3).unwrap();
    cs.new_svar("motd", "hi").unwrap();
    cs.new_command("cmdx", "", |_, _, _| Ok(())).unwrap();

    let (ops, _) = walk(&compile(&mut cs, "x = [v @num]"));
    assert!(ops.contains(&Op::Ivar));

    let (ops, _) = walk(&compile(&mut cs, "x = [v @motd]"));
    assert!(ops.contains(&Op::SvarM));

    // commands fall back to a late-bound lookup of the pushed name
    let (ops, consts) = walk(&compile(&mut cs, "x = [v @cmdx]"));
    assert!(ops.contains(&Op::LookupMU));
    assert!(consts.iter().any(|c| c == "cmdx"));
}

#[test]
fn single_at_below_nested_depth_stays_literal() {
    let (mut cs, log) = state();
    cs.set_alias("x", Value::from("1"));
    let code = compile(&mut cs, "y = [[@x]]");
    let (ops, consts) = walk(&code);
    // one `@` inside two brackets belongs to the inner block's text
    assert!(consts.iter().any(|c| c == "[@x]"));
    assert!(!ops.contains(&Op::LookupM));
    assert!(!ops.contains(&Op::LookupMU));
    assert!(!ops.contains(&Op::ConcW));
    assert!(log.borrow().is_empty());
}

#[test]
fn double_at_reaches_through_nested_depth() {
    let (mut cs, log) = state();
    cs.set_alias("v", Value::from("7"));
    let code = compile(&mut cs, "y = [[inner @@v]]");
    let (ops, consts) = walk(&code);
    assert!(ops.contains(&Op::LookupM));
    assert!(ops.contains(&Op::ConcW));
    assert!(consts.iter().any(|c| c == "[inner "));
    assert!(log.borrow().is_empty());
}

#[test]
fn too_many_ats_diagnosed_but_still_substituted() {
    let (mut cs, log) = state();
    cs.set_alias("v", Value::from("7"));
    let code = compile(&mut cs, "y = [a @@v]");
    let (ops, _) = walk(&code);
    assert!(log.borrow().iter().any(|m| m.contains("too many @s")));
    assert!(ops.contains(&Op::LookupM));
}

#[test]
fn paren_substitution_compiles_inline_expression() {
    let (mut cs, _log) = state();
    let code = compile(&mut cs, "y = [v @(w 1)]");
    let (ops, _) = walk(&code);
    // the parenthesized target runs as a statement, late-bound here
    assert!(ops.contains(&Op::CallU));
    assert!(ops.contains(&Op::ConcW));
}

#[test]
fn bracket_substitution_is_late_bound_lookup() {
    let (mut cs, _log) = state();
    let code = compile(&mut cs, "y = [v @[w]]");
    let (ops, _) = walk(&code);
    assert!(ops.contains(&Op::LookupMU));
}

#[test]
fn missing_bracket_diagnosed_and_recovered() {
    let (mut cs, log) = state();
    let _ = compile(&mut cs, "y = [never closed");
    assert!(log.borrow().iter().any(|m| m.contains("missing \"]\"")));
    // the state stays usable for the next chunk
    log.borrow_mut().clear();
    let _ = compile(&mut cs, "ok = 1");
    assert!(log.borrow().is_empty());
}

#[test]
fn missing_paren_diagnosed() {
    let (mut cs, log) = state();
    let _ = compile(&mut cs, "(1 2");
    assert!(log.borrow().iter().any(|m| m.contains("missing \")\"")));
}

#[test]
fn unexpected_closer_diagnosed() {
    let (mut cs, log) = state();
    let _ = compile(&mut cs, "x = 1; ]");
    assert!(log.borrow().iter().any(|m| m.contains("unexpected \"]\"")));
}

#[test]
fn quoted_strings_are_opaque_to_the_block_scan() {
    let (mut cs, log) = state();
    let code = compile(&mut cs, "y = [a \"]\" b]");
    let (_, consts) = walk(&code);
    // the quoted closer does not terminate the block and stays verbatim
    assert!(consts.iter().any(|c| c == "a \"]\" b"));
    assert!(log.borrow().is_empty());
}

#[test]
fn block_text_strips_comments_and_carriage_returns() {
    let (mut cs, _log) = state();
    let (_, consts) = walk(&compile(&mut cs, "y = [a // note\nb]"));
    assert!(consts.iter().any(|c| c == "a \nb"));

    let (_, consts) = walk(&compile(&mut cs, "y = [a\r b]"));
    assert!(consts.iter().any(|c| c == "a b"));
}

#[test]
fn diagnostics_carry_file_and_line() {
    let (mut cs, log) = state();
    let src: Rc<str> = Rc::from("ok\ny = [broken");
    cs.set_source(Some(Rc::from("boot.cfg")), Some(src.clone()));
    let _ = compile_rc(&mut cs, src, RetType::Null);
    assert!(
        log.borrow()
            .iter()
            .any(|m| m.starts_with("boot.cfg:2:") && m.contains("missing \"]\"")),
        "got diagnostics: {:?}",
        log.borrow()
    );
}
