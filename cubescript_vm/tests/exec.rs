//! End-to-end interpreter tests: source text in, value out.

use cubescript_core::state::CsState;
use cubescript_core::value::Value;
use cubescript_core::{CsInt, IDF_HEX, IDF_OVERRIDE};
use cubescript_vm::{init_libs, run, run_file, run_int, run_str, LIB_ALL};
use std::rc::Rc;

fn state() -> CsState {
    let mut cs = CsState::new();
    // tests must not depend on a logging subscriber
    cs.set_error_sink(Rc::new(|_| {}));
    init_libs(&mut cs, LIB_ALL).expect("stdlib registers");
    cs
}

#[test]
fn empty_program_returns_null() {
    let mut cs = state();
    assert!(run(&mut cs, "").unwrap().is_null());
}

#[test]
fn variadic_addition() {
    let mut cs = state();
    assert_eq!(run_int(&mut cs, "+ 1 2 3").unwrap(), 6);
    assert_eq!(run_int(&mut cs, "+ 10").unwrap(), 10);
    assert_eq!(run_int(&mut cs, "+").unwrap(), 0);
    assert_eq!(run_int(&mut cs, "- 5").unwrap(), -5);
    assert_eq!(run_int(&mut cs, "* 2 3 4").unwrap(), 24);
}

#[test]
fn alias_value_feeds_lookup() {
    let mut cs = state();
    let v = run(&mut cs, "alias x 10; * $x $x").unwrap();
    assert_eq!(v.get_int(), 100);
}

#[test]
fn if_selects_branch() {
    let mut cs = state();
    assert_eq!(
        &*run_str(&mut cs, "if 1 [result yes] [result no]").unwrap(),
        "yes"
    );
    assert_eq!(
        &*run_str(&mut cs, "if 0 [result yes] [result no]").unwrap(),
        "no"
    );
    // single-branch form
    assert_eq!(&*run_str(&mut cs, "if 1 [result only]").unwrap(), "only");
    assert!(run(&mut cs, "if 0 [result only]").unwrap().is_null());
}

#[test]
fn loopconcat_squares() {
    let mut cs = state();
    assert_eq!(
        &*run_str(&mut cs, "loopconcat i 3 [* $i $i]").unwrap(),
        "0 1 4"
    );
}

#[test]
fn or_short_circuits_through_blocks() {
    let mut cs = state();
    assert_eq!(run_int(&mut cs, "|| 0 [+ 1 2] 99").unwrap(), 3);
    assert_eq!(run_int(&mut cs, "&& 1 2 3").unwrap(), 3);
    assert_eq!(run_int(&mut cs, "&& 1 0 3").unwrap(), 0);
    assert_eq!(run_int(&mut cs, "||").unwrap(), 0);
    assert_eq!(run_int(&mut cs, "&&").unwrap(), 1);
}

#[test]
fn int_var_clamps_to_range() {
    let mut cs = state();
    let v = cs.new_ivar("v", 0, 100, 5).unwrap();
    run(&mut cs, "v 250").unwrap();
    assert_eq!(cs.ivar_value(v), 100);
    run(&mut cs, "v -3").unwrap();
    assert_eq!(cs.ivar_value(v), 0);
    // printing does not disturb the value
    run(&mut cs, "v").unwrap();
    assert_eq!(cs.get_var_int("v"), Some(0));
}

#[test]
fn hex_var_accepts_triplet() {
    let mut cs = state();
    let v = cs
        .new_ivar_with("tint", 0, 0xFFFFFF, 0, None, IDF_HEX)
        .unwrap();
    run(&mut cs, "tint 255 128 1").unwrap();
    assert_eq!(cs.ivar_value(v), (255 << 16) | (128 << 8) | 1);
}

#[test]
fn assignment_syntax() {
    let mut cs = state();
    assert_eq!(&*run_str(&mut cs, "x = 5; result $x").unwrap(), "5");
    let v = cs.new_ivar("speed", 0, 10, 1).unwrap();
    run(&mut cs, "speed = 7").unwrap();
    assert_eq!(cs.ivar_value(v), 7);
}

#[test]
fn result_has_no_side_effects() {
    let mut cs = state();
    run(&mut cs, "x = 9").unwrap();
    assert_eq!(&*run_str(&mut cs, "result $x").unwrap(), "9");
    assert_eq!(cs.get_alias_val("x").as_deref(), Some("9"));
}

#[test]
fn alias_arguments_and_numargs() {
    let mut cs = state();
    assert_eq!(
        run_int(&mut cs, "alias f [+ $arg1 $arg2]; f 30 12").unwrap(),
        42
    );
    assert_eq!(
        run_int(&mut cs, "alias argc [result $numargs]; argc a b c").unwrap(),
        3
    );
    // bindings restored after the call
    assert_eq!(run_int(&mut cs, "argc x").unwrap(), 1);
}

#[test]
fn doargs_restores_caller_frame() {
    let mut cs = state();
    let v = run_str(
        &mut cs,
        "alias callee [doargs [result $arg1]]; alias caller [callee]; caller hello",
    )
    .unwrap();
    assert_eq!(&*v, "hello");
}

#[test]
fn local_shadows_until_block_end() {
    let mut cs = state();
    assert_eq!(
        &*run_str(&mut cs, "x = 5; local x; x = 3; result $x").unwrap(),
        "3"
    );
    assert_eq!(cs.get_alias_val("x").as_deref(), Some("5"));
}

#[test]
fn push_scopes_a_binding() {
    let mut cs = state();
    run(&mut cs, "v = old").unwrap();
    assert_eq!(&*run_str(&mut cs, "push v new [result $v]").unwrap(), "new");
    assert_eq!(cs.get_alias_val("v").as_deref(), Some("old"));
}

#[test]
fn break_and_continue() {
    let mut cs = state();
    assert_eq!(
        run_int(
            &mut cs,
            "acc = 0; loop i 10 [if (= $i 3) [break]; acc = (+ $acc 1)]; result $acc"
        )
        .unwrap(),
        3
    );
    assert_eq!(
        run_int(
            &mut cs,
            "acc = 0; i = 0; while [< $i 5] [i = (+ $i 1); if (= $i 3) [continue]; acc = (+ $acc $i)]; result $acc"
        )
        .unwrap(),
        12
    );
    assert!(run(&mut cs, "break").is_err());
    assert!(run(&mut cs, "continue").is_err());
}

#[test]
fn recursion_limit_aborts() {
    let mut cs = state();
    cs.set_max_call_depth(20);
    let err = run(&mut cs, "alias f [f]; f").unwrap_err();
    assert!(err.to_string().contains("recursion"));
    // the state stays usable afterwards
    assert_eq!(run_int(&mut cs, "+ 1 1").unwrap(), 2);
}

#[test]
fn ternary_and_not() {
    let mut cs = state();
    assert_eq!(run_int(&mut cs, "? 1 10 20").unwrap(), 10);
    assert_eq!(run_int(&mut cs, "? 0 10 20").unwrap(), 20);
    assert_eq!(run_int(&mut cs, "! 0").unwrap(), 1);
    assert_eq!(run_int(&mut cs, "! yes").unwrap(), 0);
}

#[test]
fn cond_and_case() {
    let mut cs = state();
    assert_eq!(
        &*run_str(
            &mut cs,
            "cond [= 1 2] [result a] [= 2 2] [result b] [result c]"
        )
        .unwrap(),
        "b"
    );
    assert_eq!(
        &*run_str(&mut cs, "case 2 1 [result one] 2 [result two]").unwrap(),
        "two"
    );
    assert_eq!(
        &*run_str(&mut cs, "case 5 1 [result one] () [result other]").unwrap(),
        "other"
    );
    assert_eq!(
        &*run_str(&mut cs, "cases b a [result first] b [result second]").unwrap(),
        "second"
    );
}

#[test]
fn string_commands() {
    let mut cs = state();
    assert_eq!(run_int(&mut cs, "strlen [hello]").unwrap(), 5);
    assert_eq!(run_int(&mut cs, "strstr [hello world] world").unwrap(), 6);
    assert_eq!(run_int(&mut cs, "strstr [hello] zzz").unwrap(), -1);
    assert_eq!(&*run_str(&mut cs, "strupper [mixed Case]").unwrap(), "MIXED CASE");
    assert_eq!(&*run_str(&mut cs, "substr [abcdef] 2 3").unwrap(), "cde");
    assert_eq!(&*run_str(&mut cs, "substr [abcdef] 2").unwrap(), "cdef");
    assert_eq!(&*run_str(&mut cs, "concat a b c").unwrap(), "a b c");
    assert_eq!(&*run_str(&mut cs, "concatword a b c").unwrap(), "abc");
    assert_eq!(
        &*run_str(&mut cs, "format \"x=%1 y=%2\" 10 20").unwrap(),
        "x=10 y=20"
    );
    assert_eq!(&*run_str(&mut cs, "tohex 255 4").unwrap(), "0x00FF");
    assert_eq!(
        &*run_str(&mut cs, "strreplace [a.b.c] . -").unwrap(),
        "a-b-c"
    );
    assert_eq!(run_int(&mut cs, "=s abc abc").unwrap(), 1);
    assert_eq!(run_int(&mut cs, "<s abc abd").unwrap(), 1);
}

#[test]
fn escape_then_unescape_is_identity() {
    let mut cs = state();
    assert_eq!(
        &*run_str(&mut cs, "unescape (escape [hi there])").unwrap(),
        "hi there"
    );
    assert_eq!(
        &*run_str(&mut cs, "unescape (escape \"a^nb\")").unwrap(),
        "a\nb"
    );
    assert_eq!(&*run_str(&mut cs, "unescape (escape [])").unwrap(), "");
}

#[test]
fn list_commands() {
    let mut cs = state();
    assert_eq!(run_int(&mut cs, "listlen [a \"b c\" d]").unwrap(), 3);
    assert_eq!(&*run_str(&mut cs, "at [a b c] 1").unwrap(), "b");
    assert_eq!(&*run_str(&mut cs, "at [\"x y\" z] 0").unwrap(), "x y");
    assert_eq!(&*run_str(&mut cs, "sublist [a b c d] 1 2").unwrap(), "b c");
    assert_eq!(&*run_str(&mut cs, "sublist [a b c d] 2").unwrap(), "c d");
    assert_eq!(run_int(&mut cs, "indexof [a b c] b").unwrap(), 1);
    assert_eq!(run_int(&mut cs, "indexof [a b c] z").unwrap(), -1);
    assert_eq!(run_int(&mut cs, "listfind= [10 20 30] 20 0").unwrap(), 1);
    assert_eq!(
        &*run_str(&mut cs, "listassoc=s [a 1 b 2] b").unwrap(),
        "2"
    );
    assert_eq!(&*run_str(&mut cs, "listdel [a b c] [b]").unwrap(), "a c");
    assert_eq!(
        &*run_str(&mut cs, "listintersect [a b c] [b c d]").unwrap(),
        "b c"
    );
    assert_eq!(
        &*run_str(&mut cs, "listunion [a b] [b c]").unwrap(),
        "a b c"
    );
    assert_eq!(
        &*run_str(&mut cs, "listsplice [a b c d] [x y] 1 2").unwrap(),
        "a x y d"
    );
    assert_eq!(
        &*run_str(&mut cs, "prettylist [a b c] and").unwrap(),
        "a, b, and c"
    );
}

#[test]
fn at_extra_indices_stay_on_the_top_level_list() {
    let mut cs = state();
    // every index re-reads the whole list; the last one wins
    assert_eq!(
        &*run_str(&mut cs, "at [(a b) (c d)] 1 0").unwrap(),
        "a b"
    );
    assert_eq!(&*run_str(&mut cs, "at [a b c] 2 1").unwrap(), "b");
    // an out-of-range final index leaves nothing
    assert_eq!(&*run_str(&mut cs, "at [a b c] 0 9").unwrap(), "");
}

#[test]
fn list_iteration() {
    let mut cs = state();
    assert_eq!(
        run_int(&mut cs, "acc = 0; looplist v [1 2 3] [acc = (+ $acc $v)]; result $acc")
            .unwrap(),
        6
    );
    assert_eq!(
        &*run_str(&mut cs, "looplistconcat v [1 2 3] [+ $v 1]").unwrap(),
        "2 3 4"
    );
    assert_eq!(
        &*run_str(&mut cs, "listfilter v [1 2 3 4] [> $v 2]").unwrap(),
        "3 4"
    );
    assert_eq!(run_int(&mut cs, "listcount v [1 2 3 4] [> $v 2]").unwrap(), 2);
    assert_eq!(
        &*run_str(&mut cs, "looplist2 a b [k1 v1 k2 v2] []").unwrap(),
        ""
    );
    assert_eq!(run_int(&mut cs, "listfind v [5 6 7] [= $v 6]").unwrap(), 1);
}

#[test]
fn sortlist_and_uniquelist() {
    let mut cs = state();
    assert_eq!(
        &*run_str(&mut cs, "sortlist [3 1 2] a b [< $a $b]").unwrap(),
        "1 2 3"
    );
    assert_eq!(
        &*run_str(&mut cs, "uniquelist [a b a c b] x y [=s $x $y]").unwrap(),
        "a b c"
    );
}

#[test]
fn math_commands() {
    let mut cs = state();
    assert_eq!(run_int(&mut cs, "div 7 2").unwrap(), 3);
    assert_eq!(run_int(&mut cs, "mod 7 3").unwrap(), 1);
    assert_eq!(run_int(&mut cs, "div 7 0").unwrap(), 0);
    assert_eq!(run_int(&mut cs, "min 4 2 9").unwrap(), 2);
    assert_eq!(run_int(&mut cs, "max 4 2 9").unwrap(), 9);
    assert_eq!(run_int(&mut cs, "abs -5").unwrap(), 5);
    assert_eq!(run_int(&mut cs, "< 1 2 3").unwrap(), 1);
    assert_eq!(run_int(&mut cs, "< 1 3 2").unwrap(), 0);
    assert_eq!(run_int(&mut cs, "<< 1 4").unwrap(), 16);
    assert_eq!(run_int(&mut cs, "& 12 10").unwrap(), 8);
    let f = cubescript_vm::run_float(&mut cs, "divf 1 2").unwrap();
    assert!((f - 0.5).abs() < 1e-9);
    let s = cubescript_vm::run_float(&mut cs, "sin 90").unwrap();
    assert!((s - 1.0).abs() < 1e-6);
}

#[test]
fn macro_blocks_keep_source_verbatim() {
    let mut cs = state();
    // no escape processing happens inside brackets
    assert_eq!(
        &*run_str(&mut cs, "x = [a ^n b]; result $x").unwrap(),
        "a ^n b"
    );
}

#[test]
fn block_substitution() {
    let mut cs = state();
    assert_eq!(
        &*run_str(&mut cs, "x = 7; y = [val @x]; result $y").unwrap(),
        "val 7"
    );
    assert_eq!(
        &*run_str(&mut cs, "n = 3; loopconcat i 2 [(+ @n $i)]").unwrap(),
        "3 4"
    );
}

#[test]
fn chained_lookup() {
    let mut cs = state();
    assert_eq!(&*run_str(&mut cs, "x = y; y = 42; result $$x").unwrap(), "42");
}

#[test]
fn numeric_statement_is_its_own_result() {
    let mut cs = state();
    assert_eq!(run_int(&mut cs, "42").unwrap(), 42);
    assert_eq!(run_int(&mut cs, "0x10").unwrap(), 16);
}

#[test]
fn unknown_command_is_reported_not_fatal() {
    let mut cs = state();
    // late-bound unknown names produce a diagnostic and a null result
    let v = run(&mut cs, "never-defined 1 2").unwrap();
    assert!(v.is_null());
}

#[test]
fn numeric_alias_name_is_rejected() {
    let mut cs = state();
    run(&mut cs, "alias 123 x").unwrap();
    assert!(!cs.have_ident("123"));
}

#[test]
fn override_and_resetvar() {
    let mut cs = state();
    let v = cs
        .new_ivar_with("ov", 0, 100, 10, None, IDF_OVERRIDE)
        .unwrap();
    run(&mut cs, "ov 50").unwrap();
    assert_eq!(cs.ivar_value(v), 50);
    run(&mut cs, "resetvar ov").unwrap();
    assert_eq!(cs.ivar_value(v), 10);
}

#[test]
fn var_introspection_commands() {
    let mut cs = state();
    cs.new_ivar("bounded", -5, 5, 0).unwrap();
    assert_eq!(run_int(&mut cs, "getvarmin bounded").unwrap(), -5);
    assert_eq!(run_int(&mut cs, "getvarmax bounded").unwrap(), 5);
    assert_eq!(run_int(&mut cs, "identexists bounded").unwrap(), 1);
    assert_eq!(run_int(&mut cs, "identexists missing").unwrap(), 0);
    run(&mut cs, "g = 77").unwrap();
    assert_eq!(&*run_str(&mut cs, "getalias g").unwrap(), "77");
}

#[test]
fn quoted_strings_unescape() {
    let mut cs = state();
    assert_eq!(&*run_str(&mut cs, "result \"a^tb\"").unwrap(), "a\tb");
    assert_eq!(&*run_str(&mut cs, "result \"hello world\"").unwrap(), "hello world");
    // unterminated strings end at the line break
    assert_eq!(&*run_str(&mut cs, "result \"abc").unwrap(), "abc");
}

#[test]
fn comments_are_skipped() {
    let mut cs = state();
    assert_eq!(run_int(&mut cs, "+ 1 2 // + 10 20").unwrap(), 3);
    assert_eq!(run_int(&mut cs, "// nothing\n+ 2 2").unwrap(), 4);
}

#[test]
fn call_hook_runs_and_can_abort() {
    use std::cell::Cell;
    let mut cs = state();
    let count = Rc::new(Cell::new(0usize));
    let count2 = count.clone();
    cs.set_call_hook(Some(Rc::new(move |_| {
        count2.set(count2.get() + 1);
        Ok(())
    })));
    run_int(&mut cs, "+ 1 2").unwrap();
    assert!(count.get() > 0);

    cs.set_call_hook(Some(Rc::new(|cs| Err(cs.error("aborted by hook")))));
    assert!(run(&mut cs, "result 1").is_err());
    cs.set_call_hook(None);
}

#[test]
fn sibling_thread_shares_table() {
    let mut cs = state();
    run(&mut cs, "shared = 11").unwrap();
    let mut sib = cs.new_thread();
    assert_eq!(run_int(&mut sib, "result $shared").unwrap(), 11);
}

#[test]
fn run_ident_invokes_commands_and_aliases() {
    let mut cs = state();
    let plus = cs.get_ident("+").unwrap();
    let v = cubescript_vm::run_ident(
        &mut cs,
        plus,
        &mut [Value::Int(2), Value::Int(3)],
    )
    .unwrap();
    assert_eq!(v.get_int(), 5);

    run(&mut cs, "alias double [* $arg1 2]").unwrap();
    let dbl = cs.get_ident("double").unwrap();
    let v = cubescript_vm::run_ident(&mut cs, dbl, &mut [Value::Int(21)]).unwrap();
    assert_eq!(v.get_int(), 42);
}

#[test]
fn exec_runs_files() {
    let mut cs = state();
    let path = std::env::temp_dir().join(format!(
        "cubescript-test-{}.cfg",
        std::process::id()
    ));
    std::fs::write(&path, "fromfile = 123\n").unwrap();
    assert!(run_file(&mut cs, &path).unwrap());
    assert_eq!(cs.get_alias_val("fromfile").as_deref(), Some("123"));
    std::fs::remove_file(&path).ok();
    assert!(!run_file(&mut cs, "/definitely/not/here.cfg").unwrap());
}

#[test]
fn nested_parens_respect_result_headroom() {
    let mut cs = state();
    // deep nesting forces enter/exit framing past the result headroom
    assert_eq!(
        run_int(&mut cs, "+ 1 (+ 1 (+ 1 (+ 1 (+ 1 (+ 1 (+ 1 (+ 1 1)))))))").unwrap(),
        9
    );
}

#[test]
fn loop_variants() {
    let mut cs = state();
    assert_eq!(
        &*run_str(&mut cs, "loopconcat+ i 5 3 [result $i]").unwrap(),
        "5 6 7"
    );
    assert_eq!(
        &*run_str(&mut cs, "loopconcat* i 2 3 [result $i]").unwrap(),
        "0 2 4"
    );
    assert_eq!(
        &*run_str(&mut cs, "loopconcat+* i 1 2 3 [result $i]").unwrap(),
        "1 3 5"
    );
    assert_eq!(
        run_int(
            &mut cs,
            "acc = 0; loopwhile i 10 [< $i 4] [acc = (+ $acc 1)]; result $acc"
        )
        .unwrap(),
        4
    );
}

#[test]
fn argument_count_is_bounded() {
    let mut cs = state();
    // more words than argument slots; the extras are dropped, not a crash
    let many = (0..40).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
    let v = run(&mut cs, &format!("concat {many}"));
    assert!(v.is_ok());
}

#[test]
fn ident_index_stability() {
    let mut cs = state();
    let before = cs.get_ident("+").unwrap();
    for i in 0..200 {
        run(&mut cs, &format!("gen{i} = {i}")).unwrap();
    }
    assert_eq!(cs.get_ident("+").unwrap(), before);
    let total = cs.ident_count();
    assert!(total >= 200);
    let _: CsInt = run_int(&mut cs, "+ 1 1").unwrap();
}
