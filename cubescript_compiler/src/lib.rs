//! Source-to-bytecode compiler for cubescript.
//!
//! Turns source text into the 32-bit instruction stream executed by
//! `cubescript_vm`. The compiler consults the interpreter state while
//! emitting: known identifiers specialize the generated call and access
//! instructions, and names seen for the first time are entered into the
//! table as unknown aliases so bytecode can address them by index.

#![allow(clippy::new_without_default)]

mod compile;
pub mod gen;

pub use gen::{compile, compile_rc, compile_ret, force_code, force_cond, GenState, WordType};

#[cfg(test)]
mod tests {
    use super::*;
    use cubescript_core::bcode::{Op, RetType};
    use cubescript_core::state::CsState;

    fn ops(code: &cubescript_core::CodeRef) -> Vec<Op> {
        code.block()
            .code()
            .iter()
            .filter_map(|w| Op::of(*w))
            .collect()
    }

    #[test]
    fn empty_program_is_start_exit() {
        let mut cs = CsState::new();
        let code = compile(&mut cs, "");
        assert_eq!(ops(&code), vec![Op::Start, Op::Exit]);
    }

    #[test]
    fn exit_carries_requested_ret() {
        let mut cs = CsState::new();
        let code = compile_ret(&mut cs, "", RetType::Int);
        let last = *code.block().code().last().unwrap();
        assert_eq!(Op::of(last), Some(Op::Exit));
        assert_eq!(RetType::of(last), RetType::Int);
    }

    #[test]
    fn unknown_name_compiles_late_bound_call() {
        let mut cs = CsState::new();
        let code = compile(&mut cs, "frobnicate 1 2");
        assert!(ops(&code).contains(&Op::CallU));
        // a plain call does not force the ident into existence
        assert!(!cs.have_ident("frobnicate"));
    }

    #[test]
    fn known_ivar_statement_prints_or_assigns() {
        let mut cs = CsState::new();
        cs.new_ivar("volume", 0, 100, 5).unwrap();
        let print = compile(&mut cs, "volume");
        assert!(ops(&print).contains(&Op::Print));
        let assign = compile(&mut cs, "volume 7");
        assert!(ops(&assign).contains(&Op::Ivar1));
    }

    #[test]
    fn assignment_syntax_compiles_alias_store() {
        let mut cs = CsState::new();
        let code = compile(&mut cs, "x = 5");
        assert!(ops(&code).contains(&Op::Alias));
    }

    #[test]
    fn lookup_specializes_on_kind() {
        let mut cs = CsState::new();
        cs.new_ivar("speed", 0, 10, 1).unwrap();
        let code = compile(&mut cs, "echo $speed");
        assert!(ops(&code).contains(&Op::Ivar));
        let code = compile(&mut cs, "echo $someal");
        assert!(ops(&code).iter().any(|o| matches!(o, Op::Lookup | Op::LookupM)));
    }

    #[test]
    fn block_as_value_stays_text() {
        let mut cs = CsState::new();
        // a block bound to an alias is kept verbatim for deferred compilation
        let code = compile(&mut cs, "x = [echo hi]");
        let o = ops(&code);
        assert!(o.contains(&Op::Val));
        assert!(o.contains(&Op::Alias));
    }

    #[test]
    fn block_in_code_position_compiles_inline() {
        let mut cs = CsState::new();
        cs.new_command("runit", "e", |_, _, _| Ok(())).unwrap();
        let code = compile(&mut cs, "runit [echo hi]");
        let o = ops(&code);
        assert!(o.contains(&Op::Block));
        assert!(o.contains(&Op::Offset));
    }

    #[test]
    fn missing_bracket_recovers() {
        let mut cs = CsState::new();
        // must not panic or loop; a diagnostic goes to the sink
        let _ = compile(&mut cs, "x = [never closed");
        let _ = compile(&mut cs, "(1 2");
    }
}
