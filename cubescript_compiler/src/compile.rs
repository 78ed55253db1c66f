//! The context-sensitive word compiler.
//!
//! Compilation walks statements left to right. The first word of a
//! statement resolves against the identifier table and specializes the
//! emitted call: variable access, alias invocation, command call with
//! per-parameter coercion driven by the command's format string, or a
//! late-bound call when the name is only known at run time. Every other
//! word compiles under the type its consumer expects, which is what the
//! `WordType` parameter threads through these functions.
//!
//! `prevargs` tracks how many values the surrounding expression already
//! holds on the VM stack; once it reaches the reserved result headroom,
//! nested expressions are wrapped in `Enter`/`Exit` frames of their own.

use crate::gen::{GenState, WordType};
use cubescript_core::bcode::{inst, inst0, Op, RetType, RET_MASK};
use cubescript_core::ident::{Builtin, IdentClass};
use cubescript_core::strutil::{find_string_end, find_word_end, unescape_string};
use cubescript_core::value::{is_numeric_name, parse_int_prefix, CsInt};
use cubescript_core::{IDF_HEX, IDF_UNKNOWN, MAX_ARGUMENTS, MAX_RESULTS};
use std::rc::Rc;

/// Outcome of compiling a statement's head word.
enum HeadWord {
    /// Nothing left in this statement.
    None,
    /// An expression was compiled; its value is the command name.
    Expr,
    /// A plain word.
    Word(String),
}

impl GenState<'_> {
    // =========================================================================
    // Scanning
    // =========================================================================

    fn skip_comments(&mut self) {
        loop {
            while matches!(self.current(), b' ' | b'\t' | b'\r') {
                self.next_char();
            }
            if self.current() == b'/' && self.peek(1) == b'/' {
                self.skip_until(b"\n");
            } else {
                break;
            }
        }
    }

    fn cut_string(&mut self) -> String {
        self.next_char();
        let start = self.pos;
        let end = find_string_end(&self.buf, self.pos);
        let raw = self.buf[start..end].to_string();
        self.pos = end;
        if self.current() == b'"' {
            self.next_char();
        }
        unescape_string(&raw)
    }

    fn cut_word(&mut self) -> String {
        let start = self.pos;
        self.pos = find_word_end(&self.buf, self.pos);
        self.buf[start..self.pos].to_string()
    }

    /// Emit a diagnostic tied to a source position; a `file:line:`
    /// prefix is added when the position falls inside the state's
    /// registered source buffer.
    fn diag_at(&mut self, pos: usize, msg: &str) {
        let located = self.cs.source_text().filter(|src| Rc::ptr_eq(src, &self.buf));
        let text = match located {
            Some(src) => {
                let line = 1 + src[..pos.min(src.len())]
                    .bytes()
                    .filter(|b| *b == b'\n')
                    .count();
                match self.cs.source_file() {
                    Some(f) => format!("{f}:{line}: {msg}"),
                    None => format!("{line}: {msg}"),
                }
            }
            None => msg.to_string(),
        };
        self.cs.diagnostic(text);
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    /// Emit a nested instruction range: a `Block` header carrying the
    /// skip length, an `Offset` recording the entry point, the body,
    /// and an `Exit`. Empty bodies collapse to a single `Empty` word.
    fn emit_block(&mut self, ret_bits: u32, body: impl FnOnce(&mut Self)) {
        let start = self.code.len();
        self.code.push(inst0(Op::Block, RetType::Null));
        self.code
            .push(inst(Op::Offset, RetType::Null, (start + 2) as u32));
        body(self);
        if self.code.len() > start + 2 {
            self.code.push(inst0(Op::Exit, RetType::Null) | ret_bits);
            let len = (self.code.len() - (start + 1)) as u32;
            self.code[start] |= len << 8;
        } else {
            self.code.truncate(start);
            self.code.push(inst0(Op::Empty, RetType::Null) | ret_bits);
        }
    }

    /// Compile a detached source fragment as a deferred block.
    pub(crate) fn compile_block_str_src(&mut self, src: &str) {
        let rc: Rc<str> = Rc::from(src);
        self.emit_block(0, |gs| {
            gs.with_source(rc, |gs| gs.compile_statements(WordType::Any, 0, 0));
        });
    }

    /// Emit the text of a block body as a string constant: carriage
    /// returns and comments are stripped, quoted strings pass through
    /// verbatim.
    fn compile_block_str(&mut self, start: usize, end: usize, is_macro: bool) -> bool {
        let buf = self.buf.clone();
        let src = &buf[start..end];
        let b = src.as_bytes();
        let mut out = String::with_capacity(src.len());
        let mut i = 0usize;
        while i < b.len() {
            let mut j = i;
            while j < b.len() && !matches!(b[j], b'\r' | b'/' | b'"' | b'@' | b']') {
                j += 1;
            }
            out.push_str(&src[i..j]);
            if j >= b.len() {
                break;
            }
            match b[j] {
                b'\r' => i = j + 1,
                b'"' => {
                    let e = find_string_end(src, j + 1);
                    let e = if e < b.len() && b[e] == b'"' { e + 1 } else { e };
                    out.push_str(&src[j..e]);
                    i = e;
                }
                b'/' => {
                    if j + 1 < b.len() && b[j + 1] == b'/' {
                        let mut k = j;
                        while k < b.len() && b[k] != b'\n' {
                            k += 1;
                        }
                        i = k;
                    } else {
                        out.push('/');
                        i = j + 1;
                    }
                }
                c => {
                    out.push(c as char);
                    i = j + 1;
                }
            }
        }
        let idx = self.add_const(&out);
        let op = if is_macro { Op::Macro } else { Op::Val };
        self.code.push(inst(op, RetType::Str, idx));
        true
    }

    /// `@`-substitution target inside a `[...]` block.
    fn compile_block_sub(&mut self, prevargs: usize) -> bool {
        match self.current() {
            b'(' => {
                if !self.compile_arg(WordType::CAny, prevargs) {
                    return false;
                }
            }
            b'[' => {
                if !self.compile_arg(WordType::CStr, prevargs) {
                    return false;
                }
                self.code.push(inst0(Op::LookupMU, RetType::Null));
            }
            b'"' => {
                let name = self.cut_string();
                self.block_sub_lookup(&name);
            }
            _ => {
                let start = self.pos;
                while self.current().is_ascii_alphanumeric() || self.current() == b'_' {
                    self.next_char();
                }
                if self.pos == start {
                    return false;
                }
                let name = self.buf[start..self.pos].to_string();
                self.block_sub_lookup(&name);
            }
        }
        true
    }

    fn block_sub_lookup(&mut self, name: &str) {
        let idx = self.cs.new_ident(name, IDF_UNKNOWN);
        let payload = idx as u32;
        match self.cs.ident_class(idx) {
            IdentClass::Ivar => self.code.push(inst(Op::Ivar, RetType::Null, payload)),
            IdentClass::Fvar => self.code.push(inst(Op::Fvar, RetType::Null, payload)),
            IdentClass::Svar => self.code.push(inst(Op::SvarM, RetType::Null, payload)),
            IdentClass::Alias => {
                let op = if idx < MAX_ARGUMENTS {
                    Op::LookupMArg
                } else {
                    Op::LookupM
                };
                self.code.push(inst(op, RetType::Null, payload));
            }
            IdentClass::Command => {
                self.gen_str(name, true);
                self.code.push(inst0(Op::LookupMU, RetType::Null));
            }
        }
    }

    /// Compile a `[...]` block in context `wordtype`; the cursor sits
    /// just past the opening bracket.
    fn compile_block_main(&mut self, wordtype: WordType, prevargs: usize) {
        let line_pos = self.pos;
        let mut start = self.pos;
        let mut concs: usize = 0;
        let mut brak = 1i32;
        let content_end;
        loop {
            self.skip_until(b"@\"/[]");
            match self.next_char() {
                0 => {
                    self.diag_at(line_pos, "missing \"]\"");
                    content_end = self.pos;
                    break;
                }
                b'"' => {
                    self.pos = find_string_end(&self.buf, self.pos);
                    if self.current() == b'"' {
                        self.next_char();
                    }
                }
                b'/' => {
                    if self.current() == b'/' {
                        self.skip_until(b"\n");
                    }
                }
                b'[' => brak += 1,
                b']' => {
                    brak -= 1;
                    if brak == 0 {
                        content_end = self.pos - 1;
                        break;
                    }
                }
                b'@' => {
                    let esc = self.pos - 1;
                    while self.current() == b'@' {
                        self.next_char();
                    }
                    let level = (self.pos - esc) as i32;
                    if brak > level {
                        continue;
                    }
                    if brak < level {
                        self.diag_at(line_pos, "too many @s");
                    }
                    if concs == 0 && prevargs >= MAX_RESULTS {
                        self.code.push(inst0(Op::Enter, RetType::Null));
                    }
                    if concs + 2 > MAX_ARGUMENTS {
                        self.code
                            .push(inst(Op::ConcW, RetType::Str, concs as u32));
                        concs = 1;
                    }
                    if self.compile_block_str(start, esc, true) {
                        concs += 1;
                    }
                    if self.compile_block_sub(prevargs + concs) {
                        concs += 1;
                    }
                    if concs > 0 {
                        start = self.pos;
                    } else if prevargs >= MAX_RESULTS {
                        self.code.pop();
                    }
                }
                _ => unreachable!("skip_until stops at the scanned set"),
            }
        }
        if content_end > start {
            if concs == 0 {
                match wordtype {
                    WordType::Pop => return,
                    WordType::Code | WordType::Cond => {
                        self.pos = start;
                        self.emit_block(0, |gs| {
                            gs.compile_statements(WordType::Any, b']', 0);
                        });
                        return;
                    }
                    WordType::Ident => {
                        let name = self.buf[start..content_end].to_string();
                        self.gen_ident_name(&name);
                        return;
                    }
                    _ => {}
                }
            }
            match wordtype {
                WordType::CStr
                | WordType::Code
                | WordType::Ident
                | WordType::CAny
                | WordType::Cond => {
                    self.compile_block_str(start, content_end, true);
                }
                _ => {
                    self.compile_block_str(start, content_end, concs > 0);
                }
            }
            if concs > 1 {
                concs += 1;
            }
        }
        let rc = wordtype.ret_code(0);
        if concs > 0 {
            if prevargs >= MAX_RESULTS {
                self.code
                    .push(inst(Op::ConcM, RetType::Null, concs as u32) | rc);
                self.code.push(inst0(Op::Exit, RetType::Null) | rc);
            } else {
                self.code
                    .push(inst(Op::ConcW, RetType::Null, concs as u32) | rc);
            }
        }
        let empty = concs == 0 && content_end <= start;
        match wordtype {
            WordType::Pop => {
                if !empty {
                    self.code.push(inst0(Op::Pop, RetType::Null));
                }
            }
            WordType::Cond => {
                if empty {
                    self.gen_null();
                } else {
                    self.code.push(inst0(Op::Cond, RetType::Null));
                }
            }
            WordType::Code => {
                if empty {
                    self.code.push(inst0(Op::Empty, RetType::Null));
                } else {
                    self.code.push(inst0(Op::Compile, RetType::Null));
                }
            }
            WordType::Ident => {
                if empty {
                    self.gen_ident_dummy();
                } else {
                    self.code.push(inst0(Op::IdentU, RetType::Null));
                }
            }
            WordType::CStr | WordType::CAny => {
                if empty {
                    self.gen_str("", true);
                }
            }
            WordType::Str | WordType::Null | WordType::Any | WordType::Word => {
                if empty {
                    self.gen_str_empty();
                }
            }
            WordType::Int | WordType::Float => {
                if concs == 0 {
                    if content_end <= start {
                        self.gen_value(wordtype, "");
                    } else {
                        self.code.push(inst0(Op::Force, RetType::Null) | rc);
                    }
                }
            }
        }
    }

    // =========================================================================
    // Lookups ($name and friends)
    // =========================================================================

    fn compile_lookup(&mut self, ltype: WordType, prevargs: usize) {
        self.next_char();
        let name = match self.current() {
            b'(' | b'[' => {
                if !self.compile_arg(WordType::CStr, prevargs) {
                    return self.lookup_invalid(ltype);
                }
                self.lookup_unknown_tail(ltype);
                self.lookup_done_tail(ltype);
                return;
            }
            b'$' => {
                self.compile_lookup(WordType::CStr, prevargs);
                self.lookup_unknown_tail(ltype);
                self.lookup_done_tail(ltype);
                return;
            }
            b'"' => self.cut_string(),
            _ => {
                let w = self.cut_word();
                if w.is_empty() {
                    return self.lookup_invalid(ltype);
                }
                w
            }
        };
        self.lookup_id(ltype, prevargs, &name);
    }

    fn lookup_id(&mut self, ltype: WordType, prevargs: usize, name: &str) {
        let idx = self.cs.new_ident(name, IDF_UNKNOWN);
        let payload = idx as u32;
        match self.cs.ident_class(idx) {
            IdentClass::Ivar => {
                self.code.push(
                    inst(Op::Ivar, RetType::Null, payload)
                        | ltype.ret_code(RetType::Int.bits()),
                );
                match ltype {
                    WordType::Pop => {
                        self.code.pop();
                    }
                    WordType::Code => self.code.push(inst0(Op::Compile, RetType::Null)),
                    WordType::Ident => self.code.push(inst0(Op::IdentU, RetType::Null)),
                    _ => {}
                }
            }
            IdentClass::Fvar => {
                self.code.push(
                    inst(Op::Fvar, RetType::Null, payload)
                        | ltype.ret_code(RetType::Float.bits()),
                );
                match ltype {
                    WordType::Pop => {
                        self.code.pop();
                    }
                    WordType::Code => self.code.push(inst0(Op::Compile, RetType::Null)),
                    WordType::Ident => self.code.push(inst0(Op::IdentU, RetType::Null)),
                    _ => {}
                }
            }
            IdentClass::Svar => {
                match ltype {
                    WordType::Pop => return,
                    WordType::CAny
                    | WordType::CStr
                    | WordType::Code
                    | WordType::Ident
                    | WordType::Cond => {
                        self.code.push(inst(Op::SvarM, RetType::Null, payload));
                    }
                    _ => self.code.push(
                        inst(Op::Svar, RetType::Null, payload)
                            | ltype.ret_code(RetType::Str.bits()),
                    ),
                }
                self.lookup_done_tail(ltype);
            }
            IdentClass::Alias => {
                let is_arg = idx < MAX_ARGUMENTS;
                match ltype {
                    WordType::Pop => return,
                    WordType::CAny | WordType::Cond => {
                        let op = if is_arg { Op::LookupMArg } else { Op::LookupM };
                        self.code.push(inst(op, RetType::Null, payload));
                    }
                    WordType::CStr | WordType::Code | WordType::Ident => {
                        let op = if is_arg { Op::LookupMArg } else { Op::LookupM };
                        self.code.push(inst(op, RetType::Str, payload));
                    }
                    _ => {
                        let op = if is_arg { Op::LookupArg } else { Op::Lookup };
                        self.code.push(
                            inst(op, RetType::Null, payload)
                                | ltype.ret_code(RetType::Str.bits()),
                        );
                    }
                }
                self.lookup_done_tail(ltype);
            }
            IdentClass::Command => {
                if self.cs.ident_builtin(idx).is_some() {
                    return self.lookup_invalid(ltype);
                }
                self.lookup_command(ltype, prevargs, idx);
            }
        }
    }

    /// A command referenced in lookup position is called inline with
    /// synthesized default arguments.
    fn lookup_command(&mut self, ltype: WordType, prevargs: usize, idx: usize) {
        let fmt = self.cs.command_fmt(idx).unwrap_or_else(|| Rc::from(""));
        let mut comtype = Op::Com;
        let mut numargs: u32 = 0;
        let mut variadic = false;
        if prevargs >= MAX_RESULTS {
            self.code.push(inst0(Op::Enter, RetType::Null));
        }
        for c in fmt.bytes() {
            match c {
                b'S' => {
                    self.gen_str_empty();
                    numargs += 1;
                }
                b's' => {
                    self.gen_str("", true);
                    numargs += 1;
                }
                b'i' => {
                    self.gen_int(0);
                    numargs += 1;
                }
                b'b' => {
                    self.gen_int(CsInt::MIN);
                    numargs += 1;
                }
                b'f' => {
                    self.gen_float(0.0);
                    numargs += 1;
                }
                b'F' => {
                    self.code.push(inst0(Op::Dup, RetType::Float));
                    numargs += 1;
                }
                b'E' | b'T' | b't' => {
                    self.gen_null();
                    numargs += 1;
                }
                b'e' => {
                    self.code.push(inst0(Op::Empty, RetType::Null));
                    numargs += 1;
                }
                b'r' => {
                    self.gen_ident_dummy();
                    numargs += 1;
                }
                b'$' => {
                    self.gen_ident_idx(idx);
                    numargs += 1;
                }
                b'N' => {
                    self.gen_int(-1);
                    numargs += 1;
                }
                b'C' => {
                    comtype = Op::ComC;
                    variadic = true;
                    break;
                }
                b'V' => {
                    comtype = Op::ComV;
                    variadic = true;
                    break;
                }
                _ => {}
            }
        }
        if variadic {
            self.code.push(
                inst(comtype, RetType::Null, numargs | ((idx as u32) << 5)) | ltype.ret_code(0),
            );
        } else {
            self.code
                .push(inst(Op::Com, RetType::Null, idx as u32) | ltype.ret_code(0));
        }
        let tail = if prevargs >= MAX_RESULTS {
            Op::Exit
        } else {
            Op::ResultArg
        };
        self.code
            .push(inst0(tail, RetType::Null) | ltype.ret_code(0));
        self.lookup_done_tail(ltype);
    }

    fn lookup_unknown_tail(&mut self, ltype: WordType) {
        match ltype {
            WordType::CAny | WordType::Cond => {
                self.code.push(inst0(Op::LookupMU, RetType::Null));
            }
            WordType::CStr | WordType::Code | WordType::Ident => {
                self.code.push(inst0(Op::LookupMU, RetType::Str));
            }
            _ => self
                .code
                .push(inst0(Op::LookupU, RetType::Null) | ltype.ret_code(0)),
        }
    }

    fn lookup_done_tail(&mut self, ltype: WordType) {
        match ltype {
            WordType::Pop => self.code.push(inst0(Op::Pop, RetType::Null)),
            WordType::Code => self.code.push(inst0(Op::Compile, RetType::Null)),
            WordType::Cond => self.code.push(inst0(Op::Cond, RetType::Null)),
            WordType::Ident => self.code.push(inst0(Op::IdentU, RetType::Null)),
            _ => {}
        }
    }

    fn lookup_invalid(&mut self, ltype: WordType) {
        match ltype {
            WordType::Pop => {}
            WordType::Null | WordType::Any | WordType::CAny | WordType::Word | WordType::Cond => {
                self.gen_null();
            }
            _ => self.gen_value(ltype, ""),
        }
    }

    // =========================================================================
    // Words
    // =========================================================================

    fn compile_paren(&mut self, wordtype: WordType, prevargs: usize) {
        self.next_char();
        if prevargs >= MAX_RESULTS {
            self.code.push(inst0(Op::Enter, RetType::Null));
            self.compile_statements(wordtype.paren_rettype(), b')', 0);
            self.code
                .push(inst0(Op::Exit, RetType::Null) | wordtype.ret_code(0));
        } else {
            let start = self.code.len();
            self.compile_statements(wordtype.paren_rettype(), b')', prevargs);
            if self.code.len() > start {
                self.code
                    .push(inst0(Op::ResultArg, RetType::Null) | wordtype.ret_code(0));
            } else {
                self.gen_value(wordtype, "");
                return;
            }
        }
        match wordtype {
            WordType::Pop => self.code.push(inst0(Op::Pop, RetType::Null)),
            WordType::Cond => self.code.push(inst0(Op::Cond, RetType::Null)),
            WordType::Code => self.code.push(inst0(Op::Compile, RetType::Null)),
            WordType::Ident => self.code.push(inst0(Op::IdentU, RetType::Null)),
            _ => {}
        }
    }

    /// Compile one word in the given context. Returns false when no
    /// word remains in the statement.
    pub(crate) fn compile_arg(&mut self, wordtype: WordType, prevargs: usize) -> bool {
        debug_assert!(wordtype != WordType::Word, "use compile_arg_word");
        self.skip_comments();
        match self.current() {
            b'"' => {
                match wordtype {
                    WordType::Pop => {
                        self.next_char();
                        self.pos = find_string_end(&self.buf, self.pos);
                        if self.current() == b'"' {
                            self.next_char();
                        }
                    }
                    WordType::Cond => {
                        let s = self.cut_string();
                        if s.is_empty() {
                            self.gen_null();
                        } else {
                            self.compile_block_str_src(&s);
                        }
                    }
                    WordType::Code => {
                        let s = self.cut_string();
                        self.compile_block_str_src(&s);
                    }
                    WordType::Any | WordType::Str => {
                        let s = self.cut_string();
                        self.gen_str(&s, false);
                    }
                    WordType::CAny | WordType::CStr => {
                        let s = self.cut_string();
                        self.gen_str(&s, true);
                    }
                    _ => {
                        let s = self.cut_string();
                        self.gen_value(wordtype, &s);
                    }
                }
                true
            }
            b'$' => {
                self.compile_lookup(wordtype, prevargs);
                true
            }
            b'(' => {
                self.compile_paren(wordtype, prevargs);
                true
            }
            b'[' => {
                self.next_char();
                self.compile_block_main(wordtype, prevargs);
                true
            }
            _ => match wordtype {
                WordType::Pop => {
                    let start = self.pos;
                    self.pos = find_word_end(&self.buf, self.pos);
                    self.pos != start
                }
                WordType::Cond | WordType::Code => {
                    let w = self.cut_word();
                    if w.is_empty() {
                        return false;
                    }
                    self.compile_block_str_src(&w);
                    true
                }
                _ => {
                    let w = self.cut_word();
                    if w.is_empty() {
                        return false;
                    }
                    self.gen_value(wordtype, &w);
                    true
                }
            },
        }
    }

    /// Compile the head of a statement: a plain word stays a word, any
    /// other syntax compiles to an expression whose value names the
    /// command.
    fn compile_arg_word(&mut self, prevargs: usize) -> HeadWord {
        self.skip_comments();
        match self.current() {
            b'"' => HeadWord::Word(self.cut_string()),
            b'$' => {
                self.compile_lookup(WordType::Word, prevargs);
                HeadWord::Expr
            }
            b'(' => {
                self.compile_paren(WordType::Word, prevargs);
                HeadWord::Expr
            }
            b'[' => {
                self.next_char();
                self.compile_block_main(WordType::Word, prevargs);
                HeadWord::Expr
            }
            _ => {
                let w = self.cut_word();
                if w.is_empty() {
                    HeadWord::None
                } else {
                    HeadWord::Word(w)
                }
            }
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    pub(crate) fn compile_statements(&mut self, rettype: WordType, brak: u8, prevargs: usize) {
        let line_pos = self.pos;
        'statements: loop {
            self.skip_comments();
            let head = self.compile_arg_word(prevargs);
            let mut more = !matches!(head, HeadWord::None);
            let idname = match head {
                HeadWord::Word(w) => Some(w),
                _ => None,
            };
            let mut numargs: usize = 0;
            if more {
                self.skip_comments();
                let assigns = self.current() == b'='
                    && match self.peek(1) {
                        b';' | b' ' | b'\t' | b'\r' | b'\n' | 0 => true,
                        b'/' => self.peek(2) == b'/',
                        _ => false,
                    };
                if assigns {
                    self.next_char();
                    let mut generic = true;
                    if let Some(name) = &idname {
                        let idx = self.cs.new_ident(name, IDF_UNKNOWN);
                        match self.cs.ident_class(idx) {
                            IdentClass::Alias => {
                                more = self.compile_arg(WordType::Any, prevargs);
                                if !more {
                                    self.gen_str_empty();
                                }
                                let op = if idx < MAX_ARGUMENTS {
                                    Op::AliasArg
                                } else {
                                    Op::Alias
                                };
                                self.code.push(inst(op, RetType::Null, idx as u32));
                                generic = false;
                            }
                            IdentClass::Ivar => {
                                more = self.compile_arg(WordType::Int, prevargs);
                                if !more {
                                    self.gen_int(0);
                                }
                                self.code.push(inst(Op::Ivar1, RetType::Null, idx as u32));
                                generic = false;
                            }
                            IdentClass::Fvar => {
                                more = self.compile_arg(WordType::Float, prevargs);
                                if !more {
                                    self.gen_float(0.0);
                                }
                                self.code.push(inst(Op::Fvar1, RetType::Null, idx as u32));
                                generic = false;
                            }
                            IdentClass::Svar => {
                                more = self.compile_arg(WordType::CStr, prevargs);
                                if !more {
                                    self.gen_str_empty();
                                }
                                self.code.push(inst(Op::Svar1, RetType::Null, idx as u32));
                                generic = false;
                            }
                            IdentClass::Command => {
                                self.gen_str(name, true);
                            }
                        }
                    }
                    if generic {
                        more = self.compile_arg(WordType::Any, MAX_RESULTS);
                        if !more {
                            self.gen_str_empty();
                        }
                        self.code.push(inst0(Op::AliasU, RetType::Null));
                    }
                } else if let Some(name) = idname {
                    match self.cs.get_ident(&name) {
                        None => {
                            if !is_numeric_name(&name) {
                                self.gen_str(&name, true);
                                more = self.compile_call_unknown(prevargs, &mut numargs);
                            } else {
                                match rettype {
                                    WordType::Any | WordType::CAny => {
                                        let (val, end) = parse_int_prefix(&name);
                                        if end < name.len() {
                                            self.gen_str(&name, rettype == WordType::CAny);
                                        } else {
                                            self.gen_int(val);
                                        }
                                    }
                                    _ => self.gen_value(rettype, &name),
                                }
                                self.code.push(inst0(Op::Result, RetType::Null));
                            }
                        }
                        Some(idx) => {
                            more = self.compile_known_call(idx, rettype, prevargs, &mut numargs);
                        }
                    }
                } else {
                    more = self.compile_call_unknown(prevargs, &mut numargs);
                }
            }
            // endstatement
            loop {
                if more {
                    while self.compile_arg(WordType::Pop, prevargs) {}
                    more = false;
                }
                self.skip_until(b")];/\n");
                match self.next_char() {
                    0 => {
                        if brak != 0 {
                            self.diag_at(line_pos, &format!("missing \"{}\"", brak as char));
                        }
                        return;
                    }
                    c @ (b')' | b']') => {
                        if c == brak {
                            return;
                        }
                        self.diag_at(line_pos, &format!("unexpected \"{}\"", c as char));
                        continue 'statements;
                    }
                    b'/' => {
                        if self.current() == b'/' {
                            self.skip_until(b"\n");
                        }
                        continue;
                    }
                    _ => continue 'statements,
                }
            }
        }
    }

    /// Late-bound call: the name is already on the stack, actual
    /// arguments follow as constants.
    fn compile_call_unknown(&mut self, prevargs: usize, numargs: &mut usize) -> bool {
        let mut more = true;
        while *numargs < MAX_ARGUMENTS {
            more = self.compile_arg(WordType::CAny, prevargs + *numargs);
            if !more {
                break;
            }
            *numargs += 1;
        }
        self.code
            .push(inst(Op::CallU, RetType::Null, *numargs as u32));
        more
    }

    fn compile_known_call(
        &mut self,
        idx: usize,
        rettype: WordType,
        prevargs: usize,
        numargs: &mut usize,
    ) -> bool {
        let mut more = true;
        match self.cs.ident_class(idx) {
            IdentClass::Alias => {
                while *numargs < MAX_ARGUMENTS {
                    more = self.compile_arg(WordType::Any, prevargs + *numargs);
                    if !more {
                        break;
                    }
                    *numargs += 1;
                }
                let op = if idx < MAX_ARGUMENTS {
                    Op::CallArg
                } else {
                    Op::Call
                };
                self.code.push(inst(
                    op,
                    RetType::Null,
                    (*numargs as u32) | ((idx as u32) << 5),
                ));
            }
            IdentClass::Command => match self.cs.ident_builtin(idx) {
                None | Some(Builtin::Break) | Some(Builtin::Continue) => {
                    more = self.compile_command_call(idx, rettype, prevargs, numargs);
                }
                Some(Builtin::Local) => {
                    if more {
                        while *numargs < MAX_ARGUMENTS {
                            more = self.compile_arg(WordType::Ident, prevargs + *numargs);
                            if !more {
                                break;
                            }
                            *numargs += 1;
                        }
                    }
                    if more {
                        while self.compile_arg(WordType::Pop, prevargs) {}
                        more = false;
                    }
                    self.code
                        .push(inst(Op::Local, RetType::Null, *numargs as u32));
                }
                Some(Builtin::Do) => {
                    more = self.compile_arg(WordType::Code, prevargs);
                    let op = if more { Op::Do } else { Op::Null };
                    self.code
                        .push(inst0(op, RetType::Null) | rettype.ret_code(0));
                }
                Some(Builtin::DoArgs) => {
                    more = self.compile_arg(WordType::Code, prevargs);
                    let op = if more { Op::DoArgs } else { Op::Null };
                    self.code
                        .push(inst0(op, RetType::Null) | rettype.ret_code(0));
                }
                Some(Builtin::If) => {
                    more = self.compile_if(idx, rettype, prevargs);
                }
                Some(Builtin::Result) => {
                    more = self.compile_arg(WordType::Any, prevargs);
                    let op = if more { Op::Result } else { Op::Null };
                    self.code
                        .push(inst0(op, RetType::Null) | rettype.ret_code(0));
                }
                Some(Builtin::Not) => {
                    more = self.compile_arg(WordType::CAny, prevargs);
                    let op = if more { Op::Not } else { Op::True };
                    self.code
                        .push(inst0(op, RetType::Null) | rettype.ret_code(0));
                }
                Some(b @ (Builtin::And | Builtin::Or)) => {
                    more = self.compile_andor(idx, b, rettype, prevargs, numargs);
                }
            },
            IdentClass::Ivar => {
                let hex = self.cs.ident_flags(idx) & IDF_HEX != 0;
                more = self.compile_arg(WordType::Int, prevargs);
                if !more {
                    self.code.push(inst(Op::Print, RetType::Null, idx as u32));
                } else if !hex || {
                    more = self.compile_arg(WordType::Int, prevargs + 1);
                    !more
                } {
                    self.code.push(inst(Op::Ivar1, RetType::Null, idx as u32));
                } else if {
                    more = self.compile_arg(WordType::Int, prevargs + 2);
                    !more
                } {
                    self.code.push(inst(Op::Ivar2, RetType::Null, idx as u32));
                } else {
                    self.code.push(inst(Op::Ivar3, RetType::Null, idx as u32));
                }
            }
            IdentClass::Fvar => {
                more = self.compile_arg(WordType::Float, prevargs);
                if !more {
                    self.code.push(inst(Op::Print, RetType::Null, idx as u32));
                } else {
                    self.code.push(inst(Op::Fvar1, RetType::Null, idx as u32));
                }
            }
            IdentClass::Svar => {
                more = self.compile_arg(WordType::CStr, prevargs);
                if !more {
                    self.code.push(inst(Op::Print, RetType::Null, idx as u32));
                } else {
                    loop {
                        *numargs += 1;
                        if *numargs >= MAX_ARGUMENTS {
                            break;
                        }
                        more = self.compile_arg(WordType::CAny, prevargs + *numargs);
                        if !more {
                            break;
                        }
                    }
                    if *numargs > 1 {
                        self.code
                            .push(inst(Op::Conc, RetType::Str, *numargs as u32));
                    }
                    self.code.push(inst(Op::Svar1, RetType::Null, idx as u32));
                }
            }
        }
        more
    }

    /// Emit a call to a native command, coercing each present argument
    /// per the format string and synthesizing the missing tail.
    fn compile_command_call(
        &mut self,
        idx: usize,
        rettype: WordType,
        prevargs: usize,
        numargs: &mut usize,
    ) -> bool {
        let fmt = self.cs.command_fmt(idx).unwrap_or_else(|| Rc::from(""));
        let fb: Vec<u8> = fmt.bytes().collect();
        let mut comtype = Op::Com;
        let mut fakeargs: usize = 0;
        let mut rep = false;
        let mut more = true;
        let mut variadic = false;
        let mut fi = 0usize;
        while fi < fb.len() {
            let c = fb[fi];
            match c {
                b'S' | b's' => {
                    if more {
                        more = self.compile_arg(
                            if c == b's' {
                                WordType::CStr
                            } else {
                                WordType::Str
                            },
                            prevargs + *numargs,
                        );
                    }
                    if !more {
                        if rep {
                            fi += 1;
                            continue;
                        }
                        if c == b's' {
                            self.gen_str("", true);
                        } else {
                            self.gen_str_empty();
                        }
                        fakeargs += 1;
                    } else if fi + 1 == fb.len() {
                        // a trailing string parameter swallows the rest
                        let mut numconc: usize = 1;
                        while *numargs + numconc < MAX_ARGUMENTS {
                            more =
                                self.compile_arg(WordType::CStr, prevargs + *numargs + numconc);
                            if !more {
                                break;
                            }
                            numconc += 1;
                        }
                        if numconc > 1 {
                            self.code
                                .push(inst(Op::Conc, RetType::Str, numconc as u32));
                        }
                    }
                    *numargs += 1;
                }
                b'i' | b'b' => {
                    if more {
                        more = self.compile_arg(WordType::Int, prevargs + *numargs);
                    }
                    if !more {
                        if rep {
                            fi += 1;
                            continue;
                        }
                        self.gen_int(if c == b'b' { CsInt::MIN } else { 0 });
                        fakeargs += 1;
                    }
                    *numargs += 1;
                }
                b'f' => {
                    if more {
                        more = self.compile_arg(WordType::Float, prevargs + *numargs);
                    }
                    if !more {
                        if rep {
                            fi += 1;
                            continue;
                        }
                        self.gen_float(0.0);
                        fakeargs += 1;
                    }
                    *numargs += 1;
                }
                b'F' => {
                    if more {
                        more = self.compile_arg(WordType::Float, prevargs + *numargs);
                    }
                    if !more {
                        if rep {
                            fi += 1;
                            continue;
                        }
                        self.code.push(inst0(Op::Dup, RetType::Float));
                        fakeargs += 1;
                    }
                    *numargs += 1;
                }
                b'T' | b't' => {
                    if more {
                        more = self.compile_arg(
                            if c == b't' {
                                WordType::CAny
                            } else {
                                WordType::Any
                            },
                            prevargs + *numargs,
                        );
                    }
                    if !more {
                        if rep {
                            fi += 1;
                            continue;
                        }
                        self.gen_null();
                        fakeargs += 1;
                    }
                    *numargs += 1;
                }
                b'E' => {
                    if more {
                        more = self.compile_arg(WordType::Cond, prevargs + *numargs);
                    }
                    if !more {
                        if rep {
                            fi += 1;
                            continue;
                        }
                        self.gen_null();
                        fakeargs += 1;
                    }
                    *numargs += 1;
                }
                b'e' => {
                    if more {
                        more = self.compile_arg(WordType::Code, prevargs + *numargs);
                    }
                    if !more {
                        if rep {
                            fi += 1;
                            continue;
                        }
                        self.code.push(inst0(Op::Empty, RetType::Null));
                        fakeargs += 1;
                    }
                    *numargs += 1;
                }
                b'r' => {
                    if more {
                        more = self.compile_arg(WordType::Ident, prevargs + *numargs);
                    }
                    if !more {
                        if rep {
                            fi += 1;
                            continue;
                        }
                        self.gen_ident_dummy();
                        fakeargs += 1;
                    }
                    *numargs += 1;
                }
                b'$' => {
                    self.gen_ident_idx(idx);
                    *numargs += 1;
                }
                b'N' => {
                    self.gen_int((*numargs - fakeargs) as CsInt);
                    *numargs += 1;
                }
                b'C' | b'V' => {
                    comtype = if c == b'C' { Op::ComC } else { Op::ComV };
                    if more {
                        while *numargs < MAX_ARGUMENTS {
                            more = self.compile_arg(WordType::CAny, prevargs + *numargs);
                            if !more {
                                break;
                            }
                            *numargs += 1;
                        }
                    }
                    variadic = true;
                    break;
                }
                d @ b'1'..=b'4' => {
                    if more && *numargs < MAX_ARGUMENTS {
                        let n = (d - b'0') as usize;
                        fi -= n;
                        rep = true;
                        continue;
                    }
                    while *numargs > MAX_ARGUMENTS {
                        self.code.push(inst0(Op::Pop, RetType::Null));
                        *numargs -= 1;
                    }
                }
                _ => {}
            }
            fi += 1;
        }
        if variadic {
            self.code.push(
                inst(
                    comtype,
                    RetType::Null,
                    (*numargs as u32) | ((idx as u32) << 5),
                ) | rettype.ret_code(0),
            );
        } else {
            self.code
                .push(inst(Op::Com, RetType::Null, idx as u32) | rettype.ret_code(0));
        }
        more
    }

    /// `if` with literal block branches rewrites into conditional jumps
    /// so the common case never pays command dispatch.
    fn compile_if(&mut self, idx: usize, rettype: WordType, prevargs: usize) -> bool {
        let rc = rettype.ret_code(0);
        let mut more = self.compile_arg(WordType::CAny, prevargs);
        if !more {
            self.code.push(inst0(Op::Null, RetType::Null) | rc);
            return more;
        }
        let start1 = self.code.len();
        more = self.compile_arg(WordType::Code, prevargs + 1);
        if !more {
            self.code.push(inst0(Op::Pop, RetType::Null));
            self.code.push(inst0(Op::Null, RetType::Null) | rc);
            return more;
        }
        let start2 = self.code.len();
        more = self.compile_arg(WordType::Code, prevargs + 2);
        let inst1 = self.code[start1];
        let op1 = inst1 & !RET_MASK;
        let len1 = (start2 - (start1 + 1)) as u32;
        let retfix = |word: u32| (word & !RET_MASK) | rc;
        if !more {
            if op1 == inst(Op::Block, RetType::Null, len1) {
                self.code[start1] = inst(Op::JumpFalse, RetType::Null, len1);
                self.code[start1 + 1] = inst0(Op::EnterResult, RetType::Null);
                let at = start1 + len1 as usize;
                self.code[at] = retfix(self.code[at]);
                return more;
            }
            self.code.push(inst0(Op::Empty, RetType::Null));
        } else {
            let inst2 = self.code[start2];
            let op2 = inst2 & !RET_MASK;
            let len2 = (self.code.len() - (start2 + 1)) as u32;
            if op2 == inst(Op::Block, RetType::Null, len2) {
                if op1 == inst(Op::Block, RetType::Null, len1) {
                    self.code[start1] =
                        inst(Op::JumpFalse, RetType::Null, (start2 - start1) as u32);
                    self.code[start1 + 1] = inst0(Op::EnterResult, RetType::Null);
                    let at = start1 + len1 as usize;
                    self.code[at] = retfix(self.code[at]);
                    self.code[start2] = inst(Op::Jump, RetType::Null, len2);
                    self.code[start2 + 1] = inst0(Op::EnterResult, RetType::Null);
                    let at = start2 + len2 as usize;
                    self.code[at] = retfix(self.code[at]);
                    return more;
                } else if op1 == inst(Op::Empty, RetType::Null, len1) {
                    self.code[start1] = inst0(Op::Null, RetType::Null) | (inst2 & RET_MASK);
                    self.code[start2] = inst(Op::JumpTrue, RetType::Null, len2);
                    self.code[start2 + 1] = inst0(Op::EnterResult, RetType::Null);
                    let at = start2 + len2 as usize;
                    self.code[at] = retfix(self.code[at]);
                    return more;
                }
            }
        }
        self.code
            .push(inst(Op::Com, RetType::Null, idx as u32) | rc);
        more
    }

    /// `&&`/`||` over literal blocks rewrites into a short-circuiting
    /// jump chain; any non-literal operand falls back to the variadic
    /// command call.
    fn compile_andor(
        &mut self,
        idx: usize,
        which: Builtin,
        rettype: WordType,
        prevargs: usize,
        numargs: &mut usize,
    ) -> bool {
        let rc = rettype.ret_code(0);
        let mut more = self.compile_arg(WordType::Cond, prevargs);
        if !more {
            let op = if which == Builtin::And {
                Op::True
            } else {
                Op::False
            };
            self.code.push(inst0(op, RetType::Null) | rc);
            return more;
        }
        *numargs += 1;
        let mut start = self.code.len();
        let mut end = start;
        while *numargs < MAX_ARGUMENTS {
            more = self.compile_arg(WordType::Cond, prevargs + *numargs);
            if !more {
                break;
            }
            *numargs += 1;
            let len = (self.code.len() - (end + 1)) as u32;
            if (self.code[end] & !RET_MASK) != inst(Op::Block, RetType::Null, len) {
                break;
            }
            end = self.code.len();
        }
        if more {
            while *numargs < MAX_ARGUMENTS {
                more = self.compile_arg(WordType::Cond, prevargs + *numargs);
                if !more {
                    break;
                }
                *numargs += 1;
            }
            self.code.push(
                inst(
                    Op::ComV,
                    RetType::Null,
                    (*numargs as u32) | ((idx as u32) << 5),
                ) | rc,
            );
        } else {
            let op = if which == Builtin::And {
                Op::JumpResultFalse
            } else {
                Op::JumpResultTrue
            };
            self.code.push(inst0(op, RetType::Null));
            end = self.code.len();
            while start + 1 < end {
                let len = (self.code[start] >> 8) as usize;
                self.code[start] = inst(op, RetType::Null, (end - (start + 1)) as u32);
                self.code[start + 1] = inst0(Op::Enter, RetType::Null);
                self.code[start + len] = (self.code[start + len] & !RET_MASK) | rc;
                start += len + 1;
            }
        }
        more
    }
}
