//! Code emission: the generator state and the low-level instruction
//! builders shared by the word compiler.

use cubescript_core::bcode::{inst, inst0, CodeBlock, CodeRef, Op, RetType};
use cubescript_core::state::CsState;
use cubescript_core::value::{parse_float, parse_int, CsFloat, CsInt, Value};
use std::rc::Rc;

/// Smallest integer representable inline in an instruction payload.
pub const INLINE_INT_MIN: CsInt = -0x80_0000;
/// Largest integer representable inline in an instruction payload.
pub const INLINE_INT_MAX: CsInt = 0x7F_FFFF;

/// The context a word is compiled in. Drives which instruction family
/// the compiler chooses for the same surface syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordType {
    /// Result discarded but a null must be left.
    Null,
    /// Integer expected.
    Int,
    /// Float expected.
    Float,
    /// Owned string expected.
    Str,
    /// Any value.
    Any,
    /// Constant (borrowed) string expected.
    CStr,
    /// Any value, constants may stay borrowed.
    CAny,
    /// A plain word is wanted back, not code.
    Word,
    /// Identifier handle expected.
    Ident,
    /// Code block expected.
    Code,
    /// Condition: strings become code, empty becomes null.
    Cond,
    /// Value will be discarded; compile nothing observable.
    Pop,
}

impl WordType {
    /// The ret bits a value-producing instruction should carry in this
    /// context; `def` is used for the contexts with no inherent type.
    #[must_use]
    pub fn ret_code(self, def: u32) -> u32 {
        match self {
            WordType::Null => RetType::Null.bits(),
            WordType::Int => RetType::Int.bits(),
            WordType::Float => RetType::Float.bits(),
            WordType::Str | WordType::CStr => RetType::Str.bits(),
            _ => def,
        }
    }

    /// Statement return type used inside a parenthesized expression in
    /// this context.
    #[must_use]
    pub fn paren_rettype(self) -> WordType {
        match self {
            WordType::Null
            | WordType::Int
            | WordType::Float
            | WordType::Str
            | WordType::Any => WordType::Any,
            _ => WordType::CAny,
        }
    }
}

/// Mutable state of one compilation: the output buffers plus a cursor
/// over the source being scanned. Blocks and quoted strings switch the
/// cursor to temporary buffers and back.
pub struct GenState<'a> {
    /// Interpreter the compiler resolves and creates identifiers in.
    pub cs: &'a mut CsState,
    /// Emitted instruction words.
    pub code: Vec<u32>,
    /// Emitted string constants, indexed by instruction payloads.
    pub consts: Vec<Rc<str>>,
    pub(crate) buf: Rc<str>,
    pub(crate) pos: usize,
}

impl<'a> GenState<'a> {
    /// Fresh generator over `src`.
    pub fn new(cs: &'a mut CsState, src: Rc<str>) -> GenState<'a> {
        GenState {
            cs,
            code: Vec::with_capacity(64),
            consts: Vec::new(),
            buf: src,
            pos: 0,
        }
    }

    /// Finish: wrap the emitted words into a block and hand back the
    /// entry reference.
    #[must_use]
    pub fn into_code(self) -> CodeRef {
        CodeRef::main(CodeBlock::new(self.code, self.consts))
    }

    // =========================================================================
    // Cursor
    // =========================================================================

    /// Byte at the cursor; 0 at end of input.
    #[inline]
    pub(crate) fn current(&self) -> u8 {
        self.buf.as_bytes().get(self.pos).copied().unwrap_or(0)
    }

    /// Byte at `off` past the cursor; 0 past the end.
    #[inline]
    pub(crate) fn peek(&self, off: usize) -> u8 {
        self.buf.as_bytes().get(self.pos + off).copied().unwrap_or(0)
    }

    /// Consume and return the byte at the cursor.
    #[inline]
    pub(crate) fn next_char(&mut self) -> u8 {
        let c = self.current();
        if c != 0 {
            self.pos += 1;
        }
        c
    }

    /// Advance the cursor until a byte in `stop` or end of input.
    pub(crate) fn skip_until(&mut self, stop: &[u8]) {
        let b = self.buf.as_bytes();
        while self.pos < b.len() && !stop.contains(&b[self.pos]) {
            self.pos += 1;
        }
    }

    /// Run `f` with the cursor switched to a temporary buffer.
    pub(crate) fn with_source<R>(&mut self, src: Rc<str>, f: impl FnOnce(&mut Self) -> R) -> R {
        let old_buf = std::mem::replace(&mut self.buf, src);
        let old_pos = std::mem::replace(&mut self.pos, 0);
        let r = f(self);
        self.buf = old_buf;
        self.pos = old_pos;
        r
    }

    // =========================================================================
    // Emission
    // =========================================================================

    pub(crate) fn add_const(&mut self, s: &str) -> u32 {
        let handle = self.cs.intern(s);
        self.consts.push(handle);
        (self.consts.len() - 1) as u32
    }

    /// Push a string literal; short non-macro strings pack into the
    /// instruction word itself.
    pub fn gen_str(&mut self, word: &str, is_macro: bool) {
        if !is_macro && word.len() <= 3 && word.is_ascii() {
            let mut op = inst0(Op::ValInline, RetType::Str);
            for (i, b) in word.bytes().enumerate() {
                op |= u32::from(b) << ((i + 1) * 8);
            }
            self.code.push(op);
            return;
        }
        let idx = self.add_const(word);
        let op = if is_macro { Op::Macro } else { Op::Val };
        self.code.push(inst(op, RetType::Str, idx));
    }

    /// Push the empty string.
    pub fn gen_str_empty(&mut self) {
        self.code.push(inst0(Op::ValInline, RetType::Str));
    }

    /// Push a null literal.
    pub fn gen_null(&mut self) {
        self.code.push(inst0(Op::ValInline, RetType::Null));
    }

    /// Push an integer literal, inline when it fits the payload.
    pub fn gen_int(&mut self, i: CsInt) {
        if (INLINE_INT_MIN..=INLINE_INT_MAX).contains(&i) {
            self.code
                .push(inst(Op::ValInline, RetType::Int, (i as u32) & 0x00FF_FFFF));
        } else {
            self.code.push(inst0(Op::Val, RetType::Int));
            let raw = i as u64;
            self.code.push(raw as u32);
            self.code.push((raw >> 32) as u32);
        }
    }

    /// Push an integer literal parsed from source text.
    pub fn gen_int_str(&mut self, word: &str) {
        self.gen_int(parse_int(word));
    }

    /// Push a float literal, inline when integral and small.
    pub fn gen_float(&mut self, f: CsFloat) {
        let as_int = f as CsInt;
        if as_int as CsFloat == f && (INLINE_INT_MIN..=INLINE_INT_MAX).contains(&as_int) {
            self.code
                .push(inst(Op::ValInline, RetType::Float, (as_int as u32) & 0x00FF_FFFF));
        } else {
            self.code.push(inst0(Op::Val, RetType::Float));
            let raw = f.to_bits();
            self.code.push(raw as u32);
            self.code.push((raw >> 32) as u32);
        }
    }

    /// Push a float literal parsed from source text.
    pub fn gen_float_str(&mut self, word: &str) {
        self.gen_float(parse_float(word));
    }

    /// Push an identifier handle by table index.
    pub fn gen_ident_idx(&mut self, idx: usize) {
        let op = if idx < cubescript_core::MAX_ARGUMENTS {
            Op::IdentArg
        } else {
            Op::Ident
        };
        self.code.push(inst(op, RetType::Null, idx as u32));
    }

    /// Push the dummy identifier handle.
    pub fn gen_ident_dummy(&mut self) {
        let dummy = self.cs.dummy_idx();
        self.gen_ident_idx(dummy);
    }

    /// Push an identifier handle by name, creating the ident on first
    /// reference.
    pub fn gen_ident_name(&mut self, name: &str) {
        let idx = self.cs.new_ident(name, cubescript_core::IDF_UNKNOWN);
        self.gen_ident_idx(idx);
    }

    /// Push a literal of the requested class from source text.
    pub fn gen_value(&mut self, wordtype: WordType, word: &str) {
        match wordtype {
            WordType::CAny => {
                if word.is_empty() {
                    self.gen_null();
                } else {
                    self.gen_str(word, true);
                }
            }
            WordType::CStr => self.gen_str(word, true),
            WordType::Any => {
                if word.is_empty() {
                    self.gen_null();
                } else {
                    self.gen_str(word, false);
                }
            }
            WordType::Str => self.gen_str(word, false),
            WordType::Float => self.gen_float_str(word),
            WordType::Int => self.gen_int_str(word),
            WordType::Cond => {
                if word.is_empty() {
                    self.gen_null();
                } else {
                    self.compile_block_str_src(word);
                }
            }
            WordType::Code => self.compile_block_str_src(word),
            WordType::Ident => self.gen_ident_name(word),
            _ => {}
        }
    }

    /// Compile the whole program: statements wrapped in `Start`..`Exit`
    /// with the caller's requested return coercion.
    pub fn gen_main(&mut self, ret: RetType) {
        self.code.push(inst0(Op::Start, RetType::Null));
        self.compile_statements(WordType::Any, 0, 0);
        self.code.push(inst0(Op::Exit, ret));
    }
}

/// Compile a source string against an interpreter state; the result
/// coerces to any type on exit.
pub fn compile(cs: &mut CsState, src: &str) -> CodeRef {
    compile_ret(cs, src, RetType::Null)
}

/// Compile a source string with an explicit exit coercion.
pub fn compile_ret(cs: &mut CsState, src: &str, ret: RetType) -> CodeRef {
    let src: Rc<str> = Rc::from(src);
    compile_rc(cs, src, ret)
}

/// Compile an already-shared source buffer. Callers that also install
/// the buffer as the state's diagnostic source (see
/// [`CsState::set_source`]) get `file:line:` prefixes on compile
/// diagnostics.
pub fn compile_rc(cs: &mut CsState, src: Rc<str>, ret: RetType) -> CodeRef {
    let len = src.len();
    let mut gs = GenState::new(cs, src);
    gs.gen_main(ret);
    tracing::trace!(
        target: "cubescript::compiler",
        source_bytes = len,
        words = gs.code.len(),
        consts = gs.consts.len(),
        "compiled chunk"
    );
    gs.into_code()
}

/// Coerce a value into compiled code, compiling strings on demand and
/// wrapping numbers in a result-returning stub.
pub fn force_code(cs: &mut CsState, v: &mut Value) -> CodeRef {
    if let Value::Code(c) = v {
        return c.clone();
    }
    let code = match v {
        Value::Str(s) => compile_rc(cs, s.clone(), RetType::Null),
        Value::Macro(m) => {
            let src: Rc<str> = Rc::from(m.as_str());
            compile_rc(cs, src, RetType::Null)
        }
        _ => {
            let literal = v.clone();
            let mut gs = GenState::new(cs, Rc::from(""));
            gs.code.push(inst0(Op::Start, RetType::Null));
            match literal {
                Value::Int(i) => gs.gen_int(i),
                Value::Float(f) => gs.gen_float(f),
                _ => gs.gen_null(),
            }
            gs.code.push(inst0(Op::Result, RetType::Null));
            gs.code.push(inst0(Op::Exit, RetType::Null));
            gs.into_code()
        }
    };
    *v = Value::Code(code.clone());
    code
}

/// Condition coercion: nonempty strings become compiled code, empty
/// strings become a false integer; other values pass through.
pub fn force_cond(cs: &mut CsState, v: &mut Value) {
    if let Some(s) = v.as_str() {
        if s.is_empty() {
            *v = Value::Int(0);
        } else {
            force_code(cs, v);
        }
    }
}
