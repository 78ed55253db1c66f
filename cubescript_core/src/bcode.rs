//! Bytecode block representation and the 32-bit instruction encoding.
//!
//! An instruction word packs three fields:
//!
//! ```text
//! ┌──────────────────────────┬─────────┬──────────┐
//! │        payload           │   ret   │  opcode  │
//! │        (24 bit)          │ (2 bit) │  (6 bit) │
//! └──────────────────────────┴─────────┴──────────┘
//! ```
//!
//! The opcode selects the operation, the ret bits select which
//! representation the instruction leaves behind (null/int/float/string),
//! and the payload carries an identifier index, a small literal, an
//! argument count, a jump offset, or a string-constant index depending on
//! the opcode.
//!
//! A compiled block owns its instruction words plus a constant table of
//! string data. References into a block are `CodeRef` handles: a shared
//! pointer to the block plus an entry offset, so a handle may enter at the
//! block start or at any interior instruction (the two entry shapes the
//! compiler produces). The block is freed when the last handle drops.

use std::fmt;
use std::rc::Rc;

/// Low six bits select the opcode.
pub const OP_MASK: u32 = 0x3F;
/// Two return-type bits above the opcode.
pub const RET_SHIFT: u32 = 6;
/// Mask of the return-type bits.
pub const RET_MASK: u32 = 0xC0;
/// Inline payloads start at bit 8.
pub const PAYLOAD_SHIFT: u32 = 8;

/// Return-type request carried by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RetType {
    /// Leave the value as-is.
    Null = 0,
    /// Force to integer.
    Int = 1,
    /// Force to float.
    Float = 2,
    /// Force to string.
    Str = 3,
}

impl RetType {
    /// Decode the ret bits of an instruction word.
    #[inline]
    #[must_use]
    pub const fn of(word: u32) -> RetType {
        match (word & RET_MASK) >> RET_SHIFT {
            1 => RetType::Int,
            2 => RetType::Float,
            3 => RetType::Str,
            _ => RetType::Null,
        }
    }

    /// The ret bits for this type, positioned for or-ing into a word.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        (self as u32) << RET_SHIFT
    }
}

/// Instruction opcodes. Kept dense so the whole set fits the 6-bit field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Op {
    Start = 0,
    Offset,
    Null,
    True,
    False,
    Not,
    Pop,
    Enter,
    EnterResult,
    Exit,
    ResultArg,
    Val,
    ValInline,
    Dup,
    Macro,
    Block,
    Empty,
    Compile,
    Cond,
    Force,
    Result,
    Ident,
    IdentU,
    IdentArg,
    Com,
    ComC,
    ComV,
    Conc,
    ConcW,
    ConcM,
    Svar,
    SvarM,
    Svar1,
    Ivar,
    Ivar1,
    Ivar2,
    Ivar3,
    Fvar,
    Fvar1,
    Lookup,
    LookupU,
    LookupArg,
    LookupM,
    LookupMU,
    LookupMArg,
    Alias,
    AliasU,
    AliasArg,
    Call,
    CallU,
    CallArg,
    Print,
    Local,
    Do,
    DoArgs,
    Jump,
    JumpTrue,
    JumpFalse,
    JumpResultTrue,
    JumpResultFalse,
}

impl Op {
    /// Decode the opcode field of an instruction word.
    #[must_use]
    pub const fn of(word: u32) -> Option<Op> {
        use Op::*;
        Some(match word & OP_MASK {
            0 => Start,
            1 => Offset,
            2 => Null,
            3 => True,
            4 => False,
            5 => Not,
            6 => Pop,
            7 => Enter,
            8 => EnterResult,
            9 => Exit,
            10 => ResultArg,
            11 => Val,
            12 => ValInline,
            13 => Dup,
            14 => Macro,
            15 => Block,
            16 => Empty,
            17 => Compile,
            18 => Cond,
            19 => Force,
            20 => Result,
            21 => Ident,
            22 => IdentU,
            23 => IdentArg,
            24 => Com,
            25 => ComC,
            26 => ComV,
            27 => Conc,
            28 => ConcW,
            29 => ConcM,
            30 => Svar,
            31 => SvarM,
            32 => Svar1,
            33 => Ivar,
            34 => Ivar1,
            35 => Ivar2,
            36 => Ivar3,
            37 => Fvar,
            38 => Fvar1,
            39 => Lookup,
            40 => LookupU,
            41 => LookupArg,
            42 => LookupM,
            43 => LookupMU,
            44 => LookupMArg,
            45 => Alias,
            46 => AliasU,
            47 => AliasArg,
            48 => Call,
            49 => CallU,
            50 => CallArg,
            51 => Print,
            52 => Local,
            53 => Do,
            54 => DoArgs,
            55 => Jump,
            56 => JumpTrue,
            57 => JumpFalse,
            58 => JumpResultTrue,
            59 => JumpResultFalse,
            _ => return None,
        })
    }
}

/// Assemble an instruction word from opcode, ret bits and payload.
#[inline]
#[must_use]
pub const fn inst(op: Op, ret: RetType, payload: u32) -> u32 {
    (op as u32) | ret.bits() | (payload << PAYLOAD_SHIFT)
}

/// Assemble an instruction word with no payload.
#[inline]
#[must_use]
pub const fn inst0(op: Op, ret: RetType) -> u32 {
    inst(op, ret, 0)
}

/// Unsigned payload of an instruction word.
#[inline]
#[must_use]
pub const fn payload(word: u32) -> u32 {
    word >> PAYLOAD_SHIFT
}

/// Sign-extended payload of an instruction word.
#[inline]
#[must_use]
pub const fn payload_signed(word: u32) -> i32 {
    (word as i32) >> PAYLOAD_SHIFT
}

/// A compiled block: instruction words plus the string constants they
/// reference. Blocks are immutable once built.
pub struct CodeBlock {
    code: Box<[u32]>,
    consts: Box<[Rc<str>]>,
}

impl CodeBlock {
    /// Wrap a finished instruction stream and its constant table.
    #[must_use]
    pub fn new(code: Vec<u32>, consts: Vec<Rc<str>>) -> Rc<CodeBlock> {
        Rc::new(CodeBlock {
            code: code.into_boxed_slice(),
            consts: consts.into_boxed_slice(),
        })
    }

    /// The instruction words.
    #[inline]
    #[must_use]
    pub fn code(&self) -> &[u32] {
        &self.code
    }

    /// Look up a string constant by table index.
    #[inline]
    #[must_use]
    pub fn const_str(&self, idx: u32) -> &Rc<str> {
        &self.consts[idx as usize]
    }
}

impl fmt::Debug for CodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CodeBlock({} words, {} consts)",
            self.code.len(),
            self.consts.len()
        )
    }
}

/// A shared handle to a block plus the offset execution enters at.
///
/// Handles returned by the compiler enter just past the `Start` word;
/// handles produced by `Block` instructions enter at an interior
/// instruction of the enclosing block. Both keep the whole block alive.
#[derive(Clone, Debug)]
pub struct CodeRef {
    block: Rc<CodeBlock>,
    entry: u32,
}

impl CodeRef {
    /// Handle entering just past the leading `Start` word.
    #[must_use]
    pub fn main(block: Rc<CodeBlock>) -> CodeRef {
        CodeRef { block, entry: 1 }
    }

    /// Handle entering at an arbitrary instruction offset.
    #[must_use]
    pub fn at(block: Rc<CodeBlock>, entry: usize) -> CodeRef {
        CodeRef {
            block,
            entry: entry as u32,
        }
    }

    /// The underlying block.
    #[inline]
    #[must_use]
    pub fn block(&self) -> &Rc<CodeBlock> {
        &self.block
    }

    /// Entry offset in instruction words.
    #[inline]
    #[must_use]
    pub fn entry(&self) -> usize {
        self.entry as usize
    }

    /// True when the handle's first instruction already exits the block,
    /// i.e. running it does nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block
            .code
            .get(self.entry())
            .and_then(|w| Op::of(*w))
            .is_some_and(|op| matches!(op, Op::Exit))
    }

    /// Number of live handles on the underlying block.
    #[must_use]
    pub fn refcount(&self) -> usize {
        Rc::strong_count(&self.block)
    }

    /// Build the canonical empty block for a return type.
    #[must_use]
    pub fn empty(ret: RetType) -> CodeRef {
        CodeRef::main(CodeBlock::new(
            vec![inst0(Op::Start, RetType::Null), inst0(Op::Exit, ret)],
            Vec::new(),
        ))
    }
}

/// A borrowed string: a handle to a block paired with the index of one of
/// its constants. The handle keeps the bytes alive, so the view can never
/// outlive the block it points into.
#[derive(Clone)]
pub struct MacroStr {
    block: Rc<CodeBlock>,
    index: u32,
}

impl MacroStr {
    /// Borrow constant `index` of `block`.
    #[must_use]
    pub fn new(block: Rc<CodeBlock>, index: u32) -> MacroStr {
        MacroStr { block, index }
    }

    /// The borrowed bytes.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.block.const_str(self.index)
    }
}

impl fmt::Debug for MacroStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacroStr({:?})", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_roundtrip() {
        let w = inst(Op::Ivar, RetType::Int, 42);
        assert_eq!(Op::of(w), Some(Op::Ivar));
        assert_eq!(RetType::of(w), RetType::Int);
        assert_eq!(payload(w), 42);
    }

    #[test]
    fn signed_payload() {
        let w = inst(Op::ValInline, RetType::Int, (-5i32 as u32) & 0x00FF_FFFF);
        assert_eq!(payload_signed(w), -5);
        let w = inst(Op::ValInline, RetType::Int, 7);
        assert_eq!(payload_signed(w), 7);
    }

    #[test]
    fn every_opcode_decodes() {
        for raw in 0..60u32 {
            let op = Op::of(raw).expect("dense opcode range");
            assert_eq!(op as u32, raw);
        }
        assert_eq!(Op::of(63), None);
    }

    #[test]
    fn empty_block_is_empty() {
        for ret in [RetType::Null, RetType::Int, RetType::Float, RetType::Str] {
            let b = CodeRef::empty(ret);
            assert!(b.is_empty());
            assert_eq!(b.entry(), 1);
        }
    }

    #[test]
    fn refcount_tracks_handles() {
        let b = CodeRef::empty(RetType::Null);
        assert_eq!(b.refcount(), 1);
        let c = b.clone();
        assert_eq!(b.refcount(), 2);
        drop(c);
        assert_eq!(b.refcount(), 1);
    }

    #[test]
    fn macro_str_borrows_block() {
        let block = CodeBlock::new(
            vec![inst0(Op::Start, RetType::Null), inst0(Op::Exit, RetType::Null)],
            vec![Rc::from("hello world")],
        );
        let m = MacroStr::new(block, 0);
        assert_eq!(m.as_str(), "hello world");
    }
}
