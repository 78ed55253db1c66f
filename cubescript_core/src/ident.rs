//! Identifiers: the named objects of the language.
//!
//! Every name in scope maps to exactly one `Ident` occupying a stable
//! slot in the dense identifier table. The kind decides what the name
//! means when referenced or called: a typed variable, a user alias, a
//! native command, or one of the reserved builtin forms that the
//! compiler lowers specially.

use crate::bcode::CodeRef;
use crate::error::CsResult;
use crate::state::CsState;
use crate::value::{CsFloat, CsInt, Value};
use std::rc::Rc;

/// Number of reserved argument aliases `arg1`..`argN`; these occupy
/// identifier indices `0..MAX_ARGUMENTS` and their bindings are tracked
/// per call frame in a bitset.
pub const MAX_ARGUMENTS: usize = 25;

/// Result slots reserved on the VM stack beyond the argument slots.
pub const MAX_RESULTS: usize = 7;

/// Arity limit for fixed-argument commands.
pub const MAX_COM_ARGS: usize = 12;

/// Marked for host-driven save/restore.
pub const IDF_PERSIST: u32 = 1 << 0;
/// Assignments override (save the prior value) instead of replacing.
pub const IDF_OVERRIDE: u32 = 1 << 1;
/// Display integer values in hexadecimal.
pub const IDF_HEX: u32 = 1 << 2;
/// Assignments are rejected.
pub const IDF_READONLY: u32 = 1 << 3;
/// An override is currently active.
pub const IDF_OVERRIDDEN: u32 = 1 << 4;
/// Name was referenced before being defined.
pub const IDF_UNKNOWN: u32 = 1 << 5;
/// One of the reserved `argN` aliases.
pub const IDF_ARG: u32 = 1 << 6;

/// Change callback attached to a variable.
pub type VarCb = Rc<dyn Fn(&mut CsState, usize)>;

/// Native command callback: `(state, marshaled args, result slot)`.
pub type CommandCb = Rc<dyn Fn(&mut CsState, &mut [Value], &mut Value) -> CsResult<()>>;

/// Reserved builtin forms the compiler lowers to dedicated instructions
/// instead of plain command calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Local,
    Do,
    DoArgs,
    If,
    Result,
    Not,
    And,
    Or,
    Break,
    Continue,
}

/// Payload of an alias: its value, the lazily compiled form of that
/// value, and the stack of shadowed bindings.
pub struct AliasData {
    /// Current binding.
    pub val: Value,
    /// Cached bytecode compiled from the current string value; cleared
    /// whenever the value changes.
    pub code: Option<CodeRef>,
    /// Previous bindings pushed by calls, `push`, `local` or loops.
    pub stack: Vec<Value>,
}

impl AliasData {
    /// Replace the binding and drop the stale code cache.
    pub fn set_value(&mut self, v: Value) {
        self.val = v;
        self.code = None;
    }

    /// Shadow the current binding with `v`; the prior binding is kept
    /// for `pop_arg`.
    pub fn push_arg(&mut self, v: Value) {
        let prev = std::mem::replace(&mut self.val, v);
        self.stack.push(prev);
        self.code = None;
    }

    /// Restore the binding shadowed by the latest `push_arg`.
    pub fn pop_arg(&mut self) {
        if let Some(prev) = self.stack.pop() {
            self.val = prev;
            self.code = None;
        }
    }

    /// Temporarily remove the top binding (for `doargs`): the current
    /// binding is returned for a later `redo_arg`, and the shadowed one
    /// becomes current again.
    pub fn undo_arg(&mut self) -> Value {
        let below = self.stack.pop().unwrap_or(Value::Null);
        let saved = std::mem::replace(&mut self.val, below);
        self.code = None;
        saved
    }

    /// Reinstall a binding removed by `undo_arg`.
    pub fn redo_arg(&mut self, saved: Value) {
        let caller = std::mem::replace(&mut self.val, saved);
        self.stack.push(caller);
        self.code = None;
    }
}

/// Payload of a native command.
pub struct CommandData {
    /// Format string describing per-parameter coercion.
    pub fmt: Rc<str>,
    /// Declared parameter count (from the format string).
    pub numargs: usize,
    /// The native callback; reserved forms handled entirely by the VM
    /// (such as `local`) have none.
    pub cb: Option<CommandCb>,
    /// Set when this command is one of the reserved builtin forms.
    pub builtin: Option<Builtin>,
}

/// What an identifier is.
pub enum IdentKind {
    /// Integer variable with an inclusive range.
    Ivar {
        storage: CsInt,
        min: CsInt,
        max: CsInt,
        overrideval: CsInt,
        cb: Option<VarCb>,
    },
    /// Float variable with an inclusive range.
    Fvar {
        storage: CsFloat,
        min: CsFloat,
        max: CsFloat,
        overrideval: CsFloat,
        cb: Option<VarCb>,
    },
    /// String variable.
    Svar {
        storage: Rc<str>,
        overrideval: Rc<str>,
        cb: Option<VarCb>,
    },
    /// User-defined binding; doubles as code when called.
    Alias(AliasData),
    /// Native command.
    Command(CommandData),
}

/// Coarse classification of an identifier, for callers that only need
/// to branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentClass {
    Ivar,
    Fvar,
    Svar,
    Alias,
    Command,
}

/// One entry of the identifier table.
pub struct Ident {
    /// Interned name.
    pub name: Rc<str>,
    /// Slot in the dense table; stable for the identifier's lifetime.
    pub index: usize,
    /// `IDF_*` bits.
    pub flags: u32,
    /// Kind-specific payload.
    pub kind: IdentKind,
}

impl Ident {
    /// Coarse kind of this identifier.
    #[must_use]
    pub const fn class(&self) -> IdentClass {
        match self.kind {
            IdentKind::Ivar { .. } => IdentClass::Ivar,
            IdentKind::Fvar { .. } => IdentClass::Fvar,
            IdentKind::Svar { .. } => IdentClass::Svar,
            IdentKind::Alias(_) => IdentClass::Alias,
            IdentKind::Command(_) => IdentClass::Command,
        }
    }

    /// The builtin tag, when this is a reserved form.
    #[must_use]
    pub fn builtin(&self) -> Option<Builtin> {
        match &self.kind {
            IdentKind::Command(c) => c.builtin,
            _ => None,
        }
    }

    /// Alias payload, if this is an alias.
    #[must_use]
    pub fn alias(&self) -> Option<&AliasData> {
        match &self.kind {
            IdentKind::Alias(a) => Some(a),
            _ => None,
        }
    }

    /// Mutable alias payload, if this is an alias.
    pub fn alias_mut(&mut self) -> Option<&mut AliasData> {
        match &mut self.kind {
            IdentKind::Alias(a) => Some(a),
            _ => None,
        }
    }

    /// Command payload, if this is a command.
    #[must_use]
    pub fn command(&self) -> Option<&CommandData> {
        match &self.kind {
            IdentKind::Command(c) => Some(c),
            _ => None,
        }
    }

    /// True when this is one of the reserved `argN` aliases.
    #[must_use]
    pub const fn is_arg(&self) -> bool {
        self.index < MAX_ARGUMENTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alias(v: Value) -> AliasData {
        AliasData {
            val: v,
            code: None,
            stack: Vec::new(),
        }
    }

    #[test]
    fn push_pop_restores_binding() {
        let mut a = alias(Value::Int(1));
        a.push_arg(Value::Int(2));
        assert_eq!(a.val.get_int(), 2);
        a.pop_arg();
        assert_eq!(a.val.get_int(), 1);
        assert!(a.stack.is_empty());
    }

    #[test]
    fn undo_redo_roundtrip() {
        let mut a = alias(Value::Int(1));
        a.push_arg(Value::Int(2));
        let saved = a.undo_arg();
        assert_eq!(saved.get_int(), 2);
        assert_eq!(a.val.get_int(), 1);
        a.redo_arg(saved);
        assert_eq!(a.val.get_int(), 2);
        a.pop_arg();
        assert_eq!(a.val.get_int(), 1);
    }

    #[test]
    fn set_value_drops_code_cache() {
        let mut a = alias(Value::from("echo hi"));
        a.code = Some(crate::bcode::CodeRef::empty(crate::bcode::RetType::Null));
        a.set_value(Value::from("echo bye"));
        assert!(a.code.is_none());
    }
}
