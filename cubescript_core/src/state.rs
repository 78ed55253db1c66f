//! Interpreter state: the shared identifier table plus per-thread
//! execution bookkeeping.
//!
//! The table, string pool and replaceable variable printers live in a
//! `SharedState` behind a shared handle; sibling states created with
//! [`CsState::new_thread`] point at the same table but carry their own
//! call stack, ident flags, loop level, hook and recursion depth. None
//! of this is synchronized: one state (and its siblings) belong to one
//! thread of control.

use crate::bcode::{CodeRef, RetType};
use crate::error::{CsError, CsResult, StackNode, StackTrace};
use crate::ident::{
    AliasData, Builtin, CommandCb, CommandData, Ident, IdentClass, IdentKind, VarCb, IDF_ARG,
    IDF_HEX, IDF_OVERRIDDEN, IDF_OVERRIDE, IDF_PERSIST, IDF_READONLY, IDF_UNKNOWN,
    MAX_ARGUMENTS, MAX_COM_ARGS,
};
use crate::strpool::StringPool;
use crate::value::{float_to_str, is_numeric_name, CsFloat, CsInt, Value};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// Callback invoked once per VM dispatch iteration.
pub type HookFn = Rc<dyn Fn(&mut CsState) -> CsResult<()>>;

/// Sink for non-aborting diagnostics.
pub type ErrorSink = Rc<dyn Fn(&str)>;

/// Default recursion cap; configurable per thread.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 255;

/// One entry of the alias call stack: which alias is running and which
/// argument slots carry caller-supplied bindings.
#[derive(Clone, Copy)]
pub struct Frame {
    /// Index of the running alias; `None` for the bottom sentinel and
    /// for frames pushed by `doargs`.
    pub id: Option<usize>,
    /// Bit per `argN` slot.
    pub usedargs: u32,
}

/// State shared by all sibling threads of one interpreter.
pub struct SharedState {
    names: FxHashMap<Rc<str>, usize>,
    idents: Vec<Ident>,
    pool: StringPool,
    dummy: usize,
    empty: [CodeRef; 4],
    cmd_ivar: Option<usize>,
    cmd_fvar: Option<usize>,
    cmd_svar: Option<usize>,
    cmd_var_changed: Option<usize>,
    numargs: usize,
    dbgalias: usize,
}

impl SharedState {
    fn add_ident(&mut self, name: Rc<str>, flags: u32, kind: IdentKind) -> usize {
        let index = self.idents.len();
        self.names.insert(name.clone(), index);
        self.idents.push(Ident {
            name,
            index,
            flags,
            kind,
        });
        index
    }
}

const ALLOWED_BUILTINS: [&str; 7] = [
    "//ivar",
    "//fvar",
    "//svar",
    "//var_changed",
    "//ivar_builtin",
    "//fvar_builtin",
    "//svar_builtin",
];

/// An interpreter thread. The first thread owns state creation; further
/// threads made with [`new_thread`](CsState::new_thread) share the
/// identifier table and string pool.
pub struct CsState {
    shared: Rc<RefCell<SharedState>>,
    /// Thread-wide `IDF_OVERRIDDEN`/`IDF_PERSIST` mode bits applied to
    /// subsequent assignments.
    pub identflags: u32,
    /// Active alias frames; the bottom entry is a sentinel with every
    /// argument marked used.
    pub callstack: Vec<Frame>,
    /// Nesting depth of loop bodies currently executing.
    pub loop_level: usize,
    /// When nonzero, diagnostics are suppressed.
    pub nodebug: u32,
    /// Current VM recursion depth.
    pub rundepth: usize,
    max_call_depth: usize,
    src_file: Option<Rc<str>>,
    src_text: Option<Rc<str>>,
    call_hook: Option<HookFn>,
    error_sink: ErrorSink,
}

impl Default for CsState {
    fn default() -> Self {
        Self::new()
    }
}

impl CsState {
    /// Create a fresh interpreter with the reserved identifiers
    /// installed: `arg1`..`argN`, the dummy sink, `numargs`, `dbgalias`
    /// and the default variable printers.
    #[must_use]
    pub fn new() -> CsState {
        let shared = Rc::new(RefCell::new(SharedState {
            names: FxHashMap::default(),
            idents: Vec::new(),
            pool: StringPool::new(),
            dummy: 0,
            empty: [
                CodeRef::empty(RetType::Null),
                CodeRef::empty(RetType::Int),
                CodeRef::empty(RetType::Float),
                CodeRef::empty(RetType::Str),
            ],
            cmd_ivar: None,
            cmd_fvar: None,
            cmd_svar: None,
            cmd_var_changed: None,
            numargs: 0,
            dbgalias: 0,
        }));
        let mut cs = CsState {
            shared,
            identflags: 0,
            callstack: vec![Frame {
                id: None,
                usedargs: (1u32 << MAX_ARGUMENTS) - 1,
            }],
            loop_level: 0,
            nodebug: 0,
            rundepth: 0,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            src_file: None,
            src_text: None,
            call_hook: None,
            error_sink: Rc::new(|msg: &str| tracing::warn!(target: "cubescript", "{msg}")),
        };
        for i in 0..MAX_ARGUMENTS {
            cs.new_ident(&format!("arg{}", i + 1), IDF_ARG);
        }
        let dummy = cs.new_ident("//dummy", IDF_UNKNOWN);
        {
            let mut sh = cs.shared.borrow_mut();
            sh.dummy = dummy;
        }
        // inverted range marks numargs read-only from definition
        let numargs = cs
            .new_ivar("numargs", MAX_ARGUMENTS as CsInt, 0, 0)
            .expect("fresh table");
        let dbgalias = cs.new_ivar("dbgalias", 0, 1000, 4).expect("fresh table");
        {
            let mut sh = cs.shared.borrow_mut();
            sh.numargs = numargs;
            sh.dbgalias = dbgalias;
        }
        cs.install_builtin_printers();
        cs
    }

    fn install_builtin_printers(&mut self) {
        let iv = self
            .new_command("//ivar_builtin", "$", |cs, args, _| {
                if let Some(idx) = args[0].get_ident() {
                    cs.default_print_var(idx);
                }
                Ok(())
            })
            .expect("fresh table");
        let fv = self
            .new_command("//fvar_builtin", "$", |cs, args, _| {
                if let Some(idx) = args[0].get_ident() {
                    cs.default_print_var(idx);
                }
                Ok(())
            })
            .expect("fresh table");
        let sv = self
            .new_command("//svar_builtin", "$", |cs, args, _| {
                if let Some(idx) = args[0].get_ident() {
                    cs.default_print_var(idx);
                }
                Ok(())
            })
            .expect("fresh table");
        let mut sh = self.shared.borrow_mut();
        sh.cmd_ivar = Some(iv);
        sh.cmd_fvar = Some(fv);
        sh.cmd_svar = Some(sv);
    }

    /// Create a sibling thread sharing this interpreter's identifier
    /// table and string pool. The sibling has its own call stack, mode
    /// flags, hook and recursion bookkeeping.
    #[must_use]
    pub fn new_thread(&self) -> CsState {
        CsState {
            shared: Rc::clone(&self.shared),
            identflags: 0,
            callstack: vec![Frame {
                id: None,
                usedargs: (1u32 << MAX_ARGUMENTS) - 1,
            }],
            loop_level: 0,
            nodebug: 0,
            rundepth: 0,
            max_call_depth: self.max_call_depth,
            src_file: None,
            src_text: None,
            call_hook: None,
            error_sink: self.error_sink.clone(),
        }
    }

    // =========================================================================
    // Thread configuration
    // =========================================================================

    /// Install (or clear) the per-iteration call hook, returning the
    /// previous one.
    pub fn set_call_hook(&mut self, hook: Option<HookFn>) -> Option<HookFn> {
        std::mem::replace(&mut self.call_hook, hook)
    }

    /// Invoke the call hook, if any.
    pub fn run_call_hook(&mut self) -> CsResult<()> {
        if let Some(hook) = self.call_hook.clone() {
            hook(self)?;
        }
        Ok(())
    }

    /// Replace the diagnostic sink.
    pub fn set_error_sink(&mut self, sink: ErrorSink) {
        self.error_sink = sink;
    }

    /// Current recursion cap.
    #[must_use]
    pub fn max_call_depth(&self) -> usize {
        self.max_call_depth
    }

    /// Set the recursion cap, returning the previous one.
    pub fn set_max_call_depth(&mut self, depth: usize) -> usize {
        std::mem::replace(&mut self.max_call_depth, depth)
    }

    /// Whether subsequent assignments run in override mode.
    #[must_use]
    pub fn override_mode(&self) -> bool {
        self.identflags & IDF_OVERRIDDEN != 0
    }

    /// Toggle override mode, returning the previous setting.
    pub fn set_override_mode(&mut self, on: bool) -> bool {
        let was = self.override_mode();
        if on {
            self.identflags |= IDF_OVERRIDDEN;
        } else {
            self.identflags &= !IDF_OVERRIDDEN;
        }
        was
    }

    /// Whether subsequent alias definitions are marked persistent.
    #[must_use]
    pub fn persist_mode(&self) -> bool {
        self.identflags & IDF_PERSIST != 0
    }

    /// Toggle persist mode, returning the previous setting.
    pub fn set_persist_mode(&mut self, on: bool) -> bool {
        let was = self.persist_mode();
        if on {
            self.identflags |= IDF_PERSIST;
        } else {
            self.identflags &= !IDF_PERSIST;
        }
        was
    }

    /// Swap the source name/text used for compile diagnostics, returning
    /// the previous pair.
    pub fn set_source(
        &mut self,
        file: Option<Rc<str>>,
        text: Option<Rc<str>>,
    ) -> (Option<Rc<str>>, Option<Rc<str>>) {
        (
            std::mem::replace(&mut self.src_file, file),
            std::mem::replace(&mut self.src_text, text),
        )
    }

    /// Source file name for diagnostics, if set.
    #[must_use]
    pub fn source_file(&self) -> Option<Rc<str>> {
        self.src_file.clone()
    }

    /// Full source text for line-number computation, if set.
    #[must_use]
    pub fn source_text(&self) -> Option<Rc<str>> {
        self.src_text.clone()
    }

    /// Intern a string in the shared pool.
    pub fn intern(&self, s: &str) -> Rc<str> {
        self.shared.borrow_mut().pool.intern(s)
    }

    /// The canonical empty block for a return type.
    #[must_use]
    pub fn empty_code(&self, ret: RetType) -> CodeRef {
        self.shared.borrow().empty[ret as usize].clone()
    }

    /// Index of the dummy identifier that safely absorbs assignments.
    #[must_use]
    pub fn dummy_idx(&self) -> usize {
        self.shared.borrow().dummy
    }

    // =========================================================================
    // Identifier lookup and creation
    // =========================================================================

    /// Number of identifiers in the table.
    #[must_use]
    pub fn ident_count(&self) -> usize {
        self.shared.borrow().idents.len()
    }

    /// Look up an identifier index by name.
    #[must_use]
    pub fn get_ident(&self, name: &str) -> Option<usize> {
        self.shared.borrow().names.get(name).copied()
    }

    /// Whether a name is defined.
    #[must_use]
    pub fn have_ident(&self, name: &str) -> bool {
        self.get_ident(name).is_some()
    }

    /// Name of an identifier.
    #[must_use]
    pub fn ident_name(&self, idx: usize) -> Rc<str> {
        self.shared.borrow().idents[idx].name.clone()
    }

    /// Flag bits of an identifier.
    #[must_use]
    pub fn ident_flags(&self, idx: usize) -> u32 {
        self.shared.borrow().idents[idx].flags
    }

    /// Coarse kind of an identifier.
    #[must_use]
    pub fn ident_class(&self, idx: usize) -> IdentClass {
        self.shared.borrow().idents[idx].class()
    }

    /// Builtin tag of an identifier, when it is a reserved form.
    #[must_use]
    pub fn ident_builtin(&self, idx: usize) -> Option<Builtin> {
        self.shared.borrow().idents[idx].builtin()
    }

    /// Format string of a command.
    #[must_use]
    pub fn command_fmt(&self, idx: usize) -> Option<Rc<str>> {
        self.shared.borrow().idents[idx].command().map(|c| c.fmt.clone())
    }

    /// Declared parameter count of a command.
    #[must_use]
    pub fn command_numargs(&self, idx: usize) -> usize {
        self.shared.borrow().idents[idx]
            .command()
            .map_or(0, |c| c.numargs)
    }

    /// Callback of a command.
    #[must_use]
    pub fn command_cb(&self, idx: usize) -> Option<CommandCb> {
        self.shared.borrow().idents[idx]
            .command()
            .and_then(|c| c.cb.clone())
    }

    /// Look up a name, creating an unknown alias for it on first
    /// reference. Numeric-looking names are rejected with a diagnostic
    /// and resolve to the dummy identifier.
    pub fn new_ident(&mut self, name: &str, flags: u32) -> usize {
        if let Some(idx) = self.get_ident(name) {
            return idx;
        }
        if is_numeric_name(name) {
            self.diagnostic(format!("number {name} is not a valid identifier name"));
            return self.dummy_idx();
        }
        let mut sh = self.shared.borrow_mut();
        let interned = sh.pool.intern(name);
        sh.add_ident(
            interned,
            flags,
            IdentKind::Alias(AliasData {
                val: Value::Null,
                code: None,
                stack: Vec::new(),
            }),
        )
    }

    /// Coerce a value into an identifier handle, creating an alias for
    /// string values and falling back to the dummy for anything else.
    pub fn force_ident(&mut self, v: &mut Value) -> usize {
        let idx = match v {
            Value::Ident(i) => return *i,
            Value::Str(s) => {
                let name = s.clone();
                self.new_ident(&name, IDF_UNKNOWN)
            }
            Value::Macro(m) => {
                let name = m.as_str().to_string();
                self.new_ident(&name, IDF_UNKNOWN)
            }
            _ => self.dummy_idx(),
        };
        *v = Value::Ident(idx);
        idx
    }

    fn check_new_name(&mut self, name: &str) -> CsResult<()> {
        if self.have_ident(name) {
            return Err(self.error(format!("redefinition of ident '{name}'")));
        }
        if is_numeric_name(name) || name.is_empty() {
            return Err(self.error(format!("'{name}' is not a valid identifier name")));
        }
        Ok(())
    }

    /// Register an integer variable. An inverted range marks the
    /// variable read-only from definition.
    pub fn new_ivar(&mut self, name: &str, min: CsInt, max: CsInt, v: CsInt) -> CsResult<usize> {
        self.new_ivar_with(name, min, max, v, None, 0)
    }

    /// Register an integer variable with a change callback and flags.
    pub fn new_ivar_with(
        &mut self,
        name: &str,
        min: CsInt,
        max: CsInt,
        v: CsInt,
        cb: Option<VarCb>,
        flags: u32,
    ) -> CsResult<usize> {
        self.check_new_name(name)?;
        let flags = flags | if min > max { IDF_READONLY } else { 0 };
        let mut sh = self.shared.borrow_mut();
        let interned = sh.pool.intern(name);
        Ok(sh.add_ident(
            interned,
            flags,
            IdentKind::Ivar {
                storage: v,
                min,
                max,
                overrideval: 0,
                cb,
            },
        ))
    }

    /// Register a float variable.
    pub fn new_fvar(
        &mut self,
        name: &str,
        min: CsFloat,
        max: CsFloat,
        v: CsFloat,
    ) -> CsResult<usize> {
        self.new_fvar_with(name, min, max, v, None, 0)
    }

    /// Register a float variable with a change callback and flags.
    pub fn new_fvar_with(
        &mut self,
        name: &str,
        min: CsFloat,
        max: CsFloat,
        v: CsFloat,
        cb: Option<VarCb>,
        flags: u32,
    ) -> CsResult<usize> {
        self.check_new_name(name)?;
        let flags = flags | if min > max { IDF_READONLY } else { 0 };
        let mut sh = self.shared.borrow_mut();
        let interned = sh.pool.intern(name);
        Ok(sh.add_ident(
            interned,
            flags,
            IdentKind::Fvar {
                storage: v,
                min,
                max,
                overrideval: 0.0,
                cb,
            },
        ))
    }

    /// Register a string variable.
    pub fn new_svar(&mut self, name: &str, v: &str) -> CsResult<usize> {
        self.new_svar_with(name, v, None, 0)
    }

    /// Register a string variable with a change callback and flags.
    pub fn new_svar_with(
        &mut self,
        name: &str,
        v: &str,
        cb: Option<VarCb>,
        flags: u32,
    ) -> CsResult<usize> {
        self.check_new_name(name)?;
        let mut sh = self.shared.borrow_mut();
        let interned = sh.pool.intern(name);
        let storage = sh.pool.intern(v);
        let empty = sh.pool.intern("");
        Ok(sh.add_ident(
            interned,
            flags,
            IdentKind::Svar {
                storage,
                overrideval: empty,
                cb,
            },
        ))
    }

    /// Register a native command with a format-string contract.
    pub fn new_command<F>(&mut self, name: &str, fmt: &str, cb: F) -> CsResult<usize>
    where
        F: Fn(&mut CsState, &mut [Value], &mut Value) -> CsResult<()> + 'static,
    {
        self.add_command(name, fmt, Some(Rc::new(cb)), None)
    }

    /// Register one of the reserved builtin forms. The callback may be
    /// absent for forms the VM handles entirely on its own.
    pub fn new_command_special(
        &mut self,
        name: &str,
        fmt: &str,
        builtin: Builtin,
        cb: Option<CommandCb>,
    ) -> CsResult<usize> {
        self.add_command(name, fmt, cb, Some(builtin))
    }

    fn add_command(
        &mut self,
        name: &str,
        fmt: &str,
        cb: Option<CommandCb>,
        builtin: Option<Builtin>,
    ) -> CsResult<usize> {
        let numargs = self.validate_format(name, fmt)?;
        let mut replace_slot = None;
        if let Some(stripped) = name.strip_prefix("//") {
            let pos = ALLOWED_BUILTINS
                .iter()
                .position(|b| &b[2..] == stripped)
                .ok_or_else(|| self.error(format!("forbidden builtin command: {name}")))?;
            if pos < 4 && !self.have_ident(name) {
                replace_slot = Some(pos);
            }
        }
        self.check_new_name(name)?;
        let mut sh = self.shared.borrow_mut();
        let interned = sh.pool.intern(name);
        let fmt = sh.pool.intern(fmt);
        let idx = sh.add_ident(
            interned,
            0,
            IdentKind::Command(CommandData {
                fmt,
                numargs,
                cb,
                builtin,
            }),
        );
        match replace_slot {
            Some(0) => sh.cmd_ivar = Some(idx),
            Some(1) => sh.cmd_fvar = Some(idx),
            Some(2) => sh.cmd_svar = Some(idx),
            Some(3) => sh.cmd_var_changed = Some(idx),
            _ => {}
        }
        Ok(idx)
    }

    fn validate_format(&self, name: &str, fmt: &str) -> CsResult<usize> {
        let bytes = fmt.as_bytes();
        let mut nargs = 0usize;
        let mut limit = true;
        for (pos, &c) in bytes.iter().enumerate() {
            match c {
                b'i' | b'b' | b'f' | b'F' | b't' | b'T' | b'E' | b'N' | b's' | b'S' | b'e'
                | b'r' | b'$' => {
                    if nargs < MAX_ARGUMENTS {
                        nargs += 1;
                    }
                }
                d @ b'1'..=b'4' => {
                    let n = (d - b'0') as usize;
                    if pos < n {
                        return Err(self.error(format!(
                            "builtin {name} places a repeat mark before {n} parameters"
                        )));
                    }
                    let group = &bytes[pos - n..pos];
                    if group
                        .iter()
                        .any(|g| matches!(*g, b'V' | b'C' | b'1'..=b'4'))
                    {
                        return Err(self
                            .error(format!("builtin {name} repeats a variadic group")));
                    }
                    if !matches!(bytes.get(pos + 1), Some(b'V') | Some(b'C')) {
                        return Err(self.error(format!(
                            "builtin {name} declares repetition without variadic arguments"
                        )));
                    }
                }
                b'C' | b'V' => limit = false,
                other => {
                    return Err(self.error(format!(
                        "builtin {name} declared with illegal type: {}",
                        other as char
                    )));
                }
            }
        }
        if limit && nargs > MAX_COM_ARGS {
            return Err(self.error(format!(
                "builtin {name} declared with too many arguments: {nargs}"
            )));
        }
        Ok(nargs)
    }

    // =========================================================================
    // Variables
    // =========================================================================

    /// Current value of an integer variable slot.
    #[must_use]
    pub fn ivar_value(&self, idx: usize) -> CsInt {
        match self.shared.borrow().idents[idx].kind {
            IdentKind::Ivar { storage, .. } => storage,
            _ => 0,
        }
    }

    /// Current value of a float variable slot.
    #[must_use]
    pub fn fvar_value(&self, idx: usize) -> CsFloat {
        match self.shared.borrow().idents[idx].kind {
            IdentKind::Fvar { storage, .. } => storage,
            _ => 0.0,
        }
    }

    /// Current value of a string variable slot.
    #[must_use]
    pub fn svar_value(&self, idx: usize) -> Rc<str> {
        match &self.shared.borrow().idents[idx].kind {
            IdentKind::Svar { storage, .. } => storage.clone(),
            _ => Rc::from(""),
        }
    }

    /// Swap the `numargs` builtin to reflect an alias call, returning
    /// the previous value.
    pub fn set_numargs(&mut self, n: CsInt) -> CsInt {
        let mut sh = self.shared.borrow_mut();
        let slot = sh.numargs;
        match &mut sh.idents[slot].kind {
            IdentKind::Ivar { storage, .. } => std::mem::replace(storage, n),
            _ => 0,
        }
    }

    /// Current `dbgalias` depth limit.
    #[must_use]
    pub fn dbgalias_value(&self) -> CsInt {
        let sh = self.shared.borrow();
        let slot = sh.dbgalias;
        match sh.idents[slot].kind {
            IdentKind::Ivar { storage, .. } => storage,
            _ => 0,
        }
    }

    fn run_changed(&mut self, idx: usize) {
        let cb = {
            let sh = self.shared.borrow();
            match &sh.idents[idx].kind {
                IdentKind::Ivar { cb, .. }
                | IdentKind::Fvar { cb, .. }
                | IdentKind::Svar { cb, .. } => cb.clone(),
                _ => None,
            }
        };
        if let Some(cb) = cb {
            cb(self, idx);
            return;
        }
        let changed_cb = {
            let sh = self.shared.borrow();
            sh.cmd_var_changed
                .and_then(|c| sh.idents[c].command().and_then(|cmd| cmd.cb.clone()))
        };
        if let Some(cb) = changed_cb {
            let mut args = [Value::Ident(idx)];
            let mut res = Value::Null;
            if let Err(err) = cb(self, &mut args, &mut res) {
                self.diagnostic(format!("variable change handler failed: {err}"));
            }
        }
    }

    /// Begin an override on a variable if the thread or the variable
    /// requests one. Returns false when the assignment must be rejected.
    fn override_var(&mut self, idx: usize) -> bool {
        let (flags, name) = {
            let sh = self.shared.borrow();
            (sh.idents[idx].flags, sh.idents[idx].name.clone())
        };
        if self.identflags & IDF_OVERRIDDEN != 0 || flags & IDF_OVERRIDE != 0 {
            if flags & IDF_PERSIST != 0 {
                self.diagnostic(format!("cannot override persistent variable '{name}'"));
                return false;
            }
            if flags & IDF_OVERRIDDEN == 0 {
                let mut sh = self.shared.borrow_mut();
                let ident = &mut sh.idents[idx];
                match &mut ident.kind {
                    IdentKind::Ivar {
                        storage,
                        overrideval,
                        ..
                    } => *overrideval = *storage,
                    IdentKind::Fvar {
                        storage,
                        overrideval,
                        ..
                    } => *overrideval = *storage,
                    IdentKind::Svar {
                        storage,
                        overrideval,
                        ..
                    } => *overrideval = storage.clone(),
                    _ => {}
                }
                ident.flags |= IDF_OVERRIDDEN;
            }
        } else if flags & IDF_OVERRIDDEN != 0 {
            self.shared.borrow_mut().idents[idx].flags &= !IDF_OVERRIDDEN;
        }
        true
    }

    fn clamp_ivar(&mut self, idx: usize, v: CsInt) -> CsInt {
        let (min, max, flags, name) = {
            let sh = self.shared.borrow();
            match &sh.idents[idx].kind {
                IdentKind::Ivar { min, max, .. } => {
                    (*min, *max, sh.idents[idx].flags, sh.idents[idx].name.clone())
                }
                _ => return v,
            }
        };
        if v >= min && v <= max {
            return v;
        }
        let clamped = v.clamp(min, max);
        let msg = if flags & IDF_HEX != 0 {
            if min <= 255 {
                format!("valid range for '{name}' is {min}..0x{max:X}")
            } else {
                format!("valid range for '{name}' is 0x{min:X}..0x{max:X}")
            }
        } else {
            format!("valid range for '{name}' is {min}..{max}")
        };
        self.diagnostic(msg);
        clamped
    }

    fn clamp_fvar(&mut self, idx: usize, v: CsFloat) -> CsFloat {
        let (min, max, name) = {
            let sh = self.shared.borrow();
            match &sh.idents[idx].kind {
                IdentKind::Fvar { min, max, .. } => (*min, *max, sh.idents[idx].name.clone()),
                _ => return v,
            }
        };
        if v >= min && v <= max {
            return v;
        }
        self.diagnostic(format!(
            "valid range for '{name}' is {}..{}",
            float_to_str(min),
            float_to_str(max)
        ));
        v.clamp(min, max)
    }

    fn readonly_guard(&mut self, idx: usize) -> bool {
        let (flags, name) = {
            let sh = self.shared.borrow();
            (sh.idents[idx].flags, sh.idents[idx].name.clone())
        };
        if flags & IDF_READONLY != 0 {
            self.diagnostic(format!("variable '{name}' is read only"));
            return false;
        }
        true
    }

    /// Checked integer assignment: read-only and override discipline,
    /// clamping with a range diagnostic, then the change callback.
    pub fn set_var_int_checked(&mut self, idx: usize, v: CsInt) {
        if !self.readonly_guard(idx) || !self.override_var(idx) {
            return;
        }
        let v = self.clamp_ivar(idx, v);
        {
            let mut sh = self.shared.borrow_mut();
            if let IdentKind::Ivar { storage, .. } = &mut sh.idents[idx].kind {
                *storage = v;
            }
        }
        self.run_changed(idx);
    }

    /// Checked integer assignment from a call's argument slice. With the
    /// hex display flag, two or three operands assemble an RGB triplet.
    pub fn set_var_int_checked_multi(&mut self, idx: usize, args: &mut [Value]) {
        let mut v = args[0].force_int();
        if self.ident_flags(idx) & IDF_HEX != 0 && args.len() > 1 {
            v = (v << 16) | (args[1].force_int() << 8);
            if args.len() > 2 {
                v |= args[2].force_int();
            }
        }
        self.set_var_int_checked(idx, v);
    }

    /// Checked float assignment.
    pub fn set_var_float_checked(&mut self, idx: usize, v: CsFloat) {
        if !self.readonly_guard(idx) || !self.override_var(idx) {
            return;
        }
        let v = self.clamp_fvar(idx, v);
        {
            let mut sh = self.shared.borrow_mut();
            if let IdentKind::Fvar { storage, .. } = &mut sh.idents[idx].kind {
                *storage = v;
            }
        }
        self.run_changed(idx);
    }

    /// Checked string assignment.
    pub fn set_var_str_checked(&mut self, idx: usize, v: &str) {
        if !self.readonly_guard(idx) || !self.override_var(idx) {
            return;
        }
        {
            let mut sh = self.shared.borrow_mut();
            let interned = sh.pool.intern(v);
            if let IdentKind::Svar { storage, .. } = &mut sh.idents[idx].kind {
                *storage = interned;
            }
        }
        self.run_changed(idx);
    }

    /// Host-facing integer assignment by name; ignores read-only, clamps
    /// silently when asked to.
    pub fn set_var_int(&mut self, name: &str, v: CsInt, dofunc: bool, doclamp: bool) {
        let Some(idx) = self.get_ident(name) else {
            return;
        };
        if self.ident_class(idx) != IdentClass::Ivar || !self.override_var(idx) {
            return;
        }
        {
            let mut sh = self.shared.borrow_mut();
            if let IdentKind::Ivar {
                storage, min, max, ..
            } = &mut sh.idents[idx].kind
            {
                *storage = if doclamp { v.clamp(*min, *max) } else { v };
            }
        }
        if dofunc {
            self.run_changed(idx);
        }
    }

    /// Host-facing float assignment by name.
    pub fn set_var_float(&mut self, name: &str, v: CsFloat, dofunc: bool, doclamp: bool) {
        let Some(idx) = self.get_ident(name) else {
            return;
        };
        if self.ident_class(idx) != IdentClass::Fvar || !self.override_var(idx) {
            return;
        }
        {
            let mut sh = self.shared.borrow_mut();
            if let IdentKind::Fvar {
                storage, min, max, ..
            } = &mut sh.idents[idx].kind
            {
                *storage = if doclamp { v.clamp(*min, *max) } else { v };
            }
        }
        if dofunc {
            self.run_changed(idx);
        }
    }

    /// Host-facing string assignment by name.
    pub fn set_var_str(&mut self, name: &str, v: &str, dofunc: bool) {
        let Some(idx) = self.get_ident(name) else {
            return;
        };
        if self.ident_class(idx) != IdentClass::Svar || !self.override_var(idx) {
            return;
        }
        {
            let mut sh = self.shared.borrow_mut();
            let interned = sh.pool.intern(v);
            if let IdentKind::Svar { storage, .. } = &mut sh.idents[idx].kind {
                *storage = interned;
            }
        }
        if dofunc {
            self.run_changed(idx);
        }
    }

    /// Read an integer variable by name.
    #[must_use]
    pub fn get_var_int(&self, name: &str) -> Option<CsInt> {
        let idx = self.get_ident(name)?;
        match self.shared.borrow().idents[idx].kind {
            IdentKind::Ivar { storage, .. } => Some(storage),
            _ => None,
        }
    }

    /// Read a float variable by name.
    #[must_use]
    pub fn get_var_float(&self, name: &str) -> Option<CsFloat> {
        let idx = self.get_ident(name)?;
        match self.shared.borrow().idents[idx].kind {
            IdentKind::Fvar { storage, .. } => Some(storage),
            _ => None,
        }
    }

    /// Read a string variable by name.
    #[must_use]
    pub fn get_var_str(&self, name: &str) -> Option<Rc<str>> {
        let idx = self.get_ident(name)?;
        match &self.shared.borrow().idents[idx].kind {
            IdentKind::Svar { storage, .. } => Some(storage.clone()),
            _ => None,
        }
    }

    /// Lower bound of an integer variable.
    #[must_use]
    pub fn get_var_min_int(&self, name: &str) -> Option<CsInt> {
        let idx = self.get_ident(name)?;
        match self.shared.borrow().idents[idx].kind {
            IdentKind::Ivar { min, .. } => Some(min),
            _ => None,
        }
    }

    /// Upper bound of an integer variable.
    #[must_use]
    pub fn get_var_max_int(&self, name: &str) -> Option<CsInt> {
        let idx = self.get_ident(name)?;
        match self.shared.borrow().idents[idx].kind {
            IdentKind::Ivar { max, .. } => Some(max),
            _ => None,
        }
    }

    /// Lower bound of a float variable.
    #[must_use]
    pub fn get_var_min_float(&self, name: &str) -> Option<CsFloat> {
        let idx = self.get_ident(name)?;
        match self.shared.borrow().idents[idx].kind {
            IdentKind::Fvar { min, .. } => Some(min),
            _ => None,
        }
    }

    /// Upper bound of a float variable.
    #[must_use]
    pub fn get_var_max_float(&self, name: &str) -> Option<CsFloat> {
        let idx = self.get_ident(name)?;
        match self.shared.borrow().idents[idx].kind {
            IdentKind::Fvar { max, .. } => Some(max),
            _ => None,
        }
    }

    /// Clear an active override on a variable (read-only variables
    /// refuse with a diagnostic).
    pub fn reset_var(&mut self, name: &str) -> bool {
        let Some(idx) = self.get_ident(name) else {
            return false;
        };
        if !self.readonly_guard(idx) {
            return false;
        }
        self.clear_override(idx);
        true
    }

    /// Re-run a variable's change callback without assigning.
    pub fn touch_var(&mut self, name: &str) {
        if let Some(idx) = self.get_ident(name) {
            if matches!(
                self.ident_class(idx),
                IdentClass::Ivar | IdentClass::Fvar | IdentClass::Svar
            ) {
                self.run_changed(idx);
            }
        }
    }

    /// Restore the saved pre-override value of one identifier.
    pub fn clear_override(&mut self, idx: usize) {
        if self.ident_flags(idx) & IDF_OVERRIDDEN == 0 {
            return;
        }
        let class = self.ident_class(idx);
        {
            let mut sh = self.shared.borrow_mut();
            let empty = sh.pool.intern("");
            let ident = &mut sh.idents[idx];
            match &mut ident.kind {
                IdentKind::Alias(a) => {
                    a.set_value(Value::Str(empty));
                }
                IdentKind::Ivar {
                    storage,
                    overrideval,
                    ..
                } => *storage = *overrideval,
                IdentKind::Fvar {
                    storage,
                    overrideval,
                    ..
                } => *storage = *overrideval,
                IdentKind::Svar {
                    storage,
                    overrideval,
                    ..
                } => *storage = overrideval.clone(),
                IdentKind::Command(_) => {}
            }
            ident.flags &= !IDF_OVERRIDDEN;
        }
        if matches!(class, IdentClass::Ivar | IdentClass::Fvar | IdentClass::Svar) {
            self.run_changed(idx);
        }
    }

    /// Restore every overridden identifier.
    pub fn clear_overrides(&mut self) {
        for idx in 0..self.ident_count() {
            self.clear_override(idx);
        }
    }

    /// Print a variable through the installed printer command.
    pub fn print_var(&mut self, idx: usize) -> CsResult<()> {
        let printer = {
            let sh = self.shared.borrow();
            let slot = match sh.idents[idx].class() {
                IdentClass::Ivar => sh.cmd_ivar,
                IdentClass::Fvar => sh.cmd_fvar,
                IdentClass::Svar => sh.cmd_svar,
                _ => None,
            };
            slot.and_then(|c| sh.idents[c].command().and_then(|cmd| cmd.cb.clone()))
        };
        if let Some(cb) = printer {
            let mut args = [Value::Ident(idx)];
            let mut res = Value::Null;
            cb(self, &mut args, &mut res)?;
        }
        Ok(())
    }

    /// The stock `name = value` printing used when the host has not
    /// replaced the printer commands.
    pub fn default_print_var(&mut self, idx: usize) {
        let (name, flags, kind) = {
            let sh = self.shared.borrow();
            let ident = &sh.idents[idx];
            let snapshot = match &ident.kind {
                IdentKind::Ivar { storage, max, .. } => Some((Value::Int(*storage), *max)),
                IdentKind::Fvar { storage, .. } => Some((Value::Float(*storage), 0)),
                IdentKind::Svar { storage, .. } => {
                    Some((Value::Str(storage.clone()), 0))
                }
                _ => None,
            };
            (ident.name.clone(), ident.flags, snapshot)
        };
        let Some((value, max)) = kind else {
            return;
        };
        match value {
            Value::Int(i) => {
                if i >= 0 && flags & IDF_HEX != 0 {
                    if max == 0xFFFFFF {
                        println!(
                            "{name} = 0x{i:06X} ({}, {}, {})",
                            (i >> 16) & 0xFF,
                            (i >> 8) & 0xFF,
                            i & 0xFF
                        );
                    } else {
                        println!("{name} = 0x{i:X}");
                    }
                } else {
                    println!("{name} = {i}");
                }
            }
            Value::Float(f) => println!("{name} = {}", float_to_str(f)),
            Value::Str(s) => {
                if s.contains('"') {
                    println!("{name} = [{s}]");
                } else {
                    println!("{name} = \"{s}\"");
                }
            }
            _ => {}
        }
    }

    // =========================================================================
    // Aliases and argument frames
    // =========================================================================

    /// Clone an alias's current binding.
    #[must_use]
    pub fn alias_value(&self, idx: usize) -> Value {
        self.shared.borrow().idents[idx]
            .alias()
            .map_or(Value::Null, |a| a.val.clone())
    }

    /// Clone an alias's cached compiled body, if any.
    #[must_use]
    pub fn alias_code(&self, idx: usize) -> Option<CodeRef> {
        self.shared.borrow().idents[idx]
            .alias()
            .and_then(|a| a.code.clone())
    }

    /// Cache a compiled body for an alias.
    pub fn set_alias_code(&mut self, idx: usize, code: CodeRef) {
        if let Some(a) = self.shared.borrow_mut().idents[idx].alias_mut() {
            a.code = Some(code);
        }
    }

    /// Assign by name: aliases rebind, variables go through checked
    /// assignment, anything else is refused with a diagnostic. Unknown
    /// non-numeric names create a new alias carrying the thread's mode
    /// flags.
    pub fn set_alias(&mut self, name: &str, v: Value) {
        if let Some(idx) = self.get_ident(name) {
            match self.ident_class(idx) {
                IdentClass::Alias => self.set_alias_idx(idx, v),
                IdentClass::Ivar => self.set_var_int_checked(idx, v.get_int()),
                IdentClass::Fvar => self.set_var_float_checked(idx, v.get_float()),
                IdentClass::Svar => {
                    let s = v.get_str();
                    self.set_var_str_checked(idx, &s);
                }
                IdentClass::Command => {
                    let name = self.ident_name(idx);
                    self.diagnostic(format!("cannot redefine builtin {name} with an alias"));
                }
            }
        } else if is_numeric_name(name) {
            self.diagnostic(format!("cannot alias number {name}"));
        } else {
            let flags = self.identflags;
            let mut sh = self.shared.borrow_mut();
            let interned = sh.pool.intern(name);
            sh.add_ident(
                interned,
                flags,
                IdentKind::Alias(AliasData {
                    val: v,
                    code: None,
                    stack: Vec::new(),
                }),
            );
        }
    }

    /// Assign to a known alias, routing reserved argument slots through
    /// the frame bookkeeping.
    pub fn set_alias_idx(&mut self, idx: usize, v: Value) {
        if idx < MAX_ARGUMENTS {
            self.set_arg(idx, v);
        } else {
            let identflags = self.identflags;
            let mut sh = self.shared.borrow_mut();
            let ident = &mut sh.idents[idx];
            if let IdentKind::Alias(a) = &mut ident.kind {
                a.set_value(v);
                ident.flags = identflags;
            }
        }
    }

    /// Assign to an argument slot: rebind in place when the current
    /// frame already supplied it, otherwise push a binding and mark the
    /// slot used.
    pub fn set_arg(&mut self, idx: usize, v: Value) {
        let used = self.is_arg_used(idx);
        {
            let mut sh = self.shared.borrow_mut();
            match sh.idents[idx].alias_mut() {
                Some(a) if used => a.set_value(v),
                Some(a) => a.push_arg(v),
                None => return,
            }
        }
        if !used {
            self.mark_arg_used(idx);
        }
    }

    /// Shadow an alias binding (clears the unknown flag, as the alias
    /// now demonstrably has a value).
    pub fn push_arg(&mut self, idx: usize, v: Value) {
        let mut sh = self.shared.borrow_mut();
        let ident = &mut sh.idents[idx];
        if let IdentKind::Alias(a) = &mut ident.kind {
            a.push_arg(v);
            ident.flags &= !IDF_UNKNOWN;
        }
    }

    /// Undo the latest shadowing of an alias binding.
    pub fn pop_arg(&mut self, idx: usize) {
        if let Some(a) = self.shared.borrow_mut().idents[idx].alias_mut() {
            a.pop_arg();
        }
    }

    /// Rebind an alias in place without touching its flags or frame
    /// bookkeeping; loop combinators use this for their iteration
    /// variable.
    pub fn rebind_alias(&mut self, idx: usize, v: Value) {
        if let Some(a) = self.shared.borrow_mut().idents[idx].alias_mut() {
            a.set_value(v);
        }
    }

    /// `local` support: shadow a non-argument alias with a null binding.
    pub fn push_alias(&mut self, idx: usize) {
        if idx >= MAX_ARGUMENTS && self.ident_class(idx) == IdentClass::Alias {
            self.push_arg(idx, Value::Null);
        }
    }

    /// Undo a `push_alias`.
    pub fn pop_alias(&mut self, idx: usize) {
        if idx >= MAX_ARGUMENTS && self.ident_class(idx) == IdentClass::Alias {
            self.pop_arg(idx);
        }
    }

    /// Read an alias binding by name as a string; reserved argument
    /// slots outside the current frame read as absent.
    #[must_use]
    pub fn get_alias_val(&self, name: &str) -> Option<Rc<str>> {
        let idx = self.get_ident(name)?;
        if self.ident_class(idx) != IdentClass::Alias {
            return None;
        }
        if idx < MAX_ARGUMENTS && !self.is_arg_used(idx) {
            return None;
        }
        Some(self.alias_value(idx).get_str())
    }

    /// Bitset of caller-supplied argument slots in the active frame.
    #[must_use]
    pub fn frame_used_args(&self) -> u32 {
        self.callstack.last().map_or(0, |f| f.usedargs)
    }

    /// Whether an argument slot carries a binding in the active frame.
    #[must_use]
    pub fn is_arg_used(&self, idx: usize) -> bool {
        self.frame_used_args() & (1 << idx) != 0
    }

    /// Mark an argument slot as bound in the active frame.
    pub fn mark_arg_used(&mut self, idx: usize) {
        if let Some(f) = self.callstack.last_mut() {
            f.usedargs |= 1 << idx;
        }
    }

    /// True when at least one alias frame is active above the sentinel.
    #[must_use]
    pub fn has_alias_frame(&self) -> bool {
        self.callstack.len() > 1
    }

    /// Run `body` with the caller's argument frame temporarily restored:
    /// every argument bound in the current frame is undone, the caller's
    /// used-args view is installed, and afterwards the current bindings
    /// are reinstated. Arguments the body assigned flow back into the
    /// caller's frame.
    pub fn with_caller_args<R>(&mut self, body: impl FnOnce(&mut CsState) -> R) -> R {
        let top = self.callstack.len() - 1;
        if top == 0 {
            return body(self);
        }
        let cur_mask = self.callstack[top].usedargs;
        let mut saved: [Option<Value>; MAX_ARGUMENTS] = std::array::from_fn(|_| None);
        {
            let mut sh = self.shared.borrow_mut();
            let mut mask = cur_mask;
            let mut i = 0;
            while mask != 0 {
                if mask & 1 != 0 {
                    if let Some(a) = sh.idents[i].alias_mut() {
                        saved[i] = Some(a.undo_arg());
                    }
                }
                mask >>= 1;
                i += 1;
            }
        }
        let caller_mask = self.callstack[top - 1].usedargs;
        let cur_id = self.callstack[top].id;
        self.callstack.push(Frame {
            id: cur_id,
            usedargs: caller_mask,
        });
        let result = body(self);
        let link = self.callstack.pop().expect("frame pushed above");
        self.callstack[top - 1].usedargs = link.usedargs;
        {
            let mut sh = self.shared.borrow_mut();
            for (i, slot) in saved.iter_mut().enumerate() {
                if let Some(v) = slot.take() {
                    if let Some(a) = sh.idents[i].alias_mut() {
                        a.redo_arg(v);
                    }
                }
            }
        }
        result
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    fn alias_trace(&self, limit: CsInt) -> (Vec<StackNode>, bool) {
        let frames: Vec<(usize, Rc<str>)> = self
            .callstack
            .iter()
            .skip(1)
            .filter_map(|f| f.id)
            .map(|id| (id, self.ident_name(id)))
            .collect();
        let total = frames.len();
        let mut nodes = Vec::new();
        let mut gap = false;
        for (depth, (_, name)) in frames.iter().rev().enumerate() {
            let index = total - depth;
            if limit <= 0 || (depth as CsInt) < limit - 1 {
                nodes.push(StackNode {
                    index,
                    name: name.clone(),
                });
            } else {
                gap = depth as CsInt != limit - 1 || index != 1;
                nodes.push(StackNode {
                    index: 1,
                    name: frames[0].1.clone(),
                });
                break;
            }
        }
        (nodes, gap)
    }

    /// Emit a non-aborting diagnostic through the error sink, with the
    /// active alias frames appended (bounded by `dbgalias`).
    pub fn diagnostic(&mut self, msg: impl Into<String>) {
        if self.nodebug > 0 {
            return;
        }
        let mut text = msg.into();
        let limit = self.dbgalias_value();
        if limit > 0 {
            let (nodes, gap) = self.alias_trace(limit);
            let trace = StackTrace { nodes, gap };
            let rendered = trace.to_string();
            if !rendered.is_empty() {
                text.push('\n');
                text.push_str(&rendered);
            }
        }
        (self.error_sink)(&text);
    }

    /// Build a raisable script error carrying a snapshot of the active
    /// alias frames.
    #[must_use]
    pub fn error(&self, msg: impl Into<String>) -> CsError {
        let limit = self.dbgalias_value();
        let (nodes, gap) = if limit > 0 {
            self.alias_trace(limit)
        } else {
            (Vec::new(), false)
        };
        CsError::Script {
            message: msg.into(),
            stack: StackTrace { nodes, gap },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_idents_exist() {
        let cs = CsState::new();
        assert_eq!(cs.get_ident("arg1"), Some(0));
        assert_eq!(cs.get_ident("arg25"), Some(24));
        assert!(cs.have_ident("//dummy"));
        assert!(cs.have_ident("numargs"));
        assert!(cs.have_ident("dbgalias"));
        assert!(cs.have_ident("//ivar_builtin"));
    }

    #[test]
    fn index_stability_under_definitions() {
        let mut cs = CsState::new();
        let a = cs.new_ident("alpha", IDF_UNKNOWN);
        for i in 0..100 {
            cs.new_ident(&format!("filler{i}"), IDF_UNKNOWN);
        }
        assert_eq!(cs.get_ident("alpha"), Some(a));
        assert_eq!(&*cs.ident_name(a), "alpha");
    }

    #[test]
    fn numeric_names_resolve_to_dummy() {
        let mut cs = CsState::new();
        let d = cs.dummy_idx();
        assert_eq!(cs.new_ident("123", IDF_UNKNOWN), d);
        assert_eq!(cs.new_ident("-4", IDF_UNKNOWN), d);
        assert_ne!(cs.new_ident("x123", IDF_UNKNOWN), d);
    }

    #[test]
    fn ivar_clamps_and_reports() {
        let mut cs = CsState::new();
        let v = cs.new_ivar("health", 0, 100, 50).unwrap();
        cs.set_var_int_checked(v, 250);
        assert_eq!(cs.ivar_value(v), 100);
        cs.set_var_int_checked(v, -3);
        assert_eq!(cs.ivar_value(v), 0);
        cs.set_var_int_checked(v, 42);
        assert_eq!(cs.ivar_value(v), 42);
    }

    #[test]
    fn inverted_range_is_readonly() {
        let mut cs = CsState::new();
        let v = cs.new_ivar("frozen", 1, 0, 7).unwrap();
        assert!(cs.ident_flags(v) & IDF_READONLY != 0);
        cs.set_var_int_checked(v, 3);
        assert_eq!(cs.ivar_value(v), 7);
    }

    #[test]
    fn redefinition_is_an_error() {
        let mut cs = CsState::new();
        cs.new_ivar("twice", 0, 10, 1).unwrap();
        assert!(cs.new_ivar("twice", 0, 10, 1).is_err());
        assert!(cs.new_command("twice", "i", |_, _, _| Ok(())).is_err());
    }

    #[test]
    fn override_save_and_clear() {
        let mut cs = CsState::new();
        let v = cs
            .new_ivar_with("ov", 0, 100, 10, None, IDF_OVERRIDE)
            .unwrap();
        cs.set_var_int_checked(v, 20);
        assert_eq!(cs.ivar_value(v), 20);
        assert!(cs.ident_flags(v) & IDF_OVERRIDDEN != 0);
        cs.clear_override(v);
        assert_eq!(cs.ivar_value(v), 10);
        assert!(cs.ident_flags(v) & IDF_OVERRIDDEN == 0);
    }

    #[test]
    fn persistent_refuses_override_mode() {
        let mut cs = CsState::new();
        let v = cs
            .new_ivar_with("keep", 0, 100, 10, None, IDF_PERSIST)
            .unwrap();
        cs.set_override_mode(true);
        cs.set_var_int_checked(v, 55);
        assert_eq!(cs.ivar_value(v), 10);
    }

    #[test]
    fn svar_override_roundtrip() {
        let mut cs = CsState::new();
        let v = cs.new_svar("motd", "hello").unwrap();
        cs.set_override_mode(true);
        cs.set_var_str_checked(v, "bye");
        assert_eq!(&*cs.svar_value(v), "bye");
        cs.set_override_mode(false);
        cs.clear_override(v);
        assert_eq!(&*cs.svar_value(v), "hello");
    }

    #[test]
    fn change_callback_fires() {
        use std::cell::Cell;
        let hits = Rc::new(Cell::new(0));
        let hits2 = hits.clone();
        let mut cs = CsState::new();
        let v = cs
            .new_ivar_with(
                "watched",
                0,
                10,
                0,
                Some(Rc::new(move |_, _| hits2.set(hits2.get() + 1))),
                0,
            )
            .unwrap();
        cs.set_var_int_checked(v, 5);
        cs.touch_var("watched");
        assert_eq!(hits.get(), 2);
        let _ = v;
    }

    #[test]
    fn alias_assignment_routes_by_kind() {
        let mut cs = CsState::new();
        cs.set_alias("greeting", Value::from("hi"));
        let idx = cs.get_ident("greeting").unwrap();
        assert_eq!(&*cs.alias_value(idx).get_str(), "hi");
        let v = cs.new_ivar("num", 0, 10, 0).unwrap();
        cs.set_alias("num", Value::Int(7));
        assert_eq!(cs.ivar_value(v), 7);
    }

    #[test]
    fn format_validation() {
        let mut cs = CsState::new();
        assert!(cs.new_command("ok", "ifs", |_, _, _| Ok(())).is_ok());
        assert!(cs.new_command("varargs", "i1V", |_, _, _| Ok(())).is_ok());
        assert!(cs.new_command("badchar", "iz", |_, _, _| Ok(())).is_err());
        assert!(cs.new_command("badrep", "1V", |_, _, _| Ok(())).is_err());
        assert!(cs.new_command("norep", "ii2", |_, _, _| Ok(())).is_err());
        assert!(cs
            .new_command("toomany", "iiiiiiiiiiiii", |_, _, _| Ok(()))
            .is_err());
    }

    #[test]
    fn forbidden_builtin_rejected() {
        let mut cs = CsState::new();
        assert!(cs.new_command("//evil", "i", |_, _, _| Ok(())).is_err());
        // the replaceable slot accepts one registration
        assert!(cs.new_command("//ivar", "$", |_, _, _| Ok(())).is_ok());
        assert!(cs.new_command("//ivar", "$", |_, _, _| Ok(())).is_err());
    }

    #[test]
    fn caller_args_roundtrip() {
        let mut cs = CsState::new();
        // caller frame binds arg1 = "outer"
        cs.callstack.push(Frame {
            id: None,
            usedargs: 0,
        });
        cs.set_arg(0, Value::from("outer"));
        // callee frame binds arg1 = "inner"
        cs.callstack.push(Frame {
            id: None,
            usedargs: 0,
        });
        cs.set_arg(0, Value::from("inner"));
        let before = cs.frame_used_args();
        cs.with_caller_args(|cs| {
            assert_eq!(&*cs.alias_value(0).get_str(), "outer");
        });
        assert_eq!(cs.frame_used_args(), before);
        assert_eq!(&*cs.alias_value(0).get_str(), "inner");
    }

    #[test]
    fn sibling_threads_share_idents() {
        let mut cs = CsState::new();
        cs.set_alias("shared", Value::Int(1));
        let sib = cs.new_thread();
        assert!(sib.have_ident("shared"));
        assert!(!sib.override_mode());
    }
}
