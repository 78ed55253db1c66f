//! Error types raised through the interpreter.
//!
//! Script-level failures carry a message plus a snapshot of the alias
//! call stack at the point of failure (bounded by the `dbgalias`
//! variable, with a gap marker when truncated). `break` and `continue`
//! travel as sentinel variants of the same enum so they propagate through
//! `?` like any error until a loop combinator catches them; nothing else
//! may swallow them. Internal invariant violations get their own variant
//! so they can never be mistaken for a script error.

use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// The result type used throughout the interpreter.
pub type CsResult<T> = Result<T, CsError>;

/// Any failure the interpreter can raise.
#[derive(Debug, Clone, Error)]
pub enum CsError {
    /// A script-level error: bad name, range violation, dispatch failure,
    /// recursion overflow and the like.
    #[error("{message}")]
    Script {
        /// Human-readable description.
        message: String,
        /// Alias frames active when the error was raised.
        stack: StackTrace,
    },

    /// Sentinel thrown by `break`; caught by the loop commands.
    #[error("break outside loop")]
    Break,

    /// Sentinel thrown by `continue`; caught by the loop commands.
    #[error("continue outside loop")]
    Continue,

    /// An interpreter invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsError {
    /// True for the `break`/`continue` sentinels.
    #[must_use]
    pub const fn is_loop_signal(&self) -> bool {
        matches!(self, CsError::Break | CsError::Continue)
    }

    /// The stack snapshot, if this is a script error.
    #[must_use]
    pub fn stack(&self) -> Option<&StackTrace> {
        match self {
            CsError::Script { stack, .. } => Some(stack),
            _ => None,
        }
    }
}

/// One alias frame in a stack snapshot; `index` counts from the bottom
/// of the call stack, so the innermost frame has the highest index.
#[derive(Debug, Clone)]
pub struct StackNode {
    /// Position in the call chain (1 = outermost).
    pub index: usize,
    /// Name of the alias that was executing.
    pub name: Rc<str>,
}

/// Snapshot of the active alias frames, most recent first. When the
/// chain was longer than the configured `dbgalias` depth, only the top
/// frames and the outermost one are kept and `gap` is set.
#[derive(Debug, Clone, Default)]
pub struct StackTrace {
    /// Retained frames, innermost first.
    pub nodes: Vec<StackNode>,
    /// True when frames between the last two nodes were dropped.
    pub gap: bool,
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            if node.index == 1 && self.gap {
                write!(f, "  ..{}) {}", node.index, node.name)?;
            } else {
                write!(f, "  {}) {}", node.index, node.name)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_error_displays_message() {
        let err = CsError::Script {
            message: "unknown command: foo".into(),
            stack: StackTrace::default(),
        };
        assert_eq!(err.to_string(), "unknown command: foo");
    }

    #[test]
    fn loop_signals() {
        assert!(CsError::Break.is_loop_signal());
        assert!(CsError::Continue.is_loop_signal());
        assert!(!CsError::Internal("x".into()).is_loop_signal());
    }

    #[test]
    fn trace_formats_with_gap() {
        let trace = StackTrace {
            nodes: vec![
                StackNode {
                    index: 5,
                    name: Rc::from("inner"),
                },
                StackNode {
                    index: 1,
                    name: Rc::from("outer"),
                },
            ],
            gap: true,
        };
        let text = trace.to_string();
        assert!(text.contains("5) inner"));
        assert!(text.contains("..1) outer"));
    }
}
