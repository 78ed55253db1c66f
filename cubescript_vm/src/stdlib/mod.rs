//! The standard library, registered purely through the public
//! command-registration interface. Hosts pick the pieces they want via
//! the `LIB_*` bits.

mod base;
mod io;
mod list;
mod loops;
mod math;
mod strlib;

use cubescript_core::state::CsState;
use cubescript_core::CsResult;

/// Control forms, loops and identifier introspection.
pub const LIB_BASE: u32 = 1 << 0;
/// `echo` and `exec`.
pub const LIB_IO: u32 = 1 << 1;
/// Arithmetic, comparisons, trigonometry.
pub const LIB_MATH: u32 = 1 << 2;
/// String manipulation.
pub const LIB_STRING: u32 = 1 << 3;
/// List parsing and iteration.
pub const LIB_LIST: u32 = 1 << 4;
/// Everything.
pub const LIB_ALL: u32 = LIB_BASE | LIB_IO | LIB_MATH | LIB_STRING | LIB_LIST;

/// Register the selected libraries on a state.
pub fn init_libs(cs: &mut CsState, libs: u32) -> CsResult<()> {
    if libs & LIB_BASE != 0 {
        base::init(cs)?;
        loops::init(cs)?;
    }
    if libs & LIB_IO != 0 {
        io::init(cs)?;
    }
    if libs & LIB_MATH != 0 {
        math::init(cs)?;
    }
    if libs & LIB_STRING != 0 {
        strlib::init(cs)?;
    }
    if libs & LIB_LIST != 0 {
        list::init(cs)?;
    }
    Ok(())
}
