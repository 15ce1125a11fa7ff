use crate::cursor::Frame;
use std::ffi::c_void;

/// Invoked by [mixtrace_walk_start] with its own frame record.
pub type WalkCallback = extern "C" fn(data: *mut c_void, record: *const Frame);

extern "C" {
    /// Establish a frame record and hand it to `callback`.
    ///
    /// The implementation of this function is linked to the assembly code of
    /// different architectures: `src/arch/x86_64.S` (`%rbp`) and
    /// `src/arch/aarch64.S` (`x29`). The record passed to `callback` is the
    /// routine's own: its back-link is the frame pointer of the caller and
    /// its return address lies inside the caller. Both are valid for the
    /// duration of the callback only.
    ///
    /// `callback` must not unwind.
    pub fn mixtrace_walk_start(callback: WalkCallback, data: *mut c_void);
}
