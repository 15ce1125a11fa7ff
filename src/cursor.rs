use crate::registers::mixtrace_walk_start;
use crate::stack_top::stack_top;
use std::any::Any;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

/// A frame record as laid down by a function prologue that keeps a frame
/// pointer.
///
/// On both x86_64 (`push rbp; mov rbp, rsp`) and aarch64
/// (`stp x29, x30, [sp, #-16]!; mov x29, sp`) the frame pointer addresses a
/// pair of words: the caller's frame pointer followed by the return address.
/// A `Frame` is only ever viewed in place on the live stack.
#[repr(C)]
#[derive(Debug)]
pub struct Frame {
    /// Back-link to the caller's frame record.
    pub frame_pointer: *const Frame,
    /// The address execution resumes at when this frame's callee returns.
    pub return_address: usize,
}

impl Frame {
    /// The address of this frame record.
    #[inline]
    pub fn address(&self) -> usize {
        self as *const Frame as usize
    }
}

/// `FrameCursor` walks a frame-pointer chain outwards.
///
/// The walk stops when the back-link is null or is not strictly below
/// `top`. With the `mem-protect` feature every record is probed for
/// readability before it is dereferenced, and the chain must move strictly
/// upwards; a broken chain ends the walk instead of faulting.
#[derive(Debug)]
pub struct FrameCursor {
    frame: *const Frame,
    top: usize,
}

impl FrameCursor {
    /// Creates a cursor positioned on `start`.
    ///
    /// # Safety
    ///
    /// `start` and every record reachable from it below `top` must be
    /// readable `Frame`s. Without `mem-protect` nothing checks this.
    #[inline]
    pub unsafe fn new(start: *const Frame, top: usize) -> Self {
        Self { frame: start, top }
    }

    /// Returns the current frame and moves to its caller.
    pub fn step(&mut self) -> Option<&Frame> {
        let frame = self.frame;
        if frame.is_null() || !readable(frame) {
            self.frame = ptr::null();
            return None;
        }
        let current = unsafe { &*frame };
        let next = current.frame_pointer;
        self.frame = if next.is_null() || next as usize >= self.top || !ascends(frame, next) {
            ptr::null()
        } else {
            next
        };
        Some(current)
    }
}

#[cfg(feature = "mem-protect")]
#[inline]
fn readable(frame: *const Frame) -> bool {
    let address = frame as usize;
    crate::utils::can_access(address) && crate::utils::can_access(address + std::mem::size_of::<Frame>() - 1)
}

#[cfg(not(feature = "mem-protect"))]
#[inline]
fn readable(_: *const Frame) -> bool {
    true
}

#[cfg(feature = "mem-protect")]
#[inline]
fn ascends(frame: *const Frame, next: *const Frame) -> bool {
    next > frame
}

#[cfg(not(feature = "mem-protect"))]
#[inline]
fn ascends(_: *const Frame, _: *const Frame) -> bool {
    true
}

/// Walks the frame-pointer chain starting at `start`, bounded by `top`.
///
/// The first `skip` frames are passed over, every later frame is handed to
/// `f`. The closure's return value is an indication of whether the walk
/// should continue; `false` stops it immediately. Returns `false` if the
/// walk was stopped by `f`.
///
/// # Safety
///
/// See [FrameCursor::new].
pub unsafe fn walk_from<F>(start: *const Frame, top: usize, mut skip: usize, mut f: F) -> bool
where
    F: FnMut(&Frame) -> bool,
{
    let mut cursor = FrameCursor::new(start, top);
    while let Some(frame) = cursor.step() {
        if skip > 0 {
            skip -= 1;
        } else if !f(frame) {
            return false;
        }
    }
    true
}

/// Walks the current thread's stack up to (not including) `top`.
///
/// The walk starts from a record pushed by [mixtrace_walk_start], which
/// exists however this crate was compiled; that record itself is never
/// visited. The first frame seen is the one belonging to this function, so
/// its return address lies in the caller of `walk_until`. If this crate was
/// built without frame pointers, that frame is missing and the walk goes on
/// from the caller's record.
///
/// A panic in `f` ends the walk and is resumed once the stack is back in
/// Rust code.
#[inline(never)]
pub fn walk_until<F>(top: usize, skip: usize, f: F) -> bool
where
    F: FnMut(&Frame) -> bool,
{
    let mut walk = Walk {
        top,
        skip,
        f,
        done: true,
        panic: None,
    };
    unsafe { mixtrace_walk_start(on_walk_start::<F>, &mut walk as *mut Walk<F> as *mut c_void) };
    if let Some(payload) = walk.panic {
        panic::resume_unwind(payload);
    }
    walk.done
}

struct Walk<F> {
    top: usize,
    skip: usize,
    f: F,
    done: bool,
    panic: Option<Box<dyn Any + Send>>,
}

extern "C" fn on_walk_start<F>(data: *mut c_void, record: *const Frame)
where
    F: FnMut(&Frame) -> bool,
{
    let walk = unsafe { &mut *(data as *mut Walk<F>) };
    let (top, skip, f) = (walk.top, walk.skip.saturating_add(1), &mut walk.f);
    match panic::catch_unwind(AssertUnwindSafe(|| unsafe { walk_from(record, top, skip, f) })) {
        Ok(done) => walk.done = done,
        Err(payload) => walk.panic = Some(payload),
    }
}

/// Inspects the current call-stack, passing frames into the closure
/// provided.
///
/// The walk is bounded by the process's [stack top](fn@crate::stack_top). The
/// first frame seen carries a return address inside the caller of `walk`;
/// `skip` frames are dropped before the closure sees anything.
#[inline(always)]
pub fn walk<F>(skip: usize, f: F) -> bool
where
    F: FnMut(&Frame) -> bool,
{
    walk_until(stack_top(), skip, f)
}
