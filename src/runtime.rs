//! The managed runtime as seen from the stack walker.

use crate::registry::{JitCodeEvent, JitCodeEventKind};
use smallvec::SmallVec;

/// Upper bound on the managed frames captured per trace.
pub const MAX_STACK_TRACE_DEPTH: usize = 64;

/// One managed frame as reported by the runtime's own stack-trace API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackFrameInfo {
    pub function_name: String,
    pub script_name: String,
    pub line: u32,
    pub column: u32,
}

impl StackFrameInfo {
    pub fn new(function_name: impl Into<String>, script_name: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            function_name: function_name.into(),
            script_name: script_name.into(),
            line,
            column,
        }
    }
}

/// A snapshot of the managed stack, innermost frame first.
#[derive(Debug, Clone, Default)]
pub struct StackTrace {
    frames: SmallVec<[StackFrameInfo; MAX_STACK_TRACE_DEPTH]>,
}

impl StackTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame. Frames beyond [MAX_STACK_TRACE_DEPTH] are dropped
    /// and `false` is returned.
    pub fn push(&mut self, frame: StackFrameInfo) -> bool {
        if self.frames.len() >= MAX_STACK_TRACE_DEPTH {
            return false;
        }
        self.frames.push(frame);
        true
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn frame(&self, index: usize) -> Option<&StackFrameInfo> {
        self.frames.get(index)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

impl FromIterator<StackFrameInfo> for StackTrace {
    fn from_iter<I: IntoIterator<Item = StackFrameInfo>>(iter: I) -> Self {
        Self {
            frames: iter.into_iter().take(MAX_STACK_TRACE_DEPTH).collect(),
        }
    }
}

/// Introspection calls the walker needs from a managed runtime.
///
/// Both calls happen synchronously on the tracing thread, possibly inside a
/// signal handler.
pub trait Runtime {
    /// Replays every piece of code compiled so far through `handler`, then
    /// stops delivering events. Must not return before the last event has
    /// been delivered.
    fn enumerate_code(&self, handler: &mut dyn FnMut(&JitCodeEvent<'_>));

    /// Captures up to `max_frames` managed frames, innermost first.
    fn current_stack_trace(&self, max_frames: usize) -> StackTrace;
}

impl<R: Runtime + ?Sized> Runtime for &R {
    fn enumerate_code(&self, handler: &mut dyn FnMut(&JitCodeEvent<'_>)) {
        (**self).enumerate_code(handler)
    }

    fn current_stack_trace(&self, max_frames: usize) -> StackTrace {
        (**self).current_stack_trace(max_frames)
    }
}

/// A [Runtime] whose code and stack are supplied up front.
///
/// Useful for hosts that already track their JIT code themselves, and for
/// exercising the symbolizer without a live engine.
#[derive(Debug, Clone, Default)]
pub struct RecordedRuntime {
    code: Vec<(Vec<u8>, usize, usize)>,
    frames: Vec<StackFrameInfo>,
}

impl RecordedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announces `len` bytes of code at `start` named `name`.
    pub fn with_code(mut self, name: impl AsRef<[u8]>, start: usize, len: usize) -> Self {
        self.code.push((name.as_ref().to_vec(), start, len));
        self
    }

    /// Appends a managed frame, the caller of the ones already recorded.
    pub fn with_frame(mut self, frame: StackFrameInfo) -> Self {
        self.frames.push(frame);
        self
    }
}

impl Runtime for RecordedRuntime {
    fn enumerate_code(&self, handler: &mut dyn FnMut(&JitCodeEvent<'_>)) {
        for (name, start, len) in &self.code {
            handler(&JitCodeEvent {
                kind: JitCodeEventKind::CodeAdded,
                name,
                start: *start,
                len: *len,
            });
        }
    }

    fn current_stack_trace(&self, max_frames: usize) -> StackTrace {
        self.frames.iter().take(max_frames).cloned().collect()
    }
}
