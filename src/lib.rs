//! This crate prints call stacks that mix native frames with frames of code
//! emitted by a JIT compiler, such as a JavaScript engine embedded in a
//! native host. It walks the frame-pointer chain (no unwind tables needed),
//! so it keeps working from an abort handler.
//!
//! Each return address found on the stack is resolved in turn against:
//!
//! 1. the dynamic symbol table (`dladdr(3)`), demangling C++ and Rust names;
//! 2. the code ranges the managed runtime reports for its JIT code, paired
//!    with the runtime's own stack trace to recover function, script, line
//!    and column;
//! 3. nothing, in which case the bare address is printed.
//!
//! Simple usage:
//! ```no_run
//! use mixtrace::{RecordedRuntime, StackFrameInfo};
//!
//! fn main() {
//!     // Any `Runtime` implementation; usually a binding to the engine.
//!     let runtime = RecordedRuntime::new()
//!         .with_code("LazyCompile:*fib /tmp/fib.js:1", 0x3a1c_0000_4000, 0x180)
//!         .with_frame(StackFrameInfo::new("fib", "/tmp/fib.js", 3, 12));
//!
//!     // Locate the stack top and trace on abort.
//!     mixtrace::install(runtime).unwrap();
//!
//!     // Or print a trace right now.
//!     mixtrace::print_backtrace(mixtrace::main_runtime().unwrap());
//! }
//! ```
//!
//! Sample output:
//! ```text
//! 55d1c1a4b2e0+4f	node::Start(int, char**) /usr/bin/node(0x55d1c0e00000)
//! 3a1c00004000+9c	fib /tmp/fib.js:3:12
//! 3a1c00004000+11a	LazyCompile:*fib /tmp/fib.js:1
//! 7f3e2a829d90+80	<unknown> /lib/x86_64-linux-gnu/libc.so.6(0x7f3e2a800000)
//! 3a1c0000beef
//! ```
//!
//! The walk always starts from a frame record pushed in assembly, so it is
//! well-formed however this crate is compiled. Every frame above it is only
//! reachable if its code keeps frame pointers: build the host with
//! `-C force-frame-pointers=yes` (and C/C++ with `-fno-omit-frame-pointer`)
//! for complete traces.

mod cursor;
mod registers;
mod registry;
mod runtime;
mod stack_top;
mod symbolize;
mod symbols;
mod trigger;
mod utils;

pub use cursor::{walk, walk_from, walk_until, Frame, FrameCursor};
pub use registry::{CodeRange, CodeRegistry, JitCodeEvent, JitCodeEventKind};
pub use runtime::{RecordedRuntime, Runtime, StackFrameInfo, StackTrace, MAX_STACK_TRACE_DEPTH};
pub use stack_top::{init as init_stack_top, locate_from, sentinel_for, stack_top, Convention, ENTRY_POINTS};
pub use symbolize::{Correlation, FrameLine, NameChecked, Positional, TraceContext};
pub use symbols::{demangle, DlAddr, NativeSymbol, SymbolSource};
pub use trigger::{install, main_runtime, mixtrace_print_backtrace, print_backtrace, write_backtrace};
pub use utils::RawStderr;

/// A result type that wraps [Error].
pub type Result<T> = std::result::Result<T, Error>;

/// Error definition.
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("backtrace handler already installed")]
    AlreadyInstalled,

    #[error("sigaction failed: errno {0}")]
    Sigaction(i32),
}
