use mixtrace::{RecordedRuntime, StackFrameInfo};

fn main() {
    // A host embedding a JIT would implement `Runtime` on top of the engine.
    // Here the code ranges and the managed stack are made up.
    let runtime = RecordedRuntime::new()
        .with_code("LazyCompile:*fib /tmp/fib.js:1", 0x3a1c_0000_4000, 0x180)
        .with_frame(StackFrameInfo::new("fib", "/tmp/fib.js", 3, 12));

    // Locate the top of the stack and arm the SIGABRT handler.
    mixtrace::install(runtime).unwrap();

    // Print a trace of the current stack.
    func1();

    // The handler prints the stack once more before the process dies.
    if std::env::args().any(|arg| arg == "--abort") {
        std::process::abort();
    }
}

#[inline(never)]
fn func1() {
    func2();
    std::hint::black_box(());
}

#[inline(never)]
fn func2() {
    mixtrace::mixtrace_print_backtrace();
    std::hint::black_box(());
}
