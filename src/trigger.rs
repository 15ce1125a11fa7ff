use crate::cursor::walk;
use crate::runtime::Runtime;
use crate::stack_top;
use crate::symbolize::TraceContext;
use crate::utils::RawStderr;
use std::io;
use std::sync::OnceLock;

/// The runtime of the main thread, used when a trace is triggered from
/// outside managed code. Set once by [install], which also arms the abort
/// handler, so the handler is never installed twice.
static MAIN_RUNTIME: OnceLock<Box<dyn Runtime + Send + Sync>> = OnceLock::new();

/// Prints the current mixed native/managed stack to stderr, innermost frame
/// first, starting with the caller of `print_backtrace`.
///
/// Never fails: frames that cannot be resolved are printed as bare
/// addresses, and write errors are ignored.
#[inline(never)]
pub fn print_backtrace(runtime: &dyn Runtime) {
    let mut ctx = TraceContext::new(runtime);
    let mut out = RawStderr;
    walk(1, |frame| {
        let _ = ctx.write_frame(frame, &mut out);
        true
    });
    ctx.teardown();
}

/// Writes the current stack to `out` using `ctx`, starting with the caller
/// of `write_backtrace`.
///
/// Stops at the first write error. `ctx` is torn down either way.
#[inline(never)]
pub fn write_backtrace<W: io::Write + ?Sized>(ctx: &mut TraceContext<'_>, out: &mut W) -> io::Result<()> {
    let mut result = Ok(());
    walk(1, |frame| match ctx.write_frame(frame, out) {
        Ok(()) => true,
        Err(err) => {
            result = Err(err);
            false
        }
    });
    ctx.teardown();
    result
}

/// Returns the runtime registered by [install].
pub fn main_runtime() -> Option<&'static (dyn Runtime + Send + Sync)> {
    MAIN_RUNTIME.get().map(|runtime| &**runtime)
}

/// Prepares the process for tracing.
///
/// Records `runtime` as the main runtime, locates the top of the stack (so
/// this must run on the main thread, before any trace), and installs a
/// `SIGABRT` handler that prints a trace before letting the process die.
pub fn install<R>(runtime: R) -> crate::Result<()>
where
    R: Runtime + Send + Sync + 'static,
{
    MAIN_RUNTIME
        .set(Box::new(runtime))
        .map_err(|_| crate::Error::AlreadyInstalled)?;
    stack_top::init();
    install_abort_handler()
}

fn install_abort_handler() -> crate::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_abort as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(libc::SIGABRT, &action, std::ptr::null_mut()) != 0 {
            let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
            return Err(crate::Error::Sigaction(errno));
        }
    }
    log::debug!("SIGABRT handler installed");
    Ok(())
}

/// Runs at most once: the default disposition is restored before anything
/// else, so a second abort (including one raised while tracing) terminates
/// the process directly.
extern "C" fn on_abort(signal: libc::c_int) {
    unsafe {
        libc::signal(signal, libc::SIG_DFL);
    }
    if let Some(runtime) = main_runtime() {
        print_backtrace(runtime);
    }
    // `signal` stays blocked until we return, then the pending one is
    // delivered with the default action.
    unsafe {
        libc::raise(signal);
    }
}

/// Prints a trace using the runtime registered by [install]. Does nothing if
/// none was registered.
#[no_mangle]
#[inline(never)]
pub extern "C" fn mixtrace_print_backtrace() {
    if let Some(runtime) = main_runtime() {
        print_backtrace(runtime);
    }
}
