use crate::cursor::Frame;
use crate::registry::{CodeRange, CodeRegistry};
use crate::runtime::{Runtime, StackFrameInfo, StackTrace, MAX_STACK_TRACE_DEPTH};
use crate::symbols::{DlAddr, SymbolSource};
use std::borrow::Cow;
use std::fmt::{self, Write as _};
use std::io;

/// Decides which managed frame, if any, a JIT code frame corresponds to.
///
/// Physical frames that land in JIT code and the runtime's own stack trace
/// are two independent views of the same stack. Nothing ties an entry of the
/// snapshot to a particular physical frame except order, so a strategy is
/// consulted once per physical frame found in a [CodeRange], innermost
/// first.
pub trait Correlation {
    /// Rewinds to the innermost snapshot entry.
    fn reset(&mut self);

    /// Picks the snapshot entry for a physical frame inside `code`.
    fn correlate<'s>(&mut self, snapshot: &'s StackTrace, code: &CodeRange) -> Option<&'s StackFrameInfo>;
}

/// The n-th JIT code frame is the n-th snapshot entry.
///
/// The cursor advances once per call while entries remain, whether or not
/// the entry is used. Entries without a function name are not attributed.
/// If the runtime reports a frame that has no physical counterpart in JIT
/// code (or the reverse), every later frame is attributed to the wrong
/// function.
#[derive(Debug, Default, Clone)]
pub struct Positional {
    cursor: usize,
}

impl Positional {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshot entries consumed so far.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl Correlation for Positional {
    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn correlate<'s>(&mut self, snapshot: &'s StackTrace, _: &CodeRange) -> Option<&'s StackFrameInfo> {
        let frame = snapshot.frame(self.cursor)?;
        self.cursor += 1;
        Some(frame).filter(|f| !f.function_name.is_empty())
    }
}

/// Like [Positional], but an entry is only attributed if its function name
/// occurs in the name the runtime gave the code range.
///
/// Engines name code objects after the function they were compiled from
/// (`"LazyCompile:*fib /tmp/fib.js:1"`), so a disagreement means the two
/// views have drifted apart and the range's own name is the safer output.
#[derive(Debug, Default, Clone)]
pub struct NameChecked {
    inner: Positional,
}

impl NameChecked {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Correlation for NameChecked {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn correlate<'s>(&mut self, snapshot: &'s StackTrace, code: &CodeRange) -> Option<&'s StackFrameInfo> {
        self.inner
            .correlate(snapshot, code)
            .filter(|f| code.name().contains(f.function_name.as_str()))
    }
}

/// One line of a trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameLine {
    /// Resolved through the dynamic symbol table.
    Native {
        symbol_address: usize,
        offset: usize,
        name: String,
        object_path: String,
        object_base: usize,
    },
    /// JIT code attributed to a managed frame.
    Script {
        code_start: usize,
        offset: usize,
        function_name: String,
        script_name: String,
        line: u32,
        column: u32,
    },
    /// JIT code known only by the name it was registered under.
    Code { code_start: usize, offset: usize, name: String },
    /// Nothing known about the address.
    Address(usize),
}

impl fmt::Display for FrameLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameLine::Native {
                symbol_address,
                offset,
                name,
                object_path,
                object_base,
            } => write!(f, "{:x}+{:x}\t{} {}({:#x})", symbol_address, offset, name, object_path, object_base),
            FrameLine::Script {
                code_start,
                offset,
                function_name,
                script_name,
                line,
                column,
            } => write!(
                f,
                "{:x}+{:x}\t{} {}:{}:{}",
                code_start, offset, function_name, script_name, line, column
            ),
            FrameLine::Code { code_start, offset, name } => write!(f, "{:x}+{:x}\t{}", code_start, offset, name),
            FrameLine::Address(address) => write!(f, "{:x}", address),
        }
    }
}

/// Scratch state of a single trace.
///
/// The code registry and the managed stack snapshot are filled the first
/// time a frame misses the native symbol table, and dropped by
/// [TraceContext::teardown]. A context must not outlive the trace it was
/// created for: code may move or be collected between traces.
pub struct TraceContext<'a> {
    runtime: &'a dyn Runtime,
    symbols: &'a dyn SymbolSource,
    correlation: Box<dyn Correlation + 'a>,
    registry: CodeRegistry,
    snapshot: StackTrace,
    primed: bool,
}

impl<'a> TraceContext<'a> {
    /// Creates a context resolving native frames with `dladdr(3)` and
    /// correlating JIT frames [positionally](Positional).
    pub fn new(runtime: &'a dyn Runtime) -> Self {
        Self {
            runtime,
            symbols: &DlAddr,
            correlation: Box::new(Positional::new()),
            registry: CodeRegistry::new(),
            snapshot: StackTrace::new(),
            primed: false,
        }
    }

    pub fn with_symbols(mut self, symbols: &'a dyn SymbolSource) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn with_correlation(mut self, correlation: impl Correlation + 'a) -> Self {
        self.correlation = Box::new(correlation);
        self
    }

    #[inline]
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    #[inline]
    pub fn registry(&self) -> &CodeRegistry {
        &self.registry
    }

    #[inline]
    pub fn snapshot(&self) -> &StackTrace {
        &self.snapshot
    }

    /// Collects the runtime's JIT code and managed stack, once per trace.
    pub fn prime(&mut self) {
        if self.primed {
            return;
        }
        self.primed = true;
        let registry = &mut self.registry;
        self.runtime.enumerate_code(&mut |event| registry.on_code_event(event));
        self.snapshot = self.runtime.current_stack_trace(MAX_STACK_TRACE_DEPTH);
        self.correlation.reset();
    }

    /// Resolves a frame's return address.
    #[inline]
    pub fn symbolize(&mut self, frame: &Frame) -> FrameLine {
        self.resolve(frame.return_address)
    }

    /// Resolves `address`: native symbols first, then JIT code, then nothing.
    pub fn resolve(&mut self, address: usize) -> FrameLine {
        if let Some(symbol) = self.symbols.lookup(address) {
            return FrameLine::Native {
                symbol_address: symbol.address,
                offset: address.wrapping_sub(symbol.address),
                name: symbol
                    .display_name()
                    .map_or_else(|| String::from("<unknown>"), Cow::into_owned),
                object_path: symbol.object_path.into_owned(),
                object_base: symbol.object_base,
            };
        }

        self.prime();
        let code = match self.registry.find(address) {
            Some(code) => code,
            None => return FrameLine::Address(address),
        };
        let offset = address.wrapping_sub(code.start());
        match self.correlation.correlate(&self.snapshot, code) {
            Some(frame) => FrameLine::Script {
                code_start: code.start(),
                offset,
                function_name: frame.function_name.clone(),
                script_name: frame.script_name.clone(),
                line: frame.line,
                column: frame.column,
            },
            None => FrameLine::Code {
                code_start: code.start(),
                offset,
                name: code.name().to_owned(),
            },
        }
    }

    /// Symbolizes `frame` and writes it to `out` as one line, in a single
    /// `write_all`.
    pub fn write_frame<W: io::Write + ?Sized>(&mut self, frame: &Frame, out: &mut W) -> io::Result<()> {
        let mut line = String::with_capacity(128);
        // Writing to a `String` cannot fail.
        let _ = writeln!(line, "{}", self.symbolize(frame));
        out.write_all(line.as_bytes())
    }

    /// Drops everything collected during the trace.
    pub fn teardown(&mut self) {
        self.registry.clear();
        self.snapshot.clear();
        self.correlation.reset();
        self.primed = false;
    }
}
