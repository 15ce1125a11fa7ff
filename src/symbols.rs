use cpp_demangle::{DemangleOptions, Symbol};
use std::borrow::Cow;
use std::ffi::CStr;
use std::mem::MaybeUninit;

/// The nearest exported symbol at or before an address, as reported by the
/// dynamic loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeSymbol<'a> {
    /// Symbol name, still mangled. `None` when the loader found the
    /// containing object but no symbol in it.
    pub name: Option<Cow<'a, str>>,
    /// Address of the symbol (`0` when there is no symbol).
    pub address: usize,
    /// Path of the shared object or executable containing the address.
    pub object_path: Cow<'a, str>,
    /// Load base of that object.
    pub object_base: usize,
}

impl NativeSymbol<'_> {
    /// The symbol name in human-readable form: demangled if possible, the raw
    /// name otherwise.
    pub fn display_name(&self) -> Option<Cow<'_, str>> {
        let name = self.name.as_deref()?;
        Some(match demangle(name) {
            Some(demangled) => Cow::Owned(demangled),
            None => Cow::Borrowed(name),
        })
    }
}

/// A source of native symbol information.
pub trait SymbolSource {
    /// Looks up the symbol containing `address`. Returns `None` if the
    /// address is not inside any loaded object.
    fn lookup(&self, address: usize) -> Option<NativeSymbol<'_>>;
}

/// [SymbolSource] backed by `dladdr(3)`.
///
/// Only symbols in the dynamic symbol table are visible, so static
/// functions resolve to the nearest preceding exported symbol.
#[derive(Debug, Default, Copy, Clone)]
pub struct DlAddr;

impl SymbolSource for DlAddr {
    fn lookup(&self, address: usize) -> Option<NativeSymbol<'_>> {
        let mut info = MaybeUninit::<libc::Dl_info>::zeroed();
        let ok = unsafe { libc::dladdr(address as *const libc::c_void, info.as_mut_ptr()) };
        if ok == 0 {
            return None;
        }
        let info = unsafe { info.assume_init() };
        Some(NativeSymbol {
            name: unsafe { loader_str(info.dli_sname) },
            address: info.dli_saddr as usize,
            object_path: unsafe { loader_str(info.dli_fname) }.unwrap_or(Cow::Borrowed("<unknown>")),
            object_base: info.dli_fbase as usize,
        })
    }
}

/// Strings handed out by the loader live as long as the object stays
/// loaded. Invalid UTF-8 is replaced rather than dropped.
unsafe fn loader_str(s: *const libc::c_char) -> Option<Cow<'static, str>> {
    if s.is_null() {
        return None;
    }
    Some(CStr::from_ptr(s).to_string_lossy())
}

/// Demangles a Rust (legacy or v0) or Itanium C++ symbol name.
///
/// Returns `None` if `name` is not mangled or fails to demangle.
pub fn demangle(name: &str) -> Option<String> {
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        return Some(format!("{:#}", demangled));
    }
    if !name.starts_with("_Z") {
        return None;
    }
    Symbol::new(name).ok()?.demangle(&DemangleOptions::default()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    #[no_mangle]
    extern "C" fn mixtrace_symbols_marker() -> usize {
        std::hint::black_box(42)
    }

    #[test]
    fn test_demangle_cpp() {
        assert_eq!(demangle("_ZN2v88internal7Isolate4InitEv").as_deref(), Some("v8::internal::Isolate::Init()"));
        assert_eq!(demangle("_Z3fooi").as_deref(), Some("foo(int)"));
    }

    #[test]
    fn test_demangle_rust() {
        assert_eq!(
            demangle("_ZN4core3ptr13drop_in_place17h1234567890abcdefE").as_deref(),
            Some("core::ptr::drop_in_place")
        );
    }

    #[test]
    fn test_demangle_plain() {
        assert_eq!(demangle("main"), None);
        assert_eq!(demangle("__libc_start_main"), None);
        assert_eq!(demangle("_Z$$$"), None);
    }

    #[test]
    fn test_display_name() {
        let symbol = NativeSymbol {
            name: Some("_Z3fooi".into()),
            address: 0x1000,
            object_path: "/bin/app".into(),
            object_base: 0,
        };
        assert_eq!(symbol.display_name().as_deref(), Some("foo(int)"));
        let symbol = NativeSymbol {
            name: Some("bar".into()),
            ..symbol
        };
        assert_eq!(symbol.display_name().as_deref(), Some("bar"));
        let symbol = NativeSymbol { name: None, ..symbol };
        assert_eq!(symbol.display_name(), None);
    }

    #[test]
    fn test_dladdr_lookup() {
        // `dladdr` only sees the dynamic symbol table; the executable is not
        // always linked with `-rdynamic`, so only the object is guaranteed.
        let address = mixtrace_symbols_marker as *const () as usize;
        let symbol = DlAddr.lookup(address + 1).unwrap();
        assert!(!symbol.object_path.is_empty());
        assert_ne!(symbol.object_base, 0);
        assert!(symbol.object_base <= address);
    }

    #[test]
    fn test_loader_str_lossy() {
        let valid = b"_ZN3foo3barE\0";
        let name = unsafe { loader_str(valid.as_ptr() as *const libc::c_char) };
        assert!(matches!(name, Some(Cow::Borrowed("_ZN3foo3barE"))));
        let invalid = b"/opt/app\xff/lib.so\0";
        let path = unsafe { loader_str(invalid.as_ptr() as *const libc::c_char) };
        assert_eq!(path.as_deref(), Some("/opt/app\u{fffd}/lib.so"));
        assert_eq!(unsafe { loader_str(std::ptr::null()) }, None);
    }

    #[test]
    fn test_dladdr_miss() {
        let v = Box::new(0u64);
        assert_eq!(DlAddr.lookup(v.as_ref() as *const u64 as usize), None);
        assert_eq!(DlAddr.lookup(0), None);
    }
}
