//! Locates the outermost frame of the main thread's stack.
//!
//! The frame-pointer chain is not guaranteed to be null-terminated: the C
//! runtime's entry code is usually built without frame pointers, so whatever
//! `%rbp`/`x29` held when it called into the program ends up as the last
//! back-link. We stop the walk at the entry trampoline's frame instead.

use crate::cursor::{walk_until, Frame};
use crate::symbols::{DlAddr, SymbolSource};
use std::sync::OnceLock;

static STACK_TOP: OnceLock<usize> = OnceLock::new();

/// Where the sentinel lies relative to the entry trampoline's frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Convention {
    /// The trampoline keeps a valid back-link; the sentinel is the frame it
    /// links to.
    BackLink,
    /// The trampoline has no usable back-link; the sentinel is the frame
    /// whose return address points into it.
    OwnFrame,
}

/// Entry trampolines that call `main`, with the convention for each.
///
/// Only names in the dynamic symbol table can match. glibc >= 2.34 calls
/// `main` from the local `__libc_start_call_main`, which `dladdr` cannot
/// name, so there the stack top stays unknown.
#[cfg(target_os = "linux")]
pub const ENTRY_POINTS: &[(&str, Convention)] = &[("__libc_start_main", Convention::OwnFrame)];

#[cfg(target_os = "macos")]
pub const ENTRY_POINTS: &[(&str, Convention)] = &[("start", Convention::BackLink)];

/// Returns the address no walk may reach, `usize::MAX` if unknown.
///
/// The first call walks the current stack, so it must happen on the main
/// thread, early: [install](crate::install) does it. Called first from any
/// other thread, the locator finds no entry trampoline and the walk is
/// bounded only by a null back-link.
#[inline]
pub fn stack_top() -> usize {
    *STACK_TOP.get_or_init(|| locate(&DlAddr))
}

/// Forces the one-time stack-top discovery.
pub fn init() {
    stack_top();
}

/// Returns the sentinel implied by `frame` if its return address lies in an
/// entry trampoline.
pub fn sentinel_for(frame: &Frame, symbols: &dyn SymbolSource) -> Option<usize> {
    let name = symbols.lookup(frame.return_address)?.name?;
    let &(_, convention) = ENTRY_POINTS.iter().find(|(entry, _)| *entry == &*name)?;
    Some(match convention {
        Convention::BackLink => frame.frame_pointer as usize,
        Convention::OwnFrame => frame.address(),
    })
}

/// Searches the stack starting at `start` for an entry trampoline.
///
/// # Safety
///
/// See [FrameCursor::new](crate::FrameCursor::new).
pub unsafe fn locate_from(start: *const Frame, symbols: &dyn SymbolSource) -> usize {
    let mut top = usize::MAX;
    crate::cursor::walk_from(start, usize::MAX, 0, search(symbols, &mut top));
    top
}

fn locate(symbols: &dyn SymbolSource) -> usize {
    let mut top = usize::MAX;
    walk_until(usize::MAX, 0, search(symbols, &mut top));
    if top == usize::MAX {
        log::debug!("entry trampoline not found, stack walks are bounded by a null frame pointer");
    } else {
        log::debug!("stack top located at {:#x}", top);
    }
    top
}

fn search<'a>(symbols: &'a dyn SymbolSource, top: &'a mut usize) -> impl FnMut(&Frame) -> bool + 'a {
    move |frame| match sentinel_for(frame, symbols) {
        Some(sentinel) => {
            *top = sentinel;
            false
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::tests::chain;
    use crate::symbols::NativeSymbol;

    struct Names(Vec<(usize, &'static str)>);

    impl SymbolSource for Names {
        fn lookup(&self, address: usize) -> Option<NativeSymbol<'_>> {
            let &(start, name) = self.0.iter().find(|(start, _)| *start == address & !0xff)?;
            Some(NativeSymbol {
                name: Some(name.into()),
                address: start,
                object_path: "/lib/libc.so.6".into(),
                object_base: 0,
            })
        }
    }

    #[test]
    fn test_locate_entry_point() {
        let (entry, _) = ENTRY_POINTS[0];
        let names = Names(vec![(0x1000, "main"), (0x2000, "helper"), (0x3000, entry)]);
        let frames = chain(&[0x2010, 0x1010, 0x3010, 0x4000]);
        let top = unsafe { locate_from(frames.as_ptr(), &names) };
        match ENTRY_POINTS[0].1 {
            Convention::OwnFrame => assert_eq!(top, frames[2].address()),
            Convention::BackLink => assert_eq!(top, frames[3].address()),
        }
    }

    #[test]
    fn test_locate_not_found() {
        let frames = chain(&[0x2010, 0x1010]);
        let top = unsafe { locate_from(frames.as_ptr(), &Names(vec![(0x1000, "main")])) };
        assert_eq!(top, usize::MAX);
    }

    #[test]
    fn test_sentinel_for_unknown_address() {
        let frames = chain(&[0x5010]);
        assert_eq!(sentinel_for(&frames[0], &Names(vec![])), None);
    }

    #[test]
    fn test_stack_top() {
        // Tests run off the main thread, so the entry point may or may not be
        // visible; either way the current frame lies below the top.
        let here = 0usize;
        assert!(stack_top() > &here as *const usize as usize);
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        let top = stack_top();
        init();
        assert_eq!(stack_top(), top);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_entry_points_are_exported() {
        // A trampoline `dladdr` cannot name would never match.
        for (entry, _) in ENTRY_POINTS {
            let name = std::ffi::CString::new(*entry).unwrap();
            let address = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
            assert!(!address.is_null(), "{} is not exported", entry);
        }
    }
}
