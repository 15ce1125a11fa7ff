use std::mem::MaybeUninit;

thread_local! {
    static PROBE_PIPE: [libc::c_int; 2] = {
        unsafe {
            let mut fds = MaybeUninit::<[libc::c_int; 2]>::uninit();
            if create_pipe(fds.as_mut_ptr() as *mut libc::c_int) == 0 {
                fds.assume_init()
            } else {
                [-1, -1]
            }
        }
    };
}

/// Check whether the byte at `address` is readable.
///
/// The kernel is asked to copy one byte from `address` into a pipe owned by
/// the current thread; an invalid address fails the `write(2)` with `EFAULT`
/// instead of raising `SIGSEGV`. Only `read(2)`/`write(2)` are involved once
/// the pipe exists, so this is callable from a signal handler.
pub fn can_access(address: usize) -> bool {
    PROBE_PIPE.with(|&[rx, tx]| {
        if rx == -1 || tx == -1 {
            return false;
        }
        drain(rx) && probe(tx, address)
    })
}

/// Empty whatever a previous probe left in the pipe.
fn drain(rx: libc::c_int) -> bool {
    let mut buffer = [0u8; 8];
    loop {
        let size = unsafe { libc::read(rx, buffer.as_mut_ptr() as _, buffer.len() as _) };
        if size >= 0 {
            return true;
        }
        match errno() {
            libc::EINTR => continue,
            libc::EAGAIN => return true,
            _ => return false,
        }
    }
}

fn probe(tx: libc::c_int, address: usize) -> bool {
    loop {
        let size = unsafe { libc::write(tx, address as *const libc::c_void, 1) };
        if size > 0 {
            return true;
        }
        match errno() {
            libc::EINTR => continue,
            // Full pipe: nothing was copied, but the kernel did not fault.
            libc::EAGAIN => return true,
            _ => return false,
        }
    }
}

#[inline]
#[cfg(target_os = "linux")]
unsafe fn create_pipe(fds: *mut libc::c_int) -> libc::c_int {
    libc::pipe2(fds, libc::O_CLOEXEC | libc::O_NONBLOCK)
}

#[cfg(target_os = "macos")]
unsafe fn create_pipe(fds: *mut libc::c_int) -> libc::c_int {
    let res = libc::pipe(fds);
    if res != 0 {
        return res;
    }
    for n in 0..2 {
        let fd = *fds.add(n);
        let res = libc::fcntl(fd, libc::F_SETFD, libc::fcntl(fd, libc::F_GETFD) | libc::FD_CLOEXEC);
        if res != 0 {
            return res;
        }
        let res = libc::fcntl(fd, libc::F_SETFL, libc::fcntl(fd, libc::F_GETFL) | libc::O_NONBLOCK);
        if res != 0 {
            return res;
        }
    }
    0
}

#[inline]
fn errno() -> libc::c_int {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
