use std::io;

#[cfg(feature = "mem-protect")]
mod access_check;
#[cfg(feature = "mem-protect")]
pub use access_check::can_access;

/// Unbuffered writer for the standard error stream.
///
/// Every `write` is a single `write(2)` on fd 2 with no locking, which keeps
/// it usable from a signal handler. Callers format a whole line first and
/// hand it over with `write_all`.
#[derive(Debug, Default, Copy, Clone)]
pub struct RawStderr;

impl io::Write for RawStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let n = unsafe { libc::write(libc::STDERR_FILENO, buf.as_ptr() as _, buf.len() as _) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_raw_stderr_write() {
        let mut stderr = RawStderr;
        assert_eq!(stderr.write(b"").unwrap(), 0);
        stderr.flush().unwrap();
    }
}
