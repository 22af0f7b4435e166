//! Fatal diagnostics.
//!
//! A violation may be detected inside any `memcpy` in the process, including
//! ones issued by the allocator or under foreign locks. The report therefore
//! formats into a fixed stack buffer, goes out through a single `write(2)`,
//! and the process ends with `abort()`. No allocation, no locks, no unwinding.

use std::fmt::{self, Write as _};

use softmte_membrane::{TagViolation, reentry};

const DIAG_CAPACITY: usize = 512;

/// Fixed-capacity line buffer. Output beyond capacity is dropped.
pub struct DiagBuf {
    buf: [u8; DIAG_CAPACITY],
    len: usize,
}

impl DiagBuf {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: [0; DIAG_CAPACITY],
            len: 0,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn emit_stderr(&self) {
        // SAFETY: buf is valid for len bytes; fd 2 may be closed, in which
        // case write fails and there is nothing else to try.
        unsafe {
            libc::write(2, self.buf.as_ptr().cast(), self.len);
        }
    }
}

impl Default for DiagBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for DiagBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if self.len == DIAG_CAPACITY {
                break;
            }
            self.buf[self.len] = byte;
            self.len += 1;
        }
        Ok(())
    }
}

/// Render the one-line report for `violation`.
#[must_use]
pub fn render_violation(violation: &TagViolation) -> DiagBuf {
    let mut out = DiagBuf::new();
    let _ = writeln!(out, "{violation}");
    out
}

/// Report a tag violation and abort the process.
pub fn violation(violation: &TagViolation) -> ! {
    // Anything copied while reporting goes straight to the real primitive.
    let _inside = reentry::enter();
    render_violation(violation).emit_stderr();
    // SAFETY: abort never returns.
    unsafe { libc::abort() }
}

/// Report that the real primitives could not be found and abort.
pub fn unresolved(operation: &str) -> ! {
    let _inside = reentry::enter();
    let mut out = DiagBuf::new();
    let _ = writeln!(
        out,
        "softmte: cannot resolve the real {operation} via dlsym(RTLD_NEXT)"
    );
    out.emit_stderr();
    // SAFETY: abort never returns.
    unsafe { libc::abort() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use softmte_membrane::{Operand, Tag, TagCheck, TaggedPtr};

    #[test]
    fn renders_mismatch_line() {
        let violation = TagViolation {
            operation: "memcpy",
            operand: Operand::Destination,
            ptr: TaggedPtr::new(0x7f00_0000_1000, Tag::from_nibble(0xA)),
            check: TagCheck::Mismatch {
                raw: 0x7f00_0000_1000,
                pointer_tag: Tag::from_nibble(0xA),
                shadow_tag: Tag::from_nibble(0xB),
            },
        };
        let line = render_violation(&violation);
        assert_eq!(
            std::str::from_utf8(line.as_bytes()).expect("utf8"),
            "softmte: tag mismatch in memcpy (dest): ptr=0xa0007f0000001000 \
             raw=0x7f0000001000 pointer_tag=0xa shadow_tag=0xb\n"
        );
    }

    #[test]
    fn overlong_output_is_truncated() {
        let mut out = DiagBuf::new();
        for _ in 0..100 {
            let _ = out.write_str("0123456789");
        }
        assert_eq!(out.as_bytes().len(), DIAG_CAPACITY);
    }
}
