use crate::context::CONTEXT;

/// A single call into a [`Sink`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Line<'a> {
    /// One line of text, without a trailing newline
    Text(&'a str),
    /// The end of a logical block (eg. a reason line followed by a backtrace),
    /// anything buffered should be written out now
    Flush,
}

/// The output function used to report fatal events.
///
/// A sink is invoked from within signal handlers, so unless the
/// `LAST_GASP_FORCE_DEMANGLE` toggle has been set, implementations should
/// restrict themselves to async signal safe operations, notably they should
/// not allocate.
pub type Sink = for<'a> fn(Line<'a>);

/// The default [`Sink`], writes every line directly to stderr.
pub fn stderr_sink(line: Line<'_>) {
    match line {
        Line::Text(text) => {
            write_all(2, text.as_bytes());
            write_all(2, b"\n");
        }
        // Nothing is buffered
        Line::Flush => {}
    }
}

/// Replaces the process wide sink, `None` restores [`stderr_sink`].
///
/// This is not synchronized with concurrent reports and should be called
/// during startup, before any other threads are spawned.
pub fn set_sink(sink: Option<Sink>) {
    log::debug!(
        "crash report sink set to {}",
        if sink.is_some() { "custom sink" } else { "stderr" }
    );
    CONTEXT.set_sink(sink);
}

/// Retrieves the current process wide sink
#[inline]
pub fn get_sink() -> Sink {
    CONTEXT.sink().unwrap_or(stderr_sink)
}

/// `write(2)` until everything is written or the descriptor errors out
fn write_all(fd: i32, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        // SAFETY: syscall, the pointer and length come from a valid slice
        let written = unsafe {
            cfg_if::cfg_if! {
                if #[cfg(target_os = "windows")] {
                    libc::write(fd, bytes.as_ptr().cast(), bytes.len().min(u32::MAX as usize) as u32) as isize
                } else {
                    libc::write(fd, bytes.as_ptr().cast(), bytes.len())
                }
            }
        };

        if written > 0 {
            bytes = &bytes[written as usize..];
        } else if written < 0
            && std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted
        {
            continue;
        } else {
            break;
        }
    }
}
