//! Reports why and where a process died, then terminates it.
//!
//! After [`install`] (or [`HandlerSetup::new`]) every fatal event in the
//! process results in a single reason line such as
//!
//! ```text
//! !!! TERMINATING DUE TO SEGMENTATION FAULT (address not mapped to object) @ 0x12345678
//! ```
//!
//! optionally followed by a backtrace, after which the process exits with
//! [`EXIT_CODE`], without running destructors or `atexit` handlers. The output
//! goes to stderr by default, this can be changed with [`set_sink`].
//!
//! # Linux
//!
//! On Linux this is done by handling [signals](https://man7.org/linux/man-pages/man7/signal.7.html),
//! namely `SIGABRT`, `SIGBUS`, `SIGFPE`, `SIGILL` and `SIGSEGV`.
//!
//! The handlers run on an [alternate signal stack](https://man7.org/linux/man-pages/man2/sigaltstack.2.html)
//! that is installed for the thread calling [`install`], which is necessary
//! to report a `SIGSEGV` caused by a stack overflow. Other threads use the
//! alternate stack that [`std::thread`] installs for them.
//!
//! Only a small subset of libc functions are
//! [async signal safe](https://man7.org/linux/man-pages/man7/signal-safety.7.html),
//! so reports made from a signal handler run in [`Mode::Restricted`], without
//! allocating, which means symbol names come from the dynamic symbol table and
//! are not demangled. Setting `LAST_GASP_FORCE_DEMANGLE=1` lifts this at the
//! risk of deadlocking if the fault happened inside the allocator.
//!
//! An executable's dynamic symbol table only lists what it exports, so in
//! [`Mode::Restricted`] frames of the main executable are printed as bare
//! addresses unless it is linked with `-rdynamic` (eg.
//! `RUSTFLAGS="-C link-args=-rdynamic"`). Frames in shared libraries are
//! named either way.
//!
//! With the default `itanium-abi` feature this crate also exports
//! `__cxa_pure_virtual` and `__cxa_deleted_virtual`, so that calls through
//! missing virtual functions in linked C++ code are reported.
//!
//! # Windows
//!
//! On Windows we catch [exceptions](https://docs.microsoft.com/en-us/windows/win32/debug/structured-exception-handling),
//! `SIGABRT` raised by the CRT and [purecall](https://docs.microsoft.com/en-us/cpp/c-runtime-library/reference/get-purecall-handler-set-purecall-handler?view=msvc-170)
//!
//! # Panics
//!
//! A panic hook is installed that treats every panic as fatal, the reason
//! line contains the panic location and payload.

#![allow(unsafe_code)]

#[cfg(feature = "debug-print")]
#[macro_export]
macro_rules! debug_print {
    ($s:literal) => {
        let cstr = concat!($s, "\n");
        $crate::write_stderr(cstr);
    };
}

#[cfg(not(feature = "debug-print"))]
#[macro_export]
macro_rules! debug_print {
    ($s:literal) => {};
}

/// Writes the specified string directly to stderr.
///
/// This is safe to be called from within a compromised context.
#[inline]
pub fn write_stderr(s: &'static str) {
    unsafe {
        #[cfg(target_os = "windows")]
        libc::write(2, s.as_ptr().cast(), s.len() as u32);

        #[cfg(not(target_os = "windows"))]
        libc::write(2, s.as_ptr().cast(), s.len());
    }
}

mod context;
mod error;
pub mod fault;
mod fmt;
mod report;
mod setup;
mod sink;
mod stack;
mod symbol;
mod terminate;

pub use error::Error;
pub use fault::{FaultEvent, FaultKind, PanicError, REASON_PREFIX, Registers, raise};
pub use fmt::FixedBuf;
pub use report::{BACKTRACE_FOOTER, BACKTRACE_HEADER, ReportSettings, print_stack_trace};
pub use setup::{DISABLE_HANDLERS_ENV, FORCE_DEMANGLE_ENV, HandlerSetup, install};
pub use sink::{Line, Sink, get_sink, set_sink, stderr_sink};
pub use stack::{
    Frame, MAX_STACK_FRAMES, Mode, StackFrame, StackTrace, Walk, collect_stack_trace, walk_with,
};
pub use symbol::demangle;
pub use terminate::{EXIT_CODE, abort};

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod linux;

        pub use linux::{Signal, classify_signal};
        use linux as backend;
    } else if #[cfg(target_os = "windows")] {
        mod windows;

        pub use windows::{classify_exception, classify_unhandled_exception};
        use windows as backend;
    } else {
        compile_error!("last-gasp only supports Linux, Android and Windows");
    }
}
