//! The process wide state shared between installation, the fault handlers and
//! the public API.
//!
//! Everything here is written during single threaded startup and read from
//! fault handlers, so all fields are atomics (readable from a signal handler)
//! except for the demangler, which is only ever used in [`crate::Mode::Full`].

use crate::{sink::Sink, symbol::Demangler};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

pub(crate) struct Context {
    /// The current sink, null meaning [`crate::stderr_sink`]
    sink: AtomicPtr<()>,
    /// Set by the first [`crate::install`], never cleared
    installed: AtomicBool,
    /// Lifts the restricted mode of fault handlers
    force_demangle: AtomicBool,
    /// `Alive` (false) -> `Terminating` (true), never reset
    terminating: AtomicBool,
    /// Resolved addresses of [`crate::fault::VIRTUAL_CALL_ENTRIES`]
    virtual_call_entries: [AtomicUsize; 2],
    pub(crate) demangler: parking_lot::Mutex<Demangler>,
}

pub(crate) static CONTEXT: Context = Context::new();

impl Context {
    const fn new() -> Self {
        Self {
            sink: AtomicPtr::new(std::ptr::null_mut()),
            installed: AtomicBool::new(false),
            force_demangle: AtomicBool::new(false),
            terminating: AtomicBool::new(false),
            virtual_call_entries: [AtomicUsize::new(0), AtomicUsize::new(0)],
            demangler: parking_lot::const_mutex(Demangler::new()),
        }
    }

    #[inline]
    pub(crate) fn sink(&self) -> Option<Sink> {
        let ptr = self.sink.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // SAFETY: the only non-null values ever stored are `Sink`s
            Some(unsafe { std::mem::transmute::<*mut (), Sink>(ptr) })
        }
    }

    #[inline]
    pub(crate) fn set_sink(&self, sink: Option<Sink>) {
        let ptr = sink.map_or(std::ptr::null_mut(), |sink| sink as *mut ());
        self.sink.store(ptr, Ordering::Release);
    }

    /// Marks the registration as done, returning `true` if it already was
    #[inline]
    pub(crate) fn mark_installed(&self) -> bool {
        self.installed.swap(true, Ordering::AcqRel)
    }

    #[cfg_attr(target_os = "windows", allow(dead_code))]
    #[inline]
    pub(crate) fn force_demangle(&self) -> bool {
        self.force_demangle.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_force_demangle(&self) {
        self.force_demangle.store(true, Ordering::Relaxed);
    }

    /// Moves to `Terminating`, returning `true` if another report got there
    /// first
    #[inline]
    pub(crate) fn mark_terminating(&self) -> bool {
        self.terminating.swap(true, Ordering::AcqRel)
    }

    #[cfg_attr(target_os = "windows", allow(dead_code))]
    #[inline]
    pub(crate) fn set_virtual_call_entry(&self, index: usize, address: usize) {
        self.virtual_call_entries[index].store(address, Ordering::Relaxed);
    }

    #[cfg_attr(target_os = "windows", allow(dead_code))]
    #[inline]
    pub(crate) fn virtual_call_entries(&self) -> [usize; 2] {
        [
            self.virtual_call_entries[0].load(Ordering::Relaxed),
            self.virtual_call_entries[1].load(Ordering::Relaxed),
        ]
    }
}

#[cfg(test)]
mod test {
    use super::Context;

    #[test]
    fn terminates_once() {
        let context = Context::new();
        assert!(!context.mark_terminating());
        assert!(context.mark_terminating());
    }
}
