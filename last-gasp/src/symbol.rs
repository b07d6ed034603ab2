//! Best effort symbol demangling.

use crate::context::CONTEXT;
use symbolic_common::Name;
use symbolic_demangle::{Demangle, DemangleOptions};

/// Demangles Rust, Itanium C++ and MSVC symbols into a readable name.
///
/// This never fails: names that are not mangled, or mangled with a scheme that
/// isn't understood, are returned unchanged, and `None` results in an empty
/// string.
///
/// This allocates, so it must not be used from within a signal handler.
///
/// ```
/// assert_eq!(last_gasp::demangle("strlen"), "strlen");
/// assert_eq!(last_gasp::demangle(None), "");
/// ```
pub fn demangle<'s>(symbol: impl Into<Option<&'s str>>) -> String {
    let Some(symbol) = symbol.into() else {
        return String::new();
    };

    let mut demangler = CONTEXT.demangler.lock();
    demangler.demangle(symbol).to_owned()
}

/// Demangler state, only accessed through [`crate::context::Context`] which
/// serializes all use of it.
pub(crate) struct Demangler {
    /// Reused between calls, never shrunk
    scratch: String,
}

impl Demangler {
    pub(crate) const fn new() -> Self {
        Self {
            scratch: String::new(),
        }
    }

    /// Demangles `symbol` into the scratch buffer and returns it.
    pub(crate) fn demangle(&mut self, symbol: &str) -> &str {
        self.scratch.clear();

        match Name::from(symbol).demangle(DemangleOptions::name_only()) {
            Some(demangled) if !demangled.is_empty() => self.scratch.push_str(&demangled),
            _ => self.scratch.push_str(symbol),
        }

        &self.scratch
    }
}
