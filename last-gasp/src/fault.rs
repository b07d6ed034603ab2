//! Platform independent part of fault classification.
//!
//! The platform backends turn their raw fault descriptors (signal number and
//! `siginfo_t`, SEH exception records) into a [`FaultEvent`], this module
//! defines that event, renders its reason line, and classifies panics.

use crate::fmt::FixedBuf;
use std::{any::Any, ffi::CStr, fmt::Write, panic::Location};

/// The prefix of every reason line emitted for a fatal event
pub const REASON_PREFIX: &str = "!!! TERMINATING DUE TO ";

/// Faulting addresses that are at most this many bytes below the stack
/// pointer are considered to be a stack overflow rather than a plain
/// segmentation fault
pub const STACK_OVERFLOW_WINDOW: usize = 2048;

/// The number of most recent return addresses compared against the virtual
/// call entry points of the C++ runtime
pub const VIRTUAL_CALL_LOOKBACK: usize = 16;

/// A return address at most this many bytes after the start of a runtime
/// entry point is considered to be a call from it
pub const VIRTUAL_CALL_WINDOW: usize = 64;

pub const WHAT_LEN: usize = 64;
pub const DETAIL_LEN: usize = 256;
pub const REASON_LEN: usize = 512;

/// A rendered reason line
pub type Reason = FixedBuf<REASON_LEN>;

/// The C++ runtime functions that are placed in vtable slots of pure virtual
/// and deleted virtual functions.
pub(crate) const VIRTUAL_CALL_ENTRIES: [(&CStr, FaultKind); 2] = [
    (c"__cxa_pure_virtual", FaultKind::PureVirtualCall),
    (c"__cxa_deleted_virtual", FaultKind::DeletedVirtualCall),
];

/// The normalized kind of a fatal event
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaultKind {
    /// `abort()` was called, or `SIGABRT` was otherwise raised
    ProcessAbort,
    /// Invalid memory access
    SegFault,
    /// Misaligned or nonexistent physical address
    BusError,
    IllegalInstruction,
    /// Any arithmetic fault, including integer division by zero
    FloatingPointError,
    /// A panic
    UnhandledException,
    PureVirtualCall,
    DeletedVirtualCall,
    StackOverflow,
    /// A platform exception code without a more specific kind
    PlatformException,
    Unknown,
}

impl FaultKind {
    /// The default `WHAT` of the reason line
    pub fn what(self) -> &'static str {
        match self {
            Self::ProcessAbort => "abort()",
            Self::SegFault | Self::StackOverflow => "SEGMENTATION FAULT",
            Self::BusError => "BUS ERROR",
            Self::IllegalInstruction => "ILLEGAL INSTRUCTION",
            Self::FloatingPointError => "FLOATING POINT ERROR",
            Self::UnhandledException => "panic",
            Self::PureVirtualCall => "PURE VIRTUAL FUNCTION CALL",
            Self::DeletedVirtualCall => "DELETED VIRTUAL FUNCTION CALL",
            Self::PlatformException => "UNKNOWN EXCEPTION",
            Self::Unknown => "UNKNOWN FAULT",
        }
    }
}

/// The registers of interest from the context a fault occurred in
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Registers {
    /// Instruction pointer
    pub ip: usize,
    /// Stack pointer
    pub sp: usize,
}

/// A classified fatal event.
///
/// This is built without allocating, so it can be created from within a
/// signal handler.
#[derive(Clone, Debug)]
pub struct FaultEvent {
    pub kind: FaultKind,
    what: FixedBuf<WHAT_LEN>,
    detail: Option<FixedBuf<DETAIL_LEN>>,
    /// The address that caused the fault, eg. the invalid memory address
    pub address: Option<usize>,
    /// The register context of the faulting thread
    pub context: Option<Registers>,
}

impl FaultEvent {
    pub fn new(kind: FaultKind) -> Self {
        let mut what = FixedBuf::new();
        what.push_str(kind.what());

        Self {
            kind,
            what,
            detail: None,
            address: None,
            context: None,
        }
    }

    /// Overrides the default `WHAT` of the kind
    pub fn with_what(mut self, args: std::fmt::Arguments<'_>) -> Self {
        self.what = FixedBuf::from_fmt(args);
        self
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        let mut fb = FixedBuf::new();
        fb.push_str(detail);
        self.detail = Some(fb);
        self
    }

    pub fn with_detail_fmt(mut self, args: std::fmt::Arguments<'_>) -> Self {
        self.detail = Some(FixedBuf::from_fmt(args));
        self
    }

    #[inline]
    pub fn at(mut self, address: usize) -> Self {
        self.address = Some(address);
        self
    }

    #[inline]
    pub fn with_context(mut self, context: Option<Registers>) -> Self {
        self.context = context;
        self
    }

    #[inline]
    pub fn what(&self) -> &str {
        self.what.as_str()
    }

    #[inline]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_ref().map(FixedBuf::as_str)
    }

    /// Reclassifies a segmentation fault as a stack overflow if the faulting
    /// address is just below the stack pointer of the captured context.
    pub fn detect_stack_overflow(mut self) -> Self {
        if let (Some(address), Some(regs)) = (self.address, self.context) {
            if is_stack_overflow(address, regs.sp) {
                self.kind = FaultKind::StackOverflow;
                self = self.with_detail("stack overflow");
            }
        }

        self
    }

    /// Whether a backtrace can be printed for this event, which is not the
    /// case for a stack overflow as the stack is already exhausted
    #[inline]
    pub fn print_backtrace(&self) -> bool {
        self.kind != FaultKind::StackOverflow
    }

    /// The address of the frame to highlight in a backtrace
    #[inline]
    pub fn highlight(&self) -> Option<usize> {
        self.context.map(|regs| regs.ip)
    }

    /// Renders the reason line
    /// `!!! TERMINATING DUE TO <WHAT>[ (<DETAIL>)][ @ 0x<ADDRESS>]`
    pub fn reason(&self) -> Reason {
        format_reason(self.what(), self.detail(), self.address)
    }
}

/// Renders a reason line `!!! TERMINATING DUE TO <WHAT>[ (<DETAIL>)][ @ 0x<ADDRESS>]`
pub fn format_reason(what: &str, detail: Option<&str>, address: Option<usize>) -> Reason {
    let mut reason = Reason::new();
    reason.push_str(REASON_PREFIX);
    reason.push_str(what);

    if let Some(detail) = detail {
        let _ = write!(reason, " ({detail})");
    }

    if let Some(address) = address {
        let _ = write!(reason, " @ {address:#x}");
    }

    reason
}

/// Checks if `address` lies within [`STACK_OVERFLOW_WINDOW`] below, or at,
/// the stack pointer
#[inline]
pub fn is_stack_overflow(address: usize, sp: usize) -> bool {
    sp.wrapping_sub(address) < STACK_OVERFLOW_WINDOW
}

/// Checks if any of the `return_addresses` lies shortly after one of the
/// resolved virtual call `entries`, returning the kind and matching address.
///
/// Unresolved (0) entries are ignored.
pub fn match_virtual_call(
    return_addresses: &[usize],
    entries: [usize; 2],
) -> Option<(FaultKind, usize)> {
    return_addresses.iter().copied().find_map(|ra| {
        entries
            .iter()
            .zip(VIRTUAL_CALL_ENTRIES.iter())
            .find(|(entry, _)| {
                **entry != 0 && ra >= **entry && ra - **entry <= VIRTUAL_CALL_WINDOW
            })
            .map(|(_, (_, kind))| (*kind, ra))
    })
}

/// An error raised as a panic payload via [`raise`], retaining the name of
/// its concrete type
pub struct PanicError {
    type_name: &'static str,
    error: Box<dyn std::error::Error + Send + Sync>,
}

impl PanicError {
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            type_name: std::any::type_name::<E>(),
            error: Box::new(error),
        }
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[inline]
    pub fn error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.error.as_ref()
    }
}

/// Panics with `error` as the payload.
///
/// If the panic is not caught, the reason line will contain the error's type
/// name and message.
#[track_caller]
pub fn raise<E>(error: E) -> !
where
    E: std::error::Error + Send + Sync + 'static,
{
    std::panic::panic_any(PanicError::new(error))
}

/// Classifies a panic by the shape of its payload.
pub fn classify_panic(payload: &(dyn Any + Send), location: Option<&Location<'_>>) -> FaultEvent {
    let mut detail = FixedBuf::<DETAIL_LEN>::new();

    if let Some(loc) = location {
        let _ = write!(detail, "{}:{}:{}: ", loc.file(), loc.line(), loc.column());
    }

    if let Some(err) = payload.downcast_ref::<std::io::Error>() {
        let _ = write!(detail, "std::io::Error: \"{err}\" ");
        let _ = match err.raw_os_error() {
            Some(code) => write!(detail, "({:?}:{code})", err.kind()),
            None => write!(detail, "({:?})", err.kind()),
        };
    } else if let Some(err) = payload.downcast_ref::<PanicError>() {
        let _ = write!(detail, "{}: \"{}\"", err.type_name(), err.error());
    } else if let Some(err) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
        let _ = write!(detail, "dyn std::error::Error: \"{err}\"");
    } else if let Some(text) = payload.downcast_ref::<&'static str>() {
        let _ = write!(detail, "\"{text}\"");
    } else if let Some(text) = payload.downcast_ref::<String>() {
        let _ = write!(detail, "\"{text}\"");
    } else {
        detail.push_str("unknown panic payload");
    }

    FaultEvent::new(FaultKind::UnhandledException).with_detail(detail.as_str())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reason_line() {
        assert_eq!(
            format_reason("SEGMENTATION FAULT", None, None),
            "!!! TERMINATING DUE TO SEGMENTATION FAULT"
        );
        assert_eq!(
            format_reason(
                "SEGMENTATION FAULT",
                Some("address not mapped to object"),
                Some(0x1234_5678)
            ),
            "!!! TERMINATING DUE TO SEGMENTATION FAULT (address not mapped to object) @ 0x12345678"
        );
        assert_eq!(
            FaultEvent::new(FaultKind::ProcessAbort).reason(),
            "!!! TERMINATING DUE TO abort()"
        );
    }

    #[test]
    fn stack_overflow_window() {
        let sp = 0x7fff_0000_1000;
        let regs = Some(Registers { ip: 0x1000, sp });

        let near = FaultEvent::new(FaultKind::SegFault)
            .at(sp - 8)
            .with_context(regs)
            .detect_stack_overflow();
        assert_eq!(near.kind, FaultKind::StackOverflow);
        assert_eq!(near.detail(), Some("stack overflow"));
        assert!(!near.print_backtrace());

        let far = FaultEvent::new(FaultKind::SegFault)
            .with_detail("address not mapped to object")
            .at(0x1234_5678)
            .with_context(regs)
            .detect_stack_overflow();
        assert_eq!(far.kind, FaultKind::SegFault);
        assert_eq!(far.detail(), Some("address not mapped to object"));
        assert!(far.print_backtrace());

        // Above the stack pointer is not an overflow
        assert!(!is_stack_overflow(sp + 8, sp));
        assert!(is_stack_overflow(sp, sp));
        assert!(!is_stack_overflow(sp - STACK_OVERFLOW_WINDOW, sp));

        // Without a context there is nothing to compare against
        let unknown = FaultEvent::new(FaultKind::SegFault)
            .at(sp - 8)
            .detect_stack_overflow();
        assert_eq!(unknown.kind, FaultKind::SegFault);
    }

    #[test]
    fn virtual_calls() {
        let entries = [0x1000, 0x2000];

        assert_eq!(
            match_virtual_call(&[0x500, 0x1010, 0x2010], entries),
            Some((FaultKind::PureVirtualCall, 0x1010))
        );
        assert_eq!(
            match_virtual_call(&[0x2000 + VIRTUAL_CALL_WINDOW], entries),
            Some((FaultKind::DeletedVirtualCall, 0x2000 + VIRTUAL_CALL_WINDOW))
        );
        assert_eq!(
            match_virtual_call(&[0x1000 + VIRTUAL_CALL_WINDOW + 1, 0xfff], entries),
            None
        );
        assert_eq!(match_virtual_call(&[0x10, 0x20], [0, 0]), None);
    }

    fn classify(payload: Box<dyn Any + Send>) -> String {
        classify_panic(payload.as_ref(), None).reason().to_string()
    }

    #[test]
    fn panic_payloads() {
        assert_eq!(
            classify(Box::new("This is my error text")),
            "!!! TERMINATING DUE TO panic (\"This is my error text\")"
        );
        assert_eq!(
            classify(Box::new(String::from("whoopsi!"))),
            "!!! TERMINATING DUE TO panic (\"whoopsi!\")"
        );
        assert_eq!(
            classify(Box::new(42i32)),
            "!!! TERMINATING DUE TO panic (unknown panic payload)"
        );

        let io = classify(Box::new(std::io::Error::from_raw_os_error(libc::ENOENT)));
        assert!(io.starts_with("!!! TERMINATING DUE TO panic (std::io::Error: \""));
        assert!(io.ends_with(&format!("(NotFound:{}))", libc::ENOENT)), "{io}");

        let custom = classify(Box::new(std::io::Error::other("nope")));
        assert_eq!(
            custom,
            "!!! TERMINATING DUE TO panic (std::io::Error: \"nope\" (Other))"
        );

        #[derive(Debug)]
        struct Whoopsi;

        impl std::fmt::Display for Whoopsi {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("whoopsi!")
            }
        }

        impl std::error::Error for Whoopsi {}

        let typed = classify(Box::new(PanicError::new(Whoopsi)));
        assert!(typed.contains("Whoopsi: \"whoopsi!\""), "{typed}");

        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(Whoopsi);
        assert_eq!(
            classify(Box::new(boxed)),
            "!!! TERMINATING DUE TO panic (dyn std::error::Error: \"whoopsi!\")"
        );
    }

    #[test]
    fn panic_location() {
        let location = Location::caller();
        let event = classify_panic(&"boom", Some(location));

        let detail = event.detail().unwrap();
        assert!(detail.starts_with(location.file()));
        assert!(detail.ends_with(": \"boom\""));
    }
}
