mod signal;
mod state;

pub(crate) use state::install;

use crate::fault::{FaultEvent, FaultKind, Registers};

// We define the codes ourselves as `u32`s, the `NTSTATUS` values in
// windows-sys are signed and only some of them are exposed
pub const EXCEPTION_ACCESS_VIOLATION: u32 = 0xC000_0005;
pub const EXCEPTION_IN_PAGE_ERROR: u32 = 0xC000_0006;
pub const EXCEPTION_ILLEGAL_INSTRUCTION: u32 = 0xC000_001D;
pub const EXCEPTION_NONCONTINUABLE_EXCEPTION: u32 = 0xC000_0025;
pub const EXCEPTION_INVALID_DISPOSITION: u32 = 0xC000_0026;
pub const EXCEPTION_ARRAY_BOUNDS_EXCEEDED: u32 = 0xC000_008C;
pub const EXCEPTION_FLT_DENORMAL_OPERAND: u32 = 0xC000_008D;
pub const EXCEPTION_FLT_DIVIDE_BY_ZERO: u32 = 0xC000_008E;
pub const EXCEPTION_FLT_INEXACT_RESULT: u32 = 0xC000_008F;
pub const EXCEPTION_FLT_INVALID_OPERATION: u32 = 0xC000_0090;
pub const EXCEPTION_FLT_OVERFLOW: u32 = 0xC000_0091;
pub const EXCEPTION_FLT_STACK_CHECK: u32 = 0xC000_0092;
pub const EXCEPTION_FLT_UNDERFLOW: u32 = 0xC000_0093;
pub const EXCEPTION_INT_DIVIDE_BY_ZERO: u32 = 0xC000_0094;
pub const EXCEPTION_INT_OVERFLOW: u32 = 0xC000_0095;
pub const EXCEPTION_PRIV_INSTRUCTION: u32 = 0xC000_0096;
pub const EXCEPTION_STACK_OVERFLOW: u32 = 0xC000_00FD;
pub const EXCEPTION_DATATYPE_MISALIGNMENT: u32 = 0x8000_0002;
pub const EXCEPTION_BREAKPOINT: u32 = 0x8000_0003;
pub const EXCEPTION_SINGLE_STEP: u32 = 0x8000_0004;

/// Classifies a structured exception that is known to be fatal.
///
/// `info` are the `ExceptionInformation` parameters of the exception record.
/// Returns `None` for any other code, eg. the exceptions used to unwind
/// panics and C++ exceptions, which should keep searching for a handler.
pub fn classify_exception(
    code: u32,
    info: &[usize],
    context: Option<Registers>,
) -> Option<FaultEvent> {
    let fpe = |detail: &str| FaultEvent::new(FaultKind::FloatingPointError).with_detail(detail);
    let named = |kind: FaultKind, what: &str| FaultEvent::new(kind).with_what(format_args!("{what}"));

    let event = match code {
        EXCEPTION_ACCESS_VIOLATION => {
            let event = FaultEvent::new(FaultKind::SegFault);
            // [0] is the read/write flag, [1] the inaccessible address
            match info {
                [_, address, ..] => event.at(*address),
                _ => event,
            }
        }
        EXCEPTION_IN_PAGE_ERROR => {
            let event = named(FaultKind::SegFault, "PAGE ERROR");
            // [2] is the NTSTATUS that caused the exception
            if let [_, address, status, ..] = info {
                event
                    .with_detail_fmt(format_args!("NTSTATUS={status}"))
                    .at(*address)
            } else {
                event
            }
        }
        EXCEPTION_ARRAY_BOUNDS_EXCEEDED => named(
            FaultKind::PlatformException,
            "EXCEPTION_ARRAY_BOUNDS_EXCEEDED",
        ),
        EXCEPTION_BREAKPOINT => named(FaultKind::PlatformException, "EXCEPTION_BREAKPOINT"),
        EXCEPTION_SINGLE_STEP => named(FaultKind::PlatformException, "EXCEPTION_SINGLE_STEP"),
        EXCEPTION_DATATYPE_MISALIGNMENT => {
            named(FaultKind::BusError, "EXCEPTION_DATATYPE_MISALIGNMENT")
        }
        EXCEPTION_FLT_DENORMAL_OPERAND => fpe("floating-point denormal operand"),
        EXCEPTION_FLT_DIVIDE_BY_ZERO => fpe("floating-point divide by zero"),
        EXCEPTION_FLT_INEXACT_RESULT => fpe("floating-point inexact result"),
        EXCEPTION_FLT_INVALID_OPERATION => fpe("floating-point invalid operation"),
        EXCEPTION_FLT_OVERFLOW => fpe("floating-point overflow"),
        EXCEPTION_FLT_STACK_CHECK => fpe("floating-point stack over/underflow"),
        EXCEPTION_FLT_UNDERFLOW => fpe("floating-point underflow"),
        EXCEPTION_INT_DIVIDE_BY_ZERO => fpe("integer divide by zero"),
        EXCEPTION_INT_OVERFLOW => fpe("integer overflow"),
        EXCEPTION_ILLEGAL_INSTRUCTION => FaultEvent::new(FaultKind::IllegalInstruction),
        EXCEPTION_PRIV_INSTRUCTION => {
            named(FaultKind::IllegalInstruction, "EXCEPTION_PRIV_INSTRUCTION")
        }
        EXCEPTION_INVALID_DISPOSITION => named(
            FaultKind::PlatformException,
            "INVALID EXCEPTION HANDLER DISPOSITION",
        ),
        EXCEPTION_NONCONTINUABLE_EXCEPTION => {
            named(FaultKind::PlatformException, "NONCONTINUABLE EXCEPTION")
        }
        EXCEPTION_STACK_OVERFLOW => {
            FaultEvent::new(FaultKind::StackOverflow).with_detail("stack overflow")
        }
        _ => return None,
    };

    Some(event.with_context(context))
}

/// Classifies an exception that no one handled, which is fatal regardless of
/// its code
pub fn classify_unhandled_exception(
    code: u32,
    info: &[usize],
    context: Option<Registers>,
) -> FaultEvent {
    classify_exception(code, info, context).unwrap_or_else(|| {
        FaultEvent::new(FaultKind::PlatformException)
            .with_what(format_args!("EXCEPTION {code:#x}"))
            .with_context(context)
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn access_violation() {
        let event = classify_exception(EXCEPTION_ACCESS_VIOLATION, &[1, 0x1234_5678], None)
            .expect("fatal");
        assert_eq!(event.kind, FaultKind::SegFault);
        assert_eq!(
            event.reason(),
            "!!! TERMINATING DUE TO SEGMENTATION FAULT @ 0x12345678"
        );

        let event = classify_exception(EXCEPTION_ACCESS_VIOLATION, &[], None).expect("fatal");
        assert_eq!(event.reason(), "!!! TERMINATING DUE TO SEGMENTATION FAULT");
    }

    #[test]
    fn in_page_error() {
        let event =
            classify_exception(EXCEPTION_IN_PAGE_ERROR, &[0, 0x1000, 0xC000_009C], None)
                .expect("fatal");
        assert_eq!(
            event.reason().to_string(),
            format!(
                "!!! TERMINATING DUE TO PAGE ERROR (NTSTATUS={}) @ 0x1000",
                0xC000_009Cu32
            )
        );
    }

    #[test]
    fn arithmetic() {
        let event = classify_exception(EXCEPTION_INT_DIVIDE_BY_ZERO, &[], None).expect("fatal");
        assert_eq!(
            event.reason(),
            "!!! TERMINATING DUE TO FLOATING POINT ERROR (integer divide by zero)"
        );

        let event = classify_exception(EXCEPTION_FLT_INEXACT_RESULT, &[], None).expect("fatal");
        assert_eq!(event.detail(), Some("floating-point inexact result"));
    }

    #[test]
    fn stack_overflow() {
        let event = classify_exception(EXCEPTION_STACK_OVERFLOW, &[], None).expect("fatal");
        assert_eq!(event.kind, FaultKind::StackOverflow);
        assert!(!event.print_backtrace());
        assert_eq!(
            event.reason(),
            "!!! TERMINATING DUE TO SEGMENTATION FAULT (stack overflow)"
        );
    }

    #[test]
    fn unknown_codes() {
        // C++ exceptions, which are also used to unwind panics
        assert!(classify_exception(0xE06D_7363, &[], None).is_none());

        let event = classify_unhandled_exception(0xE06D_7363, &[], None);
        assert_eq!(event.kind, FaultKind::PlatformException);
        assert_eq!(event.reason(), "!!! TERMINATING DUE TO EXCEPTION 0xe06d7363");
    }
}
