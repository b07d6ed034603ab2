#[cfg(feature = "itanium-abi")]
mod itanium;
mod state;

pub(crate) use state::install;

use crate::fault::{FaultEvent, FaultKind, Registers};

/// The signals that are treated as fatal
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Signal {
    Abort = libc::SIGABRT,
    Bus = libc::SIGBUS,
    Fpe = libc::SIGFPE,
    Illegal = libc::SIGILL,
    Segv = libc::SIGSEGV,
}

impl Signal {
    #[inline]
    pub fn from_raw(sig: i32) -> Option<Self> {
        Some(match sig {
            libc::SIGABRT => Self::Abort,
            libc::SIGBUS => Self::Bus,
            libc::SIGFPE => Self::Fpe,
            libc::SIGILL => Self::Illegal,
            libc::SIGSEGV => Self::Segv,
            _ => return None,
        })
    }
}

/// The signals a handler is installed for, all of them are masked while one
/// of them is being handled
pub(crate) const FAULT_SIGNALS: [Signal; 5] = [
    Signal::Abort,
    Signal::Segv,
    Signal::Bus,
    Signal::Illegal,
    Signal::Fpe,
];

// We define the `si_code` values ourselves as libc only has a handful of them,
// and not for every target
const SEGV_MAPERR: i32 = 1;
const SEGV_ACCERR: i32 = 2;
const SEGV_BNDERR: i32 = 3;
const SEGV_PKUERR: i32 = 4;

const BUS_ADRALN: i32 = 1;
const BUS_ADRERR: i32 = 2;
const BUS_OBJERR: i32 = 3;
const BUS_MCEERR_AR: i32 = 4;
const BUS_MCEERR_AO: i32 = 5;

const ILL_ILLOPC: i32 = 1;
const ILL_ILLOPN: i32 = 2;
const ILL_ILLADR: i32 = 3;
const ILL_ILLTRP: i32 = 4;
const ILL_PRVOPC: i32 = 5;
const ILL_PRVREG: i32 = 6;
const ILL_COPROC: i32 = 7;
const ILL_BADSTK: i32 = 8;

const FPE_INTDIV: i32 = 1;
const FPE_INTOVF: i32 = 2;
const FPE_FLTDIV: i32 = 3;
const FPE_FLTOVF: i32 = 4;
const FPE_FLTUND: i32 = 5;
const FPE_FLTRES: i32 = 6;
const FPE_FLTINV: i32 = 7;
const FPE_FLTSUB: i32 = 8;

/// Classifies a fatal signal.
///
/// `address` is `si_addr` and `context` the registers of the interrupted
/// thread, if they could be retrieved. Doesn't allocate.
pub fn classify_signal(
    sig: i32,
    si_code: i32,
    address: usize,
    context: Option<Registers>,
) -> FaultEvent {
    let Some(signal) = Signal::from_raw(sig) else {
        return FaultEvent::new(FaultKind::Unknown)
            .with_what(format_args!("unexpected signal {sig}"))
            .with_context(context);
    };

    let (kind, detail) = match signal {
        Signal::Abort => {
            return FaultEvent::new(FaultKind::ProcessAbort).with_context(context);
        }
        Signal::Segv => (
            FaultKind::SegFault,
            match si_code {
                SEGV_MAPERR => Some("address not mapped to object"),
                SEGV_ACCERR => Some("invalid permissions for mapped object"),
                SEGV_BNDERR => Some("failed address bound checks"),
                SEGV_PKUERR => Some("access was denied by memory protection keys"),
                _ => None,
            },
        ),
        Signal::Bus => (
            FaultKind::BusError,
            match si_code {
                BUS_ADRALN => Some("invalid address alignment"),
                BUS_ADRERR => Some("nonexistent physical address"),
                BUS_OBJERR => Some("object-specific hardware error"),
                BUS_MCEERR_AR => Some("hardware memory error consumed on a machine check"),
                BUS_MCEERR_AO => {
                    Some("hardware memory error detected in process but not consumed")
                }
                _ => None,
            },
        ),
        Signal::Illegal => (
            FaultKind::IllegalInstruction,
            match si_code {
                ILL_ILLOPC => Some("illegal opcode"),
                ILL_ILLOPN => Some("illegal operand"),
                ILL_ILLADR => Some("illegal addressing mode"),
                ILL_ILLTRP => Some("illegal trap"),
                ILL_PRVOPC => Some("privileged opcode"),
                ILL_PRVREG => Some("privileged register"),
                ILL_COPROC => Some("coprocessor error"),
                ILL_BADSTK => Some("internal stack error"),
                _ => None,
            },
        ),
        Signal::Fpe => (
            FaultKind::FloatingPointError,
            match si_code {
                FPE_INTDIV => Some("integer divide by zero"),
                FPE_INTOVF => Some("integer overflow"),
                FPE_FLTDIV => Some("floating-point divide by zero"),
                FPE_FLTOVF => Some("floating-point overflow"),
                FPE_FLTUND => Some("floating-point underflow"),
                FPE_FLTRES => Some("floating-point inexact result"),
                FPE_FLTINV => Some("floating-point invalid operation"),
                FPE_FLTSUB => Some("subscript out of range"),
                _ => None,
            },
        ),
    };

    let mut event = FaultEvent::new(kind).at(address).with_context(context);
    if let Some(detail) = detail {
        event = event.with_detail(detail);
    }

    // Only an access to unmapped memory can be running off the end of the stack
    if signal == Signal::Segv && si_code == SEGV_MAPERR {
        event = event.detect_stack_overflow();
    }

    event
}
