//! Windows doesn't have an exception for process aborts, so we hook `SIGABRT`

use crate::{
    Error,
    fault::{FaultEvent, FaultKind},
    report::ReportSettings,
    stack::Start,
    terminate,
};

/// Installs our `SIGABRT` handler
///
/// # Safety
///
/// Performs syscalls
pub(crate) unsafe fn install_abort_handler() -> Result<(), Error> {
    // It would be nice to use sigaction here since it's better, but it isn't
    // supported on Windows :p
    unsafe {
        let old_handler = libc::signal(libc::SIGABRT, signal_handler as usize);
        if old_handler != usize::MAX {
            Ok(())
        } else {
            Err(Error::last_os_error("signal", libc::SIGABRT as i64))
        }
    }
}

extern "C" fn signal_handler(signal: i32) {
    let event = if signal == libc::SIGABRT {
        FaultEvent::new(FaultKind::ProcessAbort)
    } else {
        FaultEvent::new(FaultKind::Unknown).with_what(format_args!("unexpected signal {signal}"))
    };

    terminate::terminate_event(&event, &ReportSettings::default(), Start::Current)
}
