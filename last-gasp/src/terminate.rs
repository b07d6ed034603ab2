use crate::{
    context::CONTEXT,
    fault::FaultEvent,
    report::{self, ReportSettings},
    sink::Line,
    stack::Start,
};

/// The exit status of a process terminated by a fatal event
pub const EXIT_CODE: i32 = 127;

/// Reports `reason`, followed by a backtrace of the caller if the settings ask
/// for one, and terminates the process with [`EXIT_CODE`].
///
/// Destructors and `atexit` handlers are not run. An empty `reason` skips
/// the reason line.
#[inline(never)]
pub fn abort(reason: &str, settings: &ReportSettings) -> ! {
    terminate(reason, settings, None, Start::CallerOf(abort as usize))
}

/// Terminates the process due to a classified fatal event.
///
/// The backtrace starts at the faulting instruction if the event has a
/// register context, otherwise at `entry`.
pub(crate) fn terminate_event(event: &FaultEvent, settings: &ReportSettings, entry: Start) -> ! {
    let reason = event.reason();
    let settings = settings.with_backtrace(settings.print_backtrace && event.print_backtrace());
    let highlight = event.highlight();

    terminate(
        reason.as_str(),
        &settings,
        highlight,
        highlight.map_or(entry, Start::At),
    )
}

pub(crate) fn terminate(
    reason: &str,
    settings: &ReportSettings,
    highlight: Option<usize>,
    start: Start,
) -> ! {
    let sink = settings.sink();

    if !reason.is_empty() {
        sink(Line::Text(reason));
    }

    if settings.print_backtrace {
        report::emit(sink, settings, highlight, start);
    } else {
        sink(Line::Flush);
    }

    if CONTEXT.mark_terminating() {
        debug_print!("another thread is already terminating the process");
    }

    // SAFETY: syscall
    unsafe { libc::_exit(EXIT_CODE) }
}
