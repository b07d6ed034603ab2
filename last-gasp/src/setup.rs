use crate::{
    context::CONTEXT,
    fault::{self, Reason},
    report::ReportSettings,
    stack::Start,
    terminate,
};

/// Set to `1` to skip installing any handlers, leaving fatal events to the
/// default behavior of the platform
pub const DISABLE_HANDLERS_ENV: &str = "LAST_GASP_DISABLE_HANDLERS";
/// Set to `1` to resolve and demangle symbol names even when reporting from
/// a signal handler, which is not async signal safe
pub const FORCE_DEMANGLE_ENV: &str = "LAST_GASP_FORCE_DEMANGLE";

#[inline]
fn toggle(name: &str) -> bool {
    std::env::var_os(name).is_some_and(|value| value == "1")
}

/// Installs the handlers for fatal events.
///
/// Only the first call has any effect, subsequent calls return immediately.
/// This should be called at startup, before any other threads are spawned,
/// as the alternate signal stack is only installed for the calling thread.
///
/// Installed are
///
/// * A panic hook, every panic is treated as fatal, as if `panic = "abort"`
/// * On Linux/Android, handlers for `SIGABRT`, `SIGSEGV`, `SIGBUS`, `SIGILL`
///   and `SIGFPE`
/// * On Windows, a vectored exception handler, an unhandled exception filter,
///   a `SIGABRT` handler and a purecall handler
///
/// If any of them can't be installed the process is terminated.
pub fn install() {
    if CONTEXT.mark_installed() {
        log::debug!("fatal event handlers already installed");
        return;
    }

    if toggle(DISABLE_HANDLERS_ENV) {
        log::info!("{DISABLE_HANDLERS_ENV} is set, not installing fatal event handlers");
        return;
    }

    if toggle(FORCE_DEMANGLE_ENV) {
        log::warn!("{FORCE_DEMANGLE_ENV} is set, symbols will be resolved in signal handlers");
        CONTEXT.set_force_demangle();
    }

    std::panic::set_hook(Box::new(panic_hook));

    if let Err(err) = crate::backend::install() {
        let reason = Reason::from_fmt(format_args!("{err}"));
        terminate::abort(reason.as_str(), &ReportSettings::default());
    }

    log::debug!("fatal event handlers installed");
}

/// Every panic is fatal, the report starts in the panic machinery that called
/// the hook
#[inline(never)]
fn panic_hook(info: &std::panic::PanicHookInfo<'_>) {
    let event = fault::classify_panic(info.payload(), info.location());
    let entry = Start::CallerOf(panic_hook as usize);
    terminate::terminate_event(&event, &ReportSettings::default(), entry)
}

/// Installs the handlers for fatal events on construction, see [`install`].
///
/// Dropping this does nothing, the handlers stay installed for the rest of
/// the process' lifetime.
#[must_use]
pub struct HandlerSetup {
    _installed: (),
}

impl HandlerSetup {
    pub fn new() -> Self {
        install();
        Self { _installed: () }
    }
}

impl Default for HandlerSetup {
    fn default() -> Self {
        Self::new()
    }
}
