use super::{FAULT_SIGNALS, Signal};
use crate::{
    Error,
    context::CONTEXT,
    fault::{
        self, FaultEvent, FaultKind, Registers, VIRTUAL_CALL_ENTRIES, VIRTUAL_CALL_LOOKBACK,
    },
    report::ReportSettings,
    stack::{self, Start},
    terminate,
};
use std::{cell::UnsafeCell, mem, ptr};

/// The size of the alternate stack the handlers run on.
///
/// The headroom on top of `SIGSTKSZ` covers unwinding the stack and
/// formatting the report, which all happens on this stack.
const ALT_STACK_SIZE: usize = libc::SIGSTKSZ + 64 * 1024;

#[repr(C, align(16))]
struct AltStack(UnsafeCell<[u8; ALT_STACK_SIZE]>);

// SAFETY: the memory is only ever handed to the kernel
unsafe impl Sync for AltStack {}

/// Statically reserved so that installation doesn't depend on the allocator
static ALT_STACK: AltStack = AltStack(UnsafeCell::new([0; ALT_STACK_SIZE]));

pub(crate) fn install() -> Result<(), Error> {
    // SAFETY: syscalls
    unsafe {
        install_sigaltstack()?;
        resolve_virtual_call_entries();
        install_handlers()
    }
}

/// Installs an alternative stack to run the signal handlers on for the
/// calling thread, as the signal might have been caused by a stack overflow.
unsafe fn install_sigaltstack() -> Result<(), Error> {
    unsafe {
        // Check to see if the existing sigaltstack, and if it exists, is it big
        // enough. If so we don't need to install our own.
        let mut old_stack: libc::stack_t = mem::zeroed();
        if libc::sigaltstack(ptr::null(), &mut old_stack) != 0 {
            return Err(Error::last_os_error("sigaltstack", 0));
        }

        if old_stack.ss_flags & libc::SS_DISABLE == 0 && old_stack.ss_size >= ALT_STACK_SIZE {
            log::debug!(
                "keeping the existing alternate signal stack of {} bytes",
                old_stack.ss_size
            );
            return Ok(());
        }

        let new_stack = libc::stack_t {
            ss_sp: ALT_STACK.0.get().cast(),
            ss_flags: 0,
            ss_size: ALT_STACK_SIZE,
        };

        if libc::sigaltstack(&new_stack, ptr::null_mut()) != 0 {
            return Err(Error::last_os_error("sigaltstack", ALT_STACK_SIZE as i64));
        }

        Ok(())
    }
}

/// Looks up the C++ runtime functions used for virtual call slots, for
/// recognizing an abort that was raised by one of them
unsafe fn resolve_virtual_call_entries() {
    for (index, (name, _)) in VIRTUAL_CALL_ENTRIES.iter().enumerate() {
        // SAFETY: syscall, the name is nul terminated
        let address = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
        if address.is_null() {
            log::debug!("{name:?} is not available");
        }
        CONTEXT.set_virtual_call_entry(index, address as usize);
    }
}

#[inline]
fn handler_action() -> libc::sigaction {
    // SAFETY: a zeroed sigaction is valid, and the set operations can't fail
    // for known signals
    unsafe {
        let mut sa: libc::sigaction = mem::zeroed();
        libc::sigemptyset(&mut sa.sa_mask);

        // Mask all fault signals when we're handling one of them.
        for sig in FAULT_SIGNALS {
            libc::sigaddset(&mut sa.sa_mask, sig as i32);
        }

        sa.sa_sigaction = signal_handler as usize;
        sa.sa_flags = libc::SA_ONSTACK | libc::SA_SIGINFO;
        sa
    }
}

unsafe fn install_handlers() -> Result<(), Error> {
    let sa = handler_action();

    for sig in FAULT_SIGNALS {
        // SAFETY: syscall
        if unsafe { libc::sigaction(sig as i32, &sa, ptr::null_mut()) } != 0 {
            return Err(Error::last_os_error("sigaction", sig as i64));
        }
    }

    Ok(())
}

/// Restores the default action for the signal, used as the last resort if
/// our handler can't be reinstalled properly
#[inline]
unsafe fn install_default_handler(sig: i32) {
    // SAFETY: syscall
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
    }
}

/// Retrieves the instruction and stack pointers of the interrupted thread
#[inline]
unsafe fn registers(uc: *const libc::c_void) -> Option<Registers> {
    if uc.is_null() {
        return None;
    }

    // SAFETY: the kernel passes a `ucontext_t` to `SA_SIGINFO` handlers
    let uc = unsafe { &*uc.cast::<libc::ucontext_t>() };

    cfg_if::cfg_if! {
        if #[cfg(target_arch = "x86_64")] {
            let gregs = &uc.uc_mcontext.gregs;
            Some(Registers {
                ip: gregs[libc::REG_RIP as usize] as usize,
                sp: gregs[libc::REG_RSP as usize] as usize,
            })
        } else if #[cfg(target_arch = "aarch64")] {
            Some(Registers {
                ip: uc.uc_mcontext.pc as usize,
                sp: uc.uc_mcontext.sp as usize,
            })
        } else {
            let _ = uc;
            None
        }
    }
}

/// This is the actual function installed for each signal we support, invoked
/// by the kernel
unsafe extern "C" fn signal_handler(sig: i32, info: *mut libc::siginfo_t, uc: *mut libc::c_void) {
    unsafe {
        // We might run inside a process where some other buggy code saves and
        // restores signal handlers temporarily with `signal` instead of `sigaction`.
        // This loses the `SA_SIGINFO` flag associated with this function. As a
        // consequence, the values of `info` and `uc` become totally bogus,
        // generally inducing a crash.
        //
        // The following code tries to detect this case. When it does, it
        // resets the signal handlers with `sigaction` & `SA_SIGINFO` and returns.
        // This forces the signal to be thrown again, but this time the kernel
        // will call the function with the right arguments.
        {
            let mut cur_handler: libc::sigaction = mem::zeroed();
            if libc::sigaction(sig, ptr::null_mut(), &mut cur_handler) == 0
                && cur_handler.sa_sigaction == signal_handler as usize
                && cur_handler.sa_flags & libc::SA_SIGINFO == 0
            {
                debug_print!("restoring SA_SIGINFO");

                if libc::sigaction(sig, &handler_action(), ptr::null_mut()) == -1 {
                    // When resetting the handler fails, try to reset the
                    // default one to avoid an infinite loop here.
                    install_default_handler(sig);
                }

                if sig == Signal::Abort as i32 {
                    // Unlike a hardware fault this won't be raised again by
                    // just returning
                    libc::raise(sig);
                }

                // exit the handler as we should be called again soon
                return;
            }
        }

        debug_print!("handling fatal signal");

        let (si_code, address) = if info.is_null() {
            (0, 0)
        } else {
            ((*info).si_code, (*info).si_addr() as usize)
        };

        let context = registers(uc);
        let mut event = super::classify_signal(sig, si_code, address, context);

        if event.kind == FaultKind::ProcessAbort {
            event = reclassify_abort(event);
        }

        let settings = if CONTEXT.force_demangle() {
            ReportSettings::default()
        } else {
            ReportSettings::restricted()
        };

        terminate::terminate_event(&event, &settings, Start::Current)
    }
}

/// An abort raised by the C++ runtime for a pure or deleted virtual function
/// call is reported as such, if one of the most recent callers is one of its
/// virtual call entry points
#[inline(never)]
fn reclassify_abort(event: FaultEvent) -> FaultEvent {
    let (return_addresses, count) = stack::return_addresses::<VIRTUAL_CALL_LOOKBACK>();

    match fault::match_virtual_call(&return_addresses[..count], CONTEXT.virtual_call_entries()) {
        Some((kind, address)) => {
            debug_print!("abort raised by a virtual call entry");
            FaultEvent::new(kind).at(address).with_context(event.context)
        }
        None => event,
    }
}

#[cfg(test)]
mod test {
    use super::CONTEXT;
    use std::process::Command;

    const CHILD_ENV: &str = "LAST_GASP_TEST_CHILD";

    /// Behaves like a C++ runtime's entry for a missing virtual function
    #[inline(never)]
    extern "C" fn missing_virtual() -> ! {
        // SAFETY: raises SIGABRT
        unsafe { libc::abort() }
    }

    #[test]
    fn abort_from_virtual_call_entry() {
        if std::env::var_os(CHILD_ENV).is_some() {
            crate::install();
            CONTEXT.set_virtual_call_entry(0, missing_virtual as usize);
            missing_virtual();
        }

        let output = Command::new(std::env::current_exe().unwrap())
            .args([
                "linux::state::test::abort_from_virtual_call_entry",
                "--exact",
                "--nocapture",
                "--test-threads",
                "1",
            ])
            .env(CHILD_ENV, "1")
            .env_remove(crate::DISABLE_HANDLERS_ENV)
            .env_remove(crate::FORCE_DEMANGLE_ENV)
            .output()
            .unwrap();

        let stderr = String::from_utf8_lossy(&output.stderr);
        assert_eq!(output.status.code(), Some(crate::EXIT_CODE), "{stderr}");

        let reasons: Vec<_> = stderr
            .lines()
            .filter(|line| line.starts_with(crate::REASON_PREFIX))
            .collect();
        assert_eq!(reasons.len(), 1, "{stderr}");
        assert!(
            reasons[0].starts_with("!!! TERMINATING DUE TO PURE VIRTUAL FUNCTION CALL @ 0x"),
            "{stderr}"
        );
        assert!(stderr.contains(crate::BACKTRACE_HEADER), "{stderr}");
    }
}
