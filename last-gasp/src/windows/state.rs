#![allow(non_camel_case_types)]

use crate::{
    Error,
    fault::{FaultEvent, FaultKind, Registers},
    report::ReportSettings,
    stack::Start,
    terminate,
};
use windows_sys::Win32::System::Diagnostics::Debug::{
    CONTEXT, EXCEPTION_POINTERS, SetUnhandledExceptionFilter,
};

type PVECTORED_EXCEPTION_HANDLER =
    Option<unsafe extern "system" fn(exceptioninfo: *const EXCEPTION_POINTERS) -> i32>;

unsafe extern "system" {
    fn AddVectoredExceptionHandler(
        first_handler: u32,
        handler: PVECTORED_EXCEPTION_HANDLER,
    ) -> *mut core::ffi::c_void;
}

unsafe extern "C" {
    /// MSVCRT has a separate error handling function when calling pure
    /// virtuals, which is also used for deleted virtual functions.
    ///
    /// [Purecall Handler](https://docs.microsoft.com/en-us/cpp/c-runtime-library/reference/get-purecall-handler-set-purecall-handler?view=msvc-170)
    fn _set_purecall_handler(new_handler: Option<_purecall_handler>) -> Option<_purecall_handler>;
}

type _purecall_handler = unsafe extern "C" fn();

/// The handler is not entered, and the OS continues searching for an exception handler.
const EXCEPTION_CONTINUE_SEARCH: i32 = 0;

pub(crate) fn install() -> Result<(), Error> {
    // SAFETY: syscalls
    unsafe {
        // First in line, so that we see the exception before any other
        // vectored handler can swallow it
        if AddVectoredExceptionHandler(1, Some(handle_vectored_exception)).is_null() {
            return Err(Error::last_os_error("AddVectoredExceptionHandler", 1));
        }

        SetUnhandledExceptionFilter(Some(handle_exception));
        super::signal::install_abort_handler()?;
        _set_purecall_handler(Some(handle_pure_virtual_call));
    }

    Ok(())
}

/// Retrieves the exception code, parameters and registers from the exception
/// pointers
unsafe fn exception_details<'e>(
    except_info: *const EXCEPTION_POINTERS,
) -> Option<(u32, &'e [usize], Option<Registers>)> {
    unsafe {
        if except_info.is_null() || (*except_info).ExceptionRecord.is_null() {
            return None;
        }

        let record = &*(*except_info).ExceptionRecord;
        let count = (record.NumberParameters as usize).min(record.ExceptionInformation.len());
        let info = std::slice::from_raw_parts(record.ExceptionInformation.as_ptr(), count);

        // Without a context record the faulting instruction is still known
        let context = registers((*except_info).ContextRecord).or(Some(Registers {
            ip: record.ExceptionAddress as usize,
            sp: 0,
        }));

        Some((record.ExceptionCode as u32, info, context))
    }
}

#[inline]
unsafe fn registers(context: *const CONTEXT) -> Option<Registers> {
    if context.is_null() {
        return None;
    }

    // SAFETY: the pointer comes from the exception record
    let context = unsafe { &*context };

    cfg_if::cfg_if! {
        if #[cfg(target_arch = "x86_64")] {
            Some(Registers {
                ip: context.Rip as usize,
                sp: context.Rsp as usize,
            })
        } else if #[cfg(target_arch = "aarch64")] {
            Some(Registers {
                ip: context.Pc as usize,
                sp: context.Sp as usize,
            })
        } else {
            let _ = context;
            None
        }
    }
}

/// Called on the exception thread when an exception occurs, before the frame
/// based handlers get to see it
unsafe extern "system" fn handle_vectored_exception(except_info: *const EXCEPTION_POINTERS) -> i32 {
    // SAFETY: the pointers are supplied by the OS
    let Some((code, info, context)) = (unsafe { exception_details(except_info) }) else {
        return EXCEPTION_CONTINUE_SEARCH;
    };

    match super::classify_exception(code, info, context) {
        Some(event) => {
            debug_print!("handling fatal exception");
            terminate::terminate_event(&event, &ReportSettings::default(), Start::Current)
        }
        // Anything else is either not a problem, or something that a frame
        // based handler (eg. panic unwinding) is responsible for
        None => EXCEPTION_CONTINUE_SEARCH,
    }
}

/// Called on the exception thread when an unhandled exception occurs
unsafe extern "system" fn handle_exception(except_info: *const EXCEPTION_POINTERS) -> i32 {
    debug_print!("handling unhandled exception");

    // SAFETY: the pointers are supplied by the OS
    let event = match unsafe { exception_details(except_info) } {
        Some((code, info, context)) => super::classify_unhandled_exception(code, info, context),
        None => FaultEvent::new(FaultKind::Unknown),
    };

    terminate::terminate_event(&event, &ReportSettings::default(), Start::Current)
}

/// Handler for pure virtual function calls, this is not an exception so the
/// context (shouldn't be) isn't compromised
unsafe extern "C" fn handle_pure_virtual_call() {
    let event = FaultEvent::new(FaultKind::PureVirtualCall)
        .with_what(format_args!("PURE/DELETED VIRTUAL FUNCTION CALL"));

    let entry = Start::CallerOf(handle_pure_virtual_call as usize);
    terminate::terminate_event(&event, &ReportSettings::default(), entry)
}
