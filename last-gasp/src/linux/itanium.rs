//! Replacements for the Itanium C++ ABI functions that are placed in the
//! vtable slots of pure virtual and deleted virtual functions, which would
//! otherwise print their own message to stderr before calling `abort`.

use crate::{
    fault::{FaultEvent, FaultKind},
    report::ReportSettings,
    stack::Start,
    terminate,
};

#[unsafe(no_mangle)]
pub extern "C" fn __cxa_pure_virtual() -> ! {
    terminate::terminate_event(
        &FaultEvent::new(FaultKind::PureVirtualCall),
        &ReportSettings::default(),
        Start::CallerOf(__cxa_pure_virtual as usize),
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn __cxa_deleted_virtual() -> ! {
    terminate::terminate_event(
        &FaultEvent::new(FaultKind::DeletedVirtualCall),
        &ReportSettings::default(),
        Start::CallerOf(__cxa_deleted_virtual as usize),
    )
}
