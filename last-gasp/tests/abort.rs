//! Abort is not catchable by a SEH, at least when done via the `__fastfail`
//! instrinsic which is used by eg. `std::process::abort()`
//!
//! See <https://docs.microsoft.com/en-us/cpp/intrinsics/fastfail?view=msvc-170>
//! for more information
#![cfg(unix)]

mod shared;

#[test]
fn handles_abort() {
    let output = shared::make_sad("handles_abort", shared::SadnessFlavor::Abort);
    let stderr = shared::assert_terminated(&output, "!!! TERMINATING DUE TO abort()");
    shared::assert_backtrace(&stderr);
}
