#![cfg(target_arch = "x86_64")]

mod shared;

#[test]
fn handles_fpe() {
    let output = shared::make_sad("handles_fpe", shared::SadnessFlavor::DivideByZero);
    let stderr = shared::assert_terminated(
        &output,
        "!!! TERMINATING DUE TO FLOATING POINT ERROR (integer divide by zero)",
    );
    shared::assert_backtrace(&stderr);
}
