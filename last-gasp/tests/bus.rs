#![cfg(any(target_os = "linux", target_os = "android"))]

mod shared;

#[test]
fn handles_bus() {
    let output = shared::make_sad("handles_bus", shared::SadnessFlavor::Bus);
    let stderr = shared::assert_terminated(
        &output,
        "!!! TERMINATING DUE TO BUS ERROR (nonexistent physical address) @ 0x",
    );
    shared::assert_backtrace(&stderr);
}
