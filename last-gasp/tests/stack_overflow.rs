mod shared;

#[test]
fn handles_stack_overflow() {
    let output = shared::make_sad("handles_stack_overflow", shared::SadnessFlavor::StackOverflow);
    let stderr = shared::assert_terminated(
        &output,
        "!!! TERMINATING DUE TO SEGMENTATION FAULT (stack overflow)",
    );

    // Walking an exhausted stack would only make things worse
    assert!(!stderr.contains(last_gasp::BACKTRACE_HEADER), "{stderr}");
}
