mod shared;

#[test]
fn installs_once() {
    let output = shared::run_in_child("installs_once", &[], || {
        // The first install happened in the harness
        last_gasp::install();
        let _setup = last_gasp::HandlerSetup::new();

        panic!("installed thrice");
    });

    // Exactly one reason line, not one per install
    shared::assert_terminated(&output, "!!! TERMINATING DUE TO panic (");
}

#[cfg(unix)]
#[test]
fn disabled_handlers() {
    use std::os::unix::process::ExitStatusExt;

    let output = shared::run_in_child(
        "disabled_handlers",
        &[(last_gasp::DISABLE_HANDLERS_ENV, "1")],
        sadness_generator::raise_abort,
    );

    assert_eq!(output.status.signal(), Some(libc::SIGABRT), "{}", output.status);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains(last_gasp::REASON_PREFIX), "{stderr}");
}
