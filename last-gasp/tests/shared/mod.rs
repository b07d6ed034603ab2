#![allow(dead_code)]

pub use sadness_generator::SadnessFlavor;
use std::process::{Command, Output};

/// Set in the environment of the child process that actually dies
const CHILD_ENV: &str = "LAST_GASP_TEST_CHILD";

/// Runs `crash` with the handlers installed in a child process, as every
/// handled condition terminates the process, returning the child's output.
///
/// `test` must be the name of the test calling this, the child runs only that
/// test and calls `crash` instead of spawning another child. If `crash`
/// returns, the child exits successfully, which will fail the status checks.
pub fn run_in_child(test: &str, envs: &[(&str, &str)], crash: impl FnOnce()) -> Output {
    if std::env::var_os(CHILD_ENV).is_some() {
        last_gasp::install();
        crash();

        #[allow(clippy::exit)]
        std::process::exit(0);
    }

    let exe = std::env::current_exe().expect("unable to find test executable");
    let output = Command::new(exe)
        .args([test, "--exact", "--nocapture", "--test-threads", "1"])
        .env(CHILD_ENV, "1")
        .env_remove(last_gasp::DISABLE_HANDLERS_ENV)
        .env_remove(last_gasp::FORCE_DEMANGLE_ENV)
        .envs(envs.iter().copied())
        .output()
        .expect("failed to spawn child");

    eprintln!("child stderr:\n{}", String::from_utf8_lossy(&output.stderr));
    output
}

/// Runs `flavor` in a child process
pub fn make_sad(test: &str, flavor: SadnessFlavor) -> Output {
    #[inline(never)]
    fn indirect(flavor: SadnessFlavor) {
        flavor.make_sad();
    }

    run_in_child(test, &[], || indirect(flavor))
}

/// Asserts the child was terminated by us, and that exactly one reason line
/// starting with `reason` was emitted, returning its stderr
pub fn assert_terminated(output: &Output, reason: &str) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    assert_eq!(
        output.status.code(),
        Some(last_gasp::EXIT_CODE),
        "unexpected exit status {}",
        output.status
    );

    let reasons: Vec<_> = stderr
        .lines()
        .filter(|line| line.starts_with(last_gasp::REASON_PREFIX))
        .collect();
    assert_eq!(reasons.len(), 1, "{reasons:#?}");
    assert!(
        reasons[0].starts_with(reason),
        "'{}' doesn't start with '{reason}'",
        reasons[0]
    );

    stderr
}

/// Asserts a complete backtrace block follows the reason line
pub fn assert_backtrace(stderr: &str) {
    let mut lines = stderr
        .lines()
        .skip_while(|line| !line.starts_with(last_gasp::REASON_PREFIX))
        .skip(1);

    assert_eq!(lines.next(), Some(last_gasp::BACKTRACE_HEADER), "{stderr}");

    let frames = lines
        .by_ref()
        .take_while(|line| *line != last_gasp::BACKTRACE_FOOTER)
        .inspect(|line| {
            assert!(
                line.starts_with("=>#") || line.starts_with("  #"),
                "unexpected frame line '{line}'"
            );
        })
        .count();

    assert!(frames > 0, "{stderr}");
}
