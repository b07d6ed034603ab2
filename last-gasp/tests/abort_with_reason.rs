use last_gasp::{Line, ReportSettings};
use std::io::Write;

mod shared;

fn reason() -> last_gasp::fault::Reason {
    last_gasp::fault::format_reason("my own reasons", Some("details"), Some(0x42))
}

#[test]
fn aborts_with_backtrace() {
    let output = shared::run_in_child("aborts_with_backtrace", &[], || {
        last_gasp::abort(reason().as_str(), &ReportSettings::default());
    });

    let stderr = shared::assert_terminated(
        &output,
        "!!! TERMINATING DUE TO my own reasons (details) @ 0x42",
    );
    shared::assert_backtrace(&stderr);

    // The report starts at the caller of `abort`
    let first = stderr
        .lines()
        .find(|line| line.starts_with("  #0 "))
        .expect("no first frame");
    assert!(first.contains("aborts_with_backtrace"), "{stderr}");
    assert!(
        !stderr
            .lines()
            .any(|line| line.contains("last_gasp::terminate") || line.contains(" in backtrace::")),
        "{stderr}"
    );
}

#[test]
fn aborts_without_backtrace() {
    let output = shared::run_in_child("aborts_without_backtrace", &[], || {
        last_gasp::abort(
            reason().as_str(),
            &ReportSettings::default().with_backtrace(false),
        );
    });

    let stderr = shared::assert_terminated(&output, "!!! TERMINATING DUE TO my own reasons");
    assert!(!stderr.contains(last_gasp::BACKTRACE_HEADER), "{stderr}");
}

#[test]
fn aborts_silently() {
    let output = shared::run_in_child("aborts_silently", &[], || {
        last_gasp::abort("", &ReportSettings::default().with_backtrace(false));
    });

    assert_eq!(output.status.code(), Some(last_gasp::EXIT_CODE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains(last_gasp::REASON_PREFIX), "{stderr}");
}

/// Prefixes every line written by [`stdout_sink`], libtest may have already
/// written part of a line to stdout before the child dies
const SUNK: &str = "sunk| ";

fn stdout_sink(line: Line<'_>) {
    let mut stdout = std::io::stdout().lock();
    let _ = match line {
        Line::Text(text) => writeln!(stdout, "{SUNK}{text}"),
        Line::Flush => writeln!(stdout, "{SUNK}<flush>"),
    };
    let _ = stdout.flush();
}

#[test]
fn reports_to_custom_sink() {
    let output = shared::run_in_child("reports_to_custom_sink", &[], || {
        last_gasp::set_sink(Some(stdout_sink));
        last_gasp::abort(reason().as_str(), &ReportSettings::default());
    });

    assert_eq!(output.status.code(), Some(last_gasp::EXIT_CODE));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains(last_gasp::REASON_PREFIX), "{stderr}");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let sunk: Vec<_> = stdout
        .lines()
        .filter_map(|line| line.find(SUNK).map(|i| &line[i + SUNK.len()..]))
        .collect();

    assert_eq!(
        sunk.first().copied(),
        Some("!!! TERMINATING DUE TO my own reasons (details) @ 0x42"),
        "{stdout}"
    );
    assert_eq!(sunk.get(1).copied(), Some(last_gasp::BACKTRACE_HEADER));
    assert_eq!(sunk.last().copied(), Some("<flush>"));
    assert_eq!(sunk.iter().filter(|line| **line == "<flush>").count(), 1);
}
