use crate::{
    context::CONTEXT,
    fmt::FixedBuf,
    sink::{Line, Sink, get_sink},
    stack::{self, Frame, MAX_STACK_FRAMES, Mode, Start},
};
use std::fmt::Write;

pub const BACKTRACE_HEADER: &str = "---------- BACKTRACE ----------";
pub const BACKTRACE_FOOTER: &str = "-------------------------------";

const FRAME_LINE_LEN: usize = 1024;

/// Options for a single report, nothing here is retained after the call.
#[derive(Copy, Clone, Debug)]
pub struct ReportSettings {
    /// Overrides the process wide sink for this report only
    pub sink: Option<Sink>,
    /// Demangles symbol names, only honored in [`Mode::Full`]
    pub demangle: bool,
    /// Whether a backtrace follows the reason line
    pub print_backtrace: bool,
    pub mode: Mode,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            sink: None,
            demangle: true,
            print_backtrace: true,
            mode: Mode::Full,
        }
    }
}

impl ReportSettings {
    /// The settings used from within a signal handler
    #[inline]
    pub fn restricted() -> Self {
        Self {
            demangle: false,
            mode: Mode::Restricted,
            ..Default::default()
        }
    }

    #[inline]
    pub fn with_sink(mut self, sink: Sink) -> Self {
        self.sink = Some(sink);
        self
    }

    #[inline]
    pub fn with_demangle(mut self, demangle: bool) -> Self {
        self.demangle = demangle;
        self
    }

    #[inline]
    pub fn with_backtrace(mut self, print_backtrace: bool) -> Self {
        self.print_backtrace = print_backtrace;
        self
    }

    #[inline]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[inline]
    pub(crate) fn sink(&self) -> Sink {
        self.sink.unwrap_or_else(get_sink)
    }
}

/// Prints a backtrace of the calling thread, starting at the caller.
///
/// The frame whose address equals `fault_address`, if any, is marked with
/// `=>`. The output always ends with a single [`Line::Flush`].
#[inline(never)]
pub fn print_stack_trace(settings: &ReportSettings, fault_address: Option<usize>) {
    let start = Start::CallerOf(print_stack_trace as usize);
    emit(settings.sink(), settings, fault_address, start);
}

/// Emits a backtrace block to `sink`, starting at `start` if it can be found
/// on the current stack
#[inline]
pub(crate) fn emit(sink: Sink, settings: &ReportSettings, highlight: Option<usize>, start: Start) {
    emit_bounded(sink, settings, highlight, start, MAX_STACK_FRAMES);
}

fn emit_bounded(
    sink: Sink,
    settings: &ReportSettings,
    highlight: Option<usize>,
    start: Start,
    max_frames: usize,
) {
    sink(Line::Text(BACKTRACE_HEADER));

    let demangle = settings.demangle && settings.mode == Mode::Full;
    let walk = stack::walk_from(max_frames, start, settings.mode, |frame| {
        let line = format_frame(frame, highlight, demangle);
        sink(Line::Text(line.as_str()));
    });

    if walk.truncated {
        let line =
            FixedBuf::<64>::from_fmt(format_args!("  #{:<2} ... (truncating)", walk.frames));
        sink(Line::Text(line.as_str()));
    }

    sink(Line::Text(BACKTRACE_FOOTER));
    sink(Line::Flush);
}

/// Formats `<marker>#<index>  0x<address>[ in <name>+0x<offset>]`
fn format_frame(
    frame: &Frame<'_>,
    highlight: Option<usize>,
    demangle: bool,
) -> FixedBuf<FRAME_LINE_LEN> {
    let marker = if highlight == Some(frame.address) {
        "=>"
    } else {
        "  "
    };

    let mut line = FixedBuf::new();
    let _ = write!(line, "{marker}#{:<2}  {:#x}", frame.index, frame.address);

    let Some(symbol) = frame.symbol else {
        return line;
    };

    // The demangler is shared, if another thread is busy with it the raw name
    // is good enough
    let demangler = if demangle {
        CONTEXT.demangler.try_lock()
    } else {
        None
    };

    let _ = match demangler {
        Some(mut demangler) => {
            let name = demangler.demangle(symbol);
            write!(line, " in {name}+{:#x}", frame.offset)
        }
        None => write!(line, " in {symbol}+{:#x}", frame.offset),
    };

    line
}
