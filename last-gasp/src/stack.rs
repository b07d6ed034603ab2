//! Stack walking.
//!
//! Frames are handed to a callback as they are discovered. A
//! [`Mode::Restricted`] walk uses [`backtrace::trace_unsynchronized`], which
//! only reads unwind tables, so that it neither allocates nor takes any locks.
//! A [`Mode::Full`] walk goes through the synchronized [`backtrace::trace`]
//! and [`backtrace::resolve_frame`], as the symbolizer's caches are shared by
//! the whole process.

/// Limits the length of a backtrace
pub const MAX_STACK_FRAMES: usize = 128;

/// The execution context an operation is performed in
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Signal handler context, no allocations and only async signal safe
    /// calls. Symbol names are limited to the dynamic symbol table and are
    /// never demangled.
    Restricted,
    /// Normal context, symbols are resolved from debug info and may be
    /// demangled
    Full,
}

/// A single frame, borrowed for the duration of a [`walk_with`] callback
#[derive(Copy, Clone, Debug)]
pub struct Frame<'a> {
    /// The position of the frame, 0 being the innermost
    pub index: usize,
    /// The instruction pointer of the frame
    pub address: usize,
    /// The raw, possibly mangled, name of the enclosing symbol
    pub symbol: Option<&'a str>,
    /// `address` relative to the start of the enclosing symbol
    pub offset: usize,
}

/// The outcome of a [`walk_with`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Walk {
    /// The number of frames passed to the callback
    pub frames: usize,
    /// True if there were more frames than the maximum
    pub truncated: bool,
}

/// An owned stack frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    /// The instruction pointer of the frame
    pub address: usize,
    /// The demangled name of the enclosing function, if it could be resolved
    pub function: Option<String>,
    /// `address` relative to the start of the enclosing function
    pub offset: usize,
}

/// An owned stack trace, innermost frame first
#[derive(Clone, Debug, Default)]
pub struct StackTrace {
    pub frames: Vec<StackFrame>,
    pub truncated: bool,
}

/// Collects at most `max_frames` frames of the current stack, starting at the
/// caller, resolving and demangling function names.
///
/// Not safe to use in a signal handler.
#[inline(never)]
pub fn collect_stack_trace(max_frames: usize) -> StackTrace {
    let mut frames = Vec::with_capacity(max_frames.min(MAX_STACK_FRAMES));
    let start = Start::CallerOf(collect_stack_trace as usize);
    let walk = walk_from(max_frames, start, Mode::Full, |frame| {
        frames.push(StackFrame {
            address: frame.address,
            function: frame.symbol.map(crate::demangle),
            offset: frame.offset,
        });
    });

    StackTrace {
        frames,
        truncated: walk.truncated,
    }
}

/// Walks the current stack, invoking `on_frame` for at most `max_frames`
/// frames, innermost first.
///
/// If `start` is the instruction pointer of a recorded context (eg. the
/// faulting instruction) all frames above it are skipped. If it is not found
/// on the current stack, every frame is reported instead.
pub fn walk_with<F>(max_frames: usize, start: Option<usize>, mode: Mode, on_frame: F) -> Walk
where
    F: FnMut(&Frame<'_>),
{
    walk_from(max_frames, start.map_or(Start::Current, Start::At), mode, on_frame)
}

/// The first frame a walk reports
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Start {
    /// The innermost frame
    Current,
    /// The frame with this instruction pointer
    At(usize),
    /// The caller of the function that begins at this address, used to keep
    /// the frames of our own entry points out of a report
    CallerOf(usize),
}

/// [`walk_with`], if `start` is not found on the current stack every frame is
/// reported instead
pub(crate) fn walk_from<F>(max_frames: usize, start: Start, mode: Mode, mut on_frame: F) -> Walk
where
    F: FnMut(&Frame<'_>),
{
    if start != Start::Current {
        let walk = walk_once(max_frames, start, mode, &mut on_frame);
        if walk.frames > 0 {
            return walk;
        }
    }

    walk_once(max_frames, Start::Current, mode, &mut on_frame)
}

struct Walker<'f, F> {
    on_frame: &'f mut F,
    max_frames: usize,
    skip: Start,
    frames: usize,
    truncated: bool,
}

impl<F> Walker<'_, F>
where
    F: FnMut(&Frame<'_>),
{
    /// Returns false if the walk should stop
    fn visit(&mut self, frame: &backtrace::Frame, mode: Mode) -> bool {
        let address = frame.ip() as usize;
        if address == 0 {
            return false;
        }

        match self.skip {
            Start::Current => {}
            Start::At(start) => {
                if start != address {
                    return true;
                }
                self.skip = Start::Current;
            }
            Start::CallerOf(function) => {
                if frame.symbol_address() as usize == function {
                    self.skip = Start::Current;
                }
                return true;
            }
        }

        if self.frames >= self.max_frames {
            self.truncated = true;
            return false;
        }

        // The start of the enclosing function as found by the unwinder, the
        // symbolizer's own address is not relocated for every backend
        let unwound = frame.symbol_address() as usize;

        match mode {
            Mode::Restricted => {
                let (symbol, base) = lookup_dynamic_symbol(address);
                self.emit(address, symbol, enclosing_base(address, unwound, base));
            }
            Mode::Full => {
                let (dynamic, base) = lookup_dynamic_symbol(address);
                let base = enclosing_base(address, unwound, base);

                let mut resolved = false;
                backtrace::resolve_frame(frame, |symbol| {
                    // Inlined frames resolve to multiple symbols, only the
                    // first (innermost) one is reported
                    if resolved {
                        return;
                    }
                    resolved = true;

                    let name = symbol
                        .name()
                        .and_then(|name| std::str::from_utf8(name.as_bytes()).ok());
                    self.emit(address, name.or(dynamic), base);
                });

                if !resolved {
                    self.emit(address, dynamic, base);
                }
            }
        }

        true
    }

    fn emit(&mut self, address: usize, symbol: Option<&str>, base: usize) {
        let offset = if base != 0 && base <= address {
            address - base
        } else {
            0
        };

        (self.on_frame)(&Frame {
            index: self.frames,
            address,
            symbol,
            offset,
        });
        self.frames += 1;
    }
}

#[inline(always)]
fn walk_once<F>(max_frames: usize, start: Start, mode: Mode, on_frame: &mut F) -> Walk
where
    F: FnMut(&Frame<'_>),
{
    let mut walker = Walker {
        on_frame,
        max_frames,
        skip: start,
        frames: 0,
        truncated: false,
    };

    match mode {
        // SAFETY: the synchronized variant takes a lock, which is not something
        // we can do inside a signal handler. Only the unwinder is used here,
        // the symbolizer state it would protect is never touched.
        Mode::Restricted => unsafe {
            backtrace::trace_unsynchronized(|frame| walker.visit(frame, mode));
        },
        Mode::Full => backtrace::trace(|frame| walker.visit(frame, mode)),
    }

    Walk {
        frames: walker.frames,
        truncated: walker.truncated,
    }
}

/// Retrieves the instruction pointers of at most `N` frames, skipping the
/// frame of this function
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn return_addresses<const N: usize>() -> ([usize; N], usize) {
    let mut addresses = [0usize; N];
    let mut count = 0;

    walk_once(N + 1, Start::Current, Mode::Restricted, &mut |frame: &Frame<'_>| {
        if frame.index > 0 {
            addresses[count] = frame.address;
            count += 1;
        }
    });

    (addresses, count)
}

/// Picks the closest function start at or below `address`, 0 if neither
/// candidate is known
#[inline]
fn enclosing_base(address: usize, unwound: usize, dynamic: Option<usize>) -> usize {
    [unwound, dynamic.unwrap_or(0)]
        .into_iter()
        .filter(|base| *base != 0 && *base <= address)
        .max()
        .unwrap_or(0)
}

/// Looks up the symbol containing `address` in the dynamic symbol tables of
/// the loaded modules, returning its name and start address
#[cfg(unix)]
fn lookup_dynamic_symbol(address: usize) -> (Option<&'static str>, Option<usize>) {
    // SAFETY: syscall, `dladdr` only fills out the struct
    unsafe {
        let mut info: libc::Dl_info = std::mem::zeroed();
        if libc::dladdr(address as *const libc::c_void, &mut info) == 0 {
            return (None, None);
        }

        let base = (!info.dli_saddr.is_null()).then_some(info.dli_saddr as usize);
        if info.dli_sname.is_null() {
            return (None, base);
        }

        // The name points into the string table of the module, which stays
        // mapped for as long as code in the module can be on the stack
        let name = std::ffi::CStr::from_ptr(info.dli_sname).to_str().ok();
        (name, base)
    }
}

#[cfg(not(unix))]
#[inline]
fn lookup_dynamic_symbol(_address: usize) -> (Option<&'static str>, Option<usize>) {
    (None, None)
}
