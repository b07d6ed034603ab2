//! Provides various ways to make your program sad, ie. reliably trigger each
//! of the fatal conditions that `last-gasp` reports.

#![allow(unsafe_code)]

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
use std::arch::asm;

/// The address [`raise_segfault`] writes to, which is never mapped
pub const SEGFAULT_ADDRESS: usize = 0x1234_5678;

/// How to make the program sad
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SadnessFlavor {
    /// `SIGABRT` on unix
    Abort,
    /// `SIGSEGV` on unix, `EXCEPTION_ACCESS_VIOLATION` on windows
    Segfault,
    /// `SIGBUS` on linux
    Bus,
    /// `SIGFPE` on unix, `EXCEPTION_INT_DIVIDE_BY_ZERO` on windows
    #[cfg(target_arch = "x86_64")]
    DivideByZero,
    /// `SIGILL` on unix, `EXCEPTION_ILLEGAL_INSTRUCTION` on windows
    Illegal,
    /// `SIGSEGV` on unix, `EXCEPTION_STACK_OVERFLOW` on windows
    StackOverflow,
    /// A call through a pure virtual function on windows
    #[cfg(target_os = "windows")]
    Purecall,
}

impl SadnessFlavor {
    /// Raises the chosen fatal condition. Should not return, but there's no
    /// hard guarantee the OS actually delivers what we asked for.
    pub fn make_sad(self) {
        match self {
            Self::Abort => raise_abort(),
            Self::Segfault => raise_segfault(),
            Self::Bus => raise_bus(),
            #[cfg(target_arch = "x86_64")]
            Self::DivideByZero => raise_floating_point_exception(),
            Self::Illegal => raise_illegal_instruction(),
            Self::StackOverflow => raise_stack_overflow(),
            #[cfg(target_os = "windows")]
            Self::Purecall => raise_purecall(),
        }
    }
}

/// Raises `SIGABRT` on unix and a `__fastfail` on windows
pub fn raise_abort() {
    std::process::abort();
}

/// Raises `SIGSEGV` on unix and a `EXCEPTION_ACCESS_VIOLATION` exception on
/// windows, by writing to [`SEGFAULT_ADDRESS`]
#[inline(never)]
pub fn raise_segfault() {
    // SAFETY: not safe at all, that's the point
    unsafe {
        std::ptr::write_volatile(SEGFAULT_ADDRESS as *mut u32, 0xdead);
    }
}

/// Raises `SIGFPE` on unix and a `EXCEPTION_INT_DIVIDE_BY_ZERO` exception on
/// windows
///
/// Integer division by zero doesn't trap on aarch64, so this is only
/// available on x86_64
#[cfg(target_arch = "x86_64")]
#[inline(never)]
pub fn raise_floating_point_exception() {
    let ohno = unsafe {
        let mut divisor: u32;
        asm!(
            "mov eax, 1",
            "cdq",
            "mov {div:e}, 0",
            "idiv {div:e}",
            div = out(reg) divisor,
            out("eax") _,
            out("edx") _,
        );
        divisor
    };

    println!("we are crashing by dividing by zero: {ohno}");
}

/// Raises `SIGILL` on unix and a `EXCEPTION_ILLEGAL_INSTRUCTION` exception on
/// windows
#[inline(never)]
pub fn raise_illegal_instruction() {
    unsafe {
        #[cfg(target_arch = "x86_64")]
        asm!("ud2");
        #[cfg(target_arch = "aarch64")]
        asm!("udf #0");
    }
}

/// Raises `SIGBUS` on linux, by reading past the end of a file mapping
#[inline(never)]
pub fn raise_bus() {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    unsafe {
        let path = std::env::temp_dir().join(format!("sadness-bus-{}", std::process::id()));
        let Ok(path) = std::ffi::CString::new(path.as_os_str().as_encoded_bytes()) else {
            return;
        };

        // An empty file, so that none of the mapped pages are backed by it
        let bus_fd = libc::open(
            path.as_ptr(),
            libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC,
            0o666,
        );
        libc::unlink(path.as_ptr());

        let mapping = libc::mmap(
            std::ptr::null_mut(),
            128,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            bus_fd,
            0,
        );
        if mapping == libc::MAP_FAILED {
            return;
        }

        let value = std::ptr::read_volatile(mapping.cast::<u8>().add(1));
        println!("{value}");
    }
}

/// Raises `SIGSEGV` on unix and a `EXCEPTION_STACK_OVERFLOW` exception on
/// windows
#[inline(never)]
pub fn raise_stack_overflow() {
    let mut big_boi = [0u8; 9 * 1024 * 1024];
    big_boi[big_boi.len() - 1] = 1;

    println!("{:?}", &big_boi[big_boi.len() - 20..]);
}

/// Calls the CRT's purecall, which is what the vtable slot of a pure virtual
/// function points to
#[cfg(target_os = "windows")]
#[inline(never)]
pub fn raise_purecall() {
    unsafe extern "C" {
        fn _purecall() -> i32;
    }

    unsafe {
        _purecall();
    }
}
