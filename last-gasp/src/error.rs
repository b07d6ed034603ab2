/// An error that can occur while installing the fatal event handlers.
///
/// These are never returned to the caller, [`crate::install`] turns them into
/// the reason of an immediate termination.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A registration syscall failed
    #[error("{call}({param}) failed: {source}")]
    Syscall {
        call: &'static str,
        param: i64,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Captures the last OS error for a failed `call`
    #[inline]
    pub(crate) fn last_os_error(call: &'static str, param: i64) -> Self {
        Self::Syscall {
            call,
            param,
            source: std::io::Error::last_os_error(),
        }
    }
}
