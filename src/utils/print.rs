//! Helper macros for logging (console printing).

/// Log TRACE message with parenthesized identity prefix.
///
/// Example:
/// ```no_run
/// use chainkv::pf_trace;
/// let name = "worker";
/// let msg = "hello";
/// pf_trace!(name; "got {} to print", msg);
/// ```
#[macro_export]
macro_rules! pf_trace {
    ($prefix:expr; $fmt_str:literal $(, $fmt_arg:expr)*) => {
        log::trace!(concat!("({}) ", $fmt_str), $prefix $(, $fmt_arg)*)
    };
}

/// Log DEBUG message with parenthesized identity prefix.
///
/// Example:
/// ```no_run
/// use chainkv::pf_debug;
/// let name = "worker";
/// let msg = "hello";
/// pf_debug!(name; "got {} to print", msg);
/// ```
#[macro_export]
macro_rules! pf_debug {
    ($prefix:expr; $fmt_str:literal $(, $fmt_arg:expr)*) => {
        log::debug!(concat!("({}) ", $fmt_str), $prefix $(, $fmt_arg)*)
    };
}

/// Log INFO message with parenthesized identity prefix.
///
/// Example:
/// ```no_run
/// use chainkv::pf_info;
/// let name = "worker";
/// let msg = "hello";
/// pf_info!(name; "got {} to print", msg);
/// ```
#[macro_export]
macro_rules! pf_info {
    ($prefix:expr; $fmt_str:literal $(, $fmt_arg:expr)*) => {
        log::info!(concat!("({}) ", $fmt_str), $prefix $(, $fmt_arg)*)
    };
}

/// Log WARN message with parenthesized identity prefix.
///
/// Example:
/// ```no_run
/// use chainkv::pf_warn;
/// let name = "worker";
/// let msg = "hello";
/// pf_warn!(name; "got {} to print", msg);
/// ```
#[macro_export]
macro_rules! pf_warn {
    ($prefix:expr; $fmt_str:literal $(, $fmt_arg:expr)*) => {
        log::warn!(concat!("({}) ", $fmt_str), $prefix $(, $fmt_arg)*)
    };
}

/// Log ERROR message with parenthesized identity prefix.
///
/// Example:
/// ```no_run
/// use chainkv::pf_error;
/// let name = "worker";
/// let msg = "hello";
/// pf_error!(name; "got {} to print", msg);
/// ```
#[macro_export]
macro_rules! pf_error {
    ($prefix:expr; $fmt_str:literal $(, $fmt_arg:expr)*) => {
        log::error!(concat!("({}) ", $fmt_str), $prefix $(, $fmt_arg)*)
    };
}

/// Log an error string to logger and then return a `ChainKvError`
/// containing the string.
///
/// Example:
/// ```no_run
/// use chainkv::{logged_err, pf_error, ChainKvError};
/// let name = "worker";
/// let msg = "hello";
/// let e: Result<(), ChainKvError> = logged_err!(name; "got {} to print", msg);
/// ```
#[macro_export]
macro_rules! logged_err {
    ($prefix:expr; $fmt_str:literal $(, $fmt_arg:expr)*) => {{
        pf_error!($prefix; $fmt_str $(, $fmt_arg)*);
        Err(ChainKvError(format!(
            concat!("({}) ", $fmt_str),
            $prefix $(, $fmt_arg)*
        )))
    }};
}
