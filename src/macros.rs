//! Logging macros
//!
//! Pipeline code logs through these so that the same call site goes to
//! `defmt` on target, to the `log` facade on the host and compiles away
//! otherwise. Only `{}` placeholders with primitives and `&str` are used,
//! which both backends accept.

#[cfg(feature = "embedded")]
macro_rules! pipeline_debug {
    ($($arg:tt)*) => { defmt::debug!($($arg)*) };
}

#[cfg(all(not(feature = "embedded"), feature = "std"))]
macro_rules! pipeline_debug {
    ($($arg:tt)*) => { log::debug!($($arg)*) };
}

#[cfg(not(any(feature = "embedded", feature = "std")))]
macro_rules! pipeline_debug {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        $(let _ = &$arg;)*
    }};
}

#[cfg(feature = "embedded")]
macro_rules! pipeline_warn {
    ($($arg:tt)*) => { defmt::warn!($($arg)*) };
}

#[cfg(all(not(feature = "embedded"), feature = "std"))]
macro_rules! pipeline_warn {
    ($($arg:tt)*) => { log::warn!($($arg)*) };
}

#[cfg(not(any(feature = "embedded", feature = "std")))]
macro_rules! pipeline_warn {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        $(let _ = &$arg;)*
    }};
}
