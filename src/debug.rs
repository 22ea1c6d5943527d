/*!
Logging shims that cost nothing unless the `logging` feature is enabled.

Call sites look like ordinary `log` macro invocations, but compile to
nothing when the feature is off, so the crate has no mandatory dependency
on `log`.
*/

macro_rules! log {
    ($($tt:tt)*) => {
        #[cfg(feature = "logging")]
        {
            $($tt)*
        }
    };
}

macro_rules! debug {
    ($($tt:tt)*) => { log!(log::debug!($($tt)*)) };
}

macro_rules! trace {
    ($($tt:tt)*) => { log!(log::trace!($($tt)*)) };
}
