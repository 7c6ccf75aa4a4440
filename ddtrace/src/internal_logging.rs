#![allow(unused_macros)]
//! Self-diagnostics for the tracer.
//!
//! **Note**: These macros (`dd_info!`, `dd_warn!`, `dd_debug!`, and `dd_error!`) are intended to be used
//! **internally within the tracer** or by **custom exporters and span processors**. They are not designed
//! for general application logging and should not be used for that purpose.
//!
//! With the `internal-logs` feature enabled, events are emitted through `tracing` with the crate name as
//! target, so an application subscriber decides whether they are shown. When running tests with
//! `--nocapture`, these macros print their output to stdout.
//!
//! Every event carries a `name` of the form `Component.Event`, followed by optional `key = value` pairs.

#[doc(hidden)]
#[macro_export]
macro_rules! __dd_log {
    ($level:ident, $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::$level!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }

        #[cfg(test)]
        {
            print!("dd_{}: name={}\n", stringify!($level), $name);
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = $name; // Compiler will optimize this out as it's unused.
        }
    };
    ($level:ident, $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::$level!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+);
        }

        #[cfg(test)]
        {
            print!("dd_{}: name={}", stringify!($level), $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )+
            print!("\n");
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $($value),+); // Compiler will optimize this out as it's unused.
        }
    };
}

/// Logs an informational tracer event.
///
/// ```rust
/// use ddtrace::dd_info;
/// dd_info!(name: "TracerProvider.Built", service = "web", env = "prod");
/// ```
#[macro_export]
macro_rules! dd_info {
    (name: $name:expr $(,)?) => {
        $crate::__dd_log!(info, $name)
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        $crate::__dd_log!(info, $name, $($key = $value),+)
    };
}

/// Logs a warning, typically an invalid configuration value that was replaced by its default.
///
/// ```rust
/// use ddtrace::dd_warn;
/// dd_warn!(name: "Config.InvalidSampleRate", value = "abc");
/// ```
#[macro_export]
macro_rules! dd_warn {
    (name: $name:expr $(,)?) => {
        $crate::__dd_log!(warn, $name)
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        $crate::__dd_log!(warn, $name, $($key = $value),+)
    };
}

/// Logs a debug event. API misuse such as finishing a span twice is reported at this level.
///
/// ```rust
/// use ddtrace::dd_debug;
/// dd_debug!(name: "Span.AlreadyFinished", span_id = 42);
/// ```
#[macro_export]
macro_rules! dd_debug {
    (name: $name:expr $(,)?) => {
        $crate::__dd_log!(debug, $name)
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        $crate::__dd_log!(debug, $name, $($key = $value),+)
    };
}

/// Logs an error event.
///
/// ```rust
/// use ddtrace::dd_error;
/// dd_error!(name: "Exporter.Failed", reason = "connection refused");
/// ```
#[macro_export]
macro_rules! dd_error {
    (name: $name:expr $(,)?) => {
        $crate::__dd_log!(error, $name)
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        $crate::__dd_log!(error, $name, $($key = $value),+)
    };
}
