use std::error::Error;
use std::fmt;

/// Error details recorded on a span.
///
/// Stored on the span as the `error.type`, `error.message` and `error.stack`
/// tags when it is exported.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error class or type name.
    pub kind: String,
    /// Human readable message.
    pub message: String,
    /// Stack trace or cause chain, if known.
    pub stack: Option<String>,
}

impl ErrorInfo {
    /// Creates error details without a stack.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorInfo {
            kind: kind.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Attaches a stack trace.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Captures a Rust error.
    ///
    /// The kind is the error's type name, the message its `Display` output and
    /// the stack its `source()` chain, one cause per line.
    ///
    /// ```
    /// use ddtrace::trace::ErrorInfo;
    ///
    /// let err = "x".parse::<u32>().unwrap_err();
    /// let info = ErrorInfo::from_error(&err);
    ///
    /// assert!(info.kind.ends_with("ParseIntError"));
    /// assert_eq!(info.message, "invalid digit found in string");
    /// assert_eq!(info.stack, None);
    /// ```
    pub fn from_error<E: Error + ?Sized>(err: &E) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        ErrorInfo {
            kind: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            stack: if causes.is_empty() {
                None
            } else {
                Some(causes.join("\n"))
            },
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
