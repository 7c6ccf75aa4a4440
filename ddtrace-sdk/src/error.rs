//! Errors returned by lifecycle operations of the SDK.
//!
//! Span creation, tagging, sampling and propagation never fail: malformed
//! input degrades to a default and usage errors are ignored. Only flushing,
//! exporting and shutting down report errors to the caller.
use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while flushing, exporting or shutting down.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DdSdkError {
    /// Shutdown was already invoked on this component.
    ///
    /// Calling `shutdown` more than once is a usage error and is safe to
    /// ignore.
    #[error("Shutdown already invoked")]
    AlreadyShutdown,

    /// The operation did not complete within the given time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The operation failed for an internal reason, such as an exporter
    /// rejecting a trace chunk.
    #[error("Operation failed: {0}")]
    InternalFailure(String),
}

impl<T> From<PoisonError<T>> for DdSdkError {
    fn from(err: PoisonError<T>) -> Self {
        DdSdkError::InternalFailure(format!("lock poisoned: {}", err))
    }
}

/// A specialized `Result` type for SDK lifecycle operations.
pub type DdSdkResult = Result<(), DdSdkError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn poisoned_lock_maps_to_internal_failure() {
        let lock = Arc::new(Mutex::new(0));
        let cloned = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = cloned.lock().unwrap();
            panic!("poison");
        })
        .join();

        let err: DdSdkError = lock.lock().unwrap_err().into();
        assert!(matches!(err, DdSdkError::InternalFailure(_)));
        assert_eq!(
            DdSdkError::Timeout(Duration::from_secs(1)).to_string(),
            "Operation timed out after 1s"
        );
    }
}
