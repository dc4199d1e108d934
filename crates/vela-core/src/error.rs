use std::panic::Location;

use thiserror::Error;

/// Coarse category of a [`KernelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A caller broke a documented precondition.
    Precondition,
    /// An allocated tensor lacks the padding a kernel needs.
    InsufficientPadding,
    /// The requested data type, layout or parameter combination is not implemented.
    Unsupported,
}

/// Error raised by the validate/configure/run chain of a kernel.
///
/// Every variant records the source location that created it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    /// A precondition was violated: missing tensor, unconfigured kernel,
    /// mismatching shapes/types/layouts/quantization or an illegal window.
    ///
    /// These are programming errors and are never recovered from at run time.
    #[error("precondition violated: {message} (at {location})")]
    Precondition {
        /// Human-readable description.
        message: String,
        /// Where the error was raised.
        location: &'static Location<'static>,
    },

    /// The governing window had to shrink because an allocated tensor carries
    /// less padding than an access window requires.
    ///
    /// The caller may reallocate the tensor with more padding and configure again.
    #[error("insufficient padding: {message} (at {location})")]
    InsufficientPadding {
        /// Human-readable description.
        message: String,
        /// Where the error was raised.
        location: &'static Location<'static>,
    },

    /// The configuration is valid but not implemented by this kernel variant.
    #[error("unsupported configuration: {message} (at {location})")]
    Unsupported {
        /// Human-readable description naming the unsupported value.
        message: String,
        /// Where the error was raised.
        location: &'static Location<'static>,
    },
}

impl KernelError {
    /// Creates a precondition error located at the caller.
    #[track_caller]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
            location: Location::caller(),
        }
    }

    /// Creates an insufficient padding error located at the caller.
    #[track_caller]
    pub fn insufficient_padding(message: impl Into<String>) -> Self {
        Self::InsufficientPadding {
            message: message.into(),
            location: Location::caller(),
        }
    }

    /// Creates an unsupported configuration error located at the caller.
    #[track_caller]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
            location: Location::caller(),
        }
    }

    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Precondition { .. } => ErrorKind::Precondition,
            Self::InsufficientPadding { .. } => ErrorKind::InsufficientPadding,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
        }
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        match self {
            Self::Precondition { message, .. }
            | Self::InsufficientPadding { message, .. }
            | Self::Unsupported { message, .. } => message,
        }
    }

    /// The source location that raised the error.
    pub fn location(&self) -> &'static Location<'static> {
        match self {
            Self::Precondition { location, .. }
            | Self::InsufficientPadding { location, .. }
            | Self::Unsupported { location, .. } => location,
        }
    }
}

/// Result of every validate-style function.
pub type Status = Result<(), KernelError>;

/// Returns a precondition error with `message` unless `condition` holds.
///
/// The message is only built on failure.
#[track_caller]
pub fn ensure(condition: bool, message: impl FnOnce() -> String) -> Status {
    if condition {
        Ok(())
    } else {
        Err(KernelError::precondition(message()))
    }
}

/// Converts a failing result into a panic for callers that prefer crash-on-error.
pub trait StatusExt<T> {
    /// Returns the value or panics with the error message and its origin.
    fn abort_on_error(self) -> T;
}

impl<T> StatusExt<T> for Result<T, KernelError> {
    #[track_caller]
    fn abort_on_error(self) -> T {
        match self {
            Ok(value) => value,
            Err(e) => panic!("{e}"),
        }
    }
}
