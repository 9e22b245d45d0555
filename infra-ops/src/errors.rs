use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Backing errors for all provisioning, reconciliation and remote operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Zero matches where exactly one was expected.
    #[error("not found: {message}")]
    NotFound { message: String },
    /// More than one match where exactly one was expected.
    #[error("ambiguous result: {message}")]
    Ambiguous { message: String },
    /// The remote (or local) command wrote to its error stream.
    #[error("{stderr} ( running: $ {command} )")]
    RemoteExecution { command: String, stderr: String },
    /// A reconciliation loop ran out of attempts or wall-clock budget.
    #[error("timeout exceeded after {attempts} attempt(s): {message} (last observed: {last_observed})")]
    TimeoutExceeded {
        message: String,
        attempts: usize,
        last_observed: String,
    },
    #[error("failed API: {message}")]
    API { message: String, is_retryable: bool },
    #[error("failed for other reasons: {message}")]
    Other { message: String, is_retryable: bool },
}

impl Error {
    /// Returns the error message in "String".
    #[inline]
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Error::NotFound { message }
            | Error::Ambiguous { message }
            | Error::TimeoutExceeded { message, .. }
            | Error::API { message, .. }
            | Error::Other { message, .. } => message.clone(),
            Error::RemoteExecution { stderr, .. } => stderr.clone(),
        }
    }

    /// Returns if the error is retryable.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::API { is_retryable, .. } | Error::Other { is_retryable, .. } => *is_retryable,
            _ => false,
        }
    }

    pub(crate) fn other(message: impl Into<String>) -> Self {
        Error::Other {
            message: message.into(),
            is_retryable: false,
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match &e {
            Error::NotFound { .. } => io::ErrorKind::NotFound,
            Error::TimeoutExceeded { .. } => io::ErrorKind::TimedOut,
            Error::Ambiguous { .. } => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, e.to_string())
    }
}

#[test]
fn test_error_message() {
    let e = Error::RemoteExecution {
        command: String::from("nosuchcommand"),
        stderr: String::from("bash: nosuchcommand: command not found"),
    };
    assert_eq!(
        e.to_string(),
        "bash: nosuchcommand: command not found ( running: $ nosuchcommand )"
    );
    assert!(!e.is_retryable());

    let e = Error::API {
        message: String::from("throttled"),
        is_retryable: true,
    };
    assert!(e.is_retryable());
    assert_eq!(e.message(), "throttled");

    let e: io::Error = Error::NotFound {
        message: String::from("instance 'x'"),
    }
    .into();
    assert_eq!(e.kind(), io::ErrorKind::NotFound);
}
