//! Error types for the object transfer engine

use std::fmt;
use thiserror::Error;

/// Result type alias for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// The kind of request that was being made when the service said "unauthorized"
///
/// The retry coordinator reacts differently to each one, so transports must tag
/// every 401 with the category of the request that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCategory {
    /// Authorizing the account itself. The credentials are bad; retrying won't help.
    AccountAuthorization,
    /// Uploading to a leased upload url. The lease is probably bad, not the session.
    Uploading,
    /// Any other api call. The session itself is probably stale.
    Other,
}

/// Failures below the HTTP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkFailure {
    ConnectFailed,
    ConnectionBroken,
    Timeout,
    UnknownHost,
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::ConnectionBroken => write!(f, "connection broken"),
            Self::Timeout => write!(f, "network timeout"),
            Self::UnknownHost => write!(f, "unknown host"),
        }
    }
}

/// Where in the download pipeline a sha1 check was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerifyStage {
    FromNetwork,
    FromDestination,
}

impl fmt::Display for VerifyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FromNetwork => write!(f, "from network"),
            Self::FromDestination => write!(f, "from destination"),
        }
    }
}

/// Broad classification of an error, used by callers and by the retry coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Surfaced immediately, never retried
    NonRetryable,
    /// The service had trouble; worth retrying with backoff
    RetryableRemote,
    /// The network had trouble; worth retrying with backoff
    RetryableNetwork,
    /// Trouble with local resources (files, buffers); never retried
    Local,
    /// The content didn't match its sha1
    Integrity,
}

/// Details from an error response sent by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFault {
    /// HTTP status of the response
    pub status: u16,
    /// Machine-readable code from the error body (e.g. "bad_auth_token")
    pub code: String,
    /// Human-readable message from the error body
    pub message: String,
    /// Value of the Retry-After header, when it was a whole number of seconds
    pub retry_after_secs: Option<u64>,
}

impl ServiceFault {
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceFault {
            status,
            code: code.into(),
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }
}

impl fmt::Display for ServiceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.status, self.code, self.message)
    }
}

/// Error types that can occur while transferring content
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    #[error("Bad request: {0}")]
    BadRequest(ServiceFault),

    #[error("Unauthorized during {category:?} request: {fault}")]
    Unauthorized {
        fault: ServiceFault,
        category: RequestCategory,
    },

    #[error("Forbidden: {0}")]
    Forbidden(ServiceFault),

    #[error("Not found: {0}")]
    NotFound(ServiceFault),

    #[error("Request timeout: {0}")]
    RequestTimeout(ServiceFault),

    #[error("Too many requests: {0}")]
    TooManyRequests(ServiceFault),

    #[error("Internal server error: {0}")]
    InternalError(ServiceFault),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(ServiceFault),

    #[error("Service error: {0}")]
    Service(ServiceFault),

    #[error("Network error ({kind}): {message}")]
    Network { kind: NetworkFailure, message: String },

    #[error("Local error ({code}): {message}")]
    Local { code: String, message: String },

    #[error("sha1 mismatch {stage}.  expected {expected}, but got {actual}")]
    Integrity {
        stage: VerifyStage,
        expected: String,
        actual: String,
    },

    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::local("io", err.to_string())
    }
}

impl TransferError {
    /// Classify this error
    ///
    /// Unauthorized errors depend on the request that produced them: failing to
    /// authorize the account is final, while a bad upload lease or a stale
    /// session can be fixed by trying again.
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransferError::Unauthorized { category, .. } => match category {
                RequestCategory::AccountAuthorization => ErrorCategory::NonRetryable,
                RequestCategory::Uploading | RequestCategory::Other => {
                    ErrorCategory::RetryableRemote
                }
            },

            TransferError::RequestTimeout(_)
            | TransferError::TooManyRequests(_)
            | TransferError::InternalError(_)
            | TransferError::ServiceUnavailable(_) => ErrorCategory::RetryableRemote,

            TransferError::Network { .. } => ErrorCategory::RetryableNetwork,

            TransferError::Local { .. } => ErrorCategory::Local,

            TransferError::Integrity { .. } => ErrorCategory::Integrity,

            TransferError::BadRequest(_)
            | TransferError::Forbidden(_)
            | TransferError::NotFound(_)
            | TransferError::Service(_)
            | TransferError::Interrupted(_)
            | TransferError::Precondition(_)
            | TransferError::ConfigError(_)
            | TransferError::Internal(_) => ErrorCategory::NonRetryable,
        }
    }

    /// Determine if this error should trigger a retry
    pub fn should_retry(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RetryableRemote | ErrorCategory::RetryableNetwork
        )
    }

    /// The service's response details, for errors that came from the service
    pub fn fault(&self) -> Option<&ServiceFault> {
        match self {
            TransferError::BadRequest(fault)
            | TransferError::Unauthorized { fault, .. }
            | TransferError::Forbidden(fault)
            | TransferError::NotFound(fault)
            | TransferError::RequestTimeout(fault)
            | TransferError::TooManyRequests(fault)
            | TransferError::InternalError(fault)
            | TransferError::ServiceUnavailable(fault)
            | TransferError::Service(fault) => Some(fault),
            _ => None,
        }
    }

    /// HTTP status of the service response, if any
    pub fn status(&self) -> Option<u16> {
        self.fault().map(|fault| fault.status)
    }

    /// How long the service asked us to wait before trying again, if it said
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.fault().and_then(|fault| fault.retry_after_secs)
    }

    /// Create an error from an HTTP error response
    ///
    /// 401 responses are tagged as [`RequestCategory::Other`]; use
    /// [`TransferError::with_request_category`] when the request was an
    /// account authorization or an upload.
    pub fn from_http_status(
        status: u16,
        code: impl Into<String>,
        message: impl Into<String>,
        retry_after_secs: Option<u64>,
    ) -> Self {
        let fault = ServiceFault {
            status,
            code: code.into(),
            message: message.into(),
            retry_after_secs,
        };
        match status {
            400 => TransferError::BadRequest(fault),
            401 => TransferError::Unauthorized {
                fault,
                category: RequestCategory::Other,
            },
            403 => TransferError::Forbidden(fault),
            404 => TransferError::NotFound(fault),
            408 => TransferError::RequestTimeout(fault),
            429 => TransferError::TooManyRequests(fault),
            500 => TransferError::InternalError(fault),
            503 => TransferError::ServiceUnavailable(fault),
            _ => TransferError::Service(fault),
        }
    }

    /// Re-tag an unauthorized error with the category of the request that produced it
    pub fn with_request_category(self, category: RequestCategory) -> Self {
        match self {
            TransferError::Unauthorized { fault, .. } => {
                TransferError::Unauthorized { fault, category }
            }
            other => other,
        }
    }

    /// Create an unauthorized error for the given kind of request
    pub fn unauthorized(
        category: RequestCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        TransferError::Unauthorized {
            fault: ServiceFault::new(401, code, message),
            category,
        }
    }

    /// Create a network error
    pub fn network(kind: NetworkFailure, message: impl Into<String>) -> Self {
        TransferError::Network {
            kind,
            message: message.into(),
        }
    }

    /// Create a local error
    pub fn local(code: impl Into<String>, message: impl Into<String>) -> Self {
        TransferError::Local {
            code: code.into(),
            message: message.into(),
        }
    }
}
