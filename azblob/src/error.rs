use std::fmt;
use std::io;

use thiserror::Error;

/// Result type for blob operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Coarse classification of a [`BlobError`], matched on by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigInvalid,
    InvalidCredential,
    Invalid,
    AlreadyExists,
    NotFound,
    UploadFailed,
    DownloadFailed,
    Cancelled,
    Service,
    Transport,
    Io,
}

/// Error codes reported by the storage service (`x-ms-error-code`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServiceCode {
    ContainerAlreadyExists,
    ContainerBeingDeleted,
    ContainerNotFound,
    BlobNotFound,
    InvalidBlockId,
    InvalidBlockList,
    InvalidRange,
    ConditionNotMet,
    AuthenticationFailed,
    ServerBusy,
    InternalError,
    OperationTimedOut,
    Other(String),
}

impl ServiceCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ContainerAlreadyExists => "ContainerAlreadyExists",
            Self::ContainerBeingDeleted => "ContainerBeingDeleted",
            Self::ContainerNotFound => "ContainerNotFound",
            Self::BlobNotFound => "BlobNotFound",
            Self::InvalidBlockId => "InvalidBlockId",
            Self::InvalidBlockList => "InvalidBlockList",
            Self::InvalidRange => "InvalidRange",
            Self::ConditionNotMet => "ConditionNotMet",
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::ServerBusy => "ServerBusy",
            Self::InternalError => "InternalError",
            Self::OperationTimedOut => "OperationTimedOut",
            Self::Other(code) => code,
        }
    }
}

impl From<&str> for ServiceCode {
    fn from(code: &str) -> Self {
        match code {
            "ContainerAlreadyExists" => Self::ContainerAlreadyExists,
            "ContainerBeingDeleted" => Self::ContainerBeingDeleted,
            "ContainerNotFound" => Self::ContainerNotFound,
            "BlobNotFound" => Self::BlobNotFound,
            "InvalidBlockId" => Self::InvalidBlockId,
            "InvalidBlockList" => Self::InvalidBlockList,
            "InvalidRange" => Self::InvalidRange,
            "ConditionNotMet" => Self::ConditionNotMet,
            "AuthenticationFailed" => Self::AuthenticationFailed,
            "ServerBusy" => Self::ServerBusy,
            "InternalError" => Self::InternalError,
            "OperationTimedOut" => Self::OperationTimedOut,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ServiceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during blob operations
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    #[error("Invalid credential: {message}")]
    InvalidCredential { message: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Container already exists: {container}")]
    AlreadyExists { container: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Upload failed: {reason}")]
    UploadFailed {
        reason: String,
        #[source]
        source: Option<Box<BlobError>>,
    },

    #[error("Download failed: {reason}")]
    DownloadFailed {
        reason: String,
        #[source]
        source: Option<Box<BlobError>>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Service returned {status} ({code}): {message}")]
    Service {
        status: u16,
        code: ServiceCode,
        message: String,
    },

    #[error("Transport error: {source}")]
    Transport {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl BlobError {
    /// Create a transport error from any error type
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            source: Box::new(error),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    /// Create a credential error
    pub fn credential<S: Into<String>>(message: S) -> Self {
        Self::InvalidCredential {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a service error
    pub fn service<S: Into<String>>(status: u16, code: ServiceCode, message: S) -> Self {
        Self::Service {
            status,
            code,
            message: message.into(),
        }
    }

    /// Create an upload failed error, keeping the underlying cause
    pub fn upload_failed<S: Into<String>>(reason: S, source: BlobError) -> Self {
        Self::UploadFailed {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a download failed error, keeping the underlying cause
    pub fn download_failed<S: Into<String>>(reason: S, source: Option<BlobError>) -> Self {
        Self::DownloadFailed {
            reason: reason.into(),
            source: source.map(Box::new),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigInvalid { .. } => ErrorKind::ConfigInvalid,
            Self::InvalidCredential { .. } => ErrorKind::InvalidCredential,
            Self::Invalid { .. } => ErrorKind::Invalid,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::UploadFailed { .. } => ErrorKind::UploadFailed,
            Self::DownloadFailed { .. } => ErrorKind::DownloadFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Service { .. } => ErrorKind::Service,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// Service error code, when the service produced one.
    pub fn service_code(&self) -> Option<&ServiceCode> {
        match self {
            Self::Service { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Connection-level failures, throttling and 5xx responses are transient;
    /// everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Service { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::Io { source } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Recover a `BlobError` carried inside an `io::Error` produced by a [`crate::ByteStream`].
    pub fn from_io(err: io::Error) -> Self {
        let kind = err.kind();
        if !err.get_ref().map_or(false, |inner| inner.is::<BlobError>()) {
            return Self::Io { source: err };
        }
        match err.into_inner().map(|inner| inner.downcast::<BlobError>()) {
            Some(Ok(blob)) => *blob,
            Some(Err(other)) => Self::Io {
                source: io::Error::new(kind, other),
            },
            None => Self::Io {
                source: io::Error::from(kind),
            },
        }
    }
}

impl From<BlobError> for io::Error {
    fn from(err: BlobError) -> Self {
        let kind = match &err {
            BlobError::Cancelled => io::ErrorKind::Interrupted,
            BlobError::NotFound { .. } => io::ErrorKind::NotFound,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_codes_parse_by_value() {
        assert_eq!(
            ServiceCode::from("ContainerAlreadyExists"),
            ServiceCode::ContainerAlreadyExists
        );
        assert_eq!(
            ServiceCode::from("SomethingNew"),
            ServiceCode::Other("SomethingNew".to_string())
        );
        assert_eq!(ServiceCode::from("BlobNotFound").as_str(), "BlobNotFound");
    }

    #[test]
    fn retryable_classification() {
        assert!(BlobError::service(503, ServiceCode::ServerBusy, "busy").is_retryable());
        assert!(BlobError::service(429, ServiceCode::Other("TooMany".into()), "slow down").is_retryable());
        assert!(!BlobError::service(409, ServiceCode::ContainerAlreadyExists, "exists").is_retryable());
        assert!(!BlobError::service(403, ServiceCode::AuthenticationFailed, "nope").is_retryable());
        assert!(BlobError::from(io::Error::from(io::ErrorKind::ConnectionReset)).is_retryable());
        assert!(!BlobError::Cancelled.is_retryable());
    }

    #[test]
    fn io_round_trip_keeps_kind() {
        let wrapped: io::Error = BlobError::download_failed("retries exhausted", None).into();
        let recovered = BlobError::from_io(wrapped);
        assert_eq!(recovered.kind(), ErrorKind::DownloadFailed);

        let plain = BlobError::from_io(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(plain.kind(), ErrorKind::Io);
    }
}
