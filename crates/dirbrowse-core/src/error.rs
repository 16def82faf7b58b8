//! Error types for directory browsing operations.
//!
//! Every failure in the core is returned to the caller as one of these kinds. Nothing is
//! retried automatically, so each variant carries enough detail (the endpoint, the path, or
//! the service result code) for the caller to decide whether to try again.

use thiserror::Error;

/// Main error type for directory browsing operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid or missing connection fields
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Operation on a connection name that is not registered
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    /// Transport could not be established
    #[error("Failed to connect to {endpoint}: {message}")]
    ConnectError {
        /// Endpoint that was being opened
        endpoint: String,
        /// Error message
        message: String,
    },

    /// Bind was rejected by the service
    #[error("Bind rejected for `{identity}`: {message}")]
    AuthError {
        /// Bind identity that was rejected
        identity: String,
        /// Error message
        message: String,
    },

    /// Operation attempted on a session that is not connected
    #[error("Connection `{0}` is not connected")]
    NotConnected(String),

    /// One-level fetch of a tree node failed
    #[error("Failed to fetch children of `{path}`: {source}")]
    FetchError {
        /// Path of the node being expanded
        path: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Add/modify/delete/search rejected by the service
    #[error("Directory operation failed with {} ({code}): {message}", code_label(.code))]
    ProtocolError {
        /// Directory result code
        code: u32,
        /// Diagnostic message from the service
        message: String,
    },

    /// Malformed distinguished name
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Path not present in a cached tree
    #[error("Node not cached: {0}")]
    UnknownNode(String),
}

/// Specialized result type for directory browsing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result code reported for a successful operation.
pub const RESULT_SUCCESS: u32 = 0;
/// Result code the client reports when the transport failed locally.
pub const RESULT_LOCAL_ERROR: u32 = 82;

/// Returns the symbolic name of a well-known directory result code.
#[must_use]
pub const fn result_code_name(code: u32) -> &'static str {
    match code {
        0 => "success",
        1 => "operationsError",
        2 => "protocolError",
        3 => "timeLimitExceeded",
        4 => "sizeLimitExceeded",
        16 => "noSuchAttribute",
        17 => "undefinedAttributeType",
        19 => "constraintViolation",
        20 => "attributeOrValueExists",
        21 => "invalidAttributeSyntax",
        32 => "noSuchObject",
        34 => "invalidDNSyntax",
        48 => "inappropriateAuthentication",
        49 => "invalidCredentials",
        50 => "insufficientAccessRights",
        51 => "busy",
        52 => "unavailable",
        53 => "unwillingToPerform",
        64 => "namingViolation",
        65 => "objectClassViolation",
        66 => "notAllowedOnNonLeaf",
        67 => "notAllowedOnRDN",
        68 => "entryAlreadyExists",
        80 => "other",
        81 => "serverDown",
        82 => "localError",
        85 => "timeout",
        91 => "connectError",
        _ => "unknown",
    }
}

fn code_label(code: &u32) -> &'static str {
    result_code_name(*code)
}

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::UnknownConnection(_) => "UNKNOWN_CONNECTION",
            Self::ConnectError { .. } => "CONNECT_ERROR",
            Self::AuthError { .. } => "AUTH_ERROR",
            Self::NotConnected(_) => "NOT_CONNECTED",
            Self::FetchError { .. } => "FETCH_ERROR",
            Self::ProtocolError { .. } => "PROTOCOL_ERROR",
            Self::InvalidPath(_) => "INVALID_PATH",
            Self::UnknownNode(_) => "UNKNOWN_NODE",
        }
    }

    /// Returns the directory result code carried by this error, looking through fetch
    /// failures to the protocol error underneath.
    #[must_use]
    pub fn result_code(&self) -> Option<u32> {
        match self {
            Self::ProtocolError { code, .. } => Some(*code),
            Self::FetchError { source, .. } => source.result_code(),
            _ => None,
        }
    }

    /// Wraps an underlying failure as a tree fetch error for `path`.
    #[must_use]
    pub fn fetch(path: impl Into<String>, source: Self) -> Self {
        Self::FetchError {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Returns true if the failure came from the transport rather than from the caller's
    /// input, so that reconnecting may help.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        match self {
            Self::ConnectError { .. } | Self::NotConnected(_) => true,
            Self::FetchError { source, .. } => source.is_connection_failure(),
            _ => false,
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::ConfigError(format!("invalid endpoint: {err}"))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ConfigError(err.to_string())
    }
}
