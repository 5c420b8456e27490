//! Error types for the sparkle client.
//!
//! Every failure that can terminate an exchange with the Spark service is
//! represented by a variant of [`Error`].  Late or duplicate signals for an
//! exchange that has already resolved are not errors; they are dropped by the
//! exchange itself.

use std::error;
use std::fmt;
use std::io;
use std::sync::Arc;

/// The main error type for the sparkle client.
#[derive(Clone, Debug)]
pub enum Error {
    /// The client was configured with missing or invalid settings.
    Configuration {
        /// Human-readable error message.
        message: String,
        /// The setting that failed validation.
        param: Option<String>,
    },

    /// The connect URL could not be signed.
    Signing {
        /// Human-readable error message.
        message: String,
    },

    /// The service answered with a nonzero `header.code`.
    RemoteProtocol {
        /// The code reported by the service.
        code: i64,
        /// The message reported by the service.
        message: String,
        /// The service-side session id, when one was reported.
        sid: Option<String>,
    },

    /// The connection failed to open or closed abnormally.
    Connection {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// No resolution arrived within the exchange timeout.
    Timeout {
        /// Human-readable error message.
        message: String,
        /// Duration of the timeout in seconds.
        duration: Option<f64>,
    },

    /// An exchange is already outstanding on this client.
    Busy {
        /// Human-readable error message.
        message: String,
    },

    /// Error during JSON serialization or deserialization.
    Serialization {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// A URL parsing or manipulation error.
    Url {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<url::ParseError>,
    },

    /// I/O error.
    Io {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Arc<io::Error>,
    },
}

impl Error {
    /// Creates a new configuration error.
    pub fn configuration(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Configuration {
            message: message.into(),
            param,
        }
    }

    /// Creates a new signing error.
    pub fn signing(message: impl Into<String>) -> Self {
        Error::Signing {
            message: message.into(),
        }
    }

    /// Creates a new remote protocol error.
    pub fn remote_protocol(code: i64, message: impl Into<String>, sid: Option<String>) -> Self {
        Error::RemoteProtocol {
            code,
            message: message.into(),
            sid,
        }
    }

    /// Creates a new connection error.
    pub fn connection(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Connection {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new timeout error.
    pub fn timeout(message: impl Into<String>, duration: Option<f64>) -> Self {
        Error::Timeout {
            message: message.into(),
            duration,
        }
    }

    /// Creates a new busy error.
    pub fn busy(message: impl Into<String>) -> Self {
        Error::Busy {
            message: message.into(),
        }
    }

    /// Creates a new serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new URL error.
    pub fn url(message: impl Into<String>, source: Option<url::ParseError>) -> Self {
        Error::Url {
            message: message.into(),
            source,
        }
    }

    /// Creates a new I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Returns true if this error is a configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }

    /// Returns true if this error came from signing the connect URL.
    pub fn is_signing(&self) -> bool {
        matches!(self, Error::Signing { .. } | Error::Url { .. })
    }

    /// Returns true if the service rejected the request.
    pub fn is_remote_protocol(&self) -> bool {
        matches!(self, Error::RemoteProtocol { .. })
    }

    /// Returns true if this error is a connection error.
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection { .. })
    }

    /// Returns true if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Returns true if the client already had an exchange outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy { .. })
    }

    /// Returns the remote error code, if the service reported one.
    pub fn remote_code(&self) -> Option<i64> {
        match self {
            Error::RemoteProtocol { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns the service-side session id associated with this error, if any.
    pub fn sid(&self) -> Option<&str> {
        match self {
            Error::RemoteProtocol { sid, .. } => sid.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration { message, param } => {
                if let Some(param) = param {
                    write!(f, "Configuration error: {message} (parameter: {param})")
                } else {
                    write!(f, "Configuration error: {message}")
                }
            }
            Error::Signing { message } => {
                write!(f, "Signing error: {message}")
            }
            Error::RemoteProtocol { code, message, sid } => {
                if let Some(sid) = sid {
                    write!(f, "Remote error {code}: {message} (sid: {sid})")
                } else {
                    write!(f, "Remote error {code}: {message}")
                }
            }
            Error::Connection { message, .. } => {
                write!(f, "Connection error: {message}")
            }
            Error::Timeout { message, duration } => {
                if let Some(duration) = duration {
                    write!(f, "Timeout error: {message} ({duration} seconds)")
                } else {
                    write!(f, "Timeout error: {message}")
                }
            }
            Error::Busy { message } => {
                write!(f, "Client busy: {message}")
            }
            Error::Serialization { message, .. } => {
                write!(f, "Serialization error: {message}")
            }
            Error::Url { message, .. } => {
                write!(f, "URL error: {message}")
            }
            Error::Io { message, .. } => {
                write!(f, "I/O error: {message}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Connection { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Serialization { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Url { source, .. } => {
                source.as_ref().map(|e| e as &(dyn error::Error + 'static))
            }
            Error::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::url(format!("URL parse error: {err}"), Some(err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::connection(format!("WebSocket error: {err}"), Some(Box::new(err)))
    }
}

/// A specialized Result type for sparkle operations.
pub type Result<T> = std::result::Result<T, Error>;
