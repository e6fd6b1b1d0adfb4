use std::path::PathBuf;
use std::time::Duration;

use jid::BareJid;
use thiserror::Error;

/// Failure while establishing or driving a client stream.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("DNS resolution failed: {0}")]
    DnsResolutionFailed(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("connection timeout")]
    Timeout,

    #[error("transport error: {0}")]
    TransportError(String),
}

impl ConnectionError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnectionError::AuthenticationFailed(_))
    }
}

/// Failure while loading [`crate::HarnessConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// A payload element that does not have the expected shape.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("expected <{expected}/>, found <{found}/>")]
    UnexpectedElement { expected: String, found: String },

    #[error("<{element}/> is missing the '{attr}' attribute")]
    MissingAttribute {
        element: &'static str,
        attr: &'static str,
    },

    #[error("invalid {attr} value {value:?}")]
    InvalidValue { attr: &'static str, value: String },
}

/// Everything that can go wrong while the harness itself is driving a test.
///
/// Protocol errors returned by the server under test are not represented here;
/// they travel as data on [`crate::IqResponse`].
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid JID {value:?}: {reason}")]
    InvalidJid { value: String, reason: String },

    #[error("client {jid} failed to connect: {source}")]
    Connection {
        jid: BareJid,
        #[source]
        source: ConnectionError,
    },

    #[error("client {0} is already connected")]
    AlreadyConnected(BareJid),

    #[error("client {0} is not connected")]
    NotConnected(BareJid),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("no response to request {id} within {after:?}")]
    RequestTimeout { id: String, after: Duration },

    #[error("no push received within {0:?}")]
    PushTimeout(Duration),

    #[error("client {0} is disconnected")]
    Disconnected(BareJid),
}
