//! Seams between a [`crate::TestClient`] and the wire.
//!
//! Implementations:
//! - [`crate::native::NativeConnector`]: TCP/STARTTLS via tokio-xmpp
//! - [`crate::memory::MemoryConnector`]: in-process, driven by a scripted service

use async_trait::async_trait;
use jid::{BareJid, Jid};
use minidom::Element;

use crate::error::ConnectionError;
use crate::roster::ROSTERVER_NS;

/// Credentials and binding preferences for one test account.
#[derive(Debug, Clone)]
pub struct Account {
    pub jid: BareJid,
    pub password: String,
    pub resource: Option<String>,
}

/// An authenticated, resource-bound stanza stream.
#[async_trait]
pub trait XmppTransport: Send + 'static {
    async fn send(&mut self, stanza: Element) -> Result<(), ConnectionError>;

    /// Next inbound stanza, `None` once the peer has closed the stream.
    ///
    /// Must be cancel safe: the dispatch loop drops this future whenever a
    /// command arrives first.
    async fn recv(&mut self) -> Option<Result<Element, ConnectionError>>;

    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Opens connections for accounts.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, account: &Account) -> Result<Connection, ConnectionError>;
}

/// Result of a successful handshake.
pub struct Connection {
    pub transport: Box<dyn XmppTransport>,
    pub features: ServerFeatures,
    pub bound_jid: Jid,
}

/// Read-only view of what the server advertised to an authenticated client.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerFeatures {
    features: Element,
    sasl_mechanisms: Vec<String>,
}

impl ServerFeatures {
    /// Wrap the `<stream:features/>` received after authentication.
    pub fn new(features: Element) -> Self {
        Self {
            features,
            sasl_mechanisms: Vec::new(),
        }
    }

    pub fn with_sasl_mechanisms(mut self, mechanisms: Vec<String>) -> Self {
        self.sasl_mechanisms = mechanisms;
        self
    }

    pub fn advertises(&self, name: &str, ns: &str) -> bool {
        self.features.has_child(name, ns)
    }

    pub fn supports_roster_versioning(&self) -> bool {
        self.advertises("ver", ROSTERVER_NS)
    }

    /// Mechanisms offered before authentication.
    pub fn sasl_mechanisms(&self) -> &[String] {
        &self.sasl_mechanisms
    }

    pub fn element(&self) -> &Element {
        &self.features
    }
}
