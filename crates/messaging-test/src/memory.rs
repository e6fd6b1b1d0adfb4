//! In-process connector for exercising the harness without a server.
//!
//! Every stanza a client sends is handed synchronously to a [`StanzaService`],
//! which answers through the client's [`Outbox`]. Services may keep outboxes of
//! several clients to emulate cross-account pushes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jid::{BareJid, Jid};
use minidom::Element;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ConnectionError;
use crate::roster::ROSTERVER_NS;
use crate::transport::{Account, Connection, Connector, ServerFeatures, XmppTransport};

const STREAMS_NS: &str = "http://etherx.jabber.org/streams";

/// Server-side behavior behind a [`MemoryConnector`].
pub trait StanzaService: Send + Sync + 'static {
    /// A client finished its handshake.
    fn attach(&self, _jid: &Jid, _outbox: Outbox) {}

    /// A client sent `stanza`. Must not block.
    fn handle(&self, from: &Jid, stanza: Element, outbox: &Outbox);

    fn detach(&self, _jid: &Jid) {}
}

enum Frame {
    Stanza(Element),
    End,
}

/// Delivery handle for one in-memory client stream.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Frame>,
}

impl Outbox {
    /// Queue a stanza for the client. Returns `false` once the client is gone.
    pub fn deliver(&self, stanza: impl Into<Element>) -> bool {
        self.tx.send(Frame::Stanza(stanza.into())).is_ok()
    }

    /// Close the stream from the server side.
    pub fn end_stream(&self) {
        let _ = self.tx.send(Frame::End);
    }
}

/// [`Connector`] that wires clients to a [`StanzaService`].
pub struct MemoryConnector {
    service: Arc<dyn StanzaService>,
    features: Element,
    refused: Mutex<HashSet<BareJid>>,
    attempts: Mutex<Vec<BareJid>>,
}

impl MemoryConnector {
    pub fn new(service: impl StanzaService) -> Self {
        Self {
            service: Arc::new(service),
            features: Element::builder("features", STREAMS_NS).build(),
            refused: Mutex::new(HashSet::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Advertise `<ver xmlns='urn:xmpp:features:rosterver'/>` after login.
    pub fn with_roster_versioning(mut self) -> Self {
        self.features
            .append_child(Element::builder("ver", ROSTERVER_NS).build());
        self
    }

    /// Fail authentication for `jid` from now on.
    pub fn refuse(&self, jid: &BareJid) {
        lock(&self.refused).insert(jid.clone());
    }

    /// Accounts that attempted to connect, in order.
    pub fn attempts(&self) -> Vec<BareJid> {
        lock(&self.attempts).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, account: &Account) -> Result<Connection, ConnectionError> {
        lock(&self.attempts).push(account.jid.clone());

        if lock(&self.refused).contains(&account.jid) {
            return Err(ConnectionError::AuthenticationFailed(
                "NotAuthorized".to_string(),
            ));
        }

        let resource = account
            .resource
            .clone()
            .unwrap_or_else(|| format!("memory-{}", uuid::Uuid::new_v4().simple()));
        let bound_jid: Jid = format!("{}/{}", account.jid, resource)
            .parse()
            .map_err(|e| ConnectionError::StreamError(format!("invalid resource: {e}")))?;

        let (tx, inbound) = mpsc::unbounded_channel();
        let outbox = Outbox { tx };
        self.service.attach(&bound_jid, outbox.clone());
        debug!(jid = %bound_jid, "in-memory client attached");

        Ok(Connection {
            transport: Box::new(MemoryTransport {
                jid: bound_jid.clone(),
                service: Arc::clone(&self.service),
                outbox,
                inbound,
                closed: false,
            }),
            features: ServerFeatures::new(self.features.clone())
                .with_sasl_mechanisms(vec!["PLAIN".to_string()]),
            bound_jid,
        })
    }
}

struct MemoryTransport {
    jid: Jid,
    service: Arc<dyn StanzaService>,
    outbox: Outbox,
    inbound: mpsc::UnboundedReceiver<Frame>,
    closed: bool,
}

#[async_trait]
impl XmppTransport for MemoryTransport {
    async fn send(&mut self, stanza: Element) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::TransportError(
                "stream already closed".to_string(),
            ));
        }
        self.service.handle(&self.jid, stanza, &self.outbox);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Element, ConnectionError>> {
        match self.inbound.recv().await? {
            Frame::Stanza(stanza) => Some(Ok(stanza)),
            Frame::End => None,
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if !self.closed {
            self.closed = true;
            self.inbound.close();
            self.service.detach(&self.jid);
        }
        Ok(())
    }
}
