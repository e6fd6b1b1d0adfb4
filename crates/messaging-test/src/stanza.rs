//! Stanza shapes exchanged between tests and a [`crate::TestClient`].

use jid::Jid;
use minidom::Element;
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType, StanzaError};

pub const JABBER_CLIENT_NS: &str = "jabber:client";

/// Request type of an outgoing IQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IqKind {
    #[default]
    Get,
    Set,
}

/// Envelope attributes of an outgoing IQ request.
///
/// The payload is passed separately to [`crate::TestClient::send_iq`].
#[derive(Debug, Clone, Default)]
pub struct IqAttrs {
    pub kind: IqKind,
    pub to: Option<Jid>,
    /// Correlation id; a fresh one is generated when unset.
    pub id: Option<String>,
}

impl IqAttrs {
    pub fn get() -> Self {
        Self {
            kind: IqKind::Get,
            ..Default::default()
        }
    }

    pub fn set() -> Self {
        Self {
            kind: IqKind::Set,
            ..Default::default()
        }
    }

    pub fn to(mut self, to: impl Into<Jid>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub(crate) fn into_iq(self, id: String, payload: Element) -> Iq {
        let payload = match self.kind {
            IqKind::Get => IqType::Get(payload),
            IqKind::Set => IqType::Set(payload),
        };
        Iq {
            from: None,
            to: self.to,
            id,
            payload,
        }
    }
}

/// Answer to an IQ request.
///
/// A server-side failure is carried in `error`; it is not a harness error.
#[derive(Debug, Clone)]
pub struct IqResponse {
    pub id: String,
    pub from: Option<Jid>,
    /// Child of a `result`, absent for empty results and errors.
    pub payload: Option<Element>,
    pub error: Option<StanzaError>,
}

impl IqResponse {
    /// Interpret a correlated IQ. Requests (`get`/`set`) yield `None`.
    pub fn from_iq(iq: Iq) -> Option<Self> {
        let (payload, error) = match iq.payload {
            IqType::Result(payload) => (payload, None),
            IqType::Error(error) => (None, Some(error)),
            IqType::Get(_) | IqType::Set(_) => return None,
        };
        Some(Self {
            id: iq.id,
            from: iq.from,
            payload,
            error,
        })
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error_condition(&self) -> Option<&DefinedCondition> {
        self.error.as_ref().map(|e| &e.defined_condition)
    }

    pub fn error_type(&self) -> Option<&ErrorType> {
        self.error.as_ref().map(|e| &e.type_)
    }

    /// Payload converted into a typed structure, if present and well-formed.
    pub fn payload_as<T>(&self) -> Option<T>
    where
        T: TryFrom<Element>,
    {
        self.payload
            .clone()
            .and_then(|payload| T::try_from(payload).ok())
    }
}

/// Top-level stanza category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StanzaKind {
    Iq,
    Message,
    Presence,
    Other,
}

/// An inbound stanza that did not answer an outstanding request.
#[derive(Debug, Clone)]
pub enum Packet {
    Iq(Iq),
    Message(Element),
    Presence(Element),
    Other(Element),
}

impl Packet {
    pub fn classify(element: Element) -> Self {
        match element.name() {
            "iq" => match Iq::try_from(element.clone()) {
                Ok(iq) => Packet::Iq(iq),
                Err(_) => Packet::Other(element),
            },
            "message" => Packet::Message(element),
            "presence" => Packet::Presence(element),
            _ => Packet::Other(element),
        }
    }

    pub fn kind(&self) -> StanzaKind {
        match self {
            Packet::Iq(_) => StanzaKind::Iq,
            Packet::Message(_) => StanzaKind::Message,
            Packet::Presence(_) => StanzaKind::Presence,
            Packet::Other(_) => StanzaKind::Other,
        }
    }

    pub fn as_iq(&self) -> Option<&Iq> {
        match self {
            Packet::Iq(iq) => Some(iq),
            _ => None,
        }
    }

    /// Payload of a server-initiated `get`/`set`.
    pub fn request_payload(&self) -> Option<&Element> {
        match self.as_iq().map(|iq| &iq.payload) {
            Some(IqType::Get(payload)) | Some(IqType::Set(payload)) => Some(payload),
            _ => None,
        }
    }
}

impl From<Packet> for Element {
    fn from(packet: Packet) -> Element {
        match packet {
            Packet::Iq(iq) => iq.into(),
            Packet::Message(e) | Packet::Presence(e) | Packet::Other(e) => e,
        }
    }
}

/// Decides which uncorrelated stanzas reach a client's push queue.
///
/// Runs inside the dispatch task. Accepting a stanza means a non-blocking
/// enqueue; rejected stanzas are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushHandler {
    accepts: Vec<StanzaKind>,
}

impl PushHandler {
    /// Forward IQs only.
    pub fn iq() -> Self {
        Self::only(&[StanzaKind::Iq])
    }

    pub fn all() -> Self {
        Self::only(&[
            StanzaKind::Iq,
            StanzaKind::Message,
            StanzaKind::Presence,
            StanzaKind::Other,
        ])
    }

    /// Drop everything.
    pub fn none() -> Self {
        Self::only(&[])
    }

    pub fn only(kinds: &[StanzaKind]) -> Self {
        Self {
            accepts: kinds.to_vec(),
        }
    }

    pub fn accepts(&self, packet: &Packet) -> bool {
        self.accepts.contains(&packet.kind())
    }
}

impl Default for PushHandler {
    fn default() -> Self {
        Self::iq()
    }
}

/// Render an element for logs.
pub(crate) fn render(element: &Element) -> String {
    let mut buffer = Vec::new();
    match element.write_to(&mut buffer) {
        Ok(()) => String::from_utf8_lossy(&buffer).into_owned(),
        Err(error) => format!("<unrenderable {}: {error}>", element.name()),
    }
}
