//! SASL negotiation and resource binding on a freshly opened stream.

use std::collections::HashSet;
use std::str::FromStr;

use futures::StreamExt;
use minidom::Element;
use sasl::client::mechanisms::{Plain, Scram};
use sasl::client::Mechanism;
use sasl::common::scram::{Sha1, Sha256};
use sasl::common::{ChannelBinding, Credentials};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_xmpp::parsers::bind::{BindQuery, BindResponse};
use tokio_xmpp::parsers::iq::{Iq, IqType};
use tokio_xmpp::parsers::sasl::{
    Auth, Challenge, Failure, Mechanism as SaslMechanism, Response, Success,
};
use tokio_xmpp::xmpp_stream::XMPPStream;
use tokio_xmpp::Packet;
use tracing::debug;

use crate::error::ConnectionError;

const BIND_REQUEST_ID: &str = "resource-bind";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SelectedMechanism {
    ScramSha256,
    ScramSha1,
    Plain,
}

impl SelectedMechanism {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            SelectedMechanism::ScramSha256 => "SCRAM-SHA-256",
            SelectedMechanism::ScramSha1 => "SCRAM-SHA-1",
            SelectedMechanism::Plain => "PLAIN",
        }
    }
}

const PREFERENCE: &[SelectedMechanism] = &[
    SelectedMechanism::ScramSha256,
    SelectedMechanism::ScramSha1,
    SelectedMechanism::Plain,
];

pub(crate) fn select_mechanism(offered: &HashSet<String>) -> Option<SelectedMechanism> {
    PREFERENCE
        .iter()
        .find(|m| offered.contains(m.name()))
        .copied()
}

fn build_mechanism(
    selected: SelectedMechanism,
    credentials: Credentials,
) -> Result<Box<dyn Mechanism + Send>, ConnectionError> {
    let built = match selected {
        SelectedMechanism::ScramSha256 => Scram::<Sha256>::from_credentials(credentials)
            .map(|m| Box::new(m) as Box<dyn Mechanism + Send>),
        SelectedMechanism::ScramSha1 => Scram::<Sha1>::from_credentials(credentials)
            .map(|m| Box::new(m) as Box<dyn Mechanism + Send>),
        SelectedMechanism::Plain => {
            Plain::from_credentials(credentials).map(|m| Box::new(m) as Box<dyn Mechanism + Send>)
        }
    };
    built.map_err(|e| {
        ConnectionError::AuthenticationFailed(format!(
            "failed to initialize {}: {e:?}",
            selected.name()
        ))
    })
}

fn map_failure(failure: &Failure) -> ConnectionError {
    let condition = format!("{:?}", failure.defined_condition);
    match failure.texts.values().next() {
        Some(text) if !text.is_empty() => {
            ConnectionError::AuthenticationFailed(format!("{condition}: {text}"))
        }
        _ => ConnectionError::AuthenticationFailed(condition),
    }
}

/// A logged-in, bound stream plus what the server told us along the way.
pub(crate) struct Negotiated<S: AsyncRead + AsyncWrite + Unpin> {
    pub stream: XMPPStream<S>,
    /// `<stream:features/>` of the restarted stream.
    pub features: Element,
    pub mechanisms: Vec<String>,
}

/// Authenticate as `username` and bind `resource` (server-assigned when `None`).
pub(crate) async fn negotiate<S>(
    mut stream: XMPPStream<S>,
    username: &str,
    password: &str,
    resource: Option<String>,
) -> Result<Negotiated<S>, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let offered: HashSet<String> = stream
        .stream_features
        .sasl_mechanisms()
        .map_err(|_| {
            ConnectionError::AuthenticationFailed(
                "server did not advertise any SASL mechanisms".to_string(),
            )
        })?
        .collect();

    let selected = select_mechanism(&offered).ok_or_else(|| {
        let mut names: Vec<_> = offered.iter().cloned().collect();
        names.sort();
        ConnectionError::AuthenticationFailed(format!(
            "no supported SASL mechanism; server offers: {}",
            names.join(", ")
        ))
    })?;
    debug!(offered = ?offered, mechanism = selected.name(), "starting SASL");

    let credentials = Credentials::default()
        .with_username(username)
        .with_password(password)
        .with_channel_binding(ChannelBinding::Unsupported);
    let mut mechanism = build_mechanism(selected, credentials)?;

    let mechanism_name = SaslMechanism::from_str(mechanism.name()).map_err(|e| {
        ConnectionError::AuthenticationFailed(format!("invalid SASL mechanism name: {e}"))
    })?;
    stream
        .send_stanza(Auth {
            mechanism: mechanism_name,
            data: mechanism.initial(),
        })
        .await
        .map_err(|e| ConnectionError::StreamError(format!("failed to send SASL auth: {e}")))?;

    loop {
        let stanza = match stream.next().await {
            Some(Ok(Packet::Stanza(stanza))) => stanza,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(ConnectionError::StreamError(format!(
                    "stream error during SASL negotiation: {e}"
                )))
            }
            None => {
                return Err(ConnectionError::TransportError(
                    "connection closed during SASL negotiation".to_string(),
                ))
            }
        };

        if let Ok(challenge) = Challenge::try_from(stanza.clone()) {
            let data = mechanism.response(&challenge.data).map_err(|e| {
                ConnectionError::AuthenticationFailed(format!("SASL challenge failed: {e:?}"))
            })?;
            stream
                .send_stanza(Response { data })
                .await
                .map_err(|e| {
                    ConnectionError::StreamError(format!("failed to send SASL response: {e}"))
                })?;
        } else if let Ok(success) = Success::try_from(stanza.clone()) {
            mechanism.success(&success.data).map_err(|e| {
                ConnectionError::AuthenticationFailed(format!(
                    "server signature verification failed: {e:?}"
                ))
            })?;
            debug!(username, "SASL authentication succeeded");
            break;
        } else if let Ok(failure) = Failure::try_from(stanza) {
            return Err(map_failure(&failure));
        }
    }

    let stream = stream.restart().await.map_err(|e| {
        ConnectionError::StreamError(format!("failed to restart stream after SASL: {e}"))
    })?;
    let features = stream.stream_features.0.clone();
    let stream = bind(stream, resource).await?;

    let mut mechanisms: Vec<String> = offered.into_iter().collect();
    mechanisms.sort();
    Ok(Negotiated {
        stream,
        features,
        mechanisms,
    })
}

async fn bind<S>(
    mut stream: XMPPStream<S>,
    resource: Option<String>,
) -> Result<XMPPStream<S>, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !stream.stream_features.can_bind() {
        return Ok(stream);
    }

    stream
        .send_stanza(Iq::from_set(BIND_REQUEST_ID, BindQuery::new(resource)))
        .await
        .map_err(|e| {
            ConnectionError::StreamError(format!("failed to send resource bind request: {e}"))
        })?;

    loop {
        match stream.next().await {
            Some(Ok(Packet::Stanza(stanza))) => {
                let Ok(iq) = Iq::try_from(stanza) else {
                    continue;
                };
                if iq.id != BIND_REQUEST_ID {
                    continue;
                }
                return match iq.payload {
                    IqType::Result(Some(payload)) => {
                        let bound = BindResponse::try_from(payload).map_err(|e| {
                            ConnectionError::StreamError(format!(
                                "invalid resource bind response: {e}"
                            ))
                        })?;
                        stream.jid = bound.into();
                        Ok(stream)
                    }
                    IqType::Result(None) => Ok(stream),
                    _ => Err(ConnectionError::StreamError(
                        "resource binding rejected".to_string(),
                    )),
                };
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                return Err(ConnectionError::StreamError(format!(
                    "stream error during resource binding: {e}"
                )))
            }
            None => {
                return Err(ConnectionError::TransportError(
                    "connection closed during resource binding".to_string(),
                ))
            }
        }
    }
}
