//! Network connector built on tokio-xmpp.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use jid::Jid;
use minidom::Element;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_xmpp::connect::ServerConnector;
use tokio_xmpp::parsers::ns;
use tokio_xmpp::starttls::{error::Error as StartTlsError, ServerConfig};
use tokio_xmpp::tcp::{error::Error as TcpConnectError, TcpServerConnector};
use tokio_xmpp::xmpp_stream::XMPPStream;
use tokio_xmpp::Packet;
use tracing::{info, warn};

use crate::config::{HarnessConfig, Security};
use crate::error::ConnectionError;
use crate::sasl::{self, Negotiated};
use crate::transport::{Account, Connection, Connector, ServerFeatures, XmppTransport};

const STREAM_END: &[u8] = b"</stream:stream>";

/// Connects test accounts to the configured server over TCP.
#[derive(Debug, Clone)]
pub struct NativeConnector {
    host: String,
    port: u16,
    security: Security,
    io_timeout: Duration,
}

impl NativeConnector {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            security: config.security,
            io_timeout: config.connect_timeout(),
        }
    }

    async fn connect_starttls(
        &self,
        jid: &Jid,
        account: &Account,
    ) -> Result<Connection, ConnectionError> {
        let server = ServerConfig::Manual {
            host: self.host.clone(),
            port: self.port,
        };
        let stream = timeout(self.io_timeout, server.connect(jid, ns::JABBER_CLIENT))
            .await
            .map_err(|_| ConnectionError::Timeout)?
            .map_err(map_starttls_error)?;
        self.finish(stream, account).await
    }

    async fn connect_tcp(
        &self,
        jid: &Jid,
        account: &Account,
    ) -> Result<Connection, ConnectionError> {
        let connector = TcpServerConnector::new(format!("{}:{}", self.host, self.port));
        let stream = timeout(self.io_timeout, connector.connect(jid, ns::JABBER_CLIENT))
            .await
            .map_err(|_| ConnectionError::Timeout)?
            .map_err(map_tcp_error)?;
        self.finish(stream, account).await
    }

    async fn finish<S>(
        &self,
        stream: XMPPStream<S>,
        account: &Account,
    ) -> Result<Connection, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let username = account.jid.node().ok_or_else(|| {
            ConnectionError::AuthenticationFailed(format!(
                "JID '{}' has no local part for SASL authentication",
                account.jid
            ))
        })?;

        let negotiated = timeout(
            self.io_timeout,
            sasl::negotiate(
                stream,
                username.as_str(),
                &account.password,
                account.resource.clone(),
            ),
        )
        .await
        .map_err(|_| ConnectionError::Timeout)??;

        let Negotiated {
            stream,
            features,
            mechanisms,
        } = negotiated;
        let bound_jid = stream.jid.clone();
        Ok(Connection {
            transport: Box::new(StreamTransport {
                stream: Some(stream),
            }),
            features: ServerFeatures::new(features).with_sasl_mechanisms(mechanisms),
            bound_jid,
        })
    }
}

#[async_trait]
impl Connector for NativeConnector {
    async fn connect(&self, account: &Account) -> Result<Connection, ConnectionError> {
        let jid = Jid::from(account.jid.clone());

        let connection = match self.security {
            Security::Tcp => self.connect_tcp(&jid, account).await?,
            Security::StartTls => self.connect_starttls(&jid, account).await?,
            Security::Auto => match self.connect_starttls(&jid, account).await {
                Ok(connection) => connection,
                Err(error @ ConnectionError::TlsHandshakeFailed(_))
                    if is_loopback_host(&self.host) =>
                {
                    warn!(
                        jid = %account.jid,
                        reason = %error,
                        "TLS failed against loopback target; retrying with plain TCP"
                    );
                    self.connect_tcp(&jid, account).await?
                }
                Err(error) => return Err(error),
            },
        };

        info!(
            jid = %connection.bound_jid,
            server = %format!("{}:{}", self.host, self.port),
            "client stream established"
        );
        Ok(connection)
    }
}

struct StreamTransport<S: AsyncRead + AsyncWrite + Unpin> {
    /// Taken on close.
    stream: Option<XMPPStream<S>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> StreamTransport<S> {
    fn stream(&mut self) -> Result<&mut XMPPStream<S>, ConnectionError> {
        self.stream
            .as_mut()
            .ok_or_else(|| ConnectionError::TransportError("stream already closed".to_string()))
    }
}

#[async_trait]
impl<S> XmppTransport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, stanza: Element) -> Result<(), ConnectionError> {
        self.stream()?
            .send_stanza(stanza)
            .await
            .map_err(|e| ConnectionError::TransportError(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Element, ConnectionError>> {
        let stream = self.stream.as_mut()?;
        loop {
            match stream.next().await? {
                Ok(Packet::Stanza(stanza)) => return Some(Ok(stanza)),
                Ok(Packet::StreamEnd) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(ConnectionError::StreamError(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        let mut inner = stream.into_inner();
        inner
            .write_all(STREAM_END)
            .await
            .map_err(|e| ConnectionError::TransportError(e.to_string()))?;
        inner
            .shutdown()
            .await
            .map_err(|e| ConnectionError::TransportError(e.to_string()))
    }
}

fn map_starttls_error(error: StartTlsError) -> ConnectionError {
    let message = error.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("dns") || lower.contains("resolve") || lower.contains("srv") {
        ConnectionError::DnsResolutionFailed(message)
    } else if lower.contains("tls")
        || lower.contains("certificate")
        || lower.contains("handshake")
    {
        ConnectionError::TlsHandshakeFailed(message)
    } else {
        ConnectionError::TransportError(message)
    }
}

fn map_tcp_error(error: TcpConnectError) -> ConnectionError {
    let message = error.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("dns") || lower.contains("resolve") {
        ConnectionError::DnsResolutionFailed(message)
    } else {
        ConnectionError::TransportError(message)
    }
}

fn is_loopback_host(host: &str) -> bool {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    if let Ok(address) = host.parse::<std::net::IpAddr>() {
        return address.is_loopback();
    }
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();
    normalized == "localhost" || normalized.ends_with(".localhost")
}
