//! One test actor's connection to the server under test.
//!
//! After [`TestClient::connect`] a dispatch task owns the transport. Handles
//! talk to it over a command channel; the task answers requests through
//! per-request oneshots and forwards everything else to the push queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use jid::{BareJid, Jid};
use minidom::Element;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use xmpp_parsers::iq::{Iq, IqType};

use crate::config::{HarnessConfig, RequestDeadline};
use crate::error::{ConnectionError, HarnessError};
use crate::stanza::{render, IqAttrs, IqResponse, Packet, PushHandler};
use crate::transport::{Account, Connector, ServerFeatures, XmppTransport};

const COMMAND_BUFFER: usize = 32;

/// Per-client behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientOptions {
    pub deadline: RequestDeadline,
    /// Log every stanza in and out at INFO.
    pub trace: bool,
    pub acknowledge_pushes: bool,
}

impl ClientOptions {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            deadline: config.request_deadline(),
            trace: false,
            acknowledge_pushes: config.acknowledge_pushes,
        }
    }
}

type Reply = oneshot::Sender<Result<IqResponse, HarnessError>>;

enum Command {
    Request { iq: Iq, reply: Reply },
    Cancel { id: String },
    Close,
}

struct Session {
    commands: mpsc::Sender<Command>,
    features: ServerFeatures,
    bound_jid: Jid,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Parts handed to the dispatch task on connect.
struct Idle {
    handler: PushHandler,
    pushes: mpsc::UnboundedSender<Packet>,
}

struct Inner {
    account: Account,
    connector: Arc<dyn Connector>,
    options: ClientOptions,
    idle: Mutex<Option<Idle>>,
    session: OnceLock<Session>,
    pushes: tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>,
}

/// Handle to a test client. Clones share the same connection.
#[derive(Clone)]
pub struct TestClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestClient")
            .field("jid", &self.inner.account.jid)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl TestClient {
    pub fn new(
        account: Account,
        connector: Arc<dyn Connector>,
        handler: PushHandler,
        options: ClientOptions,
    ) -> Self {
        let (pushes, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                account,
                connector,
                options,
                idle: Mutex::new(Some(Idle { handler, pushes })),
                session: OnceLock::new(),
                pushes: tokio::sync::Mutex::new(receiver),
            }),
        }
    }

    pub fn jid(&self) -> &BareJid {
        &self.inner.account.jid
    }

    pub fn is_connected(&self) -> bool {
        self.inner.session.get().is_some()
    }

    /// Full JID assigned at resource binding.
    pub fn bound_jid(&self) -> Option<&Jid> {
        self.inner.session.get().map(|s| &s.bound_jid)
    }

    /// What the server advertised after authentication.
    pub fn features(&self) -> Option<&ServerFeatures> {
        self.inner.session.get().map(|s| &s.features)
    }

    /// Open the stream, authenticate and start dispatching.
    ///
    /// A client connects once; a second call fails with
    /// [`HarnessError::AlreadyConnected`]. After a failed attempt the client
    /// may be connected again.
    pub async fn connect(&self) -> Result<(), HarnessError> {
        let idle = lock(&self.inner.idle)
            .take()
            .ok_or_else(|| HarnessError::AlreadyConnected(self.jid().clone()))?;

        info!(jid = %self.jid(), "connecting test client");
        let connection = match self.inner.connector.connect(&self.inner.account).await {
            Ok(connection) => connection,
            Err(source) => {
                *lock(&self.inner.idle) = Some(idle);
                return Err(HarnessError::Connection {
                    jid: self.jid().clone(),
                    source,
                });
            }
        };

        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let dispatcher = Dispatcher {
            jid: connection.bound_jid.clone(),
            transport: connection.transport,
            handler: idle.handler,
            pushes: idle.pushes,
            pending: HashMap::new(),
            options: self.inner.options,
        };
        let task = tokio::spawn(dispatcher.run(receiver));

        info!(jid = %connection.bound_jid, "test client online");
        let session = Session {
            commands,
            features: connection.features,
            bound_jid: connection.bound_jid,
            task: tokio::sync::Mutex::new(Some(task)),
        };
        self.inner
            .session
            .set(session)
            .map_err(|_| HarnessError::AlreadyConnected(self.jid().clone()))
    }

    /// Send an IQ request and wait for its response under the client's
    /// default deadline.
    pub async fn send_iq(
        &self,
        attrs: IqAttrs,
        payload: impl Into<Element>,
    ) -> Result<IqResponse, HarnessError> {
        self.send_iq_within(attrs, payload, self.inner.options.deadline)
            .await
    }

    pub async fn send_iq_within(
        &self,
        attrs: IqAttrs,
        payload: impl Into<Element>,
        deadline: RequestDeadline,
    ) -> Result<IqResponse, HarnessError> {
        let session = self.session()?;

        let id = match attrs.id.clone() {
            Some(id) if id.is_empty() => {
                return Err(HarnessError::MalformedRequest(
                    "IQ id must not be empty".to_string(),
                ))
            }
            Some(id) => id,
            None => uuid::Uuid::new_v4().simple().to_string(),
        };
        let iq = attrs.into_iq(id.clone(), payload.into());

        let (reply, response) = oneshot::channel();
        session
            .commands
            .send(Command::Request { iq, reply })
            .await
            .map_err(|_| self.disconnected())?;

        let outcome = match deadline {
            RequestDeadline::Never => response.await,
            RequestDeadline::After(limit) => match timeout(limit, response).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let _ = session.commands.send(Command::Cancel { id: id.clone() }).await;
                    return Err(HarnessError::RequestTimeout { id, after: limit });
                }
            },
        };
        outcome.map_err(|_| self.disconnected())?
    }

    /// Next stanza the server sent outside any request/response exchange.
    pub async fn receive_push(&self) -> Result<Packet, HarnessError> {
        self.session()?;
        let mut pushes = self.inner.pushes.lock().await;
        pushes.recv().await.ok_or_else(|| self.disconnected())
    }

    pub async fn receive_push_within(&self, limit: Duration) -> Result<Packet, HarnessError> {
        timeout(limit, self.receive_push())
            .await
            .map_err(|_| HarnessError::PushTimeout(limit))?
    }

    /// A queued push, if one is already waiting.
    pub fn try_receive_push(&self) -> Option<Packet> {
        self.inner.pushes.try_lock().ok()?.try_recv().ok()
    }

    /// Close the stream and wait for the dispatch task to finish.
    pub async fn disconnect(&self) -> Result<(), HarnessError> {
        let session = self.session()?;
        // The task may already be gone if the server hung up.
        let _ = session.commands.send(Command::Close).await;
        if let Some(task) = session.task.lock().await.take() {
            if let Err(error) = task.await {
                warn!(jid = %self.jid(), %error, "dispatch task ended abnormally");
            }
        }
        Ok(())
    }

    fn session(&self) -> Result<&Session, HarnessError> {
        self.inner
            .session
            .get()
            .ok_or_else(|| HarnessError::NotConnected(self.jid().clone()))
    }

    fn disconnected(&self) -> HarnessError {
        HarnessError::Disconnected(self.jid().clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Dispatcher {
    jid: Jid,
    transport: Box<dyn XmppTransport>,
    handler: PushHandler,
    pushes: mpsc::UnboundedSender<Packet>,
    pending: HashMap<String, Reply>,
    options: ClientOptions,
}

impl Dispatcher {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Request { iq, reply }) => self.submit(iq, reply).await,
                    Some(Command::Cancel { id }) => {
                        if self.pending.remove(&id).is_some() {
                            debug!(jid = %self.jid, %id, "request cancelled");
                        }
                    }
                    Some(Command::Close) | None => break,
                },
                frame = self.transport.recv() => match frame {
                    Some(Ok(stanza)) => self.route(stanza).await,
                    Some(Err(error)) => {
                        warn!(jid = %self.jid, %error, "stream failed");
                        break;
                    }
                    None => {
                        info!(jid = %self.jid, "server closed the stream");
                        break;
                    }
                },
            }
        }

        if !self.pending.is_empty() {
            debug!(
                jid = %self.jid,
                outstanding = self.pending.len(),
                "abandoning outstanding requests"
            );
        }
        if let Err(error) = self.transport.close().await {
            debug!(jid = %self.jid, %error, "error while closing stream");
        }
        info!(jid = %self.jid, "test client offline");
    }

    async fn submit(&mut self, iq: Iq, reply: Reply) {
        self.pending.retain(|_, waiter| !waiter.is_closed());
        if self.pending.contains_key(&iq.id) {
            let _ = reply.send(Err(HarnessError::MalformedRequest(format!(
                "IQ id {} is already awaiting a response",
                iq.id
            ))));
            return;
        }

        let id = iq.id.clone();
        match self.send(iq.into()).await {
            Ok(()) => {
                self.pending.insert(id, reply);
            }
            Err(source) => {
                let _ = reply.send(Err(HarnessError::Connection {
                    jid: self.jid.to_bare(),
                    source,
                }));
            }
        }
    }

    async fn route(&mut self, stanza: Element) {
        if self.options.trace {
            info!(jid = %self.jid, stanza = %render(&stanza), "<<");
        }

        let packet = match Packet::classify(stanza) {
            Packet::Iq(iq) if is_response(&iq) => match self.pending.remove(&iq.id) {
                Some(waiter) => {
                    let delivered = IqResponse::from_iq(iq.clone())
                        .is_some_and(|response| waiter.send(Ok(response)).is_ok());
                    if delivered {
                        return;
                    }
                    // The waiter gave up before its cancellation was processed.
                    debug!(jid = %self.jid, id = %iq.id, "late response");
                    Packet::Iq(iq)
                }
                None => Packet::Iq(iq),
            },
            packet => packet,
        };

        if self.options.acknowledge_pushes {
            if let Some(ack) = acknowledgement(&packet) {
                if let Err(error) = self.send(ack.into()).await {
                    warn!(jid = %self.jid, %error, "failed to acknowledge push");
                }
            }
        }

        if !self.handler.accepts(&packet) {
            debug!(jid = %self.jid, kind = ?packet.kind(), "dropping unsolicited stanza");
            return;
        }
        if self.pushes.send(packet).is_err() {
            debug!(jid = %self.jid, "push queue closed");
        }
    }

    async fn send(&mut self, stanza: Element) -> Result<(), ConnectionError> {
        if self.options.trace {
            info!(jid = %self.jid, stanza = %render(&stanza), ">>");
        }
        self.transport.send(stanza).await
    }
}

fn is_response(iq: &Iq) -> bool {
    matches!(iq.payload, IqType::Result(_) | IqType::Error(_))
}

/// Empty result for a server-initiated `get`/`set`.
fn acknowledgement(packet: &Packet) -> Option<Iq> {
    let iq = packet.as_iq()?;
    if is_response(iq) {
        return None;
    }
    Some(Iq {
        from: None,
        to: iq.from.clone(),
        id: iq.id.clone(),
        payload: IqType::Result(None),
    })
}
