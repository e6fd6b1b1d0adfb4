//! Lifecycle of the clients taking part in one test scenario.

use std::sync::Arc;

use jid::BareJid;
use tracing::{debug, info};

use crate::client::{ClientOptions, TestClient};
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::id::IdGenerator;
use crate::native::NativeConnector;
use crate::stanza::PushHandler;
use crate::transport::{Account, Connector};

/// Who a registered client is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Random local part.
    pub id: String,
    pub jid: BareJid,
}

/// Registers test clients under fresh accounts and connects them in order.
pub struct ClientManager {
    config: HarnessConfig,
    connector: Arc<dyn Connector>,
    ids: Arc<IdGenerator>,
    clients: Vec<TestClient>,
    connected: usize,
}

impl ClientManager {
    /// Manager for the network server described by `config`.
    pub fn new(config: HarnessConfig) -> Self {
        let connector = Arc::new(NativeConnector::new(&config));
        Self::with_connector(config, connector)
    }

    /// Manager configured from `MESSAGING_TEST_*` variables.
    pub fn from_env() -> Result<Self, HarnessError> {
        Ok(Self::new(HarnessConfig::from_env()?))
    }

    pub fn with_connector(config: HarnessConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            ids: Arc::new(IdGenerator::from_os_rng()),
            clients: Vec::new(),
            connected: 0,
        }
    }

    /// Replace the identifier source, e.g. with a seeded one.
    pub fn with_id_generator(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn register(
        &mut self,
        handler: PushHandler,
    ) -> Result<(TestClient, Identity), HarnessError> {
        self.register_client(handler, false)
    }

    /// Like [`ClientManager::register`], with every stanza logged.
    pub fn register_with_diagnostics(
        &mut self,
        handler: PushHandler,
    ) -> Result<(TestClient, Identity), HarnessError> {
        self.register_client(handler, true)
    }

    fn register_client(
        &mut self,
        handler: PushHandler,
        trace: bool,
    ) -> Result<(TestClient, Identity), HarnessError> {
        let id = self.ids.generate();
        let value = format!("{id}@{}", self.config.domain);
        let jid: BareJid = value
            .parse()
            .map_err(|e: jid::Error| HarnessError::InvalidJid {
                value: value.clone(),
                reason: e.to_string(),
            })?;

        let account = Account {
            jid: jid.clone(),
            password: self.config.password.clone(),
            resource: self.config.resource.clone(),
        };
        let options = ClientOptions {
            trace,
            ..ClientOptions::from_config(&self.config)
        };
        let client = TestClient::new(account, Arc::clone(&self.connector), handler, options);

        debug!(%jid, trace, position = self.clients.len(), "registered test client");
        self.clients.push(client.clone());
        Ok((client, Identity { id, jid }))
    }

    /// Connect every client registered since the last call, in registration
    /// order. Stops at the first failure; earlier clients stay connected.
    pub async fn connect_all(&mut self) -> Result<(), HarnessError> {
        while let Some(client) = self.clients.get(self.connected) {
            client.connect().await?;
            self.connected += 1;
        }
        info!(clients = self.clients.len(), "all test clients connected");
        Ok(())
    }

    /// Tracked clients in registration order.
    pub fn clients(&self) -> &[TestClient] {
        &self.clients
    }
}
