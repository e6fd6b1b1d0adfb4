//! Integration-test harness for the roster and software-version features of
//! an XMPP server.
//!
//! A test registers one client per actor with a [`ClientManager`], connects
//! them, then drives IQ requests through [`TestClient::send_iq`] and observes
//! server pushes through [`TestClient::receive_push`]:
//!
//! ```no_run
//! use messaging_test::{roster::RosterQuery, ClientManager, IqAttrs, PushHandler};
//!
//! # async fn scenario() -> Result<(), Box<dyn std::error::Error>> {
//! let mut manager = ClientManager::from_env()?;
//! let (romeo, _) = manager.register(PushHandler::iq())?;
//! manager.connect_all().await?;
//!
//! let response = romeo.send_iq(IqAttrs::get(), RosterQuery::get()).await?;
//! assert!(!response.is_error());
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod client;
pub mod config;
pub mod error;
pub mod id;
pub mod logging;
pub mod manager;
pub mod memory;
pub mod native;
pub mod roster;
mod sasl;
pub mod stanza;
pub mod transport;
pub mod version;

pub use client::{ClientOptions, TestClient};
pub use config::{HarnessConfig, RequestDeadline, Security};
pub use error::{ConfigError, ConnectionError, HarnessError, PayloadError};
pub use id::{random_id, IdGenerator, ID_LEN};
pub use manager::{ClientManager, Identity};
pub use stanza::{IqAttrs, IqKind, IqResponse, Packet, PushHandler, StanzaKind};
pub use transport::{Account, Connection, Connector, ServerFeatures, XmppTransport};

pub use jid;
pub use minidom;
pub use xmpp_parsers;
