//! Test utilities for harness scenarios.
//!
//! Provides an in-memory roster service standing in for the server under test,
//! and managers wired either to it or to a live server.

#![allow(dead_code)]

pub mod scenarios;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use messaging_test::jid::{BareJid, Jid};
use messaging_test::memory::{MemoryConnector, Outbox, StanzaService};
use messaging_test::minidom::Element;
use messaging_test::roster::{RosterItem, RosterQuery, Subscription, ROSTER_NS};
use messaging_test::version::{SoftwareVersion, VERSION_NS};
use messaging_test::xmpp_parsers::iq::{Iq, IqType};
use messaging_test::{logging, ClientManager, HarnessConfig, PayloadError};

/// Upper bound on waiting for a push in scenarios.
pub const PUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub const SERVER_NAME: &str = "indiebackend-messaging";

/// Manager whose clients talk to an in-memory [`RosterServer`].
pub fn memory_manager() -> ClientManager {
    logging::init();
    let connector = MemoryConnector::new(RosterServer::default()).with_roster_versioning();
    ClientManager::with_connector(HarnessConfig::default(), Arc::new(connector))
}

/// Manager for the server configured through `MESSAGING_TEST_*` variables.
pub fn live_manager() -> anyhow::Result<ClientManager> {
    logging::init();
    Ok(ClientManager::from_env()?)
}

#[derive(Default)]
struct AccountRoster {
    items: Vec<RosterItem>,
    version: u64,
}

#[derive(Default)]
struct State {
    rosters: HashMap<BareJid, AccountRoster>,
    sessions: HashMap<BareJid, Vec<(Jid, Outbox)>>,
    pushes: u64,
}

/// Roster and software-version behavior observed from the real server:
/// - a set needs at least one item and only the first is applied
/// - items naming the account itself are rejected with bad-request
/// - client-supplied subscription states other than remove are ignored
/// - the roster version counts changes, starting at 0
#[derive(Default)]
pub struct RosterServer {
    state: Mutex<State>,
}

impl RosterServer {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn roster_get(&self, from: &Jid, query: RosterQuery) -> Reply {
        let mut state = self.state();
        let roster = state.rosters.entry(from.to_bare()).or_default();
        let current = roster.version.to_string();

        if query.ver.as_deref() == Some(current.as_str()) {
            return Reply::Result(None);
        }
        let full = RosterQuery {
            ver: Some(current),
            items: roster.items.clone(),
        };
        Reply::Result(Some(full.to_element()))
    }

    fn roster_set(&self, from: &Jid, query: RosterQuery) -> Reply {
        let owner = from.to_bare();
        let Some(requested) = query.items.into_iter().next() else {
            return Reply::BadRequest;
        };
        if requested.jid == owner {
            return Reply::BadRequest;
        }

        let mut state = self.state();
        let roster = state.rosters.entry(owner.clone()).or_default();
        let pushed = if requested.subscription.is_remove() {
            roster.items.retain(|item| item.jid != requested.jid);
            RosterItem::removal(requested.jid)
        } else {
            let normalized = RosterItem {
                subscription: Subscription::None,
                ask: None,
                ..requested
            };
            match roster.items.iter_mut().find(|i| i.jid == normalized.jid) {
                Some(existing) => *existing = normalized.clone(),
                None => roster.items.push(normalized.clone()),
            }
            normalized
        };
        roster.version += 1;
        let ver = roster.version.to_string();

        state.pushes += 1;
        let push_id = format!("push-{}", state.pushes);
        let query = RosterQuery {
            ver: Some(ver),
            items: vec![pushed],
        };
        for (resource, outbox) in state.sessions.get(&owner).into_iter().flatten() {
            outbox.deliver(Iq {
                from: None,
                to: Some(resource.clone()),
                id: push_id.clone(),
                payload: IqType::Set(query.to_element()),
            });
        }
        Reply::Result(None)
    }
}

/// Unknown subscription states are treated as `none` rather than rejected.
fn parse_leniently(payload: &Element) -> Result<RosterQuery, PayloadError> {
    let mut payload = payload.clone();
    for item in payload.children_mut() {
        let known = item
            .attr("subscription")
            .map_or(true, |s| s.parse::<Subscription>().is_ok());
        if !known {
            item.set_attr("subscription", "none");
        }
    }
    RosterQuery::from_element(&payload)
}

enum Reply {
    Result(Option<Element>),
    BadRequest,
    ServiceUnavailable,
}

impl Reply {
    fn into_element(self, to: &Jid, id: &str) -> Element {
        let (kind, condition) = match self {
            Reply::Result(payload) => {
                return Iq {
                    from: None,
                    to: Some(to.clone()),
                    id: id.to_string(),
                    payload: IqType::Result(payload),
                }
                .into();
            }
            Reply::BadRequest => ("modify", "bad-request"),
            Reply::ServiceUnavailable => ("cancel", "service-unavailable"),
        };
        let error = Element::builder("error", "jabber:client")
            .attr("type", kind)
            .append(Element::builder(condition, "urn:ietf:params:xml:ns:xmpp-stanzas").build())
            .build();
        Element::builder("iq", "jabber:client")
            .attr("type", "error")
            .attr("id", id)
            .attr("to", to.to_string())
            .append(error)
            .build()
    }
}

impl StanzaService for RosterServer {
    fn attach(&self, jid: &Jid, outbox: Outbox) {
        self.state()
            .sessions
            .entry(jid.to_bare())
            .or_default()
            .push((jid.clone(), outbox));
    }

    fn detach(&self, jid: &Jid) {
        if let Some(sessions) = self.state().sessions.get_mut(&jid.to_bare()) {
            sessions.retain(|(resource, _)| resource != jid);
        }
    }

    fn handle(&self, from: &Jid, stanza: Element, outbox: &Outbox) {
        let Ok(iq) = Iq::try_from(stanza) else {
            return;
        };
        let reply = match iq.payload {
            IqType::Get(ref payload) if payload.is("query", VERSION_NS) => {
                let version = SoftwareVersion {
                    name: SERVER_NAME.to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    os: None,
                };
                Reply::Result(Some(version.to_element()))
            }
            IqType::Get(ref payload) | IqType::Set(ref payload)
                if payload.is("query", ROSTER_NS) =>
            {
                match (parse_leniently(payload), &iq.payload) {
                    (Err(_), _) => Reply::BadRequest,
                    (Ok(query), IqType::Get(_)) => self.roster_get(from, query),
                    (Ok(query), _) => self.roster_set(from, query),
                }
            }
            IqType::Get(_) | IqType::Set(_) => Reply::ServiceUnavailable,
            // Acknowledgements of our pushes.
            IqType::Result(_) | IqType::Error(_) => return,
        };
        outbox.deliver(reply.into_element(from, &iq.id));
    }
}
