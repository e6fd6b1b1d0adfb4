//! RFC 6121 roster payloads, from the client's side.
//!
//! Roster get, optionally versioned:
//! ```xml
//! <query xmlns='jabber:iq:roster' ver='ver7'/>
//! ```
//!
//! Roster set (add or update):
//! ```xml
//! <query xmlns='jabber:iq:roster'>
//!   <item jid='contact@example.com' name='Contact Name'>
//!     <group>Friends</group>
//!   </item>
//! </query>
//! ```
//!
//! Roster set (remove):
//! ```xml
//! <query xmlns='jabber:iq:roster'>
//!   <item jid='contact@example.com' subscription='remove'/>
//! </query>
//! ```
//!
//! Pushes from the server carry the same `<query/>` inside an `<iq type='set'/>`.

use std::fmt;
use std::str::FromStr;

use jid::BareJid;
use minidom::Element;

use crate::error::PayloadError;

/// Namespace for RFC 6121 Roster Management.
pub const ROSTER_NS: &str = "jabber:iq:roster";

/// Stream feature advertising roster versioning.
pub const ROSTERVER_NS: &str = "urn:xmpp:features:rosterver";

/// A contact in the user's roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterItem {
    pub jid: BareJid,
    pub name: Option<String>,
    /// Absent and `none` both read as [`Subscription::None`].
    pub subscription: Subscription,
    pub ask: Option<AskType>,
    pub groups: Vec<String>,
}

impl RosterItem {
    pub fn new(jid: BareJid) -> Self {
        Self {
            jid,
            name: None,
            subscription: Subscription::None,
            ask: None,
            groups: Vec::new(),
        }
    }

    pub fn with_name(jid: BareJid, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(jid)
        }
    }

    pub fn set_subscription(mut self, subscription: Subscription) -> Self {
        self.subscription = subscription;
        self
    }

    pub fn add_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Item that removes `jid` when sent in a roster set.
    pub fn removal(jid: BareJid) -> Self {
        Self::new(jid).set_subscription(Subscription::Remove)
    }

    pub fn from_element(elem: &Element) -> Result<Self, PayloadError> {
        expect(elem, "item")?;

        let jid_str = elem.attr("jid").ok_or(PayloadError::MissingAttribute {
            element: "item",
            attr: "jid",
        })?;
        let jid: BareJid = jid_str.parse().map_err(|_| PayloadError::InvalidValue {
            attr: "jid",
            value: jid_str.to_string(),
        })?;

        let subscription = elem
            .attr("subscription")
            .map(str::parse::<Subscription>)
            .transpose()?
            .unwrap_or_default();
        let ask = elem.attr("ask").map(str::parse::<AskType>).transpose()?;

        let groups = elem
            .children()
            .filter(|c| c.is("group", ROSTER_NS))
            .map(Element::text)
            .collect();

        Ok(Self {
            jid,
            name: elem.attr("name").map(str::to_string),
            subscription,
            ask,
            groups,
        })
    }

    /// Client-side rendering: `subscription` is only written when it is not
    /// `none`, since clients may only send `remove`.
    pub fn to_element(&self) -> Element {
        let mut builder = Element::builder("item", ROSTER_NS).attr("jid", self.jid.to_string());

        if self.subscription != Subscription::None {
            builder = builder.attr("subscription", self.subscription.as_str());
        }

        if let Some(ref name) = self.name {
            builder = builder.attr("name", name);
        }

        if let Some(ref ask) = self.ask {
            builder = builder.attr("ask", ask.as_str());
        }

        for group in &self.groups {
            let group_elem = Element::builder("group", ROSTER_NS)
                .append(group.clone())
                .build();
            builder = builder.append(group_elem);
        }

        builder.build()
    }
}

/// Subscription state for a roster item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subscription {
    #[default]
    None,
    To,
    From,
    Both,
    /// Only valid in a roster set, or in the push announcing a removal.
    Remove,
}

impl Subscription {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subscription::None => "none",
            Subscription::To => "to",
            Subscription::From => "from",
            Subscription::Both => "both",
            Subscription::Remove => "remove",
        }
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, Subscription::Remove)
    }
}

impl FromStr for Subscription {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(Subscription::None),
            "to" => Ok(Subscription::To),
            "from" => Ok(Subscription::From),
            "both" => Ok(Subscription::Both),
            "remove" => Ok(Subscription::Remove),
            _ => Err(PayloadError::InvalidValue {
                attr: "subscription",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pending outbound subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskType {
    Subscribe,
}

impl AskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AskType::Subscribe => "subscribe",
        }
    }
}

impl FromStr for AskType {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscribe" => Ok(AskType::Subscribe),
            _ => Err(PayloadError::InvalidValue {
                attr: "ask",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for AskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `<query xmlns='jabber:iq:roster'/>` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterQuery {
    /// Roster version. `Some("")` asks a versioning server for the full roster.
    pub ver: Option<String>,
    pub items: Vec<RosterItem>,
}

impl RosterQuery {
    /// Plain roster get.
    pub fn get() -> Self {
        Self::default()
    }

    pub fn get_versioned(ver: impl Into<String>) -> Self {
        Self {
            ver: Some(ver.into()),
            items: Vec::new(),
        }
    }

    pub fn set(items: Vec<RosterItem>) -> Self {
        Self { ver: None, items }
    }

    pub fn remove(jid: BareJid) -> Self {
        Self::set(vec![RosterItem::removal(jid)])
    }

    pub fn from_element(elem: &Element) -> Result<Self, PayloadError> {
        expect(elem, "query")?;
        let items = elem
            .children()
            .filter(|c| c.is("item", ROSTER_NS))
            .map(RosterItem::from_element)
            .collect::<Result<_, _>>()?;
        Ok(Self {
            ver: elem.attr("ver").map(str::to_string),
            items,
        })
    }

    pub fn to_element(&self) -> Element {
        let mut builder = Element::builder("query", ROSTER_NS);
        if let Some(ref ver) = self.ver {
            builder = builder.attr("ver", ver);
        }
        builder
            .append_all(self.items.iter().map(RosterItem::to_element))
            .build()
    }
}

impl From<RosterQuery> for Element {
    fn from(query: RosterQuery) -> Element {
        query.to_element()
    }
}

impl TryFrom<Element> for RosterQuery {
    type Error = PayloadError;

    fn try_from(elem: Element) -> Result<Self, Self::Error> {
        RosterQuery::from_element(&elem)
    }
}

fn expect(elem: &Element, name: &'static str) -> Result<(), PayloadError> {
    if elem.is(name, ROSTER_NS) {
        Ok(())
    } else {
        Err(PayloadError::UnexpectedElement {
            expected: format!("{name} xmlns='{ROSTER_NS}'"),
            found: format!("{} xmlns='{}'", elem.name(), elem.ns()),
        })
    }
}
