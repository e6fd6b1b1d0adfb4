//! XEP-0092 Software Version.

use minidom::Element;

use crate::error::PayloadError;

pub const VERSION_NS: &str = "jabber:iq:version";

/// Result of a software version query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SoftwareVersion {
    pub name: String,
    pub version: String,
    pub os: Option<String>,
}

impl SoftwareVersion {
    /// Empty `<query/>` sent as the payload of an IQ get.
    pub fn query() -> Element {
        Element::builder("query", VERSION_NS).build()
    }

    pub fn from_element(elem: &Element) -> Result<Self, PayloadError> {
        if !elem.is("query", VERSION_NS) {
            return Err(PayloadError::UnexpectedElement {
                expected: format!("query xmlns='{VERSION_NS}'"),
                found: format!("{} xmlns='{}'", elem.name(), elem.ns()),
            });
        }

        let child = |name: &str| elem.get_child(name, VERSION_NS).map(Element::text);
        Ok(Self {
            name: child("name").ok_or(PayloadError::MissingAttribute {
                element: "query",
                attr: "name",
            })?,
            version: child("version").unwrap_or_default(),
            os: child("os"),
        })
    }

    pub fn to_element(&self) -> Element {
        let text = |name: &str, value: &str| {
            Element::builder(name, VERSION_NS)
                .append(value.to_string())
                .build()
        };

        let mut builder = Element::builder("query", VERSION_NS)
            .append(text("name", &self.name))
            .append(text("version", &self.version));
        if let Some(ref os) = self.os {
            builder = builder.append(text("os", os));
        }
        builder.build()
    }
}

impl TryFrom<Element> for SoftwareVersion {
    type Error = PayloadError;

    fn try_from(elem: Element) -> Result<Self, Self::Error> {
        SoftwareVersion::from_element(&elem)
    }
}
