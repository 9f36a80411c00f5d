//! Service Discovery (XEP-0030) for the gateway component.
//!
//! The component announces itself as a gateway and lists the protocols it
//! answers, so clients can find the registration feature.

use minidom::Element;

use crate::parser::ns;
use crate::xep::{xep0077, xep0092, xep0199};

/// Service Discovery info namespace (XEP-0030).
pub const DISCO_INFO_NS: &str = "http://jabber.org/protocol/disco#info";

/// Service Discovery items namespace (XEP-0030).
pub const DISCO_ITEMS_NS: &str = "http://jabber.org/protocol/disco#items";

/// Identity element for disco#info response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Category (e.g., "gateway")
    pub category: String,
    /// Type (e.g., "hangouts")
    pub type_: String,
    /// Optional name (human-readable)
    pub name: Option<String>,
}

impl Identity {
    pub fn new(category: &str, type_: &str, name: Option<&str>) -> Self {
        Self {
            category: category.to_string(),
            type_: type_.to_string(),
            name: name.map(|s| s.to_string()),
        }
    }

    /// The gateway's own identity (category="gateway", type="hangouts").
    pub fn gateway() -> Self {
        Self::new("gateway", "hangouts", Some("Hangouts Gateway"))
    }
}

/// Feature element for disco#info response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature(pub String);

impl Feature {
    pub fn new(var: &str) -> Self {
        Self(var.to_string())
    }
}

/// Everything the component answers besides discovery itself.
pub fn gateway_features() -> Vec<Feature> {
    vec![
        Feature::new(DISCO_INFO_NS),
        Feature::new(DISCO_ITEMS_NS),
        Feature::new(xep0077::NS_REGISTER),
        Feature::new(xep0092::NS_VERSION),
        Feature::new(xep0199::NS_PING),
    ]
}

pub fn is_disco_info_query(iq: &Element) -> bool {
    iq.get_child("query", DISCO_INFO_NS).is_some()
}

pub fn is_disco_items_query(iq: &Element) -> bool {
    iq.get_child("query", DISCO_ITEMS_NS).is_some()
}

/// The `node` of a disco query, if one was asked for.
pub fn query_node<'a>(iq: &'a Element, query_ns: &str) -> Option<&'a str> {
    iq.get_child("query", query_ns).and_then(|query| query.attr("node"))
}

/// Build a disco#info result listing `identities` and `features`.
pub fn build_disco_info_response(
    request: &Element,
    identities: &[Identity],
    features: &[Feature],
) -> Element {
    let mut query = Element::builder("query", DISCO_INFO_NS);

    for identity in identities {
        let mut id_builder = Element::builder("identity", DISCO_INFO_NS)
            .attr("category", identity.category.as_str())
            .attr("type", identity.type_.as_str());
        if let Some(ref name) = identity.name {
            id_builder = id_builder.attr("name", name.as_str());
        }
        query = query.append(id_builder.build());
    }

    for feature in features {
        query = query.append(
            Element::builder("feature", DISCO_INFO_NS)
                .attr("var", feature.0.as_str())
                .build(),
        );
    }

    build_iq_result(request, Some(query.build()))
}

/// The component has no items: an empty disco#items result.
pub fn build_disco_items_response(request: &Element) -> Element {
    build_iq_result(
        request,
        Some(Element::builder("query", DISCO_ITEMS_NS).build()),
    )
}

/// `type='result'` reply to `request`, swapping `from` and `to`.
pub fn build_iq_result(request: &Element, payload: Option<Element>) -> Element {
    let mut iq = Element::builder("iq", ns::COMPONENT)
        .attr("type", "result")
        .attr("id", request.attr("id").unwrap_or(""));

    if let Some(to) = request.attr("from") {
        iq = iq.attr("to", to);
    }
    if let Some(from) = request.attr("to") {
        iq = iq.attr("from", from);
    }
    if let Some(payload) = payload {
        iq = iq.append(payload);
    }

    iq.build()
}
