//! XEP-0092: Software Version.

use minidom::Element;

use crate::disco::build_iq_result;

pub const NS_VERSION: &str = "jabber:iq:version";

pub fn is_version_query(iq: &Element) -> bool {
    iq.get_child("query", NS_VERSION).is_some()
}

/// Answer with this crate's name and version.
pub fn build_version_response(request: &Element) -> Element {
    let query = Element::builder("query", NS_VERSION)
        .append(Element::builder("name", NS_VERSION).append(env!("CARGO_PKG_NAME")))
        .append(Element::builder("version", NS_VERSION).append(env!("CARGO_PKG_VERSION")))
        .build();
    build_iq_result(request, Some(query))
}
