//! XEP-0199: XMPP Ping.

use minidom::Element;

use crate::disco::build_iq_result;

pub const NS_PING: &str = "urn:xmpp:ping";

pub fn is_ping(iq: &Element) -> bool {
    iq.attr("type") == Some("get") && iq.get_child("ping", NS_PING).is_some()
}

/// A pong is an empty result.
pub fn build_ping_result(request: &Element) -> Element {
    build_iq_result(request, None)
}
