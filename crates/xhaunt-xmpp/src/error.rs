//! Error types for the gateway component.

use minidom::Element;
use thiserror::Error;

use crate::parser::ns;

/// Component-level errors.
#[derive(Debug, Error)]
pub enum XmppError {
    /// IO error on the component connection
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// Stream-level failure reported by or detected on the server stream
    #[error("Stream error: {0}")]
    Stream(String),

    /// The server refused the component handshake
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

impl XmppError {
    pub fn xml_parse(msg: impl Into<String>) -> Self {
        Self::XmlParse(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    pub fn handshake_failed(msg: impl Into<String>) -> Self {
        Self::HandshakeFailed(msg.into())
    }
}

/// Stanza error conditions the gateway emits (RFC 6120 Section 8.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorCondition {
    BadRequest,
    ItemNotFound,
    NotAcceptable,
    NotAuthorized,
    RemoteServerTimeout,
    ServiceUnavailable,
}

impl StanzaErrorCondition {
    /// Get the element name for this condition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::ItemNotFound => "item-not-found",
            Self::NotAcceptable => "not-acceptable",
            Self::NotAuthorized => "not-authorized",
            Self::RemoteServerTimeout => "remote-server-timeout",
            Self::ServiceUnavailable => "service-unavailable",
        }
    }
}

impl std::fmt::Display for StanzaErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// XMPP stanza error types (RFC 6120 Section 8.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorType {
    /// Retry after providing credentials
    Auth,
    /// Do not retry (unrecoverable error)
    Cancel,
    /// Retry after changing the data sent
    Modify,
    /// Retry after waiting (temporary error)
    Wait,
}

impl StanzaErrorType {
    /// Get the type attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Cancel => "cancel",
            Self::Modify => "modify",
            Self::Wait => "wait",
        }
    }
}

impl std::fmt::Display for StanzaErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build the `<error/>` child of an error stanza.
pub fn build_stanza_error(
    condition: StanzaErrorCondition,
    error_type: StanzaErrorType,
    text: Option<&str>,
) -> Element {
    let mut error = Element::builder("error", ns::COMPONENT)
        .attr("type", error_type.as_str())
        .append(Element::builder(condition.as_str(), ns::STANZAS));

    if let Some(text) = text {
        error = error.append(
            Element::builder("text", ns::STANZAS).append(text),
        );
    }

    error.build()
}

/// Build an IQ error reply to `request`, swapping `from` and `to`.
pub fn build_iq_error(
    request: &Element,
    condition: StanzaErrorCondition,
    error_type: StanzaErrorType,
    text: Option<&str>,
) -> Element {
    let mut iq = Element::builder("iq", ns::COMPONENT)
        .attr("type", "error")
        .attr("id", request.attr("id").unwrap_or(""));

    if let Some(to) = request.attr("from") {
        iq = iq.attr("to", to);
    }
    if let Some(from) = request.attr("to") {
        iq = iq.attr("from", from);
    }

    iq.append(build_stanza_error(condition, error_type, text))
        .build()
}
