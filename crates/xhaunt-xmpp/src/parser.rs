//! Incremental framing of the component stream.
//!
//! The server side of an XEP-0114 connection is one long-lived XML document.
//! [`StanzaFramer`] accumulates bytes, extracts the stream header once, and
//! then yields each complete top-level element as a minidom [`Element`].

use minidom::Element;

use crate::XmppError;

/// Namespace URIs used on the component stream
pub mod ns {
    /// XEP-0114 component namespace
    pub const COMPONENT: &str = "jabber:component:accept";
    /// XMPP streams namespace
    pub const STREAM: &str = "http://etherx.jabber.org/streams";
    /// Stanza error namespace
    pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
    /// Stream error namespace
    pub const STREAMS: &str = "urn:ietf:params:xml:ns:xmpp-streams";
}

/// Parsed stream header information.
#[derive(Debug, Clone, Default)]
pub struct StreamHeader {
    /// The 'from' attribute (the component JID, echoed by the server)
    pub from: Option<String>,
    /// The 'id' attribute, input to the handshake digest
    pub id: Option<String>,
}

impl StreamHeader {
    /// Parse a stream header from raw XML data.
    ///
    /// The opening tag is never closed until the session ends, so the
    /// attributes are read from the raw tag.
    pub fn parse(data: &str) -> Result<Self, XmppError> {
        let stream_start = data
            .find("<stream:stream")
            .ok_or_else(|| XmppError::xml_parse("No stream:stream element found"))?;

        let stream_end = tag_end(&data[stream_start..])
            .map(|i| stream_start + i)
            .ok_or_else(|| XmppError::xml_parse("Incomplete stream header"))?;

        let tag = &data[stream_start..=stream_end];
        Ok(StreamHeader {
            from: extract_attribute(tag, "from"),
            id: extract_attribute(tag, "id"),
        })
    }
}

/// Extract an attribute value from a raw XML tag.
fn extract_attribute(tag: &str, name: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let pattern = format!(" {}={}", name, quote);
        if let Some(start) = tag.find(&pattern) {
            let value_start = start + pattern.len();
            if let Some(value_end) = tag[value_start..].find(quote) {
                return Some(tag[value_start..value_start + value_end].to_string());
            }
        }
    }
    None
}

/// Top-level items read from the server stream.
#[derive(Debug, Clone)]
pub enum ParsedStanza {
    /// `<handshake/>` acknowledging the component secret
    Handshake,
    /// `<stream:error>`; the stream is unusable afterwards
    StreamError(Element),
    /// `</stream:stream>`
    StreamEnd,
    Iq(Element),
    Message(Element),
    Presence(Element),
    /// Any other top-level element
    Unknown(Element),
}

impl ParsedStanza {
    /// Human readable condition of a stream error, e.g. `not-authorized`.
    pub fn stream_error_condition(element: &Element) -> String {
        element
            .children()
            .find(|child| child.ns() == ns::STREAMS && child.name() != "text")
            .map(|child| child.name().to_string())
            .unwrap_or_else(|| "undefined-condition".to_string())
    }
}

/// Upper bound on buffered, not yet framed input.
pub const MAX_BUFFERED_BYTES: usize = 512 * 1024;

/// Accumulates raw bytes and splits them into stream items.
///
/// Invalid UTF-8 sequences are removed as they arrive. Their offsets are
/// kept so the element they belonged to is reported as an error instead of
/// being framed.
#[derive(Debug, Default)]
pub struct StanzaFramer {
    buffer: Vec<u8>,
    corrupt: Vec<usize>,
}

impl StanzaFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append data read from the socket.
    ///
    /// Fails once more than [`MAX_BUFFERED_BYTES`] are waiting for a
    /// complete element.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), XmppError> {
        self.buffer.extend_from_slice(data);
        self.scrub();
        if self.buffer.len() > MAX_BUFFERED_BYTES {
            return Err(XmppError::xml_parse(format!(
                "more than {} bytes buffered without a complete element",
                MAX_BUFFERED_BYTES
            )));
        }
        Ok(())
    }

    /// Strip invalid UTF-8, remembering where it was.
    fn scrub(&mut self) {
        while let Err(e) = std::str::from_utf8(&self.buffer) {
            let Some(len) = e.error_len() else {
                // Incomplete sequence at the end; the rest is still coming.
                return;
            };
            let at = e.valid_up_to();
            self.buffer.drain(at..at + len);
            if self.corrupt.last() != Some(&at) {
                self.corrupt.push(at);
            }
        }
    }

    /// Drop the first `end` bytes. Returns whether an invalid sequence was
    /// removed from within them.
    fn consume(&mut self, end: usize) -> bool {
        self.buffer.drain(..end);
        let before = self.corrupt.len();
        self.corrupt.retain(|&at| at >= end);
        for at in &mut self.corrupt {
            *at -= end;
        }
        self.corrupt.len() != before
    }

    /// The buffer up to any trailing incomplete character.
    fn text(&self) -> &str {
        match std::str::from_utf8(&self.buffer) {
            Ok(text) => text,
            Err(e) => std::str::from_utf8(&self.buffer[..e.valid_up_to()]).unwrap_or_default(),
        }
    }

    /// Consume the server's stream header once it is complete.
    pub fn take_stream_header(&mut self) -> Result<Option<StreamHeader>, XmppError> {
        let text = self.text();
        let Some(start) = text.find("<stream:stream") else {
            return Ok(None);
        };
        let Some(end) = tag_end(&text[start..]).map(|i| start + i + 1) else {
            return Ok(None);
        };

        let header = StreamHeader::parse(&text[start..end]);
        if self.consume(end) {
            return Err(XmppError::xml_parse("invalid UTF-8 in stream header"));
        }
        header.map(Some)
    }

    /// Extract the next complete top-level item, if the buffer holds one.
    ///
    /// An element that contained invalid UTF-8 is consumed and reported as
    /// [`XmppError::XmlParse`]; framing continues with the next one.
    pub fn next_stanza(&mut self) -> Result<Option<ParsedStanza>, XmppError> {
        let text = self.text();

        // Whitespace keepalives between stanzas.
        let Some(start) = text.find('<') else {
            let len = text.len();
            self.consume(len);
            return Ok(None);
        };

        let rest = &text[start..];
        if rest.starts_with("</stream:stream") {
            let Some(end) = tag_end(rest) else {
                return Ok(None);
            };
            self.consume(start + end + 1);
            return Ok(Some(ParsedStanza::StreamEnd));
        }

        let Some(len) = element_extent(rest) else {
            return Ok(None);
        };
        let raw = rest[..len].to_string();
        if self.consume(start + len) {
            return Err(XmppError::xml_parse(format!(
                "invalid UTF-8 in <{}> element",
                tag_name(&raw)
            )));
        }

        parse_stanza(&raw).map(Some)
    }
}

/// Parse one complete top-level element from the stream.
fn parse_stanza(raw: &str) -> Result<ParsedStanza, XmppError> {
    let name = tag_name(raw);
    if name == "stream:error" {
        let element = parse_element(&inject_namespace(raw, name, "xmlns:stream", ns::STREAM))?;
        return Ok(ParsedStanza::StreamError(element));
    }

    let element = parse_element(&inject_namespace(raw, name, "xmlns", ns::COMPONENT))?;
    Ok(match name {
        "handshake" => ParsedStanza::Handshake,
        "iq" => ParsedStanza::Iq(element),
        "message" => ParsedStanza::Message(element),
        "presence" => ParsedStanza::Presence(element),
        _ => ParsedStanza::Unknown(element),
    })
}

/// Stanzas inherit their namespace from the stream header; once cut out of
/// the stream they need it declared on their own root.
fn inject_namespace(raw: &str, name: &str, attr: &str, value: &str) -> String {
    let open_tag = tag_end(raw).map(|end| &raw[..end]).unwrap_or(raw);
    if open_tag.contains(&format!(" {}=", attr)) {
        return raw.to_string();
    }

    let insert_at = 1 + name.len();
    format!("{} {}='{}'{}", &raw[..insert_at], attr, value, &raw[insert_at..])
}

/// Name of the element whose start tag begins `raw`.
fn tag_name(raw: &str) -> &str {
    let name = &raw[1..];
    let end = name
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(name.len());
    &name[..end]
}

/// Index of the `>` closing the tag that starts `data`, skipping quoted
/// attribute values.
fn tag_end(data: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in data.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '>' => return Some(i),
            None => {}
        }
    }
    None
}

/// Byte length of the complete element starting at the beginning of `data`,
/// or `None` if more input is needed.
fn element_extent(data: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut pos = 0;

    loop {
        let open = pos + data[pos..].find('<')?;
        let close = open + tag_end(&data[open..])?;
        let tag = &data[open..=close];

        if tag.starts_with("<?") || tag.starts_with("<!") {
            // processing instruction or comment
        } else if tag.starts_with("</") {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(close + 1);
            }
        } else if tag.ends_with("/>") {
            if depth == 0 {
                return Some(close + 1);
            }
        } else {
            depth += 1;
        }

        pos = close + 1;
    }
}

/// Parse a complete XML element.
pub fn parse_element(data: &str) -> Result<Element, XmppError> {
    data.parse::<Element>()
        .map_err(|e| XmppError::xml_parse(format!("Failed to parse element: {}", e)))
}

/// Serialize a minidom Element to an XML string.
pub fn element_to_string(element: &Element) -> Result<String, XmppError> {
    let mut output = Vec::new();
    element
        .write_to(&mut output)
        .map_err(|e| XmppError::xml_parse(format!("Failed to serialize element: {}", e)))?;
    String::from_utf8(output).map_err(|e| XmppError::xml_parse(format!("Invalid UTF-8: {}", e)))
}
