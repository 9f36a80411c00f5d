//! XEP-0114 component connection.
//!
//! [`ComponentStream::handshake`] authenticates against the server with the
//! shared secret. [`ComponentStream::serve`] then reads stanzas until the
//! stream ends or shutdown is requested, handing every registration IQ to
//! the [`ProvisioningFlow`] on its own task. All outbound stanzas go through
//! one writer task fed by an mpsc channel of [`Outbound`] items.

use async_trait::async_trait;
use jid::BareJid;
use minidom::Element;
use sha1::{Digest, Sha1};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::disco;
use crate::error::build_iq_error;
use crate::parser::{element_to_string, ns, ParsedStanza, StanzaFramer};
use crate::provisioning::{ProvisioningFlow, ReplySink};
use crate::registration::RegistrationReply;
use crate::xep::xep0077::{decode_registration_iq, encode_reply, is_registration_query_element, IqEnvelope};
use crate::xep::{xep0092, xep0199};
use crate::{PresenceNotifier, StanzaErrorCondition, StanzaErrorType, XmppError};

/// Capacity of the outbound stanza queue.
pub const OUTBOUND_CAPACITY: usize = 256;

const READ_BUFFER_SIZE: usize = 8192;

/// Connection settings for the component.
#[derive(Debug, Clone)]
pub struct ComponentConfig {
    /// The component's own JID, e.g. `gw.example.org`
    pub jid: String,
    /// Secret shared with the server
    pub secret: String,
    pub server: String,
    pub port: u16,
}

/// `hex(sha1(stream_id ++ secret))`, the XEP-0114 handshake value.
pub fn handshake_digest(stream_id: &str, secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(stream_id.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Items for the writer task.
#[derive(Debug)]
pub enum Outbound {
    Stanza(Element),
    /// Close the stream and stop the writer.
    Close,
}

/// Channel feeding the writer task of [`ComponentStream::serve`].
pub fn outbound_channel() -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
    mpsc::channel(OUTBOUND_CAPACITY)
}

/// An authenticated component stream.
pub struct ComponentStream<S> {
    stream: S,
    framer: StanzaFramer,
    jid: String,
}

impl ComponentStream<TcpStream> {
    /// Connect to the server and complete the handshake.
    #[instrument(skip_all, fields(server = %config.server, port = config.port, jid = %config.jid))]
    pub async fn connect(config: &ComponentConfig) -> Result<Self, XmppError> {
        let stream = TcpStream::connect((config.server.as_str(), config.port)).await?;
        stream.set_nodelay(true)?;
        info!("Connected to XMPP server");
        Self::handshake(stream, &config.jid, &config.secret).await
    }
}

/// Read once into the framer. Returns `false` on end of stream.
async fn read_into<R: AsyncRead + Unpin>(
    reader: &mut R,
    framer: &mut StanzaFramer,
    buf: &mut [u8],
) -> Result<bool, XmppError> {
    let n = reader.read(buf).await?;
    if n == 0 {
        return Ok(false);
    }
    framer.feed(&buf[..n])?;
    Ok(true)
}

impl<S> ComponentStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Open the stream on an established transport and authenticate.
    pub async fn handshake(mut stream: S, jid: &str, secret: &str) -> Result<Self, XmppError> {
        let header = format!(
            "<?xml version='1.0'?><stream:stream xmlns='{}' xmlns:stream='{}' to='{}'>",
            ns::COMPONENT,
            ns::STREAM,
            jid
        );
        stream.write_all(header.as_bytes()).await?;

        let mut framer = StanzaFramer::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let header = loop {
            if let Some(header) = framer.take_stream_header()? {
                break header;
            }
            if !read_into(&mut stream, &mut framer, &mut buf).await? {
                return Err(XmppError::handshake_failed("connection closed before stream header"));
            }
        };
        let stream_id = header
            .id
            .ok_or_else(|| XmppError::handshake_failed("stream header has no id"))?;
        debug!(stream_id = %stream_id, "Received stream header");

        let digest = handshake_digest(&stream_id, secret);
        stream
            .write_all(format!("<handshake>{}</handshake>", digest).as_bytes())
            .await?;

        loop {
            match framer.next_stanza()? {
                Some(ParsedStanza::Handshake) => break,
                Some(ParsedStanza::StreamError(element)) => {
                    return Err(XmppError::handshake_failed(
                        ParsedStanza::stream_error_condition(&element),
                    ));
                }
                Some(ParsedStanza::StreamEnd) => {
                    return Err(XmppError::handshake_failed("stream closed by server"));
                }
                Some(other) => debug!(?other, "Ignoring stanza before handshake completed"),
                None => {
                    if !read_into(&mut stream, &mut framer, &mut buf).await? {
                        return Err(XmppError::handshake_failed("connection closed during handshake"));
                    }
                }
            }
        }

        info!(jid = %jid, "Component handshake accepted");
        Ok(Self {
            stream,
            framer,
            jid: jid.to_string(),
        })
    }

    pub fn jid(&self) -> &str {
        &self.jid
    }

    /// Run the component until the server ends the stream or `shutdown`
    /// resolves.
    ///
    /// `outbound` and `outbound_rx` must come from the same
    /// [`outbound_channel`]; other holders of the sender (such as a
    /// [`StreamPresenceNotifier`]) write through the same queue. On exit
    /// in-flight registrations are awaited before the stream is closed.
    pub async fn serve<F>(
        self,
        flow: Arc<ProvisioningFlow>,
        outbound: mpsc::Sender<Outbound>,
        mut outbound_rx: mpsc::Receiver<Outbound>,
        shutdown: F,
    ) -> Result<(), XmppError>
    where
        F: Future<Output = ()>,
    {
        let ComponentStream {
            stream,
            mut framer,
            jid,
        } = self;
        let (mut reader, mut writer) = tokio::io::split(stream);

        let writer_task = tokio::spawn(async move {
            while let Some(item) = outbound_rx.recv().await {
                match item {
                    Outbound::Stanza(element) => {
                        let xml = element_to_string(&element)?;
                        writer.write_all(xml.as_bytes()).await?;
                    }
                    Outbound::Close => break,
                }
            }
            writer.write_all(b"</stream:stream>").await?;
            writer.shutdown().await?;
            Ok::<(), XmppError>(())
        });

        let dispatcher = Dispatcher {
            flow,
            outbound: outbound.clone(),
            jid,
        };
        let mut tasks = JoinSet::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        tokio::pin!(shutdown);

        let result = 'session: loop {
            loop {
                match framer.next_stanza() {
                    Ok(Some(ParsedStanza::StreamEnd)) => {
                        info!("Server closed the stream");
                        break 'session Ok(());
                    }
                    Ok(Some(ParsedStanza::StreamError(element))) => {
                        let condition = ParsedStanza::stream_error_condition(&element);
                        error!(condition = %condition, "Stream error from server");
                        break 'session Err(XmppError::stream(condition));
                    }
                    Ok(Some(stanza)) => dispatcher.dispatch(stanza, &mut tasks).await,
                    Ok(None) => break,
                    Err(e) => warn!(error = %e, "Discarding unparsable stanza"),
                }
            }

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Registration task failed");
                }
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break 'session Ok(());
                }
                read = read_into(&mut reader, &mut framer, &mut buf) => match read {
                    Ok(true) => {}
                    Ok(false) => break 'session Err(XmppError::stream("connection closed by server")),
                    Err(e) => break 'session Err(e),
                },
            }
        };

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for in-flight registrations");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Registration task failed");
            }
        }

        if outbound.send(Outbound::Close).await.is_err() {
            debug!("Writer already stopped");
        }
        match writer_task.await {
            Ok(Ok(())) => debug!("Writer stopped"),
            Ok(Err(e)) => warn!(error = %e, "Writer stopped with error"),
            Err(e) => error!(error = %e, "Writer task failed"),
        }

        result
    }
}

/// Routes inbound stanzas.
struct Dispatcher {
    flow: Arc<ProvisioningFlow>,
    outbound: mpsc::Sender<Outbound>,
    jid: String,
}

impl Dispatcher {
    async fn dispatch(&self, stanza: ParsedStanza, tasks: &mut JoinSet<()>) {
        match stanza {
            ParsedStanza::Iq(element) => self.dispatch_iq(element, tasks).await,
            ParsedStanza::Message(element) | ParsedStanza::Presence(element) => {
                debug!(name = %element.name(), from = ?element.attr("from"), "Ignoring stanza");
            }
            ParsedStanza::Unknown(element) => {
                debug!(name = %element.name(), "Ignoring unknown element");
            }
            ParsedStanza::Handshake => debug!("Ignoring repeated handshake"),
            ParsedStanza::StreamError(_) | ParsedStanza::StreamEnd => {}
        }
    }

    async fn dispatch_iq(&self, element: Element, tasks: &mut JoinSet<()>) {
        if !is_registration_query_element(&element) {
            let iq_type = element.attr("type").unwrap_or("");
            if matches!(iq_type, "get" | "set") && element.attr("from").is_some() {
                let reply = answer_service_query(&element).unwrap_or_else(|| {
                    debug!(id = ?element.attr("id"), "Unsupported iq, replying service-unavailable");
                    build_iq_error(
                        &element,
                        StanzaErrorCondition::ServiceUnavailable,
                        StanzaErrorType::Cancel,
                        None,
                    )
                });
                if self.outbound.send(Outbound::Stanza(reply)).await.is_err() {
                    warn!("Outbound queue closed, dropping iq reply");
                }
            }
            return;
        }

        let incoming = match decode_registration_iq(&element) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(error = %e, id = ?element.attr("id"), "Dropping malformed registration request");
                return;
            }
        };

        let mut envelope = incoming.envelope;
        if envelope.component.is_none() {
            envelope.component = Some(self.jid.clone());
        }
        let sink = IqReplySink {
            envelope,
            outbound: self.outbound.clone(),
        };
        let flow = Arc::clone(&self.flow);
        let request = incoming.request;

        tasks.spawn(async move {
            if let Err(e) = flow.process(request, &sink).await {
                error!(error = %e, id = %sink.envelope.id, "Registration request left unanswered");
            }
        });
    }
}

/// Replies to discovery, ping and version queries addressed to the
/// component. `None` when the IQ is none of these.
fn answer_service_query(iq: &Element) -> Option<Element> {
    let is_get = iq.attr("type") == Some("get");

    if disco::is_disco_info_query(iq) || disco::is_disco_items_query(iq) {
        if !is_get {
            return Some(build_iq_error(
                iq,
                StanzaErrorCondition::BadRequest,
                StanzaErrorType::Modify,
                None,
            ));
        }
        if disco::is_disco_info_query(iq) {
            if disco::query_node(iq, disco::DISCO_INFO_NS).is_some() {
                return Some(build_iq_error(
                    iq,
                    StanzaErrorCondition::ItemNotFound,
                    StanzaErrorType::Cancel,
                    None,
                ));
            }
            debug!(id = ?iq.attr("id"), "Answering disco#info");
            return Some(disco::build_disco_info_response(
                iq,
                &[disco::Identity::gateway()],
                &disco::gateway_features(),
            ));
        }
        return Some(disco::build_disco_items_response(iq));
    }

    if iq.get_child("ping", xep0199::NS_PING).is_some() {
        return Some(if xep0199::is_ping(iq) {
            xep0199::build_ping_result(iq)
        } else {
            build_iq_error(iq, StanzaErrorCondition::BadRequest, StanzaErrorType::Modify, None)
        });
    }

    if xep0092::is_version_query(iq) {
        return Some(if is_get {
            xep0092::build_version_response(iq)
        } else {
            build_iq_error(iq, StanzaErrorCondition::BadRequest, StanzaErrorType::Modify, None)
        });
    }

    None
}

/// Sends the reply to one registration IQ.
struct IqReplySink {
    envelope: IqEnvelope,
    outbound: mpsc::Sender<Outbound>,
}

#[async_trait]
impl ReplySink for IqReplySink {
    async fn deliver(&self, reply: &RegistrationReply) -> Result<(), XmppError> {
        let element = encode_reply(&self.envelope, reply);
        self.outbound
            .send(Outbound::Stanza(element))
            .await
            .map_err(|_| XmppError::stream("outbound queue closed"))
    }
}

/// [`PresenceNotifier`] that sends `<presence type='subscribe'/>` from the
/// component JID over the component stream.
#[derive(Clone)]
pub struct StreamPresenceNotifier {
    from: String,
    outbound: mpsc::Sender<Outbound>,
}

impl StreamPresenceNotifier {
    pub fn new(from: impl Into<String>, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            from: from.into(),
            outbound,
        }
    }
}

#[async_trait]
impl PresenceNotifier for StreamPresenceNotifier {
    async fn subscribe(&self, address: &BareJid) {
        let presence = Element::builder("presence", ns::COMPONENT)
            .attr("type", "subscribe")
            .attr("id", Uuid::now_v7().to_string())
            .attr("from", self.from.as_str())
            .attr("to", address.to_string())
            .build();

        match self.outbound.send(Outbound::Stanza(presence)).await {
            Ok(()) => debug!(address = %address, "Presence subscription queued"),
            Err(_) => warn!(address = %address, "Presence subscription not sent, stream closed"),
        }
    }
}
