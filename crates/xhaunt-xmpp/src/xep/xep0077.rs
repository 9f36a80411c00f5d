//! XEP-0077: In-Band Registration
//!
//! Wire codec between registration IQs on the component stream and the
//! transport-neutral [`RegistrationRequest`] / [`RegistrationReply`].
//!
//! ## Protocol Flow
//!
//! 1. A user asks the gateway for its registration form:
//!    ```xml
//!    <iq type='get' id='reg1' from='alice@example.org/phone' to='gw.example.org'>
//!      <query xmlns='jabber:iq:register'/>
//!    </iq>
//!    ```
//!
//! 2. The gateway answers with a data form, prefilled when the user is
//!    already registered:
//!    ```xml
//!    <iq type='result' id='reg1' from='gw.example.org' to='alice@example.org/phone'>
//!      <query xmlns='jabber:iq:register'>
//!        <instructions>Please provide username &amp; password</instructions>
//!        <x xmlns='jabber:x:data' type='form'>
//!          <title>register</title>
//!          <instructions>Please provide username &amp; password</instructions>
//!          <field var='username' type='text-single' label='Username'/>
//!          <field var='password' type='text-private' label='Password'/>
//!          <field var='cookie' type='text-single' label='Cookie'/>
//!        </x>
//!      </query>
//!    </iq>
//!    ```
//!
//! 3. The user submits the form (or legacy `<username/>`/`<password/>`
//!    children), or sends `<remove/>` to unregister.
//!
//! 4. The gateway replies with an empty result or a stanza error.

use jid::Jid;
use minidom::Element;
use thiserror::Error;
use tracing::debug;

use super::xep0004::{DataForm, FieldType, FormField, FormType, NS_DATA_FORMS};
use crate::error::{build_stanza_error, StanzaErrorCondition, StanzaErrorType};
use crate::parser::ns;
use crate::registration::{RegistrationPayload, RegistrationReply, RegistrationRequest, ReplyErrorKind};

/// Namespace for XEP-0077 In-Band Registration
pub const NS_REGISTER: &str = "jabber:iq:register";

/// Title of the offered registration form.
pub const FORM_TITLE: &str = "register";

/// Instructions shown with the offered registration form.
pub const FORM_INSTRUCTIONS: &str = "Please provide username & password";

/// Why a registration IQ was dropped without a reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRequest {
    #[error("not an iq stanza: <{0}/>")]
    NotAnIq(String),

    #[error("missing 'from' attribute")]
    MissingFrom,

    #[error("invalid 'from' address {0:?}")]
    InvalidFrom(String),

    #[error("unexpected iq type {0:?}")]
    UnexpectedType(String),

    #[error("missing jabber:iq:register query")]
    MissingQuery,

    #[error("unsupported registration payload <{0}/>")]
    UnsupportedPayload(String),
}

/// Addressing of a registration IQ, needed to route the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IqEnvelope {
    pub id: String,
    /// Full JID of the requester; replies go back to this resource.
    pub requester: Jid,
    /// The gateway address the request was sent to.
    pub component: Option<String>,
}

/// A decoded registration IQ.
#[derive(Debug, Clone)]
pub struct IncomingRegistration {
    pub envelope: IqEnvelope,
    pub request: RegistrationRequest,
}

/// Check if an IQ element carries a registration query.
pub fn is_registration_query_element(element: &Element) -> bool {
    if element.name() != "iq" {
        return false;
    }
    element.get_child("query", NS_REGISTER).is_some()
}

/// Decode a registration IQ received on the component stream.
///
/// Both `get` (form retrieval, XEP-0077 section 3.1) and `set` are accepted;
/// `result` and `error` IQs are malformed as requests.
pub fn decode_registration_iq(element: &Element) -> Result<IncomingRegistration, MalformedRequest> {
    if element.name() != "iq" {
        return Err(MalformedRequest::NotAnIq(element.name().to_string()));
    }

    let from = element.attr("from").ok_or(MalformedRequest::MissingFrom)?;
    let requester: Jid = from
        .parse()
        .map_err(|_| MalformedRequest::InvalidFrom(from.to_string()))?;

    let iq_type = element.attr("type").unwrap_or("");
    if iq_type != "get" && iq_type != "set" {
        return Err(MalformedRequest::UnexpectedType(iq_type.to_string()));
    }

    let query = element
        .get_child("query", NS_REGISTER)
        .ok_or(MalformedRequest::MissingQuery)?;
    let payload = classify_query(query)?;

    let id = element.attr("id").unwrap_or("").to_string();
    debug!(id = %id, from = %requester, "Registration request decoded");

    Ok(IncomingRegistration {
        request: RegistrationRequest::new(&requester, payload),
        envelope: IqEnvelope {
            id,
            requester,
            component: element.attr("to").map(str::to_string),
        },
    })
}

/// Classify the children of a `jabber:iq:register` query.
pub fn classify_query(query: &Element) -> Result<RegistrationPayload, MalformedRequest> {
    let mut form = None;
    let mut username = None;
    let mut password = None;

    for child in query.children() {
        if child.is("remove", NS_REGISTER) {
            return Ok(RegistrationPayload::RemovalMarker);
        } else if child.is("x", NS_DATA_FORMS) {
            form = Some(child);
        } else if child.is("username", NS_REGISTER) {
            username = Some(child.text());
        } else if child.is("password", NS_REGISTER) {
            password = Some(child.text());
        } else if child.is("instructions", NS_REGISTER) || child.is("registered", NS_REGISTER) {
            continue;
        } else {
            return Err(MalformedRequest::UnsupportedPayload(child.name().to_string()));
        }
    }

    if let Some(form) = form {
        let form = DataForm::from_element(form)
            .filter(|form| matches!(form.form_type, FormType::Submit | FormType::Form))
            .ok_or_else(|| MalformedRequest::UnsupportedPayload("x".to_string()))?;
        return Ok(RegistrationPayload::FormSubmission {
            username: form.value("username").unwrap_or_default().to_string(),
            password: form.value("password").unwrap_or_default().to_string(),
        });
    }

    if username.is_some() || password.is_some() {
        return Ok(RegistrationPayload::FormSubmission {
            username: username.unwrap_or_default(),
            password: password.unwrap_or_default(),
        });
    }

    Ok(RegistrationPayload::Empty)
}

/// The registration form, with values only where prefilled.
pub fn registration_form(username: Option<&str>, password: Option<&str>) -> DataForm {
    let mut form = DataForm::new(FormType::Form);
    form.title = Some(FORM_TITLE.to_string());
    form.instructions = Some(FORM_INSTRUCTIONS.to_string());
    form.fields = vec![
        FormField::new("username", FieldType::TextSingle)
            .with_label("Username")
            .with_value(username.map(str::to_string)),
        FormField::new("password", FieldType::TextPrivate)
            .with_label("Password")
            .with_value(password.map(str::to_string)),
        FormField::new("cookie", FieldType::TextSingle).with_label("Cookie"),
    ];
    form
}

/// Stanza error used for each reply error kind.
pub fn error_condition(kind: ReplyErrorKind) -> (StanzaErrorCondition, StanzaErrorType) {
    match kind {
        ReplyErrorKind::AuthFailed => (StanzaErrorCondition::NotAuthorized, StanzaErrorType::Auth),
        ReplyErrorKind::NotFound => (StanzaErrorCondition::ItemNotFound, StanzaErrorType::Cancel),
        ReplyErrorKind::NotAcceptable => (StanzaErrorCondition::NotAcceptable, StanzaErrorType::Modify),
        ReplyErrorKind::ProviderUnavailable => {
            (StanzaErrorCondition::RemoteServerTimeout, StanzaErrorType::Wait)
        }
    }
}

/// Encode a reply to the IQ described by `envelope`.
pub fn encode_reply(envelope: &IqEnvelope, reply: &RegistrationReply) -> Element {
    let iq_type = match reply {
        RegistrationReply::Error(_) => "error",
        _ => "result",
    };

    let mut iq = Element::builder("iq", ns::COMPONENT)
        .attr("type", iq_type)
        .attr("id", envelope.id.as_str())
        .attr("to", envelope.requester.to_string());
    if let Some(component) = &envelope.component {
        iq = iq.attr("from", component.as_str());
    }

    match reply {
        RegistrationReply::FormOffer { username, password } => {
            let form = registration_form(username.as_deref(), password.as_deref());
            iq.append(
                Element::builder("query", NS_REGISTER)
                    .append(Element::builder("instructions", NS_REGISTER).append(FORM_INSTRUCTIONS))
                    .append(form.to_element()),
            )
            .build()
        }
        RegistrationReply::Success => iq.build(),
        RegistrationReply::Error(kind) => {
            let (condition, error_type) = error_condition(*kind);
            iq.append(Element::builder("query", NS_REGISTER))
                .append(build_stanza_error(condition, error_type, None))
                .build()
        }
    }
}
