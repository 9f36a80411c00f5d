//! Shared doubles for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use jid::BareJid;
use minidom::Element;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use xhaunt_xmpp::{AuthError, AuthVerifier, PresenceNotifier, RegistrationReply, ReplySink, XmppError};

/// Accepts any password except `wrong` and hands it back as the token.
#[derive(Default)]
pub struct PassthroughVerifier {
    calls: AtomicUsize,
}

impl PassthroughVerifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthVerifier for PassthroughVerifier {
    async fn verify(
        &self,
        _address: &BareJid,
        _username: &str,
        password: &str,
    ) -> Result<String, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if password == "wrong" {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(password.to_string())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    subscribed: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PresenceNotifier for RecordingNotifier {
    async fn subscribe(&self, address: &BareJid) {
        self.subscribed.lock().unwrap().push(address.to_string());
    }
}

/// Captures the replies as they would go on the wire.
#[derive(Default)]
pub struct CapturingSink {
    replies: Mutex<Vec<RegistrationReply>>,
}

impl CapturingSink {
    pub fn replies(&self) -> Vec<RegistrationReply> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplySink for CapturingSink {
    async fn deliver(&self, reply: &RegistrationReply) -> Result<(), XmppError> {
        self.replies.lock().unwrap().push(reply.clone());
        Ok(())
    }
}

/// Field values of the data form inside a registration result.
pub fn form_values(iq: &Element) -> Vec<(String, Option<String>)> {
    let form = iq
        .get_child("query", "jabber:iq:register")
        .and_then(|query| query.get_child("x", "jabber:x:data"))
        .expect("registration form");

    form.children()
        .filter(|child| child.is("field", "jabber:x:data"))
        .map(|field| {
            (
                field.attr("var").unwrap_or("").to_string(),
                field.get_child("value", "jabber:x:data").map(|v| v.text()),
            )
        })
        .collect()
}
