//! Recording doubles for the collaborator traits.

use async_trait::async_trait;
use jid::BareJid;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::{AuthError, AuthVerifier, PresenceNotifier, RegistrationReply, ReplySink, XmppError};

enum Verdict {
    /// Accept and return the password as the token.
    Accept,
    Issue(String),
    Reject,
    Fail,
}

pub struct RecordingVerifier {
    verdict: Verdict,
    calls: AtomicUsize,
}

impl RecordingVerifier {
    fn with(verdict: Verdict) -> Self {
        Self {
            verdict,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn accepting() -> Self {
        Self::with(Verdict::Accept)
    }

    pub fn issuing(token: &str) -> Self {
        Self::with(Verdict::Issue(token.to_string()))
    }

    pub fn rejecting() -> Self {
        Self::with(Verdict::Reject)
    }

    pub fn failing() -> Self {
        Self::with(Verdict::Fail)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthVerifier for RecordingVerifier {
    async fn verify(
        &self,
        _address: &BareJid,
        _username: &str,
        password: &str,
    ) -> Result<String, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.verdict {
            Verdict::Accept => Ok(password.to_string()),
            Verdict::Issue(token) => Ok(token.clone()),
            Verdict::Reject => Err(AuthError::InvalidCredentials),
            Verdict::Fail => Err(AuthError::Provider("connection refused".to_string())),
        }
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

/// Collects delivered replies; optionally refuses delivery.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<RegistrationReply>>,
    broken: bool,
}

impl RecordingSink {
    pub fn broken() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            broken: true,
        }
    }

    pub fn delivered(&self) -> Vec<RegistrationReply> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn deliver(&self, reply: &RegistrationReply) -> Result<(), XmppError> {
        if self.broken {
            return Err(XmppError::stream("outbound channel closed"));
        }
        self.delivered.lock().unwrap().push(reply.clone());
        Ok(())
    }
}
