//! XHaunt gateway component.
//!
//! Lets users of an external messaging network register a bridged identity
//! through XEP-0077 In-Band Registration on an XEP-0114 component
//! connection.
//!
//! The pieces, from the wire inwards:
//! - [`parser`]: framing of the component stream into stanzas
//! - [`xep::xep0077`]: decoding registration IQs and encoding replies
//! - [`RegistrationController`]: the registration state machine
//! - [`ProvisioningFlow`]: reply delivery followed by a presence subscription
//! - [`component`]: handshake, dispatch loop and outbound writer
//! - [`disco`]: the gateway identity and features it advertises

use async_trait::async_trait;
use jid::BareJid;
use thiserror::Error;

pub mod component;
pub mod disco;
mod error;
pub mod parser;
pub mod provisioning;
pub mod registration;
pub mod xep;

#[cfg(test)]
pub(crate) mod testing;

pub use component::{ComponentConfig, ComponentStream, Outbound, StreamPresenceNotifier};
pub use error::{build_iq_error, build_stanza_error, StanzaErrorCondition, StanzaErrorType, XmppError};
pub use provisioning::{ProvisioningFlow, ReplySink};
pub use registration::{
    RegistrationController, RegistrationError, RegistrationPayload, RegistrationReply,
    RegistrationRequest, ReplyErrorKind,
};

/// Outcome of a failed credential check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The foreign service rejected the username/password pair.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The foreign service could not give an answer.
    #[error("Auth provider error: {0}")]
    Provider(String),
}

/// Validates foreign-service credentials.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    /// Check `username`/`password` for `address` and return a session token
    /// to store as the account credential.
    async fn verify(
        &self,
        address: &BareJid,
        username: &str,
        password: &str,
    ) -> Result<String, AuthError>;
}

/// Announces interest in a newly registered user's presence.
///
/// Fire-and-forget: implementations report their own delivery failures.
#[async_trait]
pub trait PresenceNotifier: Send + Sync {
    async fn subscribe(&self, address: &BareJid);
}
