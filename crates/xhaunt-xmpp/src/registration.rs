//! Registration state machine.
//!
//! [`RegistrationController`] decides the reply to one decoded registration
//! request. It holds no per-address state; whether an address is registered
//! is whatever the account store says at the time of the request.
//!
//! | Stored account | Payload          | Action                                | Reply                         |
//! |----------------|------------------|---------------------------------------|-------------------------------|
//! | any            | `Empty`          | find                                  | form, prefilled if registered |
//! | any            | `FormSubmission` | verify, then upsert on success only   | `Success` or typed error      |
//! | present        | `RemovalMarker`  | remove (roster cascades)              | `Success`                     |
//! | absent         | `RemovalMarker`  | none                                  | `Error(NotFound)`             |

use jid::{BareJid, Jid};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use xhaunt_store::{GatewayContext, StoreError};

use crate::{AuthError, AuthVerifier};

/// What a registration request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationPayload {
    /// Ask for the registration form.
    Empty,
    /// Register or re-register with foreign credentials.
    FormSubmission { username: String, password: String },
    /// Unregister.
    RemovalMarker,
}

/// A decoded registration request from one requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    requester: BareJid,
    payload: RegistrationPayload,
}

impl RegistrationRequest {
    /// The requester's resource is dropped here; everything downstream keys
    /// on the bare address.
    pub fn new(requester: &Jid, payload: RegistrationPayload) -> Self {
        Self {
            requester: requester.to_bare(),
            payload,
        }
    }

    pub fn requester(&self) -> &BareJid {
        &self.requester
    }

    pub fn payload(&self) -> &RegistrationPayload {
        &self.payload
    }

    pub fn is_submission(&self) -> bool {
        matches!(self.payload, RegistrationPayload::FormSubmission { .. })
    }
}

/// Typed errors a requester can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyErrorKind {
    /// The foreign service rejected the credentials.
    AuthFailed,
    /// Removal requested for an address with no account.
    NotFound,
    /// The submission lacked a username or password.
    NotAcceptable,
    /// The foreign service could not be reached.
    ProviderUnavailable,
}

/// The controller's answer to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationReply {
    FormOffer {
        username: Option<String>,
        password: Option<String>,
    },
    Success,
    Error(ReplyErrorKind),
}

/// Failures that leave the request without a reply.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Storage failure: {0}")]
    Store(#[from] StoreError),

    #[error("Reply delivery failed: {0}")]
    Delivery(String),
}

/// Per-request decision logic over the gateway's account store.
pub struct RegistrationController {
    context: GatewayContext,
    verifier: Arc<dyn AuthVerifier>,
    anomalies: AtomicU64,
}

impl RegistrationController {
    pub fn new(context: GatewayContext, verifier: Arc<dyn AuthVerifier>) -> Self {
        Self {
            context,
            verifier,
            anomalies: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &GatewayContext {
        &self.context
    }

    /// Number of removals that deleted more than one account row.
    pub fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }

    /// Decide and apply the reply to `request`.
    ///
    /// Storage failures propagate as errors; the caller must not reply.
    #[instrument(skip(self, request), fields(address = %request.requester()))]
    pub async fn handle(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationReply, RegistrationError> {
        let address = request.requester().to_string();

        match request.payload() {
            RegistrationPayload::Empty => self.offer_form(&address).await,
            RegistrationPayload::FormSubmission { username, password } => {
                self.register(request.requester(), &address, username, password)
                    .await
            }
            RegistrationPayload::RemovalMarker => self.unregister(&address).await,
        }
    }

    async fn offer_form(&self, address: &str) -> Result<RegistrationReply, RegistrationError> {
        let reply = match self.context.accounts().find(address).await? {
            Some(account) => {
                debug!("Offering prefilled registration form");
                RegistrationReply::FormOffer {
                    username: Some(account.username),
                    password: account.credential,
                }
            }
            None => {
                debug!("Offering empty registration form");
                RegistrationReply::FormOffer {
                    username: None,
                    password: None,
                }
            }
        };
        Ok(reply)
    }

    async fn register(
        &self,
        requester: &BareJid,
        address: &str,
        username: &str,
        password: &str,
    ) -> Result<RegistrationReply, RegistrationError> {
        if username.is_empty() || password.is_empty() {
            info!("Registration submitted without username or password");
            return Ok(RegistrationReply::Error(ReplyErrorKind::NotAcceptable));
        }

        let token = match self.verifier.verify(requester, username, password).await {
            Ok(token) => token,
            Err(AuthError::InvalidCredentials) => {
                info!(username = %username, "Foreign credentials rejected");
                return Ok(RegistrationReply::Error(ReplyErrorKind::AuthFailed));
            }
            Err(AuthError::Provider(reason)) => {
                warn!(username = %username, reason = %reason, "Auth provider unavailable");
                return Ok(RegistrationReply::Error(ReplyErrorKind::ProviderUnavailable));
            }
        };

        self.context
            .accounts()
            .upsert(address, username, Some(&token))
            .await?;

        info!(username = %username, "Registered");
        Ok(RegistrationReply::Success)
    }

    async fn unregister(&self, address: &str) -> Result<RegistrationReply, RegistrationError> {
        match self.context.accounts().remove(address).await? {
            0 => {
                info!("Removal requested for unregistered address");
                Ok(RegistrationReply::Error(ReplyErrorKind::NotFound))
            }
            1 => {
                info!("Unregistered");
                Ok(RegistrationReply::Success)
            }
            rows => {
                self.anomalies.fetch_add(1, Ordering::Relaxed);
                error!(rows = rows, "Removal deleted more than one account");
                Ok(RegistrationReply::Success)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingVerifier;
    use xhaunt_store::ExternalId;

    fn request(from: &str, payload: RegistrationPayload) -> RegistrationRequest {
        let jid: Jid = from.parse().unwrap();
        RegistrationRequest::new(&jid, payload)
    }

    fn submission(username: &str, password: &str) -> RegistrationPayload {
        RegistrationPayload::FormSubmission {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn controller(verifier: Arc<RecordingVerifier>) -> RegistrationController {
        RegistrationController::new(GatewayContext::in_memory(), verifier)
    }

    #[test]
    fn test_request_strips_resource() {
        let request = request("alice@example.org/phone", RegistrationPayload::Empty);
        assert_eq!(request.requester().to_string(), "alice@example.org");

        let bare = self::request("alice@example.org", RegistrationPayload::Empty);
        assert_eq!(bare.requester(), request.requester());
    }

    #[tokio::test]
    async fn test_empty_on_fresh_address_offers_blank_form() {
        let controller = controller(Arc::new(RecordingVerifier::accepting()));

        let reply = controller
            .handle(&request("alice@example.org/phone", RegistrationPayload::Empty))
            .await
            .unwrap();
        assert_eq!(
            reply,
            RegistrationReply::FormOffer {
                username: None,
                password: None
            }
        );
    }

    #[tokio::test]
    async fn test_registration_then_prefilled_form() {
        let verifier = Arc::new(RecordingVerifier::accepting());
        let controller = controller(Arc::clone(&verifier));

        let reply = controller
            .handle(&request("alice@example.org/phone", submission("hangouts1", "pw1")))
            .await
            .unwrap();
        assert_eq!(reply, RegistrationReply::Success);
        assert_eq!(verifier.calls(), 1);

        // Another resource of the same account sees the stored values.
        let reply = controller
            .handle(&request("alice@example.org/laptop", RegistrationPayload::Empty))
            .await
            .unwrap();
        assert_eq!(
            reply,
            RegistrationReply::FormOffer {
                username: Some("hangouts1".to_string()),
                password: Some("pw1".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_rejected_credentials_persist_nothing() {
        let controller = controller(Arc::new(RecordingVerifier::rejecting()));

        let reply = controller
            .handle(&request("alice@example.org", submission("hangouts1", "wrong")))
            .await
            .unwrap();
        assert_eq!(reply, RegistrationReply::Error(ReplyErrorKind::AuthFailed));
        assert_eq!(controller.context().accounts().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_persists_nothing() {
        let controller = controller(Arc::new(RecordingVerifier::failing()));

        let reply = controller
            .handle(&request("alice@example.org", submission("hangouts1", "pw1")))
            .await
            .unwrap();
        assert_eq!(
            reply,
            RegistrationReply::Error(ReplyErrorKind::ProviderUnavailable)
        );
        assert_eq!(controller.context().accounts().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_incomplete_submission_skips_verifier() {
        let verifier = Arc::new(RecordingVerifier::accepting());
        let controller = controller(Arc::clone(&verifier));

        let reply = controller
            .handle(&request("alice@example.org", submission("hangouts1", "")))
            .await
            .unwrap();
        assert_eq!(reply, RegistrationReply::Error(ReplyErrorKind::NotAcceptable));
        assert_eq!(verifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_token_from_verifier_is_stored() {
        let verifier = Arc::new(RecordingVerifier::issuing("session-token"));
        let controller = controller(Arc::clone(&verifier));

        controller
            .handle(&request("alice@example.org", submission("hangouts1", "pw1")))
            .await
            .unwrap();

        let account = controller
            .context()
            .accounts()
            .find("alice@example.org")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.credential.as_deref(), Some("session-token"));
    }

    #[tokio::test]
    async fn test_removal_cascades_roster() {
        let controller = controller(Arc::new(RecordingVerifier::accepting()));
        controller
            .handle(&request("alice@example.org", submission("hangouts1", "pw1")))
            .await
            .unwrap();

        let roster = controller.context().roster();
        for i in 0..3 {
            roster
                .add("alice@example.org", &ExternalId::new(format!("g{i}"), "c"))
                .await
                .unwrap();
        }

        let reply = controller
            .handle(&request("alice@example.org/phone", RegistrationPayload::RemovalMarker))
            .await
            .unwrap();
        assert_eq!(reply, RegistrationReply::Success);
        assert_eq!(roster.count(Some("alice@example.org")).await.unwrap(), 0);
        assert_eq!(controller.anomalies(), 0);
    }

    #[tokio::test]
    async fn test_removal_of_unknown_address() {
        let controller = controller(Arc::new(RecordingVerifier::accepting()));
        controller
            .handle(&request("gooduser@example.com", submission("good", "pw")))
            .await
            .unwrap();

        let reply = controller
            .handle(&request("baduser@example.com", RegistrationPayload::RemovalMarker))
            .await
            .unwrap();
        assert_eq!(reply, RegistrationReply::Error(ReplyErrorKind::NotFound));
        assert_eq!(controller.context().accounts().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reregistration_overwrites() {
        let controller = controller(Arc::new(RecordingVerifier::accepting()));
        controller
            .handle(&request("alice@example.org", submission("old", "pw1")))
            .await
            .unwrap();
        controller
            .handle(&request("alice@example.org/other", submission("new", "pw2")))
            .await
            .unwrap();

        let accounts = controller.context().accounts();
        assert_eq!(accounts.count().await.unwrap(), 1);
        let account = accounts.find("alice@example.org").await.unwrap().unwrap();
        assert_eq!(account.username, "new");
        assert_eq!(account.credential.as_deref(), Some("pw2"));
    }

    /// Reports two deleted rows for every removal.
    struct DuplicatedRows;

    #[async_trait::async_trait]
    impl xhaunt_store::AccountStore for DuplicatedRows {
        async fn create_schema_if_needed(&self) -> Result<(), StoreError> {
            Ok(())
        }
        async fn find(&self, _: &str) -> Result<Option<xhaunt_store::Account>, StoreError> {
            Ok(None)
        }
        async fn upsert(&self, _: &str, _: &str, _: Option<&str>) -> Result<(), StoreError> {
            Ok(())
        }
        async fn remove(&self, _: &str) -> Result<u64, StoreError> {
            Ok(2)
        }
        async fn count(&self) -> Result<u64, StoreError> {
            Ok(2)
        }
        async fn credential(&self, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
        async fn set_credential(&self, _: &str, _: &str) -> Result<u64, StoreError> {
            Ok(2)
        }
    }

    #[tokio::test]
    async fn test_removal_anomaly_is_counted() {
        let context = GatewayContext::from_stores(
            Arc::new(DuplicatedRows),
            Arc::new(xhaunt_store::MemoryStore::new().roster()),
        );
        let controller =
            RegistrationController::new(context, Arc::new(RecordingVerifier::accepting()));

        let reply = controller
            .handle(&request("alice@example.org", RegistrationPayload::RemovalMarker))
            .await
            .unwrap();
        assert_eq!(reply, RegistrationReply::Success);
        assert_eq!(controller.anomalies(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_store_one_account() {
        let controller = Arc::new(controller(Arc::new(RecordingVerifier::accepting())));

        let mut handles = Vec::new();
        for i in 0..8 {
            let controller = Arc::clone(&controller);
            handles.push(tokio::spawn(async move {
                controller
                    .handle(&request("alice@example.org", submission(&format!("user{i}"), "pw")))
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), RegistrationReply::Success);
        }

        assert_eq!(controller.context().accounts().count().await.unwrap(), 1);
    }
}
