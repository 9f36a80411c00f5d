//! Reply delivery and post-registration presence subscription.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::registration::{
    RegistrationController, RegistrationError, RegistrationReply, RegistrationRequest,
};
use crate::{PresenceNotifier, XmppError};

/// Where the reply to one request goes.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn deliver(&self, reply: &RegistrationReply) -> Result<(), XmppError>;
}

/// Runs a request through the controller, sends the reply, and subscribes
/// to the requester's presence after a successful registration.
pub struct ProvisioningFlow {
    controller: Arc<RegistrationController>,
    presence: Arc<dyn PresenceNotifier>,
}

impl ProvisioningFlow {
    pub fn new(controller: Arc<RegistrationController>, presence: Arc<dyn PresenceNotifier>) -> Self {
        Self {
            controller,
            presence,
        }
    }

    pub fn controller(&self) -> &Arc<RegistrationController> {
        &self.controller
    }

    /// Handle `request` end to end.
    ///
    /// The subscription is requested only after the `Success` reply to a
    /// form submission has been handed to `sink`. A storage failure leaves
    /// the request unanswered.
    #[instrument(skip_all, fields(address = %request.requester()))]
    pub async fn process(
        &self,
        request: RegistrationRequest,
        sink: &dyn ReplySink,
    ) -> Result<RegistrationReply, RegistrationError> {
        let reply = self.controller.handle(&request).await?;

        if let Err(e) = sink.deliver(&reply).await {
            warn!(error = %e, "Registration reply not delivered");
            return Err(RegistrationError::Delivery(e.to_string()));
        }

        if request.is_submission() && reply == RegistrationReply::Success {
            debug!("Requesting presence subscription");
            self.presence.subscribe(request.requester()).await;
        }

        Ok(reply)
    }
}
