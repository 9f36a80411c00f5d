//! XMPP Extension Protocol implementations.

pub mod xep0004;
pub mod xep0077;
pub mod xep0092;
pub mod xep0199;
