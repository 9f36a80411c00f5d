//! XHaunt gateway binary support: configuration, logging setup and the HTTP
//! credential verifier.

pub mod auth;
pub mod config;
pub mod telemetry;

pub use auth::HttpAuthVerifier;
pub use config::{load_config_from, load_config_from_str, Config, ConfigError};
