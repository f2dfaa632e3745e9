pub mod client;
pub mod error;
pub mod models;
pub mod www_authenticate;

pub use client::HttpRegistryClient;
pub use error::LoginError;
pub use models::{AuthFlow, Credentials, LoginAttempt, LoginTarget};

use async_trait::async_trait;

/// Performs a live login against a remote container registry
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Authenticate against the registry described by `target`
    ///
    /// Must finish within the client's deadline. The result is transient and
    /// is never written anywhere by the implementation.
    async fn verify_login(&self, target: &LoginTarget) -> Result<LoginAttempt, LoginError>;
}
