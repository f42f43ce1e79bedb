use tokio::sync::broadcast;

use crate::{
    api::error,
    modules::auth::model::{AuthSession, AuthUser},
};

/// Authentication boundary of the hosted backend: password-based identity
/// plus a session-change feed. The session event is `Some(user)` on
/// sign-in/sign-up and `None` on sign-out.
#[async_trait::async_trait]
pub trait AuthProvider {
    /// Create an identity and open a session for it. An existing email is
    /// a `Conflict` (the provider-specific "already registered" signal).
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<AuthSession, error::SystemError>;

    async fn sign_in(&self, email: &str, password: &str)
        -> Result<AuthSession, error::SystemError>;

    async fn sign_out(&self) -> Result<(), error::SystemError>;

    async fn current_user(&self) -> Option<AuthUser>;

    async fn request_password_reset(&self, email: &str) -> Result<(), error::SystemError>;

    /// Best-effort metadata sync; profile updates mirror the display name
    /// into the identity record.
    async fn update_display_name(&self, display_name: &str) -> Result<(), error::SystemError>;

    /// Remove the signed-in identity on the provider side and close the
    /// session.
    async fn delete_account(&self) -> Result<(), error::SystemError>;

    fn subscribe_sessions(&self) -> broadcast::Receiver<Option<AuthUser>>;
}
