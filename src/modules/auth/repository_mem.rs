use std::collections::HashMap;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::{
    api::error::{self, DbErrorMeta},
    modules::auth::{
        model::{AuthSession, AuthUser},
        repository::AuthProvider,
    },
};

struct StoredAccount {
    password: String,
    user: AuthUser,
}

/// In-memory auth provider double for tests. Passwords are kept verbatim;
/// this never leaves a test process.
pub struct MemoryAuthProvider {
    accounts: RwLock<HashMap<String, StoredAccount>>,
    session: RwLock<Option<AuthSession>>,
    sessions_tx: broadcast::Sender<Option<AuthUser>>,
}

impl MemoryAuthProvider {
    pub fn new() -> Self {
        let (sessions_tx, _) = broadcast::channel(16);
        Self {
            accounts: RwLock::new(HashMap::new()),
            session: RwLock::new(None),
            sessions_tx,
        }
    }

    /// Open a session for a user without going through sign-up, so tests
    /// can start in a signed-in state.
    pub async fn force_session(&self, user: AuthUser) {
        let session = AuthSession { user: user.clone(), access_token: "test-token".to_string() };
        *self.session.write().await = Some(session);
        let _ = self.sessions_tx.send(Some(user));
    }

    async fn set_session(&self, session: Option<AuthSession>) {
        let user = session.as_ref().map(|s| s.user.clone());
        *self.session.write().await = session;
        let _ = self.sessions_tx.send(user);
    }
}

impl Default for MemoryAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AuthProvider for MemoryAuthProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<AuthSession, error::SystemError> {
        let key = email.to_lowercase();
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&key) {
            return Err(error::SystemError::Conflict(Some(DbErrorMeta {
                code: Some("23505".to_string()),
                constraint: Some("accounts_email_key".to_string()),
                message: "duplicate key value in accounts".to_string(),
            })));
        }

        let user = AuthUser {
            id: Uuid::now_v7().to_string(),
            email: email.to_string(),
            email_verified: false,
            display_name: display_name.to_string(),
            avatar_url: None,
        };
        accounts.insert(key, StoredAccount { password: password.to_string(), user: user.clone() });
        drop(accounts);

        let session = AuthSession { user, access_token: "test-token".to_string() };
        self.set_session(Some(session.clone())).await;
        Ok(session)
    }

    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, error::SystemError> {
        let accounts = self.accounts.read().await;
        let account = accounts
            .get(&email.to_lowercase())
            .filter(|account| account.password == password)
            .ok_or_else(|| error::SystemError::unauthorized("Invalid email or password"))?;
        let session =
            AuthSession { user: account.user.clone(), access_token: "test-token".to_string() };
        drop(accounts);

        self.set_session(Some(session.clone())).await;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), error::SystemError> {
        self.set_session(None).await;
        Ok(())
    }

    async fn current_user(&self) -> Option<AuthUser> {
        self.session.read().await.as_ref().map(|s| s.user.clone())
    }

    async fn request_password_reset(&self, _email: &str) -> Result<(), error::SystemError> {
        Ok(())
    }

    async fn update_display_name(&self, display_name: &str) -> Result<(), error::SystemError> {
        let mut session = self.session.write().await;
        let Some(session) = session.as_mut() else {
            return Err(error::SystemError::unauthorized("Not signed in"));
        };
        session.user.display_name = display_name.to_string();
        Ok(())
    }

    async fn delete_account(&self) -> Result<(), error::SystemError> {
        let user = self
            .current_user()
            .await
            .ok_or_else(|| error::SystemError::unauthorized("Not signed in"))?;
        self.accounts.write().await.remove(&user.email.to_lowercase());
        self.set_session(None).await;
        Ok(())
    }

    fn subscribe_sessions(&self) -> broadcast::Receiver<Option<AuthUser>> {
        self.sessions_tx.subscribe()
    }
}
