use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use validator::Validate;

use crate::{
    api::error,
    modules::{
        auth::{
            model::{AuthUser, SignInModel, SignUpModel},
            repository::AuthProvider,
        },
        realtime::service::Subscription,
        store::{
            model::{server_timestamp, to_document, DocumentRef},
            repository::TableStore,
            service::DocStore,
        },
        storage::{repository::ObjectStore, service::StorageService},
    },
};

pub type SessionCallback = Arc<dyn Fn(Option<AuthUser>) + Send + Sync>;

pub struct AuthService<P, S, O>
where
    P: AuthProvider + Send + Sync,
    S: TableStore + Send + Sync,
    O: ObjectStore + Send + Sync,
{
    provider: Arc<P>,
    docs: DocStore<S>,
    storage: Arc<StorageService<O>>,
}

impl<P, S, O> AuthService<P, S, O>
where
    P: AuthProvider + Send + Sync + 'static,
    S: TableStore + Send + Sync,
    O: ObjectStore + Send + Sync,
{
    pub fn with_dependencies(
        provider: Arc<P>,
        store: Arc<S>,
        storage: Arc<StorageService<O>>,
    ) -> Self {
        AuthService { provider, docs: DocStore::with_dependencies(store), storage }
    }

    /// Create the identity and its profile row. The username defaults to
    /// the local part of the email.
    pub async fn sign_up(&self, model: SignUpModel) -> Result<AuthUser, error::SystemError> {
        model.validate().map_err(|e| error::SystemError::bad_request(e.to_string()))?;
        let display_name = model.display_name.unwrap_or_default();

        let session = match self.provider.sign_up(&model.email, &model.password, &display_name).await
        {
            Err(error::SystemError::Conflict(meta)) => {
                log::warn!("Signup rejected: {}", error::conflict_message(&meta));
                return Err(error::SystemError::bad_request(
                    "This email is already registered. Please login instead.",
                ));
            }
            other => other?,
        };
        let user = session.user;

        let username = model.email.split('@').next().unwrap_or_default();
        let profile = to_document(&json!({
            "uid": user.id,
            "email": model.email,
            "name": display_name,
            "username": username,
            "pfp": null,
            "bio": "",
            "friends": [],
            "friend_requests": [],
            "created_at": server_timestamp(),
        }))?;
        self.docs.set_doc(&DocumentRef::new("users", &user.id), profile, false).await?;

        log::info!("Signup complete for {}", model.email);
        Ok(user)
    }

    pub async fn log_in(&self, model: SignInModel) -> Result<AuthUser, error::SystemError> {
        model.validate().map_err(|e| error::SystemError::bad_request(e.to_string()))?;
        let session = self.provider.sign_in(&model.email, &model.password).await?;
        Ok(session.user)
    }

    pub async fn log_out(&self) -> Result<(), error::SystemError> {
        self.provider.sign_out().await
    }

    pub async fn current_user(&self) -> Option<AuthUser> {
        self.provider.current_user().await
    }

    pub async fn reset_password(&self, email: &str) -> Result<(), error::SystemError> {
        if email.is_empty() {
            return Err(error::SystemError::bad_request("Email is required"));
        }
        self.provider.request_password_reset(email).await
    }

    /// The provider sends the verification mail as part of signup; there is
    /// nothing to re-trigger client-side.
    pub async fn resend_verification_email(&self) -> Result<(), error::SystemError> {
        Ok(())
    }

    /// Deliver the current session immediately, then every session change,
    /// always as the normalized user shape.
    pub async fn on_auth_state_changed(&self, callback: SessionCallback) -> Subscription {
        let mut sessions = self.provider.subscribe_sessions();
        callback(self.provider.current_user().await);

        let alive = Arc::new(AtomicBool::new(true));
        let task_alive = Arc::clone(&alive);
        let handle = tokio::spawn(async move {
            loop {
                match sessions.recv().await {
                    Ok(user) => {
                        if !task_alive.load(AtomicOrdering::SeqCst) {
                            break;
                        }
                        callback(user);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Session feed lagged, skipped {skipped} events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Subscription::new(alive, handle)
    }

    /// Delete the signed-in account. Profile row and storage folder are
    /// best-effort; removing the identity itself is the step that must not
    /// fail silently.
    pub async fn delete_current_account(&self) -> Result<(), error::SystemError> {
        let user = self
            .provider
            .current_user()
            .await
            .ok_or_else(|| error::SystemError::unauthorized("Not signed in"))?;

        if let Err(err) = self.docs.delete_doc(&DocumentRef::new("users", &user.id)).await {
            log::warn!("Failed to delete user profile (continuing): {err}");
        }
        if let Err(err) = self.storage.delete_user_folder(&user.id).await {
            log::warn!("Failed to delete user storage folder (continuing): {err}");
        }

        self.provider.delete_account().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{
        auth::repository_mem::MemoryAuthProvider,
        store::repository_mem::MemoryStore,
        storage::repository_mem::MemoryObjectStore,
    };
    use serde_json::json;

    type TestAuth = AuthService<MemoryAuthProvider, MemoryStore, MemoryObjectStore>;

    fn service() -> (Arc<MemoryAuthProvider>, Arc<MemoryStore>, Arc<MemoryObjectStore>, TestAuth) {
        let provider = Arc::new(MemoryAuthProvider::new());
        let store = Arc::new(MemoryStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let storage = Arc::new(StorageService::with_defaults(Arc::clone(&objects)));
        let auth =
            AuthService::with_dependencies(Arc::clone(&provider), Arc::clone(&store), storage);
        (provider, store, objects, auth)
    }

    fn signup_model(email: &str, password: &str, name: &str) -> SignUpModel {
        SignUpModel {
            email: email.to_string(),
            password: password.to_string(),
            display_name: Some(name.to_string()),
        }
    }

    #[tokio::test]
    async fn signup_creates_identity_and_profile() {
        let (_, store, _, auth) = service();
        let user = auth.sign_up(signup_model("a@x.com", "secret1", "Ann")).await.unwrap();

        assert_eq!(user.email, "a@x.com");
        assert_eq!(user.display_name, "Ann");

        let docs = DocStore::with_dependencies(store);
        let profile = docs.get_doc(&DocumentRef::new("users", &user.id)).await;
        let data = profile.data().unwrap();
        assert_eq!(data.get("username"), Some(&json!("a")));
        assert_eq!(data.get("bio"), Some(&json!("")));
        assert_eq!(data.get("friends"), Some(&json!([])));
        assert_eq!(data.get("uid"), Some(&json!(user.id)));
    }

    #[tokio::test]
    async fn duplicate_signup_is_reported_as_already_registered() {
        let (_, _, _, auth) = service();
        auth.sign_up(signup_model("a@x.com", "secret1", "Ann")).await.unwrap();

        let err = auth.sign_up(signup_model("a@x.com", "other99", "Ann")).await.unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[tokio::test]
    async fn bad_credentials_are_an_auth_error() {
        let (_, _, _, auth) = service();
        auth.sign_up(signup_model("a@x.com", "secret1", "Ann")).await.unwrap();
        auth.log_out().await.unwrap();

        let err = auth
            .log_in(SignInModel { email: "a@x.com".to_string(), password: "wrong99".to_string() })
            .await
            .unwrap_err();
        assert!(matches!(err, error::SystemError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn session_callback_sees_current_state_then_changes() {
        let (_, _, _, auth) = service();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let callback: SessionCallback = Arc::new(move |user| {
            tx.send(user).ok();
        });

        let _sub = auth.on_auth_state_changed(callback).await;
        assert_eq!(rx.recv().await.unwrap(), None);

        let user = auth.sign_up(signup_model("a@x.com", "secret1", "Ann")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Some(user));

        auth.log_out().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_account_sweeps_profile_and_storage() {
        let (provider, store, objects, auth) = service();
        let user = auth.sign_up(signup_model("a@x.com", "secret1", "Ann")).await.unwrap();

        objects.put(&format!("user_images/{}/pic.png", user.id), &[1]).await.unwrap();
        auth.delete_current_account().await.unwrap();

        assert!(provider.current_user().await.is_none());
        assert!(objects.is_empty());
        let docs = DocStore::with_dependencies(store);
        assert!(!docs.get_doc(&DocumentRef::new("users", &user.id)).await.exists());
    }
}
