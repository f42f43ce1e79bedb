use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::{
    api::error,
    constants::Env,
    modules::auth::{
        model::{AuthSession, AuthUser},
        repository::AuthProvider,
        schema::AccountEntity,
    },
    utils::{hash_password, verify_password, Claims, TypeClaims},
};

/// Password auth against the `accounts` table, with HS256 session tokens.
///
/// Reset-token delivery (mail) happens out of process; this provider only
/// issues and logs the token.
pub struct PgAuthProvider {
    pool: sqlx::PgPool,
    jwt_secret: String,
    access_token_expiration: u64,
    reset_token_expiration: u64,
    session: RwLock<Option<AuthSession>>,
    sessions_tx: broadcast::Sender<Option<AuthUser>>,
}

impl PgAuthProvider {
    pub fn new(pool: sqlx::PgPool, env: &Env) -> Self {
        let (sessions_tx, _) = broadcast::channel(16);
        Self {
            pool,
            jwt_secret: env.jwt_secret.clone(),
            access_token_expiration: env.access_token_expiration,
            reset_token_expiration: env.reset_token_expiration,
            session: RwLock::new(None),
            sessions_tx,
        }
    }

    async fn set_session(&self, session: Option<AuthSession>) {
        let user = session.as_ref().map(|s| s.user.clone());
        *self.session.write().await = session;
        // nobody listening is fine
        let _ = self.sessions_tx.send(user);
    }

    fn issue_access_token(&self, account_id: &Uuid) -> Result<String, error::SystemError> {
        Claims::new(account_id, self.access_token_expiration)
            .with_type(TypeClaims::AccessToken)
            .encode(self.jwt_secret.as_ref())
    }

    async fn open_session(
        &self,
        entity: AccountEntity,
    ) -> Result<AuthSession, error::SystemError> {
        let access_token = self.issue_access_token(&entity.id)?;
        let session = AuthSession { user: AuthUser::from(entity), access_token };
        self.set_session(Some(session.clone())).await;
        Ok(session)
    }
}

#[async_trait::async_trait]
impl AuthProvider for PgAuthProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<AuthSession, error::SystemError> {
        let hash_password = hash_password(password)?;
        let id = Uuid::now_v7();

        let entity = sqlx::query_as::<_, AccountEntity>(
            "INSERT INTO accounts (id, email, hash_password, display_name) \
             VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(id)
        .bind(email)
        .bind(&hash_password)
        .bind(display_name)
        .fetch_one(&self.pool)
        .await?;

        log::info!("Account created for {email}");
        self.open_session(entity).await
    }

    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, error::SystemError> {
        let entity = sqlx::query_as::<_, AccountEntity>(
            "SELECT * FROM accounts WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| error::SystemError::unauthorized("Invalid email or password"))?;

        let valid = verify_password(&entity.hash_password, password)?;
        if !valid {
            return Err(error::SystemError::unauthorized("Invalid email or password"));
        }

        log::info!("Login successful for {email}");
        self.open_session(entity).await
    }

    async fn sign_out(&self) -> Result<(), error::SystemError> {
        self.set_session(None).await;
        log::info!("Signed out");
        Ok(())
    }

    async fn current_user(&self) -> Option<AuthUser> {
        self.session.read().await.as_ref().map(|s| s.user.clone())
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), error::SystemError> {
        let entity = sqlx::query_as::<_, AccountEntity>(
            "SELECT * FROM accounts WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        // never reveal whether the address exists
        let Some(entity) = entity else {
            log::warn!("Password reset requested for unknown email");
            return Ok(());
        };

        let jti = Uuid::now_v7();
        let token = Claims::new(&entity.id, self.reset_token_expiration)
            .with_jti(jti)
            .with_type(TypeClaims::ResetToken)
            .encode(self.jwt_secret.as_ref())?;
        log::info!("Password reset token {jti} issued for account {} ({} chars)", entity.id, token.len());
        Ok(())
    }

    async fn update_display_name(&self, display_name: &str) -> Result<(), error::SystemError> {
        let mut session = self.session.write().await;
        let Some(session) = session.as_mut() else {
            return Err(error::SystemError::unauthorized("Not signed in"));
        };
        let id = Uuid::parse_str(&session.user.id)
            .map_err(|e| error::SystemError::InternalError(Box::new(e)))?;

        sqlx::query("UPDATE accounts SET display_name = $2 WHERE id = $1")
            .bind(id)
            .bind(display_name)
            .execute(&self.pool)
            .await?;
        session.user.display_name = display_name.to_string();
        Ok(())
    }

    async fn delete_account(&self) -> Result<(), error::SystemError> {
        let user = self
            .current_user()
            .await
            .ok_or_else(|| error::SystemError::unauthorized("Not signed in"))?;
        let id = Uuid::parse_str(&user.id)
            .map_err(|e| error::SystemError::InternalError(Box::new(e)))?;

        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.set_session(None).await;
        log::info!("Account {id} deleted");
        Ok(())
    }

    fn subscribe_sessions(&self) -> broadcast::Receiver<Option<AuthUser>> {
        self.sessions_tx.subscribe()
    }
}
