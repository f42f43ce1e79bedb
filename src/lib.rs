//! Client-side data layer for the BlackNote social app.
//!
//! Maps a document-style API (references, queries, snapshots, realtime
//! watches) onto a relational backend, and builds the app's auth,
//! messaging, search, profile and storage flows on top of it. Every
//! backend boundary is a trait, injected at construction time; [`BlackNote`]
//! wires the production Postgres stack together.

use std::sync::Arc;

pub mod api;
pub mod configs;
pub mod constants;
pub mod modules;
pub mod utils;

#[cfg(test)]
mod test;

pub use api::error::SystemError;
pub use constants::Env;
pub use modules::auth::model::{AuthUser, SignInModel, SignUpModel};
pub use modules::chat::model::{direct_chat_id, ChatKind, MessageRecord};
pub use modules::chat::notify::{LogSink, NotificationSink, Notifier};
pub use modules::realtime::service::Subscription;
pub use modules::search::model::{PanelState, SearchOutcome};
pub use modules::store::model::{
    array_remove, array_union, limit, order_by, server_timestamp, where_filter, CollectionRef,
    DocumentRef, FieldUpdate, QueryRef,
};
pub use modules::store::schema::{DocumentSnapshot, QuerySnapshot};

use modules::{
    auth::{repository_pg::PgAuthProvider, service::AuthService},
    chat::service::ChatService,
    profile::service::ProfileService,
    realtime::{repository_pg::PgChangeFeed, service::SnapshotBridge},
    search::service::SearchService,
    storage::{repository_fs::FsObjectStore, service::StorageService},
    store::{repository_pg::PgTableStore, service::DocStore},
};

/// The assembled client against the Postgres-backed stack.
pub struct BlackNote {
    pub auth: AuthService<PgAuthProvider, PgTableStore, FsObjectStore>,
    pub profiles: ProfileService<PgTableStore, PgAuthProvider>,
    pub chat: ChatService<PgTableStore, PgChangeFeed, PgAuthProvider>,
    pub search: SearchService<PgTableStore, PgAuthProvider>,
    pub storage: Arc<StorageService<FsObjectStore>>,
    pub docs: DocStore<PgTableStore>,
    pub bridge: SnapshotBridge<PgTableStore, PgChangeFeed>,
    pub notifier: Arc<Notifier>,
}

impl BlackNote {
    /// Connect to the backend, apply migrations and wire every service.
    pub async fn connect(env: &Env) -> Result<Self, SystemError> {
        let pool = configs::connect_database(env).await?;
        configs::run_migrations(&pool).await?;

        let store = Arc::new(PgTableStore::new(pool.clone()));
        let feed = Arc::new(PgChangeFeed::connect(&pool).await?);
        let provider = Arc::new(PgAuthProvider::new(pool, env));
        let objects = Arc::new(FsObjectStore::new(
            env.storage_dir.clone(),
            env.storage_base_url.clone(),
        ));
        let storage = Arc::new(StorageService::with_defaults(objects));
        let notifier = Arc::new(Notifier::new(Arc::new(LogSink)));

        Ok(BlackNote {
            auth: AuthService::with_dependencies(
                Arc::clone(&provider),
                Arc::clone(&store),
                Arc::clone(&storage),
            ),
            profiles: ProfileService::with_dependencies(
                Arc::clone(&store),
                Arc::clone(&provider),
            ),
            chat: ChatService::with_dependencies(
                Arc::clone(&store),
                Arc::clone(&feed),
                Arc::clone(&provider),
                Arc::clone(&notifier),
            ),
            search: SearchService::with_dependencies(Arc::clone(&store), provider),
            storage,
            docs: DocStore::with_dependencies(Arc::clone(&store)),
            bridge: SnapshotBridge::with_dependencies(store, feed),
            notifier,
        })
    }

    /// Sign up and start the session-scoped global notification listener.
    pub async fn sign_up(&self, model: SignUpModel) -> Result<AuthUser, SystemError> {
        let user = self.auth.sign_up(model).await?;
        self.chat.start_global_notifications(&user.id).await?;
        Ok(user)
    }

    /// Log in and start the session-scoped global notification listener.
    pub async fn log_in(&self, model: SignInModel) -> Result<AuthUser, SystemError> {
        let user = self.auth.log_in(model).await?;
        self.chat.start_global_notifications(&user.id).await?;
        Ok(user)
    }

    /// Log out; notification state is torn down before the session closes.
    pub async fn log_out(&self) -> Result<(), SystemError> {
        self.notifier.clear();
        self.auth.log_out().await
    }
}
