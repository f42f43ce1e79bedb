use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use sqlx::postgres::PgListener;

use crate::{
    api::error,
    modules::{
        realtime::{
            events::ChangeEvent,
            repository::{ChangeFeed, FeedRegistry, FeedSubscription},
        },
        store::model::Filter,
    },
};

/// NOTIFY channel the row triggers publish on (see migrations).
const CHANNEL: &str = "doc_changes";

/// Change feed backed by Postgres LISTEN/NOTIFY.
///
/// A single listener connection consumes the `doc_changes` channel and a
/// pump task fans events out to per-subscriber channels. `PgListener`
/// re-establishes its connection after errors; notifications raised while
/// disconnected are lost, which matches the at-most-once delivery of the
/// hosted feed this mirrors.
pub struct PgChangeFeed {
    registry: Arc<FeedRegistry>,
    pump: tokio::task::JoinHandle<()>,
}

impl PgChangeFeed {
    pub async fn connect(pool: &sqlx::PgPool) -> Result<Self, error::SystemError> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(CHANNEL).await?;

        let registry = FeedRegistry::new();
        let dispatch_to = Arc::clone(&registry);

        let pump = tokio::spawn(async move {
            let mut stream = listener.into_stream();
            loop {
                match stream.next().await {
                    Some(Ok(notification)) => {
                        match serde_json::from_str::<ChangeEvent>(notification.payload()) {
                            Ok(event) => dispatch_to.dispatch(&event),
                            Err(err) => {
                                tracing::warn!("Discarding malformed change payload: {err}");
                            }
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!("Change feed connection error, will resume: {err}");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                    None => {
                        tracing::info!("Change feed stream closed");
                        break;
                    }
                }
            }
        });

        Ok(PgChangeFeed { registry, pump })
    }
}

impl Drop for PgChangeFeed {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[async_trait::async_trait]
impl ChangeFeed for PgChangeFeed {
    async fn subscribe(
        &self,
        table: &str,
        filter: Option<Filter>,
    ) -> Result<FeedSubscription, error::SystemError> {
        tracing::debug!("New feed subscription on '{table}'");
        Ok(Arc::clone(&self.registry).register(table, filter))
    }
}
