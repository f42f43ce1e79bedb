use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::{
    api::error,
    modules::{
        auth::repository::AuthProvider,
        chat::{
            model::{
                direct_participants, is_direct_chat_id, ChatKind, ChatRecord, MessageRecord,
            },
            notify::{Notifier, TimeAdvance},
        },
        realtime::{
            events::ChangeOp,
            repository::ChangeFeed,
            service::{ErrorCallback, QueryCallback, SnapshotBridge, Subscription},
        },
        store::{
            model::{
                from_document, limit, order_by, server_timestamp, to_document, CollectionRef,
                Constraint, DocumentRef, FieldUpdate, Filter, QueryRef,
            },
            repository::TableStore,
            schema::QuerySnapshot,
            service::DocStore,
        },
    },
    utils::with_backoff,
};

pub type MessagesCallback = Arc<dyn Fn(Vec<MessageRecord>) + Send + Sync>;

fn parse_messages(snapshot: &QuerySnapshot) -> Vec<MessageRecord> {
    snapshot
        .iter()
        .filter_map(|doc| match doc.data() {
            Some(data) => match from_document::<MessageRecord>(data.clone()) {
                Ok(message) => Some(message),
                Err(err) => {
                    log::error!("Skipping malformed message {}: {err}", doc.id());
                    None
                }
            },
            None => None,
        })
        .collect()
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).ok().map(|t| t.with_timezone(&Utc))
}

pub struct ChatService<S, F, P>
where
    S: TableStore + Send + Sync + 'static,
    F: ChangeFeed + Send + Sync,
    P: AuthProvider + Send + Sync,
{
    store: Arc<S>,
    docs: DocStore<S>,
    bridge: SnapshotBridge<S, F>,
    feed: Arc<F>,
    provider: Arc<P>,
    notifier: Arc<Notifier>,
}

impl<S, F, P> ChatService<S, F, P>
where
    S: TableStore + Send + Sync + 'static,
    F: ChangeFeed + Send + Sync,
    P: AuthProvider + Send + Sync,
{
    pub fn with_dependencies(
        store: Arc<S>,
        feed: Arc<F>,
        provider: Arc<P>,
        notifier: Arc<Notifier>,
    ) -> Self {
        ChatService {
            docs: DocStore::with_dependencies(Arc::clone(&store)),
            bridge: SnapshotBridge::with_dependencies(Arc::clone(&store), Arc::clone(&feed)),
            store,
            feed,
            provider,
            notifier,
        }
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    fn messages_collection(chat_id: &str) -> CollectionRef {
        CollectionRef::nested("chats", chat_id, "messages")
    }

    fn messages_query(chat_id: &str) -> QueryRef {
        Self::messages_collection(chat_id).query(vec![order_by("timestamp", "asc")])
    }

    /// Create the chat row if it is missing. The check and the insert are
    /// separate round trips; when a concurrent caller wins the race the
    /// primary-key conflict is treated as "already exists", which keeps the
    /// operation idempotent for the deterministic direct-message ids.
    pub async fn ensure_chat_exists(
        &self,
        chat_id: &str,
        participants: Vec<String>,
        kind: ChatKind,
        group_name: Option<String>,
    ) -> Result<String, error::SystemError> {
        if chat_id.is_empty() {
            return Err(error::SystemError::bad_request("Missing chat id"));
        }

        let existing = self.docs.get_doc(&DocumentRef::new("chats", chat_id)).await;
        if existing.exists() {
            return Ok(chat_id.to_string());
        }

        let record = ChatRecord {
            id: chat_id.to_string(),
            kind,
            participants,
            name: group_name.filter(|_| kind == ChatKind::Group),
            created_at: server_timestamp(),
            last_message: None,
            last_message_time: None,
        };

        match self.store.insert("chats", to_document(&record)?).await {
            Ok(_) => {
                log::info!("Chat created: {chat_id}");
                Ok(chat_id.to_string())
            }
            Err(err) if err.is_conflict() => {
                log::info!("Chat {chat_id} already exists");
                Ok(chat_id.to_string())
            }
            Err(err) => Err(err),
        }
    }

    /// Insert a message and refresh the chat's last-message cache used by
    /// list views. Creates the chat first when needed, deriving direct
    /// participants from the `dm_` id.
    pub async fn send_message(
        &self,
        chat_id: &str,
        sender: &str,
        text: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<String, error::SystemError> {
        if chat_id.is_empty() {
            return Err(error::SystemError::bad_request("Missing chat id"));
        }
        if sender.is_empty() {
            return Err(error::SystemError::bad_request("Missing sender id"));
        }

        let participants =
            direct_participants(chat_id).unwrap_or_else(|| vec![sender.to_string()]);
        let kind = if is_direct_chat_id(chat_id) { ChatKind::Direct } else { ChatKind::Group };
        self.ensure_chat_exists(chat_id, participants, kind, None).await?;

        let message = to_document(&json!({
            "sender": sender,
            "text": text,
            "image_url": image_url,
            "timestamp": server_timestamp(),
        }))?;
        let message_id =
            self.docs.add_doc(&Self::messages_collection(chat_id), message).await?;

        let preview = match text {
            Some(t) if !t.is_empty() => t,
            _ => "Photo",
        };
        self.docs
            .update_doc(
                &DocumentRef::new("chats", chat_id),
                vec![
                    ("last_message".to_string(), FieldUpdate::Set(json!(preview))),
                    ("last_message_time".to_string(), FieldUpdate::Set(json!(server_timestamp()))),
                ],
            )
            .await?;

        Ok(message_id)
    }

    /// All messages of a chat in ascending timestamp order.
    pub async fn list_messages(
        &self,
        chat_id: &str,
    ) -> Result<Vec<MessageRecord>, error::SystemError> {
        let snapshot = self.docs.get_docs(&Self::messages_query(chat_id)).await?;
        Ok(parse_messages(&snapshot))
    }

    /// Watch a chat's message list. Each delivery carries the full list in
    /// ascending order; the notification cue fires once per growth event
    /// when the newest message is from someone other than the viewer.
    ///
    /// The viewer is the user signed in at subscribe time.
    pub async fn subscribe_to_chat(
        &self,
        chat_id: &str,
        on_update: MessagesCallback,
        on_error: Option<ErrorCallback>,
    ) -> Result<Subscription, error::SystemError> {
        self.notifier.init_chat(chat_id);
        let viewer = self.provider.current_user().await.map(|u| u.id);

        let notifier = Arc::clone(&self.notifier);
        let chat = chat_id.to_string();
        let callback: QueryCallback = Arc::new(move |snapshot: QuerySnapshot| {
            let messages = parse_messages(&snapshot);
            let newest_sender = messages.last().map(|m| m.sender.clone());
            notifier.note_messages(
                &chat,
                messages.len(),
                newest_sender.as_deref(),
                viewer.as_deref(),
            );
            on_update(messages);
        });

        self.bridge.watch_query(&Self::messages_query(chat_id), callback, on_error).await
    }

    /// Watch every chat the user participates in and cue on messages
    /// arriving outside the open chat view. Baselines are recorded first so
    /// the initial state never cues; only a last-message time advancing
    /// past its baseline does, and only when the newest message is from
    /// someone else.
    pub async fn start_global_notifications(
        &self,
        user_id: &str,
    ) -> Result<(), error::SystemError> {
        if user_id.is_empty() {
            log::warn!("Cannot start global notifications: no user id");
            return Ok(());
        }

        self.notifier.stop_global();

        let chats_query = CollectionRef::new("chats")
            .query(vec![Constraint::Where(Filter::contains("participants", user_id))]);
        match self.docs.get_docs(&chats_query).await {
            Ok(snapshot) => {
                for doc in snapshot.iter() {
                    let Some(data) = doc.data() else { continue };
                    if let Ok(chat) = from_document::<ChatRecord>(data.clone()) {
                        if let Some(time) =
                            chat.last_message_time.as_deref().and_then(parse_rfc3339)
                        {
                            self.notifier.record_time(&chat.id, time);
                        }
                    }
                }
                log::info!("Global notifications initialized for user {user_id}");
            }
            // keep subscribing; baselines fill in as updates arrive
            Err(err) => log::error!("Error initializing global notifications: {err}"),
        }

        let mut feed_sub = self
            .feed
            .subscribe("chats", Some(Filter::contains("participants", user_id)))
            .await?;

        let alive = Arc::new(AtomicBool::new(true));
        let task_alive = Arc::clone(&alive);
        let docs = self.docs.clone();
        let notifier = Arc::clone(&self.notifier);
        let user = user_id.to_string();

        let handle = tokio::spawn(async move {
            while let Some(event) = feed_sub.next_event().await {
                if !task_alive.load(AtomicOrdering::SeqCst) {
                    break;
                }
                if event.op != ChangeOp::Update {
                    continue;
                }
                let Some(doc) = &event.doc else { continue };
                let chat = match from_document::<ChatRecord>(doc.clone()) {
                    Ok(chat) => chat,
                    Err(err) => {
                        tracing::warn!("Ignoring malformed chat update: {err}");
                        continue;
                    }
                };
                let Some(time) = chat.last_message_time.as_deref().and_then(parse_rfc3339)
                else {
                    continue;
                };

                match notifier.observe_time(&chat.id, time) {
                    TimeAdvance::First | TimeAdvance::Stale => {}
                    TimeAdvance::Advanced => {
                        let newest_query = Self::messages_collection(&chat.id)
                            .query(vec![order_by("timestamp", "desc"), limit(1)]);
                        match with_backoff("newest message fetch", 3, || {
                            docs.get_docs(&newest_query)
                        })
                        .await
                        {
                            Ok(snapshot) => {
                                if let Some(newest) = parse_messages(&snapshot).first() {
                                    if newest.sender != user {
                                        notifier.cue();
                                        tracing::debug!(
                                            "Notification cued for chat {}",
                                            chat.id
                                        );
                                    }
                                }
                            }
                            Err(err) => {
                                tracing::error!("Error checking notification: {err}");
                            }
                        }
                    }
                }
            }
        });

        self.notifier.set_global(Subscription::new(alive, handle));
        Ok(())
    }

    pub fn stop_global_notifications(&self) {
        self.notifier.stop_global();
    }
}
