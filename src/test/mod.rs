#![allow(dead_code)]

use std::sync::atomic::AtomicUsize;

use crate::modules::chat::notify::NotificationSink;

/// Cue sink that only counts, for asserting exactly when the sound fires.
pub struct CountingSink(pub AtomicUsize);

impl NotificationSink for CountingSink {
    fn cue(&self) {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod scenarios {
    use super::*;
    use std::sync::atomic::Ordering as AtomicOrdering;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::modules::{
        auth::{model::SignUpModel, repository_mem::MemoryAuthProvider, service::AuthService},
        chat::{model::direct_chat_id, notify::Notifier, service::ChatService},
        profile::service::ProfileService,
        search::{model::SearchOutcome, service::SearchService},
        storage::{repository_mem::MemoryObjectStore, service::StorageService},
        store::repository_mem::MemoryStore,
    };

    struct App {
        sink: Arc<CountingSink>,
        notifier: Arc<Notifier>,
        auth: AuthService<MemoryAuthProvider, MemoryStore, MemoryObjectStore>,
        profiles: ProfileService<MemoryStore, MemoryAuthProvider>,
        chat: ChatService<MemoryStore, MemoryStore, MemoryAuthProvider>,
        search: SearchService<MemoryStore, MemoryAuthProvider>,
    }

    fn app() -> App {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MemoryAuthProvider::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let notifier =
            Arc::new(Notifier::new(Arc::clone(&sink) as Arc<dyn NotificationSink>));

        App {
            sink,
            notifier: Arc::clone(&notifier),
            auth: AuthService::with_dependencies(
                Arc::clone(&provider),
                Arc::clone(&store),
                Arc::new(StorageService::with_defaults(objects)),
            ),
            profiles: ProfileService::with_dependencies(
                Arc::clone(&store),
                Arc::clone(&provider),
            ),
            chat: ChatService::with_dependencies(
                Arc::clone(&store),
                Arc::clone(&store),
                Arc::clone(&provider),
                notifier,
            ),
            search: SearchService::with_dependencies(Arc::clone(&store), provider),
        }
    }

    fn signup(email: &str, name: &str) -> SignUpModel {
        SignUpModel {
            email: email.to_string(),
            password: "secret1".to_string(),
            display_name: Some(name.to_string()),
        }
    }

    #[tokio::test]
    async fn two_users_befriend_message_and_search_each_other() {
        let app = app();

        let ann = app.auth.sign_up(signup("ann@x.com", "Ann")).await.unwrap();
        let bob = app.auth.sign_up(signup("bob@x.com", "Bob")).await.unwrap();
        // bob is signed in now; he requests ann, she accepts
        app.profiles.send_friend_request(&ann.id).await.unwrap();

        app.auth
            .log_in(crate::modules::auth::model::SignInModel {
                email: "ann@x.com".to_string(),
                password: "secret1".to_string(),
            })
            .await
            .unwrap();
        app.profiles.accept_friend_request(&bob.id).await.unwrap();
        assert_eq!(
            app.profiles.friends_list(&ann.id).await.unwrap(),
            vec![bob.id.clone()]
        );

        // ann, signed in, watches her global notifications
        app.chat.start_global_notifications(&ann.id).await.unwrap();
        let chat_id = direct_chat_id(&ann.id, &bob.id);
        app.chat.send_message(&chat_id, &bob.id, Some("hey Ann"), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // first observation of the chat sets a baseline only
        assert_eq!(app.sink.0.load(AtomicOrdering::SeqCst), 0);

        app.chat.send_message(&chat_id, &bob.id, Some("you there?"), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(app.sink.0.load(AtomicOrdering::SeqCst), 1);

        // friend search finds bob by name
        let outcome = app.search.search("bob").await;
        let SearchOutcome::Results(results) = outcome else {
            panic!("expected results, got {outcome:?}");
        };
        assert_eq!(results.users.len(), 1);
        assert_eq!(results.users[0].uid, bob.id);

        // logout tears the notification state down; nothing cues afterwards
        app.notifier.clear();
        app.auth.log_out().await.unwrap();
        app.chat.send_message(&chat_id, &bob.id, Some("gone"), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(app.sink.0.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn messages_list_in_ascending_order_across_sends() {
        let app = app();
        let ann = app.auth.sign_up(signup("ann@x.com", "Ann")).await.unwrap();
        let chat_id = direct_chat_id(&ann.id, "other");

        for text in ["one", "two", "three"] {
            app.chat.send_message(&chat_id, &ann.id, Some(text), None).await.unwrap();
        }

        let messages = app.chat.list_messages(&chat_id).await.unwrap();
        let texts: Vec<_> =
            messages.iter().map(|m| m.text.clone().unwrap_or_default()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }
}
