use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::modules::{
    auth::repository::AuthProvider,
    search::model::{
        PanelState, PostHit, SearchOutcome, SearchResults, UserHit, DEBOUNCE,
        MAX_RESULTS_PER_CATEGORY, MIN_QUERY_LEN, POST_PREVIEW_CHARS,
    },
    store::{
        model::{CollectionRef, Constraint, Document, DocumentRef, Filter},
        repository::TableStore,
        service::DocStore,
    },
};

/// Field aliases older post records used for their text, probed in order.
const POST_TEXT_FIELDS: &[&str] = &["text", "content", "body", "message"];

fn string_field(doc: &Document, field: &str) -> String {
    doc.get(field).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn post_text(doc: &Document) -> String {
    POST_TEXT_FIELDS
        .iter()
        .map(|field| string_field(doc, field))
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

fn truncate_preview(text: &str) -> String {
    if text.chars().count() <= POST_PREVIEW_CHARS {
        return text.to_string();
    }
    let mut preview: String = text.chars().take(POST_PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}

/// Case-insensitive substring search over the signed-in user's friends and
/// their posts. Everything is fetched in bulk and matched client-side; the
/// backend only narrows to the friend set.
pub struct SearchService<S, P>
where
    S: TableStore + Send + Sync,
    P: AuthProvider + Send + Sync,
{
    docs: DocStore<S>,
    provider: Arc<P>,
}

impl<S, P> SearchService<S, P>
where
    S: TableStore + Send + Sync,
    P: AuthProvider + Send + Sync,
{
    pub fn with_dependencies(store: Arc<S>, provider: Arc<P>) -> Self {
        SearchService { docs: DocStore::with_dependencies(store), provider }
    }

    pub async fn search(&self, term: &str) -> SearchOutcome {
        let term = term.trim();
        if term.chars().count() < MIN_QUERY_LEN {
            return SearchOutcome::TooShort;
        }

        let Some(user) = self.provider.current_user().await else {
            return SearchOutcome::Failed("Please sign in to search".to_string());
        };

        let profile = self.docs.get_doc(&DocumentRef::new("users", &user.id)).await;
        let Some(profile) = profile.into_data() else {
            return SearchOutcome::Failed("Error loading your profile".to_string());
        };
        let friends: Vec<Value> = profile
            .get("friends")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if friends.is_empty() {
            return SearchOutcome::NoFriends;
        }

        let needle = term.to_lowercase();
        let mut results = SearchResults::default();

        // friends whose username or display name matches
        let users_query = CollectionRef::new("users")
            .query(vec![Constraint::Where(Filter::any_of("uid", friends.clone()))]);
        match self.docs.get_docs(&users_query).await {
            Ok(snapshot) => {
                for doc in snapshot.iter() {
                    let Some(data) = doc.data() else { continue };
                    let username = string_field(data, "username");
                    let name = string_field(data, "name");
                    if username.to_lowercase().contains(&needle)
                        || name.to_lowercase().contains(&needle)
                    {
                        results.users.push(UserHit {
                            uid: string_field(data, "uid"),
                            username,
                            name,
                            avatar_url: data
                                .get("pfp")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                        });
                    }
                }
            }
            Err(err) => log::error!("Error fetching users: {err}"),
        }
        results.users.truncate(MAX_RESULTS_PER_CATEGORY);

        // friends' posts whose text matches, whichever legacy field holds it
        let posts_query = CollectionRef::new("posts")
            .query(vec![Constraint::Where(Filter::any_of("author", friends))]);
        let mut matched_posts: Vec<(String, String, String)> = Vec::new();
        match self.docs.get_docs(&posts_query).await {
            Ok(snapshot) => {
                for doc in snapshot.iter() {
                    let Some(data) = doc.data() else { continue };
                    let text = post_text(data);
                    if !text.is_empty() && text.to_lowercase().contains(&needle) {
                        matched_posts.push((
                            doc.id().to_string(),
                            string_field(data, "author"),
                            text,
                        ));
                    }
                }
            }
            Err(err) => log::error!("Error fetching posts: {err}"),
        }
        matched_posts.truncate(MAX_RESULTS_PER_CATEGORY);

        for (id, author_id, text) in matched_posts {
            let author = self.docs.get_doc(&DocumentRef::new("users", &author_id)).await;
            let (author_name, author_username, author_avatar) = match author.data() {
                Some(data) => {
                    let username = string_field(data, "username");
                    let name = string_field(data, "name");
                    let display = if !name.is_empty() { name } else { username.clone() };
                    (
                        if display.is_empty() { "Unknown".to_string() } else { display },
                        if username.is_empty() { "unknown".to_string() } else { username },
                        data.get("pfp").and_then(Value::as_str).map(str::to_string),
                    )
                }
                None => ("Unknown".to_string(), "unknown".to_string(), None),
            };
            results.posts.push(PostHit {
                id,
                author_id,
                author_name,
                author_username,
                author_avatar,
                text: truncate_preview(&text),
            });
        }

        SearchOutcome::Results(results)
    }
}

/// Debounced input driver for the search box: re-triggers the search 300 ms
/// after the last keystroke, hides the panel below the minimum length, and
/// keeps the last outcome around for focus-reopen.
pub struct SearchBox<S, P>
where
    S: TableStore + Send + Sync + 'static,
    P: AuthProvider + Send + Sync + 'static,
{
    service: Arc<SearchService<S, P>>,
    on_panel: Arc<dyn Fn(PanelState) + Send + Sync>,
    generation: Arc<AtomicU64>,
    last: Arc<Mutex<Option<SearchOutcome>>>,
    debounce: Duration,
}

impl<S, P> SearchBox<S, P>
where
    S: TableStore + Send + Sync + 'static,
    P: AuthProvider + Send + Sync + 'static,
{
    pub fn new(
        service: Arc<SearchService<S, P>>,
        on_panel: Arc<dyn Fn(PanelState) + Send + Sync>,
    ) -> Self {
        Self::with_debounce(service, on_panel, DEBOUNCE)
    }

    pub fn with_debounce(
        service: Arc<SearchService<S, P>>,
        on_panel: Arc<dyn Fn(PanelState) + Send + Sync>,
        debounce: Duration,
    ) -> Self {
        SearchBox {
            service,
            on_panel,
            generation: Arc::new(AtomicU64::new(0)),
            last: Arc::new(Mutex::new(None)),
            debounce,
        }
    }

    /// Keystroke. Bumping the generation cancels any pending or in-flight
    /// search; a stale result is dropped instead of rendered.
    pub fn input(&self, term: &str) {
        let generation = self.generation.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let term = term.trim().to_string();

        if term.chars().count() < MIN_QUERY_LEN {
            (self.on_panel)(PanelState::Hidden);
            return;
        }

        let service = Arc::clone(&self.service);
        let on_panel = Arc::clone(&self.on_panel);
        let generations = Arc::clone(&self.generation);
        let last = Arc::clone(&self.last);
        let debounce = self.debounce;

        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if generations.load(AtomicOrdering::SeqCst) != generation {
                return;
            }
            let outcome = service.search(&term).await;
            if generations.load(AtomicOrdering::SeqCst) != generation {
                return;
            }
            *last.lock().unwrap_or_else(|e| e.into_inner()) = Some(outcome.clone());
            on_panel(PanelState::Open(outcome));
        });
    }

    /// Focus reopens the panel when there is something to show.
    pub fn focus(&self) {
        let last = self.last.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(outcome) = last {
            (self.on_panel)(PanelState::Open(outcome));
        }
    }

    /// Click outside the search container.
    pub fn dismiss(&self) {
        (self.on_panel)(PanelState::Hidden);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{
        auth::{model::AuthUser, repository_mem::MemoryAuthProvider},
        store::{model::to_document, repository_mem::MemoryStore},
    };
    use serde_json::json;

    type TestSearch = SearchService<MemoryStore, MemoryAuthProvider>;

    struct Fixture {
        store: Arc<MemoryStore>,
        provider: Arc<MemoryAuthProvider>,
        search: Arc<TestSearch>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MemoryAuthProvider::new());
        let search = Arc::new(SearchService::with_dependencies(
            Arc::clone(&store),
            Arc::clone(&provider),
        ));
        Fixture { store, provider, search }
    }

    async fn seed_user(f: &Fixture, uid: &str, username: &str, name: &str, friends: Vec<&str>) {
        let docs = DocStore::with_dependencies(Arc::clone(&f.store));
        docs.set_doc(
            &DocumentRef::new("users", uid),
            to_document(&json!({
                "uid": uid, "username": username, "name": name,
                "pfp": null, "bio": "", "friends": friends,
            }))
            .unwrap(),
            false,
        )
        .await
        .unwrap();
    }

    async fn seed_post(f: &Fixture, author: &str, field: &str, text: &str) {
        let docs = DocStore::with_dependencies(Arc::clone(&f.store));
        docs.add_doc(
            &CollectionRef::new("posts"),
            to_document(&json!({"author": author, field: text})).unwrap(),
        )
        .await
        .unwrap();
    }

    async fn sign_in(f: &Fixture, uid: &str) {
        f.provider
            .force_session(AuthUser {
                id: uid.to_string(),
                email: format!("{uid}@x.com"),
                email_verified: false,
                display_name: uid.to_string(),
                avatar_url: None,
            })
            .await;
    }

    #[tokio::test]
    async fn short_terms_never_touch_the_backend() {
        let f = fixture();
        sign_in(&f, "u1").await;
        assert_eq!(f.search.search("a").await, SearchOutcome::TooShort);
        assert_eq!(f.search.search("  x  ").await, SearchOutcome::TooShort);
        assert_eq!(f.store.query_count("users"), 0);
        assert_eq!(f.store.query_count("posts"), 0);
    }

    #[tokio::test]
    async fn no_friends_short_circuits_before_any_bulk_fetch() {
        let f = fixture();
        seed_user(&f, "u1", "ann", "Ann", vec![]).await;
        sign_in(&f, "u1").await;

        assert_eq!(f.search.search("ann").await, SearchOutcome::NoFriends);
        assert_eq!(f.store.query_count("users"), 0);
        assert_eq!(f.store.query_count("posts"), 0);
    }

    #[tokio::test]
    async fn signed_out_search_fails_inline() {
        let f = fixture();
        match f.search.search("ann").await {
            SearchOutcome::Failed(message) => assert!(message.contains("sign in")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn matches_friends_and_their_posts_case_insensitively() {
        let f = fixture();
        seed_user(&f, "u1", "me", "Me", vec!["u2", "u3"]).await;
        seed_user(&f, "u2", "bobcat", "Bob", vec![]).await;
        seed_user(&f, "u3", "carol", "Carol", vec![]).await;
        // u4 is not a friend and must never surface
        seed_user(&f, "u4", "bobby", "Bobby", vec![]).await;
        seed_post(&f, "u2", "text", "BOB's big announcement").await;
        seed_post(&f, "u3", "content", "nothing relevant").await;
        seed_post(&f, "u4", "text", "bob from a stranger").await;
        sign_in(&f, "u1").await;

        let outcome = f.search.search("bob").await;
        let SearchOutcome::Results(results) = outcome else {
            panic!("expected results, got {outcome:?}");
        };

        assert_eq!(results.users.len(), 1);
        assert_eq!(results.users[0].uid, "u2");

        assert_eq!(results.posts.len(), 1);
        assert_eq!(results.posts[0].author_id, "u2");
        assert_eq!(results.posts[0].author_name, "Bob");
        assert!(results.posts[0].text.contains("announcement"));
    }

    #[tokio::test]
    async fn post_text_falls_back_through_legacy_fields() {
        let f = fixture();
        seed_user(&f, "u1", "me", "Me", vec!["u2"]).await;
        seed_user(&f, "u2", "bob", "Bob", vec![]).await;
        seed_post(&f, "u2", "body", "hidden treasure").await;
        seed_post(&f, "u2", "message", "buried treasure").await;
        sign_in(&f, "u1").await;

        let SearchOutcome::Results(results) = f.search.search("treasure").await else {
            panic!("expected results");
        };
        assert_eq!(results.posts.len(), 2);
    }

    #[tokio::test]
    async fn results_cap_at_five_per_category() {
        let f = fixture();
        let friends: Vec<String> = (0..8).map(|i| format!("f{i}")).collect();
        seed_user(&f, "u1", "me", "Me", friends.iter().map(String::as_str).collect()).await;
        for friend in &friends {
            seed_user(&f, friend, &format!("sam_{friend}"), "Sam", vec![]).await;
            seed_post(&f, friend, "text", "sam says hello").await;
        }
        sign_in(&f, "u1").await;

        let SearchOutcome::Results(results) = f.search.search("sam").await else {
            panic!("expected results");
        };
        assert_eq!(results.users.len(), MAX_RESULTS_PER_CATEGORY);
        assert_eq!(results.posts.len(), MAX_RESULTS_PER_CATEGORY);
    }

    #[tokio::test]
    async fn long_post_text_is_truncated_in_the_preview() {
        let f = fixture();
        seed_user(&f, "u1", "me", "Me", vec!["u2"]).await;
        seed_user(&f, "u2", "bob", "Bob", vec![]).await;
        let long = format!("needle {}", "x".repeat(200));
        seed_post(&f, "u2", "text", &long).await;
        sign_in(&f, "u1").await;

        let SearchOutcome::Results(results) = f.search.search("needle").await else {
            panic!("expected results");
        };
        assert_eq!(results.posts[0].text.chars().count(), POST_PREVIEW_CHARS + 3);
        assert!(results.posts[0].text.ends_with("..."));
    }

    #[tokio::test]
    async fn debounce_coalesces_rapid_keystrokes() {
        let f = fixture();
        seed_user(&f, "u1", "me", "Me", vec!["u2"]).await;
        seed_user(&f, "u2", "bob", "Bob", vec![]).await;
        sign_in(&f, "u1").await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let on_panel: Arc<dyn Fn(PanelState) + Send + Sync> = Arc::new(move |state| {
            tx.send(state).ok();
        });
        let search_box = SearchBox::with_debounce(
            Arc::clone(&f.search),
            on_panel,
            Duration::from_millis(20),
        );

        search_box.input("bo");
        search_box.input("bob");
        tokio::time::sleep(Duration::from_millis(100)).await;

        // only the final keystroke survives the debounce window
        assert_eq!(f.store.query_count("users"), 1);
        let state = rx.recv().await.unwrap();
        assert!(matches!(state, PanelState::Open(SearchOutcome::Results(_))));
        assert!(rx.try_recv().is_err());

        // short input hides the panel without searching
        search_box.input("b");
        assert_eq!(rx.recv().await.unwrap(), PanelState::Hidden);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.store.query_count("users"), 1);

        // focus reopens with the remembered outcome
        search_box.focus();
        assert!(matches!(rx.recv().await.unwrap(), PanelState::Open(_)));
        search_box.dismiss();
        assert_eq!(rx.recv().await.unwrap(), PanelState::Hidden);
    }
}
