use std::time::Duration;

pub const MIN_QUERY_LEN: usize = 2;
pub const MAX_RESULTS_PER_CATEGORY: usize = 5;
pub const POST_PREVIEW_CHARS: usize = 100;
pub const DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq)]
pub struct UserHit {
    pub uid: String,
    pub username: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostHit {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_username: String,
    pub author_avatar: Option<String>,
    /// Matched post text, truncated for the result row.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchResults {
    pub users: Vec<UserHit>,
    pub posts: Vec<PostHit>,
}

/// What the results panel should show. `NoFriends` is deliberately distinct
/// from an empty result: the UI tells the user to add friends instead of
/// "nothing found".
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    TooShort,
    NoFriends,
    Failed(String),
    Results(SearchResults),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanelState {
    Hidden,
    Open(SearchOutcome),
}
