use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatKind {
    #[serde(rename = "dm")]
    Direct,
    #[serde(rename = "group")]
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    pub participants: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default)]
    pub id: String,
    pub chat_id: String,
    pub sender: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub timestamp: String,
}

const DM_PREFIX: &str = "dm_";

/// Deterministic direct-message chat id: the sorted participant pair under
/// a `dm_` marker, so both sides derive the same id.
pub fn direct_chat_id(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{DM_PREFIX}{lo}_{hi}")
}

pub fn is_direct_chat_id(chat_id: &str) -> bool {
    chat_id.starts_with(DM_PREFIX)
}

/// Recover the participant ids encoded in a direct-message chat id.
pub fn direct_participants(chat_id: &str) -> Option<Vec<String>> {
    chat_id
        .strip_prefix(DM_PREFIX)
        .map(|rest| rest.split('_').map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_chat_ids_are_order_independent() {
        assert_eq!(direct_chat_id("b", "a"), direct_chat_id("a", "b"));
        assert_eq!(direct_chat_id("a", "b"), "dm_a_b");
    }

    #[test]
    fn direct_participants_round_trip() {
        let id = direct_chat_id("u2", "u1");
        assert_eq!(direct_participants(&id), Some(vec!["u1".to_string(), "u2".to_string()]));
        assert_eq!(direct_participants("group-1"), None);
    }
}
