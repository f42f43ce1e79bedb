use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::utils::double_option;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub pfp: Option<String>,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub friends: Vec<String>,
    #[serde(default)]
    pub friend_requests: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_username_change: Option<String>,
}

#[derive(Default, Deserialize, Validate)]
pub struct UpdateProfileModel {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    /// `Some(None)` clears the avatar, `None` leaves it untouched.
    #[serde(default, deserialize_with = "double_option")]
    pub pfp_url: Option<Option<String>>,
    #[validate(length(min = 3, message = "Username must be at least 3 characters long"))]
    pub username: Option<String>,
}
