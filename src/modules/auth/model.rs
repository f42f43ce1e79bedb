use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::modules::auth::schema::AccountEntity;

#[derive(Deserialize, Validate)]
pub struct SignUpModel {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters long"))]
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Deserialize, Validate)]
pub struct SignInModel {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters long"))]
    pub password: String,
}

/// Provider user normalized into the stable shape the rest of the app
/// consumes, whatever the provider's own user object looks like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub email_verified: bool,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl From<AccountEntity> for AuthUser {
    fn from(entity: AccountEntity) -> Self {
        AuthUser {
            id: entity.id.to_string(),
            email: entity.email,
            email_verified: entity.email_verified,
            display_name: entity.display_name,
            avatar_url: entity.avatar_url,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: AuthUser,
    pub access_token: String,
}
