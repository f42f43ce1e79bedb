use std::sync::Arc;

use serde_json::{json, Value};
use validator::Validate;

use crate::{
    api::error,
    modules::{
        auth::repository::AuthProvider,
        profile::model::{UpdateProfileModel, UserProfile},
        store::{
            model::{from_document, server_timestamp, DocumentRef, FieldUpdate},
            repository::TableStore,
            service::DocStore,
        },
    },
};

pub struct ProfileService<S, P>
where
    S: TableStore + Send + Sync,
    P: AuthProvider + Send + Sync,
{
    docs: DocStore<S>,
    provider: Arc<P>,
}

impl<S, P> ProfileService<S, P>
where
    S: TableStore + Send + Sync,
    P: AuthProvider + Send + Sync,
{
    pub fn with_dependencies(store: Arc<S>, provider: Arc<P>) -> Self {
        ProfileService { docs: DocStore::with_dependencies(store), provider }
    }

    fn user_ref(uid: &str) -> DocumentRef {
        DocumentRef::new("users", uid)
    }

    async fn current_uid(&self) -> Result<String, error::SystemError> {
        self.provider
            .current_user()
            .await
            .map(|u| u.id)
            .ok_or_else(|| error::SystemError::unauthorized("Not signed in"))
    }

    pub async fn get_profile(&self, uid: &str) -> Result<UserProfile, error::SystemError> {
        if uid.is_empty() {
            return Err(error::SystemError::bad_request("Missing user id"));
        }
        let snapshot = self.docs.get_doc(&Self::user_ref(uid)).await;
        let Some(doc) = snapshot.into_data() else {
            return Err(error::SystemError::not_found("User not found"));
        };
        from_document(doc)
    }

    /// Friend ids of a user. Degrades to an empty list when the profile is
    /// unreadable; callers treat that the same as "no friends".
    pub async fn friends_list(&self, uid: &str) -> Result<Vec<String>, error::SystemError> {
        if uid.is_empty() {
            return Err(error::SystemError::bad_request("Missing user id"));
        }
        let snapshot = self.docs.get_doc(&Self::user_ref(uid)).await;
        let friends = snapshot
            .data()
            .and_then(|doc| doc.get("friends"))
            .and_then(Value::as_array)
            .map(|values| {
                values.iter().filter_map(Value::as_str).map(str::to_string).collect()
            })
            .unwrap_or_default();
        Ok(friends)
    }

    /// Partial update of the signed-in user's profile. A username change
    /// also stamps `last_username_change`; the display name is mirrored
    /// into the auth identity best-effort.
    pub async fn update_profile(
        &self,
        model: UpdateProfileModel,
    ) -> Result<(), error::SystemError> {
        let uid = self.current_uid().await?;
        model.validate().map_err(|e| error::SystemError::bad_request(e.to_string()))?;

        let mut updates: Vec<(String, FieldUpdate)> = Vec::new();
        if let Some(name) = &model.display_name {
            updates.push(("name".to_string(), FieldUpdate::Set(json!(name))));
        }
        if let Some(bio) = &model.bio {
            updates.push(("bio".to_string(), FieldUpdate::Set(json!(bio))));
        }
        if let Some(pfp) = &model.pfp_url {
            updates.push(("pfp".to_string(), FieldUpdate::Set(json!(pfp))));
        }
        if let Some(username) = &model.username {
            updates.push(("username".to_string(), FieldUpdate::Set(json!(username))));
            updates.push((
                "last_username_change".to_string(),
                FieldUpdate::Set(json!(server_timestamp())),
            ));
        }
        if updates.is_empty() {
            return Err(error::SystemError::bad_request("No fields to update"));
        }

        self.docs.update_doc(&Self::user_ref(&uid), updates).await?;

        if let Some(name) = &model.display_name {
            if let Err(err) = self.provider.update_display_name(name).await {
                log::warn!("Auth metadata update failed: {err}");
            }
        }
        Ok(())
    }

    /// Queue a friend request on the target's profile.
    pub async fn send_friend_request(&self, to_uid: &str) -> Result<(), error::SystemError> {
        let uid = self.current_uid().await?;
        if to_uid == uid {
            return Err(error::SystemError::bad_request(
                "Cannot send friend request to yourself",
            ));
        }
        let target = self.docs.get_doc(&Self::user_ref(to_uid)).await;
        if !target.exists() {
            return Err(error::SystemError::not_found("Receiver user not found"));
        }

        self.docs
            .update_doc(
                &Self::user_ref(to_uid),
                vec![(
                    "friend_requests".to_string(),
                    FieldUpdate::ArrayUnion(vec![json!(uid)]),
                )],
            )
            .await
    }

    /// Accept a pending request: both sides gain the friendship, the
    /// request entry goes away.
    pub async fn accept_friend_request(&self, from_uid: &str) -> Result<(), error::SystemError> {
        let uid = self.current_uid().await?;
        let own = self.get_profile(&uid).await?;
        if !own.friend_requests.iter().any(|r| r == from_uid) {
            return Err(error::SystemError::not_found("Friend request not found"));
        }

        self.docs
            .update_doc(
                &Self::user_ref(&uid),
                vec![
                    (
                        "friend_requests".to_string(),
                        FieldUpdate::ArrayRemove(vec![json!(from_uid)]),
                    ),
                    ("friends".to_string(), FieldUpdate::ArrayUnion(vec![json!(from_uid)])),
                ],
            )
            .await?;
        self.docs
            .update_doc(
                &Self::user_ref(from_uid),
                vec![("friends".to_string(), FieldUpdate::ArrayUnion(vec![json!(uid)]))],
            )
            .await
    }

    pub async fn decline_friend_request(&self, from_uid: &str) -> Result<(), error::SystemError> {
        let uid = self.current_uid().await?;
        self.docs
            .update_doc(
                &Self::user_ref(&uid),
                vec![(
                    "friend_requests".to_string(),
                    FieldUpdate::ArrayRemove(vec![json!(from_uid)]),
                )],
            )
            .await
    }

    pub async fn remove_friend(&self, friend_uid: &str) -> Result<(), error::SystemError> {
        let uid = self.current_uid().await?;
        self.docs
            .update_doc(
                &Self::user_ref(&uid),
                vec![("friends".to_string(), FieldUpdate::ArrayRemove(vec![json!(friend_uid)]))],
            )
            .await?;
        self.docs
            .update_doc(
                &Self::user_ref(friend_uid),
                vec![("friends".to_string(), FieldUpdate::ArrayRemove(vec![json!(uid)]))],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{
        auth::{model::AuthUser, repository_mem::MemoryAuthProvider},
        store::{model::to_document, repository_mem::MemoryStore},
    };

    type TestProfiles = ProfileService<MemoryStore, MemoryAuthProvider>;

    struct Fixture {
        store: Arc<MemoryStore>,
        provider: Arc<MemoryAuthProvider>,
        profiles: TestProfiles,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MemoryAuthProvider::new());
        let profiles =
            ProfileService::with_dependencies(Arc::clone(&store), Arc::clone(&provider));
        Fixture { store, provider, profiles }
    }

    async fn seed_user(f: &Fixture, uid: &str) {
        let docs = DocStore::with_dependencies(Arc::clone(&f.store));
        docs.set_doc(
            &DocumentRef::new("users", uid),
            to_document(&json!({
                "uid": uid, "email": format!("{uid}@x.com"), "name": uid,
                "username": uid, "pfp": null, "bio": "",
                "friends": [], "friend_requests": [],
            }))
            .unwrap(),
            false,
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
    async fn get_profile_distinguishes_missing_users() {
        let f = fixture();
        seed_user(&f, "u1").await;

        let profile = f.profiles.get_profile("u1").await.unwrap();
        assert_eq!(profile.username, "u1");

        let err = f.profiles.get_profile("nobody").await.unwrap_err();
        assert!(matches!(err, error::SystemError::NotFound(_)));
    }

    #[tokio::test]
    async fn friends_list_degrades_to_empty_on_read_failure() {
        let f = fixture();
        seed_user(&f, "u1").await;
        f.store.fail_next_read();
        assert_eq!(f.profiles.friends_list("u1").await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn username_change_stamps_the_timestamp() {
        let f = fixture();
        seed_user(&f, "u1").await;
        sign_in(&f, "u1").await;

        f.profiles
            .update_profile(UpdateProfileModel {
                username: Some("newname".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let profile = f.profiles.get_profile("u1").await.unwrap();
        assert_eq!(profile.username, "newname");
        assert!(profile.last_username_change.is_some());

        // bio-only update must not touch the username timestamp
        f.profiles
            .update_profile(UpdateProfileModel {
                bio: Some("hello".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let after = f.profiles.get_profile("u1").await.unwrap();
        assert_eq!(after.last_username_change, profile.last_username_change);
        assert_eq!(after.bio, "hello");
    }

    #[tokio::test]
    async fn empty_update_and_short_username_are_rejected() {
        let f = fixture();
        seed_user(&f, "u1").await;
        sign_in(&f, "u1").await;

        let err = f.profiles.update_profile(UpdateProfileModel::default()).await.unwrap_err();
        assert!(err.to_string().contains("No fields to update"));

        let err = f
            .profiles
            .update_profile(UpdateProfileModel {
                username: Some("ab".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, error::SystemError::BadRequest(_)));
    }

    #[tokio::test]
    async fn friend_request_flow_ends_in_mutual_friendship() {
        let f = fixture();
        seed_user(&f, "u1").await;
        seed_user(&f, "u2").await;

        sign_in(&f, "u1").await;
        f.profiles.send_friend_request("u2").await.unwrap();
        assert!(f.profiles.send_friend_request("u1").await.is_err());
        assert!(f.profiles.send_friend_request("ghost").await.is_err());

        sign_in(&f, "u2").await;
        let pending = f.profiles.get_profile("u2").await.unwrap().friend_requests;
        assert_eq!(pending, vec!["u1".to_string()]);

        f.profiles.accept_friend_request("u1").await.unwrap();
        assert_eq!(f.profiles.friends_list("u2").await.unwrap(), vec!["u1".to_string()]);
        assert_eq!(f.profiles.friends_list("u1").await.unwrap(), vec!["u2".to_string()]);
        assert!(f.profiles.get_profile("u2").await.unwrap().friend_requests.is_empty());

        // accepting again fails: the request is gone
        assert!(f.profiles.accept_friend_request("u1").await.is_err());

        f.profiles.remove_friend("u1").await.unwrap();
        assert!(f.profiles.friends_list("u2").await.unwrap().is_empty());
        assert!(f.profiles.friends_list("u1").await.unwrap().is_empty());
    }
}
