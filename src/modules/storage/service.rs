use std::sync::Arc;

use crate::{
    api::error,
    modules::storage::{model::UploadConfig, repository::ObjectStore},
};

/// Replace whitespace and strip anything outside `[A-Za-z0-9._-]`, the way
/// the upload paths have always been normalized.
fn sanitize_filename(filename: &str) -> String {
    filename
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

pub struct StorageService<O>
where
    O: ObjectStore + Send + Sync,
{
    store: Arc<O>,
    config: UploadConfig,
}

impl<O> StorageService<O>
where
    O: ObjectStore + Send + Sync,
{
    pub fn new(store: Arc<O>, config: UploadConfig) -> Self {
        Self { store, config }
    }

    pub fn with_defaults(store: Arc<O>) -> Self {
        Self::new(store, UploadConfig::default())
    }

    fn validate_upload(&self, filename: &str, size: usize) -> Result<(), error::SystemError> {
        if size == 0 {
            return Err(error::SystemError::bad_request("No file provided"));
        }
        if size > self.config.max_file_size {
            return Err(error::SystemError::bad_request(format!(
                "File too large (max {} bytes)",
                self.config.max_file_size
            )));
        }

        let mime_type = mime_guess::from_path(filename).first_or_octet_stream();
        if !self.config.allowed_mime_types.contains(&mime_type.essence_str().to_string()) {
            return Err(error::SystemError::bad_request(format!(
                "File type '{}' is not allowed",
                mime_type.essence_str()
            )));
        }
        Ok(())
    }

    /// Upload a user image and return its public URL. Keys live under
    /// `user_images/{uid}/` so account deletion can sweep the folder.
    pub async fn upload_image_for_user(
        &self,
        filename: &str,
        bytes: &[u8],
        uid: &str,
    ) -> Result<String, error::SystemError> {
        if uid.is_empty() {
            return Err(error::SystemError::bad_request("Missing user id"));
        }
        self.validate_upload(filename, bytes.len())?;

        let safe_name = sanitize_filename(filename);
        let millis = chrono::Utc::now().timestamp_millis();
        let key = format!("user_images/{uid}/{millis}_{safe_name}");

        self.store.put(&key, bytes).await?;
        let url = self.store.public_url(&key);
        log::info!("Uploaded {} bytes for user {uid}", bytes.len());
        Ok(url)
    }

    /// Remove everything under a user's image folder.
    pub async fn delete_user_folder(&self, uid: &str) -> Result<(), error::SystemError> {
        if uid.is_empty() {
            return Err(error::SystemError::bad_request("Missing user id"));
        }
        let keys = self.store.list(&format!("user_images/{uid}")).await?;
        if !keys.is_empty() {
            self.store.remove(&keys).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::storage::repository_mem::MemoryObjectStore;

    fn service() -> (Arc<MemoryObjectStore>, StorageService<MemoryObjectStore>) {
        let store = Arc::new(MemoryObjectStore::new());
        (Arc::clone(&store), StorageService::with_defaults(store))
    }

    #[tokio::test]
    async fn upload_stores_under_the_user_folder() {
        let (store, service) = service();
        let url = service.upload_image_for_user("my pic.png", &[1, 2, 3], "u1").await.unwrap();

        let keys = store.keys();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("user_images/u1/"));
        assert!(keys[0].ends_with("_my_pic.png"));
        assert!(url.ends_with(&keys[0]));
    }

    #[tokio::test]
    async fn oversized_and_empty_uploads_are_rejected() {
        let (_, service) = service();

        let err = service.upload_image_for_user("a.png", &[], "u1").await.unwrap_err();
        assert!(err.to_string().contains("No file provided"));

        let big = vec![0u8; 10 * 1024 * 1024 + 1];
        let err = service.upload_image_for_user("a.png", &big, "u1").await.unwrap_err();
        assert!(err.to_string().contains("File too large"));

        let err = service.upload_image_for_user("a.exe", &[1], "u1").await.unwrap_err();
        assert!(err.to_string().contains("not allowed"));

        let err = service.upload_image_for_user("a.png", &[1], "").await.unwrap_err();
        assert!(err.to_string().contains("Missing user id"));
    }

    #[tokio::test]
    async fn delete_user_folder_only_touches_that_user() {
        let (store, service) = service();
        service.upload_image_for_user("a.png", &[1], "u1").await.unwrap();
        service.upload_image_for_user("b.png", &[2], "u1").await.unwrap();
        service.upload_image_for_user("c.png", &[3], "u2").await.unwrap();

        service.delete_user_folder("u1").await.unwrap();
        let keys = store.keys();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("user_images/u2/"));
    }
}
