use crate::api::error;

/// Object-storage boundary of the hosted backend: keyed blobs with
/// list/remove by prefix and public URLs.
#[async_trait::async_trait]
pub trait ObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), error::SystemError>;

    /// Keys under a prefix (non-recursive, like the hosted API's folder
    /// listing).
    async fn list(&self, prefix: &str) -> Result<Vec<String>, error::SystemError>;

    async fn remove(&self, keys: &[String]) -> Result<(), error::SystemError>;

    fn public_url(&self, key: &str) -> String;
}
