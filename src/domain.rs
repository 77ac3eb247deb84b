use crate::errors::{CacheError, RepoError, StorageError};
use crate::models::{NewPost, Post};
use crate::object_address::ObjectAddress;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncRead;
use uuid::Uuid;

/// Lazily consumed object content. The receiver owns it and drops it when done.
pub type ObjectBody = Box<dyn AsyncRead + Send + Unpin>;

/// Trait defining operations for storing and retrieving post metadata.
#[async_trait]
pub trait PostRepository: Send + Sync + 'static {
    /// Inserts a new row. Score starts at 0 and `created_at` is assigned by the store.
    async fn create_post(&self, new_post: NewPost) -> Result<Post, RepoError>;

    /// All posts, oldest first.
    async fn list_posts(&self) -> Result<Vec<Post>, RepoError>;

    async fn get_post(&self, id: Uuid) -> Result<Post, RepoError>;

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError>;

    /// `score += 1` as a single server-side update.
    async fn upvote(&self, id: Uuid) -> Result<(), RepoError>;

    /// `score -= 1` as a single server-side update. No floor.
    async fn downvote(&self, id: Uuid) -> Result<(), RepoError>;
}

/// Trait defining operations for storing and retrieving raw image objects.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    /// Address scheme served by this backend (`s3`, `gs`, `file`, `mem`).
    fn scheme(&self) -> &str;

    /// Uploads `body` to `address`, replacing any existing object.
    async fn write(
        &self,
        address: &ObjectAddress,
        body: ObjectBody,
        content_type: &str,
    ) -> Result<(), StorageError>;

    async fn read(&self, address: &ObjectAddress) -> Result<ObjectBody, StorageError>;

    /// Rejects addresses that belong to a different backend family.
    fn check_scheme(&self, address: &ObjectAddress) -> Result<(), StorageError> {
        if address.scheme() == self.scheme() {
            Ok(())
        } else {
            Err(StorageError::SchemeMismatch {
                address: address.to_uri(),
                backend: self.scheme().to_string(),
            })
        }
    }
}

/// Short-lived store of rendered post text keyed by post ID.
#[async_trait]
pub trait RenderCache: Send + Sync + 'static {
    /// Stores `rendered` under `id` for `ttl` and returns the stored value.
    async fn put(&self, id: Uuid, rendered: String, ttl: Duration) -> Result<String, CacheError>;

    /// `Ok(None)` is a miss; `Err` means the cache itself failed.
    async fn get(&self, id: Uuid) -> Result<Option<String>, CacheError>;
}
