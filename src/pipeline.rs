//! Orchestration between the metadata store, the object store and the render cache.
//!
//! Listing resolves each post's rendering cache-aside: a hit is returned as is,
//! a miss (or an unreachable cache) falls through to storage and the renderer,
//! and the result is written back on a best-effort basis. Uploads write the
//! object first and only then insert the metadata row, so a row never points
//! at an object that was never stored.

use crate::{
    domain::{ObjectStorage, PostRepository, RenderCache},
    errors::{PostError, StorageError},
    models::{ImageContentType, NewPost, Post, RenderedPost},
    object_address::ObjectAddress,
    render::Rendering,
};
use futures::{StreamExt, TryStreamExt, stream};
use std::{io::Cursor, sync::Arc, time::Duration};
use tokio::io::AsyncReadExt;
use uuid::Uuid;

/// Deployment-wide knobs, read from configuration at startup.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Bucket that new uploads are written to.
    pub bucket: String,
    pub cache_ttl: Duration,
    /// Posts resolved at the same time while listing.
    pub render_concurrency: usize,
}

#[derive(Clone)]
pub struct PostService {
    repo: Arc<dyn PostRepository>,
    storage: Arc<dyn ObjectStorage>,
    cache: Arc<dyn RenderCache>,
    renderer: Arc<dyn Rendering>,
    settings: PipelineSettings,
}

fn parse_id(raw: &str) -> Result<Uuid, PostError> {
    Ok(Uuid::parse_str(raw.trim())?)
}

impl PostService {
    pub fn new(
        repo: Arc<dyn PostRepository>,
        storage: Arc<dyn ObjectStorage>,
        cache: Arc<dyn RenderCache>,
        renderer: Arc<dyn Rendering>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            repo,
            storage,
            cache,
            renderer,
            settings: PipelineSettings {
                render_concurrency: settings.render_concurrency.max(1),
                ..settings
            },
        }
    }

    /// Every post, oldest first, paired with its rendered image.
    ///
    /// Fails as a whole if any post's image cannot be read or rendered.
    #[tracing::instrument(skip(self))]
    pub async fn assemble_posts(&self) -> Result<Vec<RenderedPost>, PostError> {
        let posts = self.repo.list_posts().await.map_err(PostError::Repository)?;
        tracing::debug!(count = posts.len(), "Resolving renderings");

        // `buffered` yields in input order regardless of completion order.
        stream::iter(posts)
            .map(|post| self.resolve(post))
            .buffered(self.settings.render_concurrency)
            .try_collect()
            .await
    }

    async fn resolve(&self, post: Post) -> Result<RenderedPost, PostError> {
        match self.cache.get(post.id).await {
            Ok(Some(rendered)) => {
                tracing::trace!(post_id = %post.id, "Render cache hit");
                return Ok(RenderedPost { post, rendered });
            }
            Ok(None) => tracing::debug!(post_id = %post.id, "Render cache miss"),
            Err(e) => {
                tracing::warn!(post_id = %post.id, error = %e, "Render cache lookup failed, rendering from storage")
            }
        }

        let rendered = self.render_from_storage(&post).await?;

        if let Err(e) = self
            .cache
            .put(post.id, rendered.clone(), self.settings.cache_ttl)
            .await
        {
            tracing::warn!(post_id = %post.id, error = %e, "Failed to cache rendering");
        }
        Ok(RenderedPost { post, rendered })
    }

    async fn render_from_storage(&self, post: &Post) -> Result<String, PostError> {
        let post_id = post.id;
        let address = ObjectAddress::parse(&post.image_location)
            .map_err(|source| PostError::InvalidAddress { post_id, source })?;

        let mut body = self.storage.read(&address).await?;
        let mut image = Vec::new();
        body.read_to_end(&mut image)
            .await
            .map_err(|e| StorageError::ReadFailed(format!("{}: {}", address, e)))?;
        drop(body);

        let renderer = Arc::clone(&self.renderer);
        tokio::task::spawn_blocking(move || renderer.render(&image))
            .await
            .map_err(|e| PostError::Internal(format!("render task for post {} failed: {}", post_id, e)))?
            .map_err(|source| PostError::Render { post_id, source })
    }

    /// Stores an uploaded image and creates its post.
    ///
    /// A metadata failure after a successful write leaves the object orphaned
    /// in storage; it is logged, not removed.
    #[tracing::instrument(skip(self, image), fields(size = image.len()))]
    pub async fn create_post(&self, image: Vec<u8>, content_type: &str) -> Result<Post, PostError> {
        let image_type = ImageContentType::from_mime(content_type)
            .ok_or_else(|| PostError::UnsupportedContentType(content_type.to_string()))?;
        if image.is_empty() {
            return Err(PostError::EmptyImage);
        }

        let id = Uuid::new_v4();
        let address = ObjectAddress::new(
            self.storage.scheme(),
            &self.settings.bucket,
            format!("{}.{}", id, image_type.extension()),
        )
        .map_err(|e| PostError::Internal(format!("cannot address new object: {}", e)))?;

        self.storage
            .write(&address, Box::new(Cursor::new(image)), image_type.mime())
            .await?;
        tracing::debug!(post_id = %id, object = %address, "Image stored, creating post");

        let post = self
            .repo
            .create_post(NewPost {
                id,
                image_location: address.to_uri(),
            })
            .await
            .map_err(|e| {
                tracing::error!(post_id = %id, object = %address, error = %e, "Post creation failed; stored object is orphaned");
                PostError::Repository(e)
            })?;

        tracing::info!(post_id = %id, "Post created");
        Ok(post)
    }

    pub async fn upvote(&self, id: &str) -> Result<(), PostError> {
        let post_id = parse_id(id)?;
        self.repo
            .upvote(post_id)
            .await
            .map_err(|source| PostError::Vote { post_id, source })
    }

    pub async fn downvote(&self, id: &str) -> Result<(), PostError> {
        let post_id = parse_id(id)?;
        self.repo
            .downvote(post_id)
            .await
            .map_err(|source| PostError::Vote { post_id, source })
    }

    pub async fn get_post(&self, id: &str) -> Result<Post, PostError> {
        let post_id = parse_id(id)?;
        Ok(self.repo.get_post(post_id).await?)
    }

    /// Removes the metadata row. The stored image is left in place.
    pub async fn delete_post(&self, id: &str) -> Result<(), PostError> {
        let post_id = parse_id(id)?;
        self.repo.delete_post(post_id).await?;
        tracing::info!(%post_id, "Post deleted");
        Ok(())
    }
}
