//! Instrumented in-memory ports shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use skalogram::{
    cache::MemoryRenderCache,
    domain::{ObjectBody, ObjectStorage, PostRepository, RenderCache},
    errors::{CacheError, RenderError, RepoError, StorageError},
    models::{NewPost, Post},
    object_address::ObjectAddress,
    pipeline::{PipelineSettings, PostService},
    render::{AsciiRenderer, RenderOptions, Rendering},
    repositories::MemoryPostRepository,
    storage::MemoryObjectStorage,
};
use std::{
    io::Cursor,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use uuid::Uuid;

pub const BUCKET: &str = "test-bucket";

pub fn png_bytes(seed: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(40, 30, |x, y| {
        Rgb([seed.wrapping_add(x as u8 * 5), (y * 8) as u8, 200u8.wrapping_sub(seed)])
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

#[derive(Default)]
pub struct CountingStorage {
    pub inner: MemoryObjectStorage,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

#[async_trait]
impl ObjectStorage for CountingStorage {
    fn scheme(&self) -> &str {
        self.inner.scheme()
    }

    async fn write(
        &self,
        address: &ObjectAddress,
        body: ObjectBody,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::UploadFailed("injected write failure".into()));
        }
        self.inner.write(address, body, content_type).await
    }

    async fn read(&self, address: &ObjectAddress) -> Result<ObjectBody, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::ReadFailed("injected read failure".into()));
        }
        self.inner.read(address).await
    }
}

#[derive(Default)]
pub struct CountingCache {
    pub inner: MemoryRenderCache,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub fail_gets: AtomicBool,
    pub fail_puts: AtomicBool,
}

#[async_trait]
impl RenderCache for CountingCache {
    async fn put(&self, id: Uuid, rendered: String, ttl: Duration) -> Result<String, CacheError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(CacheError::BackendError(anyhow::anyhow!("injected put failure")));
        }
        self.inner.put(id, rendered, ttl).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<String>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(CacheError::BackendError(anyhow::anyhow!("injected get failure")));
        }
        self.inner.get(id).await
    }
}

pub struct CountingRenderer {
    pub inner: AsciiRenderer,
    pub calls: AtomicUsize,
}

impl Default for CountingRenderer {
    fn default() -> Self {
        Self {
            inner: AsciiRenderer::new(RenderOptions::FEED),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Rendering for CountingRenderer {
    fn render(&self, image: &[u8]) -> Result<String, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.render(image)
    }
}

#[derive(Default)]
pub struct FlakyRepo {
    pub inner: MemoryPostRepository,
    pub creates: AtomicUsize,
    pub fail_creates: AtomicBool,
}

#[async_trait]
impl PostRepository for FlakyRepo {
    async fn create_post(&self, new_post: NewPost) -> Result<Post, RepoError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(RepoError::BackendError(anyhow::anyhow!("injected insert failure")));
        }
        self.inner.create_post(new_post).await
    }

    async fn list_posts(&self) -> Result<Vec<Post>, RepoError> {
        self.inner.list_posts().await
    }

    async fn get_post(&self, id: Uuid) -> Result<Post, RepoError> {
        self.inner.get_post(id).await
    }

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError> {
        self.inner.delete_post(id).await
    }

    async fn upvote(&self, id: Uuid) -> Result<(), RepoError> {
        self.inner.upvote(id).await
    }

    async fn downvote(&self, id: Uuid) -> Result<(), RepoError> {
        self.inner.downvote(id).await
    }
}

pub struct Harness {
    pub service: PostService,
    pub storage: Arc<CountingStorage>,
    pub cache: Arc<CountingCache>,
    pub renderer: Arc<CountingRenderer>,
    pub repo: Arc<FlakyRepo>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_cache_ttl(Duration::from_secs(60))
    }

    pub fn with_cache_ttl(cache_ttl: Duration) -> Self {
        let storage = Arc::new(CountingStorage::default());
        let cache = Arc::new(CountingCache::default());
        let renderer = Arc::new(CountingRenderer::default());
        let repo = Arc::new(FlakyRepo::default());
        let service = PostService::new(
            repo.clone(),
            storage.clone(),
            cache.clone(),
            renderer.clone(),
            PipelineSettings {
                bucket: BUCKET.to_string(),
                cache_ttl,
                render_concurrency: 4,
            },
        );
        Self {
            service,
            storage,
            cache,
            renderer,
            repo,
        }
    }

    pub fn storage_reads(&self) -> usize {
        self.storage.reads.load(Ordering::SeqCst)
    }

    pub fn storage_writes(&self) -> usize {
        self.storage.writes.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.renderer.calls.load(Ordering::SeqCst)
    }

    pub fn cache_puts(&self) -> usize {
        self.cache.puts.load(Ordering::SeqCst)
    }

    pub fn metadata_creates(&self) -> usize {
        self.repo.creates.load(Ordering::SeqCst)
    }
}
