use crate::{
    domain::{ObjectBody, ObjectStorage},
    errors::StorageError,
    object_address::ObjectAddress,
};
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client as S3Client,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use futures::TryStreamExt;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, buffered::BufWriter,
    gcp::GoogleCloudStorageBuilder, path::Path as StorePath,
};
use std::{
    collections::HashMap,
    io::Cursor,
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::RwLock,
};
use tokio_util::io::StreamReader;
use tracing;
use uuid::Uuid;

/// Reads at most `limit` bytes. An empty chunk means the body is exhausted.
async fn read_chunk(body: &mut ObjectBody, limit: u64, address: &ObjectAddress) -> Result<Vec<u8>, StorageError> {
    let mut chunk = Vec::new();
    (&mut *body)
        .take(limit)
        .read_to_end(&mut chunk)
        .await
        .map_err(|e| StorageError::UploadFailed(format!("reading upload body for {}: {}", address, e)))?;
    Ok(chunk)
}

// --- S3 ---

/// Part size for multipart uploads. S3 requires at least 5 MiB for all but the last part.
const S3_PART_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct S3ObjectStorage {
    client: S3Client,
}

impl S3ObjectStorage {
    pub const SCHEME: &'static str = "s3";

    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    async fn put_whole(
        &self,
        address: &ObjectAddress,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        tracing::debug!(object = %address, size = data.len(), %content_type, "S3: Uploading object");
        self.client
            .put_object()
            .bucket(address.bucket())
            .key(address.path())
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .context(format!("S3: Failed to upload object '{}'", address))
            .map_err(|e| StorageError::UploadFailed(format!("{:#}", e)))?;

        tracing::debug!(object = %address, "S3: Upload successful");
        Ok(())
    }

    async fn put_multipart(
        &self,
        address: &ObjectAddress,
        first: Vec<u8>,
        body: ObjectBody,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(address.bucket())
            .key(address.path())
            .content_type(content_type)
            .send()
            .await
            .context(format!("S3: Failed to start multipart upload of '{}'", address))
            .map_err(|e| StorageError::UploadFailed(format!("{:#}", e)))?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| StorageError::UploadFailed(format!("S3: No upload id returned for '{}'", address)))?
            .to_string();
        tracing::debug!(object = %address, %upload_id, "S3: Multipart upload started");

        let result = async {
            let parts = self.upload_parts(address, &upload_id, first, body).await?;
            let part_count = parts.len();
            self.client
                .complete_multipart_upload()
                .bucket(address.bucket())
                .key(address.path())
                .upload_id(&upload_id)
                .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
                .send()
                .await
                .context(format!("S3: Failed to complete multipart upload of '{}'", address))
                .map_err(|e| StorageError::UploadFailed(format!("{:#}", e)))?;
            Ok::<usize, StorageError>(part_count)
        }
        .await;

        match result {
            Ok(part_count) => {
                tracing::debug!(object = %address, parts = part_count, "S3: Multipart upload successful");
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(address.bucket())
                    .key(address.path())
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    tracing::warn!(object = %address, %upload_id, error = %abort_err, "S3: Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        address: &ObjectAddress,
        upload_id: &str,
        first: Vec<u8>,
        mut body: ObjectBody,
    ) -> Result<Vec<CompletedPart>, StorageError> {
        let mut parts = Vec::new();
        let mut chunk = first;
        while !chunk.is_empty() {
            let part_number = i32::try_from(parts.len() + 1)
                .map_err(|_| StorageError::UploadFailed(format!("S3: Too many parts for '{}'", address)))?;
            let output = self
                .client
                .upload_part()
                .bucket(address.bucket())
                .key(address.path())
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .context(format!("S3: Failed to upload part {} of '{}'", part_number, address))
                .map_err(|e| StorageError::UploadFailed(format!("{:#}", e)))?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            chunk = read_chunk(&mut body, S3_PART_SIZE, address).await?;
        }
        Ok(parts)
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    fn scheme(&self) -> &str {
        Self::SCHEME
    }

    /// Bodies that fit in one part go through `PutObject`; larger ones are
    /// streamed as a multipart upload, one part in memory at a time.
    async fn write(
        &self,
        address: &ObjectAddress,
        mut body: ObjectBody,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.check_scheme(address)?;
        let first = read_chunk(&mut body, S3_PART_SIZE, address).await?;
        if (first.len() as u64) < S3_PART_SIZE {
            return self.put_whole(address, first, content_type).await;
        }
        self.put_multipart(address, first, body, content_type).await
    }

    async fn read(&self, address: &ObjectAddress) -> Result<ObjectBody, StorageError> {
        self.check_scheme(address)?;
        tracing::debug!(object = %address, "S3: Downloading object");

        let output = self
            .client
            .get_object()
            .bucket(address.bucket())
            .key(address.path())
            .send()
            .await
            .map_err(|sdk_err| {
                if sdk_err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    tracing::warn!(object = %address, "S3: NoSuchKey");
                    return StorageError::NotFound(address.to_uri());
                }
                tracing::error!(object = %address, error = %sdk_err, "S3: Error downloading object");
                StorageError::BackendError(
                    anyhow::Error::new(sdk_err)
                        .context(format!("S3: Failed to download object '{}'", address)),
                )
            })?;

        Ok(Box::new(Box::pin(output.body.into_async_read())))
    }
}

// --- Google Cloud Storage ---

type BucketConnector = dyn Fn(&str) -> object_store::Result<Arc<dyn ObjectStore>> + Send + Sync;

/// GCS client per bucket, created on first use of that bucket.
pub struct GcsObjectStorage {
    connect: Box<BucketConnector>,
    buckets: RwLock<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl GcsObjectStorage {
    pub const SCHEME: &'static str = "gs";

    /// Credentials come from the environment (`GOOGLE_SERVICE_ACCOUNT`,
    /// `GOOGLE_APPLICATION_CREDENTIALS` or the metadata server).
    pub fn from_env() -> Self {
        tracing::info!("Initializing GcsObjectStorage");
        Self::with_connector(|bucket| {
            let store = GoogleCloudStorageBuilder::from_env()
                .with_bucket_name(bucket)
                .build()?;
            Ok(Arc::new(store) as Arc<dyn ObjectStore>)
        })
    }

    pub fn with_connector<F>(connect: F) -> Self
    where
        F: Fn(&str) -> object_store::Result<Arc<dyn ObjectStore>> + Send + Sync + 'static,
    {
        Self {
            connect: Box::new(connect),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    async fn bucket(&self, name: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        if let Some(store) = self.buckets.read().await.get(name) {
            return Ok(Arc::clone(store));
        }
        let mut buckets = self.buckets.write().await;
        if let Some(store) = buckets.get(name) {
            return Ok(Arc::clone(store));
        }
        let store = (self.connect)(name)
            .with_context(|| format!("GCS: Failed to create client for bucket '{}'", name))?;
        buckets.insert(name.to_string(), Arc::clone(&store));
        Ok(store)
    }
}

#[async_trait]
impl ObjectStorage for GcsObjectStorage {
    fn scheme(&self) -> &str {
        Self::SCHEME
    }

    /// Streams the body through a buffered writer that switches to a
    /// resumable multipart upload once it outgrows one buffer.
    async fn write(
        &self,
        address: &ObjectAddress,
        mut body: ObjectBody,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.check_scheme(address)?;
        let store = self.bucket(address.bucket()).await?;
        let attributes = Attributes::from_iter([(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        )]);
        let mut writer = BufWriter::new(store, StorePath::from(address.path())).with_attributes(attributes);
        tracing::debug!(object = %address, %content_type, "GCS: Uploading object");

        let copied = async {
            let written = tokio::io::copy(&mut body, &mut writer).await?;
            writer.shutdown().await?;
            Ok::<u64, std::io::Error>(written)
        }
        .await;

        match copied {
            Ok(written) => {
                tracing::debug!(object = %address, size = written, "GCS: Upload successful");
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = writer.abort().await {
                    tracing::warn!(object = %address, error = %abort_err, "GCS: Failed to abort upload");
                }
                tracing::error!(object = %address, error = %e, "GCS: Error uploading object");
                Err(StorageError::UploadFailed(format!(
                    "GCS: Failed to upload object '{}': {}",
                    address, e
                )))
            }
        }
    }

    async fn read(&self, address: &ObjectAddress) -> Result<ObjectBody, StorageError> {
        self.check_scheme(address)?;
        let store = self.bucket(address.bucket()).await?;
        tracing::debug!(object = %address, "GCS: Downloading object");

        let result = store
            .get(&StorePath::from(address.path()))
            .await
            .map_err(|err| match err {
                object_store::Error::NotFound { .. } => {
                    tracing::warn!(object = %address, "GCS: Object not found");
                    StorageError::NotFound(address.to_uri())
                }
                other => {
                    tracing::error!(object = %address, error = %other, "GCS: Error downloading object");
                    StorageError::BackendError(
                        anyhow::Error::new(other)
                            .context(format!("GCS: Failed to download object '{}'", address)),
                    )
                }
            })?;

        let stream = result.into_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(stream)))
    }
}

// --- Local filesystem ---

/// Stores objects under `{root}/{bucket}/{path}`.
#[derive(Debug, Clone)]
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub const SCHEME: &'static str = "file";

    /// Creates the root directory if it does not exist yet.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("creating storage root {}", root.display()))?;
        tracing::info!(root = %root.display(), "Initialized filesystem object storage");
        Ok(Self { root })
    }

    fn path_for(&self, address: &ObjectAddress) -> Result<PathBuf, StorageError> {
        let mut path = self.root.clone();
        let segments = std::iter::once(address.bucket()).chain(address.path().split('/'));
        for segment in segments {
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(part)), None) => path.push(part),
                _ => return Err(StorageError::InvalidPath(address.to_uri())),
            }
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    fn scheme(&self) -> &str {
        Self::SCHEME
    }

    /// Streams the body into a temp file next to the target, then renames it
    /// into place.
    async fn write(
        &self,
        address: &ObjectAddress,
        mut body: ObjectBody,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        self.check_scheme(address)?;
        let path = self.path_for(address)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }

        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let copied = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            let written = tokio::io::copy(&mut body, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<u64, std::io::Error>(written)
        }
        .await;

        let written = match copied {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(StorageError::UploadFailed(format!("{}: {}", temp_path.display(), e)));
            }
        };

        tokio::fs::rename(&temp_path, &path).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::debug!(object = %address, path = %path.display(), size = written, "Stored object on disk");
        Ok(())
    }

    async fn read(&self, address: &ObjectAddress) -> Result<ObjectBody, StorageError> {
        self.check_scheme(address)?;
        let path = self.path_for(address)?;
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(address.to_uri())
            } else {
                StorageError::ReadFailed(format!("{}: {}", path.display(), e))
            }
        })?;
        Ok(Box::new(file))
    }
}

// --- In-memory ---

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
}

/// Process-local object store for single-node deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryObjectStorage {
    objects: RwLock<HashMap<ObjectAddress, StoredObject>>,
}

impl MemoryObjectStorage {
    pub const SCHEME: &'static str = "mem";

    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, address: &ObjectAddress) -> bool {
        self.objects.read().await.contains_key(address)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn content_type(&self, address: &ObjectAddress) -> Option<String> {
        self.objects
            .read()
            .await
            .get(address)
            .map(|o| o.content_type.clone())
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    fn scheme(&self) -> &str {
        Self::SCHEME
    }

    async fn write(
        &self,
        address: &ObjectAddress,
        mut body: ObjectBody,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.check_scheme(address)?;
        let data = read_chunk(&mut body, u64::MAX, address).await?;
        self.objects.write().await.insert(
            address.clone(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn read(&self, address: &ObjectAddress) -> Result<ObjectBody, StorageError> {
        self.check_scheme(address)?;
        let data = self
            .objects
            .read()
            .await
            .get(address)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(address.to_uri()))?;
        Ok(Box::new(Cursor::new(data)))
    }
}
