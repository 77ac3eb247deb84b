use crate::{
    AppState,
    aws_clients::{create_dynamodb_client, create_s3_client, load_sdk_config},
    cache::{MemoryRenderCache, RedisRenderCache},
    config::{CacheBackend, Config, MetadataBackend, PostgresConfig, StorageBackend},
    domain::{ObjectStorage, PostRepository, RenderCache},
    errors::AppError,
    pipeline::{PipelineSettings, PostService},
    render::{AsciiRenderer, RenderOptions},
    repositories::{DynamoDbPostRepository, MemoryPostRepository, PostgresPostRepository},
    storage::{FsObjectStorage, GcsObjectStorage, MemoryObjectStorage, S3ObjectStorage},
};
use aws_sdk_dynamodb::{
    Client as DynamoDbClient,
    error::SdkError as DynamoSdkError,
    types::{AttributeDefinition, BillingMode, KeySchemaElement, KeyType, ScalarAttributeType},
};
use aws_sdk_s3::{
    Client as S3Client,
    error::SdkError as S3SdkError,
    types::{BucketLocationConstraint, CreateBucketConfiguration},
};
use backoff::ExponentialBackoff;
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use std::{fmt::Display, future::Future, sync::Arc, time::Duration};
use tracing;

/// Retries a backend connection with exponential backoff for up to 30s.
async fn with_startup_retry<T, E, F, Fut>(what: &str, mut operation: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let policy = ExponentialBackoff {
        max_elapsed_time: Some(Duration::from_secs(30)),
        ..ExponentialBackoff::default()
    };
    backoff::future::retry(policy, || {
        let attempt = operation();
        async move {
            attempt.await.map_err(|e| {
                tracing::warn!(backend = what, error = %e, "Startup: Backend not ready, retrying");
                backoff::Error::transient(e)
            })
        }
    })
    .await
    .map_err(|e| AppError::InitError(format!("{} unavailable: {}", what, e)))
}

/// Creates the posts table if it doesn't exist.
async fn create_dynamodb_table_if_not_exists(client: &DynamoDbClient, table_name: &str) -> Result<(), AppError> {
    let result = client
        .create_table()
        .table_name(table_name)
        .attribute_definitions(
            AttributeDefinition::builder()
                .attribute_name(DynamoDbPostRepository::PARTITION_KEY)
                .attribute_type(ScalarAttributeType::S)
                .build()?,
        )
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(DynamoDbPostRepository::PARTITION_KEY)
                .key_type(KeyType::Hash)
                .build()?,
        )
        .billing_mode(BillingMode::PayPerRequest)
        .send()
        .await;

    match result {
        Ok(_) => {
            tracing::info!("Startup: Table '{}' created.", table_name);
            Ok(())
        }
        Err(DynamoSdkError::ServiceError(service_err)) if service_err.err().is_resource_in_use_exception() => {
            tracing::info!("Startup: Table '{}' already exists, no action needed.", table_name);
            Ok(())
        }
        Err(e) => {
            let context = format!("Startup: Error creating DynamoDB table '{}'", table_name);
            tracing::error!("{}: {}", context, e);
            Err(AppError::InitError(format!("{}: {}", context, e)))
        }
    }
}

/// Ensures the S3 bucket exists, creating it with the correct location constraint if needed.
async fn ensure_s3_bucket_exists(client: &S3Client, bucket_name: &str, region_str: &str) -> Result<(), AppError> {
    let mut request = client.create_bucket().bucket(bucket_name);
    if region_str != "us-east-1" {
        request = request.create_bucket_configuration(
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region_str))
                .build(),
        );
    }

    match request.send().await {
        Ok(_) => {
            tracing::info!("Startup: S3 bucket '{}' created.", bucket_name);
            Ok(())
        }
        Err(sdk_err) => {
            let code = match &sdk_err {
                S3SdkError::ServiceError(service_err) => service_err.err().meta().code(),
                _ => None,
            };
            if matches!(code, Some("BucketAlreadyOwnedByYou") | Some("BucketAlreadyExists")) {
                tracing::info!("Startup: S3 bucket '{}' already exists.", bucket_name);
                return Ok(());
            }
            let context = format!("Startup: Error creating S3 bucket '{}'", bucket_name);
            tracing::error!("{}: {}", context, sdk_err);
            Err(AppError::InitError(format!("{}: {}", context, sdk_err)))
        }
    }
}

async fn connect_postgres(pg: &PostgresConfig) -> Result<PgPool, AppError> {
    let options = PgConnectOptions::new()
        .host(&pg.host)
        .port(pg.port)
        .username(&pg.user)
        .password(&pg.password)
        .database(&pg.dbname);
    tracing::info!(host = %pg.host, port = pg.port, database = %pg.dbname, "Startup: Connecting to PostgreSQL");

    with_startup_retry("postgres", || {
        PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options.clone())
    })
    .await
}

/// Connects every port selected by `config` and assembles the pipeline.
///
/// Backends are chosen here once; nothing downstream branches on them.
pub async fn build_state(config: &Config) -> Result<AppState, AppError> {
    let needs_aws = config.storage_backend == StorageBackend::S3
        || config.metadata_backend == MetadataBackend::DynamoDb;
    let sdk_config = if needs_aws {
        Some(load_sdk_config(config).await)
    } else {
        None
    };
    let sdk = || {
        sdk_config
            .as_ref()
            .ok_or_else(|| AppError::InitError("AWS SDK configuration was not loaded".to_string()))
    };

    let storage: Arc<dyn ObjectStorage> = match config.storage_backend {
        StorageBackend::S3 => {
            let client = create_s3_client(sdk()?, config.aws_endpoint.is_some());
            ensure_s3_bucket_exists(&client, &config.storage_bucket, &config.storage_region).await?;
            Arc::new(S3ObjectStorage::new(client))
        }
        StorageBackend::Gcs => Arc::new(GcsObjectStorage::from_env()),
        StorageBackend::File => Arc::new(
            FsObjectStorage::new(config.storage_root.clone())
                .await
                .map_err(|e| AppError::InitError(e.to_string()))?,
        ),
        StorageBackend::Memory => Arc::new(MemoryObjectStorage::new()),
    };

    let repo: Arc<dyn PostRepository> = match config.metadata_backend {
        MetadataBackend::Postgres => {
            let repo = PostgresPostRepository::new(connect_postgres(&config.postgres).await?);
            repo.migrate()
                .await
                .map_err(|e| AppError::InitError(e.to_string()))?;
            Arc::new(repo)
        }
        MetadataBackend::DynamoDb => {
            let client = create_dynamodb_client(sdk()?);
            create_dynamodb_table_if_not_exists(&client, &config.dynamodb_table).await?;
            Arc::new(DynamoDbPostRepository::new(client, config.dynamodb_table.clone()))
        }
        MetadataBackend::Memory => Arc::new(MemoryPostRepository::new()),
    };

    let cache: Arc<dyn RenderCache> = match config.cache_backend {
        CacheBackend::Redis => Arc::new(
            with_startup_retry("redis", || RedisRenderCache::connect(&config.redis_url)).await?,
        ),
        CacheBackend::Memory => Arc::new(MemoryRenderCache::new()),
    };

    tracing::info!(
        storage = ?config.storage_backend,
        metadata = ?config.metadata_backend,
        cache = ?config.cache_backend,
        bucket = %config.storage_bucket,
        "Startup: Backends ready"
    );

    let posts = PostService::new(
        repo,
        storage,
        cache,
        Arc::new(AsciiRenderer::new(RenderOptions::FEED)),
        PipelineSettings {
            bucket: config.storage_bucket.clone(),
            cache_ttl: config.cache_ttl,
            render_concurrency: config.render_concurrency,
        },
    );

    Ok(AppState {
        posts,
        max_upload_bytes: config.max_upload_bytes,
    })
}
