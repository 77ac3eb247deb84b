use crate::config::Config;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use tracing;

/// Shared SDK configuration for every AWS-backed port.
///
/// Credentials come from the default provider chain (env vars, profiles, IMDS).
pub async fn load_sdk_config(config: &Config) -> SdkConfig {
    tracing::info!(sdk_region = %config.storage_region, "Setting SDK region");
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.storage_region.clone()));

    if let Some(endpoint_url) = &config.aws_endpoint {
        tracing::info!("Using endpoint override: {}", endpoint_url);
        loader = loader.endpoint_url(endpoint_url);
    }

    loader.load().await
}

pub fn create_dynamodb_client(sdk_config: &SdkConfig) -> DynamoDbClient {
    DynamoDbClient::new(sdk_config)
}

/// Path-style addressing keeps bucket names out of hostnames, which LocalStack needs.
pub fn create_s3_client(sdk_config: &SdkConfig, path_style: bool) -> S3Client {
    let s3_config = aws_sdk_s3::config::Builder::from(sdk_config)
        .force_path_style(path_style)
        .build();
    S3Client::from_conf(s3_config)
}
