use crate::{
    domain::PostRepository,
    errors::RepoError,
    models::{NewPost, Post},
};
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_dynamodb::{Client as DynamoDbClient, types::AttributeValue};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{self, info};
use uuid::Uuid;

// --- DynamoDB ---

#[derive(Debug, Clone)]
pub struct DynamoDbPostRepository {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoDbPostRepository {
    pub const PARTITION_KEY: &'static str = "post_id";

    pub fn new(client: DynamoDbClient, table_name: String) -> Self {
        info!(%table_name, "Initializing DynamoDbPostRepository");
        Self { client, table_name }
    }

    /// Single `UpdateItem` with `ADD`, so concurrent votes never lose updates.
    async fn adjust_score(&self, id: Uuid, delta: i32) -> Result<(), RepoError> {
        self.client
            .update_item()
            .table_name(&self.table_name)
            .key(Self::PARTITION_KEY, AttributeValue::S(id.to_string()))
            .update_expression("ADD score :delta")
            .condition_expression("attribute_exists(post_id)")
            .expression_attribute_values(":delta", AttributeValue::N(delta.to_string()))
            .send()
            .await
            .map_err(|sdk_err| {
                if sdk_err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception())
                {
                    return RepoError::NotFound(id);
                }
                RepoError::BackendError(anyhow::Error::new(sdk_err).context(format!(
                    "DynamoDB (table: {}): Failed to adjust score of post {}",
                    self.table_name, id
                )))
            })?;
        tracing::debug!(post_id = %id, delta, "DynamoDB: Score adjusted");
        Ok(())
    }
}

#[async_trait]
impl PostRepository for DynamoDbPostRepository {
    async fn create_post(&self, new_post: NewPost) -> Result<Post, RepoError> {
        let post = Post {
            id: new_post.id,
            score: 0,
            image_location: new_post.image_location,
            created_at: Utc::now(),
        };
        self.client
            .put_item()
            .table_name(&self.table_name)
            .item(Self::PARTITION_KEY, AttributeValue::S(post.id.to_string()))
            .item("score", AttributeValue::N(post.score.to_string()))
            .item("img_url", AttributeValue::S(post.image_location.clone()))
            .item(
                "created_at",
                AttributeValue::S(post.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
            )
            .condition_expression("attribute_not_exists(post_id)")
            .send()
            .await
            .map_err(|sdk_err| {
                if sdk_err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception())
                {
                    return RepoError::AlreadyExists(post.id);
                }
                RepoError::BackendError(anyhow::Error::new(sdk_err).context(format!(
                    "DynamoDB (table: {}): Failed to put post (id: {})",
                    self.table_name, post.id
                )))
            })?;
        Ok(post)
    }

    /// Scans the whole table (handling pagination) and orders by creation time.
    async fn list_posts(&self) -> Result<Vec<Post>, RepoError> {
        tracing::debug!("DynamoDB: Scanning table '{}' for all posts", self.table_name);
        let mut posts: Vec<Post> = Vec::new();
        let mut last_evaluated_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let resp = self
                .client
                .scan()
                .table_name(&self.table_name)
                .set_exclusive_start_key(last_evaluated_key.take())
                .send()
                .await
                .context(format!("DynamoDB: Failed to scan table '{}'", self.table_name))
                .map_err(RepoError::BackendError)?;

            for item in resp.items.unwrap_or_default() {
                match item_to_post(&item) {
                    Some(post) => posts.push(post),
                    None => {
                        let item_id = item.get(Self::PARTITION_KEY).and_then(|v| v.as_s().ok());
                        tracing::error!(item.id = ?item_id, table_name = %self.table_name, "DynamoDB: Failed to parse item from scan into Post");
                        return Err(RepoError::DataCorruption(format!(
                            "DynamoDB: Failed to parse item {:?} during scan of table '{}'",
                            item_id, self.table_name
                        )));
                    }
                }
            }

            last_evaluated_key = resp.last_evaluated_key;
            if last_evaluated_key.is_none() {
                break;
            }
            tracing::debug!("DynamoDB Scan (table: {}): Continuing with LastEvaluatedKey...", self.table_name);
        }

        posts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tracing::debug!("DynamoDB (table: {}): Listed {} posts", self.table_name, posts.len());
        Ok(posts)
    }

    async fn get_post(&self, id: Uuid) -> Result<Post, RepoError> {
        let resp = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(Self::PARTITION_KEY, AttributeValue::S(id.to_string()))
            .send()
            .await
            .context(format!("DynamoDB (table: {}): Failed to get post (id: {})", self.table_name, id))
            .map_err(RepoError::BackendError)?;

        let item = resp.item.ok_or(RepoError::NotFound(id))?;
        item_to_post(&item).ok_or_else(|| {
            tracing::error!(post_id = %id, table_name = %self.table_name, "DynamoDB: Retrieved item but failed to parse into Post");
            RepoError::DataCorruption(format!(
                "Failed to parse post data retrieved from DynamoDB table '{}' for id {}",
                self.table_name, id
            ))
        })
    }

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError> {
        tracing::debug!(post_id = %id, table_name = %self.table_name, "DynamoDB: Deleting item");
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key(Self::PARTITION_KEY, AttributeValue::S(id.to_string()))
            .condition_expression("attribute_exists(post_id)")
            .send()
            .await
            .map_err(|sdk_err| {
                if sdk_err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception())
                {
                    return RepoError::NotFound(id);
                }
                RepoError::BackendError(anyhow::Error::new(sdk_err).context(format!(
                    "DynamoDB (table: {}): Failed to delete post (id: {})",
                    self.table_name, id
                )))
            })?;
        Ok(())
    }

    async fn upvote(&self, id: Uuid) -> Result<(), RepoError> {
        self.adjust_score(id, 1).await
    }

    async fn downvote(&self, id: Uuid) -> Result<(), RepoError> {
        self.adjust_score(id, -1).await
    }
}

fn item_to_post(item: &HashMap<String, AttributeValue>) -> Option<Post> {
    let id = item
        .get(DynamoDbPostRepository::PARTITION_KEY)?
        .as_s()
        .ok()
        .and_then(|s| Uuid::parse_str(s).ok())?;
    let score = item.get("score")?.as_n().ok()?.parse::<i32>().ok()?;
    let image_location = item.get("img_url")?.as_s().ok()?.to_string();
    let created_at = item
        .get("created_at")?
        .as_s()
        .ok()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
        .with_timezone(&Utc);

    Some(Post {
        id,
        score,
        image_location,
        created_at,
    })
}

// --- PostgreSQL ---

pub const POSTGRES_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS posts (
    id UUID PRIMARY KEY,
    score INTEGER NOT NULL DEFAULT 0,
    img_url TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

const POST_COLUMNS: &str = "id, score, img_url, created_at";

#[derive(Debug, Clone)]
pub struct PostgresPostRepository {
    pool: PgPool,
}

impl PostgresPostRepository {
    pub fn new(pool: PgPool) -> Self {
        info!("Initializing PostgresPostRepository");
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), RepoError> {
        sqlx::query(POSTGRES_SCHEMA)
            .execute(&self.pool)
            .await
            .context("Postgres: Failed to create posts table")?;
        Ok(())
    }

    async fn adjust_score(&self, id: Uuid, delta: i32) -> Result<(), RepoError> {
        let result = sqlx::query("UPDATE posts SET score = score + $2 WHERE id = $1")
            .bind(id)
            .bind(delta)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Postgres: Failed to adjust score of post {}", id))?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }
}

fn row_to_post(row: &PgRow) -> Result<Post, RepoError> {
    let parse = || -> Result<Post, sqlx::Error> {
        Ok(Post {
            id: row.try_get("id")?,
            score: row.try_get("score")?,
            image_location: row.try_get("img_url")?,
            created_at: row.try_get("created_at")?,
        })
    };
    parse().map_err(|e| RepoError::DataCorruption(format!("Postgres: Failed to decode post row: {}", e)))
}

#[async_trait]
impl PostRepository for PostgresPostRepository {
    async fn create_post(&self, new_post: NewPost) -> Result<Post, RepoError> {
        let row = sqlx::query(&format!(
            "INSERT INTO posts (id, img_url) VALUES ($1, $2) RETURNING {}",
            POST_COLUMNS
        ))
        .bind(new_post.id)
        .bind(&new_post.image_location)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                return RepoError::AlreadyExists(new_post.id);
            }
            RepoError::BackendError(
                anyhow::Error::new(e).context(format!("Postgres: Failed to insert post {}", new_post.id)),
            )
        })?;
        row_to_post(&row)
    }

    async fn list_posts(&self) -> Result<Vec<Post>, RepoError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM posts ORDER BY created_at ASC, id ASC",
            POST_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Postgres: Failed to list posts")?;
        rows.iter().map(row_to_post).collect()
    }

    async fn get_post(&self, id: Uuid) -> Result<Post, RepoError> {
        let row = sqlx::query(&format!("SELECT {} FROM posts WHERE id = $1", POST_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Postgres: Failed to get post {}", id))?
            .ok_or(RepoError::NotFound(id))?;
        row_to_post(&row)
    }

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Postgres: Failed to delete post {}", id))?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    async fn upvote(&self, id: Uuid) -> Result<(), RepoError> {
        self.adjust_score(id, 1).await
    }

    async fn downvote(&self, id: Uuid) -> Result<(), RepoError> {
        self.adjust_score(id, -1).await
    }
}

// --- In-memory ---

/// Lock-protected post table for single-node deployments and tests.
///
/// Rows are kept in insertion order, which is also `created_at` order.
#[derive(Debug, Default)]
pub struct MemoryPostRepository {
    posts: Mutex<Vec<Post>>,
}

impl MemoryPostRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn adjust_score(&self, id: Uuid, delta: i32) -> Result<(), RepoError> {
        let mut posts = self.posts.lock().await;
        let post = posts
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(RepoError::NotFound(id))?;
        post.score = post
            .score
            .checked_add(delta)
            .ok_or_else(|| anyhow::anyhow!("score of post {} out of range", id))?;
        Ok(())
    }
}

#[async_trait]
impl PostRepository for MemoryPostRepository {
    async fn create_post(&self, new_post: NewPost) -> Result<Post, RepoError> {
        let mut posts = self.posts.lock().await;
        if posts.iter().any(|p| p.id == new_post.id) {
            return Err(RepoError::AlreadyExists(new_post.id));
        }
        // Never go backwards, even if the wall clock does.
        let now = Utc::now();
        let created_at = posts.last().map_or(now, |last| last.created_at.max(now));
        let post = Post {
            id: new_post.id,
            score: 0,
            image_location: new_post.image_location,
            created_at,
        };
        posts.push(post.clone());
        Ok(post)
    }

    async fn list_posts(&self) -> Result<Vec<Post>, RepoError> {
        Ok(self.posts.lock().await.clone())
    }

    async fn get_post(&self, id: Uuid) -> Result<Post, RepoError> {
        self.posts
            .lock()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(RepoError::NotFound(id))
    }

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError> {
        let mut posts = self.posts.lock().await;
        let index = posts
            .iter()
            .position(|p| p.id == id)
            .ok_or(RepoError::NotFound(id))?;
        posts.remove(index);
        Ok(())
    }

    async fn upvote(&self, id: Uuid) -> Result<(), RepoError> {
        self.adjust_score(id, 1).await
    }

    async fn downvote(&self, id: Uuid) -> Result<(), RepoError> {
        self.adjust_score(id, -1).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_post(location: &str) -> NewPost {
        NewPost {
            id: Uuid::new_v4(),
            image_location: location.to_string(),
        }
    }

    #[tokio::test]
    async fn create_assigns_score_and_timestamp() {
        let repo = MemoryPostRepository::new();
        let before = Utc::now();
        let post = repo.create_post(new_post("mem://b/1.png")).await.unwrap();
        assert_eq!(post.score, 0);
        assert!(post.created_at >= before);
        assert_eq!(repo.get_post(post.id).await.unwrap(), post);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let repo = MemoryPostRepository::new();
        let np = new_post("mem://b/1.png");
        repo.create_post(np.clone()).await.unwrap();
        assert!(matches!(repo.create_post(np).await, Err(RepoError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn list_is_oldest_first() {
        let repo = MemoryPostRepository::new();
        let a = repo.create_post(new_post("mem://b/a")).await.unwrap();
        let b = repo.create_post(new_post("mem://b/b")).await.unwrap();
        let c = repo.create_post(new_post("mem://b/c")).await.unwrap();
        let ids: Vec<Uuid> = repo.list_posts().await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
        assert!(a.created_at <= b.created_at && b.created_at <= c.created_at);
    }

    #[tokio::test]
    async fn downvote_has_no_floor() {
        let repo = MemoryPostRepository::new();
        let post = repo.create_post(new_post("mem://b/x")).await.unwrap();
        repo.downvote(post.id).await.unwrap();
        repo.downvote(post.id).await.unwrap();
        repo.upvote(post.id).await.unwrap();
        assert_eq!(repo.get_post(post.id).await.unwrap().score, -1);
    }

    #[tokio::test]
    async fn missing_posts_are_not_found() {
        let repo = MemoryPostRepository::new();
        let id = Uuid::new_v4();
        assert!(matches!(repo.get_post(id).await, Err(RepoError::NotFound(x)) if x == id));
        assert!(matches!(repo.upvote(id).await, Err(RepoError::NotFound(_))));
        assert!(matches!(repo.downvote(id).await, Err(RepoError::NotFound(_))));
        assert!(matches!(repo.delete_post(id).await, Err(RepoError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let repo = MemoryPostRepository::new();
        let post = repo.create_post(new_post("mem://b/x")).await.unwrap();
        repo.delete_post(post.id).await.unwrap();
        assert!(repo.list_posts().await.unwrap().is_empty());
    }

    #[test]
    fn dynamodb_item_parsing() {
        let id = Uuid::new_v4();
        let mut item = HashMap::new();
        item.insert("post_id".to_string(), AttributeValue::S(id.to_string()));
        item.insert("score".to_string(), AttributeValue::N("-3".into()));
        item.insert("img_url".to_string(), AttributeValue::S("s3://b/k.png".into()));
        item.insert(
            "created_at".to_string(),
            AttributeValue::S("2024-05-01T10:00:00.000000Z".into()),
        );

        let post = item_to_post(&item).unwrap();
        assert_eq!(post.id, id);
        assert_eq!(post.score, -3);
        assert_eq!(post.image_location, "s3://b/k.png");

        item.remove("img_url");
        assert!(item_to_post(&item).is_none());
    }
}
