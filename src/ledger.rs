//! JSON-file vote tally used by the terminal client.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Failed to access vote ledger {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Vote ledger {path} is not valid JSON: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LedgerFile {
    #[serde(default)]
    image_upvotes: BTreeMap<String, i64>,
}

/// Signed vote totals keyed by image path, persisted on [`VoteLedger::save`].
#[derive(Debug)]
pub struct VoteLedger {
    path: PathBuf,
    votes: Mutex<BTreeMap<String, i64>>,
}

impl VoteLedger {
    /// Loads `path`; a missing or empty file starts an empty ledger.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(LedgerError::Io { path, source }),
        };

        let file = if raw.iter().all(u8::is_ascii_whitespace) {
            LedgerFile::default()
        } else {
            serde_json::from_slice::<LedgerFile>(&raw)
                .map_err(|source| LedgerError::Format { path: path.clone(), source })?
        };

        Ok(Self {
            path,
            votes: Mutex::new(file.image_upvotes),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the new total.
    pub async fn upvote(&self, image: &str) -> i64 {
        self.adjust(image, 1).await
    }

    /// Returns the new total.
    pub async fn downvote(&self, image: &str) -> i64 {
        self.adjust(image, -1).await
    }

    pub async fn votes(&self, image: &str) -> i64 {
        self.votes.lock().await.get(image).copied().unwrap_or(0)
    }

    async fn adjust(&self, image: &str, delta: i64) -> i64 {
        let mut votes = self.votes.lock().await;
        let total = votes.entry(image.to_string()).or_insert(0);
        *total = total.saturating_add(delta);
        *total
    }

    pub async fn save(&self) -> Result<(), LedgerError> {
        let file = LedgerFile {
            image_upvotes: self.votes.lock().await.clone(),
        };
        let data = serde_json::to_vec_pretty(&file).map_err(|source| LedgerError::Format {
            path: self.path.clone(),
            source,
        })?;
        tokio::fs::write(&self.path, data)
            .await
            .map_err(|source| LedgerError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_is_an_empty_ledger() {
        let dir = TempDir::new().unwrap();
        let ledger = VoteLedger::open(dir.path().join(".db.json")).await.unwrap();
        assert_eq!(ledger.votes("cat.png").await, 0);
    }

    #[tokio::test]
    async fn empty_file_is_an_empty_ledger() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".db.json");
        std::fs::write(&path, "").unwrap();
        let ledger = VoteLedger::open(&path).await.unwrap();
        assert_eq!(ledger.votes("cat.png").await, 0);
    }

    #[tokio::test]
    async fn votes_persist_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".db.json");

        let ledger = VoteLedger::open(&path).await.unwrap();
        assert_eq!(ledger.upvote("cat.png").await, 1);
        assert_eq!(ledger.upvote("cat.png").await, 2);
        assert_eq!(ledger.downvote("dog.png").await, -1);
        ledger.save().await.unwrap();

        let reopened = VoteLedger::open(&path).await.unwrap();
        assert_eq!(reopened.votes("cat.png").await, 2);
        assert_eq!(reopened.votes("dog.png").await, -1);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"ImageUpvotes\""));
    }

    #[tokio::test]
    async fn concurrent_votes_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(VoteLedger::open(dir.path().join("v.json")).await.unwrap());
        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.upvote("x").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(ledger.votes("x").await, 50);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".db.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(VoteLedger::open(&path).await, Err(LedgerError::Format { .. })));
    }
}
