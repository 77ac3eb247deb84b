use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One feed entry as persisted by the metadata store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: Uuid,
    pub score: i32,
    /// URI form of the `ObjectAddress` holding the uploaded image.
    pub image_location: String,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by the caller on creation; score and timestamp are store-assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub id: Uuid,
    pub image_location: String,
}

/// A post paired with its rendered image text, as handed to the HTTP layer.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RenderedPost {
    pub post: Post,
    pub rendered: String,
}

/// Raster formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageContentType {
    Png,
    Jpeg,
    Gif,
}

impl ImageContentType {
    pub const ALLOWED: [ImageContentType; 3] = [Self::Png, Self::Jpeg, Self::Gif];

    /// Matches a `Content-Type` header value, ignoring case and parameters.
    pub fn from_mime(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        Self::ALLOWED.into_iter().find(|ct| ct.mime() == essence)
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
        }
    }
}
