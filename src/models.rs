use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Opaque entity identifier. UUIDv4 rendered as a string, so comment and
/// reply ids are globally unique and never reused after deletion.
pub type Id = String;

pub fn new_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}

/// Aggregate root. Comments (and their replies) are embedded: they are
/// owned exclusively by the post and read/written as one document.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Id,
    pub content: String,
    pub author_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Kept equal to `liked_by.len()` at all times.
    pub likes: u64,
    #[serde(default)]
    pub liked_by: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Id,
    pub content: String,
    pub author_username: String,
    pub created_at: DateTime<Utc>,
    /// One nesting level only; replies carry no further children.
    #[serde(default)]
    pub replies: Vec<Reply>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: Id,
    pub content: String,
    pub author_username: String,
    pub created_at: DateTime<Utc>,
}

// ---- request / response bodies ----------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub content: String,
    pub author_username: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePost {
    pub content: String,
    pub author_username: String,
}

/// Body for deletes: the requester asserts their display name, which is
/// compared against the stored author. The sole authorization check in
/// the system.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthorClaim {
    pub author_username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub content: String,
    pub author_username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LikeRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LikeOutcome {
    pub likes: u64,
    pub has_liked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserSearchResult {
    pub username: String,
    pub post_count: u64,
    pub latest_post: DateTime<Utc>,
}
