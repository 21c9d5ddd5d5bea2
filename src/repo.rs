use async_trait::async_trait;

use crate::aggregate::{DomainError, Entity};
use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("{} not found", .0.name())]
    NotFound(Entity),
    #[error("Unauthorized")]
    Forbidden,
    #[error("storage error: {0}")]
    Internal(String),
}

impl From<DomainError> for RepoError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::NotFound(entity) => RepoError::NotFound(entity),
            DomainError::Forbidden => RepoError::Forbidden,
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Document store for the [`Post`] aggregate. Every mutating operation is
/// a whole-aggregate read-modify-write; backends must serialize writers
/// per post while leaving operations on different posts unblocked.
#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn create_post(&self, new: NewPost) -> RepoResult<Post>;
    async fn get_post(&self, id: &str) -> RepoResult<Post>;
    /// Most recent posts first, optionally filtered to one author.
    async fn list_posts(&self, author: Option<&str>, limit: usize) -> RepoResult<Vec<Post>>;
    async fn update_post(&self, id: &str, content: String, author: &str) -> RepoResult<Post>;
    /// Irreversible; embedded comments and replies go with the document.
    async fn delete_post(&self, id: &str, author: &str) -> RepoResult<()>;

    async fn toggle_like(&self, id: &str, user_id: &str) -> RepoResult<LikeOutcome>;

    async fn add_comment(&self, post_id: &str, content: String, author: String)
        -> RepoResult<Comment>;
    async fn edit_comment(
        &self,
        post_id: &str,
        comment_id: &str,
        content: String,
        author: &str,
    ) -> RepoResult<Comment>;
    async fn delete_comment(&self, post_id: &str, comment_id: &str, author: &str)
        -> RepoResult<()>;

    async fn add_reply(
        &self,
        post_id: &str,
        comment_id: &str,
        content: String,
        author: String,
    ) -> RepoResult<Reply>;
    /// Post-unscoped fallback: locate the owning post by comment id alone.
    /// Sound because ids are globally unique; a miss is reported as a
    /// missing comment, not a missing post.
    async fn add_reply_by_comment(
        &self,
        comment_id: &str,
        content: String,
        author: String,
    ) -> RepoResult<Reply>;
    async fn edit_reply(
        &self,
        post_id: &str,
        comment_id: &str,
        reply_id: &str,
        content: String,
        author: &str,
    ) -> RepoResult<Reply>;
    async fn delete_reply(
        &self,
        post_id: &str,
        comment_id: &str,
        reply_id: &str,
        author: &str,
    ) -> RepoResult<()>;

    /// Authors matching `query` (case-insensitive substring), with their
    /// post count and most recent post time. Most recently active first,
    /// capped at [`SEARCH_LIMIT`].
    async fn search_authors(&self, query: &str) -> RepoResult<Vec<UserSearchResult>>;
}

/// Cap on author search results.
pub const SEARCH_LIMIT: usize = 10;

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::{DateTime, Utc};
    use dashmap::DashMap;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    const SNAPSHOT_FILE: &str = "posts.json";

    /// In-memory document store. Each post lives in its own `DashMap`
    /// entry, so a read-modify-write holds only that entry's shard guard:
    /// same-post mutations are serialized, different posts proceed in
    /// parallel. State is snapshotted to JSON after every write.
    #[derive(Clone)]
    pub struct InMemRepo {
        posts: Arc<DashMap<Id, Post>>,
        snapshot_path: Arc<PathBuf>,
        snapshot_lock: Arc<Mutex<()>>,
    }

    impl InMemRepo {
        fn data_dir() -> PathBuf {
            std::env::var("MURMUR_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"))
        }

        fn load_snapshot(path: &Path) -> DashMap<Id, Post> {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<Vec<Post>>(&bytes) {
                    Ok(posts) => {
                        log::info!("loaded {} posts from '{}'", posts.len(), path.display());
                        posts.into_iter().map(|p| (p.id.clone(), p)).collect()
                    }
                    Err(e) => {
                        log::warn!(
                            "failed to parse snapshot '{}': {e}; starting empty",
                            path.display()
                        );
                        DashMap::new()
                    }
                },
                Err(_) => DashMap::new(),
            }
        }

        fn persist(&self) {
            // one snapshot writer at a time; entry guards are already
            // released by the time this runs
            let _guard = self.snapshot_lock.lock().unwrap();
            let posts: Vec<Post> = self.posts.iter().map(|e| e.value().clone()).collect();
            match serde_json::to_vec_pretty(&posts) {
                Ok(bytes) => {
                    if let Some(dir) = self.snapshot_path.parent() {
                        let _ = std::fs::create_dir_all(dir);
                    }
                    // write to a temp file, then rename into place: an
                    // interrupted write never leaves a partial snapshot
                    let tmp = self.snapshot_path.with_extension("json.tmp");
                    let res = std::fs::write(&tmp, bytes)
                        .and_then(|_| std::fs::rename(&tmp, self.snapshot_path.as_path()));
                    if let Err(e) = res {
                        log::error!(
                            "failed to write snapshot '{}': {e}",
                            self.snapshot_path.display()
                        );
                    }
                }
                Err(e) => log::error!("failed to serialize snapshot: {e}"),
            }
        }

        pub fn new() -> Self {
            let mut snapshot_path = Self::data_dir();
            snapshot_path.push(SNAPSHOT_FILE);
            let posts = Self::load_snapshot(&snapshot_path);
            Self {
                posts: Arc::new(posts),
                snapshot_path: Arc::new(snapshot_path),
                snapshot_lock: Arc::new(Mutex::new(())),
            }
        }

        /// Apply `f` to the post under its entry guard, then snapshot.
        /// The guard is released before persisting so other posts are
        /// never blocked on disk I/O.
        fn with_post<T>(
            &self,
            id: &str,
            f: impl FnOnce(&mut Post) -> Result<T, DomainError>,
        ) -> RepoResult<T> {
            let out = {
                let mut entry = self
                    .posts
                    .get_mut(id)
                    .ok_or(RepoError::NotFound(Entity::Post))?;
                f(entry.value_mut())?
            };
            self.persist();
            Ok(out)
        }

        fn find_post_by_comment(&self, comment_id: &str) -> Option<Id> {
            self.posts
                .iter()
                .find(|e| e.value().contains_comment(comment_id))
                .map(|e| e.key().clone())
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let post = Post::create(new.content, new.author_username, new.image_url);
            self.posts.insert(post.id.clone(), post.clone());
            self.persist();
            Ok(post)
        }

        async fn get_post(&self, id: &str) -> RepoResult<Post> {
            self.posts
                .get(id)
                .map(|e| e.value().clone())
                .ok_or(RepoError::NotFound(Entity::Post))
        }

        async fn list_posts(&self, author: Option<&str>, limit: usize) -> RepoResult<Vec<Post>> {
            let mut posts: Vec<Post> = self
                .posts
                .iter()
                .filter(|e| author.map_or(true, |a| e.value().author_username == a))
                .map(|e| e.value().clone())
                .collect();
            posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            posts.truncate(limit);
            Ok(posts)
        }

        async fn update_post(&self, id: &str, content: String, author: &str) -> RepoResult<Post> {
            self.with_post(id, |p| {
                p.edit(content, author)?;
                Ok(p.clone())
            })
        }

        async fn delete_post(&self, id: &str, author: &str) -> RepoResult<()> {
            {
                let entry = self
                    .posts
                    .get(id)
                    .ok_or(RepoError::NotFound(Entity::Post))?;
                if entry.value().author_username != author {
                    return Err(RepoError::Forbidden);
                }
            }
            self.posts.remove(id);
            self.persist();
            Ok(())
        }

        async fn toggle_like(&self, id: &str, user_id: &str) -> RepoResult<LikeOutcome> {
            self.with_post(id, |p| Ok(p.toggle_like(user_id)))
        }

        async fn add_comment(
            &self,
            post_id: &str,
            content: String,
            author: String,
        ) -> RepoResult<Comment> {
            self.with_post(post_id, |p| Ok(p.add_comment(content, author)))
        }

        async fn edit_comment(
            &self,
            post_id: &str,
            comment_id: &str,
            content: String,
            author: &str,
        ) -> RepoResult<Comment> {
            self.with_post(post_id, |p| p.edit_comment(comment_id, content, author))
        }

        async fn delete_comment(
            &self,
            post_id: &str,
            comment_id: &str,
            author: &str,
        ) -> RepoResult<()> {
            self.with_post(post_id, |p| p.delete_comment(comment_id, author))
        }

        async fn add_reply(
            &self,
            post_id: &str,
            comment_id: &str,
            content: String,
            author: String,
        ) -> RepoResult<Reply> {
            self.with_post(post_id, |p| p.add_reply(comment_id, content, author))
        }

        async fn add_reply_by_comment(
            &self,
            comment_id: &str,
            content: String,
            author: String,
        ) -> RepoResult<Reply> {
            let post_id = self
                .find_post_by_comment(comment_id)
                .ok_or(RepoError::NotFound(Entity::Comment))?;
            // the comment may vanish between lookup and mutation; the
            // engine re-checks and reports the comment as missing
            self.with_post(&post_id, |p| p.add_reply(comment_id, content, author))
        }

        async fn edit_reply(
            &self,
            post_id: &str,
            comment_id: &str,
            reply_id: &str,
            content: String,
            author: &str,
        ) -> RepoResult<Reply> {
            self.with_post(post_id, |p| p.edit_reply(comment_id, reply_id, content, author))
        }

        async fn delete_reply(
            &self,
            post_id: &str,
            comment_id: &str,
            reply_id: &str,
            author: &str,
        ) -> RepoResult<()> {
            self.with_post(post_id, |p| p.delete_reply(comment_id, reply_id, author))
        }

        async fn search_authors(&self, query: &str) -> RepoResult<Vec<UserSearchResult>> {
            let needle = query.to_lowercase();
            let mut by_author: HashMap<String, (u64, DateTime<Utc>)> = HashMap::new();
            for entry in self.posts.iter() {
                let post = entry.value();
                if !post.author_username.to_lowercase().contains(&needle) {
                    continue;
                }
                let stat = by_author
                    .entry(post.author_username.clone())
                    .or_insert((0, post.created_at));
                stat.0 += 1;
                if post.created_at > stat.1 {
                    stat.1 = post.created_at;
                }
            }
            let mut results: Vec<UserSearchResult> = by_author
                .into_iter()
                .map(|(username, (post_count, latest_post))| UserSearchResult {
                    username,
                    post_count,
                    latest_post,
                })
                .collect();
            results.sort_by(|a, b| b.latest_post.cmp(&a.latest_post));
            results.truncate(SEARCH_LIMIT);
            Ok(results)
        }
    }
}

// Postgres JSONB document store (feature = "postgres-store"). One row per
// aggregate; lost updates are prevented with an optimistic version CAS.
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    fn internal(e: impl std::fmt::Display) -> RepoError {
        RepoError::Internal(e.to_string())
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }

        pub async fn ensure_schema(&self) -> RepoResult<()> {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS posts (
                     id TEXT PRIMARY KEY,
                     author TEXT NOT NULL,
                     created_at TIMESTAMPTZ NOT NULL,
                     doc JSONB NOT NULL,
                     version BIGINT NOT NULL DEFAULT 0
                 )",
            )
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            Ok(())
        }

        async fn load(&self, id: &str) -> RepoResult<(Post, i64)> {
            let row: Option<(serde_json::Value, i64)> =
                sqlx::query_as("SELECT doc, version FROM posts WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(internal)?;
            let (doc, version) = row.ok_or(RepoError::NotFound(Entity::Post))?;
            let post = serde_json::from_value(doc).map_err(internal)?;
            Ok((post, version))
        }

        /// Read-modify-write with compare-and-swap on `version`. On a
        /// CAS miss the document is re-read and `f` re-applied to the
        /// fresh copy, so two writers to the same post both land.
        async fn mutate<T, F>(&self, id: &str, f: F) -> RepoResult<T>
        where
            F: Fn(&mut Post) -> Result<T, DomainError> + Send + Sync,
            T: Send,
        {
            loop {
                let (mut post, version) = self.load(id).await?;
                let out = f(&mut post)?;
                let doc = serde_json::to_value(&post).map_err(internal)?;
                let res = sqlx::query(
                    "UPDATE posts SET doc = $2, version = version + 1
                     WHERE id = $1 AND version = $3",
                )
                .bind(id)
                .bind(&doc)
                .bind(version)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
                if res.rows_affected() == 1 {
                    return Ok(out);
                }
            }
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let post = Post::create(new.content, new.author_username, new.image_url);
            let doc = serde_json::to_value(&post).map_err(internal)?;
            sqlx::query(
                "INSERT INTO posts (id, author, created_at, doc) VALUES ($1, $2, $3, $4)",
            )
            .bind(&post.id)
            .bind(&post.author_username)
            .bind(post.created_at)
            .bind(&doc)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            Ok(post)
        }

        async fn get_post(&self, id: &str) -> RepoResult<Post> {
            Ok(self.load(id).await?.0)
        }

        async fn list_posts(&self, author: Option<&str>, limit: usize) -> RepoResult<Vec<Post>> {
            let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
                "SELECT doc FROM posts
                 WHERE $1::text IS NULL OR author = $1
                 ORDER BY created_at DESC LIMIT $2",
            )
            .bind(author)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
            rows.into_iter()
                .map(|(doc,)| serde_json::from_value(doc).map_err(internal))
                .collect()
        }

        async fn update_post(&self, id: &str, content: String, author: &str) -> RepoResult<Post> {
            self.mutate(id, move |p| {
                p.edit(content.clone(), author)?;
                Ok(p.clone())
            })
            .await
        }

        async fn delete_post(&self, id: &str, author: &str) -> RepoResult<()> {
            let (post, _) = self.load(id).await?;
            if post.author_username != author {
                return Err(RepoError::Forbidden);
            }
            sqlx::query("DELETE FROM posts WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            Ok(())
        }

        async fn toggle_like(&self, id: &str, user_id: &str) -> RepoResult<LikeOutcome> {
            self.mutate(id, move |p| Ok(p.toggle_like(user_id))).await
        }

        async fn add_comment(
            &self,
            post_id: &str,
            content: String,
            author: String,
        ) -> RepoResult<Comment> {
            self.mutate(post_id, move |p| Ok(p.add_comment(content.clone(), author.clone())))
                .await
        }

        async fn edit_comment(
            &self,
            post_id: &str,
            comment_id: &str,
            content: String,
            author: &str,
        ) -> RepoResult<Comment> {
            self.mutate(post_id, move |p| p.edit_comment(comment_id, content.clone(), author))
                .await
        }

        async fn delete_comment(
            &self,
            post_id: &str,
            comment_id: &str,
            author: &str,
        ) -> RepoResult<()> {
            self.mutate(post_id, move |p| p.delete_comment(comment_id, author))
                .await
        }

        async fn add_reply(
            &self,
            post_id: &str,
            comment_id: &str,
            content: String,
            author: String,
        ) -> RepoResult<Reply> {
            self.mutate(post_id, move |p| {
                p.add_reply(comment_id, content.clone(), author.clone())
            })
            .await
        }

        async fn add_reply_by_comment(
            &self,
            comment_id: &str,
            content: String,
            author: String,
        ) -> RepoResult<Reply> {
            let row: Option<(String,)> = sqlx::query_as(
                "SELECT id FROM posts
                 WHERE doc->'comments' @> jsonb_build_array(jsonb_build_object('id', $1::text))",
            )
            .bind(comment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
            let (post_id,) = row.ok_or(RepoError::NotFound(Entity::Comment))?;
            self.mutate(&post_id, move |p| {
                p.add_reply(comment_id, content.clone(), author.clone())
            })
            .await
        }

        async fn edit_reply(
            &self,
            post_id: &str,
            comment_id: &str,
            reply_id: &str,
            content: String,
            author: &str,
        ) -> RepoResult<Reply> {
            self.mutate(post_id, move |p| {
                p.edit_reply(comment_id, reply_id, content.clone(), author)
            })
            .await
        }

        async fn delete_reply(
            &self,
            post_id: &str,
            comment_id: &str,
            reply_id: &str,
            author: &str,
        ) -> RepoResult<()> {
            self.mutate(post_id, move |p| p.delete_reply(comment_id, reply_id, author))
                .await
        }

        async fn search_authors(&self, query: &str) -> RepoResult<Vec<UserSearchResult>> {
            let rows: Vec<(String, i64, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
                "SELECT author, COUNT(*), MAX(created_at) FROM posts
                 WHERE author ILIKE '%' || $1 || '%'
                 GROUP BY author ORDER BY MAX(created_at) DESC LIMIT $2",
            )
            .bind(query)
            .bind(SEARCH_LIMIT as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
            Ok(rows
                .into_iter()
                .map(|(username, post_count, latest_post)| UserSearchResult {
                    username,
                    post_count: post_count as u64,
                    latest_post,
                })
                .collect())
        }
    }
}
