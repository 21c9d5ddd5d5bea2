use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt as _;
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::models::*;
use crate::repo::PostRepo;
use crate::storage::{ImageStore, ImageStoreError};

/// Upper bound on the system-wide / per-author feed.
const FEED_LIMIT: usize = 20;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/posts")
                    .route(web::get().to(list_posts))
                    .route(web::post().to(create_post)),
            )
            .service(
                web::resource("/posts/{postId}")
                    .route(web::put().to(update_post))
                    .route(web::delete().to(delete_post)),
            )
            .service(web::resource("/posts/{postId}/like").route(web::post().to(toggle_like)))
            .service(
                web::resource("/posts/{postId}/comments").route(web::post().to(add_comment)),
            )
            .service(
                web::resource("/posts/{postId}/comments/{commentId}")
                    .route(web::put().to(edit_comment))
                    .route(web::delete().to(delete_comment)),
            )
            .service(
                web::resource("/posts/{postId}/comments/{commentId}/replies")
                    .route(web::post().to(add_reply)),
            )
            .service(
                web::resource("/posts/{postId}/comments/{commentId}/replies/{replyId}")
                    .route(web::put().to(edit_reply))
                    .route(web::delete().to(delete_reply)),
            )
            // fallback path used when the caller only knows the comment id
            .service(
                web::resource("/comments/{commentId}/replies")
                    .route(web::post().to(add_reply_by_comment)),
            )
            .service(web::resource("/users/search").route(web::get().to(search_users)))
            .service(web::resource("/images").route(web::post().to(upload_image))),
    );
    // public fetch route (no /api/v1 prefix so <img src="/images/{hash}"> works)
    cfg.route("/images/{hash}", web::get().to(get_image));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn PostRepo>,
    pub image_store: Arc<dyn ImageStore>,
}

fn require(value: &str, field: &'static str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(field));
    }
    Ok(())
}

#[derive(Debug, serde::Deserialize)]
pub struct FeedQuery {
    pub username: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/posts",
    params(("username" = Option<String>, Query, description = "Only posts by this author")),
    responses(
        (status = 200, description = "Most recent posts, newest first", body = [Post])
    )
)]
pub async fn list_posts(
    data: web::Data<AppState>,
    query: web::Query<FeedQuery>,
) -> Result<HttpResponse, ApiError> {
    let posts = data
        .repo
        .list_posts(query.username.as_deref(), FEED_LIMIT)
        .await?;
    Ok(HttpResponse::Ok().json(posts))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts",
    request_body = NewPost,
    responses(
        (status = 200, description = "Post created", body = Post),
        (status = 400, description = "Missing content or author")
    )
)]
pub async fn create_post(
    data: web::Data<AppState>,
    payload: web::Json<NewPost>,
) -> Result<HttpResponse, ApiError> {
    require(&payload.content, "content")?;
    require(&payload.author_username, "authorUsername")?;
    let post = data.repo.create_post(payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(post))
}

#[utoipa::path(
    put,
    path = "/api/v1/posts/{postId}",
    request_body = UpdatePost,
    params(("postId" = String, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post updated", body = Post),
        (status = 404, description = "Post not found"),
        (status = 403, description = "Author mismatch")
    )
)]
pub async fn update_post(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdatePost>,
) -> Result<HttpResponse, ApiError> {
    require(&payload.content, "content")?;
    let payload = payload.into_inner();
    let post = data
        .repo
        .update_post(&path.into_inner(), payload.content, &payload.author_username)
        .await?;
    Ok(HttpResponse::Ok().json(post))
}

#[utoipa::path(
    delete,
    path = "/api/v1/posts/{postId}",
    request_body = AuthorClaim,
    params(("postId" = String, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post and all embedded comments/replies deleted"),
        (status = 404, description = "Post not found"),
        (status = 403, description = "Author mismatch")
    )
)]
pub async fn delete_post(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<AuthorClaim>,
) -> Result<HttpResponse, ApiError> {
    data.repo
        .delete_post(&path.into_inner(), &payload.author_username)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Post deleted successfully" })))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{postId}/like",
    request_body = LikeRequest,
    params(("postId" = String, Path, description = "Post id")),
    responses(
        (status = 200, description = "Like toggled", body = LikeOutcome),
        (status = 404, description = "Post not found")
    )
)]
pub async fn toggle_like(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<LikeRequest>,
) -> Result<HttpResponse, ApiError> {
    require(&payload.user_id, "userId")?;
    let outcome = data
        .repo
        .toggle_like(&path.into_inner(), &payload.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{postId}/comments",
    request_body = NewComment,
    responses(
        (status = 200, description = "Comment appended", body = Comment),
        (status = 404, description = "Post not found")
    )
)]
pub async fn add_comment(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    require(&payload.content, "content")?;
    require(&payload.author_username, "authorUsername")?;
    let payload = payload.into_inner();
    let comment = data
        .repo
        .add_comment(&path.into_inner(), payload.content, payload.author_username)
        .await?;
    Ok(HttpResponse::Ok().json(comment))
}

#[utoipa::path(
    put,
    path = "/api/v1/posts/{postId}/comments/{commentId}",
    request_body = NewComment,
    responses(
        (status = 200, description = "Comment edited", body = Comment),
        (status = 404, description = "Post or comment not found"),
        (status = 403, description = "Author mismatch")
    )
)]
pub async fn edit_comment(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    require(&payload.content, "content")?;
    let (post_id, comment_id) = path.into_inner();
    let payload = payload.into_inner();
    let comment = data
        .repo
        .edit_comment(&post_id, &comment_id, payload.content, &payload.author_username)
        .await?;
    Ok(HttpResponse::Ok().json(comment))
}

#[utoipa::path(
    delete,
    path = "/api/v1/posts/{postId}/comments/{commentId}",
    request_body = AuthorClaim,
    responses(
        (status = 200, description = "Comment and its replies deleted"),
        (status = 404, description = "Post or comment not found"),
        (status = 403, description = "Author mismatch")
    )
)]
pub async fn delete_comment(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
    payload: web::Json<AuthorClaim>,
) -> Result<HttpResponse, ApiError> {
    let (post_id, comment_id) = path.into_inner();
    data.repo
        .delete_comment(&post_id, &comment_id, &payload.author_username)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Comment deleted successfully" })))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{postId}/comments/{commentId}/replies",
    request_body = NewComment,
    responses(
        (status = 200, description = "Reply appended", body = Reply),
        (status = 404, description = "Post or comment not found")
    )
)]
pub async fn add_reply(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    require(&payload.content, "content")?;
    require(&payload.author_username, "authorUsername")?;
    let (post_id, comment_id) = path.into_inner();
    let payload = payload.into_inner();
    let reply = data
        .repo
        .add_reply(&post_id, &comment_id, payload.content, payload.author_username)
        .await?;
    Ok(HttpResponse::Ok().json(reply))
}

#[utoipa::path(
    post,
    path = "/api/v1/comments/{commentId}/replies",
    request_body = NewComment,
    responses(
        (status = 200, description = "Reply appended", body = Reply),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn add_reply_by_comment(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    require(&payload.content, "content")?;
    require(&payload.author_username, "authorUsername")?;
    let payload = payload.into_inner();
    let reply = data
        .repo
        .add_reply_by_comment(&path.into_inner(), payload.content, payload.author_username)
        .await?;
    Ok(HttpResponse::Ok().json(reply))
}

#[utoipa::path(
    put,
    path = "/api/v1/posts/{postId}/comments/{commentId}/replies/{replyId}",
    request_body = NewComment,
    responses(
        (status = 200, description = "Reply edited", body = Reply),
        (status = 404, description = "Post, comment or reply not found"),
        (status = 403, description = "Author mismatch")
    )
)]
pub async fn edit_reply(
    data: web::Data<AppState>,
    path: web::Path<(String, String, String)>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    require(&payload.content, "content")?;
    let (post_id, comment_id, reply_id) = path.into_inner();
    let payload = payload.into_inner();
    let reply = data
        .repo
        .edit_reply(
            &post_id,
            &comment_id,
            &reply_id,
            payload.content,
            &payload.author_username,
        )
        .await?;
    Ok(HttpResponse::Ok().json(reply))
}

#[utoipa::path(
    delete,
    path = "/api/v1/posts/{postId}/comments/{commentId}/replies/{replyId}",
    request_body = AuthorClaim,
    responses(
        (status = 200, description = "Reply deleted"),
        (status = 404, description = "Post, comment or reply not found"),
        (status = 403, description = "Author mismatch")
    )
)]
pub async fn delete_reply(
    data: web::Data<AppState>,
    path: web::Path<(String, String, String)>,
    payload: web::Json<AuthorClaim>,
) -> Result<HttpResponse, ApiError> {
    let (post_id, comment_id, reply_id) = path.into_inner();
    data.repo
        .delete_reply(&post_id, &comment_id, &reply_id, &payload.author_username)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Reply deleted successfully" })))
}

#[derive(Debug, serde::Deserialize)]
pub struct SearchQuery {
    pub username: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/users/search",
    params(("username" = String, Query, description = "Substring to match, case-insensitive")),
    responses(
        (status = 200, description = "Matching authors with post counts, most recently active first", body = [UserSearchResult]),
        (status = 400, description = "Missing username parameter")
    )
)]
pub async fn search_users(
    data: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let needle = query
        .username
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or(ApiError::Validation("username"))?;
    let authors = data.repo.search_authors(needle).await?;
    Ok(HttpResponse::Ok().json(authors))
}

// ---------------- image attachment pipeline -----------------------

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ImageUploadResponse {
    pub hash: String,
    pub mime: String,
    pub size: usize,
    pub duplicate: bool, // true when upload was a duplicate (idempotent)
}

const IMAGE_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

#[utoipa::path(
    post,
    path = "/api/v1/images",
    responses(
        (status = 201, description = "Image stored (new)", body = ImageUploadResponse),
        (status = 200, description = "Image already existed (idempotent)", body = ImageUploadResponse),
        (status = 415, description = "Unsupported media type"),
        (status = 413, description = "Payload too large"),
    )
)]
pub async fn upload_image(
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    use actix_web::http::StatusCode;
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        match field.content_disposition().get_name() {
            Some("file") => {}
            _ => continue,
        }
        let mut field_stream = field;
        let mut hasher = Sha256::new();
        while let Some(chunk) = field_stream.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > IMAGE_SIZE_LIMIT {
                return Ok(HttpResponse::build(StatusCode::PAYLOAD_TOO_LARGE).finish());
            }
            hasher.update(&chunk);
            bytes.extend_from_slice(&chunk);
        }
        let hash = format!("{:x}", hasher.finalize());
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        if !ALLOWED_MIME.contains(&mime.as_str()) {
            return Ok(HttpResponse::UnsupportedMediaType().finish());
        }
        let (status_code, duplicate) = match data.image_store.save(&hash, &bytes).await {
            Ok(()) => (StatusCode::CREATED, false),
            Err(ImageStoreError::Duplicate) => (StatusCode::OK, true),
            Err(e) => {
                log::error!("image_store save error: {e}");
                return Err(ApiError::Internal);
            }
        };
        let resp = ImageUploadResponse { hash, mime, size: bytes.len(), duplicate };
        return Ok(HttpResponse::build(status_code).json(resp));
    }
    Ok(HttpResponse::BadRequest().finish())
}

pub async fn get_image(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let hash = path.into_inner();
    if !crate::storage::is_content_hash(&hash) {
        return Err(ApiError::ImageNotFound);
    }
    match data.image_store.load(&hash).await {
        Ok((bytes, mime)) => Ok(HttpResponse::Ok()
            .insert_header(("Content-Type", mime))
            .body(bytes)),
        Err(ImageStoreError::NotFound) => Err(ApiError::ImageNotFound),
        Err(e) => {
            log::error!("image_store load error: {e}");
            Err(ApiError::Internal)
        }
    }
}
