use crate::models::{
    AuthorClaim, Comment, LikeOutcome, LikeRequest, NewComment, NewPost, Post, Reply, UpdatePost,
    UserSearchResult,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_posts,
        crate::routes::create_post,
        crate::routes::update_post,
        crate::routes::delete_post,
        crate::routes::toggle_like,
        crate::routes::add_comment,
        crate::routes::edit_comment,
        crate::routes::delete_comment,
        crate::routes::add_reply,
        crate::routes::add_reply_by_comment,
        crate::routes::edit_reply,
        crate::routes::delete_reply,
        crate::routes::search_users,
        crate::routes::upload_image,
    ),
    components(schemas(
        Post, NewPost, UpdatePost, AuthorClaim,
        Comment, NewComment, Reply,
        LikeRequest, LikeOutcome, UserSearchResult,
        crate::routes::ImageUploadResponse
    )),
    tags(
        (name = "posts", description = "Post operations"),
        (name = "comments", description = "Comment and reply operations"),
        (name = "likes", description = "Like toggling"),
    )
)]
pub struct ApiDoc;
