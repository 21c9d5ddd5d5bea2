#![cfg(feature = "inmem-store")]

use actix_web::{test, App};
use murmur::repo::inmem::InMemRepo;
use murmur::storage::FsImageStore;
use murmur::{config, AppState, SecurityHeaders};
use serial_test::serial;
use std::sync::Arc;

fn setup_env() {
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("MURMUR_DATA_DIR", tmp.path().to_str().unwrap());
    std::mem::forget(tmp);
}

macro_rules! app {
    () => {
        test::init_service(
            App::new()
                .wrap(SecurityHeaders::from_env())
                .app_data(actix_web::web::Data::new(AppState {
                    repo: Arc::new(InMemRepo::new()),
                    image_store: Arc::new(FsImageStore::new()),
                }))
                .configure(config),
        )
        .await
    };
}

async fn json_body(resp: actix_web::dev::ServiceResponse) -> serde_json::Value {
    serde_json::from_slice(&test::read_body(resp).await).unwrap()
}

#[actix_web::test]
#[serial]
async fn post_feed_flow() {
    setup_env();
    let app = app!();

    // empty feed
    let req = test::TestRequest::get().uri("/api/v1/posts").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(json_body(resp).await.as_array().unwrap().len(), 0);

    // create a post
    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(serde_json::json!({"content":"hello","authorUsername":"Fox1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let post = json_body(resp).await;
    let post_id = post["id"].as_str().unwrap().to_string();
    assert_eq!(post["likes"], 0);
    assert_eq!(post["comments"].as_array().unwrap().len(), 0);

    // author-filtered feed
    let req = test::TestRequest::get()
        .uri("/api/v1/posts?username=Fox1")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let feed = json_body(resp).await;
    assert_eq!(feed.as_array().unwrap().len(), 1);

    // edit by author
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/posts/{post_id}"))
        .set_json(serde_json::json!({"content":"edited","authorUsername":"Fox1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let edited = json_body(resp).await;
    assert_eq!(edited["content"], "edited");
    assert!(edited["updatedAt"].is_string());

    // edit by someone else: 403, content untouched
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/posts/{post_id}"))
        .set_json(serde_json::json!({"content":"tampered","authorUsername":"Bear2"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
    let req = test::TestRequest::get().uri("/api/v1/posts").to_request();
    let feed = json_body(test::call_service(&app, req).await).await;
    assert_eq!(feed[0]["content"], "edited");

    // delete
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/posts/{post_id}"))
        .set_json(serde_json::json!({"authorUsername":"Fox1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        json_body(resp).await["message"],
        "Post deleted successfully"
    );

    // further edits hit 404
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/posts/{post_id}"))
        .set_json(serde_json::json!({"content":"x","authorUsername":"Fox1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
#[serial]
async fn like_toggle_endpoint() {
    setup_env();
    let app = app!();

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(serde_json::json!({"content":"likeable","authorUsername":"Fox1"}))
        .to_request();
    let post = json_body(test::call_service(&app, req).await).await;
    let post_id = post["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/posts/{post_id}/like"))
        .set_json(serde_json::json!({"userId":"u1"}))
        .to_request();
    let body = json_body(test::call_service(&app, req).await).await;
    assert_eq!(body, serde_json::json!({"likes": 1, "hasLiked": true}));

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/posts/{post_id}/like"))
        .set_json(serde_json::json!({"userId":"u1"}))
        .to_request();
    let body = json_body(test::call_service(&app, req).await).await;
    assert_eq!(body, serde_json::json!({"likes": 0, "hasLiked": false}));

    // unknown post
    let req = test::TestRequest::post()
        .uri("/api/v1/posts/missing/like")
        .set_json(serde_json::json!({"userId":"u1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
#[serial]
async fn comment_and_reply_routes() {
    setup_env();
    let app = app!();

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(serde_json::json!({"content":"hello","authorUsername":"Fox1"}))
        .to_request();
    let post = json_body(test::call_service(&app, req).await).await;
    let post_id = post["id"].as_str().unwrap().to_string();

    // add comment
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/posts/{post_id}/comments"))
        .set_json(serde_json::json!({"content":"hi","authorUsername":"Bear2"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let comment = json_body(resp).await;
    let comment_id = comment["id"].as_str().unwrap().to_string();

    // add reply through the post-scoped route
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/posts/{post_id}/comments/{comment_id}/replies"))
        .set_json(serde_json::json!({"content":"yo","authorUsername":"Fox1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let reply = json_body(resp).await;
    let reply_id = reply["id"].as_str().unwrap().to_string();

    // reply to a nonexistent comment: 404 scoped to the comment
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/posts/{post_id}/comments/missing/replies"))
        .set_json(serde_json::json!({"content":"yo","authorUsername":"Fox1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    assert_eq!(json_body(resp).await["error"], "Comment not found");

    // edit reply by non-author: 403
    let req = test::TestRequest::put()
        .uri(&format!(
            "/api/v1/posts/{post_id}/comments/{comment_id}/replies/{reply_id}"
        ))
        .set_json(serde_json::json!({"content":"tampered","authorUsername":"Bear2"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    // delete the comment by its author; replies cascade
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/posts/{post_id}/comments/{comment_id}"))
        .set_json(serde_json::json!({"authorUsername":"Bear2"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get().uri("/api/v1/posts").to_request();
    let feed = json_body(test::call_service(&app, req).await).await;
    assert_eq!(feed[0]["comments"].as_array().unwrap().len(), 0);

    // the reply is gone with its parent
    let req = test::TestRequest::put()
        .uri(&format!(
            "/api/v1/posts/{post_id}/comments/{comment_id}/replies/{reply_id}"
        ))
        .set_json(serde_json::json!({"content":"x","authorUsername":"Fox1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
#[serial]
async fn comment_scoped_reply_route() {
    setup_env();
    let app = app!();

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(serde_json::json!({"content":"hello","authorUsername":"Fox1"}))
        .to_request();
    let post = json_body(test::call_service(&app, req).await).await;
    let post_id = post["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/posts/{post_id}/comments"))
        .set_json(serde_json::json!({"content":"hi","authorUsername":"Bear2"}))
        .to_request();
    let comment = json_body(test::call_service(&app, req).await).await;
    let comment_id = comment["id"].as_str().unwrap().to_string();

    // no post id supplied; the comment id alone resolves the aggregate
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/comments/{comment_id}/replies"))
        .set_json(serde_json::json!({"content":"yo","authorUsername":"Fox1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::post()
        .uri("/api/v1/comments/missing/replies")
        .set_json(serde_json::json!({"content":"yo","authorUsername":"Fox1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    assert_eq!(json_body(resp).await["error"], "Comment not found");
}

#[actix_web::test]
#[serial]
async fn validation_rejects_empty_fields() {
    setup_env();
    let app = app!();

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(serde_json::json!({"content":"  ","authorUsername":"Fox1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(json_body(resp).await["error"], "content is required");

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(serde_json::json!({"content":"hello","authorUsername":""}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // user search without its query parameter
    let req = test::TestRequest::get().uri("/api/v1/users/search").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
#[serial]
async fn user_search_returns_distinct_authors() {
    setup_env();
    let app = app!();

    for content in ["a", "b"] {
        let req = test::TestRequest::post()
            .uri("/api/v1/posts")
            .set_json(serde_json::json!({"content":content,"authorUsername":"HappyFox7"}))
            .to_request();
        test::call_service(&app, req).await;
    }

    let req = test::TestRequest::get()
        .uri("/api/v1/users/search?username=happy")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body = json_body(resp).await;
    let hits = body.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["username"], "HappyFox7");
    assert_eq!(hits[0]["postCount"], 2);
    assert!(hits[0]["latestPost"].is_string());
}

#[actix_web::test]
#[serial]
async fn responses_carry_security_headers() {
    setup_env();
    let app = app!();

    let req = test::TestRequest::get().uri("/api/v1/posts").to_request();
    let resp = test::call_service(&app, req).await;
    let headers = resp.headers();
    assert!(headers.get("content-security-policy").is_some());
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
}
