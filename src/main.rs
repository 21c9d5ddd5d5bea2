use actix_cors::Cors;
use actix_web::{middleware::Compress, App, HttpServer};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use murmur::openapi::ApiDoc;
use murmur::storage::build_image_store;
use murmur::{config, AppState, SecurityHeaders};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Environment comes from the outside (shell, systemd, Docker); load
    // .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping murmur server");

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let repo = {
        info!("Using in-memory document store");
        murmur::repo::inmem::InMemRepo::new()
    };

    #[cfg(feature = "postgres-store")]
    let repo = {
        use sqlx::postgres::PgPoolOptions;
        let db_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres-store");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .expect("Failed to connect to Postgres");
        let repo = murmur::repo::pg::PgRepo::new(pool);
        repo.ensure_schema().await.expect("Failed to ensure schema");
        info!("Using Postgres document store");
        repo
    };

    let image_store = build_image_store();
    let openapi = ApiDoc::openapi();

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Ok(front) = std::env::var("FRONTEND_URL") {
                c = c.allowed_origin(&front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::from_env())
            .wrap(cors)
            .configure(config)
            .service(SwaggerUi::new("/docs").url("/docs/openapi.json", openapi.clone()))
            .app_data(actix_web::web::Data::new(AppState {
                repo: Arc::new(repo.clone()),
                image_store: image_store.clone(),
            }))
    })
    .bind(&bind_addr)?;

    info!("Listening on http://{bind_addr}");

    server.run().await
}
