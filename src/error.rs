use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::aggregate::Entity;
use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{} not found", .0.name())]
    NotFound(Entity),
    #[error("Image not found")]
    ImageNotFound,
    #[error("Unauthorized")]
    Forbidden,
    #[error("{0} is required")]
    Validation(&'static str),
    #[error("internal error")]
    Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound(entity) => ApiError::NotFound(entity),
            RepoError::Forbidden => ApiError::Forbidden,
            RepoError::Internal(msg) => {
                log::error!("storage failure: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::NotFound(_) | ApiError::ImageNotFound => StatusCode::NOT_FOUND,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpResponse::build(status).json(ApiErrorBody { error: self.to_string() })
    }
}
