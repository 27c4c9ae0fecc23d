use axum::response::{IntoResponse, Response};
use http::StatusCode;

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden(String),
    ResourceNotFound(String),
    ResourceAlreadyExists(String),
    PayloadTooLarge(String),
    RangeNotSatisfiable,
    InternalServerError(anyhow::Error),
}

impl AppError {
    pub fn bad_request<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::BadRequest(t.to_string())
    }

    pub fn resource_not_found<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::ResourceNotFound(t.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err).into_response(),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "invalid or missing device token".to_string(),
            )
                .into_response(),
            AppError::Forbidden(err) => (StatusCode::FORBIDDEN, err).into_response(),
            AppError::ResourceNotFound(err) => (StatusCode::NOT_FOUND, err).into_response(),
            AppError::ResourceAlreadyExists(err) => {
                (StatusCode::CONFLICT, err).into_response()
            }
            AppError::PayloadTooLarge(err) => {
                (StatusCode::PAYLOAD_TOO_LARGE, err).into_response()
            }
            AppError::RangeNotSatisfiable => (
                StatusCode::RANGE_NOT_SATISFIABLE,
                "requested range not satisfiable".to_string(),
            )
                .into_response(),
            AppError::InternalServerError(err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        AppError::InternalServerError(err.into())
    }
}
