use actix_web::error::BlockingError;
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use tracing::error;

/// Failure classes surfaced by the service layer. Request-shaped
/// problems and business-rule rejections map to 4xx, everything
/// infrastructural collapses to a 500 with details kept in the logs.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    StateConflict(String),
    #[error("database error")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ServiceError::StateConflict(message.into())
    }
}

impl From<BlockingError> for ServiceError {
    fn from(e: BlockingError) -> Self {
        ServiceError::Internal(anyhow::Error::new(e))
    }
}

impl actix_web::ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) | ServiceError::StateConflict(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Database(_) | ServiceError::Pool(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code() == StatusCode::INTERNAL_SERVER_ERROR {
            error!("{self:?}");
        }
        HttpResponse::build(self.status_code()).json(crate::responses::ApiMessage {
            success: false,
            message: self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;

    #[test]
    fn status_codes_follow_error_class() {
        assert_eq!(
            ServiceError::validation("bad amount").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::conflict("insufficient balance").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::not_found("member missing").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::from(diesel::result::Error::NotFound).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn database_details_never_reach_the_message() {
        let err = ServiceError::from(diesel::result::Error::NotFound);
        assert_eq!(err.to_string(), "database error");
    }
}
