use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

pub type AppResult<T> = Result<T, Error>;

/// every failure is terminal for the request it happens in, nothing here is retried
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// request body over the buffering cap
    #[error("Payload Too Large")]
    PayloadTooLarge(String),

    /// upstream unreachable, timed out, oversized or undecodable. the context is only logged
    #[error("Bad Gateway")]
    BadGateway(String),

    /// the message is fixed for clients, the context is only logged
    #[error("Error fetching content from TMDB")]
    MetadataLookup(String),

    #[error("Internal Server Error")]
    InternalServerError,

    #[error("{0}")]
    InternalServerErrorWithContext(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::MetadataLookup(_)
            | Self::InternalServerError
            | Self::InternalServerErrorWithContext(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Self::BadGateway(context) => error!("upstream failure: {}", context),
            Self::PayloadTooLarge(context) => debug!("rejected request body: {}", context),
            Self::MetadataLookup(context) => error!("metadata lookup failure: {}", context),
            Self::InternalServerErrorWithContext(context) => error!("internal error: {}", context),
            _ => {}
        }

        (self.status_code(), self.to_string()).into_response()
    }
}
