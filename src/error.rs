use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::RangeNotSatisfiable;

/// Failure before any response bytes were sent to the client.
///
/// Once headers are out, failures can only abort the body; see
/// [`TransferStream`](crate::TransferStream).
#[derive(Error, Debug)]
pub enum TransferError {
    #[error(transparent)]
    Unsatisfiable(#[from] RangeNotSatisfiable),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("file not found")]
    NotFound,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("upstream returned HTTP {0}")]
    UpstreamStatus(reqwest::StatusCode),

    #[error("upstream ignored the range request and answered HTTP {0}")]
    UpstreamIgnoredRange(reqwest::StatusCode),

    #[error("upstream partial response has no usable Content-Range")]
    UpstreamContentRange,
}

pub type TransferResult<T> = Result<T, TransferError>;

impl TransferError {
    pub fn status(&self) -> StatusCode {
        match self {
            TransferError::Unsatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            TransferError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            TransferError::NotFound => StatusCode::NOT_FOUND,
            TransferError::Io(e) if e.kind() == io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            TransferError::Io(_)
            | TransferError::Upstream(_)
            | TransferError::UpstreamStatus(_)
            | TransferError::UpstreamIgnoredRange(_)
            | TransferError::UpstreamContentRange => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TransferError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            TransferError::Unsatisfiable(e) => e.into_response(),
            TransferError::Upstream(_)
            | TransferError::UpstreamStatus(_)
            | TransferError::UpstreamIgnoredRange(_)
            | TransferError::UpstreamContentRange => {
                tracing::error!(error = %self, "remote download failed");
                (status, "failed to fetch remote file").into_response()
            }
            TransferError::Io(ref e) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %e, "local download failed");
                (status, "failed to read file").into_response()
            }
            _ => (status, self.to_string()).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum_extra::headers::ContentRange;

    use super::*;

    #[test]
    fn test_status_mapping() {
        let unsatisfiable = TransferError::from(RangeNotSatisfiable(Some(ContentRange::unsatisfied_bytes(10))));
        assert_eq!(StatusCode::RANGE_NOT_SATISFIABLE, unsatisfiable.status());
        assert_eq!(StatusCode::BAD_REQUEST, TransferError::InvalidUrl("x".into()).status());
        assert_eq!(StatusCode::NOT_FOUND, TransferError::NotFound.status());
        assert_eq!(
            StatusCode::NOT_FOUND,
            TransferError::Io(io::Error::from(io::ErrorKind::NotFound)).status()
        );
        assert_eq!(
            StatusCode::INTERNAL_SERVER_ERROR,
            TransferError::Io(io::Error::from(io::ErrorKind::PermissionDenied)).status()
        );
        assert_eq!(
            StatusCode::INTERNAL_SERVER_ERROR,
            TransferError::UpstreamStatus(StatusCode::BAD_GATEWAY).status()
        );
    }

    #[test]
    fn test_unsatisfiable_response() {
        let response = TransferError::from(RangeNotSatisfiable(Some(ContentRange::unsatisfied_bytes(54)))).into_response();
        assert_eq!(StatusCode::RANGE_NOT_SATISFIABLE, response.status());
        assert_eq!("bytes */54", response.headers().get("content-range").unwrap());
    }

    #[test]
    fn test_upstream_failure_response() {
        let response = TransferError::UpstreamStatus(StatusCode::NOT_FOUND).into_response();
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, response.status());

        let response = TransferError::UpstreamContentRange.into_response();
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, response.status());
    }
}
