use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

// Taken from https://github.com/tokio-rs/axum/blob/main/examples/anyhow-error-response/src/main.rs
#[derive(Debug)]
pub struct VqaRunnerError {
    pub status: StatusCode,
    pub message: HttpErrorResponse,
}

#[derive(Debug, Serialize)]
pub struct HttpErrorResponse {
    error: String,
}

impl From<String> for HttpErrorResponse {
    fn from(message: String) -> Self {
        HttpErrorResponse { error: message }
    }
}

impl From<&str> for HttpErrorResponse {
    fn from(message: &str) -> Self {
        HttpErrorResponse {
            error: message.to_string(),
        }
    }
}

impl IntoResponse for VqaRunnerError {
    fn into_response(self) -> Response {
        let mut res = Json(self.message).into_response();
        *res.status_mut() = self.status;
        res
    }
}

// The wire contract keeps failure bodies opaque, so the converted error is
// never echoed back to the caller.
impl<E> From<E> for VqaRunnerError
where
    E: Into<anyhow::Error>,
{
    fn from(_err: E) -> Self {
        VqaRunnerError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: HttpErrorResponse::from(GENERIC_ERROR_BODY),
        }
    }
}

/// Body served for every failed answer request.
pub const GENERIC_ERROR_BODY: &str = "Internal Server Error";

pub type VqaResult<T, E = VqaRunnerError> = Result<T, E>;

#[macro_export]
macro_rules! bail_server {
    ($error_message:expr) => {
        return Err($crate::error::VqaRunnerError {
            status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            message: $crate::error::HttpErrorResponse::from($error_message),
        })
    };
    ($status_code:expr, $error_message:expr) => {
        return Err($crate::error::VqaRunnerError {
            status: $status_code,
            message: $crate::error::HttpErrorResponse::from($error_message),
        })
    };
    ($status:expr, $fmt:expr $(, $arg:expr)*) => {
        return Err($crate::error::VqaRunnerError {
            status: $status,
            message: $crate::error::HttpErrorResponse::from(format!($fmt $(, $arg)*)),
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn converted_errors_are_opaque_500s() {
        let err = VqaRunnerError::from(anyhow!("cuda driver exploded"));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);

        let body = serde_json::to_value(&err.message).unwrap();
        assert_eq!(body["error"], GENERIC_ERROR_BODY);
    }

    #[test]
    fn error_body_serializes_to_single_error_key() {
        let body = serde_json::to_value(HttpErrorResponse::from("nope")).unwrap();
        let object = body.as_object().unwrap();
        assert_eq!(object.len(), 1);
        assert_eq!(object["error"], "nope");
    }
}
