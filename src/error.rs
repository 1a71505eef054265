use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// The remote command completed but produced only stderr.
    #[error("remote command failed: {0}")]
    RemoteCommand(String),

    /// The exec channel failed before delivering a completion status.
    #[error("exec transport failed: {0}")]
    Transport(String),

    #[error("cluster API request failed: {0}")]
    Upstream(#[from] kube::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("namespace {0} is excluded")]
    NamespaceExcluded(String),

    #[error("scaling is disabled in configuration")]
    ScalingDisabled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: &'static str, namespace: &str, name: &str) -> Self {
        Self::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::RemoteCommand(_) => "REMOTE_COMMAND_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::NamespaceExcluded(_) => "NAMESPACE_EXCLUDED",
            Self::ScalingDisabled => "SCALING_DISABLED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NamespaceExcluded(_) | Self::ScalingDisabled => StatusCode::FORBIDDEN,
            Self::RemoteCommand(_) | Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Upstream(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: ErrorBody,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            success: false,
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };

        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"success":false,"error":{"code":"INTERNAL_ERROR","message":"failed to serialize error"}}"#
                .to_string()
        });

        (self.status(), [("content-type", "application/json")], json).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn not_found_maps_to_404_with_coded_body() {
        let error = Error::not_found("deployment", "staging", "web");
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert!(
            json["error"]["message"]
                .as_str()
                .unwrap()
                .contains("staging/web")
        );
    }

    #[tokio::test]
    async fn scaling_disabled_maps_to_403() {
        let response = Error::ScalingDisabled.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn invalid_request_maps_to_400() {
        let response = Error::InvalidRequest("replicas must be 0 or 1".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn remote_command_maps_to_502() {
        let error = Error::RemoteCommand("cat: /missing: No such file or directory".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], "REMOTE_COMMAND_ERROR");
    }

    #[test]
    fn error_display_is_stable() {
        let error = Error::not_found("pod", "demo", "web-0");
        assert_eq!(error.to_string(), "pod demo/web-0 not found");
        assert_eq!(
            Error::ScalingDisabled.to_string(),
            "scaling is disabled in configuration"
        );
    }
}
