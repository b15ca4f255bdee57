use apollo_client::ApolloError;
use apollo_mcp::{CallToolResult, HandlerError};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::credentials::ACCEPTED_CREDENTIAL_METHODS;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{message}")]
    Validation {
        message: String,
        required: Vec<String>,
    },
    #[error("{0}")]
    Credential(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    /// A backend lookup came back empty (e.g. no organization for a company name).
    #[error("{0}")]
    NotFound(String),
    #[error("Apollo API error {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn validation(message: impl Into<String>, required: &[&str]) -> Self {
        Self::Validation {
            message: message.into(),
            required: required.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn missing_credential() -> Self {
        Self::Credential("an Apollo.io API key is required".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Credential(_) => StatusCode::UNAUTHORIZED,
            Self::SessionNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UnknownOperation(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Backend { .. } | Self::Transport(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::Credential(_) => "missing_credentials",
            Self::SessionNotFound(_) => "session_not_found",
            Self::UnknownOperation(_) => "unknown_operation",
            Self::NotFound(_) => "not_found",
            Self::Backend { .. } => "backend_error",
            Self::Transport(_) => "transport_error",
            Self::Internal(_) => "internal_error",
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::Validation { required, .. } if !required.is_empty() => {
                Some(serde_json::json!({ "required": required }))
            }
            Self::Credential(_) => Some(serde_json::json!({
                "accepted_methods": ACCEPTED_CREDENTIAL_METHODS,
            })),
            Self::SessionNotFound(id) => Some(serde_json::json!({ "session_id": id })),
            Self::UnknownOperation(name) => Some(serde_json::json!({ "operation": name })),
            Self::Backend { status, body } => {
                let body = serde_json::from_str::<Value>(body)
                    .unwrap_or_else(|_| Value::String(body.clone()));
                Some(serde_json::json!({ "status": status, "body": body }))
            }
            _ => None,
        }
    }

    pub fn to_response_body(&self) -> ErrorResponse {
        ErrorResponse {
            success: false,
            code: self.code().to_string(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    /// Shape a failed `tools/call` for the framed protocols.
    ///
    /// Backend-side failures become an `isError` tool result; caller mistakes become
    /// JSON-RPC errors.
    pub fn into_tool_outcome(self) -> Result<CallToolResult, HandlerError> {
        match self {
            Self::UnknownOperation(name) => Err(HandlerError::UnknownTool(name)),
            Self::Validation { message, required } => Err(HandlerError::InvalidParams {
                message,
                data: (!required.is_empty()).then(|| serde_json::json!({ "required": required })),
            }),
            e @ (Self::Backend { .. } | Self::Transport(_) | Self::NotFound(_)) => {
                let meta = serde_json::json!({ "code": e.code() });
                Ok(CallToolResult::error_text(
                    format!("Apollo.io API error: {e}"),
                    Some(meta),
                ))
            }
            e @ Self::Credential(_) => Err(HandlerError::Internal(anyhow::anyhow!(
                "{e}; supply it via one of: {}",
                ACCEPTED_CREDENTIAL_METHODS.join(", ")
            ))),
            e @ (Self::SessionNotFound(_) | Self::Internal(_)) => {
                Err(HandlerError::Internal(anyhow::anyhow!("{e}")))
            }
        }
    }
}

impl From<ApolloError> for GatewayError {
    fn from(e: ApolloError) -> Self {
        match e {
            ApolloError::Validation { message, required } => Self::Validation { message, required },
            ApolloError::Api { status, body } => Self::Backend { status, body },
            ApolloError::Transport(msg) => Self::Transport(msg),
            ApolloError::NotFound(msg) => Self::NotFound(msg),
            e @ (ApolloError::Decode(_) | ApolloError::Config(_)) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            match &self {
                Self::Internal(_) => error!(error = %self, "request failed"),
                _ => warn!(code = self.code(), error = %self, "backend call failed"),
            }
        }
        (status, Json(self.to_response_body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        let cases = [
            (GatewayError::validation("company is required", &["company"]), 400),
            (GatewayError::missing_credential(), 401),
            (GatewayError::SessionNotFound("s".to_string()), 404),
            (GatewayError::UnknownOperation("nope".to_string()), 501),
            (
                GatewayError::Backend {
                    status: 422,
                    body: "{}".to_string(),
                },
                500,
            ),
            (GatewayError::Transport("refused".to_string()), 500),
        ];
        for (err, want) in cases {
            assert_eq!(err.status().as_u16(), want, "{err:?}");
        }
    }

    #[test]
    fn unknown_operation_and_missing_argument_stay_distinct() {
        let unknown = GatewayError::UnknownOperation("nope".to_string()).to_response_body();
        let missing = GatewayError::validation("domain is required", &["domain"]).to_response_body();
        assert_ne!(unknown.code, missing.code);
        assert_eq!(unknown.details, Some(serde_json::json!({ "operation": "nope" })));
        assert_eq!(missing.details, Some(serde_json::json!({ "required": ["domain"] })));
    }

    #[test]
    fn credential_error_lists_accepted_methods() {
        let body = GatewayError::missing_credential().to_response_body();
        let methods = body.details.expect("details")["accepted_methods"].clone();
        assert_eq!(methods.as_array().map(Vec::len), Some(ACCEPTED_CREDENTIAL_METHODS.len()));
    }

    #[test]
    fn backend_failure_becomes_error_tool_result() {
        let out = GatewayError::from(ApolloError::Api {
            status: 403,
            body: r#"{"error":"forbidden"}"#.to_string(),
        })
        .into_tool_outcome()
        .expect("tool result");
        assert_eq!(out.is_error, Some(true));
        let v = serde_json::to_value(&out).expect("serialize");
        assert!(
            v["content"][0]["text"]
                .as_str()
                .is_some_and(|t| t.starts_with("Apollo.io API error:"))
        );
    }

    #[test]
    fn validation_becomes_invalid_params() {
        let out = GatewayError::validation("apollo_id is required", &["apollo_id"]).into_tool_outcome();
        assert!(matches!(out, Err(HandlerError::InvalidParams { .. })));
    }
}
