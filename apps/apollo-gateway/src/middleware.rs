use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

/// Dedicated header for the server access token, for clients that need
/// `Authorization` for something else.
pub const SERVER_TOKEN_HEADER: &str = "x-gateway-token";

pub async fn require_server_token(
    State(server_token): State<Arc<str>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let headers = request.headers();
    let bearer = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));
    let dedicated = headers
        .get(SERVER_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok());

    let authorized = [bearer, dedicated].into_iter().flatten().any(|presented| {
        let a = presented.trim().as_bytes();
        let b = server_token.as_bytes();
        bool::from(a.ct_eq(b))
    });

    if !authorized {
        return Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"success":false,"code":"unauthorized","message":"missing or invalid server token"}"#,
            ))
            .unwrap_or_else(|_| Response::new(Body::empty()));
    }

    next.run(request).await
}
