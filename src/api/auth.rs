//! Basic authentication middleware for the management API.
//!
//! When basic auth is enabled in the server configuration, every request
//! must carry a matching `Authorization: Basic` header or it receives a
//! 401 response with a `WWW-Authenticate` challenge.

use crate::config::BasicAuthConfig;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;

/// Middleware enforcing HTTP basic authentication
pub async fn require_basic_auth(
    State(auth): State<BasicAuthConfig>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.enabled {
        return next.run(request).await;
    }

    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match header_value.and_then(decode_basic) {
        Some((username, password))
            if constant_time_eq(username.as_bytes(), auth.username.as_bytes())
                && constant_time_eq(password.as_bytes(), auth.password.as_bytes()) =>
        {
            next.run(request).await
        }
        Some(_) => unauthorized("invalid credentials"),
        None => unauthorized("authentication required"),
    }
}

/// Decode `Basic <base64(user:pass)>` into its parts
fn decode_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, password) = text.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Constant-time byte comparison; always inspects every byte
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

fn unauthorized(message: &str) -> Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(ApiError::unauthorized(message)),
    )
        .into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        header::HeaderValue::from_static("Basic realm=\"podsync\""),
    );
    response
}
