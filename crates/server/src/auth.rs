//! Bearer-token authentication for HS256 JWTs.
//!
//! Only the signature, `exp` and `sub` are checked. `aud` is ignored.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use thiserror::Error;
use tracing::warn;

use consultai_core::config::AuthConfig;

use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, Default)]
pub struct AuthSettings {
    pub enabled: bool,
    pub jwt_secret: Option<SecretString>,
}

impl From<&AuthConfig> for AuthSettings {
    fn from(config: &AuthConfig) -> Self {
        Self { enabled: config.enabled, jwt_secret: config.jwt_secret.clone() }
    }
}

/// User id taken from the `sub` claim, stored in request extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,
    #[error("Invalid authorization header format")]
    InvalidScheme,
    #[error("Server configuration error")]
    MissingSecret,
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token: missing user ID")]
    MissingSubject,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

impl AuthError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingSecret => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[derive(Deserialize)]
struct JwtHeader {
    alg: String,
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

/// Resolves the user id for an `Authorization` header value.
pub fn authenticate(
    header: Option<&str>,
    secret: Option<&SecretString>,
    now: i64,
) -> Result<String, AuthError> {
    let header = header.ok_or(AuthError::MissingHeader)?;
    let token = header.strip_prefix("Bearer ").ok_or(AuthError::InvalidScheme)?;
    let secret = secret
        .map(|secret| secret.expose_secret().as_bytes())
        .filter(|secret| !secret.is_empty())
        .ok_or(AuthError::MissingSecret)?;

    let claims = verify_hs256(token.trim(), secret, now)?;
    claims.sub.filter(|sub| !sub.is_empty()).ok_or(AuthError::MissingSubject)
}

fn verify_hs256(token: &str, secret: &[u8], now: i64) -> Result<Claims, AuthError> {
    let mut segments = token.split('.');
    let (Some(header_segment), Some(payload_segment), Some(signature_segment), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return Err(AuthError::InvalidToken("Not enough segments".to_string()));
    };

    let header: JwtHeader = decode_segment(header_segment)?;
    if header.alg != "HS256" {
        return Err(AuthError::InvalidToken("The specified alg value is not allowed".to_string()));
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature_segment)
        .map_err(|_| AuthError::InvalidToken("Invalid crypto padding".to_string()))?;
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|error| AuthError::InvalidToken(error.to_string()))?;
    mac.update(header_segment.as_bytes());
    mac.update(b".");
    mac.update(payload_segment.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| AuthError::InvalidToken("Signature verification failed".to_string()))?;

    let claims: Claims = decode_segment(payload_segment)?;
    if claims.exp.is_some_and(|exp| exp <= now) {
        return Err(AuthError::Expired);
    }
    Ok(claims)
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthError::InvalidToken("Invalid segment encoding".to_string()))?;
    serde_json::from_slice(&bytes).map_err(|error| AuthError::InvalidToken(error.to_string()))
}

/// Rejects the request unless auth is disabled or the bearer token is valid.
pub async fn require_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if !state.auth.enabled {
        return next.run(request).await;
    }

    let header = request.headers().get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    match authenticate(header, state.auth.jwt_secret.as_ref(), Utc::now().timestamp()) {
        Ok(user_id) => {
            request.extensions_mut().insert(AuthenticatedUser(user_id));
            next.run(request).await
        }
        Err(error) => {
            warn!(
                event_name = "http.auth.rejected",
                path = %request.uri().path(),
                error = %error,
                "request rejected by bearer-token check"
            );
            error.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use hmac::Mac;
    use secrecy::SecretString;
    use serde_json::{json, Value};

    use super::{authenticate, AuthError, HmacSha256};

    const NOW: i64 = 1_760_000_000;

    fn sign(claims: &Value, secret: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(json!({ "alg": "HS256", "typ": "JWT" }).to_string());
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
        mac.update(format!("{header}.{payload}").as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{header}.{payload}.{signature}")
    }

    fn secret() -> SecretString {
        SecretString::from("test-secret".to_string())
    }

    #[test]
    fn valid_token_yields_subject() {
        let token = sign(&json!({ "sub": "user-1", "exp": NOW + 60, "aud": "ignored" }), "test-secret");
        let header = format!("Bearer {token}");

        assert_eq!(authenticate(Some(&header), Some(&secret()), NOW), Ok("user-1".to_string()));
    }

    #[test]
    fn header_problems_are_reported_before_the_token_is_read() {
        assert_eq!(authenticate(None, Some(&secret()), NOW), Err(AuthError::MissingHeader));
        assert_eq!(authenticate(Some("Basic abc"), Some(&secret()), NOW), Err(AuthError::InvalidScheme));
        assert_eq!(authenticate(Some("Bearer abc"), None, NOW), Err(AuthError::MissingSecret));
    }

    #[test]
    fn token_failures_map_to_specific_errors() {
        let expired = sign(&json!({ "sub": "user-1", "exp": NOW - 1 }), "test-secret");
        assert_eq!(
            authenticate(Some(&format!("Bearer {expired}")), Some(&secret()), NOW),
            Err(AuthError::Expired)
        );

        let anonymous = sign(&json!({ "exp": NOW + 60 }), "test-secret");
        assert_eq!(
            authenticate(Some(&format!("Bearer {anonymous}")), Some(&secret()), NOW),
            Err(AuthError::MissingSubject)
        );

        let forged = sign(&json!({ "sub": "user-1" }), "other-secret");
        assert_eq!(
            authenticate(Some(&format!("Bearer {forged}")), Some(&secret()), NOW),
            Err(AuthError::InvalidToken("Signature verification failed".to_string()))
        );

        assert!(matches!(
            authenticate(Some("Bearer not-a-jwt"), Some(&secret()), NOW),
            Err(AuthError::InvalidToken(_))
        ));
    }
}
