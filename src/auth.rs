//! Bearer-token check. Tokens are HS256 JWTs signed with the shared secret.
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::TypedHeader;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use constant_time_eq::constant_time_eq;
use headers::{authorization::Bearer, Authorization};
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

const MAX_TOKEN_LEN: usize = 4096;
const SUPPORTED_ALG: &str = "HS256";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No token provided")]
    Missing,
    /// The reason is logged, never returned to the caller.
    #[error("Invalid token")]
    Invalid(&'static str),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::Invalid(reason) = &self {
            debug!("Rejected bearer token: {}", reason);
        }
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": self.to_string() })),
        )
            .into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    /// Expiry, seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

/// `shape_error` is reported when the segment is JSON but not a `T`.
fn decode_part<T: DeserializeOwned>(part: &str, shape_error: &'static str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|_| AuthError::Invalid("segment is not base64url"))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|_| AuthError::Invalid("segment is not valid JSON"))?;
    serde_json::from_value(value).map_err(|_| AuthError::Invalid(shape_error))
}

pub fn verify_token(token: &str, secret: &[u8], now: DateTime<Utc>) -> Result<Claims, AuthError> {
    if token.len() > MAX_TOKEN_LEN {
        return Err(AuthError::Invalid("token exceeds max length"));
    }
    let parts: Vec<&str> = token.split('.').collect();
    let [header_part, payload_part, sig_part] = parts.as_slice() else {
        return Err(AuthError::Invalid("token must have three segments"));
    };

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| AuthError::Invalid("unusable signing secret"))?;
    mac.update(header_part.as_bytes());
    mac.update(b".");
    mac.update(payload_part.as_bytes());
    let computed = mac.finalize().into_bytes();
    let provided = URL_SAFE_NO_PAD
        .decode(sig_part)
        .map_err(|_| AuthError::Invalid("signature is not base64url"))?;
    if provided.len() != computed.len() || !constant_time_eq(&computed, &provided) {
        return Err(AuthError::Invalid("signature mismatch"));
    }

    let header: Header = decode_part(header_part, "header has no alg")?;
    if header.alg != SUPPORTED_ALG {
        return Err(AuthError::Invalid("unsupported algorithm"));
    }

    let claims: Claims = decode_part(payload_part, "claims lack userId or email")?;
    if let Some(exp) = claims.exp {
        if exp <= now.timestamp() {
            return Err(AuthError::Invalid("token expired"));
        }
    }
    Ok(claims)
}

/// Extractor for routes that require a valid bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AuthError::Missing)?;
        let claims = verify_token(bearer.token(), state.token_secret.as_bytes(), Utc::now())?;
        Ok(AuthUser(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &[u8] = b"unit-test-secret";

    fn sign(header: &str, claims: &str, secret: &[u8]) -> String {
        let h = URL_SAFE_NO_PAD.encode(header);
        let p = URL_SAFE_NO_PAD.encode(claims);
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(format!("{h}.{p}").as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{h}.{p}.{sig}")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    const HS256: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

    #[test]
    fn accepts_valid_token() {
        let token = sign(
            HS256,
            r#"{"userId":"u1","email":"a@b.c","iat":1700000000,"exp":1900000000}"#,
            SECRET,
        );
        let claims = verify_token(&token, SECRET, now()).unwrap();
        assert_eq!(claims.user_id, "u1");
        assert_eq!(claims.email, "a@b.c");
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = sign(HS256, r#"{"userId":"u1","email":"a@b.c"}"#, b"other");
        assert_eq!(
            verify_token(&token, SECRET, now()),
            Err(AuthError::Invalid("signature mismatch"))
        );
    }

    #[test]
    fn rejects_expired_token() {
        let token = sign(HS256, r#"{"userId":"u1","email":"a@b.c","exp":1600000000}"#, SECRET);
        assert_eq!(
            verify_token(&token, SECRET, now()),
            Err(AuthError::Invalid("token expired"))
        );
    }

    #[test]
    fn rejects_other_algorithms_and_shapes() {
        let none_alg = sign(r#"{"alg":"none"}"#, r#"{"userId":"u1","email":"a@b.c"}"#, SECRET);
        assert!(verify_token(&none_alg, SECRET, now()).is_err());
        assert!(verify_token("abc.def", SECRET, now()).is_err());
        assert!(verify_token("", SECRET, now()).is_err());
    }

    #[test]
    fn rejects_claims_without_user() {
        let token = sign(HS256, r#"{"email":"a@b.c"}"#, SECRET);
        assert_eq!(
            verify_token(&token, SECRET, now()),
            Err(AuthError::Invalid("claims lack userId or email"))
        );
    }

    #[test]
    fn tells_malformed_json_apart_from_wrong_shape() {
        let token = sign(HS256, "{not json", SECRET);
        assert_eq!(
            verify_token(&token, SECRET, now()),
            Err(AuthError::Invalid("segment is not valid JSON"))
        );
        let token = sign(r#"{"typ":"JWT"}"#, r#"{"userId":"u1","email":"a@b.c"}"#, SECRET);
        assert_eq!(
            verify_token(&token, SECRET, now()),
            Err(AuthError::Invalid("header has no alg"))
        );
    }
}
