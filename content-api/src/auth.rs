//! Bearer token authentication for the `/api` routes.
//!
//! Tokens are compact HS256 JSON Web Tokens signed with the configured key.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const BEARER: &str = "Bearer";
const SUPPORTED_ALGORITHM: &str = "HS256";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,
    #[error("malformed Authorization header")]
    MalformedHeader,
    #[error("undefined bearer token")]
    UndefinedToken,
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
}

impl From<base64::DecodeError> for AuthError {
    fn from(err: base64::DecodeError) -> Self {
        AuthError::MalformedToken(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::MalformedToken(err.to_string())
    }
}

/// Extracts the token from an `Authorization` header value of the form
/// `Bearer <token>`.
pub fn bearer_token(header: &str) -> Result<&str, AuthError> {
    let mut parts = header.split_whitespace();
    let (Some(BEARER), Some(token), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(AuthError::MalformedHeader);
    };

    // some clients send the literal string when they have no token
    if token == "undefined" {
        return Err(AuthError::UndefinedToken);
    }

    Ok(token)
}

#[derive(Debug, Deserialize)]
struct Header {
    alg: String,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct Claims {
    /// Expiry, in seconds since the epoch
    #[serde(default)]
    pub exp: Option<u64>,
    #[serde(default)]
    pub sub: Option<String>,
}

/// Verifies signed bearer tokens.
#[derive(Clone)]
pub struct TokenValidator {
    key: Vec<u8>,
}

impl TokenValidator {
    pub fn new(key: &str) -> Self {
        TokenValidator {
            key: key.as_bytes().to_vec(),
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        self.validate_at(token, now)
    }

    /// Validates `token` as of `now` (seconds since the epoch).
    pub fn validate_at(&self, token: &str, now: u64) -> Result<Claims, AuthError> {
        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(AuthError::MalformedToken("expected three segments".into()));
        };

        let decoded: Header = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header)?)?;
        if decoded.alg != SUPPORTED_ALGORITHM {
            return Err(AuthError::UnsupportedAlgorithm(decoded.alg));
        }

        let signature = URL_SAFE_NO_PAD.decode(signature)?;
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|_| AuthError::InvalidSignature)?;
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::InvalidSignature)?;

        let claims: Claims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload)?)?;
        if let Some(exp) = claims.exp
            && exp <= now
        {
            return Err(AuthError::Expired);
        }

        Ok(claims)
    }
}
