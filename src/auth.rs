//! Caller identity tokens
//!
//! Sessions are owned by the user named in an HS256 JWT carried as
//! `Authorization: Bearer <token>`.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub exp: u64,
}

pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Validate a token and return the user it names
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;
        if data.claims.user_id.is_empty() {
            return Err(AuthError::Invalid("empty userId".into()));
        }
        Ok(data.claims.user_id)
    }

    /// Mint a token for `user_id` valid for `ttl`
    pub fn issue(&self, user_id: &str, ttl: Duration) -> Result<String, AuthError> {
        let exp = chrono::Utc::now().timestamp().unsigned_abs() + ttl.as_secs();
        let claims = Claims {
            user_id: user_id.to_string(),
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Invalid(e.to_string()))
    }

    /// Verify the bearer token in a request's headers
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let value = headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::Missing)?
            .to_str()
            .map_err(|_| AuthError::Invalid("non-ascii authorization header".into()))?;
        self.verify(bearer(value)?)
    }
}

/// Extract the token from an `Authorization` header value
fn bearer(value: &str) -> Result<&str, AuthError> {
    let mut parts = value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::Missing)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::Invalid(format!("unsupported scheme {scheme}")));
    }
    let token = parts.next().ok_or(AuthError::Missing)?;
    if parts.next().is_some() {
        return Err(AuthError::Invalid("malformed authorization header".into()));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn issued_token_verifies_to_user() {
        let verifier = TokenVerifier::new("secret");
        let token = verifier.issue("user-7", Duration::from_secs(60)).unwrap();
        assert_eq!(verifier.verify(&token).unwrap(), "user-7");
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = TokenVerifier::new("a")
            .issue("u", Duration::from_secs(60))
            .unwrap();
        assert!(matches!(
            TokenVerifier::new("b").verify(&token),
            Err(AuthError::Invalid(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = TokenVerifier::new("secret");
        let claims = Claims {
            user_id: "u".into(),
            exp: 1_000,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert_eq!(verifier.verify(&token), Err(AuthError::Expired));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(
            TokenVerifier::new("s").verify("not.a.jwt"),
            Err(AuthError::Invalid(_))
        ));
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer("Bearer abc").unwrap(), "abc");
        assert_eq!(bearer("  bearer\tabc ").unwrap(), "abc");
        assert_eq!(bearer("Bearer"), Err(AuthError::Missing));
        assert!(matches!(bearer("Basic abc"), Err(AuthError::Invalid(_))));
        assert!(matches!(bearer("Bearer a b"), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn authenticate_reads_authorization_header() {
        let verifier = TokenVerifier::new("secret");
        let mut headers = HeaderMap::new();
        assert_eq!(verifier.authenticate(&headers), Err(AuthError::Missing));

        let token = verifier.issue("owner", Duration::from_secs(60)).unwrap();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        assert_eq!(verifier.authenticate(&headers).unwrap(), "owner");
    }
}
