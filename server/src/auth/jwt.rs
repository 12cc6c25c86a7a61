use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;

use crate::auth::middleware::Claims;

/// Load or generate the HS256 secret shared with the identity provider.
/// Key is stored as raw bytes in data_dir/jwt_secret.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue an access token for `subject`, valid for `ttl_secs`.
/// The server itself only validates tokens; issuing is for the identity provider
/// side and for tests.
pub fn issue_access_token(
    secret: &[u8],
    subject: &str,
    username: Option<&str>,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: subject.to_string(),
        username: username.map(str::to_string),
        name: None,
        email: None,
        avatar: None,
        iat: now,
        exp: now + ttl_secs,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Validate an access token and return its claims.
pub fn validate_access_token(
    secret: &[u8],
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_token_validates() {
        let secret = [7u8; 32];
        let token = issue_access_token(&secret, "ext-alice", Some("alice"), 60).unwrap();
        let claims = validate_access_token(&secret, &token).unwrap();
        assert_eq!(claims.sub, "ext-alice");
        assert_eq!(claims.to_profile().username, "alice");
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let secret = [7u8; 32];
        // Past the default 60s leeway
        let token = issue_access_token(&secret, "ext-alice", None, -120).unwrap();
        let err = validate_access_token(&secret, &token).unwrap_err();
        assert_eq!(
            *err.kind(),
            jsonwebtoken::errors::ErrorKind::ExpiredSignature
        );
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = issue_access_token(&[1u8; 32], "ext-alice", None, 60).unwrap();
        assert!(validate_access_token(&[2u8; 32], &token).is_err());
    }
}
