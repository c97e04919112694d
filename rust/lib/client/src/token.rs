//! Access-token expiry checks.
//!
//! The client never verifies signatures (it has no key); it only reads the
//! `exp` claim to decide whether a token is worth sending.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: i64,
}

/// The token's `exp` claim (seconds since epoch), if it has a decodable one.
pub fn expiry(token: &str) -> Option<i64> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);

    jsonwebtoken::decode::<ExpiryClaim>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims.exp)
        .ok()
}

/// `true` when `now + buffer_secs < exp`. Missing or undecodable tokens
/// are never valid.
pub fn is_valid_at(token: Option<&str>, buffer_secs: i64, now: i64) -> bool {
    token
        .and_then(expiry)
        .is_some_and(|exp| now.saturating_add(buffer_secs) < exp)
}

pub fn is_token_valid(token: Option<&str>, buffer_secs: i64) -> bool {
    is_valid_at(token, buffer_secs, chrono::Utc::now().timestamp())
}
