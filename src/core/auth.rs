//! Bearer token verification for the control plane.
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::revocation::RevocationLedger;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    #[error("Not authenticated")]
    MissingToken,

    #[error("Token is invalid or has expired")]
    InvalidToken,

    #[error("Action requires admin permissions")]
    Forbidden,
}

/// Claims carried by tokens issued by the user service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: u64,
    pub iat: i64,
    pub exp: i64,
    pub email: String,
    #[serde(default)]
    pub admin: bool,
}

/// HS256 verifier for the shared user-service secret.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        if secret.is_empty() {
            tracing::warn!("Auth secret is empty; every token signed with an empty key is accepted");
        }
        let mut validation = Validation::new(Algorithm::HS256);
        // `sub` is a numeric user id, which jsonwebtoken only counts as present when it is a
        // string; presence of `sub` and `iat` is enforced by `Claims` deserialization instead.
        validation.set_required_spec_claims(&["exp"]);
        // The ledger forgets a revocation once `exp` has passed, so expiry must be exact.
        validation.leeway = 0;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Check signature and expiry and decode the claims.
    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token rejected");
                AuthError::InvalidToken
            })
    }

    /// Decode `token` and reject it if it was revoked by a logout.
    pub async fn verify(&self, token: &str, ledger: &RevocationLedger) -> Result<Claims, AuthError> {
        let claims = self.decode(token)?;
        if ledger.is_revoked(claims.sub, claims.iat).await {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }
}

/// Sign `claims` with `secret`. Tokens are normally minted by the user service; this backs
/// the `token` CLI command and tests.
pub fn issue_token(claims: &Claims, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
