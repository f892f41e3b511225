// HS256 identity proofs. A proof is a signed token whose subject is the user id.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::IdentityConfig;
use crate::core::models::VertexId;
use crate::error::{AppError, AppResult};
use crate::infrastructure::traits::{IdentityVerifier, Verification};

/// JWT claims carried by an identity proof
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user vertex id
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

pub struct JwtIdentityVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    token_ttl: Duration,
}

impl JwtIdentityVerifier {
    pub fn new(secret: &str, issuer: impl Into<String>, token_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            token_ttl,
        }
    }

    pub fn from_config(config: &IdentityConfig) -> Self {
        Self::new(
            &config.secret,
            config.issuer.clone(),
            Duration::from_secs(config.token_ttl_secs),
        )
    }

    /// Issue a proof for `user_id`.
    pub fn issue_token(&self, user_id: VertexId) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + self.token_ttl.as_secs() as i64,
            iss: self.issuer.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    #[instrument(skip(self, proof))]
    async fn verify(&self, proof: &str, claimed_owner_id: VertexId) -> AppResult<Verification> {
        let claims = match decode::<Claims>(proof, &self.decoding_key, &self.validation()) {
            Ok(data) => data.claims,
            Err(e) => {
                debug!("Rejected identity proof: {}", e);
                return Ok(Verification::Invalid);
            }
        };

        if claims.sub == claimed_owner_id.to_string() {
            Ok(Verification::Valid)
        } else {
            Ok(Verification::Invalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> JwtIdentityVerifier {
        JwtIdentityVerifier::new("test-secret-0123456789", "content-service", Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_token_verifies_for_its_subject_only() {
        let verifier = verifier();
        let token = verifier.issue_token(42).unwrap();
        assert_eq!(verifier.verify(&token, 42).await.unwrap(), Verification::Valid);
        assert_eq!(verifier.verify(&token, 43).await.unwrap(), Verification::Invalid);
    }

    #[tokio::test]
    async fn test_foreign_or_garbage_tokens_are_invalid() {
        let verifier = verifier();
        let other = JwtIdentityVerifier::new("another-secret-987654", "content-service", Duration::from_secs(60));
        let forged = other.issue_token(42).unwrap();
        assert_eq!(verifier.verify(&forged, 42).await.unwrap(), Verification::Invalid);
        assert_eq!(verifier.verify("not-a-token", 42).await.unwrap(), Verification::Invalid);

        let wrong_issuer =
            JwtIdentityVerifier::new("test-secret-0123456789", "elsewhere", Duration::from_secs(60));
        let token = wrong_issuer.issue_token(42).unwrap();
        assert_eq!(verifier.verify(&token, 42).await.unwrap(), Verification::Invalid);
    }
}
