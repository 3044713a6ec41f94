//! Caller identity verification
//!
//! Registration is the only authenticated call in the provider
//! protocol. The upstream system verifies bearer tokens against a
//! managed identity service; that service stays external, so the
//! coordinator talks to an [`IdentityVerifier`] trait and ships a
//! static token table implementation for self-contained deployments.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::AuthConfig;

// ============================================================================
// Errors
// ============================================================================

/// Identity verification failures
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

// ============================================================================
// Verifier Trait
// ============================================================================

/// Identity established for a verified caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Stable subject id the token belongs to
    pub subject: String,
}

/// Verifies bearer tokens presented by providers
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError>;
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn parse_bearer(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingToken)?;
    let token = header.strip_prefix("Bearer ").ok_or(AuthError::MissingToken)?;
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

// ============================================================================
// Static Token Verifier
// ============================================================================

/// Token table from configuration, mapping bearer token to subject id
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: BTreeMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: BTreeMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.tokens.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        match self.tokens.get(token) {
            Some(subject) => Ok(VerifiedIdentity {
                subject: subject.clone(),
            }),
            None => Err(AuthError::InvalidToken(
                "token not recognized".to_string(),
            )),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer(Some("Bearer abc123")).unwrap(), "abc123");
        assert!(matches!(parse_bearer(None), Err(AuthError::MissingToken)));
        assert!(matches!(
            parse_bearer(Some("Basic abc123")),
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            parse_bearer(Some("Bearer ")),
            Err(AuthError::MissingToken)
        ));
    }

    #[tokio::test]
    async fn test_static_verifier() {
        let mut tokens = BTreeMap::new();
        tokens.insert("tok-1".to_string(), "provider-1".to_string());
        let verifier = StaticTokenVerifier::new(tokens);

        let identity = verifier.verify("tok-1").await.unwrap();
        assert_eq!(identity.subject, "provider-1");

        assert!(matches!(
            verifier.verify("bogus").await,
            Err(AuthError::InvalidToken(_))
        ));
    }
}
