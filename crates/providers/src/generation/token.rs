//! Short-lived HS256 bearer tokens for the Kling API.
//!
//! Tokens carry `iss` = access key, `exp` = now + 30 min and a small `nbf`
//! skew, signed with the secret key. A signed token is cached and reused
//! until it is within [`TOKEN_REFRESH_MARGIN_SECS`] of expiring.

use std::sync::Mutex;

use jsonwebtoken::{encode, EncodingKey, Header};
use reelswap_core::error::PipelineError;
use serde::{Deserialize, Serialize};

/// Lifetime of a signed token.
pub const TOKEN_TTL_SECS: i64 = 1800;
/// Tokens closer than this to expiry are re-signed.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
/// `nbf` is backdated by this much to absorb clock skew.
const NOT_BEFORE_SKEW_SECS: i64 = 5;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct KlingClaims {
    pub iss: String,
    pub exp: i64,
    pub nbf: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

/// Signs and caches Kling bearer tokens.
pub struct KlingTokenSigner {
    access_key: String,
    key: EncodingKey,
    cache: Mutex<Option<CachedToken>>,
}

impl KlingTokenSigner {
    pub fn new(access_key: impl Into<String>, secret_key: &str) -> Self {
        Self {
            access_key: access_key.into(),
            key: EncodingKey::from_secret(secret_key.as_bytes()),
            cache: Mutex::new(None),
        }
    }

    /// A valid token, re-signed if the cached one is near expiry.
    pub fn token(&self) -> Result<String, PipelineError> {
        self.token_at(chrono::Utc::now().timestamp())
    }

    /// Drop the cached token so the next call signs a fresh one.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    fn token_at(&self, now: i64) -> Result<String, PipelineError> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| PipelineError::Internal("Kling token cache poisoned".into()))?;

        if let Some(cached) = cache.as_ref() {
            if cached.expires_at - now > TOKEN_REFRESH_MARGIN_SECS {
                return Ok(cached.token.clone());
            }
        }

        let (token, expires_at) = self.sign_at(now)?;
        tracing::debug!(expires_at, "Signed new Kling token");
        *cache = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }

    fn sign_at(&self, now: i64) -> Result<(String, i64), PipelineError> {
        let claims = KlingClaims {
            iss: self.access_key.clone(),
            exp: now + TOKEN_TTL_SECS,
            nbf: now - NOT_BEFORE_SKEW_SECS,
        };
        let token = encode(&Header::default(), &claims, &self.key)
            .map_err(|e| PipelineError::Internal(format!("sign Kling token: {e}")))?;
        Ok((token, claims.exp))
    }
}
