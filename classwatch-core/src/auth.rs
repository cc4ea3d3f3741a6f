//! Process-wide bearer credential store
//!
//! The token is handed out by the login endpoint and attached to every API
//! call. The console only decodes the payload to learn who is signed in; it
//! never verifies, refreshes or validates expiry. An expired token surfaces as
//! a failed request.

use crate::error::{Error, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Decoded payload of the signed-in instructor's token
pub type Claims = serde_json::Map<String, Value>;

#[derive(Debug, Clone)]
struct Credential {
    token: String,
    claims: Claims,
}

/// Shared credential store. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    inner: Arc<RwLock<Option<Credential>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a token after decoding its payload.
    ///
    /// A token that cannot be decoded clears the store and is rejected.
    pub fn login(&self, token: &str) -> Result<Claims> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::Authentication("No token provided during login".to_string()));
        }

        match decode_claims(token) {
            Ok(claims) => {
                *self.inner.write() = Some(Credential {
                    token: token.to_string(),
                    claims: claims.clone(),
                });
                info!("Signed in{}", subject_suffix(&claims));
                Ok(claims)
            }
            Err(e) => {
                warn!("Failed to decode token: {}", e);
                *self.inner.write() = None;
                Err(e)
            }
        }
    }

    pub fn logout(&self) {
        *self.inner.write() = None;
        info!("Signed out");
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.read().is_some()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.read().as_ref().map(|c| c.token.clone())
    }

    pub fn claims(&self) -> Option<Claims> {
        self.inner.read().as_ref().map(|c| c.claims.clone())
    }

    /// `Authorization` header value, if signed in
    pub fn bearer(&self) -> Option<String> {
        self.inner
            .read()
            .as_ref()
            .map(|c| format!("Bearer {}", c.token))
    }
}

fn decode_claims(token: &str) -> Result<Claims> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| Error::Authentication(format!("Invalid token: {}", e)))?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    validation.validate_aud = false;

    let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| Error::Authentication(format!("Invalid token: {}", e)))?;
    Ok(data.claims)
}

fn subject_suffix(claims: &Claims) -> String {
    ["sub", "email", "username", "id"]
        .iter()
        .find_map(|key| claims.get(*key))
        .map(|v| match v {
            Value::String(s) => format!(" as {}", s),
            other => format!(" as {}", other),
        })
        .unwrap_or_default()
}
