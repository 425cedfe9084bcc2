//! Bearer credential validation
//!
//! Credential issuance belongs to an external account service. Channels only
//! need to turn a bearer token into an identity, which is what
//! [`CredentialValidator`] models. [`TokenRegistry`] is an in-memory issuer
//! for local runs and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub nickname: String,
}

impl Identity {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            nickname: nickname.into(),
        }
    }
}

/// Resolves bearer tokens to identities
pub trait CredentialValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<Identity>;
}

/// In-memory token issuer
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: RwLock<HashMap<String, Identity>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh opaque token for `identity`
    pub fn issue(&self, identity: Identity) -> String {
        let mut bytes = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(token.clone(), identity);
        }
        token
    }

    pub fn revoke(&self, token: &str) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.remove(token);
        }
    }
}

impl CredentialValidator for TokenRegistry {
    fn validate(&self, token: &str) -> Result<Identity> {
        if token.is_empty() {
            return Err(Error::Authentication("missing credential".into()));
        }
        let tokens = self
            .tokens
            .read()
            .map_err(|_| Error::Authentication("credential store unavailable".into()))?;
        tokens
            .get(token)
            .cloned()
            .ok_or_else(|| Error::Authentication("invalid credential".into()))
    }
}
