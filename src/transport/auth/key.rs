//! In-memory private key authentication.

use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::debug;

use crate::error::{SessionError, SessionResult};
use crate::transport::handler::ChainHandler;
use crate::types::AuthenticationMethod;

use super::traits::{AuthStrategy, check_auth_result, non_empty};

/// Decode an OpenSSH/PEM private key, rejecting empty input up front.
pub(crate) fn decode_private_key(
    private_key: &str,
    passphrase: Option<&str>,
) -> SessionResult<keys::PrivateKey> {
    if private_key.trim().is_empty() {
        return Err(SessionError::new("Private key is empty"));
    }
    keys::decode_secret_key(private_key, non_empty(passphrase))
        .map_err(|e| SessionError::Other(format!("Private key parsing failed: {}", e)))
}

/// Public key authentication with key material held in memory.
pub(crate) struct KeyAuth {
    private_key: String,
    passphrase: Option<String>,
}

impl KeyAuth {
    pub(crate) fn new(private_key: impl Into<String>, passphrase: Option<&str>) -> Self {
        Self {
            private_key: private_key.into(),
            passphrase: passphrase.map(str::to_string),
        }
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<ChainHandler>,
        username: &str,
    ) -> SessionResult<()> {
        let key_pair = decode_private_key(&self.private_key, self.passphrase.as_deref())?;

        // For RSA keys, use the best supported hash algorithm
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!("Using RSA hash algorithm for key auth: {:?}", hash_alg);

        let key_with_hash = keys::PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg);
        let result = handle.authenticate_publickey(username, key_with_hash).await?;
        check_auth_result(result, self.method())
    }

    fn method(&self) -> AuthenticationMethod {
        AuthenticationMethod::PublicKey
    }

    fn name(&self) -> &'static str {
        "publickey"
    }
}
