//! OpenSSH certificate authentication.

use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};

use crate::error::{SessionError, SessionResult};
use crate::transport::handler::ChainHandler;
use crate::types::AuthenticationMethod;

use super::key::decode_private_key;
use super::traits::{AuthStrategy, check_auth_result};

pub(crate) fn parse_certificate(certificate: &str) -> SessionResult<keys::Certificate> {
    if certificate.trim().is_empty() {
        return Err(SessionError::new("Certificate is empty"));
    }
    keys::Certificate::from_openssh(certificate.trim())
        .map_err(|e| SessionError::new(format!("Certificate parsing failed: {}", e)))
}

/// Authenticates with a private key plus the OpenSSH certificate signed for it.
pub(crate) struct CertificateAuth {
    private_key: String,
    passphrase: Option<String>,
    certificate: String,
}

impl CertificateAuth {
    pub(crate) fn new(
        private_key: impl Into<String>,
        passphrase: Option<&str>,
        certificate: impl Into<String>,
    ) -> Self {
        Self {
            private_key: private_key.into(),
            passphrase: passphrase.map(str::to_string),
            certificate: certificate.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for CertificateAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<ChainHandler>,
        username: &str,
    ) -> SessionResult<()> {
        let key_pair = decode_private_key(&self.private_key, self.passphrase.as_deref())?;
        let certificate = parse_certificate(&self.certificate)?;
        let result = handle
            .authenticate_openssh_cert(username, Arc::new(key_pair), certificate)
            .await?;
        check_auth_result(result, self.method())
    }

    fn method(&self) -> AuthenticationMethod {
        AuthenticationMethod::Certificate
    }

    fn name(&self) -> &'static str {
        "certificate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_certificate_is_rejected() {
        let err = parse_certificate("").unwrap_err();
        assert_eq!(err.to_string(), "Certificate is empty");
    }

    #[test]
    fn test_garbage_certificate_is_rejected() {
        let err = parse_certificate("ssh-ed25519-cert-v01@openssh.com AAAA").unwrap_err();
        assert!(err.to_string().starts_with("Certificate parsing failed"));
    }
}
