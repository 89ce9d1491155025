//! Authentication strategy trait definition.

use async_trait::async_trait;
use russh::client::{self, AuthResult};

use crate::error::{AuthenticationError, SessionResult};
use crate::transport::handler::ChainHandler;
use crate::types::AuthenticationMethod;

/// One way of proving a hop's identity.
///
/// Implementations must be thread-safe (`Send + Sync`) for use across
/// async tasks.
#[async_trait]
pub(crate) trait AuthStrategy: Send + Sync {
    /// Authenticate `username` on an already connected handle.
    ///
    /// Returns `Ok(())` on success and an `Authentication` error when the
    /// server rejects the credentials.
    async fn authenticate(
        &self,
        handle: &mut client::Handle<ChainHandler>,
        username: &str,
    ) -> SessionResult<()>;

    fn method(&self) -> AuthenticationMethod;

    /// Used for logging.
    fn name(&self) -> &'static str;
}

/// Turn a russh auth outcome into a result for `method`.
pub(crate) fn check_auth_result(
    result: AuthResult,
    method: AuthenticationMethod,
) -> SessionResult<()> {
    match result {
        AuthResult::Success => Ok(()),
        AuthResult::Failure {
            remaining_methods, ..
        } => {
            let remaining: Vec<String> = remaining_methods
                .iter()
                .map(|m| {
                    let s: &str = m.into();
                    s.to_string()
                })
                .collect();
            Err(AuthenticationError::with_remaining(method, remaining).into())
        }
    }
}

/// Empty passphrases mean "not encrypted".
pub(crate) fn non_empty(passphrase: Option<&str>) -> Option<&str> {
    passphrase.filter(|p| !p.is_empty())
}
