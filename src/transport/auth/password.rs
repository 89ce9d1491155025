//! Password-based authentication.

use async_trait::async_trait;
use russh::client;

use crate::error::SessionResult;
use crate::transport::handler::ChainHandler;
use crate::types::AuthenticationMethod;

use super::traits::{AuthStrategy, check_auth_result};

pub(crate) struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    pub(crate) fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<ChainHandler>,
        username: &str,
    ) -> SessionResult<()> {
        let result = handle.authenticate_password(username, &self.password).await?;
        check_auth_result(result, self.method())
    }

    fn method(&self) -> AuthenticationMethod {
        AuthenticationMethod::Password
    }

    fn name(&self) -> &'static str {
        "password"
    }
}
