//! Authentication strategies for a connected hop.
//!
//! Each hop authenticates with exactly one method, chosen by the host's
//! `authentication_method`. A rejection becomes an
//! [`AuthenticationError`](crate::error::AuthenticationError) carrying the
//! methods the server would still accept.
//!
//! # Available Strategies
//!
//! - [`PasswordAuth`]: Password-based authentication
//! - [`KeyAuth`]: In-memory private key authentication
//! - [`CertificateAuth`]: OpenSSH certificate authentication

mod certificate;
mod key;
mod password;
mod traits;

pub(crate) use certificate::CertificateAuth;
pub(crate) use key::KeyAuth;
pub(crate) use password::PasswordAuth;
pub(crate) use traits::AuthStrategy;
