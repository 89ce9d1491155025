use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chain::ChainEntry;
use crate::error::{AuthenticationError, SessionError, SessionResult};
use crate::inventory::KeyLookup;
use crate::transport::{SessionHandle, SessionId};
use crate::types::{AuthenticationMethod, HopStatus, Key};

/// Walk the chain hop by hop, connecting and authenticating each one through
/// the previous hop, and return the target's session.
///
/// Hops already `Authenticated` are passed over, so calling this again after
/// a failure resumes at the failed hop. `on_hop_update` receives every
/// change to a hop together with its index; returning `false` means the
/// chain's owner is gone and establishment stops with
/// [`SessionError::Abandoned`].
///
/// The first failure is recorded on its hop and returned. `NotFoundSession`
/// and `Timeout` put that hop back to `Connecting`; every other error leaves
/// its status alone.
pub async fn establish<F>(
    chain: &mut [ChainEntry],
    keys: &dyn KeyLookup,
    mut on_hop_update: F,
) -> SessionResult<Arc<dyn SessionHandle>>
where
    F: FnMut(usize, &ChainEntry) -> bool + Send,
{
    if chain.is_empty() {
        return Err(SessionError::EmptyChain);
    }

    let mut previous: Option<SessionId> = None;
    for (index, entry) in chain.iter_mut().enumerate() {
        entry.loading = true;
        entry.error = None;
        if !on_hop_update(index, entry) {
            entry.loading = false;
            return Err(SessionError::Abandoned);
        }

        let outcome = advance(index, entry, previous, keys, &mut on_hop_update).await;
        entry.loading = false;

        match outcome {
            Ok(owner_alive) => {
                if !(on_hop_update(index, entry) && owner_alive) {
                    return Err(SessionError::Abandoned);
                }
            }
            Err(err) => {
                warn!("Hop {} ({}) failed: {}", index, entry.host.id, err);
                if err.kind().resets_connection() {
                    entry.status = HopStatus::Connecting;
                }
                entry.error = Some(err.clone());
                on_hop_update(index, entry);
                return Err(err);
            }
        }

        previous = Some(entry.session.id());
    }

    let target = &chain[chain.len() - 1];
    info!("Chain to {} established", target.host.id);
    Ok(target.session.clone())
}

/// Move one hop forward to `Authenticated`. Returns whether the owner was
/// still there after every intermediate update.
async fn advance<F>(
    index: usize,
    entry: &mut ChainEntry,
    previous: Option<SessionId>,
    keys: &dyn KeyLookup,
    on_hop_update: &mut F,
) -> SessionResult<bool>
where
    F: FnMut(usize, &ChainEntry) -> bool + Send,
{
    if entry.status == HopStatus::Connecting {
        let endpoint = entry.host.endpoint();
        info!(
            "Connecting hop {} to {}{}",
            index,
            endpoint,
            if previous.is_some() { " (tunneled)" } else { "" }
        );
        entry
            .session
            .connect(&endpoint, previous, entry.check_server_key)
            .await?;
        entry.check_server_key = None;
        entry.status = HopStatus::Connected;
        if !on_hop_update(index, entry) {
            return Ok(false);
        }
    }

    if entry.status == HopStatus::Connected {
        debug!(
            "Authenticating hop {} as {} ({})",
            index, entry.host.username, entry.host.authentication_method
        );
        authenticate(entry, keys).await?;
        entry.status = HopStatus::Authenticated;
        info!("Hop {} ({}) authenticated", index, entry.host.id);
        if !on_hop_update(index, entry) {
            return Ok(false);
        }
    }

    Ok(true)
}

fn lookup_key(entry: &ChainEntry, keys: &dyn KeyLookup) -> SessionResult<Key> {
    let method = entry.host.authentication_method;
    entry
        .host
        .key_id
        .as_deref()
        .and_then(|id| keys.key(id))
        .ok_or_else(|| {
            warn!("No key configured for host {}", entry.host.id);
            AuthenticationError::new(method).into()
        })
}

async fn authenticate(entry: &ChainEntry, keys: &dyn KeyLookup) -> SessionResult<()> {
    let host = &entry.host;
    match host.authentication_method {
        AuthenticationMethod::Password => {
            entry
                .session
                .authenticate_password(&host.username, host.password.as_deref().unwrap_or(""))
                .await
        }
        AuthenticationMethod::PublicKey => {
            let key = lookup_key(entry, keys)?;
            entry
                .session
                .authenticate_public_key(&host.username, &key.private_key, key.passphrase.as_deref())
                .await
        }
        AuthenticationMethod::Certificate => {
            let key = lookup_key(entry, keys)?;
            let certificate = key
                .certificate
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| {
                    warn!("Key {} has no certificate", key.id);
                    SessionError::from(AuthenticationError::new(AuthenticationMethod::Certificate))
                })?;
            entry
                .session
                .authenticate_certificate(
                    &host.username,
                    &key.private_key,
                    key.passphrase.as_deref(),
                    certificate,
                )
                .await
        }
    }
}
