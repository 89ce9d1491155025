use tracing::{debug, warn};

use crate::chain::ChainEntry;

/// Disconnect every hop, target first.
///
/// Each disconnect is awaited before the next hop is touched, so a tunnel
/// is never closed under a session still running through it. Failures are
/// logged and skipped.
pub async fn tear_down(chain: &[ChainEntry]) {
    for entry in chain.iter().rev() {
        debug!("Disconnecting hop {}", entry.host.id);
        if let Err(e) = entry.session.disconnect().await {
            warn!("Failed to disconnect hop {}: {}", entry.host.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{establish, resolve};
    use crate::inventory::HostLookup;
    use crate::transport::mock::{self, Call, MockTransport};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_disconnects_in_reverse_order() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let inventory = mock::inventory();
        let transport = MockTransport::new();
        let target = inventory.host("target").unwrap();
        let mut chain = resolve(&target, &inventory, &transport, &tx).unwrap();
        establish(&mut chain, &inventory, |_, _| true).await.unwrap();
        transport.clear_calls();

        tear_down(&chain).await;

        assert_eq!(
            transport.calls(),
            vec![
                Call::Disconnect {
                    host: "target.test".to_string()
                },
                Call::Disconnect {
                    host: "j2.test".to_string()
                },
                Call::Disconnect {
                    host: "j1.test".to_string()
                },
            ]
        );
        assert!(transport.connected_hosts().is_empty());
    }

    #[tokio::test]
    async fn test_never_connected_chain_is_noop() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let inventory = mock::inventory();
        let transport = MockTransport::new();
        let target = inventory.host("target").unwrap();
        let chain = resolve(&target, &inventory, &transport, &tx).unwrap();

        tear_down(&chain).await;
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_partial_chain_disconnects_connected_hops() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let inventory = mock::inventory();
        let transport = MockTransport::new();
        transport.fail_connect(
            "j2.test",
            crate::error::SessionError::ConnectFailed("j2.test:22".to_string()),
        );
        let target = inventory.host("target").unwrap();
        let mut chain = resolve(&target, &inventory, &transport, &tx).unwrap();
        assert!(establish(&mut chain, &inventory, |_, _| true).await.is_err());
        transport.clear_calls();

        tear_down(&chain).await;
        assert_eq!(
            transport.calls(),
            vec![Call::Disconnect {
                host: "j1.test".to_string()
            }]
        );
    }
}
