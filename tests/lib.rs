//! Shared fixtures for QShare integration tests.


pub use mock_peer::{Canned, MockPeer, PEER_NAME};

use qshare_core::{SessionCoordinator, TransferClient, TransferConfig};
use std::time::Duration;

/// Transfer settings with short timeouts so failing tests fail fast
pub fn test_transfer_config() -> TransferConfig {
    TransferConfig {
        connect_timeout: Duration::from_secs(2),
        response_timeout: Duration::from_secs(5),
        ..TransferConfig::default()
    }
}

/// Disconnected session using [`test_transfer_config`]
pub fn test_session() -> SessionCoordinator {
    SessionCoordinator::new(
        TransferClient::new(test_transfer_config()).expect("build transfer client"),
    )
}

/// Session already pointed at `peer`
pub async fn session_for(peer: &MockPeer) -> SessionCoordinator {
    let session = test_session();
    session.adopt_endpoint(peer.endpoint()).await;
    session
}
