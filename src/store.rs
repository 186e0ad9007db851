//! Persistence of paired controllers, modeled on the `PeerStore` abstraction a link-layer security
//! manager expects its embedder to provide.
//!
//! The accessory never persists an SRP password verifier, only the long-term controller
//! identities admitted by a completed Pair-Setup or `AddPairing`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Admin vs. regular controller, carried in TLV `Permissions` and checked on every write/admin
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingPermissions {
    Regular,
    Admin,
}

/// One paired controller's durable identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pairing {
    pub controller_id: Vec<u8>,
    pub public_key: [u8; 32],
    pub permissions: PairingPermissions,
}

/// Storage for paired controller identities. Implementors back this with flash, a file, or (in
/// tests) memory; the dispatcher and pairing state machines only ever see this trait.
#[async_trait]
pub trait PairingStore: Send + Sync {
    async fn add(&self, pairing: Pairing) -> Result<(), Error>;
    async fn remove(&self, controller_id: &[u8]) -> Result<(), Error>;
    async fn get(&self, controller_id: &[u8]) -> Option<Pairing>;
    async fn list(&self) -> Vec<Pairing>;
    async fn count(&self) -> usize;

    /// `true` once any controller has been admitted — governs whether `/pair-setup` is still
    /// reachable and whether `GET /accessories` etc. require Pair-Verify first.
    async fn is_paired(&self) -> bool {
        self.count().await > 0
    }

    /// Capacity check consulted by `AddPairing` before admitting a controller this store has no
    /// existing record for. The in-memory reference store is unbounded; a flash-backed store
    /// would override this with its real slot count.
    async fn can_add_pairing(&self) -> bool {
        true
    }
}

/// In-memory reference implementation, used by tests and by `demos/`.
#[derive(Default)]
pub struct MemoryPairingStore {
    pairings: tokio::sync::Mutex<Vec<Pairing>>,
}

#[async_trait]
impl PairingStore for MemoryPairingStore {
    async fn add(&self, pairing: Pairing) -> Result<(), Error> {
        let mut pairings = self.pairings.lock().await;
        if let Some(existing) = pairings.iter_mut().find(|p| p.controller_id == pairing.controller_id) {
            *existing = pairing;
        } else {
            pairings.push(pairing);
        }
        Ok(())
    }

    async fn remove(&self, controller_id: &[u8]) -> Result<(), Error> {
        let mut pairings = self.pairings.lock().await;
        let before = pairings.len();
        pairings.retain(|p| p.controller_id != controller_id);
        if pairings.len() == before {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    async fn get(&self, controller_id: &[u8]) -> Option<Pairing> {
        self.pairings
            .lock()
            .await
            .iter()
            .find(|p| p.controller_id == controller_id)
            .cloned()
    }

    async fn list(&self) -> Vec<Pairing> {
        self.pairings.lock().await.clone()
    }

    async fn count(&self) -> usize {
        self.pairings.lock().await.len()
    }
}
