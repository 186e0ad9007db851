//! The accessory's own long-term identity: a stable MAC-shaped id plus an Ed25519 keypair
//! generated once on first boot and persisted thereafter.

use async_trait::async_trait;
use rand::RngCore;

use crate::crypto::Ed25519Identity;
use crate::error::Error;

/// Generate a `"XX:XX:XX:XX:XX:XX"` accessory id from 6 random bytes, MAC-address-shaped but
/// without depending on an actual MAC address being available.
#[must_use]
pub fn generate_accessory_id() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}

/// The accessory's durable identity.
pub struct AccessoryIdentity {
    pub id: String,
    pub keypair: Ed25519Identity,
}

/// Loads and persists the accessory's long-term identity. Separated from `PairingStore` because
/// the accessory identity is singular and exists before any pairing does.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn load(&self) -> Option<AccessoryIdentity>;
    async fn save(&self, identity: &AccessoryIdentity) -> Result<(), Error>;
}

/// Load the persisted identity, or generate and persist a fresh one if none exists yet.
///
/// # Errors
/// Returns whatever [`IdentityStore::save`] returns if persisting a freshly generated identity
/// fails.
pub async fn load_or_generate(store: &dyn IdentityStore) -> Result<AccessoryIdentity, Error> {
    if let Some(identity) = store.load().await {
        return Ok(identity);
    }
    let identity = AccessoryIdentity {
        id: generate_accessory_id(),
        keypair: Ed25519Identity::generate(),
    };
    store.save(&identity).await?;
    Ok(identity)
}

/// In-memory reference implementation, used by tests and by `demos/`.
#[derive(Default)]
pub struct MemoryIdentityStore {
    identity: tokio::sync::Mutex<Option<(String, [u8; 32])>>,
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn load(&self) -> Option<AccessoryIdentity> {
        let guard = self.identity.lock().await;
        guard.as_ref().map(|(id, signing_key)| AccessoryIdentity {
            id: id.clone(),
            keypair: Ed25519Identity::from_signing_key_bytes(signing_key),
        })
    }

    async fn save(&self, identity: &AccessoryIdentity) -> Result<(), Error> {
        let signing_key = identity
            .keypair
            .signing_key_bytes()
            .ok_or(Error::Internal("cannot persist an identity without its private key"))?;
        *self.identity.lock().await = Some((identity.id.clone(), signing_key));
        Ok(())
    }
}
