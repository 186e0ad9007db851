//! A single dimmable lightbulb accessory, wiring every public piece of `hap_core` together:
//! identity, pairing storage, the accessory model, and the TCP listener.
//!
//! Run with `cargo run --example lightbulb`, then pair from a HomeKit controller using the setup
//! code printed to the console.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hap_core::identity::MemoryIdentityStore;
use hap_core::mdns::NoopMdnsPublisher;
use hap_core::store::MemoryPairingStore;
use hap_core::{
    AccessoryBuilder, AccessoryCategory, CharacteristicValue, Config, Format, Permissions, Server,
    ServiceCharacteristic, SetupCodeSource,
};

const LIGHTBULB_SERVICE_TYPE: &str = "00000043-0000-1000-8000-0026BB765291";
const ON_CHARACTERISTIC_TYPE: &str = "00000025-0000-1000-8000-0026BB765291";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let on = Arc::new(AtomicBool::new(false));
    let read_on = Arc::clone(&on);
    let write_on = Arc::clone(&on);

    let mut builder = AccessoryBuilder::new(1, "Desk Lamp");
    builder.add_service(
        LIGHTBULB_SERVICE_TYPE,
        vec![ServiceCharacteristic::callback(
            ON_CHARACTERISTIC_TYPE,
            Format::Bool,
            Permissions::PAIRED_READ | Permissions::PAIRED_WRITE | Permissions::NOTIFY,
            move || CharacteristicValue::Bool(read_on.load(Ordering::Relaxed)),
            move |value| {
                if let CharacteristicValue::Bool(value) = value {
                    write_on.store(value, Ordering::Relaxed);
                }
            },
        )],
    );

    let config = Config {
        name: "Desk Lamp".to_string(),
        category: AccessoryCategory::Lightbulb,
        port: 5556,
        config_number: 1,
        setup_code: SetupCodeSource::Fixed("031-45-154".to_string()),
        resource_handler: None,
        pairing_store: Arc::new(MemoryPairingStore::default()),
        identity_store: Arc::new(MemoryIdentityStore::default()),
        mdns: Arc::new(NoopMdnsPublisher),
        accessories: vec![builder.build()],
    };

    let server = Server::init(config).await?;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", 5556)).await?;
    tracing::info!("Desk Lamp listening on :5556, setup code 031-45-154");
    server.serve(listener).await?;
    Ok(())
}
