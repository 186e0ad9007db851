//! HomeKit Accessory Protocol (HAP) server core: the pairing, session-security, and
//! accessory/characteristic protocol engine that lets an iOS controller discover, pair with,
//! securely talk to, and operate a smart-home accessory over TCP.
//!
//! This crate implements the hard part only — Pair-Setup (SRP-6a + Ed25519), Pair-Verify
//! (Curve25519 ECDH + Ed25519), the ChaCha20-Poly1305 record layer, and the HTTP/1.1 request
//! dispatcher that routes `/accessories`, `/characteristics`, `/pairings`, `/identify` and
//! `/resource`. mDNS advertisement, persistent storage, the TCP listener, and hardware RNG are
//! all external collaborators the embedder supplies through the traits in [`mdns`], [`store`],
//! and [`identity`]; [`server::Server::init`] is the crate's entire bootstrap surface.
//!
//! A minimal accessory wiring all of this together lives under `demos/` at the repository root.

pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod http;
pub mod identity;
pub mod mdns;
pub mod model;
pub mod pairing;
pub mod record_layer;
pub mod server;
pub mod session;
pub mod store;
pub mod tlv;

pub use config::{
    AccessoryBuilder, AccessoryCategory, Config, ResourceHandler, ServiceCharacteristic, SetupCodeSource,
};
pub use error::{Error, Result};
pub use model::{
    Accessory, AccessoryModel, Characteristic, CharacteristicHandler, CharacteristicValue, Constraints, Format,
    HapStatus, Permissions, Service,
};
pub use server::Server;
pub use session::Session;
