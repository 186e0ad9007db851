//! The embedder-facing configuration surface: the single `init(config)` call, the accessory
//! model declaration API, and the `"XXX-XX-XXX"` setup code.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use crate::error::Error;
use crate::identity::{IdentityStore, MemoryIdentityStore};
use crate::mdns::{MdnsPublisher, NoopMdnsPublisher};
use crate::model::{Accessory, Characteristic, CharacteristicHandler, CharacteristicValue, Constraints, Format, Permissions, Service, SubscriberRegistry};
use crate::store::{MemoryPairingStore, PairingStore};

/// The HomeKit accessory category advertised in the mDNS `ci` TXT key. Drives which icon and
/// interaction flow iOS offers during pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessoryCategory {
    Other,
    Bridge,
    Fan,
    Garage,
    Lightbulb,
    DoorLock,
    Outlet,
    Switch,
    Thermostat,
    Sensor,
    SecuritySystem,
    Door,
    Window,
    WindowCovering,
    ProgrammableSwitch,
    RangeExtender,
    IpCamera,
    VideoDoorbell,
    AirPurifier,
    Heater,
    AirConditioner,
    Humidifier,
    Dehumidifier,
    Sprinkler,
    Faucet,
    ShowerHead,
    Television,
    TargetController,
}

impl AccessoryCategory {
    /// The numeric code HomeKit assigns this category for the mDNS `ci` key.
    #[must_use]
    pub fn mdns_code(self) -> u8 {
        match self {
            Self::Other => 1,
            Self::Bridge => 2,
            Self::Fan => 3,
            Self::Garage => 4,
            Self::Lightbulb => 5,
            Self::DoorLock => 6,
            Self::Outlet => 7,
            Self::Switch => 8,
            Self::Thermostat => 9,
            Self::Sensor => 10,
            Self::SecuritySystem => 11,
            Self::Door => 12,
            Self::Window => 13,
            Self::WindowCovering => 14,
            Self::ProgrammableSwitch => 15,
            Self::RangeExtender => 16,
            Self::IpCamera => 17,
            Self::VideoDoorbell => 18,
            Self::AirPurifier => 19,
            Self::Heater => 20,
            Self::AirConditioner => 21,
            Self::Humidifier => 22,
            Self::Dehumidifier => 23,
            Self::Sprinkler => 28,
            Self::Faucet => 29,
            Self::ShowerHead => 30,
            Self::Television => 31,
            Self::TargetController => 32,
        }
    }
}

/// The opaque `POST /resource` snapshot callback, forwarded verbatim to application code.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn snapshot(&self, request_body: &[u8]) -> Result<Vec<u8>, Error>;
}

/// How the setup code is obtained: a fixed configured value, or a freshly generated one handed
/// to a display callback so the embedder can show it to the user (on an LCD, serial console,
/// QR code, etc.).
pub enum SetupCodeSource {
    Fixed(String),
    Generate(Arc<dyn Fn(&str) + Send + Sync>),
}

impl SetupCodeSource {
    /// Resolve to a concrete `"XXX-XX-XXX"` code, generating and displaying one if needed.
    #[must_use]
    pub fn resolve(&self) -> String {
        match self {
            Self::Fixed(code) => code.clone(),
            Self::Generate(display) => {
                let code = generate_setup_code();
                display(&code);
                code
            }
        }
    }
}

/// Generate a random valid `"XXX-XX-XXX"` setup code.
#[must_use]
pub fn generate_setup_code() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{:03}-{:02}-{:03}",
        rng.gen_range(0..1000),
        rng.gen_range(0..100),
        rng.gen_range(0..1000)
    )
}

/// The top-level configuration handed to `init`.
pub struct Config {
    pub name: String,
    pub category: AccessoryCategory,
    pub port: u16,
    pub config_number: u32,
    pub setup_code: SetupCodeSource,
    pub resource_handler: Option<Arc<dyn ResourceHandler>>,
    pub pairing_store: Arc<dyn PairingStore>,
    pub identity_store: Arc<dyn IdentityStore>,
    pub mdns: Arc<dyn MdnsPublisher>,
    pub accessories: Vec<Accessory>,
}

impl Config {
    /// A minimal configuration suitable for tests and `demos/`: in-memory pairing and identity
    /// stores, a no-op mDNS publisher, and a fixed setup code.
    #[must_use]
    pub fn test_default(name: impl Into<String>, setup_code: impl Into<String>, accessories: Vec<Accessory>) -> Self {
        Self {
            name: name.into(),
            category: AccessoryCategory::Other,
            port: 5556,
            config_number: 1,
            setup_code: SetupCodeSource::Fixed(setup_code.into()),
            resource_handler: None,
            pairing_store: Arc::new(MemoryPairingStore::default()),
            identity_store: Arc::new(MemoryIdentityStore::default()),
            mdns: Arc::new(NoopMdnsPublisher),
            accessories,
        }
    }
}

/// The AccessoryInformation service type every accessory must carry as its first service.
pub const ACCESSORY_INFORMATION_TYPE: &str = "0000003E-0000-1000-8000-0026BB765291";
/// The mandatory Identify characteristic type.
pub const IDENTIFY_TYPE: &str = "00000014-0000-1000-8000-0026BB765291";
/// The mandatory Name characteristic type.
pub const NAME_TYPE: &str = "00000023-0000-1000-8000-0026BB765291";

/// Builds an [`Accessory`], taking care of the mandatory AccessoryInformation service the first
/// accessory in the process must carry.
pub struct AccessoryBuilder {
    aid: u64,
    next_iid: u64,
    name: String,
    services: Vec<Service>,
}

impl AccessoryBuilder {
    /// Start building an accessory with the given `aid` and display `name`. Immediately adds the
    /// mandatory AccessoryInformation service (Identify, Name) as `iid` 1/2/3.
    #[must_use]
    pub fn new(aid: u64, name: impl Into<String>) -> Self {
        let name = name.into();
        let identify = Characteristic {
            iid: 2,
            type_uri: IDENTIFY_TYPE.to_string(),
            format: Format::Bool,
            permissions: Permissions::PAIRED_WRITE,
            constraints: Constraints::default(),
            unit: None,
            handler: CharacteristicHandler::static_bool(false),
            subscribers: SubscriberRegistry::default(),
        };
        let name_char = Characteristic {
            iid: 3,
            type_uri: NAME_TYPE.to_string(),
            format: Format::String,
            permissions: Permissions::PAIRED_READ,
            constraints: Constraints {
                max_len: Some(64),
                ..Default::default()
            },
            unit: None,
            handler: CharacteristicHandler::static_string(name.clone()),
            subscribers: SubscriberRegistry::default(),
        };
        let info_service = Service {
            iid: 1,
            type_uri: ACCESSORY_INFORMATION_TYPE.to_string(),
            hidden: false,
            primary: false,
            characteristics: vec![identify, name_char],
        };
        Self {
            aid,
            next_iid: 4,
            name,
            services: vec![info_service],
        }
    }

    /// Add an application-defined service. `iid`s for its characteristics are assigned
    /// sequentially, unique within this accessory.
    pub fn add_service(&mut self, type_uri: impl Into<String>, characteristics: Vec<ServiceCharacteristic>) -> &mut Self {
        let service_iid = self.next_iid;
        self.next_iid += 1;

        let characteristics = characteristics
            .into_iter()
            .map(|spec| {
                let iid = self.next_iid;
                self.next_iid += 1;
                Characteristic {
                    iid,
                    type_uri: spec.type_uri,
                    format: spec.format,
                    permissions: spec.permissions,
                    constraints: spec.constraints,
                    unit: spec.unit,
                    handler: spec.handler,
                    subscribers: SubscriberRegistry::default(),
                }
            })
            .collect();

        self.services.push(Service {
            iid: service_iid,
            type_uri: type_uri.into(),
            hidden: false,
            primary: self.services.len() == 1,
            characteristics,
        });
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Accessory {
        Accessory {
            aid: self.aid,
            services: self.services,
        }
    }

    /// The display name this accessory was built with (for log messages, not part of the model).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One characteristic to add to a service via [`AccessoryBuilder::add_service`].
pub struct ServiceCharacteristic {
    pub type_uri: String,
    pub format: Format,
    pub permissions: Permissions,
    pub constraints: Constraints,
    pub unit: Option<String>,
    pub handler: CharacteristicHandler,
}

impl ServiceCharacteristic {
    /// A read/write characteristic backed by accessory-provided callbacks.
    #[must_use]
    pub fn callback(
        type_uri: impl Into<String>,
        format: Format,
        permissions: Permissions,
        get: impl Fn() -> CharacteristicValue + Send + Sync + 'static,
        set: impl Fn(CharacteristicValue) + Send + Sync + 'static,
    ) -> Self {
        Self {
            type_uri: type_uri.into(),
            format,
            permissions,
            constraints: Constraints::default(),
            unit: None,
            handler: CharacteristicHandler::callback(get, set),
        }
    }

    /// A characteristic whose value lives entirely in-process.
    #[must_use]
    pub fn static_value(type_uri: impl Into<String>, format: Format, permissions: Permissions, value: CharacteristicValue) -> Self {
        Self {
            type_uri: type_uri.into(),
            format,
            permissions,
            constraints: Constraints::default(),
            unit: None,
            handler: CharacteristicHandler::static_value(value),
        }
    }

    /// Declare numeric/length constraints on this characteristic.
    #[must_use]
    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_seeds_mandatory_information_service() {
        let accessory = AccessoryBuilder::new(1, "Test Lamp").build();
        let info = &accessory.services[0];
        assert_eq!(info.type_uri, ACCESSORY_INFORMATION_TYPE);
        assert!(info.characteristics.iter().any(|c| c.type_uri == IDENTIFY_TYPE));
        assert!(info.characteristics.iter().any(|c| c.type_uri == NAME_TYPE));
    }

    #[test]
    fn added_services_get_unique_sequential_iids() {
        let mut builder = AccessoryBuilder::new(1, "Test Lamp");
        builder.add_service(
            "lightbulb",
            vec![ServiceCharacteristic::static_value(
                "on",
                Format::Bool,
                Permissions::PAIRED_READ | Permissions::PAIRED_WRITE,
                CharacteristicValue::Bool(false),
            )],
        );
        let accessory = builder.build();
        let iids: Vec<u64> = accessory
            .services
            .iter()
            .flat_map(|s| std::iter::once(s.iid).chain(s.characteristics.iter().map(|c| c.iid)))
            .collect();
        let mut sorted = iids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(iids.len(), sorted.len(), "all iids within an accessory must be unique");
    }

    #[test]
    fn generated_setup_code_has_dash_shape() {
        let code = generate_setup_code();
        assert_eq!(code.len(), 10);
        assert_eq!(code.chars().nth(3), Some('-'));
        assert_eq!(code.chars().nth(6), Some('-'));
    }
}
