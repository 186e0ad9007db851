//! The in-memory accessory/service/characteristic tree.

mod characteristic;
mod subscription;

pub use characteristic::{
    CharacteristicHandler, CharacteristicValue, Constraints, Format, Permissions,
};
pub use subscription::{SessionId, SubscriberRegistry};

use crate::error::Error;

/// `HAPStatus` values carried in `GET`/`PUT /characteristics` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum HapStatus {
    Success = 0,
    InsufficientPrivileges = -70401,
    ReadOnly = -70404,
    WriteOnly = -70405,
    NotificationsUnsupported = -70406,
    OutOfResources = -70407,
    NoResource = -70409,
    InvalidValue = -70410,
}

impl From<&Error> for HapStatus {
    fn from(err: &Error) -> Self {
        match err {
            Error::NotFound => HapStatus::NoResource,
            Error::Permission(crate::error::PermissionError::ReadOnly) => HapStatus::ReadOnly,
            Error::Permission(crate::error::PermissionError::WriteOnly) => HapStatus::WriteOnly,
            Error::Permission(crate::error::PermissionError::NotificationsUnsupported) => {
                HapStatus::NotificationsUnsupported
            }
            Error::Permission(crate::error::PermissionError::InsufficientPrivileges) => {
                HapStatus::InsufficientPrivileges
            }
            Error::Range(_) | Error::Protocol(_) => HapStatus::InvalidValue,
            Error::Internal(_) => HapStatus::OutOfResources,
            _ => HapStatus::InvalidValue,
        }
    }
}

/// A single characteristic, addressable as `aid.iid`.
pub struct Characteristic {
    pub iid: u64,
    pub type_uri: String,
    pub format: Format,
    pub permissions: Permissions,
    pub constraints: Constraints,
    pub unit: Option<String>,
    pub handler: CharacteristicHandler,
    pub subscribers: SubscriberRegistry,
}

impl Characteristic {
    /// Read the current value, enforcing `paired_read`.
    pub fn read(&self) -> Result<CharacteristicValue, Error> {
        if !self.permissions.contains(Permissions::PAIRED_READ) {
            return Err(Error::Permission(crate::error::PermissionError::WriteOnly));
        }
        Ok(self.handler.get())
    }

    /// Validate and apply a write, enforcing `paired_write` and the declared constraints.
    pub fn write(&mut self, value: &CharacteristicValue) -> Result<(), Error> {
        if !self.permissions.contains(Permissions::PAIRED_WRITE) {
            return Err(Error::Permission(crate::error::PermissionError::ReadOnly));
        }
        self.constraints.validate(self.format, value)?;
        self.handler.set(value.clone());
        Ok(())
    }

    /// Add or remove an event subscription, enforcing `notify`.
    pub fn set_subscribed(&mut self, session: SessionId, subscribed: bool) -> Result<(), Error> {
        if !self.permissions.contains(Permissions::NOTIFY) {
            return Err(Error::Permission(
                crate::error::PermissionError::NotificationsUnsupported,
            ));
        }
        if subscribed {
            self.subscribers.subscribe(session);
        } else {
            self.subscribers.unsubscribe(session);
        }
        Ok(())
    }
}

/// A service, owning an ordered list of characteristics.
pub struct Service {
    pub iid: u64,
    pub type_uri: String,
    pub hidden: bool,
    pub primary: bool,
    pub characteristics: Vec<Characteristic>,
}

/// A top-level accessory, owning an ordered list of services.
pub struct Accessory {
    pub aid: u64,
    pub services: Vec<Service>,
}

impl Accessory {
    fn find_characteristic_mut(&mut self, iid: u64) -> Option<&mut Characteristic> {
        self.services
            .iter_mut()
            .flat_map(|s| s.characteristics.iter_mut())
            .find(|c| c.iid == iid)
    }

    fn find_characteristic(&self, iid: u64) -> Option<&Characteristic> {
        self.services
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.iid == iid)
    }

    /// Find the unique characteristic of the given type anywhere in this accessory, mutably.
    /// Used by `/identify`, which addresses the Identify characteristic by type rather than iid.
    pub fn find_characteristic_by_type_mut(&mut self, type_uri: &str) -> Option<&mut Characteristic> {
        self.services
            .iter_mut()
            .flat_map(|s| s.characteristics.iter_mut())
            .find(|c| c.type_uri == type_uri)
    }
}

/// The whole accessory tree owned by the server.
#[derive(Default)]
pub struct AccessoryModel {
    accessories: Vec<Accessory>,
}

impl AccessoryModel {
    /// Build a model from a list of accessories. The first accessory must carry the mandatory
    /// AccessoryInformation service; this is a caller responsibility enforced by
    /// [`crate::config::AccessoryBuilder`], not re-validated here.
    #[must_use]
    pub fn new(accessories: Vec<Accessory>) -> Self {
        Self { accessories }
    }

    /// Find the unique characteristic with the given `aid.iid`, if any.
    #[must_use]
    pub fn find_by_id(&self, aid: u64, iid: u64) -> Option<&Characteristic> {
        self.accessories
            .iter()
            .find(|a| a.aid == aid)
            .and_then(|a| a.find_characteristic(iid))
    }

    /// Mutable variant of [`Self::find_by_id`].
    pub fn find_by_id_mut(&mut self, aid: u64, iid: u64) -> Option<&mut Characteristic> {
        self.accessories
            .iter_mut()
            .find(|a| a.aid == aid)
            .and_then(|a| a.find_characteristic_mut(iid))
    }

    /// All accessories, in registration order (used to render `GET /accessories`).
    #[must_use]
    pub fn accessories(&self) -> &[Accessory] {
        &self.accessories
    }

    /// The first accessory, mutably. Every process has exactly one (it carries the mandatory
    /// AccessoryInformation service, including Identify), so `/identify` addresses it directly.
    pub fn first_accessory_mut(&mut self) -> Option<&mut Accessory> {
        self.accessories.first_mut()
    }

    /// Remove every subscription a session holds, across every characteristic. Called when a
    /// session's connection tears down so no dangling `(session_id, ...)` registration remains.
    pub fn unsubscribe_session(&mut self, session: SessionId) {
        for accessory in &mut self.accessories {
            for service in &mut accessory.services {
                for characteristic in &mut service.characteristics {
                    characteristic.subscribers.unsubscribe(session);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::characteristic::CharacteristicHandler;

    fn sample_model() -> AccessoryModel {
        AccessoryModel::new(vec![Accessory {
            aid: 1,
            services: vec![Service {
                iid: 1,
                type_uri: "0000003E-0000-1000-8000-0026BB765291".into(),
                hidden: false,
                primary: true,
                characteristics: vec![
                    Characteristic {
                        iid: 2,
                        type_uri: "light-on".into(),
                        format: Format::Bool,
                        permissions: Permissions::PAIRED_READ,
                        constraints: Constraints::default(),
                        unit: None,
                        handler: CharacteristicHandler::static_bool(true),
                        subscribers: SubscriberRegistry::default(),
                    },
                    Characteristic {
                        iid: 3,
                        type_uri: "light-write-only".into(),
                        format: Format::Bool,
                        permissions: Permissions::PAIRED_WRITE,
                        constraints: Constraints::default(),
                        unit: None,
                        handler: CharacteristicHandler::static_bool(false),
                        subscribers: SubscriberRegistry::default(),
                    },
                ],
            }],
        }])
    }

    #[test]
    fn find_by_id_returns_unique_characteristic() {
        let model = sample_model();
        assert!(model.find_by_id(1, 2).is_some());
        assert!(model.find_by_id(1, 99).is_none());
        assert!(model.find_by_id(9, 2).is_none());
    }

    #[test]
    fn write_without_paired_write_is_read_only() {
        let mut model = sample_model();
        let ch = model.find_by_id_mut(1, 2).unwrap();
        let err = ch.write(&CharacteristicValue::Bool(false)).unwrap_err();
        assert!(matches!(
            err,
            Error::Permission(crate::error::PermissionError::ReadOnly)
        ));
    }

    #[test]
    fn read_without_paired_read_is_write_only() {
        let mut model = sample_model();
        let ch = model.find_by_id_mut(1, 3).unwrap();
        let err = ch.read().unwrap_err();
        assert!(matches!(
            err,
            Error::Permission(crate::error::PermissionError::WriteOnly)
        ));
    }

    #[test]
    fn subscribe_without_notify_is_unsupported() {
        let mut model = sample_model();
        let ch = model.find_by_id_mut(1, 2).unwrap();
        let err = ch.set_subscribed(SessionId(1), true).unwrap_err();
        assert!(matches!(
            err,
            Error::Permission(crate::error::PermissionError::NotificationsUnsupported)
        ));
    }
}
