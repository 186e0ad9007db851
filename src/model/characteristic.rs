//! Characteristic value representation, permission bitset and the typed handler variant.

use std::sync::{Arc, Mutex};

use bitflags::bitflags;

use crate::error::{Error, RangeError};

bitflags! {
    /// The permission bits a characteristic declares, matching HAP's `perms` array
    /// (`pr`, `pw`, `ev`, `aa`, `tw`, `hd`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u8 {
        const PAIRED_READ        = 0b0000_0001;
        const PAIRED_WRITE       = 0b0000_0010;
        const NOTIFY             = 0b0000_0100;
        const ADDITIONAL_AUTH    = 0b0000_1000;
        const TIMED_WRITE        = 0b0001_0000;
        const HIDDEN             = 0b0010_0000;
    }
}

/// The declared wire format of a characteristic's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Bool,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int,
    Float,
    String,
    Tlv8,
    Data,
}

impl Format {
    /// The format's own natural numeric bounds, used as the default range before `min_value`/
    /// `max_value` tighten it. Non-numeric formats have no natural range.
    #[must_use]
    pub fn natural_range(self) -> (Option<f64>, Option<f64>) {
        match self {
            Format::UInt8 => (Some(0.0), Some(f64::from(u8::MAX))),
            Format::UInt16 => (Some(0.0), Some(f64::from(u16::MAX))),
            Format::UInt32 => (Some(0.0), Some(f64::from(u32::MAX))),
            Format::UInt64 => (Some(0.0), Some(u64::MAX as f64)),
            Format::Int => (Some(f64::from(i32::MIN)), Some(f64::from(i32::MAX))),
            Format::Bool | Format::Float | Format::String | Format::Tlv8 | Format::Data => (None, None),
        }
    }
}

/// A decoded characteristic value, as produced by JSON body parsing and handler callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum CharacteristicValue {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

/// The HAP-default maximum length for a `string` characteristic with no declared `max_len`.
const DEFAULT_MAX_STRING_LEN: usize = 64;

/// Numeric/length constraints a characteristic may declare.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub min_step: Option<f64>,
    pub max_len: Option<usize>,
    pub max_data_len: Option<usize>,
    pub valid_values: Option<Vec<i64>>,
}

impl Constraints {
    /// Validate `value` against this characteristic's declared `format` and constraints.
    ///
    /// # Errors
    /// Returns [`Error::Range`] if a numeric bound, step, or string/data length is violated.
    pub fn validate(&self, format: Format, value: &CharacteristicValue) -> Result<(), Error> {
        match (format, value) {
            (Format::String, CharacteristicValue::String(s)) => {
                let max_len = self.max_len.unwrap_or(DEFAULT_MAX_STRING_LEN);
                if s.len() > max_len {
                    return Err(Error::Range(RangeError::StringTooLong));
                }
            }
            (Format::Data, CharacteristicValue::Bytes(b)) => {
                if let Some(max_data_len) = self.max_data_len {
                    if b.len() > max_data_len {
                        return Err(Error::Range(RangeError::DataTooLong));
                    }
                }
            }
            (_, CharacteristicValue::UInt(n)) => self.validate_numeric(format, *n as f64)?,
            (_, CharacteristicValue::Int(n)) => {
                if let Some(values) = &self.valid_values {
                    if !values.contains(n) {
                        return Err(Error::Range(RangeError::NotInValidValues));
                    }
                }
                self.validate_numeric(format, *n as f64)?;
            }
            (_, CharacteristicValue::Float(n)) => self.validate_numeric(format, *n)?,
            _ => {}
        }
        Ok(())
    }

    fn validate_numeric(&self, format: Format, n: f64) -> Result<(), Error> {
        let (natural_min, natural_max) = format.natural_range();
        let min = self.min_value.or(natural_min);
        let max = self.max_value.or(natural_max);

        if let Some(min) = min {
            if n < min {
                return Err(Error::Range(RangeError::BelowMinimum));
            }
        }
        if let Some(max) = max {
            if n > max {
                return Err(Error::Range(RangeError::AboveMaximum));
            }
        }
        if let Some(step) = self.min_step {
            if step > 0.0 {
                let offset = self.min_value.unwrap_or(0.0);
                let steps = (n - offset) / step;
                if (steps - steps.round()).abs() > f64::EPSILON * 4.0 {
                    return Err(Error::Range(RangeError::NotAStepMultiple));
                }
            }
        }
        Ok(())
    }
}

type Getter = Arc<dyn Fn() -> CharacteristicValue + Send + Sync>;
type Setter = Arc<dyn Fn(CharacteristicValue) + Send + Sync>;

/// How a characteristic's value is backed. Replaces a single opaque callback pointer with a
/// small closed set of variants the dispatcher can match on directly.
#[derive(Clone)]
pub enum CharacteristicHandler {
    /// A value with no accessory-specific behavior behind it (e.g. `Identify`, constant
    /// `Manufacturer` strings): stored in-process, read and written in place.
    Static(Arc<Mutex<CharacteristicValue>>),
    /// A value backed by accessory-provided callbacks (e.g. a GPIO-driven lightbulb).
    Callback { get: Getter, set: Setter },
}

impl CharacteristicHandler {
    /// A `Static` handler seeded with `value`.
    #[must_use]
    pub fn static_value(value: CharacteristicValue) -> Self {
        Self::Static(Arc::new(Mutex::new(value)))
    }

    /// Shorthand for a `Static` boolean handler.
    #[must_use]
    pub fn static_bool(value: bool) -> Self {
        Self::static_value(CharacteristicValue::Bool(value))
    }

    /// Shorthand for a `Static` string handler.
    #[must_use]
    pub fn static_string(value: impl Into<String>) -> Self {
        Self::static_value(CharacteristicValue::String(value.into()))
    }

    /// Wrap a pair of accessory-provided getter/setter closures.
    #[must_use]
    pub fn callback(
        get: impl Fn() -> CharacteristicValue + Send + Sync + 'static,
        set: impl Fn(CharacteristicValue) + Send + Sync + 'static,
    ) -> Self {
        Self::Callback {
            get: Arc::new(get),
            set: Arc::new(set),
        }
    }

    /// Read the current value.
    #[must_use]
    pub fn get(&self) -> CharacteristicValue {
        match self {
            Self::Static(cell) => cell.lock().expect("characteristic value mutex poisoned").clone(),
            Self::Callback { get, .. } => get(),
        }
    }

    /// Apply a new value.
    pub fn set(&self, value: CharacteristicValue) {
        match self {
            Self::Static(cell) => {
                *cell.lock().expect("characteristic value mutex poisoned") = value;
            }
            Self::Callback { set, .. } => set(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_handler_round_trips() {
        let handler = CharacteristicHandler::static_bool(false);
        handler.set(CharacteristicValue::Bool(true));
        assert_eq!(handler.get(), CharacteristicValue::Bool(true));
    }

    #[test]
    fn callback_handler_delegates_to_closures() {
        let state = Arc::new(Mutex::new(CharacteristicValue::UInt(0)));
        let read_state = state.clone();
        let write_state = state.clone();
        let handler = CharacteristicHandler::callback(
            move || read_state.lock().unwrap().clone(),
            move |value| *write_state.lock().unwrap() = value,
        );

        handler.set(CharacteristicValue::UInt(42));
        assert_eq!(handler.get(), CharacteristicValue::UInt(42));
    }

    #[test]
    fn constraints_reject_out_of_range_value() {
        let constraints = Constraints {
            min_value: Some(0.0),
            max_value: Some(100.0),
            ..Default::default()
        };
        let err = constraints
            .validate(Format::UInt8, &CharacteristicValue::UInt(150))
            .unwrap_err();
        assert!(matches!(err, Error::Range(RangeError::AboveMaximum)));
    }

    #[test]
    fn numeric_range_defaults_to_the_formats_natural_bounds() {
        let constraints = Constraints::default();
        assert!(constraints
            .validate(Format::UInt8, &CharacteristicValue::UInt(255))
            .is_ok());
        let err = constraints
            .validate(Format::UInt8, &CharacteristicValue::UInt(256))
            .unwrap_err();
        assert!(matches!(err, Error::Range(RangeError::AboveMaximum)));
    }

    #[test]
    fn constraints_enforce_step() {
        let constraints = Constraints {
            min_value: Some(0.0),
            min_step: Some(5.0),
            ..Default::default()
        };
        assert!(constraints
            .validate(Format::UInt8, &CharacteristicValue::UInt(12))
            .is_err());
        assert!(constraints
            .validate(Format::UInt8, &CharacteristicValue::UInt(15))
            .is_ok());
    }

    #[test]
    fn constraints_enforce_string_length() {
        let constraints = Constraints {
            max_len: Some(4),
            ..Default::default()
        };
        let err = constraints
            .validate(Format::String, &CharacteristicValue::String("toolong".into()))
            .unwrap_err();
        assert!(matches!(err, Error::Range(RangeError::StringTooLong)));
    }

    #[test]
    fn string_length_defaults_to_64_without_a_declared_max_len() {
        let constraints = Constraints::default();
        assert!(constraints
            .validate(Format::String, &CharacteristicValue::String("a".repeat(64)))
            .is_ok());
        let err = constraints
            .validate(Format::String, &CharacteristicValue::String("a".repeat(65)))
            .unwrap_err();
        assert!(matches!(err, Error::Range(RangeError::StringTooLong)));
    }
}
