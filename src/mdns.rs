//! The mDNS/DNS-SD advertisement collaborator: the core only ever hands it a TXT-record snapshot
//! and never speaks the DNS-SD wire protocol itself.

use async_trait::async_trait;

use crate::config::AccessoryCategory;
use crate::error::Error;

/// One `_hap._tcp` TXT record, assembled fresh whenever the accessory's paired/config state
/// changes. Each entry is guaranteed to fit in a single DNS TXT string (<= 255 bytes), which
/// every key here does by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecord(Vec<(&'static str, String)>);

impl TxtRecord {
    /// Build the TXT record for the current accessory state.
    #[must_use]
    pub fn build(accessory_id: &str, config_number: u32, category: AccessoryCategory, paired: bool) -> Self {
        let entries = vec![
            ("md", accessory_id.to_string()),
            ("pv", "1.0".to_string()),
            ("id", accessory_id.to_string()),
            ("c#", config_number.to_string()),
            ("s#", "1".to_string()),
            ("ff", "0".to_string()),
            ("sf", if paired { "0" } else { "1" }.to_string()),
            ("ci", category.mdns_code().to_string()),
        ];
        for (key, value) in &entries {
            debug_assert!(
                key.len() + 1 + value.len() <= 255,
                "mDNS TXT entries must each fit one DNS TXT string"
            );
        }
        Self(entries)
    }

    /// The entries as `key=value` pairs, in the order a DNS TXT record would carry them.
    #[must_use]
    pub fn entries(&self) -> &[(&'static str, String)] {
        &self.0
    }
}

/// Publishes the `_hap._tcp` service. Implementors own the actual DNS-SD responder; this crate
/// never speaks mDNS itself.
#[async_trait]
pub trait MdnsPublisher: Send + Sync {
    async fn publish(&self, name: &str, txt: &TxtRecord, port: u16, ttl: u32) -> Result<(), Error>;
}

/// A publisher that does nothing, for tests and for embedders that advertise out-of-band.
#[derive(Default)]
pub struct NoopMdnsPublisher;

#[async_trait]
impl MdnsPublisher for NoopMdnsPublisher {
    async fn publish(&self, _name: &str, _txt: &TxtRecord, _port: u16, _ttl: u32) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txt_record_reflects_paired_state() {
        let unpaired = TxtRecord::build("11:22:33:44:55:66", 1, AccessoryCategory::Lightbulb, false);
        assert!(unpaired.entries().contains(&("sf", "1".to_string())));

        let paired = TxtRecord::build("11:22:33:44:55:66", 1, AccessoryCategory::Lightbulb, true);
        assert!(paired.entries().contains(&("sf", "0".to_string())));
    }

    #[test]
    fn txt_record_carries_category_code() {
        let txt = TxtRecord::build("11:22:33:44:55:66", 3, AccessoryCategory::Thermostat, true);
        assert!(txt.entries().contains(&("ci", AccessoryCategory::Thermostat.mdns_code().to_string())));
        assert!(txt.entries().contains(&("c#", "3".to_string())));
    }
}
