//! Apple TLV8 codec.
//!
//! A sequence of `(type: 1, length: 1, value: length)` tuples. Values longer than 255 bytes are
//! split into consecutive same-type fragments of length 255 (the last fragment may be shorter);
//! decoding concatenates adjacent same-type fragments back into one logical value. Integers are
//! encoded little-endian in the minimal number of bytes; 1, 2, 4, and 8-byte widths are accepted
//! and zero-extended on decode.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

const FRAGMENT_SIZE: usize = 255;

/// The recognized TLV8 type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tag {
    Method,
    Identifier,
    Salt,
    PublicKey,
    Proof,
    EncryptedData,
    State,
    Error,
    RetryDelay,
    Certificate,
    Signature,
    Permissions,
    FragmentData,
    FragmentLast,
    Separator,
}

impl Tag {
    pub(crate) fn into_val(self) -> u8 {
        match self {
            Tag::Method => 0x00,
            Tag::Identifier => 0x01,
            Tag::Salt => 0x02,
            Tag::PublicKey => 0x03,
            Tag::Proof => 0x04,
            Tag::EncryptedData => 0x05,
            Tag::State => 0x06,
            Tag::Error => 0x07,
            Tag::RetryDelay => 0x08,
            Tag::Certificate => 0x09,
            Tag::Signature => 0x0A,
            Tag::Permissions => 0x0B,
            Tag::FragmentData => 0x0D,
            Tag::FragmentLast => 0x0E,
            Tag::Separator => 0xFF,
        }
    }

    fn try_from_val(val: u8) -> Result<Self> {
        match val {
            0x00 => Ok(Tag::Method),
            0x01 => Ok(Tag::Identifier),
            0x02 => Ok(Tag::Salt),
            0x03 => Ok(Tag::PublicKey),
            0x04 => Ok(Tag::Proof),
            0x05 => Ok(Tag::EncryptedData),
            0x06 => Ok(Tag::State),
            0x07 => Ok(Tag::Error),
            0x08 => Ok(Tag::RetryDelay),
            0x09 => Ok(Tag::Certificate),
            0x0A => Ok(Tag::Signature),
            0x0B => Ok(Tag::Permissions),
            0x0D => Ok(Tag::FragmentData),
            0x0E => Ok(Tag::FragmentLast),
            0xFF => Ok(Tag::Separator),
            _ => Err(Error::Protocol("unrecognized TLV8 type tag")),
        }
    }
}

/// TLV error values carried in an `Error` (tag 0x07) item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvError {
    Unknown = 1,
    Authentication = 2,
    Backoff = 3,
    MaxPeers = 4,
    MaxTries = 5,
    Unavailable = 6,
    Busy = 7,
}

impl From<&Error> for TlvError {
    fn from(err: &Error) -> Self {
        match err {
            Error::Authentication => TlvError::Authentication,
            Error::Busy => TlvError::Busy,
            Error::Unavailable => TlvError::Unavailable,
            Error::MaxPeers => TlvError::MaxPeers,
            _ => TlvError::Unknown,
        }
    }
}

/// One logical TLV8 value, already de-fragmented.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlvSet {
    fields: BTreeMap<u8, Vec<u8>>,
    /// Records with multiple Separator-delimited records (used by ListPairings) are represented
    /// as the concatenation of each record's encoding; most callers only ever see one record.
    records: Vec<BTreeMap<u8, Vec<u8>>>,
}

impl TlvSet {
    /// Start building a single-record TLV set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a raw byte value for `tag`, overwriting any previous value.
    pub fn set_bytes(&mut self, tag: Tag, value: impl Into<Vec<u8>>) -> &mut Self {
        self.fields.insert(tag.into_val(), value.into());
        self
    }

    /// Set an unsigned integer value, encoded little-endian in the minimal width.
    pub fn set_u64(&mut self, tag: Tag, value: u64) -> &mut Self {
        let mut bytes = value.to_le_bytes().to_vec();
        while bytes.len() > 1 && *bytes.last().unwrap() == 0 {
            bytes.pop();
        }
        self.set_bytes(tag, bytes)
    }

    /// Set a state number (the common `State` TLV carried in every pairing message).
    pub fn set_state(&mut self, state: u8) -> &mut Self {
        self.set_u64(Tag::State, u64::from(state))
    }

    /// Set an `Error` TLV from a [`TlvError`].
    pub fn set_error(&mut self, error: TlvError) -> &mut Self {
        self.set_u64(Tag::Error, error as u64)
    }

    /// Finish the current record and start a new one, separated by a `Separator` TLV. Used for
    /// `ListPairings` responses, which emit one record per pairing.
    pub fn push_record(&mut self) -> &mut Self {
        let finished = std::mem::take(&mut self.fields);
        self.records.push(finished);
        self
    }

    fn get_bytes(&self, tag: Tag) -> Option<&[u8]> {
        self.fields.get(&tag.into_val()).map(Vec::as_slice)
    }

    /// Raw byte value for `tag`, if present.
    #[must_use]
    pub fn bytes(&self, tag: Tag) -> Option<&[u8]> {
        self.get_bytes(tag)
    }

    /// Decode an unsigned integer value for `tag` (1, 2, 4 or 8 bytes, zero-extended).
    pub fn u64(&self, tag: Tag) -> Result<Option<u64>> {
        let Some(raw) = self.get_bytes(tag) else {
            return Ok(None);
        };
        let mut buf = [0u8; 8];
        match raw.len() {
            1 | 2 | 4 | 8 => {
                buf[..raw.len()].copy_from_slice(raw);
                Ok(Some(u64::from_le_bytes(buf)))
            }
            _ => Err(Error::Protocol("invalid TLV8 integer width")),
        }
    }

    /// Decode a required `u8` state/method/permissions value.
    pub fn u8_required(&self, tag: Tag) -> Result<u8> {
        self.u64(tag)?
            .map(|v| v as u8)
            .ok_or(Error::Protocol("missing required TLV8 field"))
    }

    /// Required raw bytes for `tag`.
    pub fn bytes_required(&self, tag: Tag) -> Result<&[u8]> {
        self.get_bytes(tag)
            .ok_or(Error::Protocol("missing required TLV8 field"))
    }

    /// Required UTF-8 string for `tag`.
    pub fn string_required(&self, tag: Tag) -> Result<String> {
        let raw = self.bytes_required(tag)?;
        String::from_utf8(raw.to_vec()).map_err(|_| Error::Protocol("TLV8 value is not UTF-8"))
    }

    /// Encode this set (and any additional records pushed with [`Self::push_record`]) to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for record in self.records.iter().chain(std::iter::once(&self.fields)) {
            if !out.is_empty() {
                out.push(Tag::Separator.into_val());
                out.push(0);
            }
            for (&tag, value) in record {
                encode_field(&mut out, tag, value);
            }
        }
        out
    }

    /// Decode a single-record TLV8 byte stream (pairing messages never carry a `Separator`).
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut fields: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
        let mut last_tag: Option<u8> = None;
        let mut cursor = data;

        while !cursor.is_empty() {
            if cursor.len() < 2 {
                return Err(Error::Protocol("truncated TLV8 item"));
            }
            let tag = cursor[0];
            let len = cursor[1] as usize;
            if cursor.len() < 2 + len {
                return Err(Error::Protocol("truncated TLV8 item value"));
            }
            let value = &cursor[2..2 + len];
            // Validate the tag is recognized; fragment continuation bytes reuse the same tag.
            let parsed_tag = Tag::try_from_val(tag)?;

            if parsed_tag == Tag::Separator {
                last_tag = None;
            } else {
                if last_tag == Some(tag) {
                    fields.entry(tag).or_default().extend_from_slice(value);
                } else {
                    fields.insert(tag, value.to_vec());
                }
                last_tag = if len == FRAGMENT_SIZE { Some(tag) } else { None };
            }

            cursor = &cursor[2 + len..];
        }

        Ok(Self {
            fields,
            records: Vec::new(),
        })
    }
}

fn encode_field(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    if value.is_empty() {
        out.push(tag);
        out.push(0);
        return;
    }
    for chunk in value.chunks(FRAGMENT_SIZE) {
        out.push(tag);
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_fields() {
        let mut tlv = TlvSet::new();
        tlv.set_state(1);
        tlv.set_bytes(Tag::PublicKey, vec![1, 2, 3, 4]);

        let encoded = tlv.encode();
        let decoded = TlvSet::decode(&encoded).unwrap();

        assert_eq!(decoded.u64(Tag::State).unwrap(), Some(1));
        assert_eq!(decoded.bytes(Tag::PublicKey).unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn fragments_values_over_255_bytes() {
        let big = vec![0xAB; 600];
        let mut tlv = TlvSet::new();
        tlv.set_bytes(Tag::Certificate, big.clone());

        let encoded = tlv.encode();
        // 600 bytes => two full 255-byte fragments + one 90-byte fragment, 2 header bytes each.
        assert_eq!(encoded.len(), 600 + 3 * 2);

        let decoded = TlvSet::decode(&encoded).unwrap();
        assert_eq!(decoded.bytes(Tag::Certificate).unwrap(), big.as_slice());
    }

    #[test]
    fn integers_are_zero_extended() {
        let mut tlv = TlvSet::new();
        tlv.set_u64(Tag::Permissions, 1);
        let decoded = TlvSet::decode(&tlv.encode()).unwrap();
        assert_eq!(decoded.u64(Tag::Permissions).unwrap(), Some(1));
    }

    #[test]
    fn list_pairings_style_separator_records() {
        let mut tlv = TlvSet::new();
        tlv.set_state(2);
        tlv.push_record();
        tlv.set_bytes(Tag::Identifier, b"device-one".to_vec());
        tlv.push_record();
        tlv.set_bytes(Tag::Identifier, b"device-two".to_vec());

        let encoded = tlv.encode();
        assert!(encoded.windows(2).any(|w| w == [0xFF, 0x00]));
    }

    #[test]
    fn rejects_unrecognized_tag() {
        let err = TlvSet::decode(&[0x42, 0x00]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
