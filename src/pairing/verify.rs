//! Pair-Verify: Curve25519 ECDH plus mutual Ed25519 signatures over the ephemeral exchange,
//! establishing the shared secret the record layer derives its session keys from.

use crate::crypto::{
    chacha20poly1305_decrypt, chacha20poly1305_encrypt, hkdf_sha512, literal_nonce, Ed25519Identity, EphemeralKeyPair,
};
use crate::error::Error;
use crate::tlv::{Tag, TlvSet};

const SALT_ENCRYPT: &[u8] = b"Pair-Verify-Encrypt-Salt";
const INFO_ENCRYPT: &[u8] = b"Pair-Verify-Encrypt-Info";

/// A successfully completed Pair-Verify: the raw ECDH shared secret, ready for
/// [`crate::record_layer::RecordLayer::derive_keys`], plus the controller identity it was
/// verified against.
pub struct PairVerifyOutcome {
    pub shared_secret: Vec<u8>,
    pub controller_id: Vec<u8>,
}

enum State {
    AwaitingM1,
    AwaitingM3 {
        session_key: Vec<u8>,
        shared_secret: Vec<u8>,
        accessory_public: [u8; 32],
        controller_public: [u8; 32],
    },
    Done,
}

/// Looks up a paired controller's stored long-term Ed25519 public key by its opaque id.
pub trait ControllerLookup {
    fn lookup(&self, controller_id: &[u8]) -> Option<[u8; 32]>;
}

/// One in-flight Pair-Verify attempt.
pub struct PairVerifyMachine {
    state: State,
    accessory_id: Vec<u8>,
    accessory_identity: Ed25519Identity,
}

impl PairVerifyMachine {
    #[must_use]
    pub fn new(accessory_id: Vec<u8>, accessory_identity: Ed25519Identity) -> Self {
        Self {
            state: State::AwaitingM1,
            accessory_id,
            accessory_identity,
        }
    }

    /// Feed the next incoming TLV message and produce the reply to send back.
    ///
    /// # Errors
    /// Returns [`Error::Authentication`] for a bad Ed25519 signature or unknown controller id,
    /// or [`Error::Protocol`] for a malformed or out-of-sequence message.
    pub fn process(
        &mut self,
        request: &TlvSet,
        lookup: &dyn ControllerLookup,
    ) -> Result<(TlvSet, Option<PairVerifyOutcome>), Error> {
        let requested_state = request.u8_required(Tag::State)?;
        match (&self.state, requested_state) {
            (State::AwaitingM1, 1) => self.process_m1(request),
            (State::AwaitingM3 { .. }, 3) => self.process_m3(request, lookup),
            _ => Err(Error::Protocol("pair-verify message received out of sequence")),
        }
    }

    fn process_m1(&mut self, request: &TlvSet) -> Result<(TlvSet, Option<PairVerifyOutcome>), Error> {
        let controller_public = request.bytes_required(Tag::PublicKey)?;
        let controller_public_array: [u8; 32] = controller_public
            .try_into()
            .map_err(|_| Error::Protocol("controller ephemeral public key must be 32 bytes"))?;

        let ephemeral = EphemeralKeyPair::generate();
        let accessory_public = ephemeral.public_key_bytes();
        let shared_secret = ephemeral.diffie_hellman(&controller_public_array)?.to_vec();
        let session_key = hkdf_sha512(SALT_ENCRYPT, &shared_secret, INFO_ENCRYPT, 32);

        let mut accessory_info = Vec::with_capacity(64 + self.accessory_id.len());
        accessory_info.extend_from_slice(&accessory_public);
        accessory_info.extend_from_slice(&self.accessory_id);
        accessory_info.extend_from_slice(&controller_public_array);
        let accessory_signature = self.accessory_identity.sign(&accessory_info);

        let mut accessory_sub_tlv = TlvSet::new();
        accessory_sub_tlv.set_bytes(Tag::Identifier, self.accessory_id.clone());
        accessory_sub_tlv.set_bytes(Tag::Signature, accessory_signature.to_vec());

        let session_key_array: [u8; 32] = session_key
            .as_slice()
            .try_into()
            .map_err(|_| Error::Internal("pair-verify session key must be 32 bytes"))?;
        let nonce = literal_nonce(b"PV-Msg02");
        let encrypted = chacha20poly1305_encrypt(&session_key_array, &nonce, &[], &accessory_sub_tlv.encode());

        let mut reply = TlvSet::new();
        reply.set_state(2);
        reply.set_bytes(Tag::PublicKey, accessory_public.to_vec());
        reply.set_bytes(Tag::EncryptedData, encrypted);

        self.state = State::AwaitingM3 {
            session_key,
            shared_secret,
            accessory_public,
            controller_public: controller_public_array,
        };
        Ok((reply, None))
    }

    fn process_m3(
        &mut self,
        request: &TlvSet,
        lookup: &dyn ControllerLookup,
    ) -> Result<(TlvSet, Option<PairVerifyOutcome>), Error> {
        let State::AwaitingM3 {
            session_key,
            shared_secret,
            accessory_public,
            controller_public,
        } = std::mem::replace(&mut self.state, State::Done)
        else {
            unreachable!("process() only dispatches here from AwaitingM3");
        };

        let encrypted = request.bytes_required(Tag::EncryptedData)?;
        let session_key_array: [u8; 32] = session_key
            .as_slice()
            .try_into()
            .map_err(|_| Error::Internal("pair-verify session key must be 32 bytes"))?;

        let nonce = literal_nonce(b"PV-Msg03");
        let plaintext = chacha20poly1305_decrypt(&session_key_array, &nonce, &[], encrypted)?;
        let sub_tlv = TlvSet::decode(&plaintext)?;

        let controller_id = sub_tlv.bytes_required(Tag::Identifier)?.to_vec();
        let controller_signature = sub_tlv.bytes_required(Tag::Signature)?;

        let controller_key = lookup.lookup(&controller_id).ok_or(Error::Authentication)?;
        let controller_identity = Ed25519Identity::from_public_key_bytes(&controller_key)?;

        let mut controller_info = Vec::with_capacity(64 + controller_id.len());
        controller_info.extend_from_slice(&controller_public);
        controller_info.extend_from_slice(&controller_id);
        controller_info.extend_from_slice(&accessory_public);

        controller_identity
            .verify(&controller_info, controller_signature)
            .map_err(|_| Error::Authentication)?;

        let mut reply = TlvSet::new();
        reply.set_state(4);

        let outcome = PairVerifyOutcome {
            shared_secret,
            controller_id,
        };
        Ok((reply, Some(outcome)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticLookup(Option<[u8; 32]>);
    impl ControllerLookup for StaticLookup {
        fn lookup(&self, _controller_id: &[u8]) -> Option<[u8; 32]> {
            self.0
        }
    }

    #[test]
    fn m1_produces_accessory_ephemeral_key_and_encrypted_info() {
        let mut m = PairVerifyMachine::new(b"11:22:33:44:55:66".to_vec(), Ed25519Identity::generate());
        let controller_ephemeral = EphemeralKeyPair::generate();

        let mut m1 = TlvSet::new();
        m1.set_state(1);
        m1.set_bytes(Tag::PublicKey, controller_ephemeral.public_key_bytes().to_vec());

        let (reply, outcome) = m.process(&m1, &StaticLookup(None)).unwrap();
        assert_eq!(reply.u64(Tag::State).unwrap(), Some(2));
        assert!(reply.bytes(Tag::PublicKey).is_some());
        assert!(reply.bytes(Tag::EncryptedData).is_some());
        assert!(outcome.is_none());
    }

    #[test]
    fn full_exchange_with_known_controller_succeeds() {
        let accessory_identity = Ed25519Identity::generate();
        let mut m = PairVerifyMachine::new(b"11:22:33:44:55:66".to_vec(), accessory_identity);

        let controller_ephemeral = EphemeralKeyPair::generate();
        let controller_ephemeral_public = controller_ephemeral.public_key_bytes();
        let controller_identity = Ed25519Identity::generate();
        let controller_long_term_public = controller_identity.public_key_bytes();
        let controller_id = b"controller-1".to_vec();

        let mut m1 = TlvSet::new();
        m1.set_state(1);
        m1.set_bytes(Tag::PublicKey, controller_ephemeral_public.to_vec());
        let (reply_m2, _) = m.process(&m1, &StaticLookup(Some(controller_long_term_public))).unwrap();

        let accessory_ephemeral_public: [u8; 32] = reply_m2.bytes(Tag::PublicKey).unwrap().try_into().unwrap();
        let shared_secret = controller_ephemeral.diffie_hellman(&accessory_ephemeral_public).unwrap();
        let session_key = hkdf_sha512(SALT_ENCRYPT, &shared_secret, INFO_ENCRYPT, 32);
        let session_key_array: [u8; 32] = session_key.as_slice().try_into().unwrap();

        let mut controller_info = Vec::new();
        controller_info.extend_from_slice(&controller_ephemeral_public);
        controller_info.extend_from_slice(&controller_id);
        controller_info.extend_from_slice(&accessory_ephemeral_public);
        let signature = controller_identity.sign(&controller_info);

        let mut controller_sub_tlv = TlvSet::new();
        controller_sub_tlv.set_bytes(Tag::Identifier, controller_id.clone());
        controller_sub_tlv.set_bytes(Tag::Signature, signature.to_vec());
        let encrypted = chacha20poly1305_encrypt(&session_key_array, &literal_nonce(b"PV-Msg03"), &[], &controller_sub_tlv.encode());

        let mut m3 = TlvSet::new();
        m3.set_state(3);
        m3.set_bytes(Tag::EncryptedData, encrypted);

        let (reply_m4, outcome) = m.process(&m3, &StaticLookup(Some(controller_long_term_public))).unwrap();
        assert_eq!(reply_m4.u64(Tag::State).unwrap(), Some(4));
        let outcome = outcome.unwrap();
        assert_eq!(outcome.controller_id, controller_id);
    }
}
