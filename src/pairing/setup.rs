//! Pair-Setup: SRP-6a key agreement, then mutual Ed25519 long-term identity exchange encrypted
//! under the SRP-derived session key.

use crate::crypto::srp::SrpSetup;
use crate::crypto::{chacha20poly1305_decrypt, chacha20poly1305_encrypt, hkdf_sha512, literal_nonce, Ed25519Identity};
use crate::error::Error;
use crate::tlv::{Tag, TlvError, TlvSet};

const SALT_ENCRYPT: &[u8] = b"Pair-Setup-Encrypt-Salt";
const INFO_ENCRYPT: &[u8] = b"Pair-Setup-Encrypt-Info";
const SALT_CONTROLLER_SIGN: &[u8] = b"Pair-Setup-Controller-Sign-Salt";
const INFO_CONTROLLER_SIGN: &[u8] = b"Pair-Setup-Controller-Sign-Info";
const SALT_ACCESSORY_SIGN: &[u8] = b"Pair-Setup-Accessory-Sign-Salt";
const INFO_ACCESSORY_SIGN: &[u8] = b"Pair-Setup-Accessory-Sign-Info";

/// A successfully completed Pair-Setup: the controller identity to persist in the pairing store.
pub struct PairSetupOutcome {
    pub controller_id: Vec<u8>,
    pub controller_public_key: [u8; 32],
}

enum State {
    AwaitingM1,
    AwaitingM3(SrpSetup),
    AwaitingM5 { session_key: Vec<u8>, premaster: Vec<u8> },
    Done,
}

/// One in-flight Pair-Setup attempt. Dropping this drops the SRP ephemeral and session key with
/// it — there is no step at which partial pairing state outlives the attempt that created it.
pub struct PairSetupMachine {
    state: State,
    accessory_id: Vec<u8>,
    accessory_identity: Ed25519Identity,
    setup_code: String,
}

impl PairSetupMachine {
    /// `setup_code` is the current `"XXX-XX-XXX"` password, read fresh from configuration for
    /// every new attempt (it may be rotated between attempts).
    #[must_use]
    pub fn new(accessory_id: Vec<u8>, accessory_identity: Ed25519Identity, setup_code: String) -> Self {
        Self {
            state: State::AwaitingM1,
            accessory_id,
            accessory_identity,
            setup_code,
        }
    }

    /// Feed the next incoming TLV message and produce the reply to send back.
    ///
    /// Returns `(reply, outcome)`: `outcome` is `Some` only on the call that completes M5/M6,
    /// at which point the caller must persist the controller identity to the pairing store
    /// before the accessory's M6 reply is considered final.
    ///
    /// # Errors
    /// Returns [`Error::Authentication`] for a bad SRP proof or Ed25519 signature, or
    /// [`Error::Protocol`] for a malformed or out-of-sequence message.
    pub fn process(&mut self, request: &TlvSet) -> Result<(TlvSet, Option<PairSetupOutcome>), Error> {
        let requested_state = request.u8_required(Tag::State)?;
        match (&self.state, requested_state) {
            (State::AwaitingM1, 1) => self.process_m1(request),
            (State::AwaitingM3(_), 3) => self.process_m3(request),
            (State::AwaitingM5 { .. }, 5) => self.process_m5(request),
            _ => Err(Error::Protocol("pair-setup message received out of sequence")),
        }
    }

    fn process_m1(&mut self, request: &TlvSet) -> Result<(TlvSet, Option<PairSetupOutcome>), Error> {
        let method = request.u8_required(Tag::Method)?;
        if method != 0 {
            return Err(Error::Protocol("unsupported pair-setup method"));
        }

        let srp = SrpSetup::new(&self.setup_code);

        let mut reply = TlvSet::new();
        reply.set_state(2);
        reply.set_bytes(Tag::Salt, srp.salt().to_vec());
        reply.set_bytes(Tag::PublicKey, srp.b_pub().to_vec());

        self.state = State::AwaitingM3(srp);
        Ok((reply, None))
    }

    fn process_m3(&mut self, request: &TlvSet) -> Result<(TlvSet, Option<PairSetupOutcome>), Error> {
        let State::AwaitingM3(srp) = std::mem::replace(&mut self.state, State::Done) else {
            unreachable!("process() only dispatches here from AwaitingM3");
        };

        let a_pub = request.bytes_required(Tag::PublicKey)?.to_vec();
        let client_proof = request.bytes_required(Tag::Proof)?.to_vec();

        let verified = match srp.verify_client_proof(&a_pub, &client_proof) {
            Ok(v) => v,
            Err(_) => {
                let mut reply = TlvSet::new();
                reply.set_state(4);
                reply.set_error(TlvError::Authentication);
                return Ok((reply, None));
            }
        };

        let premaster = verified.premaster_secret().to_vec();
        let session_key = hkdf_sha512(SALT_ENCRYPT, &premaster, INFO_ENCRYPT, 32);

        let mut reply = TlvSet::new();
        reply.set_state(4);
        reply.set_bytes(Tag::Proof, verified.server_proof().to_vec());

        self.state = State::AwaitingM5 { session_key, premaster };
        Ok((reply, None))
    }

    fn process_m5(&mut self, request: &TlvSet) -> Result<(TlvSet, Option<PairSetupOutcome>), Error> {
        let State::AwaitingM5 { session_key, premaster } = std::mem::replace(&mut self.state, State::Done) else {
            unreachable!("process() only dispatches here from AwaitingM5");
        };

        let encrypted = request.bytes_required(Tag::EncryptedData)?;
        let session_key_array: [u8; 32] = session_key
            .as_slice()
            .try_into()
            .map_err(|_| Error::Internal("pair-setup session key must be 32 bytes"))?;

        let nonce = literal_nonce(b"PS-Msg05");
        let plaintext = chacha20poly1305_decrypt(&session_key_array, &nonce, &[], encrypted)?;
        let sub_tlv = TlvSet::decode(&plaintext)?;

        let controller_id = sub_tlv.bytes_required(Tag::Identifier)?.to_vec();
        let controller_public_key = sub_tlv.bytes_required(Tag::PublicKey)?;
        let controller_signature = sub_tlv.bytes_required(Tag::Signature)?;

        let controller_key_array: [u8; 32] = controller_public_key
            .try_into()
            .map_err(|_| Error::Protocol("controller long-term public key must be 32 bytes"))?;

        let controller_sign_material =
            signed_material(SALT_CONTROLLER_SIGN, INFO_CONTROLLER_SIGN, &premaster, &controller_id, &controller_key_array);
        let controller_identity = Ed25519Identity::from_public_key_bytes(&controller_key_array)?;
        controller_identity
            .verify(&controller_sign_material, controller_signature)
            .map_err(|_| Error::Authentication)?;

        let accessory_sign_material = signed_material(
            SALT_ACCESSORY_SIGN,
            INFO_ACCESSORY_SIGN,
            &premaster,
            &self.accessory_id,
            &self.accessory_identity.public_key_bytes(),
        );
        let accessory_signature = self.accessory_identity.sign(&accessory_sign_material);

        let mut accessory_sub_tlv = TlvSet::new();
        accessory_sub_tlv.set_bytes(Tag::Identifier, self.accessory_id.clone());
        accessory_sub_tlv.set_bytes(Tag::PublicKey, self.accessory_identity.public_key_bytes().to_vec());
        accessory_sub_tlv.set_bytes(Tag::Signature, accessory_signature.to_vec());

        let nonce = literal_nonce(b"PS-Msg06");
        let encrypted_reply =
            chacha20poly1305_encrypt(&session_key_array, &nonce, &[], &accessory_sub_tlv.encode());

        let mut reply = TlvSet::new();
        reply.set_state(6);
        reply.set_bytes(Tag::EncryptedData, encrypted_reply);

        let outcome = PairSetupOutcome {
            controller_id,
            controller_public_key: controller_key_array,
        };
        Ok((reply, Some(outcome)))
    }
}

/// Build the `X || id || public_key` material both sides sign over, where `X` is an
/// HKDF-derived value binding the signature to this specific SRP exchange's premaster secret.
fn signed_material(salt_info: &[u8], info_info: &[u8], premaster: &[u8], id: &[u8], public_key: &[u8; 32]) -> Vec<u8> {
    let x = hkdf_sha512(salt_info, premaster, info_info, 32);
    let mut material = Vec::with_capacity(x.len() + id.len() + public_key.len());
    material.extend_from_slice(&x);
    material.extend_from_slice(id);
    material.extend_from_slice(public_key);
    material
}
