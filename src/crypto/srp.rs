//! SRP-6a over the 3072-bit group, with SHA-512 as the handshake hash for Pair-Setup.
//!
//! HAP's accessory never stores a persistent SRP password verifier: the setup code is held in
//! memory only for the duration of the unpaired state, and a fresh salt/verifier pair is
//! generated every time a new Pair-Setup session starts M1. That matches `srp::client`'s
//! `compute_verifier` path, which is what we reach for here instead of `srp::server` bookkeeping
//! a long-lived verifier.

use rand::RngCore;
use sha2::Sha512;
use srp::client::{srp_private_key, SrpClient};
use srp::groups::G_3072;
use srp::server::{SrpServer, SrpServerVerifier};

use crate::error::Error;

/// The literal SRP identity used for every Pair-Setup handshake.
pub const SRP_IDENTITY: &[u8] = b"Pair-Setup";

/// Server-side state for one in-flight SRP-6a exchange.
pub struct SrpSetup {
    salt: [u8; 16],
    verifier: Vec<u8>,
    b_priv: Vec<u8>,
    b_pub: Vec<u8>,
}

impl SrpSetup {
    /// Start a new exchange for `setup_code` (the human-readable `"XXX-XX-XXX"` password).
    ///
    /// Produces the salt and `B` public value that M2 carries back to the controller.
    #[must_use]
    pub fn new(setup_code: &str) -> Self {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);

        let client = SrpClient::<Sha512>::new(&G_3072);
        let private_key = srp_private_key::<Sha512>(SRP_IDENTITY, setup_code.as_bytes(), &salt);
        let verifier = client.compute_verifier(&private_key);

        let mut b_priv = vec![0u8; 64];
        rand::thread_rng().fill_bytes(&mut b_priv);

        let server = SrpServer::<Sha512>::new(&G_3072);
        let b_pub = server.compute_public_ephemeral(&b_priv, &verifier);

        Self {
            salt,
            verifier,
            b_priv,
            b_pub,
        }
    }

    /// The 16-byte salt to send in M2.
    #[must_use]
    pub fn salt(&self) -> &[u8; 16] {
        &self.salt
    }

    /// The server's public ephemeral `B` to send in M2.
    #[must_use]
    pub fn b_pub(&self) -> &[u8] {
        &self.b_pub
    }

    /// Process M3: the controller's public ephemeral `A` and proof `M1`.
    ///
    /// Returns the verified exchange, ready to produce the server's proof `M2` and the shared
    /// premaster secret used to key M5/M6.
    ///
    /// # Errors
    /// Returns [`Error::Authentication`] if `A` is malformed or `M1` does not match.
    pub fn verify_client_proof(self, a_pub: &[u8], client_proof: &[u8]) -> Result<SrpVerified, Error> {
        let server = SrpServer::<Sha512>::new(&G_3072);
        let verifier = server
            .process_reply(&self.b_priv, &self.verifier, a_pub)
            .map_err(|_| Error::Authentication)?;

        verifier.verify_client(client_proof).map_err(|_| Error::Authentication)?;

        Ok(SrpVerified { verifier })
    }
}

/// The result of a successful M3 verification: the server's own proof and the shared premaster.
pub struct SrpVerified {
    verifier: SrpServerVerifier,
}

impl SrpVerified {
    /// The server's proof `M2`, sent back in M4.
    #[must_use]
    pub fn server_proof(&self) -> &[u8] {
        self.verifier.proof()
    }

    /// The shared premaster secret, used as HKDF `ikm` for the M5/M6 session key and the
    /// controller/accessory signing salts.
    #[must_use]
    pub fn premaster_secret(&self) -> &[u8] {
        self.verifier.key()
    }
}
