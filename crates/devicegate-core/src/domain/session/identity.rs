//! Device identity credential bundle
//!
//! The bundle a protocol client authenticates with. A fresh bundle has no
//! network address; the address is assigned by the network once pairing
//! succeeds, and from then on it doubles as the session's identity reference.

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of every generated key in bytes
pub const KEY_LEN: usize = 32;

/// Platform string reported to the network for linked devices
pub const DEFAULT_PLATFORM: &str = "devicegate";

/// Credential bundle proving a session's presence on the network
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct DeviceIdentity {
    /// Network address assigned at pairing (None before first pairing)
    #[zeroize(skip)]
    pub address: Option<String>,

    /// Registration id announced during the handshake
    #[zeroize(skip)]
    pub registration_id: u32,

    /// Static noise key used for the transport handshake
    pub noise_key: Vec<u8>,

    /// Seed of the ed25519 identity signing key
    pub identity_key: Vec<u8>,

    /// Secret used to verify the device advertisement during pairing
    pub adv_secret: Vec<u8>,

    /// Platform label
    #[zeroize(skip)]
    pub platform: String,

    /// Display name pushed by the paired account, if any
    #[zeroize(skip)]
    pub push_name: Option<String>,

    /// When the bundle was generated
    #[zeroize(skip)]
    pub created_at: DateTime<Utc>,
}

impl DeviceIdentity {
    /// Generate a fresh, unauthenticated bundle
    pub fn fresh() -> Self {
        let mut rng = rand::thread_rng();
        let mut noise_key = vec![0u8; KEY_LEN];
        let mut identity_key = vec![0u8; KEY_LEN];
        let mut adv_secret = vec![0u8; KEY_LEN];
        rng.fill_bytes(&mut noise_key);
        rng.fill_bytes(&mut identity_key);
        rng.fill_bytes(&mut adv_secret);

        Self {
            address: None,
            // Registration ids are 14-bit on the wire
            registration_id: (rng.next_u32() & 0x3fff).max(1),
            noise_key,
            identity_key,
            adv_secret,
            platform: DEFAULT_PLATFORM.to_string(),
            push_name: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the bundle has been paired with an account
    pub fn is_paired(&self) -> bool {
        self.address.is_some()
    }

    /// Public half of the identity key
    pub fn identity_public_key(&self) -> [u8; KEY_LEN] {
        let mut seed = [0u8; KEY_LEN];
        let len = self.identity_key.len().min(KEY_LEN);
        seed[..len].copy_from_slice(&self.identity_key[..len]);
        let signing = SigningKey::from_bytes(&seed);
        seed.zeroize();
        signing.verifying_key().to_bytes()
    }

    /// Short, log-safe fingerprint of the public identity key
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.identity_public_key());
        hex::encode(&digest[..8])
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("address", &self.address)
            .field("registration_id", &self.registration_id)
            .field("fingerprint", &self.fingerprint())
            .field("platform", &self.platform)
            .field("push_name", &self.push_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_identity_is_unpaired() {
        let identity = DeviceIdentity::fresh();
        assert!(!identity.is_paired());
        assert_eq!(identity.noise_key.len(), KEY_LEN);
        assert_eq!(identity.identity_key.len(), KEY_LEN);
        assert!(identity.registration_id > 0 && identity.registration_id <= 0x3fff);
    }

    #[test]
    fn test_fresh_identities_differ() {
        let a = DeviceIdentity::fresh();
        let b = DeviceIdentity::fresh();
        assert_ne!(a.identity_key, b.identity_key);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let identity = DeviceIdentity::fresh();
        assert_eq!(identity.fingerprint(), identity.clone().fingerprint());
        assert_eq!(identity.fingerprint().len(), 16);
    }

    #[test]
    fn test_debug_hides_key_material() {
        let identity = DeviceIdentity::fresh();
        let rendered = format!("{:?}", identity);
        assert!(!rendered.contains("noise_key"));
        assert!(rendered.contains("fingerprint"));
    }
}
