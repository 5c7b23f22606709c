//! X25519 key agreement for the login envelope

use core::fmt;
use rand_core::{CryptoRng, OsRng, RngCore};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

/// Length of the TEA key derived from a shared secret
pub const SHARE_KEY_SIZE: usize = 16;

/// Local key pair used to agree a share key with the server
#[derive(Clone)]
pub struct EcdhKeyPair {
    secret: StaticSecret,
    public: [u8; 32],
}

impl fmt::Debug for EcdhKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcdhKeyPair")
            .field("public", &hex::encode(self.public))
            .finish()
    }
}

impl EcdhKeyPair {
    pub fn generate() -> Self {
        Self::from_rng(&mut OsRng)
    }

    pub fn from_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = StaticSecret::random_from_rng(rng);
        let public = PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    /// TEA key agreed with the holder of `peer_public`
    pub fn share_key(&self, peer_public: &[u8; 32]) -> [u8; SHARE_KEY_SIZE] {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));
        let digest = Sha256::digest(shared.as_bytes());
        let mut key = [0u8; SHARE_KEY_SIZE];
        key.copy_from_slice(&digest[..SHARE_KEY_SIZE]);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_both_sides_agree() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let client = EcdhKeyPair::from_rng(&mut rng);
        let server = EcdhKeyPair::from_rng(&mut rng);

        assert_eq!(
            client.share_key(server.public_key()),
            server.share_key(client.public_key())
        );
    }

    #[test]
    fn test_different_peers_give_different_keys() {
        let client = EcdhKeyPair::generate();
        let first = EcdhKeyPair::generate();
        let second = EcdhKeyPair::generate();
        assert_ne!(
            client.share_key(first.public_key()),
            client.share_key(second.public_key())
        );
    }
}
