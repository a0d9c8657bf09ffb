use super::{
    branch_opt_util,
    error::HypercubePIRError,
    messages::HMACTaggedEnvelope,
    params::{DH_PUBLIC_VALUE_BYTE_LEN, IV_BYTE_LEN, MAC_BYTE_LEN, MAC_KEY_BYTE_LEN, SESSION_KEY_BYTE_LEN},
};
use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use curve25519_dalek::{constants::RISTRETTO_BASEPOINT_TABLE, ristretto::CompressedRistretto, scalar::Scalar};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::prelude::*;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type HmacSha256 = Hmac<Sha256>;

const KDF_INFO: &[u8] = b"hypercube-pir/session-keys/v1";

/// Ephemeral Diffie-Hellman keypair over ristretto255.
pub struct DhKeypair {
    secret: Scalar,
    public: [u8; DH_PUBLIC_VALUE_BYTE_LEN],
}

impl DhKeypair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> DhKeypair {
        let mut wide = [0u8; 64];
        rng.fill_bytes(&mut wide);

        let secret = Scalar::from_bytes_mod_order_wide(&wide);
        wide.zeroize();

        let public = (&secret * RISTRETTO_BASEPOINT_TABLE).compress().to_bytes();
        DhKeypair { secret, public }
    }

    pub fn public_value(&self) -> &[u8; DH_PUBLIC_VALUE_BYTE_LEN] {
        &self.public
    }

    /// Computes the shared secret with a peer's compressed public value, rejecting non canonical
    /// encodings and the identity element.
    pub fn shared_secret(&self, peer_public_value: &[u8]) -> Result<[u8; DH_PUBLIC_VALUE_BYTE_LEN], HypercubePIRError> {
        let peer = CompressedRistretto::from_slice(peer_public_value)
            .map_err(|_| HypercubePIRError::InvalidPublicValue)?
            .decompress()
            .ok_or(HypercubePIRError::InvalidPublicValue)?;

        let shared = (self.secret * peer).compress().to_bytes();
        if branch_opt_util::unlikely(shared.iter().all(|&b| b == 0)) {
            return Err(HypercubePIRError::InvalidPublicValue);
        }

        Ok(shared)
    }
}

impl Drop for DhKeypair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Symmetric keys of one connection, wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    enc_key: [u8; SESSION_KEY_BYTE_LEN],
    mac_key: [u8; MAC_KEY_BYTE_LEN],
}

impl SessionKeys {
    /// HKDF-SHA256 over the Diffie-Hellman shared secret, split into an AES-128 key and an HMAC key.
    pub fn derive(shared_secret: &[u8]) -> Result<SessionKeys, HypercubePIRError> {
        let hk = Hkdf::<Sha256>::new(None, shared_secret);

        let mut okm = [0u8; SESSION_KEY_BYTE_LEN + MAC_KEY_BYTE_LEN];
        hk.expand(KDF_INFO, &mut okm).map_err(|_| HypercubePIRError::KeyDerivationFailure)?;

        let mut keys = SessionKeys {
            enc_key: [0u8; SESSION_KEY_BYTE_LEN],
            mac_key: [0u8; MAC_KEY_BYTE_LEN],
        };
        keys.enc_key.copy_from_slice(&okm[..SESSION_KEY_BYTE_LEN]);
        keys.mac_key.copy_from_slice(&okm[SESSION_KEY_BYTE_LEN..]);
        okm.zeroize();

        Ok(keys)
    }

    fn mac(&self) -> Result<HmacSha256, HypercubePIRError> {
        HmacSha256::new_from_slice(&self.mac_key).map_err(|_| HypercubePIRError::KeyDerivationFailure)
    }

    fn apply_keystream(&self, iv: &[u8], buf: &mut [u8]) -> Result<(), HypercubePIRError> {
        let mut cipher = Aes128Ctr::new_from_slices(&self.enc_key, iv).map_err(|_| HypercubePIRError::AuthenticationFailure)?;
        cipher.apply_keystream(buf);
        Ok(())
    }

    /// AES-128-CTR under a fresh random IV, then HMAC-SHA256 over `iv || ciphertext`.
    pub fn authenticated_encrypt<R: RngCore + CryptoRng>(&self, plaintext: &[u8], rng: &mut R) -> Result<HMACTaggedEnvelope, HypercubePIRError> {
        let mut iv = vec![0u8; IV_BYTE_LEN];
        rng.fill_bytes(&mut iv);

        let mut payload = plaintext.to_vec();
        self.apply_keystream(&iv, &mut payload)?;

        let mut mac = self.mac()?;
        mac.update(&iv);
        mac.update(&payload);

        Ok(HMACTaggedEnvelope {
            payload,
            iv,
            mac: mac.finalize().into_bytes().to_vec(),
        })
    }

    /// Verifies the tag in constant time, decrypting only once it's known good.
    pub fn verify_and_decrypt(&self, envelope: &HMACTaggedEnvelope) -> Result<Vec<u8>, HypercubePIRError> {
        if branch_opt_util::unlikely(envelope.iv.len() != IV_BYTE_LEN || envelope.mac.len() != MAC_BYTE_LEN) {
            return Err(HypercubePIRError::AuthenticationFailure);
        }

        let mut mac = self.mac()?;
        mac.update(&envelope.iv);
        mac.update(&envelope.payload);
        mac.verify_slice(&envelope.mac).map_err(|_| HypercubePIRError::AuthenticationFailure)?;

        let mut plaintext = envelope.payload.clone();
        self.apply_keystream(&envelope.iv, &mut plaintext)?;

        Ok(plaintext)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pir_internals::messages::WireMessage;
    use rand_chacha::ChaCha8Rng;

    fn session_pair(rng: &mut ChaCha8Rng) -> (SessionKeys, SessionKeys) {
        let alice = DhKeypair::generate(rng);
        let bob = DhKeypair::generate(rng);

        let alice_secret = alice.shared_secret(bob.public_value()).unwrap();
        let bob_secret = bob.shared_secret(alice.public_value()).unwrap();
        assert_eq!(alice_secret, bob_secret);

        (SessionKeys::derive(&alice_secret).unwrap(), SessionKeys::derive(&bob_secret).unwrap())
    }

    #[test]
    fn honest_peers_agree_on_keys() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let (alice, bob) = session_pair(&mut rng);

        assert!(alice == bob);
    }

    #[test]
    fn sealed_message_opens_with_peer_keys() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let (alice, bob) = session_pair(&mut rng);

        for len in [0usize, 1, 15, 16, 17, 5000] {
            let mut plaintext = vec![0u8; len];
            rng.fill_bytes(&mut plaintext);

            let envelope = alice.authenticated_encrypt(&plaintext, &mut rng).unwrap();
            if len >= 16 {
                assert_ne!(envelope.payload, plaintext);
            }
            assert_eq!(bob.verify_and_decrypt(&envelope).unwrap(), plaintext);
        }
    }

    #[test]
    fn flipping_any_byte_fails_authentication() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let (alice, bob) = session_pair(&mut rng);

        let envelope = alice.authenticated_encrypt(b"hypercube private information retrieval", &mut rng).unwrap();

        for i in 0..envelope.payload.len() {
            let mut tampered = envelope.clone();
            tampered.payload[i] ^= 0x01;
            assert_eq!(bob.verify_and_decrypt(&tampered), Err(HypercubePIRError::AuthenticationFailure));
        }
        for i in 0..envelope.iv.len() {
            let mut tampered = envelope.clone();
            tampered.iv[i] ^= 0x80;
            assert_eq!(bob.verify_and_decrypt(&tampered), Err(HypercubePIRError::AuthenticationFailure));
        }
        for i in 0..envelope.mac.len() {
            let mut tampered = envelope.clone();
            tampered.mac[i] ^= 0xff;
            assert_eq!(bob.verify_and_decrypt(&tampered), Err(HypercubePIRError::AuthenticationFailure));
        }

        // Tampering with the encoded envelope either breaks decoding or authentication, never yields data
        let bytes = envelope.to_bytes();
        for i in 1..bytes.len() {
            let mut tampered = bytes.clone();
            tampered[i] ^= 0x01;
            if let Ok(decoded) = HMACTaggedEnvelope::from_bytes(&tampered) {
                assert!(bob.verify_and_decrypt(&decoded).is_err());
            }
        }
    }

    #[test]
    fn third_party_keys_fail_authentication() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let (alice, _) = session_pair(&mut rng);
        let (mallory, _) = session_pair(&mut rng);

        let envelope = alice.authenticated_encrypt(b"secret", &mut rng).unwrap();
        assert_eq!(mallory.verify_and_decrypt(&envelope), Err(HypercubePIRError::AuthenticationFailure));
    }

    #[test]
    fn invalid_public_values_are_rejected() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let keypair = DhKeypair::generate(&mut rng);

        assert!(matches!(keypair.shared_secret(&[0u8; 31]), Err(HypercubePIRError::InvalidPublicValue)));
        assert!(matches!(keypair.shared_secret(&[0u8; 32]), Err(HypercubePIRError::InvalidPublicValue)));
        assert!(matches!(keypair.shared_secret(&[0xffu8; 32]), Err(HypercubePIRError::InvalidPublicValue)));
    }
}
