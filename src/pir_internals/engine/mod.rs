use super::error::HypercubePIRError;

pub mod clear;

#[cfg(feature = "bfv")]
pub mod bfv;

/// Homomorphic encryption capabilities consumed by query building and cube folding.
///
/// Every value is an integer modulo [`HomomorphicEngine::plaintext_modulus`]. Arithmetic failures
/// are reported as `EvaluationError`, malformed blobs as `DeserializationError`.
pub trait HomomorphicEngine: Send + Sync {
    type SecretKey: Send + Sync;
    type RelinKey: Send + Sync;
    type Ciphertext: Clone + Send + Sync;

    fn plaintext_modulus(&self) -> u64;

    fn generate_keys(&self) -> Result<(Self::SecretKey, Self::RelinKey), HypercubePIRError>;

    fn encrypt(&self, sk: &Self::SecretKey, value: u64) -> Result<Self::Ciphertext, HypercubePIRError>;
    fn decrypt(&self, sk: &Self::SecretKey, ct: &Self::Ciphertext) -> Result<u64, HypercubePIRError>;

    fn multiply_plain(&self, ct: &Self::Ciphertext, value: u64) -> Result<Self::Ciphertext, HypercubePIRError>;
    fn multiply(&self, lhs: &Self::Ciphertext, rhs: &Self::Ciphertext) -> Result<Self::Ciphertext, HypercubePIRError>;
    fn relinearize(&self, rk: &Self::RelinKey, ct: Self::Ciphertext) -> Result<Self::Ciphertext, HypercubePIRError>;
    fn add(&self, lhs: &Self::Ciphertext, rhs: &Self::Ciphertext) -> Result<Self::Ciphertext, HypercubePIRError>;

    fn ciphertext_to_bytes(&self, ct: &Self::Ciphertext) -> Vec<u8>;
    fn ciphertext_from_bytes(&self, bytes: &[u8]) -> Result<Self::Ciphertext, HypercubePIRError>;
    fn relin_key_to_bytes(&self, rk: &Self::RelinKey) -> Vec<u8>;
    fn relin_key_from_bytes(&self, bytes: &[u8]) -> Result<Self::RelinKey, HypercubePIRError>;
}
