//! BFV engine, backed by the `fhe` crate. Values are encoded as the constant coefficient of a polynomial plaintext.

use super::HomomorphicEngine;
use crate::pir_internals::error::HypercubePIRError;
use fhe::bfv::{BfvParameters, BfvParametersBuilder, Ciphertext, Encoding, Plaintext, RelinearizationKey, SecretKey};
use fhe_traits::{DeserializeParametrized, FheDecoder, FheDecrypter, FheEncoder, FheEncrypter, Serialize};
use std::sync::Arc;

pub const DEFAULT_POLY_MODULUS_DEGREE: usize = 8192;
const MODULUS_BIT_LEN: usize = 60;

pub struct BfvEngine {
    params: Arc<BfvParameters>,
    plaintext_modulus: u64,
}

fn eval_err(e: fhe::Error) -> HypercubePIRError {
    HypercubePIRError::EvaluationError(e.to_string())
}

fn de_err(e: fhe::Error) -> HypercubePIRError {
    HypercubePIRError::DeserializationError(e.to_string())
}

impl BfvEngine {
    pub fn new(plaintext_modulus: u64, degree: usize, moduli_sizes: &[usize]) -> Result<BfvEngine, HypercubePIRError> {
        let params = BfvParametersBuilder::new()
            .set_degree(degree)
            .set_plaintext_modulus(plaintext_modulus)
            .set_moduli_sizes(moduli_sizes)
            .build_arc()
            .map_err(|e| HypercubePIRError::InvalidParameters(e.to_string()))?;

        Ok(BfvEngine { params, plaintext_modulus })
    }

    /// Parameters with enough ciphertext moduli for folding a hypercube of `dimension` dimensions.
    pub fn for_dimension(plaintext_modulus: u64, dimension: usize) -> Result<BfvEngine, HypercubePIRError> {
        let moduli_sizes = vec![MODULUS_BIT_LEN; dimension + 2];
        Self::new(plaintext_modulus, DEFAULT_POLY_MODULUS_DEGREE, &moduli_sizes)
    }

    fn encode(&self, value: u64) -> Result<Plaintext, HypercubePIRError> {
        Plaintext::try_encode(&[value % self.plaintext_modulus], Encoding::poly(), &self.params).map_err(eval_err)
    }
}

impl HomomorphicEngine for BfvEngine {
    type SecretKey = SecretKey;
    type RelinKey = RelinearizationKey;
    type Ciphertext = Ciphertext;

    fn plaintext_modulus(&self) -> u64 {
        self.plaintext_modulus
    }

    fn generate_keys(&self) -> Result<(SecretKey, RelinearizationKey), HypercubePIRError> {
        let mut rng = rand::rng();

        let sk = SecretKey::random(&self.params, &mut rng);
        let rk = RelinearizationKey::new(&sk, &mut rng).map_err(eval_err)?;

        Ok((sk, rk))
    }

    fn encrypt(&self, sk: &SecretKey, value: u64) -> Result<Ciphertext, HypercubePIRError> {
        let pt = self.encode(value)?;
        sk.try_encrypt(&pt, &mut rand::rng()).map_err(eval_err)
    }

    fn decrypt(&self, sk: &SecretKey, ct: &Ciphertext) -> Result<u64, HypercubePIRError> {
        let pt = sk.try_decrypt(ct).map_err(eval_err)?;
        let coeffs = Vec::<u64>::try_decode(&pt, Encoding::poly()).map_err(eval_err)?;

        coeffs
            .first()
            .copied()
            .ok_or_else(|| HypercubePIRError::EvaluationError("decrypted plaintext has no coefficients".to_string()))
    }

    fn multiply_plain(&self, ct: &Ciphertext, value: u64) -> Result<Ciphertext, HypercubePIRError> {
        let pt = self.encode(value)?;
        Ok(ct * &pt)
    }

    fn multiply(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<Ciphertext, HypercubePIRError> {
        Ok(lhs * rhs)
    }

    fn relinearize(&self, rk: &RelinearizationKey, mut ct: Ciphertext) -> Result<Ciphertext, HypercubePIRError> {
        rk.relinearizes(&mut ct).map_err(eval_err)?;
        Ok(ct)
    }

    fn add(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<Ciphertext, HypercubePIRError> {
        Ok(lhs + rhs)
    }

    fn ciphertext_to_bytes(&self, ct: &Ciphertext) -> Vec<u8> {
        ct.to_bytes()
    }

    fn ciphertext_from_bytes(&self, bytes: &[u8]) -> Result<Ciphertext, HypercubePIRError> {
        Ciphertext::from_bytes(bytes, &self.params).map_err(de_err)
    }

    fn relin_key_to_bytes(&self, rk: &RelinearizationKey) -> Vec<u8> {
        rk.to_bytes()
    }

    fn relin_key_from_bytes(&self, bytes: &[u8]) -> Result<RelinearizationKey, HypercubePIRError> {
        RelinearizationKey::from_bytes(bytes, &self.params).map_err(de_err)
    }
}
