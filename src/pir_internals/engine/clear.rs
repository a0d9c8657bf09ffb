//! Transparent engine, a "ciphertext" is the plaintext itself plus the bookkeeping a leveled scheme
//! would do. It offers no confidentiality at all and only serves testing and benchmarking of the
//! protocol plumbing, while still enforcing the same evaluation contract as a real scheme.

use super::HomomorphicEngine;
use crate::pir_internals::{branch_opt_util, error::HypercubePIRError, linalg};

const CIPHERTEXT_TAG: u8 = 0xc1;
const CIPHERTEXT_BYTE_LEN: usize = 1 + 1 + 1 + 8;

pub const DEFAULT_MAX_DEPTH: u8 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClearCiphertext {
    value: u64,
    /// Number of polynomial components, 2 when fresh or relinearized, 3 right after a ciphertext multiplication.
    size: u8,
    /// Consumed multiplicative levels.
    depth: u8,
}

impl ClearCiphertext {
    pub fn depth(&self) -> u8 {
        self.depth
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClearSecretKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClearRelinKey;

#[derive(Clone, Debug)]
pub struct ClearEngine {
    modulus: u64,
    max_depth: u8,
}

impl ClearEngine {
    pub fn new(modulus: u64) -> ClearEngine {
        Self::with_max_depth(modulus, DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(modulus: u64, max_depth: u8) -> ClearEngine {
        ClearEngine { modulus, max_depth }
    }

    fn deepen(&self, depth: u8) -> Result<u8, HypercubePIRError> {
        let next = depth.saturating_add(1);
        if branch_opt_util::unlikely(next > self.max_depth) {
            return Err(HypercubePIRError::EvaluationError(format!(
                "multiplicative depth budget of {} levels exhausted",
                self.max_depth
            )));
        }
        Ok(next)
    }
}

impl HomomorphicEngine for ClearEngine {
    type SecretKey = ClearSecretKey;
    type RelinKey = ClearRelinKey;
    type Ciphertext = ClearCiphertext;

    fn plaintext_modulus(&self) -> u64 {
        self.modulus
    }

    fn generate_keys(&self) -> Result<(ClearSecretKey, ClearRelinKey), HypercubePIRError> {
        Ok((ClearSecretKey, ClearRelinKey))
    }

    fn encrypt(&self, _: &ClearSecretKey, value: u64) -> Result<ClearCiphertext, HypercubePIRError> {
        Ok(ClearCiphertext {
            value: value % self.modulus,
            size: 2,
            depth: 0,
        })
    }

    fn decrypt(&self, _: &ClearSecretKey, ct: &ClearCiphertext) -> Result<u64, HypercubePIRError> {
        Ok(ct.value)
    }

    fn multiply_plain(&self, ct: &ClearCiphertext, value: u64) -> Result<ClearCiphertext, HypercubePIRError> {
        Ok(ClearCiphertext {
            value: linalg::mul_mod(ct.value, value % self.modulus, self.modulus),
            size: ct.size,
            depth: self.deepen(ct.depth)?,
        })
    }

    fn multiply(&self, lhs: &ClearCiphertext, rhs: &ClearCiphertext) -> Result<ClearCiphertext, HypercubePIRError> {
        if branch_opt_util::unlikely(lhs.size != 2 || rhs.size != 2) {
            return Err(HypercubePIRError::EvaluationError("operands must be relinearized before multiplication".to_string()));
        }

        Ok(ClearCiphertext {
            value: linalg::mul_mod(lhs.value, rhs.value, self.modulus),
            size: 3,
            depth: self.deepen(lhs.depth.max(rhs.depth))?,
        })
    }

    fn relinearize(&self, _: &ClearRelinKey, ct: ClearCiphertext) -> Result<ClearCiphertext, HypercubePIRError> {
        Ok(ClearCiphertext { size: 2, ..ct })
    }

    fn add(&self, lhs: &ClearCiphertext, rhs: &ClearCiphertext) -> Result<ClearCiphertext, HypercubePIRError> {
        Ok(ClearCiphertext {
            value: linalg::add_mod(lhs.value, rhs.value, self.modulus),
            size: lhs.size.max(rhs.size),
            depth: lhs.depth.max(rhs.depth),
        })
    }

    fn ciphertext_to_bytes(&self, ct: &ClearCiphertext) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(CIPHERTEXT_BYTE_LEN);
        bytes.push(CIPHERTEXT_TAG);
        bytes.push(ct.size);
        bytes.push(ct.depth);
        bytes.extend_from_slice(&ct.value.to_le_bytes());
        bytes
    }

    fn ciphertext_from_bytes(&self, bytes: &[u8]) -> Result<ClearCiphertext, HypercubePIRError> {
        if branch_opt_util::unlikely(bytes.len() != CIPHERTEXT_BYTE_LEN || bytes[0] != CIPHERTEXT_TAG) {
            return Err(HypercubePIRError::DeserializationError("malformed ciphertext".to_string()));
        }

        let size = bytes[1];
        let depth = bytes[2];
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[3..]);
        let value = u64::from_le_bytes(word);

        if branch_opt_util::unlikely(!(2..=3).contains(&size) || depth > self.max_depth || value >= self.modulus) {
            return Err(HypercubePIRError::DeserializationError("ciphertext out of range".to_string()));
        }

        Ok(ClearCiphertext { value, size, depth })
    }

    fn relin_key_to_bytes(&self, _: &ClearRelinKey) -> Vec<u8> {
        Vec::new()
    }

    fn relin_key_from_bytes(&self, bytes: &[u8]) -> Result<ClearRelinKey, HypercubePIRError> {
        if branch_opt_util::unlikely(!bytes.is_empty()) {
            return Err(HypercubePIRError::DeserializationError("malformed relinearization key".to_string()));
        }
        Ok(ClearRelinKey)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const Q: u64 = 65537;

    #[test]
    fn arithmetic_is_modular() {
        let engine = ClearEngine::new(Q);
        let (sk, rk) = engine.generate_keys().unwrap();

        let a = engine.encrypt(&sk, Q - 1).unwrap();
        let b = engine.encrypt(&sk, 2).unwrap();

        assert_eq!(engine.decrypt(&sk, &engine.add(&a, &b).unwrap()).unwrap(), 1);
        assert_eq!(engine.decrypt(&sk, &engine.multiply_plain(&a, 3).unwrap()).unwrap(), Q - 3);

        let prod = engine.relinearize(&rk, engine.multiply(&a, &b).unwrap()).unwrap();
        assert_eq!(engine.decrypt(&sk, &prod).unwrap(), Q - 2);
    }

    #[test]
    fn multiplication_requires_relinearized_operands() {
        let engine = ClearEngine::new(Q);
        let (sk, _) = engine.generate_keys().unwrap();

        let a = engine.encrypt(&sk, 5).unwrap();
        let unrelinearized = engine.multiply(&a, &a).unwrap();

        assert!(matches!(engine.multiply(&unrelinearized, &a), Err(HypercubePIRError::EvaluationError(_))));
    }

    #[test]
    fn depth_budget_is_enforced() {
        const MAX_DEPTH: u8 = 3;

        let engine = ClearEngine::with_max_depth(Q, MAX_DEPTH);
        let (sk, rk) = engine.generate_keys().unwrap();

        let mut ct = engine.encrypt(&sk, 2).unwrap();
        for _ in 0..MAX_DEPTH {
            ct = engine.relinearize(&rk, engine.multiply(&ct, &ct).unwrap()).unwrap();
        }

        assert_eq!(ct.depth(), MAX_DEPTH);
        assert!(matches!(engine.multiply_plain(&ct, 1), Err(HypercubePIRError::EvaluationError(_))));
    }

    #[test]
    fn ciphertext_bytes_are_validated() {
        let engine = ClearEngine::new(Q);
        let (sk, rk) = engine.generate_keys().unwrap();

        let ct = engine.encrypt(&sk, 1234).unwrap();
        let bytes = engine.ciphertext_to_bytes(&ct);
        assert_eq!(engine.ciphertext_from_bytes(&bytes).unwrap(), ct);

        let mut bad_tag = bytes.clone();
        bad_tag[0] ^= 1;
        assert!(matches!(engine.ciphertext_from_bytes(&bad_tag), Err(HypercubePIRError::DeserializationError(_))));

        let mut out_of_range = bytes.clone();
        out_of_range[3..].copy_from_slice(&Q.to_le_bytes());
        assert!(matches!(engine.ciphertext_from_bytes(&out_of_range), Err(HypercubePIRError::DeserializationError(_))));

        assert!(matches!(engine.ciphertext_from_bytes(&bytes[1..]), Err(HypercubePIRError::DeserializationError(_))));
        assert_eq!(engine.relin_key_from_bytes(&engine.relin_key_to_bytes(&rk)).unwrap(), rk);
    }
}
