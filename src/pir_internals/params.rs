use super::{branch_opt_util, error::HypercubePIRError};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const BIT_SECURITY_LEVEL: usize = 128;
pub const PRF_KEY_BYTE_LEN: usize = (2 * BIT_SECURITY_LEVEL) / 8;
pub const SESSION_KEY_BYTE_LEN: usize = BIT_SECURITY_LEVEL / 8;
pub const MAC_KEY_BYTE_LEN: usize = (2 * BIT_SECURITY_LEVEL) / 8;
pub const IV_BYTE_LEN: usize = 16;
pub const MAC_BYTE_LEN: usize = 32;
pub const DH_PUBLIC_VALUE_BYTE_LEN: usize = 32;

pub const ENCODE_MAX_ATTEMPT_COUNT: usize = 100;
pub const REAL_SOLVER_MAX_ROW_LEN: usize = 16;
pub const DEFAULT_PLAINTEXT_MODULUS: u64 = 65537;
pub const MAX_HYPERCUBE_CELL_COUNT: usize = 1 << 24;

pub const MAX_WIRE_FRAME_BYTE_LEN: usize = 1 << 30;
pub const DEFAULT_MAX_CONCURRENT_CONNECTIONS: usize = 64;

/// Shape of the hypercube, shared by both client and server.
///
/// A database of `side_length^dimension` cells, each holding an integer modulo `plaintext_modulus`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HypercubeParams {
    pub dimension: usize,
    pub side_length: usize,
    pub plaintext_modulus: u64,
}

impl HypercubeParams {
    /// Validates and creates a parameter set.
    ///
    /// # Arguments
    ///
    /// * `dimension`: Number of dimensions `d`, must be at least 1.
    /// * `side_length`: Side length `s` of each dimension, must be at least 1.
    /// * `plaintext_modulus`: Modulus `q` of every stored value, must be at least 2.
    ///
    /// # Returns
    ///
    /// The parameter set, or `InvalidParameters` if `s^d` overflows or exceeds `MAX_HYPERCUBE_CELL_COUNT`.
    pub fn new(dimension: usize, side_length: usize, plaintext_modulus: u64) -> Result<HypercubeParams, HypercubePIRError> {
        let params = HypercubeParams {
            dimension,
            side_length,
            plaintext_modulus,
        };
        params.validate()?;

        Ok(params)
    }

    pub fn validate(&self) -> Result<(), HypercubePIRError> {
        if branch_opt_util::unlikely(self.dimension == 0) {
            return Err(HypercubePIRError::InvalidParameters("dimension must be non-zero".to_string()));
        }
        if branch_opt_util::unlikely(self.side_length == 0) {
            return Err(HypercubePIRError::InvalidParameters("side length must be non-zero".to_string()));
        }
        if branch_opt_util::unlikely(self.plaintext_modulus < 2) {
            return Err(HypercubePIRError::InvalidParameters("plaintext modulus must be at least 2".to_string()));
        }

        match self.checked_cell_count() {
            Some(count) if count <= MAX_HYPERCUBE_CELL_COUNT => Ok(()),
            _ => Err(HypercubePIRError::InvalidParameters(format!(
                "hypercube can have at max {} cells",
                MAX_HYPERCUBE_CELL_COUNT
            ))),
        }
    }

    /// Reads a JSON encoded parameter set from disk, validating it.
    pub fn from_json_file(path: &Path) -> Result<HypercubeParams, HypercubePIRError> {
        let raw = std::fs::read_to_string(path).map_err(|e| HypercubePIRError::InvalidParameters(e.to_string()))?;
        let params: HypercubeParams = serde_json::from_str(&raw).map_err(|e| HypercubePIRError::InvalidParameters(e.to_string()))?;
        params.validate()?;

        Ok(params)
    }

    /// Number of cells `s^d`. Only meaningful on validated parameters.
    pub fn cell_count(&self) -> usize {
        self.side_length.pow(self.dimension as u32)
    }

    /// Length `d·s` of a selection vector.
    pub fn selection_len(&self) -> usize {
        self.dimension * self.side_length
    }

    /// Number of keyword partitions `s^(d-1)`, each one occupies a single line along the last dimension.
    pub fn partition_count(&self) -> usize {
        self.side_length.pow((self.dimension - 1) as u32)
    }

    /// Mixed radix decomposition of `idx`, base `s`, most significant dimension first.
    pub fn index_to_coords(&self, idx: usize) -> Result<Vec<usize>, HypercubePIRError> {
        let bound = self.cell_count();
        if branch_opt_util::unlikely(idx >= bound) {
            return Err(HypercubePIRError::OutOfBounds { value: idx, bound });
        }

        let s = self.side_length;
        let mut coords = vec![0usize; self.dimension];
        let mut rem = idx;
        for coord in coords.iter_mut().rev() {
            *coord = rem % s;
            rem /= s;
        }

        Ok(coords)
    }

    pub fn coords_to_index(&self, coords: &[usize]) -> Result<usize, HypercubePIRError> {
        let s = self.side_length;

        if branch_opt_util::unlikely(coords.len() != self.dimension) {
            return Err(HypercubePIRError::InvalidCoordinateCount {
                expected: self.dimension,
                found: coords.len(),
            });
        }

        coords.iter().try_fold(0usize, |acc, &c| {
            if branch_opt_util::unlikely(c >= s) {
                return Err(HypercubePIRError::OutOfBounds { value: c, bound: s });
            }
            Ok(acc * s + c)
        })
    }

    fn checked_cell_count(&self) -> Option<usize> {
        let exp = u32::try_from(self.dimension).ok()?;
        self.side_length.checked_pow(exp)
    }
}

/// Selects what the server distributes during handshake and how queries are built.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrievalMode {
    Index,
    Keyword,
}

#[cfg(test)]
mod test {
    use super::*;
    use test_case::test_case;

    #[test_case(2, 3, 65537 => matches Ok(_); "Small two dimensional cube is valid")]
    #[test_case(1, 1, 2 => matches Ok(_); "Single cell cube is valid")]
    #[test_case(0, 3, 65537 => matches Err(HypercubePIRError::InvalidParameters(_)); "Dimension must be non-zero")]
    #[test_case(2, 0, 65537 => matches Err(HypercubePIRError::InvalidParameters(_)); "Side length must be non-zero")]
    #[test_case(2, 3, 1 => matches Err(HypercubePIRError::InvalidParameters(_)); "Plaintext modulus must be at least two")]
    #[test_case(64, 2, 65537 => matches Err(HypercubePIRError::InvalidParameters(_)); "Cell count must fit the configured maximum")]
    #[test_case(usize::MAX, 3, 65537 => matches Err(HypercubePIRError::InvalidParameters(_)); "Cell count must not overflow")]
    fn hypercube_params_validation(d: usize, s: usize, q: u64) -> Result<HypercubeParams, HypercubePIRError> {
        HypercubeParams::new(d, s, q)
    }

    #[test]
    fn derived_sizes_match_shape() {
        let params = HypercubeParams::new(3, 4, 17).unwrap();

        assert_eq!(params.cell_count(), 64);
        assert_eq!(params.selection_len(), 12);
        assert_eq!(params.partition_count(), 16);
    }

    #[test]
    fn params_round_trip_through_json() {
        let params = HypercubeParams::new(2, 5, 65537).unwrap();
        let json = serde_json::to_string(&params).unwrap();

        assert_eq!(serde_json::from_str::<HypercubeParams>(&json).unwrap(), params);
    }
}
