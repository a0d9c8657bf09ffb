use super::{
    branch_opt_util,
    error::HypercubePIRError,
    hypercube::HypercubeStore,
    linalg,
    params::{ENCODE_MAX_ATTEMPT_COUNT, HypercubeParams, PRF_KEY_BYTE_LEN, REAL_SOLVER_MAX_ROW_LEN},
    prf::{self, PrfKey},
};
use rand::prelude::*;
use std::collections::HashMap;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Keys shared between server and client for keyword retrieval.
///
/// `partition_key` shards keywords into partitions, `row_key` derives each keyword's pseudorandom row,
/// `aux_key` is distributed alongside, but not consumed by the current encoding.
#[derive(Clone, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct KeywordKeys {
    pub partition_key: PrfKey,
    pub row_key: PrfKey,
    pub aux_key: PrfKey,
}

impl KeywordKeys {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> KeywordKeys {
        let mut keys = KeywordKeys {
            partition_key: [0u8; PRF_KEY_BYTE_LEN],
            row_key: [0u8; PRF_KEY_BYTE_LEN],
            aux_key: [0u8; PRF_KEY_BYTE_LEN],
        };

        rng.fill_bytes(&mut keys.partition_key);
        rng.fill_bytes(&mut keys.row_key);
        rng.fill_bytes(&mut keys.aux_key);

        keys
    }
}

/// Shape of the pseudorandom row a keyword is mapped to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RowStyle {
    /// Every coordinate an independent keyed bit.
    #[default]
    Dense,
    /// Keyed bits confined to a window of `width` consecutive coordinates.
    Banded { width: usize },
    /// Single keyed position set to 1.
    OneHot,
}

impl RowStyle {
    /// Pseudorandom row of length `d` for `keyword`. The client queries with exactly this row.
    pub fn row_vector(&self, row_key: &PrfKey, keyword: &[u8], d: usize) -> Vec<u64> {
        match *self {
            RowStyle::Dense => prf::rand_vector(row_key, keyword, d),
            RowStyle::Banded { width } => prf::rand_banded_vector(row_key, keyword, d, width),
            RowStyle::OneHot => prf::rand_index_vector(row_key, keyword, d),
        }
    }
}

/// How `M · x = y` is solved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SolverBackend {
    /// Exact Gauss-Jordan elimination modulo the plaintext modulus.
    #[default]
    ModP,
    /// LU decomposition over reals, the rational solution then mapped into `Z_p` through the determinant.
    ///
    /// `f64` keeps `det(M) · x` exact only for small systems, so rows are limited to
    /// `REAL_SOLVER_MAX_ROW_LEN` entries. Longer rows, i.e. a side length above that limit when encoding a
    /// database, are rejected with `InvalidParameters` before any attempt is made.
    Real,
}

/// Result of encoding one partition.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionEncoding {
    /// Solution `x` of `M · x = y`, of length `d`.
    pub vector: Vec<u64>,
    /// Row key the encoding was computed with, it differs from the requested one if resampling happened.
    pub row_key: PrfKey,
    /// `det(M) mod p`, never zero.
    pub determinant: u64,
    pub attempts: usize,
}

/// Sparse to dense encoder, mapping a set of (keyword, value) pairs onto a vector `x` such that
/// `<row(keyword), x> = value (mod p)` for every pair.
#[derive(Clone, Debug)]
pub struct KeywordEncoder {
    modulus: u64,
    style: RowStyle,
    backend: SolverBackend,
    max_attempts: usize,
}

impl KeywordEncoder {
    pub fn new(modulus: u64) -> KeywordEncoder {
        KeywordEncoder {
            modulus,
            style: RowStyle::default(),
            backend: SolverBackend::default(),
            max_attempts: ENCODE_MAX_ATTEMPT_COUNT,
        }
    }

    pub fn with_row_style(mut self, style: RowStyle) -> KeywordEncoder {
        self.style = style;
        self
    }

    pub fn with_backend(mut self, backend: SolverBackend) -> KeywordEncoder {
        self.backend = backend;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> KeywordEncoder {
        self.max_attempts = max_attempts;
        self
    }

    pub fn row_style(&self) -> RowStyle {
        self.style
    }

    /// Encodes a single partition into a dense vector of length `d`.
    ///
    /// The matrix `M` has one pseudorandom row per entry. When there are fewer entries than `d`, `M` is
    /// completed to a square matrix with unit rows on free columns. Whenever `M` turns out singular, the row
    /// key is resampled and the whole attempt repeated.
    ///
    /// # Arguments
    ///
    /// * `row_key`: Row generating key used for the first attempt.
    /// * `partition`: Distinct (keyword, value) pairs, values are reduced modulo the plaintext modulus.
    /// * `d`: Length of the encoding vector.
    /// * `rng`: Source of fresh row keys.
    ///
    /// # Returns
    ///
    /// The encoding, or `EncodingFailure` if no invertible `M` was found within the attempt budget. That's
    /// always the case when the partition has more than `d` entries. `InvalidParameters` if `d` is beyond
    /// what the selected backend solves exactly.
    pub fn generate_encode<R: RngCore + CryptoRng>(
        &self,
        row_key: &PrfKey,
        partition: &[(&[u8], u64)],
        d: usize,
        rng: &mut R,
    ) -> Result<PartitionEncoding, HypercubePIRError> {
        if branch_opt_util::unlikely(partition.is_empty()) {
            return Err(HypercubePIRError::EmptyPartition);
        }
        self.check_row_len(d)?;

        let mut current_key = *row_key;
        for attempt in 1..=self.max_attempts {
            if let Some((determinant, vector)) = self.try_encode(&current_key, partition, d) {
                return Ok(PartitionEncoding {
                    vector,
                    row_key: current_key,
                    determinant,
                    attempts: attempt,
                });
            }

            tracing::debug!(attempt, entries = partition.len(), d, "encoding matrix singular, resampling row key");
            rng.fill_bytes(&mut current_key);
        }

        Err(HypercubePIRError::EncodingFailure(self.max_attempts))
    }

    /// Encodes a whole keyword database into a fresh hypercube.
    ///
    /// Keywords are sharded into `s^(d-1)` partitions with `partition_hash`. Partition `k` owns the line of
    /// cells whose leading `d-1` coordinates spell `k` in base `s`, and its encoding fills that line along the
    /// last dimension. All partitions share one row key, so a singular partition resamples it for every partition.
    ///
    /// # Returns
    ///
    /// The encoded store and the row key the client has to use for querying.
    pub fn encode_database<R: RngCore + CryptoRng>(
        &self,
        params: HypercubeParams,
        partition_key: &PrfKey,
        row_key: &PrfKey,
        db: &HashMap<&[u8], u64>,
        rng: &mut R,
    ) -> Result<(HypercubeStore, PrfKey), HypercubePIRError> {
        if branch_opt_util::unlikely(db.is_empty()) {
            return Err(HypercubePIRError::EmptyPartition);
        }
        if branch_opt_util::unlikely(params.plaintext_modulus != self.modulus) {
            return Err(HypercubePIRError::InvalidParameters(format!(
                "encoder modulus {} differs from hypercube modulus {}",
                self.modulus, params.plaintext_modulus
            )));
        }
        self.check_row_len(params.side_length)?;

        let mut store = HypercubeStore::new(params)?;
        let s = params.side_length;
        let num_partitions = params.partition_count();

        let mut partitions = vec![Vec::<(&[u8], u64)>::new(); num_partitions];
        for (&key, &value) in db.iter() {
            partitions[prf::partition_hash(partition_key, key, num_partitions)].push((key, value));
        }
        partitions.iter_mut().for_each(|partition| partition.sort_unstable());

        let mut current_key = *row_key;
        'attempts: for attempt in 1..=self.max_attempts {
            let mut encodings = Vec::with_capacity(num_partitions);

            for partition in partitions.iter() {
                if partition.is_empty() {
                    encodings.push(None);
                    continue;
                }

                match self.try_encode(&current_key, partition, s) {
                    Some((_, vector)) => encodings.push(Some(vector)),
                    None => {
                        tracing::debug!(attempt, "partition encoding matrix singular, resampling shared row key");
                        rng.fill_bytes(&mut current_key);
                        continue 'attempts;
                    }
                }
            }

            for (part_idx, encoding) in encodings.into_iter().enumerate() {
                if let Some(vector) = encoding {
                    for (j, value) in vector.into_iter().enumerate() {
                        store.insert(part_idx * s + j, value)?;
                    }
                }
            }

            tracing::info!(entries = db.len(), partitions = num_partitions, attempts = attempt, "encoded keyword database");
            return Ok((store, current_key));
        }

        Err(HypercubePIRError::EncodingFailure(self.max_attempts))
    }

    fn check_row_len(&self, d: usize) -> Result<(), HypercubePIRError> {
        if branch_opt_util::unlikely(self.backend == SolverBackend::Real && d > REAL_SOLVER_MAX_ROW_LEN) {
            return Err(HypercubePIRError::InvalidParameters(format!(
                "real solver handles rows of at most {REAL_SOLVER_MAX_ROW_LEN} entries, got {d}"
            )));
        }
        Ok(())
    }

    /// A single attempt at building and solving `M · x = y`. `None` when `M` is singular.
    fn try_encode(&self, row_key: &PrfKey, partition: &[(&[u8], u64)], d: usize) -> Option<(u64, Vec<u64>)> {
        let p = self.modulus;

        let rows = partition.iter().map(|(key, _)| self.style.row_vector(row_key, key, d)).collect::<Vec<_>>();
        let mat = linalg::complete_to_square(&rows, d, p)?;

        let mut y = partition.iter().map(|&(_, value)| value % p).collect::<Vec<u64>>();
        y.resize(d, 0);

        match self.backend {
            SolverBackend::ModP => linalg::solve_mod_p(&mat, &y, p).filter(|(det, _)| *det != 0),
            SolverBackend::Real => Self::solve_through_reals(&mat, &y, p),
        }
    }

    /// `x = adj(M) · y / det(M)`. `det(M) · x_real` is integral, so it's rounded, reduced, and multiplied by `det(M)^-1 mod p`.
    fn solve_through_reals(mat: &[Vec<u64>], y: &[u64], p: u64) -> Option<(u64, Vec<u64>)> {
        let det = linalg::determinant_real(mat).round();
        if det == 0.0 || !det.is_finite() {
            return None;
        }

        let det_mod_p = linalg::reduce_signed(det as i128, p);
        let det_inv = linalg::inv_mod(det_mod_p, p)?;

        let x_real = linalg::solve_real(mat, y)?;
        let x = x_real
            .iter()
            .map(|&xi| linalg::mul_mod(linalg::reduce_signed((xi * det).round() as i128, p), det_inv, p))
            .collect::<Vec<u64>>();

        // Rounding may be off for large or badly conditioned systems
        (linalg::mat_vec_mod(mat, &x, p) == y).then_some((det_mod_p, x))
    }
}
