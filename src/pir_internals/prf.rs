use super::params::PRF_KEY_BYTE_LEN;
use turboshake::TurboShake128;

const PARTITION_LABEL: &[u8] = b"hypercube-pir/partition";
const VECTOR_LABEL: &[u8] = b"hypercube-pir/rand-vector";
const BAND_LABEL: &[u8] = b"hypercube-pir/band-start";
const INDEX_LABEL: &[u8] = b"hypercube-pir/rand-index";

pub type PrfKey = [u8; PRF_KEY_BYTE_LEN];

/// Keyed TurboSHAKE128 XOF, absorbing `key || label || len(input) || input`, squeezed into `out`.
fn keyed_xof(key: &PrfKey, label: &[u8], input: &[u8], out: &mut [u8]) {
    let mut hasher = TurboShake128::default();
    hasher.absorb(key);
    hasher.absorb(label);
    hasher.absorb(&(input.len() as u64).to_le_bytes());
    hasher.absorb(input);
    hasher.finalize::<{ TurboShake128::DEFAULT_DOMAIN_SEPARATOR }>();
    hasher.squeeze(out);
}

fn keyed_u64(key: &PrfKey, label: &[u8], input: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    keyed_xof(key, label, input, &mut word);
    u64::from_le_bytes(word)
}

/// Deterministically assigns `input` to one of `b` buckets. `b` must be non-zero.
pub fn partition_hash(key: &PrfKey, input: &[u8], b: usize) -> usize {
    (keyed_u64(key, PARTITION_LABEL, input) % b as u64) as usize
}

/// Dense pseudorandom 0/1 vector of length `d`, every coordinate an independent keyed bit.
pub fn rand_vector(key: &PrfKey, input: &[u8], d: usize) -> Vec<u64> {
    let mut bits = vec![0u8; d.div_ceil(8)];
    keyed_xof(key, VECTOR_LABEL, input, &mut bits);

    (0..d).map(|i| ((bits[i / 8] >> (i % 8)) & 1) as u64).collect()
}

/// Pseudorandom 0/1 vector of length `d` whose non-zero coordinates are confined to a window of width `w`.
///
/// The window start is itself keyed on `input`. A window at least as wide as `d` degenerates to [`rand_vector`].
pub fn rand_banded_vector(key: &PrfKey, input: &[u8], d: usize, w: usize) -> Vec<u64> {
    if w >= d {
        return rand_vector(key, input, d);
    }

    let start = (keyed_u64(key, BAND_LABEL, input) % (d - w + 1) as u64) as usize;
    let band = rand_vector(key, input, w);

    let mut vector = vec![0u64; d];
    vector[start..start + w].copy_from_slice(&band);
    vector
}

/// One-hot vector of length `d`, the hot position being a keyed hash of `input` modulo `d`.
pub fn rand_index_vector(key: &PrfKey, input: &[u8], d: usize) -> Vec<u64> {
    let mut vector = vec![0u64; d];
    if d > 0 {
        let pos = (keyed_u64(key, INDEX_LABEL, input) % d as u64) as usize;
        vector[pos] = 1;
    }
    vector
}
