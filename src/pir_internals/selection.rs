use super::{
    engine::HomomorphicEngine,
    error::HypercubePIRError,
    keyword::{KeywordKeys, RowStyle},
    params::HypercubeParams,
    prf,
};
use rayon::prelude::*;

/// Maps a retrieval target onto the `d·s` plaintext selection weights understood by the cube fold.
pub trait RetrievalStrategy {
    type Target: ?Sized;

    fn build_weights(&self, params: &HypercubeParams, target: &Self::Target) -> Result<Vec<u64>, HypercubePIRError>;
}

/// Retrieval by linear index, block `i` is one-hot at the `i`-th coordinate of the index.
#[derive(Clone, Copy, Debug, Default)]
pub struct IndexStrategy;

impl RetrievalStrategy for IndexStrategy {
    type Target = usize;

    fn build_weights(&self, params: &HypercubeParams, target: &usize) -> Result<Vec<u64>, HypercubePIRError> {
        params.validate()?;

        let coords = params.index_to_coords(*target)?;
        Ok(one_hot_blocks(params, &coords))
    }
}

/// Retrieval by keyword. The leading `d-1` blocks are one-hot at the keyword's partition coordinates,
/// the last block is the keyword's pseudorandom row.
pub struct KeywordStrategy {
    keys: KeywordKeys,
    style: RowStyle,
}

impl KeywordStrategy {
    pub fn new(keys: KeywordKeys, style: RowStyle) -> KeywordStrategy {
        KeywordStrategy { keys, style }
    }

    pub fn keys(&self) -> &KeywordKeys {
        &self.keys
    }
}

impl RetrievalStrategy for KeywordStrategy {
    type Target = [u8];

    fn build_weights(&self, params: &HypercubeParams, keyword: &[u8]) -> Result<Vec<u64>, HypercubePIRError> {
        // Fields are public, so a hand-built parameter set may still carry a zero dimension
        params.validate()?;

        let s = params.side_length;
        let d = params.dimension;

        let partition = prf::partition_hash(&self.keys.partition_key, keyword, params.partition_count());
        let line_coords = params.index_to_coords(partition * s)?;

        let mut weights = one_hot_blocks(params, &line_coords[..d - 1]);
        weights.extend(self.style.row_vector(&self.keys.row_key, keyword, s));

        Ok(weights)
    }
}

fn one_hot_blocks(params: &HypercubeParams, coords: &[usize]) -> Vec<u64> {
    let s = params.side_length;

    let mut weights = vec![0u64; coords.len() * s];
    for (i, &c) in coords.iter().enumerate() {
        weights[s * i + c] = 1;
    }
    weights
}

/// Client side construction of encrypted selection weights.
pub struct SelectionBuilder<'a, E: HomomorphicEngine> {
    engine: &'a E,
    params: HypercubeParams,
}

impl<'a, E: HomomorphicEngine> SelectionBuilder<'a, E> {
    pub fn new(engine: &'a E, params: HypercubeParams) -> SelectionBuilder<'a, E> {
        SelectionBuilder { engine, params }
    }

    /// Builds and independently encrypts every selection weight for `target`.
    ///
    /// Fails with `InvalidParameters` if the builder's parameter set doesn't validate.
    pub fn build<S: RetrievalStrategy + ?Sized>(&self, sk: &E::SecretKey, strategy: &S, target: &S::Target) -> Result<Vec<E::Ciphertext>, HypercubePIRError> {
        let weights = strategy.build_weights(&self.params, target)?;
        weights.par_iter().map(|&w| self.engine.encrypt(sk, w)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pir_internals::{engine::clear::ClearEngine, params::PRF_KEY_BYTE_LEN};
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use test_case::test_case;

    const Q: u64 = 65537;

    #[test_case(2, 3, 5 => vec![0, 1, 0, 0, 0, 1]; "Index five of a three by three cube")]
    #[test_case(1, 4, 2 => vec![0, 0, 1, 0]; "One dimensional cube")]
    #[test_case(3, 2, 6 => vec![0, 1, 0, 1, 1, 0]; "Three dimensional binary cube")]
    fn index_weights_are_one_hot_per_block(d: usize, s: usize, idx: usize) -> Vec<u64> {
        IndexStrategy.build_weights(&HypercubeParams::new(d, s, Q).unwrap(), &idx).unwrap()
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let params = HypercubeParams::new(2, 3, Q).unwrap();
        assert_eq!(IndexStrategy.build_weights(&params, &9), Err(HypercubePIRError::OutOfBounds { value: 9, bound: 9 }));
    }

    #[test]
    fn keyword_weights_select_partition_line_and_row() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let params = HypercubeParams::new(3, 4, Q).unwrap();
        let keys = KeywordKeys::random(&mut rng);
        let strategy = KeywordStrategy::new(keys.clone(), RowStyle::Dense);

        for i in 0..50u32 {
            let keyword = format!("keyword-{i}").into_bytes();
            let weights = strategy.build_weights(&params, &keyword).unwrap();
            assert_eq!(weights.len(), params.selection_len());

            let partition = prf::partition_hash(&keys.partition_key, &keyword, params.partition_count());
            let (prefix, row) = weights.split_at(2 * 4);

            assert_eq!(prefix[..4].iter().sum::<u64>(), 1);
            assert_eq!(prefix[4..].iter().sum::<u64>(), 1);

            let hot_0 = prefix[..4].iter().position(|&w| w == 1).unwrap();
            let hot_1 = prefix[4..].iter().position(|&w| w == 1).unwrap();
            assert_eq!(hot_0 * 4 + hot_1, partition);

            assert_eq!(row, RowStyle::Dense.row_vector(&keys.row_key, &keyword, 4).as_slice());
        }
    }

    #[test_case(0, 3; "zero dimension")]
    #[test_case(2, 0; "zero side length")]
    fn unvalidated_params_are_rejected(d: usize, s: usize) {
        let params = HypercubeParams {
            dimension: d,
            side_length: s,
            plaintext_modulus: Q,
        };
        let strategy = KeywordStrategy::new(KeywordKeys::random(&mut ChaCha8Rng::from_os_rng()), RowStyle::Dense);

        assert!(matches!(IndexStrategy.build_weights(&params, &0), Err(HypercubePIRError::InvalidParameters(_))));
        assert!(matches!(strategy.build_weights(&params, b"apple"), Err(HypercubePIRError::InvalidParameters(_))));

        let engine = ClearEngine::new(Q);
        let (sk, _) = engine.generate_keys().unwrap();
        assert!(matches!(
            SelectionBuilder::new(&engine, params).build(&sk, &strategy, b"apple".as_slice()),
            Err(HypercubePIRError::InvalidParameters(_))
        ));
    }

    #[test]
    fn builder_encrypts_every_weight() {
        let engine = ClearEngine::new(Q);
        let (sk, _) = engine.generate_keys().unwrap();
        let params = HypercubeParams::new(2, 3, Q).unwrap();

        let selection = SelectionBuilder::new(&engine, params).build(&sk, &IndexStrategy, &5).unwrap();
        let decrypted = selection.iter().map(|ct| engine.decrypt(&sk, ct).unwrap()).collect::<Vec<_>>();

        assert_eq!(decrypted, vec![0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn one_dimensional_keyword_weights_are_the_row() {
        let params = HypercubeParams::new(1, 16, Q).unwrap();
        let keys = KeywordKeys {
            partition_key: [1u8; PRF_KEY_BYTE_LEN],
            row_key: [2u8; PRF_KEY_BYTE_LEN],
            aux_key: [3u8; PRF_KEY_BYTE_LEN],
        };
        let strategy = KeywordStrategy::new(keys.clone(), RowStyle::OneHot);

        assert_eq!(
            strategy.build_weights(&params, b"apple").unwrap(),
            RowStyle::OneHot.row_vector(&keys.row_key, b"apple", 16)
        );
    }
}
