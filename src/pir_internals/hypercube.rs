use super::{branch_opt_util, error::HypercubePIRError, params::HypercubeParams};

/// Dense array of `s^d` integers modulo `q`, addressed either by linear index or by `d` coordinates.
///
/// Coordinates use mixed radix base `s`, with the most significant dimension first, so that
/// `coords[0]` selects the largest stride `s^(d-1)` and `coords[d-1]` selects consecutive cells.
#[derive(Clone, Debug, PartialEq)]
pub struct HypercubeStore {
    params: HypercubeParams,
    values: Vec<u64>,
}

impl HypercubeStore {
    /// Creates a store with every cell initialized to 1.
    pub fn new(params: HypercubeParams) -> Result<HypercubeStore, HypercubePIRError> {
        params.validate()?;

        Ok(HypercubeStore {
            values: vec![1u64; params.cell_count()],
            params,
        })
    }

    pub fn params(&self) -> &HypercubeParams {
        &self.params
    }

    pub fn dimension(&self) -> usize {
        self.params.dimension
    }

    pub fn side_length(&self) -> usize {
        self.params.side_length
    }

    pub fn modulus(&self) -> u64 {
        self.params.plaintext_modulus
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Stores `value mod q` at `idx`. The store is left untouched if `idx` is out of bounds.
    pub fn insert(&mut self, idx: usize, value: u64) -> Result<(), HypercubePIRError> {
        self.check_index(idx)?;
        self.values[idx] = value % self.params.plaintext_modulus;

        Ok(())
    }

    pub fn get(&self, idx: usize) -> Result<u64, HypercubePIRError> {
        self.check_index(idx)?;
        Ok(self.values[idx])
    }

    /// Writes `values` into consecutive cells, starting at index 0.
    ///
    /// Nothing is written when there are more values than cells.
    pub fn load_values(&mut self, values: &[u64]) -> Result<(), HypercubePIRError> {
        if branch_opt_util::unlikely(values.len() > self.values.len()) {
            return Err(HypercubePIRError::OutOfBounds {
                value: values.len(),
                bound: self.values.len(),
            });
        }

        let q = self.params.plaintext_modulus;
        self.values.iter_mut().zip(values).for_each(|(cell, &v)| *cell = v % q);

        Ok(())
    }

    /// Decomposes linear index `idx` into `d` base-`s` digits, most significant first.
    pub fn to_coords(&self, idx: usize) -> Result<Vec<usize>, HypercubePIRError> {
        self.params.index_to_coords(idx)
    }

    /// Inverse of [`HypercubeStore::to_coords`].
    pub fn from_coords(&self, coords: &[usize]) -> Result<usize, HypercubePIRError> {
        self.params.coords_to_index(coords)
    }

    #[inline]
    fn check_index(&self, idx: usize) -> Result<(), HypercubePIRError> {
        if branch_opt_util::likely(idx < self.values.len()) {
            Ok(())
        } else {
            Err(HypercubePIRError::OutOfBounds {
                value: idx,
                bound: self.values.len(),
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use test_case::test_case;

    fn store(d: usize, s: usize, q: u64) -> HypercubeStore {
        HypercubeStore::new(HypercubeParams::new(d, s, q).unwrap()).unwrap()
    }

    #[test_case(1, 7; "One dimensional cube")]
    #[test_case(2, 3; "Two dimensional cube")]
    #[test_case(3, 4; "Three dimensional cube")]
    #[test_case(5, 2; "Five dimensional binary cube")]
    #[test_case(4, 1; "Degenerate single cell cube")]
    fn coordinates_round_trip_for_every_index(d: usize, s: usize) {
        let cube = store(d, s, 65537);

        for idx in 0..cube.len() {
            let coords = cube.to_coords(idx).unwrap();

            assert_eq!(coords.len(), d);
            assert!(coords.iter().all(|&c| c < s));
            assert_eq!(cube.from_coords(&coords).unwrap(), idx);
        }
    }

    #[test]
    fn most_significant_dimension_is_decoded_first() {
        let cube = store(2, 3, 65537);

        assert_eq!(cube.to_coords(5).unwrap(), vec![1, 2]);
        assert_eq!(cube.to_coords(3).unwrap(), vec![1, 0]);
        assert_eq!(cube.from_coords(&[2, 1]).unwrap(), 7);
    }

    #[test_case(9 => matches Err(HypercubePIRError::OutOfBounds { value: 9, bound: 9 }); "Index equal to cell count is out of bounds")]
    #[test_case(usize::MAX => matches Err(HypercubePIRError::OutOfBounds { .. }); "Huge index is out of bounds")]
    #[test_case(8 => matches Ok(_); "Last index is in bounds")]
    fn to_coords_bounds(idx: usize) -> Result<Vec<usize>, HypercubePIRError> {
        store(2, 3, 65537).to_coords(idx)
    }

    #[test_case(vec![3, 0] => matches Err(HypercubePIRError::OutOfBounds { value: 3, bound: 3 }); "Coordinate equal to side length is out of bounds")]
    #[test_case(vec![0, 1, 2] => matches Err(HypercubePIRError::InvalidCoordinateCount { expected: 2, found: 3 }); "Too many coordinates")]
    #[test_case(vec![] => matches Err(HypercubePIRError::InvalidCoordinateCount { .. }); "No coordinates")]
    #[test_case(vec![2, 2] => matches Ok(8); "Largest coordinates map to last index")]
    fn from_coords_bounds(coords: Vec<usize>) -> Result<usize, HypercubePIRError> {
        store(2, 3, 65537).from_coords(&coords)
    }

    #[test]
    fn new_store_is_filled_with_ones() {
        let cube = store(3, 3, 65537);
        assert!((0..cube.len()).all(|idx| cube.get(idx).unwrap() == 1));
    }

    #[test]
    fn insert_reduces_modulo_q_and_get_reads_back() {
        const Q: u64 = 97;

        let mut cube = store(2, 8, Q);
        let mut rng = ChaCha8Rng::from_os_rng();

        for idx in 0..cube.len() {
            let value = rng.random::<u64>();

            cube.insert(idx, value).unwrap();
            assert_eq!(cube.get(idx).unwrap(), value % Q);
        }
    }

    #[test]
    fn out_of_bounds_insert_leaves_store_unmodified() {
        let mut cube = store(2, 3, 65537);
        let before = cube.clone();

        assert_eq!(cube.insert(9, 42), Err(HypercubePIRError::OutOfBounds { value: 9, bound: 9 }));
        assert_eq!(cube.get(9), Err(HypercubePIRError::OutOfBounds { value: 9, bound: 9 }));
        assert_eq!(cube, before);
    }

    #[test]
    fn load_values_fills_consecutive_cells() {
        let mut cube = store(2, 3, 5);

        cube.load_values(&[0, 1, 2, 3, 4, 5, 6]).unwrap();

        let values = (0..cube.len()).map(|idx| cube.get(idx).unwrap()).collect::<Vec<_>>();
        assert_eq!(values, vec![0, 1, 2, 3, 4, 0, 1, 1, 1]);
    }

    #[test]
    fn load_values_rejects_oversized_input() {
        let mut cube = store(1, 4, 5);
        let before = cube.clone();

        assert!(matches!(cube.load_values(&[0; 5]), Err(HypercubePIRError::OutOfBounds { value: 5, bound: 4 })));
        assert_eq!(cube, before);
    }
}
