use super::{branch_opt_util, engine::HomomorphicEngine, error::HypercubePIRError, hypercube::HypercubeStore};
use rayon::prelude::*;

/// Server side oblivious evaluation of a hypercube against encrypted selection weights.
pub struct CubeFoldEvaluator<'a, E: HomomorphicEngine> {
    engine: &'a E,
}

impl<'a, E: HomomorphicEngine> CubeFoldEvaluator<'a, E> {
    pub fn new(engine: &'a E) -> CubeFoldEvaluator<'a, E> {
        CubeFoldEvaluator { engine }
    }

    /// Folds `store` against `selection`, one dimension at a time, producing a single response ciphertext.
    ///
    /// For every cell `j` with coordinates `c`, computes `sel[c_0] · store[j] · Π_{i ≥ 1} sel[s·i + c_i]`,
    /// relinearizing after each ciphertext multiplication, and sums all cells. Weights are arbitrary
    /// integers, one-hot blocks pick out a single cell, pseudorandom blocks compute an inner product.
    /// Cells are processed in parallel.
    ///
    /// # Arguments
    ///
    /// * `store`: Database, it must not change for the duration of the fold.
    /// * `selection`: `d·s` ciphertexts, block `i` being `selection[s·i..s·(i+1)]`.
    /// * `rk`: Relinearization key of the querying client.
    ///
    /// # Returns
    ///
    /// The response ciphertext. Any engine failure aborts the whole evaluation.
    pub fn evaluate(&self, store: &HypercubeStore, selection: &[E::Ciphertext], rk: &E::RelinKey) -> Result<E::Ciphertext, HypercubePIRError> {
        let s = store.side_length();
        let d = store.dimension();

        let expected = d * s;
        if branch_opt_util::unlikely(selection.len() != expected) {
            return Err(HypercubePIRError::InvalidSelectionLength {
                expected,
                found: selection.len(),
            });
        }

        (0..store.len())
            .into_par_iter()
            .map(|j| -> Result<E::Ciphertext, HypercubePIRError> {
                let coords = store.to_coords(j)?;

                let mut cell = self.engine.multiply_plain(&selection[coords[0]], store.get(j)?)?;
                for (i, &c) in coords.iter().enumerate().skip(1) {
                    let masked = self.engine.multiply(&cell, &selection[s * i + c])?;
                    cell = self.engine.relinearize(rk, masked)?;
                }

                Ok(cell)
            })
            .try_reduce_with(|acc, cell| self.engine.add(&acc, &cell))
            .ok_or_else(|| HypercubePIRError::EvaluationError("can't fold an empty hypercube".to_string()))?
    }
}
