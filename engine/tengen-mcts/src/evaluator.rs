//! The evaluation seam between the tree and the network.
//!
//! Expansion needs exactly one thing from the outside world: a
//! [`Netresult`] for a leaf position (plus the symmetry table, so
//! symmetric moves can be merged). The real implementation is
//! [`tengen_net::Network`]; tests use [`UniformEvaluator`].

use rand_chacha::ChaCha20Rng;

use tengen_core::{GameState, SymmetryTable};
use tengen_net::{Ensemble, EvalError, ForwardPipe, Netresult, Network};

/// Produces leaf evaluations for node expansion.
pub trait LeafEvaluator<S: GameState>: Send + Sync {
    /// Evaluate the position; may be served from a cache.
    fn evaluate(&self, state: &S, rng: &mut ChaCha20Rng) -> Result<Netresult, EvalError>;

    /// Index permutations for the eight board symmetries.
    fn symmetries(&self) -> &SymmetryTable;
}

impl<S: GameState, P: ForwardPipe> LeafEvaluator<S> for Network<P> {
    fn evaluate(&self, state: &S, rng: &mut ChaCha20Rng) -> Result<Netresult, EvalError> {
        let use_cache = self.config().use_cache;
        self.get_output(state, Ensemble::RandomSymmetry, use_cache, use_cache, rng)
    }

    fn symmetries(&self) -> &SymmetryTable {
        Network::symmetries(self)
    }
}

/// Uniform-policy evaluator with a fixed value, for tests and benches.
#[derive(Debug)]
pub struct UniformEvaluator {
    table: SymmetryTable,
    value: f32,
    sai: Option<(f32, f32)>,
}

impl UniformEvaluator {
    pub fn new(board_size: usize) -> Self {
        Self {
            table: SymmetryTable::new(board_size),
            value: 0.5,
            sai: None,
        }
    }

    /// Fixed side-to-move value returned for every position.
    pub fn with_value(mut self, value: f32) -> Self {
        self.value = value;
        self
    }

    /// Report a SAI head with fixed `(alpha, beta)`.
    pub fn with_sai(mut self, alpha: f32, beta: f32) -> Self {
        self.sai = Some((alpha, beta));
        self
    }
}

impl<S: GameState> LeafEvaluator<S> for UniformEvaluator {
    fn evaluate(&self, state: &S, _rng: &mut ChaCha20Rng) -> Result<Netresult, EvalError> {
        let n = state.board_size() * state.board_size();
        let mut result = Netresult::new(n);
        let uniform = 1.0 / (n + 1) as f32;
        result.policy.iter_mut().for_each(|p| *p = uniform);
        result.policy_pass = uniform;
        result.value = self.value;
        if let Some((alpha, beta)) = self.sai {
            result.alpha = alpha;
            result.beta = beta;
            result.is_sai = true;
        }
        Ok(result)
    }

    fn symmetries(&self) -> &SymmetryTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use tengen_minigo::MiniGoban;

    #[test]
    fn test_uniform_evaluator_sums_to_one() {
        let eval = UniformEvaluator::new(5);
        let board = MiniGoban::new(5, 0.0);
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let result = LeafEvaluator::<MiniGoban>::evaluate(&eval, &board, &mut rng).unwrap();
        let sum: f32 = result.policy.iter().sum::<f32>() + result.policy_pass;
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(!result.is_sai);
    }

    #[test]
    fn test_uniform_evaluator_sai() {
        let eval = UniformEvaluator::new(5).with_sai(1.0, 0.4);
        let board = MiniGoban::new(5, 0.0);
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let result = LeafEvaluator::<MiniGoban>::evaluate(&eval, &board, &mut rng).unwrap();
        assert!(result.is_sai);
        assert!((result.alpha - 1.0).abs() < 1e-6);
    }
}
