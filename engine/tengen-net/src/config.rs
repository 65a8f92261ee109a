//! Evaluator configuration.

use serde::Deserialize;

/// Configuration for the neural evaluator.
///
/// Immutable once a search starts; threaded through constructors rather
/// than held in process-global state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Board edge length the evaluator is configured for.
    pub board_size: usize,

    /// Softmax temperature applied to the policy head.
    pub softmax_temp: f32,

    /// Additive tuning of the log2 beta output before exponentiation.
    pub beta_tune: f32,

    /// Whether evaluations go through the position cache at all.
    pub use_cache: bool,

    /// Set when self-play randomness (noise or randomized move selection)
    /// is in use; disables the symmetric cache probe so that randomized
    /// games do not collapse onto transformed positions.
    pub randomized: bool,

    /// Move-count horizon considered "the opening"; symmetric cache
    /// probing runs while `move_num < opening_moves / 2`.
    pub opening_moves: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self::for_board(19)
    }
}

impl NetConfig {
    /// Defaults scaled to a board size.
    pub fn for_board(board_size: usize) -> Self {
        Self {
            board_size,
            softmax_temp: 1.0,
            beta_tune: 0.0,
            use_cache: true,
            randomized: false,
            opening_moves: board_size * board_size / 8,
        }
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn with_softmax_temp(mut self, temp: f32) -> Self {
        self.softmax_temp = temp;
        self
    }

    pub fn with_beta_tune(mut self, tune: f32) -> Self {
        self.beta_tune = tune;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    pub fn with_randomized(mut self, randomized: bool) -> Self {
        self.randomized = randomized;
        self
    }
}
