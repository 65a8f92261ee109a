//! Search configuration.

use serde::Deserialize;

/// Tunables for PUCT selection, expansion and the SAI agent behavior.
///
/// Immutable during a search; threaded through calls rather than read from
/// global state. The four-element `lambda`/`mu` arrays are indexed by
/// `(engine is not playing this color) * 2 + (net winrate below one half)`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// PUCT exploration coefficient.
    pub puct: f32,

    /// Scale of the visit count inside the PUCT logarithm.
    pub logpuct: f32,

    /// Additive constant inside the PUCT logarithm.
    pub logconst: f32,

    /// First-play-urgency reduction for unvisited children.
    pub fpu_reduction: f32,

    /// FPU reduction applied at the root.
    pub fpu_root_reduction: f32,

    /// FPU = average of visited siblings excluding the best one.
    pub fpu_average: bool,

    /// FPU = 0 (maximum pessimism for unvisited children).
    pub fpu_zero: bool,

    /// Scale child priors by twice their eval standard deviation.
    pub stdev_uct: bool,

    /// Temperature on child priors during expansion.
    pub policy_temp: f32,

    /// Merge symmetric moves when the position has non-trivial symmetry.
    pub exploit_symmetries: bool,

    /// Deterministic representative choice for merged symmetric moves.
    pub symm_nonrandom: bool,

    /// Always consider passing during expansion.
    pub dumb_pass: bool,

    /// Exclude forced playouts from the PUCT denominator.
    pub ladder_code: bool,

    /// Order root children by the lower confidence bound of their eval.
    pub use_lcb: bool,

    /// Fraction of the max child visits required before LCB ordering
    /// applies to a child.
    pub lcb_min_visit_ratio: f32,

    /// Per-agent-situation lambda weights (SAI bonus blending).
    pub lambda: [f32; 4],

    /// Per-agent-situation mu weights (SAI bonus blending).
    pub mu: [f32; 4],

    /// Virtual loss added per descending thread.
    pub virtual_loss: i32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            puct: 0.5,
            logpuct: 0.015,
            logconst: 1.7,
            fpu_reduction: 0.25,
            fpu_root_reduction: 0.25,
            fpu_average: false,
            fpu_zero: false,
            stdev_uct: false,
            policy_temp: 1.0,
            exploit_symmetries: true,
            symm_nonrandom: false,
            dumb_pass: false,
            ladder_code: false,
            use_lcb: true,
            lcb_min_visit_ratio: 0.1,
            lambda: [0.0; 4],
            mu: [0.0; 4],
            virtual_loss: 3,
        }
    }
}

impl SearchConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn with_puct(mut self, puct: f32) -> Self {
        self.puct = puct;
        self
    }

    pub fn with_policy_temp(mut self, temp: f32) -> Self {
        self.policy_temp = temp;
        self
    }

    pub fn with_lambda(mut self, lambda: f32) -> Self {
        self.lambda = [lambda; 4];
        self
    }

    pub fn with_mu(mut self, mu: f32) -> Self {
        self.mu = [mu; 4];
        self
    }
}
