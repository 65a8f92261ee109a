//! Neural network evaluation for the Tengen engine.
//!
//! This crate owns everything between a `GameState` and a cached
//! [`Netresult`]:
//!
//! - [`weights`]: the line-oriented text weights format, its section state
//!   machine, and the post-load transforms (Winograd filters, bias
//!   folding, variance inversion, pool padding)
//! - [`forward`]: the `ForwardPipe` contract plus the scalar reference
//!   backend used by tests
//! - [`features`]: input plane construction with symmetry permutation
//! - [`network`]: the evaluator front-end with ensemble modes and the
//!   symmetry-aware cache probe
//! - [`cache`]: the size-bounded evaluation cache
//! - [`sigmoid`]: the numerically stable SAI sigmoid model
//!
//! ```text
//! GameState -> gather_features -> ForwardPipe::forward -> post-process
//!           -> Netresult -> NnCache
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod features;
pub mod forward;
pub mod heatmap;
pub mod network;
pub mod sigmoid;
pub mod synthetic;
pub mod weights;
pub mod winograd;

pub use cache::{Netresult, NnCache};
pub use config::NetConfig;
pub use error::{EvalError, NetError, WeightsError};
pub use forward::{CpuPipe, ForwardPipe};
pub use heatmap::{heatmap_string, AgentEval};
pub use network::{Ensemble, Network};
pub use sigmoid::sigmoid;
pub use weights::{
    load_weights_file, parse_weights, Architecture, LoadedNetwork, ValueHeadType,
};
