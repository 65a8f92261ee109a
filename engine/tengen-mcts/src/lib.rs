//! Monte-Carlo tree search node for the Tengen engine.
//!
//! This crate provides the tree side of the search core:
//!
//! - [`UctNode`]: the node itself, with at-most-once expansion, lock-free
//!   statistics, PUCT selection, virtual loss and the SAI running
//!   quantile estimators
//! - [`UctNodePointer`]: tagged child slots that stay a compact
//!   `(move, policy)` pair until first selected
//! - [`LeafEvaluator`]: the seam to the neural evaluator
//! - [`SearchConfig`]: selection and expansion tunables
//!
//! The search driver loop, time management and command handling live
//! elsewhere; many driver workers share one tree through `&UctNode`.

pub mod atomics;
pub mod config;
pub mod evaluator;
pub mod node;
pub mod pointer;
pub mod stats;

pub use atomics::{AtomicF32, AtomicF64};
pub use config::SearchConfig;
pub use evaluator::{LeafEvaluator, UniformEvaluator};
pub use node::{ExpandState, LeafEval, NodeStatus, UctNode, UctStats};
pub use pointer::UctNodePointer;
