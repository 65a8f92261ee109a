//! Core traits and types for the Tengen engine
//!
//! This crate provides the fundamental abstractions shared by the neural
//! evaluator and the search tree:
//! - `Color`: stone/player color with perspective helpers
//! - `GameState`: the contract a rules engine must satisfy so the evaluator
//!   can build input planes and the tree can expand nodes
//! - `SymmetryTable`: precomputed intersection-index permutations for the
//!   eight dihedral board symmetries

pub mod color;
pub mod state;
pub mod symmetry;

pub use color::Color;
pub use state::{vertex_to_text, GameState, Vertex, PASS};
pub use symmetry::{symmetry_xy, SymmetryTable, IDENTITY_SYMMETRY, NUM_SYMMETRIES};
