//! The `GameState` contract.
//!
//! The evaluator and the search tree never manipulate board rules directly.
//! Everything they need from the rules engine is expressed through this
//! trait: occupancy and history for input planes, legality for move
//! filtering, hashing for the evaluation cache, and a handful of scoring
//! hooks for the SAI value head.

use crate::color::Color;

/// Intersection index in `0..board_size²`, row-major from the lower-left
/// corner, or [`PASS`].
pub type Vertex = i16;

/// Sentinel vertex for the pass move.
pub const PASS: Vertex = -1;

/// Contract between the rules engine and the evaluator/search core.
///
/// `past_state(h)` returns the position as it was `h` moves ago; `h = 0` is
/// the current position. Implementations must keep at least as many
/// snapshots as the evaluator's configured history depth.
pub trait GameState: Send + Sync {
    /// Board edge length (e.g. 19).
    fn board_size(&self) -> usize;

    /// Side to move.
    fn to_move(&self) -> Color;

    /// Number of moves played so far.
    fn move_num(&self) -> usize;

    /// Number of consecutive passes ending the move history.
    fn passes(&self) -> u32;

    /// Zobrist hash of the current position.
    fn hash(&self) -> u64;

    /// Zobrist hash of the position transformed by the given symmetry.
    fn symmetry_hash(&self, symmetry: usize) -> u64;

    /// Whether `color` may play at `vertex` (`PASS` is always legal).
    fn is_move_legal(&self, color: Color, vertex: Vertex) -> bool;

    /// Stone at the given coordinates, if any.
    fn stone_at(&self, x: usize, y: usize) -> Option<Color>;

    /// The position `moves_back` moves ago (clamped to the game start).
    fn past_state(&self, moves_back: usize) -> &Self;

    /// Liberties of the chain occupying `vertex`; 0 for an empty vertex.
    fn chain_liberties(&self, vertex: Vertex) -> u32;

    /// Stones in the chain occupying `vertex`; 0 for an empty vertex.
    fn chain_stones(&self, vertex: Vertex) -> u32;

    /// Minimum liberty count over the chains adjacent to `vertex`, or 0 if
    /// no chain touches it. A return of 1 means a play here captures or
    /// self-ataris something.
    fn liberties_to_capture(&self, vertex: Vertex) -> u32;

    /// Whether the position maps to itself under the given symmetry.
    fn is_symmetry_invariant(&self, symmetry: usize) -> bool;

    /// Raw komi as configured for the game.
    fn komi(&self) -> f32;

    /// Handicap stone count.
    fn handicap(&self) -> u32;

    /// Score on the final position (Black minus White, komi included),
    /// positive when Black is ahead.
    fn final_score(&self) -> f32;

    /// Whether the side to move is the color the engine is playing.
    fn is_cpu_color(&self) -> bool;

    /// Komi adjusted for handicap stones.
    fn komi_adj(&self) -> f32 {
        self.komi() + self.handicap() as f32
    }

    /// Convert the network's side-to-move score advantage `alpha` into the
    /// Black-perspective, komi-adjusted advantage used by the tree.
    fn alpkt(&self, alpha: f32) -> f32 {
        let signed = match self.to_move() {
            Color::Black => alpha,
            Color::White => -alpha,
        };
        signed - self.komi_adj()
    }
}

/// Render a vertex as a GTP-style coordinate ("D4", "PASS"). The letter `I`
/// is skipped by convention.
pub fn vertex_to_text(board_size: usize, vertex: Vertex) -> String {
    if vertex == PASS {
        return "pass".to_string();
    }
    let x = vertex as usize % board_size;
    let y = vertex as usize / board_size;
    let column = if x < 8 { b'A' + x as u8 } else { b'B' + x as u8 };
    format!("{}{}", column as char, y + 1)
}
