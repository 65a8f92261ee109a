//! Player/stone color.

use serde::Deserialize;

/// Stone color. Black moves first and all tree statistics are accumulated
/// from Black's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Color {
    Black,
    White,
}

impl Color {
    /// The opposing color.
    #[inline]
    pub fn opponent(self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    /// Flip a Black-perspective probability to this color's perspective.
    #[inline]
    pub fn from_black(self, black_value: f32) -> f32 {
        match self {
            Color::Black => black_value,
            Color::White => 1.0 - black_value,
        }
    }
}
