//! Input plane construction.
//!
//! The network input is a dense `[planes][board²]` tensor. For each of the
//! last `input_moves` positions there are two occupancy planes (side to
//! move first), optionally followed by legality/atari planes and
//! chain-liberty / chain-size threshold indicator planes. The tail is
//! either two side-to-move color planes or a single all-ones plane that
//! doubles as a board-border feature for the CNN. Every plane is written
//! through the symmetry permutation so the network sees a
//! symmetry-equivalent position.

use tengen_core::{Color, GameState, SymmetryTable, Vertex};

use crate::weights::Architecture;

/// Chain-liberty threshold planes per history slot (==1, <=2, <=3, <=4).
pub const CHAIN_LIBERTIES_PLANES: usize = 4;

/// Chain-size threshold planes per history slot (>=2, >=4, >=6, >=8).
pub const CHAIN_SIZE_PLANES: usize = 4;

/// Number of input planes implied by the feature flags.
pub fn input_planes(
    input_moves: usize,
    adv_features: bool,
    chainlibs_features: bool,
    chainsize_features: bool,
    include_color: bool,
) -> usize {
    let per_move = 2
        + if adv_features { 2 } else { 0 }
        + if chainlibs_features { CHAIN_LIBERTIES_PLANES } else { 0 }
        + if chainsize_features { CHAIN_SIZE_PLANES } else { 0 };
    input_moves * per_move + if include_color { 2 } else { 1 }
}

/// Build the input tensor for `state` under the given symmetry.
pub fn gather_features<S: GameState>(
    state: &S,
    symmetry: usize,
    arch: &Architecture,
    table: &SymmetryTable,
) -> Vec<f32> {
    gather_features_ex(
        state,
        symmetry,
        arch.input_moves,
        arch.adv_features,
        arch.chainlibs_features,
        arch.chainsize_features,
        arch.include_color,
        table,
    )
}

/// Explicit-parameter variant of [`gather_features`].
#[allow(clippy::too_many_arguments)]
pub fn gather_features_ex<S: GameState>(
    state: &S,
    symmetry: usize,
    input_moves: usize,
    adv_features: bool,
    chainlibs_features: bool,
    chainsize_features: bool,
    include_color: bool,
    table: &SymmetryTable,
) -> Vec<f32> {
    let board_size = state.board_size();
    let n = board_size * board_size;
    debug_assert_eq!(table.board_size(), board_size);

    let plane_block = input_moves * n;
    let moves_planes = input_planes(
        input_moves,
        adv_features,
        chainlibs_features,
        chainsize_features,
        include_color,
    ) - if include_color { 2 } else { 1 };
    let total_planes = moves_planes + if include_color { 2 } else { 1 };
    let mut data = vec![0.0f32; total_planes * n];

    // Block offsets, in plane units of the history depth.
    let mut offset = 0;
    let current_off = offset;
    offset += plane_block;
    let opponent_off = offset;
    offset += plane_block;
    let (legal_off, atari_off) = if adv_features {
        let legal = offset;
        offset += plane_block;
        let atari = offset;
        offset += plane_block;
        (legal, atari)
    } else {
        (0, 0)
    };
    let chainlibs_off = if chainlibs_features {
        let start = offset;
        offset += CHAIN_LIBERTIES_PLANES * plane_block;
        start
    } else {
        0
    };
    let chainsize_off = if chainsize_features {
        let start = offset;
        offset += CHAIN_SIZE_PLANES * plane_block;
        start
    } else {
        0
    };
    debug_assert_eq!(offset, moves_planes * n);

    let to_move = state.to_move();
    let blacks_move = to_move == Color::Black;
    let (black_off, white_off) = if blacks_move {
        (current_off, opponent_off)
    } else {
        (opponent_off, current_off)
    };

    // The all-ones plane: the only tail plane without color input, or the
    // plane matching the side to move with it.
    let ones_off = if blacks_move || !include_color {
        moves_planes * n
    } else {
        (moves_planes + 1) * n
    };
    for v in &mut data[ones_off..ones_off + n] {
        *v = 1.0;
    }

    let moves = (state.move_num() + 1).min(input_moves);
    for h in 0..moves {
        let past = state.past_state(h);
        for idx in 0..n {
            let sym_idx = table.index(symmetry, idx);
            let x = sym_idx % board_size;
            let y = sym_idx / board_size;
            match past.stone_at(x, y) {
                Some(Color::Black) => data[black_off + h * n + idx] = 1.0,
                Some(Color::White) => data[white_off + h * n + idx] = 1.0,
                None => {}
            }

            if adv_features {
                let vertex = sym_idx as Vertex;
                let tomove = past.to_move();
                let is_legal = past.is_move_legal(tomove, vertex);
                data[legal_off + h * n + idx] = f32::from(!is_legal);
                data[atari_off + h * n + idx] =
                    f32::from(is_legal && past.liberties_to_capture(vertex) == 1);
            }

            let is_stone = past.stone_at(x, y).is_some();
            if chainlibs_features {
                let vertex = sym_idx as Vertex;
                for plane in 0..CHAIN_LIBERTIES_PLANES {
                    let on = is_stone && past.chain_liberties(vertex) <= plane as u32 + 1;
                    data[chainlibs_off + h * CHAIN_LIBERTIES_PLANES * n + plane * n + idx] =
                        f32::from(on);
                }
            }
            if chainsize_features {
                let vertex = sym_idx as Vertex;
                for plane in 0..CHAIN_SIZE_PLANES {
                    let on = is_stone && past.chain_stones(vertex) >= 2 * plane as u32 + 2;
                    data[chainsize_off + h * CHAIN_SIZE_PLANES * n + plane * n + idx] =
                        f32::from(on);
                }
            }
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use tengen_core::{SymmetryTable, IDENTITY_SYMMETRY, NUM_SYMMETRIES, PASS};
    use tengen_minigo::MiniGoban;

    fn features(
        state: &MiniGoban,
        symmetry: usize,
        input_moves: usize,
        include_color: bool,
    ) -> Vec<f32> {
        let table = SymmetryTable::new(state.board_size());
        gather_features_ex(
            state,
            symmetry,
            input_moves,
            false,
            false,
            false,
            include_color,
            &table,
        )
    }

    #[test]
    fn test_plane_count() {
        assert_eq!(input_planes(8, false, false, false, true), 18);
        assert_eq!(input_planes(8, true, false, false, true), 34);
        assert_eq!(input_planes(4, false, true, true, false), 41);
    }

    #[test]
    fn test_occupancy_is_side_to_move_relative() {
        let mut board = MiniGoban::new(5, 0.0);
        board.play(12); // Black at tengen
        // White to move: Black stones land in the opponent block.
        let data = features(&board, IDENTITY_SYMMETRY, 2, true);
        let n = 25;
        let plane_block = 2 * n;
        assert_eq!(data[12], 0.0); // current (White) plane
        assert_eq!(data[plane_block + 12], 1.0); // opponent (Black) plane
    }

    #[test]
    fn test_history_planes() {
        let mut board = MiniGoban::new(5, 0.0);
        board.play(12);
        board.play(13);
        let n = 25;
        let data = features(&board, IDENTITY_SYMMETRY, 2, true);
        // h = 0: both stones present; Black to move, so current = Black.
        assert_eq!(data[12], 1.0);
        assert_eq!(data[2 * n + 13], 1.0);
        // h = 1: only Black's first stone existed, and it was White's turn
        // then; the plane assignment follows the *current* side to move.
        assert_eq!(data[n + 12], 1.0);
        assert_eq!(data[2 * n + n + 13], 0.0);
    }

    #[test]
    fn test_color_planes_follow_side_to_move() {
        let mut board = MiniGoban::new(5, 0.0);
        let n = 25;
        let moves_planes = 2 * 2;
        let black_to_move = features(&board, IDENTITY_SYMMETRY, 2, true);
        assert!(black_to_move[moves_planes * n..(moves_planes + 1) * n]
            .iter()
            .all(|&v| v == 1.0));
        assert!(black_to_move[(moves_planes + 1) * n..]
            .iter()
            .all(|&v| v == 0.0));

        board.play(PASS);
        let white_to_move = features(&board, IDENTITY_SYMMETRY, 2, true);
        assert!(white_to_move[moves_planes * n..(moves_planes + 1) * n]
            .iter()
            .all(|&v| v == 0.0));
        assert!(white_to_move[(moves_planes + 1) * n..]
            .iter()
            .all(|&v| v == 1.0));
    }

    #[test]
    fn test_ones_plane_without_color() {
        let board = MiniGoban::new(5, 0.0);
        let n = 25;
        let data = features(&board, IDENTITY_SYMMETRY, 2, false);
        assert_eq!(data.len(), 5 * n);
        assert!(data[4 * n..].iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_symmetry_round_trip() {
        // Invariant: applying the inverse permutation to the transformed
        // planes recovers the identity features.
        let mut board = MiniGoban::new(5, 0.0);
        board.play(6);
        board.play(17);
        board.play(3);
        let table = SymmetryTable::new(5);
        let n = 25;
        let base = features(&board, IDENTITY_SYMMETRY, 2, true);
        for symmetry in 0..NUM_SYMMETRIES {
            let transformed = features(&board, symmetry, 2, true);
            let inverse = table.inverse(symmetry);
            let planes = base.len() / n;
            for plane in 0..planes {
                for idx in 0..n {
                    let image = table.index(inverse, idx);
                    assert_eq!(
                        base[plane * n + idx],
                        transformed[plane * n + image],
                        "symmetry {symmetry}, plane {plane}, idx {idx}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_chain_feature_planes() {
        let mut board = MiniGoban::new(5, 0.0);
        board.play(0); // B corner stone: 2 liberties
        board.play(24);
        let table = SymmetryTable::new(5);
        let data = gather_features_ex(
            &board,
            IDENTITY_SYMMETRY,
            1,
            false,
            true,
            true,
            true,
            &table,
        );
        let n = 25;
        // Layout: current, opponent, 4 chainlib planes, 4 chainsize
        // planes, 2 color planes.
        let cl = 2 * n;
        // Corner stone has 2 liberties: off in the ==1 plane, on in <=2..4.
        assert_eq!(data[cl], 0.0);
        assert_eq!(data[cl + n], 1.0);
        assert_eq!(data[cl + 2 * n], 1.0);
        assert_eq!(data[cl + 3 * n], 1.0);
        // Chain of one stone: all >=2 size planes off.
        let cs = cl + 4 * n;
        for plane in 0..4 {
            assert_eq!(data[cs + plane * n], 0.0);
        }
    }
}
