//! Minimal go board for exercising the evaluator and search tree.
//!
//! This crate provides a complete but deliberately small implementation of
//! the [`GameState`] contract: stone placement with capture, chain
//! liberties and sizes, Zobrist hashing with symmetry variants, and a
//! Tromp-Taylor-style area score. It exists so that `tengen-net` and
//! `tengen-mcts` can be tested end-to-end without a full rules engine;
//! superko and time handling are out of its scope.

use tengen_core::{symmetry_xy, Color, GameState, Vertex, NUM_SYMMETRIES, PASS};

/// Mixes a (vertex, color) pair into a 64-bit Zobrist key.
///
/// A splitmix64-style finalizer; deterministic across runs so cached
/// evaluations and tests behave reproducibly.
fn zobrist_key(vertex: usize, color: Color) -> u64 {
    let salt = match color {
        Color::Black => 0x9e37_79b9_7f4a_7c15u64,
        Color::White => 0xbf58_476d_1ce4_e5b9u64,
    };
    let mut z = (vertex as u64 + 1).wrapping_mul(0x94d0_49bb_1331_11ebu64) ^ salt;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

const TO_MOVE_KEY: u64 = 0x2545_f491_4f6c_dd1d;

/// A small go position with enough history for feature planes.
#[derive(Debug, Clone)]
pub struct MiniGoban {
    board_size: usize,
    stones: Vec<Option<Color>>,
    to_move: Color,
    move_num: usize,
    passes: u32,
    komi: f32,
    handicap: u32,
    cpu_color: Color,
    /// Past positions, oldest first. Snapshots carry no history themselves.
    history: Vec<MiniGoban>,
}

impl MiniGoban {
    pub fn new(board_size: usize, komi: f32) -> Self {
        Self {
            board_size,
            stones: vec![None; board_size * board_size],
            to_move: Color::Black,
            move_num: 0,
            passes: 0,
            komi,
            handicap: 0,
            cpu_color: Color::Black,
            history: Vec::new(),
        }
    }

    /// Set the color the engine plays (affects `is_cpu_color`).
    pub fn set_cpu_color(&mut self, color: Color) {
        self.cpu_color = color;
    }

    #[inline]
    fn num_intersections(&self) -> usize {
        self.board_size * self.board_size
    }

    fn neighbors(&self, vertex: usize) -> impl Iterator<Item = usize> {
        let size = self.board_size;
        let x = vertex % size;
        let y = vertex / size;
        let mut out = [usize::MAX; 4];
        let mut n = 0;
        if x > 0 {
            out[n] = vertex - 1;
            n += 1;
        }
        if x + 1 < size {
            out[n] = vertex + 1;
            n += 1;
        }
        if y > 0 {
            out[n] = vertex - size;
            n += 1;
        }
        if y + 1 < size {
            out[n] = vertex + size;
            n += 1;
        }
        out.into_iter().take(n)
    }

    /// Flood-fill the chain containing `vertex`, returning its stones and
    /// liberty set.
    fn chain(&self, vertex: usize) -> (Vec<usize>, Vec<usize>) {
        let color = match self.stones[vertex] {
            Some(c) => c,
            None => return (Vec::new(), Vec::new()),
        };
        let mut members = Vec::new();
        let mut liberties = Vec::new();
        let mut visited = vec![false; self.num_intersections()];
        let mut stack = vec![vertex];
        visited[vertex] = true;
        while let Some(v) = stack.pop() {
            members.push(v);
            for n in self.neighbors(v) {
                match self.stones[n] {
                    Some(c) if c == color && !visited[n] => {
                        visited[n] = true;
                        stack.push(n);
                    }
                    None if !liberties.contains(&n) => liberties.push(n),
                    _ => {}
                }
            }
        }
        (members, liberties)
    }

    fn snapshot(&self) -> MiniGoban {
        let mut snap = self.clone();
        snap.history = Vec::new();
        snap
    }

    /// Play a move for the side to move. Panics on an illegal move; callers
    /// are expected to check legality first.
    pub fn play(&mut self, vertex: Vertex) {
        let snap = self.snapshot();
        if vertex == PASS {
            self.passes += 1;
        } else {
            assert!(self.is_move_legal(self.to_move, vertex), "illegal move {vertex}");
            let v = vertex as usize;
            self.stones[v] = Some(self.to_move);
            let enemy = self.to_move.opponent();
            // Remove adjacent enemy chains left without liberties.
            let captured: Vec<usize> = self
                .neighbors(v)
                .filter(|&n| self.stones[n] == Some(enemy))
                .collect();
            for n in captured {
                if self.stones[n] == Some(enemy) {
                    let (members, liberties) = self.chain(n);
                    if liberties.is_empty() {
                        for m in members {
                            self.stones[m] = None;
                        }
                    }
                }
            }
            self.passes = 0;
        }
        self.to_move = self.to_move.opponent();
        self.move_num += 1;
        self.history.push(snap);
    }

    fn hash_with<F>(&self, map: F) -> u64
    where
        F: Fn(usize) -> usize,
    {
        let mut hash = match self.to_move {
            Color::Black => 0,
            Color::White => TO_MOVE_KEY,
        };
        for (v, stone) in self.stones.iter().enumerate() {
            if let Some(color) = stone {
                hash ^= zobrist_key(map(v), *color);
            }
        }
        hash
    }
}

impl GameState for MiniGoban {
    fn board_size(&self) -> usize {
        self.board_size
    }

    fn to_move(&self) -> Color {
        self.to_move
    }

    fn move_num(&self) -> usize {
        self.move_num
    }

    fn passes(&self) -> u32 {
        self.passes
    }

    fn hash(&self) -> u64 {
        self.hash_with(|v| v)
    }

    fn symmetry_hash(&self, symmetry: usize) -> u64 {
        let size = self.board_size;
        self.hash_with(|v| {
            let (x, y) = symmetry_xy((v % size, v / size), symmetry, size);
            y * size + x
        })
    }

    fn is_move_legal(&self, color: Color, vertex: Vertex) -> bool {
        if vertex == PASS {
            return true;
        }
        let v = vertex as usize;
        if v >= self.num_intersections() || self.stones[v].is_some() {
            return false;
        }
        // Place the stone on a scratch board and require the resulting
        // chain to breathe, allowing for captures.
        let mut scratch = self.clone();
        scratch.history = Vec::new();
        scratch.stones[v] = Some(color);
        let enemy = color.opponent();
        let enemy_neighbors: Vec<usize> = scratch
            .neighbors(v)
            .filter(|&n| scratch.stones[n] == Some(enemy))
            .collect();
        for n in enemy_neighbors {
            if scratch.stones[n] == Some(enemy) {
                let (members, liberties) = scratch.chain(n);
                if liberties.is_empty() {
                    for m in members {
                        scratch.stones[m] = None;
                    }
                }
            }
        }
        let (_, liberties) = scratch.chain(v);
        !liberties.is_empty()
    }

    fn stone_at(&self, x: usize, y: usize) -> Option<Color> {
        self.stones[y * self.board_size + x]
    }

    fn past_state(&self, moves_back: usize) -> &Self {
        if moves_back == 0 || self.history.is_empty() {
            return self;
        }
        let clamped = moves_back.min(self.history.len());
        &self.history[self.history.len() - clamped]
    }

    fn chain_liberties(&self, vertex: Vertex) -> u32 {
        if vertex == PASS {
            return 0;
        }
        self.chain(vertex as usize).1.len() as u32
    }

    fn chain_stones(&self, vertex: Vertex) -> u32 {
        if vertex == PASS {
            return 0;
        }
        self.chain(vertex as usize).0.len() as u32
    }

    fn liberties_to_capture(&self, vertex: Vertex) -> u32 {
        if vertex == PASS {
            return 0;
        }
        self.neighbors(vertex as usize)
            .filter(|&n| self.stones[n].is_some())
            .map(|n| self.chain(n).1.len() as u32)
            .min()
            .unwrap_or(0)
    }

    fn is_symmetry_invariant(&self, symmetry: usize) -> bool {
        debug_assert!(symmetry < NUM_SYMMETRIES);
        let size = self.board_size;
        (0..self.num_intersections()).all(|v| {
            let (x, y) = symmetry_xy((v % size, v / size), symmetry, size);
            self.stones[v] == self.stones[y * size + x]
        })
    }

    fn komi(&self) -> f32 {
        self.komi
    }

    fn handicap(&self) -> u32 {
        self.handicap
    }

    fn final_score(&self) -> f32 {
        // Area scoring: stones plus empty regions bordered by one color.
        let mut black = 0i32;
        let mut white = 0i32;
        let mut visited = vec![false; self.num_intersections()];
        for v in 0..self.num_intersections() {
            match self.stones[v] {
                Some(Color::Black) => black += 1,
                Some(Color::White) => white += 1,
                None if !visited[v] => {
                    let mut region = Vec::new();
                    let mut stack = vec![v];
                    visited[v] = true;
                    let mut touches_black = false;
                    let mut touches_white = false;
                    while let Some(e) = stack.pop() {
                        region.push(e);
                        for n in self.neighbors(e) {
                            match self.stones[n] {
                                Some(Color::Black) => touches_black = true,
                                Some(Color::White) => touches_white = true,
                                None if !visited[n] => {
                                    visited[n] = true;
                                    stack.push(n);
                                }
                                None => {}
                            }
                        }
                    }
                    if touches_black && !touches_white {
                        black += region.len() as i32;
                    } else if touches_white && !touches_black {
                        white += region.len() as i32;
                    }
                }
                None => {}
            }
        }
        (black - white) as f32 - self.komi
    }

    fn is_cpu_color(&self) -> bool {
        self.to_move == self.cpu_color
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_and_history() {
        let mut board = MiniGoban::new(5, 0.5);
        assert_eq!(board.to_move(), Color::Black);
        board.play(12);
        board.play(13);
        assert_eq!(board.move_num(), 2);
        assert_eq!(board.stone_at(2, 2), Some(Color::Black));
        assert_eq!(board.stone_at(3, 2), Some(Color::White));
        // One move ago White had not answered yet.
        let past = board.past_state(1);
        assert_eq!(past.stone_at(2, 2), Some(Color::Black));
        assert_eq!(past.stone_at(3, 2), None);
        // Two moves ago the board was empty.
        assert_eq!(board.past_state(2).move_num(), 0);
        // Clamped beyond the game start.
        assert_eq!(board.past_state(10).move_num(), 0);
    }

    #[test]
    fn test_capture() {
        let mut board = MiniGoban::new(5, 0.0);
        // Black surrounds the white stone at (1, 0): neighbors are
        // (0,0), (2,0) and (1,1).
        board.play(0); // B (0,0)
        board.play(1); // W (1,0)
        board.play(2); // B (2,0)
        board.play(23); // W elsewhere
        assert_eq!(board.chain_liberties(1), 1);
        assert_eq!(board.liberties_to_capture(6), 1);
        board.play(6); // B (1,1) captures
        assert_eq!(board.stone_at(1, 0), None);
    }

    #[test]
    fn test_suicide_is_illegal() {
        let mut board = MiniGoban::new(5, 0.0);
        board.play(1); // B (1,0)
        board.play(23); // W
        board.play(5); // B (0,1)
        // (0, 0) is now a one-point eye for Black; White may not fill it.
        assert!(!board.is_move_legal(Color::White, 0));
        assert!(board.is_move_legal(Color::Black, 0));
    }

    #[test]
    fn test_symmetry_hash_matches_transformed_board() {
        let mut board = MiniGoban::new(5, 0.0);
        board.play(6);
        board.play(8);
        for symmetry in 0..NUM_SYMMETRIES {
            // Build the transformed position by hand and compare hashes.
            let mut transformed = MiniGoban::new(5, 0.0);
            transformed.to_move = board.to_move;
            for v in 0..25 {
                if let Some(color) = board.stones[v] {
                    let (x, y) = symmetry_xy((v % 5, v / 5), symmetry, 5);
                    transformed.stones[y * 5 + x] = Some(color);
                }
            }
            assert_eq!(board.symmetry_hash(symmetry), transformed.hash());
        }
    }

    #[test]
    fn test_symmetry_invariance() {
        let mut board = MiniGoban::new(5, 0.0);
        board.play(12); // tengen: invariant under everything
        for symmetry in 0..NUM_SYMMETRIES {
            assert!(board.is_symmetry_invariant(symmetry));
        }
        board.play(0);
        assert!(board.is_symmetry_invariant(0));
        assert!(!board.is_symmetry_invariant(6));
    }

    #[test]
    fn test_final_score_empty_board() {
        let board = MiniGoban::new(5, 7.5);
        assert!((board.final_score() + 7.5).abs() < 1e-6);
    }

    #[test]
    fn test_alpkt_sign_convention() {
        let mut board = MiniGoban::new(5, 3.0);
        // Black to move: alpkt = alpha - komi_adj.
        assert!((board.alpkt(5.0) - 2.0).abs() < 1e-6);
        board.play(PASS);
        // White to move: alpha flips sign first.
        assert!((board.alpkt(5.0) + 8.0).abs() < 1e-6);
    }
}
