//! Winograd F(4x4, 3x3) convolution.
//!
//! Every 3x3 convolution in the loaded network is stored in the transformed
//! `U` layout produced by [`transform_filters`], ready for per-tile GEMM
//! batching. The filter transform runs once at load time. The input/output
//! transforms and the tile GEMM live here too; they are used by the scalar
//! reference backend.
//!
//! The transform triple (G, Bt, At) uses the interpolation points
//! `{0, ±sqrt(2)/2, ±sqrt(2), inf}`, which keeps the transformed filters
//! well conditioned in f32.

pub const WINOGRAD_M: usize = 4;
pub const WINOGRAD_ALPHA: usize = WINOGRAD_M + 3 - 1;
pub const WINOGRAD_TILE: usize = WINOGRAD_ALPHA * WINOGRAD_ALPHA;

const SQ2: f32 = std::f32::consts::SQRT_2;

/// G (6x3): filter evaluation matrix.
const G: [f32; 3 * WINOGRAD_ALPHA] = [
    1.0,        0.0,        0.0,
    -2.0 / 3.0, -SQ2 / 3.0, -1.0 / 3.0,
    -2.0 / 3.0, SQ2 / 3.0,  -1.0 / 3.0,
    1.0 / 6.0,  SQ2 / 6.0,  1.0 / 3.0,
    1.0 / 6.0,  -SQ2 / 6.0, 1.0 / 3.0,
    0.0,        0.0,        1.0,
];

/// Bt (6x6): data transform.
const BT: [f32; WINOGRAD_TILE] = [
    1.0, 0.0,        -5.0 / 2.0, 0.0,        1.0, 0.0,
    0.0, -SQ2,       -2.0,       SQ2 / 2.0,  1.0, 0.0,
    0.0, SQ2,        -2.0,       -SQ2 / 2.0, 1.0, 0.0,
    0.0, -SQ2 / 2.0, -1.0 / 2.0, SQ2,        1.0, 0.0,
    0.0, SQ2 / 2.0,  -1.0 / 2.0, -SQ2,       1.0, 0.0,
    0.0, 1.0,        0.0,        -5.0 / 2.0, 0.0, 1.0,
];

/// At (4x6): output transform.
const AT: [f32; WINOGRAD_M * WINOGRAD_ALPHA] = [
    1.0, 1.0,       1.0,        1.0,       1.0,        0.0,
    0.0, SQ2 / 2.0, -SQ2 / 2.0, SQ2,       -SQ2,       0.0,
    0.0, 1.0 / 2.0, 1.0 / 2.0,  2.0,       2.0,        0.0,
    0.0, SQ2 / 4.0, -SQ2 / 4.0, 2.0 * SQ2, -2.0 * SQ2, 1.0,
];

/// Number of 4x4 output tiles along one board edge.
#[inline]
pub fn wtiles(board_size: usize) -> usize {
    board_size / WINOGRAD_M + usize::from(board_size % WINOGRAD_M != 0)
}

/// Transform a `[outputs][channels][3][3]` filter bank into the
/// `[tile][channel][output]` layout consumed by the tile GEMM.
///
/// Computes `transpose(G . f . Gt)` per filter; the transpose puts the
/// tile index outermost so each of the 36 GEMMs reads contiguously.
pub fn transform_filters(f: &[f32], outputs: usize, channels: usize) -> Vec<f32> {
    assert_eq!(f.len(), outputs * channels * 9);
    let mut u = vec![0.0f32; WINOGRAD_TILE * outputs * channels];

    let mut temp = [0.0f32; 3 * WINOGRAD_ALPHA];
    for c in 0..channels {
        for o in 0..outputs {
            let filter = &f[o * channels * 9 + c * 9..][..9];
            // temp = G . f
            for i in 0..WINOGRAD_ALPHA {
                for j in 0..3 {
                    let mut acc = 0.0;
                    for k in 0..3 {
                        acc += G[i * 3 + k] * filter[k * 3 + j];
                    }
                    temp[i * 3 + j] = acc;
                }
            }
            // U = temp . Gt
            for xi in 0..WINOGRAD_ALPHA {
                for nu in 0..WINOGRAD_ALPHA {
                    let mut acc = 0.0;
                    for k in 0..3 {
                        acc += temp[xi * 3 + k] * G[nu * 3 + k];
                    }
                    u[(xi * WINOGRAD_ALPHA + nu) * outputs * channels + c * outputs + o] = acc;
                }
            }
        }
    }

    u
}

/// Transform the input image into `V[tile_coeff][channel][tile]`.
pub(crate) fn transform_in(input: &[f32], v: &mut [f32], channels: usize, board_size: usize) {
    let wt = wtiles(board_size);
    let tiles = wt * wt;
    let n = board_size * board_size;
    debug_assert_eq!(input.len(), channels * n);
    debug_assert_eq!(v.len(), WINOGRAD_TILE * channels * tiles);

    let mut d = [[0.0f32; WINOGRAD_ALPHA]; WINOGRAD_ALPHA];
    let mut t = [[0.0f32; WINOGRAD_ALPHA]; WINOGRAD_ALPHA];

    for c in 0..channels {
        let image = &input[c * n..][..n];
        for th in 0..wt {
            for tw in 0..wt {
                // 6x6 input patch, padded with zeros outside the board.
                for (i, row) in d.iter_mut().enumerate() {
                    let y = (th * WINOGRAD_M + i) as isize - 1;
                    for (j, cell) in row.iter_mut().enumerate() {
                        let x = (tw * WINOGRAD_M + j) as isize - 1;
                        *cell = if y >= 0
                            && (y as usize) < board_size
                            && x >= 0
                            && (x as usize) < board_size
                        {
                            image[y as usize * board_size + x as usize]
                        } else {
                            0.0
                        };
                    }
                }
                // t = Bt . d
                for i in 0..WINOGRAD_ALPHA {
                    for l in 0..WINOGRAD_ALPHA {
                        let mut acc = 0.0;
                        for k in 0..WINOGRAD_ALPHA {
                            acc += BT[i * WINOGRAD_ALPHA + k] * d[k][l];
                        }
                        t[i][l] = acc;
                    }
                }
                // V_tile = t . B, scattered to the batched layout.
                let tile = th * wt + tw;
                for i in 0..WINOGRAD_ALPHA {
                    for j in 0..WINOGRAD_ALPHA {
                        let mut acc = 0.0;
                        for l in 0..WINOGRAD_ALPHA {
                            acc += t[i][l] * BT[j * WINOGRAD_ALPHA + l];
                        }
                        v[(i * WINOGRAD_ALPHA + j) * channels * tiles + c * tiles + tile] = acc;
                    }
                }
            }
        }
    }
}

/// 36 small GEMMs: `M_b = transpose(U_b) . V_b` for each tile coefficient.
pub(crate) fn tile_sgemm(
    u: &[f32],
    v: &[f32],
    m: &mut [f32],
    channels: usize,
    outputs: usize,
    board_size: usize,
) {
    let wt = wtiles(board_size);
    let tiles = wt * wt;
    debug_assert_eq!(u.len(), WINOGRAD_TILE * channels * outputs);
    debug_assert_eq!(v.len(), WINOGRAD_TILE * channels * tiles);
    debug_assert_eq!(m.len(), WINOGRAD_TILE * outputs * tiles);

    for b in 0..WINOGRAD_TILE {
        let u_b = &u[b * outputs * channels..][..outputs * channels];
        let v_b = &v[b * channels * tiles..][..channels * tiles];
        let m_b = &mut m[b * outputs * tiles..][..outputs * tiles];
        for cell in m_b.iter_mut() {
            *cell = 0.0;
        }
        for c in 0..channels {
            let v_row = &v_b[c * tiles..][..tiles];
            for o in 0..outputs {
                let coeff = u_b[c * outputs + o];
                let out_row = &mut m_b[o * tiles..][..tiles];
                for (out, val) in out_row.iter_mut().zip(v_row) {
                    *out += coeff * val;
                }
            }
        }
    }
}

/// Transform `M[tile_coeff][output][tile]` back into the spatial image.
pub(crate) fn transform_out(m: &[f32], output: &mut [f32], outputs: usize, board_size: usize) {
    let wt = wtiles(board_size);
    let tiles = wt * wt;
    let n = board_size * board_size;
    debug_assert_eq!(m.len(), WINOGRAD_TILE * outputs * tiles);
    debug_assert_eq!(output.len(), outputs * n);

    let mut tile = [[0.0f32; WINOGRAD_ALPHA]; WINOGRAD_ALPHA];
    let mut t = [[0.0f32; WINOGRAD_ALPHA]; WINOGRAD_M];

    for o in 0..outputs {
        for th in 0..wt {
            for tw in 0..wt {
                let p = th * wt + tw;
                for (i, row) in tile.iter_mut().enumerate() {
                    for (j, cell) in row.iter_mut().enumerate() {
                        *cell = m[(i * WINOGRAD_ALPHA + j) * outputs * tiles + o * tiles + p];
                    }
                }
                // t = At . tile
                for a in 0..WINOGRAD_M {
                    for l in 0..WINOGRAD_ALPHA {
                        let mut acc = 0.0;
                        for k in 0..WINOGRAD_ALPHA {
                            acc += AT[a * WINOGRAD_ALPHA + k] * tile[k][l];
                        }
                        t[a][l] = acc;
                    }
                }
                // Y = t . A
                for a in 0..WINOGRAD_M {
                    let y = th * WINOGRAD_M + a;
                    if y >= board_size {
                        continue;
                    }
                    for b in 0..WINOGRAD_M {
                        let x = tw * WINOGRAD_M + b;
                        if x >= board_size {
                            continue;
                        }
                        let mut acc = 0.0;
                        for l in 0..WINOGRAD_ALPHA {
                            acc += t[a][l] * AT[b * WINOGRAD_ALPHA + l];
                        }
                        output[o * n + y * board_size + x] = acc;
                    }
                }
            }
        }
    }
}

/// Full 3x3 convolution of `input` by the transformed filter bank `u`.
pub(crate) fn convolve3(
    input: &[f32],
    u: &[f32],
    output: &mut [f32],
    channels: usize,
    outputs: usize,
    board_size: usize,
) {
    let tiles = wtiles(board_size) * wtiles(board_size);
    let mut v = vec![0.0f32; WINOGRAD_TILE * channels * tiles];
    let mut m = vec![0.0f32; WINOGRAD_TILE * outputs * tiles];
    transform_in(input, &mut v, channels, board_size);
    tile_sgemm(u, &v, &mut m, channels, outputs, board_size);
    transform_out(&m, output, outputs, board_size);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Plain 3x3 convolution with zero padding, for cross-checking.
    fn direct_conv3(
        input: &[f32],
        filters: &[f32],
        channels: usize,
        outputs: usize,
        board_size: usize,
    ) -> Vec<f32> {
        let n = board_size * board_size;
        let mut out = vec![0.0f32; outputs * n];
        for o in 0..outputs {
            for y in 0..board_size as isize {
                for x in 0..board_size as isize {
                    let mut acc = 0.0;
                    for c in 0..channels {
                        for ky in 0..3isize {
                            for kx in 0..3isize {
                                let sy = y + ky - 1;
                                let sx = x + kx - 1;
                                if sy < 0
                                    || sy >= board_size as isize
                                    || sx < 0
                                    || sx >= board_size as isize
                                {
                                    continue;
                                }
                                acc += filters[o * channels * 9 + c * 9 + (ky * 3 + kx) as usize]
                                    * input[c * n + (sy as usize) * board_size + sx as usize];
                            }
                        }
                    }
                    out[o * n + (y as usize) * board_size + x as usize] = acc;
                }
            }
        }
        out
    }

    fn pseudo(seed: usize) -> f32 {
        // Small deterministic values in [-0.5, 0.5).
        ((seed.wrapping_mul(2654435761) >> 7) % 1000) as f32 / 1000.0 - 0.5
    }

    #[test]
    fn test_convolve_matches_direct() {
        for board_size in [4, 5, 9] {
            let channels = 3;
            let outputs = 2;
            let n = board_size * board_size;
            let filters: Vec<f32> = (0..outputs * channels * 9).map(pseudo).collect();
            let input: Vec<f32> = (0..channels * n).map(|i| pseudo(i + 7919)).collect();

            let u = transform_filters(&filters, outputs, channels);
            let mut fast = vec![0.0f32; outputs * n];
            convolve3(&input, &u, &mut fast, channels, outputs, board_size);

            let direct = direct_conv3(&input, &filters, channels, outputs, board_size);
            for (i, (a, b)) in fast.iter().zip(&direct).enumerate() {
                assert!(
                    (a - b).abs() < 1e-4,
                    "board {board_size}, element {i}: winograd {a} vs direct {b}"
                );
            }
        }
    }

    #[test]
    fn test_identity_filter() {
        // A filter with 1 at the center copies the input.
        let board_size = 8;
        let n = board_size * board_size;
        let mut filter = vec![0.0f32; 9];
        filter[4] = 1.0;
        let input: Vec<f32> = (0..n).map(pseudo).collect();

        let u = transform_filters(&filter, 1, 1);
        let mut out = vec![0.0f32; n];
        convolve3(&input, &u, &mut out, 1, 1, board_size);

        for (a, b) in out.iter().zip(&input) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_transform_filters_layout() {
        // The first tile coefficient of a constant-center filter bank must
        // land at [0][c][o] in the batched layout.
        let channels = 2;
        let outputs = 2;
        let filters = vec![0.1f32; outputs * channels * 9];
        let u = transform_filters(&filters, outputs, channels);
        assert_eq!(u.len(), WINOGRAD_TILE * outputs * channels);
    }

    #[test]
    fn test_wtiles() {
        assert_eq!(wtiles(19), 5);
        assert_eq!(wtiles(16), 4);
        assert_eq!(wtiles(9), 3);
    }
}
