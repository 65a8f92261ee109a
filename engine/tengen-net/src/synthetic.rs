//! Synthetic weights files.
//!
//! Generates small, well-formed weights files with deterministic values so
//! tests and benchmarks can exercise the loader and evaluator without
//! shipping a real network. Values are tiny and repeatable; batch-norm
//! variances are 1 and biases 0 so the post-load folding is easy to check.

use std::ops::Range;

/// Deterministic weight value for position `i` within a line.
pub(crate) fn weight_value(i: usize) -> f32 {
    ((i % 17) as f32 - 8.0) / 1000.0
}

/// Beta subhead shape for synthetic SAI nets.
#[derive(Debug, Clone, Copy)]
pub enum VbeHead {
    /// Own hidden layer (DOUBLE_Y).
    TypeY { vbe_chans: usize, rets: usize },
    /// Output layer reusing the alpha hidden activation (DOUBLE_T).
    TypeT { rets: usize },
}

/// Builder for a synthetic weights file.
#[derive(Debug, Clone)]
pub struct SyntheticNet {
    pub board_size: usize,
    pub channels: usize,
    pub residual_blocks: usize,
    pub input_moves: usize,
    pub include_color: bool,
    pub policy_outputs: usize,
    pub val_outputs: usize,
    pub val_pool_outputs: Option<usize>,
    pub dense_tower_layers: usize,
    pub value_channels: usize,
    pub val_chans: usize,
    /// Outputs of the alpha dense layer: 1 = SINGLE, 2/3 = DOUBLE_I.
    pub value_head_rets: usize,
    pub vbe: Option<VbeHead>,
    /// Zero out every dense head so alpha and the raw beta output are
    /// exactly 0.
    pub zero_heads: bool,
}

impl SyntheticNet {
    /// An LZ-shaped net: single value head, one value filter.
    pub fn single(board_size: usize, channels: usize, residual_blocks: usize) -> Self {
        Self {
            board_size,
            channels,
            residual_blocks,
            input_moves: 8,
            include_color: true,
            policy_outputs: 2,
            val_outputs: 1,
            val_pool_outputs: None,
            dense_tower_layers: 0,
            value_channels: 0,
            val_chans: 8,
            value_head_rets: 1,
            vbe: None,
            zero_heads: false,
        }
    }

    /// A SAI net with a separate beta subhead (DOUBLE_Y).
    pub fn double_y(board_size: usize, channels: usize, residual_blocks: usize) -> Self {
        let mut net = Self::single(board_size, channels, residual_blocks);
        net.val_outputs = 2;
        net.val_chans = 4;
        net.vbe = Some(VbeHead::TypeY {
            vbe_chans: 3,
            rets: 1,
        });
        net
    }

    /// The deterministic values a weights line carries at these positions.
    pub fn value_at(range: Range<usize>) -> Vec<f32> {
        range.map(weight_value).collect()
    }

    pub fn render(&self) -> String {
        self.render_with_version(1)
    }

    pub fn render_with_version(&self, version: i64) -> String {
        let n = self.board_size * self.board_size;
        let input_planes = self.input_moves * 2 + if self.include_color { 2 } else { 1 };

        let mut out = String::new();
        out.push_str(&format!("{version}\n"));

        let weights_line = |out: &mut String, count: usize| {
            let mut line = String::new();
            for i in 0..count {
                if i > 0 {
                    line.push(' ');
                }
                line.push_str(&format!("{}", weight_value(i)));
            }
            line.push('\n');
            out.push_str(&line);
        };
        let const_line = |out: &mut String, count: usize, value: f32| {
            let mut line = String::new();
            for i in 0..count {
                if i > 0 {
                    line.push(' ');
                }
                line.push_str(&format!("{value}"));
            }
            line.push('\n');
            out.push_str(&line);
        };
        let conv_block = |out: &mut String, weight_count: usize, channels: usize| {
            weights_line(out, weight_count);
            const_line(out, channels, 0.0); // biases
            const_line(out, channels, 0.0); // bn means
            const_line(out, channels, 1.0); // bn variances
        };
        let head_line = |out: &mut String, count: usize, zero: bool| {
            if zero {
                const_line(out, count, 0.0);
            } else {
                weights_line(out, count);
            }
        };

        // Input convolution and residual tower.
        conv_block(&mut out, input_planes * 9 * self.channels, self.channels);
        for _ in 0..2 * self.residual_blocks {
            conv_block(&mut out, self.channels * 9 * self.channels, self.channels);
        }

        // Policy head: legacy single convolution plus dense layer.
        conv_block(&mut out, self.channels * self.policy_outputs, self.policy_outputs);
        weights_line(&mut out, self.policy_outputs * n * (n + 1));
        const_line(&mut out, n + 1, 0.0);

        // Value convolution, optional pooling.
        conv_block(&mut out, self.channels * self.val_outputs, self.val_outputs);
        let mut val_dense_inputs = n * self.val_outputs;
        if let Some(pool) = self.val_pool_outputs {
            conv_block(&mut out, self.val_outputs * pool, pool);
            val_dense_inputs = pool;
        }

        // Optional dense residual tower.
        let mut head_inputs = val_dense_inputs;
        for layer in 0..self.dense_tower_layers {
            let inputs = if layer == 0 {
                val_dense_inputs
            } else {
                self.value_channels
            };
            conv_block(&mut out, inputs * self.value_channels, self.value_channels);
            head_inputs = self.value_channels;
        }

        // Alpha head.
        head_line(&mut out, head_inputs * self.val_chans, self.zero_heads);
        const_line(&mut out, self.val_chans, 0.0);
        head_line(
            &mut out,
            self.val_chans * self.value_head_rets,
            self.zero_heads,
        );
        const_line(&mut out, self.value_head_rets, 0.0);

        // Beta subhead.
        match self.vbe {
            Some(VbeHead::TypeY { vbe_chans, rets }) => {
                head_line(&mut out, head_inputs * vbe_chans, self.zero_heads);
                const_line(&mut out, vbe_chans, 0.0);
                head_line(&mut out, vbe_chans * rets, self.zero_heads);
                const_line(&mut out, rets, 0.0);
            }
            Some(VbeHead::TypeT { rets }) => {
                head_line(&mut out, self.val_chans * rets, self.zero_heads);
                const_line(&mut out, rets, 0.0);
            }
            None => {}
        }

        out
    }
}
