//! Forward pipe contract and the scalar reference backend.
//!
//! A `ForwardPipe` owns the convolutional body of the network: the input
//! convolution, the residual tower, the policy convolution(s) and the value
//! convolution (plus optional pooling). The dense heads stay with the
//! evaluator. Pipes may batch requests from many worker threads internally;
//! from the caller's side `forward` is a synchronous, blocking call.
//!
//! `drain`/`resume` implement cooperative cancellation: while drained,
//! in-flight and new forward calls fail with [`EvalError::Halted`] and the
//! calling simulation unwinds.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::EvalError;
use crate::weights::PipeWeights;
use crate::winograd::{self, WINOGRAD_TILE};

/// Contract between the evaluator and a forward backend.
pub trait ForwardPipe: Send + Sync {
    /// Prepare the backend for a network with the given channel count.
    fn initialize(&mut self, channels: usize) -> Result<(), EvalError>;

    /// Hand the (already transformed) convolutional weights to the backend.
    fn push_weights(
        &mut self,
        filter_dim: usize,
        input_planes: usize,
        channels: usize,
        weights: &PipeWeights,
    ) -> Result<(), EvalError>;

    /// Run the convolutional body. `policy` receives
    /// `policy_outputs * board²` activations, `value` receives
    /// `value_channels * board²` (pooled channels when pooling is present).
    fn forward(&self, input: &[f32], policy: &mut [f32], value: &mut [f32])
        -> Result<(), EvalError>;

    /// Ask in-flight and future evaluations to fail fast with `Halted`.
    fn drain(&self);

    /// Reopen the pipe for business after a drain.
    fn resume(&self);
}

/// Batch normalization with fused bias (the mean already carries the conv
/// bias) and ReLU, optionally adding a residual input element-wise.
pub(crate) fn batchnorm(
    channels: usize,
    spatial: usize,
    data: &mut [f32],
    means: &[f32],
    stddevs: &[f32],
    residual: Option<&[f32]>,
) {
    for c in 0..channels {
        let mean = means[c];
        let scale = stddevs[c];
        let row = &mut data[c * spatial..][..spatial];
        match residual {
            None => {
                for v in row.iter_mut() {
                    *v = (scale * (*v - mean)).max(0.0);
                }
            }
            Some(res) => {
                let res_row = &res[c * spatial..][..spatial];
                for (v, r) in row.iter_mut().zip(res_row) {
                    *v = (scale * (*v - mean) + r).max(0.0);
                }
            }
        }
    }
}

/// 1x1 convolution: a matrix product over the channel dimension applied at
/// every intersection. Weights are `[outputs][channels]` row-major.
pub(crate) fn convolve1(
    input: &[f32],
    weights: &[f32],
    output: &mut [f32],
    channels: usize,
    outputs: usize,
    spatial: usize,
) {
    debug_assert_eq!(weights.len(), channels * outputs);
    debug_assert_eq!(input.len(), channels * spatial);
    debug_assert_eq!(output.len(), outputs * spatial);
    for o in 0..outputs {
        let row = &mut output[o * spatial..][..spatial];
        for v in row.iter_mut() {
            *v = 0.0;
        }
        for c in 0..channels {
            let w = weights[o * channels + c];
            let in_row = &input[c * spatial..][..spatial];
            for (v, x) in row.iter_mut().zip(in_row) {
                *v += w * x;
            }
        }
    }
}

/// Scalar CPU backend.
///
/// Uses the Winograd F(4x4, 3x3) path for the tower so it consumes exactly
/// the transformed `U` weights the loader produces. Not fast; it exists as
/// the reference implementation and the backend used by tests.
pub struct CpuPipe {
    board_size: usize,
    channels: usize,
    input_planes: usize,
    weights: Option<PipeWeights>,
    drained: AtomicBool,
}

impl CpuPipe {
    pub fn new(board_size: usize) -> Self {
        Self {
            board_size,
            channels: 0,
            input_planes: 0,
            weights: None,
            drained: AtomicBool::new(false),
        }
    }

    fn weights(&self) -> Result<&PipeWeights, EvalError> {
        self.weights
            .as_ref()
            .ok_or_else(|| EvalError::BackendInit("forward pipe has no weights".into()))
    }
}

impl ForwardPipe for CpuPipe {
    fn initialize(&mut self, channels: usize) -> Result<(), EvalError> {
        self.channels = channels;
        Ok(())
    }

    fn push_weights(
        &mut self,
        filter_dim: usize,
        input_planes: usize,
        channels: usize,
        weights: &PipeWeights,
    ) -> Result<(), EvalError> {
        if filter_dim * filter_dim != WINOGRAD_TILE {
            return Err(EvalError::BackendInit(format!(
                "unsupported filter transform dimension {filter_dim}"
            )));
        }
        self.input_planes = input_planes;
        self.channels = channels;
        self.weights = Some(weights.clone());
        Ok(())
    }

    fn forward(
        &self,
        input: &[f32],
        policy: &mut [f32],
        value: &mut [f32],
    ) -> Result<(), EvalError> {
        if self.drained.load(Ordering::Acquire) {
            return Err(EvalError::Halted);
        }
        let w = self.weights()?;
        let bs = self.board_size;
        let n = bs * bs;
        let channels = self.channels;
        debug_assert_eq!(input.len(), self.input_planes * n);

        // Input convolution.
        let mut x = vec![0.0f32; channels * n];
        winograd::convolve3(input, &w.conv_weights[0], &mut x, self.input_planes, channels, bs);
        batchnorm(channels, n, &mut x, &w.bn_means[0], &w.bn_stddevs[0], None);

        // Residual tower.
        let blocks = (w.conv_weights.len() - 1) / 2;
        let mut buf1 = vec![0.0f32; channels * n];
        let mut buf2 = vec![0.0f32; channels * n];
        for b in 0..blocks {
            let i = 1 + 2 * b;
            winograd::convolve3(&x, &w.conv_weights[i], &mut buf1, channels, channels, bs);
            batchnorm(channels, n, &mut buf1, &w.bn_means[i], &w.bn_stddevs[i], None);
            winograd::convolve3(&buf1, &w.conv_weights[i + 1], &mut buf2, channels, channels, bs);
            batchnorm(
                channels,
                n,
                &mut buf2,
                &w.bn_means[i + 1],
                &w.bn_stddevs[i + 1],
                Some(&x),
            );
            std::mem::swap(&mut x, &mut buf2);
        }

        // Policy convolution(s): 1x1 layers; inside a tower, every second
        // layer carries the skip connection when the widths line up.
        let layers = w.conv_pol_b.len();
        let mut pol = {
            let outputs = w.conv_pol_b[0].len();
            let mut out = vec![0.0f32; outputs * n];
            convolve1(&x, &w.conv_pol_w[0], &mut out, channels, outputs, n);
            batchnorm(outputs, n, &mut out, &w.bn_pol_w1[0], &w.bn_pol_w2[0], None);
            out
        };
        for i in 1..layers {
            let inputs = w.conv_pol_b[i - 1].len();
            let outputs = w.conv_pol_b[i].len();
            let mut out = vec![0.0f32; outputs * n];
            convolve1(&pol, &w.conv_pol_w[i], &mut out, inputs, outputs, n);
            let skip = inputs == outputs && i % 2 == 0;
            let residual = if skip { Some(pol.as_slice()) } else { None };
            batchnorm(outputs, n, &mut out, &w.bn_pol_w1[i], &w.bn_pol_w2[i], residual);
            pol = out;
        }
        policy.copy_from_slice(&pol);

        // Value convolution, then optional pooling convolution.
        let val_outputs = w.conv_val_b.len();
        let mut val = vec![0.0f32; val_outputs * n];
        convolve1(&x, &w.conv_val_w, &mut val, channels, val_outputs, n);
        batchnorm(val_outputs, n, &mut val, &w.bn_val_w1, &w.bn_val_w2, None);

        if !w.conv_val_pool_b.is_empty() {
            let pool_outputs = w.conv_val_pool_b.len();
            let mut pooled = vec![0.0f32; pool_outputs * n];
            convolve1(&val, &w.conv_val_pool_w, &mut pooled, val_outputs, pool_outputs, n);
            batchnorm(
                pool_outputs,
                n,
                &mut pooled,
                &w.bn_val_pool_w1,
                &w.bn_val_pool_w2,
                None,
            );
            value.copy_from_slice(&pooled);
        } else {
            value.copy_from_slice(&val);
        }

        // A drain that raced the computation still cancels the result; the
        // caller unwinds instead of consuming a value nobody waits for.
        if self.drained.load(Ordering::Acquire) {
            return Err(EvalError::Halted);
        }
        Ok(())
    }

    fn drain(&self) {
        self.drained.store(true, Ordering::Release);
    }

    fn resume(&self) {
        self.drained.store(false, Ordering::Release);
    }
}
