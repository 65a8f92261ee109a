//! The evaluator front-end.
//!
//! `Network` ties together feature gathering, the forward pipe, dense-head
//! post-processing and the evaluation cache. It is shared by reference
//! across all search workers; every method takes `&self`.

use rand::Rng;
use rand_chacha::ChaCha20Rng;
use tracing::info;

use tengen_core::{Color, GameState, SymmetryTable, IDENTITY_SYMMETRY, NUM_SYMMETRIES};

use crate::cache::{Netresult, NnCache};
use crate::config::NetConfig;
use crate::error::{EvalError, NetError};
use crate::features::gather_features;
use crate::forward::{CpuPipe, ForwardPipe};
use crate::sigmoid::sigmoid;
use crate::weights::{
    load_weights_file, Architecture, HeadWeights, LoadedNetwork, ValueHeadType,
};
use crate::winograd::WINOGRAD_ALPHA;

/// Residual skips between alternating layers of the value dense tower.
const RESDENSE_IN_VALUE_HEAD: bool = true;

/// How evaluations combine board symmetries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensemble {
    /// One forward pass under the given symmetry.
    Direct(usize),
    /// One forward pass under a uniformly drawn symmetry.
    RandomSymmetry,
    /// Mean over all eight symmetries.
    Average,
}

/// Dense layer: `y = W.x + b`, optional ReLU.
fn innerproduct(input: &[f32], weights: &[f32], biases: &[f32], relu: bool) -> Vec<f32> {
    let inputs = input.len();
    let outputs = biases.len();
    debug_assert_eq!(weights.len(), inputs * outputs);
    let mut out = Vec::with_capacity(outputs);
    for o in 0..outputs {
        let row = &weights[o * inputs..][..inputs];
        let mut acc = 0.0f32;
        for (w, x) in row.iter().zip(input) {
            acc += w * x;
        }
        let val = acc + biases[o];
        out.push(if relu { val.max(0.0) } else { val });
    }
    out
}

/// Batch norm over a flat (spatial size 1) activation vector, with fused
/// bias in the mean, ReLU, and optional residual add.
fn batchnorm_dense(data: &mut [f32], means: &[f32], stddevs: &[f32], residual: Option<&[f32]>) {
    match residual {
        None => {
            for ((v, m), s) in data.iter_mut().zip(means).zip(stddevs) {
                *v = (*s * (*v - *m)).max(0.0);
            }
        }
        Some(res) => {
            for (((v, m), s), r) in data.iter_mut().zip(means).zip(stddevs).zip(res) {
                *v = (*s * (*v - *m) + *r).max(0.0);
            }
        }
    }
}

fn softmax(input: &[f32], temperature: f32) -> Vec<f32> {
    let max = input.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut out = Vec::with_capacity(input.len());
    let mut denom = 0.0f32;
    for &v in input {
        let e = ((v - max) / temperature).exp();
        denom += e;
        out.push(e);
    }
    for v in &mut out {
        *v /= denom;
    }
    out
}

/// Collapse a `[channels][area]` tensor to per-channel spatial means.
fn reduce_mean(layer: &mut Vec<f32>, area: usize) {
    let channels = layer.len() / area;
    debug_assert_eq!(channels * area, layer.len());
    let mut out = Vec::with_capacity(channels);
    for c in 0..channels {
        let sum: f32 = layer[c * area..][..area].iter().sum();
        out.push(sum / area as f32);
    }
    *layer = out;
}

/// The neural evaluator.
pub struct Network<P: ForwardPipe = CpuPipe> {
    cfg: NetConfig,
    arch: Architecture,
    heads: HeadWeights,
    pipe: P,
    cache: NnCache,
    symmetries: SymmetryTable,
    estimated_size: usize,
}

impl Network<CpuPipe> {
    /// Load a network from a weights file onto the scalar reference
    /// backend.
    pub fn from_weights_file(
        path: impl AsRef<std::path::Path>,
        cfg: NetConfig,
        playouts: usize,
    ) -> Result<Self, NetError> {
        let loaded = load_weights_file(path, cfg.board_size)?;
        let pipe = CpuPipe::new(cfg.board_size);
        Self::with_pipe(loaded, cfg, playouts, pipe)
    }
}

impl<P: ForwardPipe> Network<P> {
    /// Wire a parsed network onto an arbitrary forward backend.
    pub fn with_pipe(
        loaded: LoadedNetwork,
        cfg: NetConfig,
        playouts: usize,
        mut pipe: P,
    ) -> Result<Self, NetError> {
        let arch = loaded.arch.clone();
        pipe.initialize(arch.channels)?;
        pipe.push_weights(
            WINOGRAD_ALPHA,
            arch.input_planes,
            arch.channels,
            &loaded.pipe_weights,
        )?;

        let cache = NnCache::new(NnCache::MIN_CACHE_COUNT);
        if cfg.use_cache {
            cache.set_size_from_playouts(playouts);
        } else {
            cache.resize(10);
        }

        let estimated_size = loaded.estimated_size();
        info!(
            channels = arch.channels,
            blocks = arch.residual_blocks,
            sai = arch.is_sai(),
            weight_bytes = estimated_size,
            "network initialized"
        );

        Ok(Self {
            symmetries: SymmetryTable::new(arch.board_size),
            cfg,
            arch,
            heads: loaded.heads,
            pipe,
            cache,
            estimated_size,
        })
    }

    #[inline]
    pub fn arch(&self) -> &Architecture {
        &self.arch
    }

    #[inline]
    pub fn config(&self) -> &NetConfig {
        &self.cfg
    }

    #[inline]
    pub fn symmetries(&self) -> &SymmetryTable {
        &self.symmetries
    }

    /// Rough weight memory footprint in bytes.
    pub fn estimated_size(&self) -> usize {
        self.estimated_size
    }

    pub fn cache_estimated_size(&self) -> usize {
        self.cache.estimated_size()
    }

    pub fn cache_resize(&self, max_count: usize) {
        self.cache.resize(max_count);
    }

    pub fn cache_clear(&self) {
        self.cache.clear();
    }

    /// `(hits, lookups)` on the evaluation cache.
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    /// Ask in-flight and future forward calls to fail with `Halted`.
    pub fn drain_evals(&self) {
        self.pipe.drain();
    }

    /// Reopen the pipe after a drain.
    pub fn resume_evals(&self) {
        self.pipe.resume();
    }

    /// Recompute a SAI result's winrate from `(alpha, beta, beta2)` and
    /// the state's current komi adjustment. Komi is not part of the cache
    /// key, so this runs after every cache read.
    pub fn sai_winrate<S: GameState>(&self, result: &mut Netresult, state: &S) -> f32 {
        let komi = state.komi_adj();
        let bonus = match state.to_move() {
            Color::White => komi,
            Color::Black => -komi,
        };
        result.value = sigmoid(result.alpha, result.beta, bonus, result.beta2).0;
        result.value
    }

    /// Evaluate a position.
    pub fn get_output<S: GameState>(
        &self,
        state: &S,
        ensemble: Ensemble,
        read_cache: bool,
        write_cache: bool,
        rng: &mut ChaCha20Rng,
    ) -> Result<Netresult, EvalError> {
        if state.board_size() != self.arch.board_size {
            return Err(EvalError::BoardSize {
                got: state.board_size(),
                expected: self.arch.board_size,
            });
        }

        if read_cache && ensemble != Ensemble::Average {
            if let Some(result) = self.probe_cache(state) {
                return Ok(result);
            }
        }

        let n = self.arch.num_intersections();
        let mut result = match ensemble {
            Ensemble::Direct(symmetry) => {
                debug_assert!(symmetry < NUM_SYMMETRIES);
                self.get_output_internal(state, symmetry)?
            }
            Ensemble::RandomSymmetry => {
                let symmetry = rng.gen_range(0..NUM_SYMMETRIES);
                self.get_output_internal(state, symmetry)?
            }
            Ensemble::Average => {
                let mut acc = Netresult::new(n);
                acc.beta = 0.0;
                acc.beta2 = 0.0;
                let share = 1.0 / NUM_SYMMETRIES as f32;
                for symmetry in 0..NUM_SYMMETRIES {
                    let tmp = self.get_output_internal(state, symmetry)?;
                    acc.policy_pass += tmp.policy_pass * share;
                    acc.value += tmp.value * share;
                    acc.alpha += tmp.alpha * share;
                    acc.beta += tmp.beta * share;
                    acc.beta2 += tmp.beta2 * share;
                    acc.is_sai = tmp.is_sai;
                    for (out, p) in acc.policy.iter_mut().zip(&tmp.policy) {
                        *out += p * share;
                    }
                }
                acc
            }
        };

        // ELF-style nets return the Black value rather than side to move.
        if self.arch.value_head_not_stm && state.to_move() == Color::White {
            result.value = 1.0 - result.value;
        }

        if write_cache {
            // Under Average this stores the averaged result for the raw
            // hash only; a later direct evaluation of the same position
            // will read it back.
            self.cache.insert(state.hash(), result.clone());
        }

        Ok(result)
    }

    /// Check the cache on the raw hash, then (in the early opening, when
    /// self-play randomness is off) on the seven transformed hashes,
    /// un-permuting the cached policy on a symmetric hit.
    fn probe_cache<S: GameState>(&self, state: &S) -> Option<Netresult> {
        let n = self.arch.num_intersections();
        let mut result = Netresult::new(n);
        let mut hit = self.cache.lookup(state.hash(), &mut result);

        if !hit
            && !self.cfg.randomized
            && state.move_num() < self.cfg.opening_moves / 2
        {
            for symmetry in 0..NUM_SYMMETRIES {
                if symmetry == IDENTITY_SYMMETRY {
                    continue;
                }
                if self.cache.lookup(state.symmetry_hash(symmetry), &mut result) {
                    let mut corrected = vec![0.0f32; n];
                    for (idx, out) in corrected.iter_mut().enumerate() {
                        *out = result.policy[self.symmetries.index(symmetry, idx)];
                    }
                    result.policy = corrected;
                    hit = true;
                    break;
                }
            }
        }

        if hit && result.is_sai {
            self.sai_winrate(&mut result, state);
        }
        hit.then_some(result)
    }

    fn get_output_internal<S: GameState>(
        &self,
        state: &S,
        symmetry: usize,
    ) -> Result<Netresult, EvalError> {
        let arch = &self.arch;
        let heads = &self.heads;
        let n = arch.num_intersections();

        let input = gather_features(state, symmetry, arch, &self.symmetries);
        let mut policy_data = vec![0.0f32; arch.policy_outputs * n];
        let mut val_data = vec![0.0f32; arch.value_outputs_spatial() * n];
        self.pipe.forward(&input, &mut policy_data, &mut val_data)?;

        // Policy head.
        let policy_out = innerproduct(&policy_data, &heads.ip_pol_w, &heads.ip_pol_b, false);
        let outputs = softmax(&policy_out, self.cfg.softmax_temp);

        // Value head: optional pooling, then the optional dense residual
        // tower. The skip pattern alternates, with the starting parity
        // shifted by one when the first layer changes dimension.
        if arch.val_pool_outputs > 0 {
            reduce_mean(&mut val_data, n);
        }
        let mut res: Vec<f32> = vec![0.0; val_data.len()];
        let mut parity = 0usize;
        for i in 0..heads.vh_dense_weights.len() {
            if i == 0 && val_data.len() != heads.vh_dense_biases[0].len() {
                val_data = innerproduct(
                    &val_data,
                    &heads.vh_dense_weights[i],
                    &heads.vh_dense_biases[i],
                    false,
                );
                batchnorm_dense(
                    &mut val_data,
                    &heads.vh_dense_bn_means[i],
                    &heads.vh_dense_bn_vars[i],
                    None,
                );
                parity = 1;
            } else if !RESDENSE_IN_VALUE_HEAD || i % 2 == parity {
                std::mem::swap(&mut val_data, &mut res);
                val_data = innerproduct(
                    &res,
                    &heads.vh_dense_weights[i],
                    &heads.vh_dense_biases[i],
                    false,
                );
                batchnorm_dense(
                    &mut val_data,
                    &heads.vh_dense_bn_means[i],
                    &heads.vh_dense_bn_vars[i],
                    None,
                );
            } else {
                val_data = innerproduct(
                    &val_data,
                    &heads.vh_dense_weights[i],
                    &heads.vh_dense_biases[i],
                    false,
                );
                batchnorm_dense(
                    &mut val_data,
                    &heads.vh_dense_bn_means[i],
                    &heads.vh_dense_bn_vars[i],
                    Some(&res),
                );
            }
        }

        let val_channels = innerproduct(&val_data, &heads.ip1_val_w, &heads.ip1_val_b, true);
        let val_output = innerproduct(&val_channels, &heads.ip2_val_w, &heads.ip2_val_b, false);

        let mut result = Netresult::new(n);

        if arch.value_head_type == ValueHeadType::Single {
            // Single-output nets emit winrate logits.
            result.alpha = 2.0 * val_output[0];
            result.beta = 1.0;
            result.value = sigmoid(result.alpha, 1.0, 0.0, -1.0).0;
            result.is_sai = false;
        } else {
            match arch.value_head_type {
                ValueHeadType::DoubleY => {
                    let vbe_channels =
                        innerproduct(&val_data, &heads.ip1_vbe_w, &heads.ip1_vbe_b, true);
                    let vbe_output =
                        innerproduct(&vbe_channels, &heads.ip2_vbe_w, &heads.ip2_vbe_b, false);
                    result.beta = vbe_output[0];
                    if arch.vbe_head_rets == 2 {
                        result.beta2 = vbe_output[1];
                    }
                }
                ValueHeadType::DoubleT => {
                    let vbe_output =
                        innerproduct(&val_channels, &heads.ip2_vbe_w, &heads.ip2_vbe_b, false);
                    result.beta = vbe_output[0];
                    if arch.vbe_head_rets == 2 {
                        result.beta2 = vbe_output[1];
                    }
                }
                ValueHeadType::DoubleI => {
                    result.beta = val_output[1];
                    if arch.vbe_head_rets == 2 {
                        result.beta2 = val_output[2];
                    }
                }
                ValueHeadType::Single => unreachable!(),
            }

            if !arch.quartile_encoding {
                result.alpha = val_output[0];
                let beta_nat_tune = self.cfg.beta_tune * std::f32::consts::LN_2;
                result.beta = (result.beta + beta_nat_tune).exp() * 10.0 / n as f32;
                if arch.vbe_head_rets == 2 {
                    result.beta2 = (result.beta2 + beta_nat_tune).exp() * 10.0 / n as f32;
                }
            } else {
                // The two outputs encode the first and second quartiles of
                // the score distribution.
                let q1 = val_output[0];
                let q2 = result.beta;
                const EPS: f32 = 0.05;
                const TWO_LOG3: f32 = 2.197_224_6;
                result.alpha = 0.5 * (q1 + q2);
                result.beta = TWO_LOG3 / (EPS + (q2 - q1).max(0.0));
            }

            result.is_sai = true;
            self.sai_winrate(&mut result, state);
        }

        // Permute the policy back to board coordinates.
        for (idx, &p) in outputs[..n].iter().enumerate() {
            result.policy[self.symmetries.index(symmetry, idx)] = p;
        }
        result.policy_pass = outputs[n];

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_innerproduct() {
        // 2 inputs, 2 outputs: y0 = x0 + 2*x1, y1 = -x0 + 1.
        let out = innerproduct(&[1.0, 2.0], &[1.0, 2.0, -1.0, 0.0], &[0.0, 1.0], false);
        assert_eq!(out, vec![5.0, 0.0]);
        let relu = innerproduct(&[1.0, 2.0], &[1.0, 2.0, -1.0, 0.0], &[0.0, -1.0], true);
        assert_eq!(relu, vec![5.0, 0.0]);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let out = softmax(&[0.1, 1.0, -2.0, 3.0], 1.0);
        let sum: f32 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(out.iter().all(|&p| p >= 0.0));
        // Higher logits get more mass.
        assert!(out[3] > out[1]);
    }

    #[test]
    fn test_softmax_temperature_flattens() {
        let cold = softmax(&[0.0, 1.0], 0.5);
        let hot = softmax(&[0.0, 1.0], 4.0);
        assert!(cold[1] > hot[1]);
    }

    #[test]
    fn test_reduce_mean() {
        let mut layer = vec![1.0, 3.0, 10.0, 20.0];
        reduce_mean(&mut layer, 2);
        assert_eq!(layer, vec![2.0, 15.0]);
    }
}
