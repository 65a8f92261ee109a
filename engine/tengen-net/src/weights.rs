//! Weights file parsing.
//!
//! The network ships as line-oriented text, optionally gzip-compressed.
//! Line 1 is an integer format version whose bits encode input-feature
//! flags. Every following line is one flat parameter array. Lines are
//! grouped into blocks of four `{weights, biases, bn_mean, bn_var}` and
//! assigned to semantic sections by a small state machine; dense head
//! sections occupy only two lines, so up to two lines are pushed back and
//! re-consumed as the start of the next section.
//!
//! The architecture is never declared explicitly: channel counts, residual
//! depth, the presence of value-head pooling and the value-head variant are
//! all inferred from line lengths as the sections go by.

use std::io::Read;
use std::path::Path;

use tracing::{debug, info};

use crate::error::WeightsError;
use crate::winograd::transform_filters;

/// Bits accepted in the format version. Bits 0-1 select LZ (1) or
/// ELF-style black-perspective value (2); bits 4, 6, 7, 8 are feature
/// flags. Anything outside this mask is rejected.
const VERSION_MASK: i64 = 0x1FF;

/// Variant of the value head, inferred from the tail sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueHeadType {
    /// One output: logits of a plain winrate (Leela Zero style).
    Single,
    /// Alpha and beta share one dense output layer.
    DoubleI,
    /// Beta has its own hidden+output dense layers.
    DoubleY,
    /// Beta output reuses alpha's hidden activation.
    DoubleT,
}

/// Architecture parameters derived while parsing.
#[derive(Debug, Clone)]
pub struct Architecture {
    pub board_size: usize,
    pub channels: usize,
    pub residual_blocks: usize,
    pub input_planes: usize,
    pub input_moves: usize,
    pub include_color: bool,
    pub adv_features: bool,
    pub chainlibs_features: bool,
    pub chainsize_features: bool,
    pub quartile_encoding: bool,
    pub value_head_not_stm: bool,
    pub policy_conv_layers: usize,
    pub policy_channels: usize,
    pub policy_outputs: usize,
    pub value_channels: usize,
    pub val_dense_inputs: usize,
    pub val_outputs: usize,
    pub val_pool_outputs: usize,
    pub val_chans: usize,
    pub vbe_chans: usize,
    pub value_head_rets: usize,
    pub val_head_rets: usize,
    pub vbe_head_rets: usize,
    pub value_head_type: ValueHeadType,
}

impl Architecture {
    #[inline]
    pub fn num_intersections(&self) -> usize {
        self.board_size * self.board_size
    }

    /// Policy outputs including the pass slot.
    #[inline]
    pub fn potential_moves(&self) -> usize {
        self.num_intersections() + 1
    }

    /// Whether the net carries a SAI (alpha/beta) value head.
    #[inline]
    pub fn is_sai(&self) -> bool {
        self.value_head_type != ValueHeadType::Single
    }

    /// Channel count of the spatial value tensor produced by the pipe.
    #[inline]
    pub fn value_outputs_spatial(&self) -> usize {
        if self.val_pool_outputs > 0 {
            self.val_pool_outputs
        } else {
            self.val_outputs
        }
    }
}

/// Convolutional weights handed to the forward pipe. The 3x3 filters are
/// already in the Winograd `U` layout, biases are folded into the
/// batch-norm means, and the stored "variances" are `1/sqrt(var + eps)`.
#[derive(Debug, Clone, Default)]
pub struct PipeWeights {
    pub conv_weights: Vec<Vec<f32>>,
    pub conv_biases: Vec<Vec<f32>>,
    pub bn_means: Vec<Vec<f32>>,
    pub bn_stddevs: Vec<Vec<f32>>,

    pub conv_pol_w: Vec<Vec<f32>>,
    pub conv_pol_b: Vec<Vec<f32>>,
    pub bn_pol_w1: Vec<Vec<f32>>,
    pub bn_pol_w2: Vec<Vec<f32>>,

    pub conv_val_w: Vec<f32>,
    pub conv_val_b: Vec<f32>,
    pub bn_val_w1: Vec<f32>,
    pub bn_val_w2: Vec<f32>,

    pub conv_val_pool_w: Vec<f32>,
    pub conv_val_pool_b: Vec<f32>,
    pub bn_val_pool_w1: Vec<f32>,
    pub bn_val_pool_w2: Vec<f32>,
}

/// Dense head weights kept by the evaluator front-end.
#[derive(Debug, Clone, Default)]
pub struct HeadWeights {
    pub ip_pol_w: Vec<f32>,
    pub ip_pol_b: Vec<f32>,

    pub vh_dense_weights: Vec<Vec<f32>>,
    pub vh_dense_biases: Vec<Vec<f32>>,
    pub vh_dense_bn_means: Vec<Vec<f32>>,
    pub vh_dense_bn_vars: Vec<Vec<f32>>,

    pub ip1_val_w: Vec<f32>,
    pub ip1_val_b: Vec<f32>,
    pub ip2_val_w: Vec<f32>,
    pub ip2_val_b: Vec<f32>,

    pub ip1_vbe_w: Vec<f32>,
    pub ip1_vbe_b: Vec<f32>,
    pub ip2_vbe_w: Vec<f32>,
    pub ip2_vbe_b: Vec<f32>,
}

/// A fully parsed and post-transformed network.
#[derive(Debug, Clone)]
pub struct LoadedNetwork {
    pub arch: Architecture,
    pub pipe_weights: PipeWeights,
    pub heads: HeadWeights,
}

impl LoadedNetwork {
    /// Rough memory footprint of the weights, in bytes.
    pub fn estimated_size(&self) -> usize {
        let nested = |v: &Vec<Vec<f32>>| v.iter().map(|w| w.len() * 4).sum::<usize>();
        let p = &self.pipe_weights;
        let h = &self.heads;
        nested(&p.conv_weights)
            + nested(&p.conv_biases)
            + nested(&p.bn_means)
            + nested(&p.bn_stddevs)
            + nested(&p.conv_pol_w)
            + nested(&p.conv_pol_b)
            + nested(&p.bn_pol_w1)
            + nested(&p.bn_pol_w2)
            + 4 * (p.conv_val_w.len()
                + p.conv_val_b.len()
                + p.bn_val_w1.len()
                + p.bn_val_w2.len()
                + p.conv_val_pool_w.len()
                + p.conv_val_pool_b.len()
                + p.bn_val_pool_w1.len()
                + p.bn_val_pool_w2.len())
            + nested(&h.vh_dense_weights)
            + nested(&h.vh_dense_biases)
            + nested(&h.vh_dense_bn_means)
            + nested(&h.vh_dense_bn_vars)
            + 4 * (h.ip_pol_w.len()
                + h.ip_pol_b.len()
                + h.ip1_val_w.len()
                + h.ip1_val_b.len()
                + h.ip2_val_w.len()
                + h.ip2_val_b.len()
                + h.ip1_vbe_w.len()
                + h.ip1_vbe_b.len()
                + h.ip2_vbe_w.len()
                + h.ip2_vbe_b.len())
    }
}

/// Load and post-process a weights file, gzip or plain text.
pub fn load_weights_file(
    path: impl AsRef<Path>,
    board_size: usize,
) -> Result<LoadedNetwork, WeightsError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| WeightsError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;

    let text = if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = flate2::read::MultiGzDecoder::new(bytes.as_slice());
        let mut out = String::new();
        decoder
            .read_to_string(&mut out)
            .map_err(|source| WeightsError::Decompress {
                path: path.to_path_buf(),
                source,
            })?;
        out
    } else {
        String::from_utf8_lossy(&bytes).into_owned()
    };

    parse_weights(&text, board_size)
}

/// Parse the text form of a weights file.
pub fn parse_weights(text: &str, board_size: usize) -> Result<LoadedNetwork, WeightsError> {
    let mut lines = text.lines();
    let version_line = lines
        .next()
        .ok_or(WeightsError::Truncated { line: 0 })?
        .trim();
    let version: i64 = version_line
        .parse()
        .map_err(|_| WeightsError::WrongFormat { version: -1 })?;

    let lz_or_elf = version & 3;
    let extra_bits = version & !VERSION_MASK;
    if (lz_or_elf != 1 && lz_or_elf != 2) || extra_bits != 0 || version < 0 {
        return Err(WeightsError::WrongFormat { version });
    }

    let mut loader = Loader::new(board_size);
    loader.value_head_not_stm = lz_or_elf == 2;
    loader.adv_features = version & 16 != 0;
    loader.chainlibs_features = version & 64 != 0;
    loader.chainsize_features = version & 128 != 0;
    loader.quartile_encoding = version & 256 != 0;

    info!(
        version,
        elf = loader.value_head_not_stm,
        adv_features = loader.adv_features,
        chain_liberties = loader.chainlibs_features,
        chain_size = loader.chainsize_features,
        quartile_encoding = loader.quartile_encoding,
        "reading weights file"
    );

    loader.run(&mut lines)?;
    loader.finalize()
}

/// Semantic section of the weights file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    InputConv,
    ResconvTower,
    PolConvTower,
    PolDense,
    ValueConv,
    ValueAvgpool,
    ValueDenseTower,
    ValDenseHidden,
    ValDenseOut,
    VbeDenseHidden,
    VbeDenseOut,
}

struct Loader {
    board_size: usize,

    // Version flags.
    adv_features: bool,
    chainlibs_features: bool,
    chainsize_features: bool,
    quartile_encoding: bool,
    value_head_not_stm: bool,

    // Derived architecture.
    channels: usize,
    input_planes: usize,
    input_moves: usize,
    include_color: bool,
    residual_blocks: usize,
    policy_conv_layers: usize,
    policy_channels: usize,
    policy_outputs: usize,
    value_channels: usize,
    val_dense_inputs: usize,
    val_outputs: usize,
    val_pool_outputs: usize,
    val_chans: usize,
    vbe_chans: usize,
    value_head_rets: usize,
    val_head_rets: usize,
    vbe_head_rets: usize,
    value_head_type: ValueHeadType,

    pipe: PipeWeights,
    heads: HeadWeights,

    // Cursor state.
    section: Section,
    previous: Section,
    line: usize,
    excess: usize,
    complete: bool,
}

impl Loader {
    fn new(board_size: usize) -> Self {
        Self {
            board_size,
            adv_features: false,
            chainlibs_features: false,
            chainsize_features: false,
            quartile_encoding: false,
            value_head_not_stm: false,
            channels: 0,
            input_planes: 0,
            input_moves: 0,
            include_color: true,
            residual_blocks: 0,
            policy_conv_layers: 0,
            policy_channels: 0,
            policy_outputs: 0,
            value_channels: 0,
            val_dense_inputs: 0,
            val_outputs: 1,
            val_pool_outputs: 0,
            val_chans: 0,
            vbe_chans: 0,
            value_head_rets: 0,
            val_head_rets: 0,
            vbe_head_rets: 0,
            value_head_type: ValueHeadType::Single,
            pipe: PipeWeights::default(),
            heads: HeadWeights::default(),
            section: Section::None,
            previous: Section::None,
            line: 1,
            excess: 0,
            complete: false,
        }
    }

    #[inline]
    fn num_intersections(&self) -> usize {
        self.board_size * self.board_size
    }

    #[inline]
    fn potential_moves(&self) -> usize {
        self.num_intersections() + 1
    }

    fn read_line(
        &mut self,
        lines: &mut std::str::Lines<'_>,
    ) -> Result<Option<Vec<f32>>, WeightsError> {
        let Some(text) = lines.next() else {
            return Ok(None);
        };
        self.line += 1;
        let mut values = Vec::new();
        for token in text.split_ascii_whitespace() {
            let value: f32 = token
                .parse()
                .map_err(|_| WeightsError::Malformed { line: self.line })?;
            values.push(value);
        }
        Ok(Some(values))
    }

    /// Drive the state machine over every four-line block.
    fn run(&mut self, lines: &mut std::str::Lines<'_>) -> Result<(), WeightsError> {
        let mut layer: [Vec<f32>; 4] = Default::default();

        loop {
            let mut missing = 0;
            let excess = self.excess;
            debug_assert!(excess < 4);
            for i in 0..4 {
                if i < excess {
                    let carried = std::mem::take(&mut layer[4 - excess + i]);
                    layer[i] = carried;
                } else {
                    match self.read_line(lines)? {
                        Some(values) => layer[i] = values,
                        None => {
                            layer[i].clear();
                            missing += 1;
                        }
                    }
                }
            }
            self.excess = 0;

            if missing < 4 {
                self.identify(&layer);
                self.set_parameters(&layer)?;
                self.store(&mut layer)?;
            }

            if missing > 0 {
                break;
            }
        }

        if !self.complete {
            return Err(WeightsError::Truncated { line: self.line });
        }
        Ok(())
    }

    fn identify(&mut self, layer: &[Vec<f32>; 4]) {
        use Section::*;
        self.previous = self.section;
        self.section = match self.section {
            None => InputConv,
            InputConv => ResconvTower,
            ResconvTower => {
                if layer[0].len() == self.channels * 9 * self.channels {
                    ResconvTower
                } else {
                    PolConvTower
                }
            }
            PolConvTower => {
                if layer[1].len() == layer[3].len() {
                    PolConvTower
                } else {
                    PolDense
                }
            }
            PolDense => ValueConv,
            ValueConv if layer[0].len() % self.num_intersections() != 0 => ValueAvgpool,
            ValueConv | ValueAvgpool | ValueDenseTower => {
                if layer[1].len() == layer[3].len() {
                    ValueDenseTower
                } else {
                    ValDenseHidden
                }
            }
            ValDenseHidden => ValDenseOut,
            ValDenseOut => {
                if !layer[2].is_empty() {
                    VbeDenseHidden
                } else {
                    VbeDenseOut
                }
            }
            VbeDenseHidden => VbeDenseOut,
            s => s,
        };
    }

    fn set_parameters(&mut self, layer: &[Vec<f32>; 4]) -> Result<(), WeightsError> {
        use Section::*;
        match self.section {
            InputConv => {
                self.channels = layer[1].len();
                if self.channels == 0 {
                    return Err(WeightsError::DimMismatch {
                        line: self.line,
                        expected: 1,
                        got: 0,
                    });
                }
                self.input_planes = layer[0].len() / 9 / self.channels;
                // Even plane counts carry two side-to-move color planes,
                // odd ones a single all-ones plane.
                self.include_color = self.input_planes % 2 == 0;

                let feature_planes = 2
                    + if self.adv_features { 2 } else { 0 }
                    + if self.chainlibs_features { 4 } else { 0 }
                    + if self.chainsize_features { 4 } else { 0 };
                let color_planes = if self.include_color { 2 } else { 1 };
                if self.input_planes <= color_planes {
                    return Err(WeightsError::Unsupported(format!(
                        "implausible input plane count {}",
                        self.input_planes
                    )));
                }
                self.input_moves = (self.input_planes - color_planes) / feature_planes;
                if self.input_planes != self.input_moves * feature_planes + color_planes {
                    return Err(WeightsError::Unsupported(format!(
                        "input plane count {} does not match the declared feature flags",
                        self.input_planes
                    )));
                }
                info!(
                    input_planes = self.input_planes,
                    input_moves = self.input_moves,
                    channels = self.channels,
                    "input convolution"
                );
            }
            PolConvTower => {
                if self.section != self.previous {
                    self.policy_outputs = layer[1].len();
                    self.policy_channels = self.policy_outputs;
                    self.residual_blocks = (self.pipe.conv_biases.len() - 1) / 2;
                    if self.pipe.conv_biases.len() != 1 + 2 * self.residual_blocks {
                        return Err(WeightsError::DimMismatch {
                            line: self.line,
                            expected: 1 + 2 * self.residual_blocks,
                            got: self.pipe.conv_biases.len(),
                        });
                    }
                    info!(residual_blocks = self.residual_blocks, "residual tower");
                } else {
                    self.policy_outputs = layer[1].len();
                }
            }
            PolDense => {
                self.policy_conv_layers = self.pipe.conv_pol_b.len();
                if self.policy_conv_layers == 1 {
                    debug!(filters = self.policy_outputs, "legacy policy convolution");
                } else {
                    debug!(
                        channels = self.policy_channels,
                        layers = self.policy_conv_layers,
                        filters = self.policy_outputs,
                        "policy convolution tower"
                    );
                }
            }
            ValueConv => {
                self.val_outputs = layer[1].len();
                self.val_dense_inputs = self.num_intersections() * self.val_outputs;
            }
            ValueAvgpool => {
                self.val_pool_outputs = layer[1].len();
                self.val_dense_inputs = self.val_pool_outputs;
                debug!(channels = self.val_pool_outputs, "value head pooling");
            }
            ValueDenseTower => {
                if self.section != self.previous {
                    self.value_channels = layer[1].len();
                }
            }
            ValDenseHidden => {
                self.val_chans = layer[1].len();
                if !self.heads.vh_dense_weights.is_empty() {
                    debug!(
                        channels = self.value_channels,
                        layers = self.heads.vh_dense_weights.len(),
                        "value head residual dense tower"
                    );
                }
            }
            ValDenseOut => {
                self.value_head_rets = layer[1].len();
                self.val_head_rets = self.value_head_rets;
                match self.value_head_rets {
                    1 => self.value_head_type = ValueHeadType::Single,
                    2 | 3 => {
                        self.value_head_type = ValueHeadType::DoubleI;
                        self.val_head_rets = 1;
                        self.vbe_head_rets = self.value_head_rets - 1;
                    }
                    n => {
                        return Err(WeightsError::Unsupported(format!(
                            "value head with {n} outputs"
                        )))
                    }
                }
                self.complete = true;
            }
            VbeDenseHidden => {
                if self.val_head_rets != 1 {
                    return Err(WeightsError::Unsupported(
                        "beta subhead after a multi-output value head".into(),
                    ));
                }
                self.value_head_type = ValueHeadType::DoubleY;
                self.vbe_chans = layer[1].len();
                debug!(
                    val_chans = self.val_chans,
                    vbe_chans = self.vbe_chans,
                    "double value head, type Y"
                );
                self.complete = false;
            }
            VbeDenseOut => {
                if self.val_head_rets != 1 {
                    return Err(WeightsError::Unsupported(
                        "beta subhead after a multi-output value head".into(),
                    ));
                }
                self.vbe_head_rets = layer[1].len();
                if !(1..=2).contains(&self.vbe_head_rets) {
                    return Err(WeightsError::Unsupported(format!(
                        "beta subhead with {} outputs",
                        self.vbe_head_rets
                    )));
                }
                self.value_head_rets = self.val_head_rets + self.vbe_head_rets;
                if self.value_head_type != ValueHeadType::DoubleY {
                    self.value_head_type = ValueHeadType::DoubleT;
                    debug!(
                        filters = self.val_outputs,
                        channels = self.val_chans,
                        "double value head, type T"
                    );
                }
                self.complete = true;
            }
            _ => {}
        }

        if self.quartile_encoding && self.vbe_head_rets > 1 {
            return Err(WeightsError::Unsupported(
                "more than one beta head with quartile encoding".into(),
            ));
        }
        Ok(())
    }

    fn expect_len(&self, values: &[f32], expected: usize) -> Result<(), WeightsError> {
        if values.len() != expected {
            return Err(WeightsError::DimMismatch {
                line: self.line,
                expected,
                got: values.len(),
            });
        }
        Ok(())
    }

    fn store(&mut self, layer: &mut [Vec<f32>; 4]) -> Result<(), WeightsError> {
        use Section::*;
        match self.section {
            InputConv | ResconvTower => {
                let in_channels = if self.section == InputConv {
                    self.input_planes
                } else {
                    self.channels
                };
                self.expect_len(&layer[0], in_channels * 9 * self.channels)?;
                for values in layer[1..].iter() {
                    self.expect_len(values, self.channels)?;
                }
                self.pipe.conv_weights.push(std::mem::take(&mut layer[0]));
                self.pipe.conv_biases.push(std::mem::take(&mut layer[1]));
                self.pipe.bn_means.push(std::mem::take(&mut layer[2]));
                self.pipe.bn_stddevs.push(std::mem::take(&mut layer[3]));
                self.excess = 0;
            }
            PolConvTower => {
                let in_channels = if self.section != self.previous {
                    self.channels
                } else {
                    self.policy_channels
                };
                self.expect_len(&layer[0], in_channels * self.policy_outputs)?;
                for values in layer[1..].iter() {
                    self.expect_len(values, self.policy_outputs)?;
                }
                self.pipe.conv_pol_w.push(std::mem::take(&mut layer[0]));
                self.pipe.conv_pol_b.push(std::mem::take(&mut layer[1]));
                self.pipe.bn_pol_w1.push(std::mem::take(&mut layer[2]));
                self.pipe.bn_pol_w2.push(std::mem::take(&mut layer[3]));
                self.excess = 0;
            }
            PolDense => {
                if layer[1].len() != self.potential_moves() {
                    let net_board = ((layer[1].len().max(1) - 1) as f64).sqrt().round() as usize;
                    return Err(WeightsError::BoardSizeMismatch {
                        net_board,
                        expected: self.board_size,
                    });
                }
                self.expect_len(
                    &layer[0],
                    self.policy_outputs * self.num_intersections() * self.potential_moves(),
                )?;
                self.heads.ip_pol_w = std::mem::take(&mut layer[0]);
                self.heads.ip_pol_b = std::mem::take(&mut layer[1]);
                self.excess = 2;
            }
            ValueConv => {
                self.expect_len(&layer[0], self.channels * self.val_outputs)?;
                for values in layer[1..].iter() {
                    self.expect_len(values, self.val_outputs)?;
                }
                self.pipe.conv_val_w = std::mem::take(&mut layer[0]);
                self.pipe.conv_val_b = std::mem::take(&mut layer[1]);
                self.pipe.bn_val_w1 = std::mem::take(&mut layer[2]);
                self.pipe.bn_val_w2 = std::mem::take(&mut layer[3]);
                self.excess = 0;
            }
            ValueAvgpool => {
                self.expect_len(&layer[0], self.val_outputs * self.val_pool_outputs)?;
                for values in layer[1..].iter() {
                    self.expect_len(values, self.val_pool_outputs)?;
                }
                self.pipe.conv_val_pool_w = std::mem::take(&mut layer[0]);
                self.pipe.conv_val_pool_b = std::mem::take(&mut layer[1]);
                self.pipe.bn_val_pool_w1 = std::mem::take(&mut layer[2]);
                self.pipe.bn_val_pool_w2 = std::mem::take(&mut layer[3]);
                if self.val_outputs < 8 {
                    self.add_zero_channels();
                }
                self.excess = 0;
            }
            ValueDenseTower => {
                let inputs = if self.section != self.previous {
                    self.val_dense_inputs
                } else {
                    self.value_channels
                };
                self.expect_len(&layer[0], inputs * self.value_channels)?;
                for values in layer[1..].iter() {
                    self.expect_len(values, self.value_channels)?;
                }
                self.heads
                    .vh_dense_weights
                    .push(std::mem::take(&mut layer[0]));
                self.heads
                    .vh_dense_biases
                    .push(std::mem::take(&mut layer[1]));
                self.heads
                    .vh_dense_bn_means
                    .push(std::mem::take(&mut layer[2]));
                self.heads
                    .vh_dense_bn_vars
                    .push(std::mem::take(&mut layer[3]));
                self.excess = 0;
            }
            ValDenseHidden => {
                let inputs = if self.heads.vh_dense_weights.is_empty() {
                    self.val_dense_inputs
                } else {
                    self.value_channels
                };
                self.expect_len(&layer[0], inputs * self.val_chans)?;
                self.expect_len(&layer[1], self.val_chans)?;
                self.heads.ip1_val_w = std::mem::take(&mut layer[0]);
                self.heads.ip1_val_b = std::mem::take(&mut layer[1]);
                self.excess = 2;
            }
            ValDenseOut => {
                self.expect_len(&layer[0], self.val_chans * self.value_head_rets)?;
                self.expect_len(&layer[1], self.value_head_rets)?;
                self.heads.ip2_val_w = std::mem::take(&mut layer[0]);
                self.heads.ip2_val_b = std::mem::take(&mut layer[1]);
                self.excess = 2;
            }
            VbeDenseHidden => {
                let inputs = if self.heads.vh_dense_weights.is_empty() {
                    self.val_dense_inputs
                } else {
                    self.value_channels
                };
                self.expect_len(&layer[0], inputs * self.vbe_chans)?;
                self.expect_len(&layer[1], self.vbe_chans)?;
                self.heads.ip1_vbe_w = std::mem::take(&mut layer[0]);
                self.heads.ip1_vbe_b = std::mem::take(&mut layer[1]);
                self.excess = 2;
            }
            VbeDenseOut => {
                let inputs = if self.heads.ip1_vbe_w.is_empty() {
                    self.val_chans
                } else {
                    self.vbe_chans
                };
                self.expect_len(&layer[0], inputs * self.vbe_head_rets)?;
                self.expect_len(&layer[1], self.vbe_head_rets)?;
                self.heads.ip2_vbe_w = std::mem::take(&mut layer[0]);
                self.heads.ip2_vbe_b = std::mem::take(&mut layer[1]);
                self.excess = 2;
            }
            None => {}
        }
        Ok(())
    }

    /// Pad the value convolution to 8 channels so the pooled matrix stays
    /// wide enough for vectorized backends. Zero channels go in front;
    /// the existing channels keep their relative order at the high
    /// indices, and the pooling matrix columns shift to match.
    fn add_zero_channels(&mut self) {
        debug_assert!(self.val_outputs < 8);
        let old = self.val_outputs;
        let new = 8;
        let pad = new - old;

        let mut conv_w = vec![0.0f32; self.channels * new];
        for o in 0..old {
            let src = &self.pipe.conv_val_w[o * self.channels..][..self.channels];
            conv_w[(pad + o) * self.channels..][..self.channels].copy_from_slice(src);
        }
        self.pipe.conv_val_w = conv_w;

        let pad_front = |values: &mut Vec<f32>| {
            let mut padded = vec![0.0f32; new];
            padded[pad..].copy_from_slice(values);
            *values = padded;
        };
        pad_front(&mut self.pipe.conv_val_b);
        pad_front(&mut self.pipe.bn_val_w1);
        pad_front(&mut self.pipe.bn_val_w2);

        let mut pool_w = vec![0.0f32; self.val_pool_outputs * new];
        for row in 0..self.val_pool_outputs {
            let src = &self.pipe.conv_val_pool_w[row * old..][..old];
            pool_w[row * new + pad..][..old].copy_from_slice(src);
        }
        self.pipe.conv_val_pool_w = pool_w;

        self.val_outputs = new;
    }

    /// Post-load transformations: Winograd filter transform, bias folding
    /// and batch-norm variance inversion.
    fn finalize(mut self) -> Result<LoadedNetwork, WeightsError> {
        // 3x3 convolutions go to the Winograd U layout.
        self.pipe.conv_weights[0] =
            transform_filters(&self.pipe.conv_weights[0], self.channels, self.input_planes);
        for i in 1..=2 * self.residual_blocks {
            self.pipe.conv_weights[i] =
                transform_filters(&self.pipe.conv_weights[i], self.channels, self.channels);
        }

        fn fold(biases: &mut [f32], means: &mut [f32], vars: &mut [f32]) {
            for (mean, bias) in means.iter_mut().zip(biases.iter_mut()) {
                *mean -= *bias;
                *bias = 0.0;
            }
            process_bn_var(vars);
        }

        for i in 0..self.pipe.conv_biases.len() {
            fold(
                &mut self.pipe.conv_biases[i],
                &mut self.pipe.bn_means[i],
                &mut self.pipe.bn_stddevs[i],
            );
        }
        fold(
            &mut self.pipe.conv_val_b,
            &mut self.pipe.bn_val_w1,
            &mut self.pipe.bn_val_w2,
        );
        fold(
            &mut self.pipe.conv_val_pool_b,
            &mut self.pipe.bn_val_pool_w1,
            &mut self.pipe.bn_val_pool_w2,
        );
        for i in 0..self.pipe.conv_pol_b.len() {
            fold(
                &mut self.pipe.conv_pol_b[i],
                &mut self.pipe.bn_pol_w1[i],
                &mut self.pipe.bn_pol_w2[i],
            );
        }
        for i in 0..self.heads.vh_dense_biases.len() {
            fold(
                &mut self.heads.vh_dense_biases[i],
                &mut self.heads.vh_dense_bn_means[i],
                &mut self.heads.vh_dense_bn_vars[i],
            );
        }

        let arch = Architecture {
            board_size: self.board_size,
            channels: self.channels,
            residual_blocks: self.residual_blocks,
            input_planes: self.input_planes,
            input_moves: self.input_moves,
            include_color: self.include_color,
            adv_features: self.adv_features,
            chainlibs_features: self.chainlibs_features,
            chainsize_features: self.chainsize_features,
            quartile_encoding: self.quartile_encoding,
            value_head_not_stm: self.value_head_not_stm,
            policy_conv_layers: self.policy_conv_layers,
            policy_channels: self.policy_channels,
            policy_outputs: self.policy_outputs,
            value_channels: self.value_channels,
            val_dense_inputs: self.val_dense_inputs,
            val_outputs: self.val_outputs,
            val_pool_outputs: self.val_pool_outputs,
            val_chans: self.val_chans,
            vbe_chans: self.vbe_chans,
            value_head_rets: self.value_head_rets,
            val_head_rets: self.val_head_rets,
            vbe_head_rets: self.vbe_head_rets,
            value_head_type: self.value_head_type,
        };

        Ok(LoadedNetwork {
            arch,
            pipe_weights: self.pipe,
            heads: self.heads,
        })
    }
}

/// Replace batch-norm variances with `1/sqrt(var + eps)` so inference
/// needs only a multiply.
pub(crate) fn process_bn_var(vars: &mut [f32]) {
    const EPSILON: f32 = 1e-5;
    for v in vars.iter_mut() {
        *v = 1.0 / (*v + EPSILON).sqrt();
    }
}
