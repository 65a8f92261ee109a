//! Error types for weights loading and evaluation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading a weights file. All of these are fatal at
/// initialization; the caller reports them and aborts.
#[derive(Debug, Error)]
pub enum WeightsError {
    #[error("could not open weights file {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decompress weights file {path}: {source}")]
    Decompress {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("weights file is the wrong version ({version})")]
    WrongFormat { version: i64 },

    #[error("network is for a {net_board}x{net_board} board, evaluator is configured for {expected}x{expected}")]
    BoardSizeMismatch { net_board: usize, expected: usize },

    #[error("weights file ended early at line {line}")]
    Truncated { line: usize },

    #[error("layer size mismatch at line {line}: expected {expected} values, got {got}")]
    DimMismatch {
        line: usize,
        expected: usize,
        got: usize,
    },

    #[error("malformed weights line {line}")]
    Malformed { line: usize },

    #[error("{0}")]
    Unsupported(String),
}

/// Errors raised by the forward pipe or the evaluator front-end at runtime.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Cooperative cancellation: a drain was requested while a forward call
    /// was in flight. Non-fatal; the current simulation unwinds.
    #[error("evaluation halted")]
    Halted,

    #[error("forward backend failed to initialize: {0}")]
    BackendInit(String),

    #[error("state board size {got} does not match the loaded network ({expected})")]
    BoardSize { got: usize, expected: usize },
}

/// Umbrella error for constructing a network from a file.
#[derive(Debug, Error)]
pub enum NetError {
    #[error(transparent)]
    Weights(#[from] WeightsError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}
