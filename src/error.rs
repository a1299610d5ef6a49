use thiserror::Error;

/// Failures of the numerical core. Everything above it works in `anyhow`.
#[derive(Debug, Error, PartialEq)]
pub enum AnalysisError {
    #[error("empty input")]
    EmptyInput,

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("need at least {needed} points, got {got}")]
    TooFewPoints { needed: usize, got: usize },

    #[error("matrix is not square: {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    #[error("chunk window overlap {overlap} must be smaller than size {size}")]
    InvalidChunking { size: usize, overlap: usize },
}
