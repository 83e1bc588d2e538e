//! Error types shared by the photocycle crates

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, CycleError>;

/// Main error type for shared operations
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Unknown barcode type: {0}")]
    UnknownBarcodeType(i16),

    #[error("Parse error: {0}")]
    Parse(String),
}
