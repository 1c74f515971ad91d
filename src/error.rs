//! Error types for the Ratewarden crate.

use thiserror::Error;

/// Main error type for Ratewarden operations.
///
/// Admission decisions themselves never fail; errors only arise while
/// loading configuration or constructing limiters from it.
#[derive(Error, Debug)]
pub enum RateWardenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Simulation harness errors
    #[error("Simulation error: {0}")]
    Simulation(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Ratewarden operations.
pub type Result<T> = std::result::Result<T, RateWardenError>;
