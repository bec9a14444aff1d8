use thiserror::Error;

/// Errors raised by lattice mutations, parameter validation and template ingestion.
///
/// Every operation that returns one of these leaves the simulation state untouched.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimError {
    #[error("position ({x}, {y}) lies outside the {rows}x{cols} lattice")]
    OutOfBounds { x: i32, y: i32, rows: i32, cols: i32 },
    #[error("position ({x}, {y}) is already occupied")]
    PositionOccupied { x: i32, y: i32 },
    #[error("no cell found at ({x}, {y})")]
    NotFound { x: i32, y: i32 },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("invalid cell template: {0}")]
    InvalidTemplate(String),
}

impl SimError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        SimError::InvalidConfiguration(message.into())
    }
}
