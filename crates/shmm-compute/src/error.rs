use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputeError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("shape mismatch for {operand}: expected {expected} elements, got {got}")]
    ShapeMismatch {
        operand: &'static str,
        expected: usize,
        got: usize,
    },
}

pub type Result<T> = std::result::Result<T, ComputeError>;
