use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("invalid feature: {0}")]
    InvalidFeature(String),

    #[error("invalid type name: {0:?}")]
    InvalidTypeName(String),
}
