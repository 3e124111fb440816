use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("malformed weight entry {0:?}, expected category=weight")]
    MalformedWeight(String),

    #[error("weight for {category} must be a finite non-negative number, got {weight}")]
    InvalidWeight { category: String, weight: f64 },

    #[error("category {0} is weighted more than once")]
    DuplicateCategory(String),

    #[error("at least one category weight is required")]
    EmptyWeights,

    #[error("category weights must sum to 1.0, got {0}")]
    WeightSum(f64),
}
