use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelLookupError {
    #[error("Unknown screener '{name}'. Available: {available}")]
    UnknownScreener { name: String, available: String },
    #[error("Unknown signal policy '{name}'. Available: {available}")]
    UnknownSignalPolicy { name: String, available: String },
}
