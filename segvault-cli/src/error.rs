use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine setup error: {0}")]
    Engine(#[from] segvault_engine::PipelineError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Asset {asset_id} failed ({kind}): {detail}")]
    AssetFailed {
        asset_id: String,
        kind: String,
        detail: String,
    },
}

pub type Result<T> = std::result::Result<T, AppError>;
