use thiserror::Error;

/// Errors shared across every layer of the pipeline.
///
/// Per-line parse failures are *not* represented here — they are counted
/// and sampled inside the file boundary (see `etl-parser::ParseFailure`)
/// and never propagate as an `Error`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("enrichment error: {0}")]
    Enrichment(String),

    #[error("warehouse error (transient): {0}")]
    WarehouseTransient(String),

    #[error("warehouse error (permanent): {0}")]
    WarehousePermanent(String),

    #[error("state store error: {0}")]
    StateStore(String),

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
