use thiserror::Error;

/// Errors returned by the command queue, its devices and configuration loading.
#[derive(Debug, Error)]
pub enum Error {
    /// The staging heap cannot satisfy an allocation.
    #[error("staging heap exhausted: requested {requested} bytes, {available} bytes available (capacity {capacity} bytes)")]
    StagingExhausted {
        requested: u64,
        available: u64,
        capacity: u64,
    },
    /// The device could not allocate a buffer.
    #[error("device heap exhausted while allocating a buffer of {size} bytes")]
    DeviceHeapExhausted { size: u64 },
    /// A pipeline could not be created from the device's shader library.
    #[error("failed to create program `{0}`")]
    ProgramCreation(String),
    #[error("unknown or retired resource")]
    UnknownResource,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("JSON error")]
    Json(#[from] serde_json::Error),
}
