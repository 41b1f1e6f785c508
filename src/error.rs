use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mapping error: {0}")]
    Mapping(String),

    #[error("insufficient memory for mapping: available {available}, required at least {required}")]
    InsufficientMemory { available: usize, required: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("position {position} is out of range for a file of {file_records} records")]
    PositionOutOfRange { position: u64, file_records: u64 },

    #[error("pool is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, PoolError>;
