#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown execution status: {0}")]
    UnknownStatus(String),

    #[error("execution id must not be empty")]
    EmptyExecutionId,
}

pub type Result<T> = std::result::Result<T, Error>;
