use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("device wait timed out")]
    Timeout,
    #[error("hopper head not present")]
    NotPresent,
}

pub type Result<T> = std::result::Result<T, HwError>;
