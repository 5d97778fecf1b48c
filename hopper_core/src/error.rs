use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum HopperError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("timeout waiting for device")]
    Timeout,
    #[error("invalid state: {0}")]
    State(String),
    #[error("payout aborted: {0}")]
    Abort(AbortReason),
}

/// Why a payout session ended before paying the requested count.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("hopper empty")]
    Empty,
    #[error("coin jam")]
    Jam,
    #[error("hopper disconnected")]
    Disconnected,
    #[error("illegal coin out")]
    IllegalCoinOut,
    #[error("max runtime exceeded")]
    MaxRuntime,
    #[error("interrupted")]
    Interrupted,
}

impl From<crate::HopperFault> for AbortReason {
    fn from(fault: crate::HopperFault) -> Self {
        match fault {
            crate::HopperFault::Empty => Self::Empty,
            crate::HopperFault::Jam => Self::Jam,
            crate::HopperFault::Disconnected => Self::Disconnected,
            crate::HopperFault::IllegalCoinOut => Self::IllegalCoinOut,
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing transport")]
    MissingTransport,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
