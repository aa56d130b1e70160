use thiserror::Error;

/// Transport-level failure talking to a store. Distinct from store result
/// codes: these never carry domain meaning and some are worth retrying.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("connect timeout [{0}]")]
    ConnectTimeout(String),

    #[error("connection broken [{0}]")]
    ConnectionBroken(String),

    #[error("transaction chosen as deadlock victim")]
    Deadlock,

    #[error("connection is closed")]
    Closed,

    #[error("protocol misuse: {0}")]
    Protocol(&'static str),

    #[error("injected fault: {0}")]
    Fault(&'static str),
}

impl TransportError {
    /// Worth another attempt after backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout(_) | Self::ConnectionBroken(_) | Self::Deadlock
        )
    }
}
