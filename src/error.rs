use std::io;

#[derive(Debug, thiserror::Error)]
pub enum BarkwatchError {
    #[error("audio error: {0}")]
    Audio(String),

    #[error("resample error: {0}")]
    Resample(String),

    #[error("peripheral read timed out")]
    PeripheralTimeout,

    #[error("encoder rejected configuration: {0}")]
    EncoderConfigRejected(String),

    #[error("encoder error: {0}")]
    Encoder(String),

    #[error("buffer overflow: {requested} bytes at cursor {cursor} exceeds capacity {capacity}")]
    BufferOverflow {
        requested: usize,
        cursor: usize,
        capacity: usize,
    },

    #[error("output buffer is already checked out")]
    BufferBusy,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("timed out waiting for collector response")]
    ResponseTimeout,

    #[error("config error: {0}")]
    Config(String),

    #[error("telemetry error: {0}")]
    Telemetry(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl BarkwatchError {
    /// Whether the pipeline carries on after this error without abandoning
    /// the current unit of work.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::PeripheralTimeout | Self::ResponseTimeout)
    }
}

pub type Result<T> = std::result::Result<T, BarkwatchError>;
