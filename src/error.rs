use crate::scsi::sense::SenseCondition;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RustOnStreamError>;

/// Faults raised by the pass-through channel itself, before any sense
/// interpretation is possible.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFault {
    #[error("device never became ready for writing")]
    WriteTimeout,

    #[error("write error")]
    WriteError,

    #[error("device never became ready for reading")]
    ReadTimeout,

    #[error("read error")]
    ReadError,

    #[error("short read from device")]
    ShortRead,
}

#[derive(Error, Debug)]
pub enum RustOnStreamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport fault: {0}")]
    Transport(#[from] TransportFault),

    #[error("unrecoverable drive condition: {0}")]
    Drive(SenseCondition),

    #[error("Tape device error: {0}")]
    TapeDevice(String),

    #[error("buffer accounting error: {0}")]
    BufferAccounting(String),

    #[error("tape format error: {0}")]
    TapeFormat(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Parameter validation error: {0}")]
    ParameterValidation(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl RustOnStreamError {
    pub fn tape_device<T: Into<String>>(msg: T) -> Self {
        Self::TapeDevice(msg.into())
    }

    pub fn buffer_accounting<T: Into<String>>(msg: T) -> Self {
        Self::BufferAccounting(msg.into())
    }

    pub fn tape_format<T: Into<String>>(msg: T) -> Self {
        Self::TapeFormat(msg.into())
    }

    pub fn parse<T: Into<String>>(msg: T) -> Self {
        Self::Parse(msg.into())
    }

    pub fn parameter_validation<T: Into<String>>(msg: T) -> Self {
        Self::ParameterValidation(msg.into())
    }

    pub fn unsupported<T: Into<String>>(msg: T) -> Self {
        Self::Unsupported(msg.into())
    }
}
