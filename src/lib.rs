//! RustOnStream Library
//!
//! A Rust library for driving OnStream ADR tape units over a generic SCSI
//! pass-through transport, providing the low-level command set, the on-tape
//! frame metadata codec, and read/write session orchestration with the
//! vendor's write-error recovery protocol.

pub mod cli;
pub mod error;
pub mod firmware;
pub mod frame;
pub mod logger;
pub mod scsi;
pub mod session;
pub mod tape;

// Re-export key types for easier use
pub use error::{Result, RustOnStreamError, TransportFault};
pub use frame::{AuxFrame, DataAccessEntry, FrameType};
pub use scsi::sense::SenseCondition;
pub use scsi::{OnStreamDrive, Transport};
pub use session::{ReadSession, SessionOptions, WriteSession};
