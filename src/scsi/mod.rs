//! SCSI pass-through transport and the OnStream command layer.
//!
//! The [`Transport`] trait is the seam between command construction and the
//! actual pass-through channel: the real implementation is [`SgDevice`] over
//! a Linux sg character device, and the session tests drive the whole
//! protocol against a scripted in-memory drive instead.

use crate::error::Result;

pub mod constants;
pub mod ffi;
pub mod sense;

mod commands;
mod device;

#[cfg(test)]
pub mod fake;

pub use commands::{DriveIdentity, ReadPositionInfo};
pub use constants::*;
pub use device::SgDevice;

/// One command/reply exchange with the device.
///
/// `command` is the command descriptor block followed by any data-out bytes
/// (frame image or mode parameter list), exactly as the sg interface
/// transmits them. Implementations must cache the 16-byte sense returned
/// with the exchange; that buffer is the only input to sense
/// classification.
pub trait Transport {
    fn execute(&mut self, command: &[u8], reply_len: usize) -> Result<Vec<u8>>;

    fn last_sense(&self) -> [u8; SG_MAX_SENSE];
}

/// Typed command surface of one OnStream drive.
///
/// Owns the transport for the lifetime of a session; all tape I/O goes
/// through here. The firmware revision is learned during
/// [`identify`](OnStreamDrive::identify) and gates the write-recovery
/// strategy.
pub struct OnStreamDrive<T: Transport> {
    transport: T,
    firmware: u32,
}

impl<T: Transport> OnStreamDrive<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            firmware: 0,
        }
    }

    /// Normalized firmware revision, 0 until the drive has been identified.
    pub fn firmware(&self) -> u32 {
        self.firmware
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub(crate) fn set_firmware(&mut self, firmware: u32) {
        self.firmware = firmware;
    }

    pub fn last_sense(&self) -> [u8; SG_MAX_SENSE] {
        self.transport.last_sense()
    }

    pub fn sense_key(&self) -> u8 {
        sense::sense_key(&self.transport.last_sense())
    }

    pub fn asc(&self) -> u8 {
        sense::asc(&self.transport.last_sense())
    }

    pub fn ascq(&self) -> u8 {
        sense::ascq(&self.transport.last_sense())
    }

    /// Classify the sense cached from the most recent command.
    pub fn condition(&self) -> sense::SenseCondition {
        sense::classify_buffer(&self.transport.last_sense())
    }

    pub(crate) fn execute(&mut self, command: &[u8], reply_len: usize) -> Result<Vec<u8>> {
        self.transport.execute(command, reply_len)
    }
}
