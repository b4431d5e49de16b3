//! Basic exchange and frame I/O commands.

use crate::error::{Result, RustOnStreamError, TransportFault};
use crate::firmware;
use crate::frame::FRAME_TOTAL_SIZE;
use tracing::debug;

use super::super::constants::scsi_commands;
use super::super::{OnStreamDrive, Transport, SG_MAX_SENSE};
use super::DriveIdentity;

const SUPPORTED_PRODUCTS: &[&str] = &["SC-30", "SC-50", "SC-70"];

impl<T: Transport> OnStreamDrive<T> {
    /// TEST UNIT READY probe; the interesting output is the cached sense.
    pub fn test_unit_ready(&mut self) -> Result<()> {
        let cdb = [scsi_commands::TEST_UNIT_READY, 0, 0, 0, 0, 0];
        self.execute(&cdb, 0)?;
        Ok(())
    }

    /// REQUEST SENSE. Rarely needed: every exchange already carries its
    /// sense back, which is what the interpreter consumes.
    pub fn request_sense(&mut self) -> Result<Vec<u8>> {
        let cdb = [
            scsi_commands::REQUEST_SENSE,
            0,
            0,
            0,
            SG_MAX_SENSE as u8,
            0,
        ];
        self.execute(&cdb, SG_MAX_SENSE)
    }

    pub fn inquiry(&mut self) -> Result<Vec<u8>> {
        let cdb = [scsi_commands::INQUIRY, 0, 0, 0, 0x24, 0];
        self.execute(&cdb, 0x24)
    }

    /// Identify the device and learn its firmware revision.
    ///
    /// Refuses anything that is not an OnStream SC-series tape drive; the
    /// command set below is vendor-specific.
    pub fn identify(&mut self) -> Result<DriveIdentity> {
        let reply = self.inquiry()?;
        if reply.len() < 36 {
            return Err(TransportFault::ShortRead.into());
        }

        if reply[0] & 0x1F != 0x01 {
            return Err(RustOnStreamError::tape_device("device is not a tape drive"));
        }

        let vendor = String::from_utf8_lossy(&reply[8..16]).trim_end().to_string();
        let product = String::from_utf8_lossy(&reply[16..32]).trim_end().to_string();
        let revision = String::from_utf8_lossy(&reply[32..36]).to_string();
        let firmware = firmware::parse_firmware_rev(&revision)?;

        debug!(
            "Vendor-ID: {} Product-ID: {} Firmware: {} ({})",
            vendor, product, revision, firmware
        );

        if vendor != "OnStream" {
            return Err(RustOnStreamError::tape_device(format!(
                "vendor {} not supported",
                vendor
            )));
        }
        if !SUPPORTED_PRODUCTS.contains(&product.as_str()) {
            return Err(RustOnStreamError::tape_device(format!(
                "product {} not supported",
                product
            )));
        }

        self.set_firmware(firmware);
        Ok(DriveIdentity {
            vendor,
            product,
            revision,
            firmware,
        })
    }

    /// READ with a zero transfer length, arming the drive's read-ahead.
    pub fn start_read(&mut self) -> Result<()> {
        let cdb = [scsi_commands::READ_6, 0x01, 0, 0, 0, 0];
        self.execute(&cdb, 0)?;
        Ok(())
    }

    /// Read one 33,280-byte frame (payload plus auxiliary metadata) at the
    /// current position. The caller must classify the sense before trusting
    /// the returned bytes.
    pub fn read_frame(&mut self) -> Result<Vec<u8>> {
        let cdb = [scsi_commands::READ_6, 0x01, 0, 0, 1, 0];
        self.execute(&cdb, FRAME_TOTAL_SIZE)
    }

    /// Transmit one full frame image into the drive cache.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        debug_assert_eq!(frame.len(), FRAME_TOTAL_SIZE);
        let mut command = Vec::with_capacity(6 + FRAME_TOTAL_SIZE);
        command.extend_from_slice(&[scsi_commands::WRITE_6, 0x01, 0, 0, 1, 0]);
        command.extend_from_slice(frame);
        self.execute(&command, 0)?;
        Ok(())
    }
}
