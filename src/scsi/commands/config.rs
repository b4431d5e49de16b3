//! Mode-page configuration and status commands.

use crate::error::{Result, RustOnStreamError};
use crate::tape::TapeParameters;
use tracing::{debug, warn};

use super::super::constants::{mode_pages, scsi_commands};
use super::super::{OnStreamDrive, Transport};

impl<T: Transport> OnStreamDrive<T> {
    /// MODE SENSE for a single vendor page.
    pub fn mode_sense(&mut self, page: u8, length: u16) -> Result<Vec<u8>> {
        let cdb = [
            scsi_commands::MODE_SENSE_6,
            0x08, // DBD
            page,
            (length >> 8) as u8,
            (length & 0xFF) as u8,
            0,
        ];
        self.execute(&cdb, length as usize)
    }

    /// Tape parameter page: density and media geometry.
    pub fn get_tape_parameters(&mut self) -> Result<TapeParameters> {
        let reply = self.mode_sense(mode_pages::TAPE_PARAMETERS, 22)?;
        if reply.len() < 14 {
            return Err(RustOnStreamError::parse(
                "tape parameter page shorter than expected",
            ));
        }
        let parameters = TapeParameters {
            density: reply[6],
            segments_per_track: u16::from_be_bytes([reply[10], reply[11]]),
            tracks: u16::from_be_bytes([reply[12], reply[13]]),
        };
        debug!(
            "Density: {} SegTrk: {} Trks: {}",
            parameters.density, parameters.segments_per_track, parameters.tracks
        );
        Ok(parameters)
    }

    /// Buffer status page: (total buffers, buffers in use). Values of 128
    /// or more in the second byte mean the drive is reading ahead on its
    /// own account.
    pub fn buffer_status(&mut self) -> Result<(u8, u8)> {
        let reply = self.mode_sense(mode_pages::BUFFER_STATUS, 8)?;
        if reply.len() < 8 {
            return Err(RustOnStreamError::parse(
                "buffer status page shorter than expected",
            ));
        }
        let (max, current) = (reply[6], reply[7]);
        debug!("Buffer_Status: {}/{}", current, max);
        if current > max {
            warn!(
                "Drive reported more frames in buffer than buffers available: {}/{}",
                current, max
            );
        }
        Ok((max, current))
    }

    /// Announce the writing application's 4-byte tag to the drive.
    pub fn set_vendor_id(&mut self, id: [u8; 4]) -> Result<()> {
        let mut command = [0u8; 18];
        command[..6].copy_from_slice(&[scsi_commands::MODE_SELECT_6, 0x10, 0, 0, 0x0C, 0]);
        command[6] = 0x08; // mode data length
        command[10] = mode_pages::VENDOR_ID;
        command[11] = 0x06;
        command[12..16].copy_from_slice(&id);
        self.execute(&command, 0)?;
        Ok(())
    }

    /// Select record format and streaming behavior. `aux` picks 32.5k
    /// records (payload plus auxiliary metadata) over plain 32k.
    pub fn set_data_transfer_mode(&mut self, aux: bool, streaming: bool) -> Result<()> {
        let mut command = [0u8; 14];
        command[..6].copy_from_slice(&[scsi_commands::MODE_SELECT_6, 0x10, 0, 0, 0x08, 0]);
        command[6] = 0x07; // mode data length
        command[10] = mode_pages::DATA_TRANSFER_MODE;
        command[11] = 0x02;
        command[13] = if aux { 0x22 } else { 0x11 };
        if streaming {
            command[13] |= 0x80;
        }
        self.execute(&command, 0)?;
        Ok(())
    }

    /// Instruct the drive to drop every frame still in its cache. Used by
    /// full-requeue write recovery before the ledger is retransmitted.
    pub fn discard_buffered_frames(&mut self) -> Result<()> {
        debug!("Discarding drive frame buffer");
        let mut command = [0u8; 14];
        command[..6].copy_from_slice(&[scsi_commands::MODE_SELECT_6, 0x10, 0, 0, 0x08, 0]);
        command[6] = 0x07; // mode data length
        command[10] = mode_pages::BUFFER_STATUS;
        command[11] = 0x02;
        command[12] = 0; // frames to retain
        self.execute(&command, 0)?;
        Ok(())
    }

    /// Ask the drive to push its cache out to the medium. Flush is done by
    /// WRITE FILEMARKS (!)
    pub fn flush(&mut self) -> Result<()> {
        let cdb = [scsi_commands::WRITE_FILEMARKS, 0x01, 0, 0, 0, 0];
        self.execute(&cdb, 0)?;
        Ok(())
    }
}
