//! Tape positioning commands.

use crate::error::Result;
use crate::scsi::sense::SenseCondition;
use std::time::Duration;
use tracing::debug;

use super::super::constants::{scsi_commands, SKIP_LOCATE_MIN_FIRMWARE};
use super::super::{OnStreamDrive, Transport};

/// Parsed READ POSITION reply.
///
/// `host_frame` is the frame the next host transfer applies to;
/// `tape_frame` is where the mechanism itself is. On read the tape runs
/// ahead of the host, on write behind it.
#[derive(Debug, Clone, Copy)]
pub struct ReadPositionInfo {
    pub host_frame: u32,
    pub tape_frame: u32,
    pub buffered_frames: u8,
    pub beginning_of_partition: bool,
    pub end_of_partition: bool,
}

impl<T: Transport> OnStreamDrive<T> {
    pub fn read_position(&mut self) -> Result<ReadPositionInfo> {
        let cdb = [scsi_commands::READ_POSITION, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let reply = self.execute(&cdb, 20)?;
        if reply.len() < 16 {
            return Err(crate::error::TransportFault::ShortRead.into());
        }

        let info = ReadPositionInfo {
            host_frame: u32::from_be_bytes([reply[4], reply[5], reply[6], reply[7]]),
            tape_frame: u32::from_be_bytes([reply[8], reply[9], reply[10], reply[11]]),
            buffered_frames: reply[15],
            beginning_of_partition: reply[0] & 0x80 != 0,
            end_of_partition: reply[0] & 0x40 != 0,
        };
        debug!(
            "Position: host {} tape {} ({} frames buffered)",
            info.host_frame, info.tape_frame, info.buffered_frames
        );
        Ok(info)
    }

    /// Relocate to a logical frame. The drive discards its cached frames.
    pub fn locate(&mut self, frame: u32) -> Result<()> {
        self.locate_inner(frame, false)
    }

    /// Relocate without discarding the drive cache; buffered frames are
    /// carried to the new position. Used by skip-locate write recovery.
    pub fn locate_keep_cache(&mut self, frame: u32) -> Result<()> {
        self.locate_inner(frame, true)
    }

    fn locate_inner(&mut self, frame: u32, keep_cache: bool) -> Result<()> {
        let addr = frame.to_be_bytes();
        let mut cdb = [0u8; 10];
        cdb[0] = scsi_commands::LOCATE;
        cdb[1] = 0x01; // Immed
        cdb[3..7].copy_from_slice(&addr);
        if keep_cache {
            cdb[9] = 0x80; // SKIP: don't throw away buffers
        }
        self.execute(&cdb, 0)?;
        Ok(())
    }

    /// The 1.06-firmware way of recovering write errors: step the head
    /// forward past the defect while the drive keeps its cache. Returns the
    /// frame writing resumes at, or None when the firmware predates the
    /// skip bit.
    pub fn skip_locate(&mut self, skip: u32) -> Result<Option<u32>> {
        if self.firmware() < SKIP_LOCATE_MIN_FIRMWARE {
            return Ok(None);
        }
        let position = self.read_position()?;
        let target = position.tape_frame + skip;
        debug!("SkipLocate to pos {}", target);
        self.locate_keep_cache(target)?;
        let position = self.read_position()?;
        Ok(Some(position.host_frame))
    }

    pub fn rewind(&mut self) -> Result<()> {
        let cdb = [scsi_commands::REWIND, 0x01, 0, 0, 0, 0];
        self.execute(&cdb, 0)?;
        Ok(())
    }

    fn load_unload(&mut self, function: u8) -> Result<()> {
        let cdb = [scsi_commands::LOAD_UNLOAD, 0x01, 0, 0, function, 0];
        self.execute(&cdb, 0)?;
        Ok(())
    }

    pub fn load(&mut self) -> Result<()> {
        self.load_unload(0x01)
    }

    /// Run the tape end to end once to equalize tension.
    pub fn retension(&mut self) -> Result<()> {
        self.load_unload(0x02)
    }

    pub fn eject(&mut self) -> Result<()> {
        self.load_unload(0x04)
    }

    /// Poll READ POSITION until the drive's host-side position reaches
    /// `frame` (with `ahead` frames of slack on the tape side), a sense
    /// condition shows up, or `timeout` elapses. Only needed for firmware
    /// in the no-reconnect window.
    pub fn wait_position(
        &mut self,
        frame: u32,
        timeout: Duration,
        ahead: u32,
    ) -> Result<SenseCondition> {
        let mut waited = Duration::ZERO;
        let step = Duration::from_millis(200);
        loop {
            let position = self.read_position()?;
            let condition = self.condition();
            if condition != SenseCondition::NoSense {
                return Ok(condition);
            }
            if frame == position.host_frame && frame < position.tape_frame + ahead {
                return Ok(SenseCondition::NoSense);
            }
            if waited >= timeout {
                debug!(
                    "wait_position: gave up at pos {} buffer {}-{}",
                    frame, position.host_frame, position.tape_frame
                );
                return Ok(SenseCondition::TimeoutWaitPosition);
            }
            std::thread::sleep(step);
            waited += step;
        }
    }
}
