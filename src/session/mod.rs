//! Tape session orchestration.
//!
//! A session owns the drive for its whole lifetime: identification and
//! configuration, header handling, the streaming loop, error recovery, and
//! end-of-session disposition all run through here. Sessions are
//! synchronous, single-threaded state machines; the only places real time
//! passes are the transport waits and the poll sleeps below, and those are
//! the only places cancellation is sampled.

use crate::error::{Result, RustOnStreamError};
use crate::frame::{AuxFrame, FrameType, FRAME_PAYLOAD_SIZE, FRAME_TOTAL_SIZE};
use crate::scsi::sense::SenseCondition;
use crate::scsi::{OnStreamDrive, Transport};
use crate::tape::{
    AdrLayout, TapeHeader, ADR_MAJOR, ADR_MINOR, FIRST_HEADER_FRAME, HEADER_FRAME_COUNT,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod ledger;
mod recovery;
mod read;
mod write;

pub use read::{ReadSession, ReadSummary};
pub use write::{WriteSession, WriteSummary};

/// Application tag announced to the drive and stamped into every frame
/// this tool writes.
pub const APPLICATION_SIG: [u8; 4] = *b"LINX";

/// Cooperative cancellation flag, sampled between frames and inside poll
/// sleeps, never during an in-flight command exchange.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RustOnStreamError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Tunables for one session. The retry ceilings and skip distances are the
/// drive's documented defaults; they rarely need changing.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Ceiling for each independent recovery counter.
    pub retry_limit: u32,
    /// Frames skipped forward when the position goes stale on read.
    pub stale_position_skip: u32,
    /// Frames skipped forward on a transient end-of-data sense.
    pub eod_skip: u32,
    /// Write-recovery skip when the sense buffer doesn't provide one.
    pub write_skip_default: u32,
    /// Enable the position-polling workaround for no-reconnect firmware.
    pub poll_mode: bool,
    /// Pass frames with unrecognized metadata through to the output sink.
    pub raw_passthrough: bool,
    /// Read from here instead of the recorded data start.
    pub start_frame: Option<u32>,
    /// Stop reading at this frame (exclusive).
    pub stop_frame: Option<u32>,
    /// Retension the tape before the session body.
    pub retension: bool,
    pub rewind_at_end: bool,
    pub eject_at_end: bool,
    /// Allow a write session to format a blank or unrecognized tape.
    pub format_if_unrecognized: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            retry_limit: 5,
            stale_position_skip: 40,
            eod_skip: 5,
            write_skip_default: 80,
            poll_mode: false,
            raw_passthrough: false,
            start_frame: None,
            stop_frame: None,
            retension: false,
            rewind_at_end: true,
            eject_at_end: false,
            format_if_unrecognized: false,
        }
    }
}

/// Poll the drive until it reports ready.
///
/// Transient not-ready flavors keep the loop alive with a one-second
/// sleep and are logged only when the sense changes, so a slow spin-up
/// doesn't flood the log. Everything else ends the session.
pub fn wait_for_ready<T: Transport>(
    drive: &mut OnStreamDrive<T>,
    tolerate_no_medium: bool,
    cancel: &CancelToken,
) -> Result<()> {
    let mut last: Option<SenseCondition> = None;
    loop {
        cancel.check()?;
        drive.test_unit_ready()?;
        let condition = drive.condition();
        match condition {
            SenseCondition::NoSense => {
                debug!("Ready.");
                return Ok(());
            }
            c if c.is_transient_not_ready() => {
                if last != Some(c) {
                    info!("WaitForReady: {}", c);
                }
            }
            SenseCondition::NoMedium if tolerate_no_medium => {
                if last != Some(condition) {
                    info!("WaitForReady: {}", condition);
                }
            }
            c => {
                warn!("WaitForReady: {}", c);
                return Err(RustOnStreamError::Drive(c));
            }
        }
        last = Some(condition);
        std::thread::sleep(Duration::from_secs(1));
    }
}

/// Try each header copy until one parses, falling back from the first
/// header region (frames 5-9) to the second deeper into the tape.
/// Returns None when no copy carries a usable header (blank or foreign
/// tape); the caller decides whether that is fatal.
pub(crate) fn read_tape_header<T: Transport>(
    drive: &mut OnStreamDrive<T>,
    cancel: &CancelToken,
) -> Result<Option<TapeHeader>> {
    let layout = AdrLayout::for_revision(ADR_MAJOR, ADR_MINOR);
    for region in [FIRST_HEADER_FRAME, layout.second_header_frame] {
        for frame in region..region + HEADER_FRAME_COUNT {
            cancel.check()?;
            drive.locate(frame)?;
            wait_for_ready(drive, false, cancel)?;
            drive.start_read()?;
            wait_for_ready(drive, false, cancel)?;

            let image = drive.read_frame()?;
            if drive.condition() != SenseCondition::NoSense || image.len() < FRAME_TOTAL_SIZE {
                debug!("Header frame {} unreadable ({})", frame, drive.condition());
                continue;
            }

            match AuxFrame::decode(&image[FRAME_PAYLOAD_SIZE..]) {
                Some(aux) if aux.frame_type == FrameType::Header => {
                    match TapeHeader::decode(&image[..FRAME_PAYLOAD_SIZE]) {
                        Ok(header) => {
                            info!(
                                "Tape header: ADR {}.{}, write pass {}, data frames {}..{}",
                                header.major,
                                header.minor,
                                header.partition.write_pass_counter,
                                header.partition.first_frame_address,
                                header.partition.last_frame_address
                            );
                            return Ok(Some(header));
                        }
                        Err(e) => warn!("Header frame {} rejected: {}", frame, e),
                    }
                }
                Some(aux) => debug!(
                    "Frame {} is not a header frame (type {:?})",
                    frame, aux.frame_type
                ),
                None => debug!("Header frame {} has empty metadata", frame),
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scsi::fake::FakeDrive;

    #[test]
    fn wait_for_ready_rides_out_spin_up() {
        let mut fake = FakeDrive::new("1.06");
        // Becoming-ready twice, then ready.
        fake.queue_unit_condition(0x02, 0x04, 0x01);
        fake.queue_unit_condition(0x02, 0x04, 0x01);
        let mut drive = OnStreamDrive::new(fake);
        wait_for_ready(&mut drive, false, &CancelToken::new()).unwrap();
    }

    #[test]
    fn wait_for_ready_fails_on_init_required() {
        let mut fake = FakeDrive::new("1.06");
        fake.queue_unit_condition(0x02, 0x04, 0x02);
        let mut drive = OnStreamDrive::new(fake);
        let err = wait_for_ready(&mut drive, false, &CancelToken::new()).unwrap_err();
        assert!(matches!(
            err,
            RustOnStreamError::Drive(SenseCondition::InitRequired)
        ));
    }

    #[test]
    fn wait_for_ready_fails_on_unknown_sense() {
        let mut fake = FakeDrive::new("1.06");
        fake.queue_unit_condition(0x04, 0x44, 0x00);
        let mut drive = OnStreamDrive::new(fake);
        let err = wait_for_ready(&mut drive, false, &CancelToken::new()).unwrap_err();
        assert!(matches!(
            err,
            RustOnStreamError::Drive(SenseCondition::Unknown { .. })
        ));
    }

    #[test]
    fn cancellation_is_honored_in_the_wait_loop() {
        let mut fake = FakeDrive::new("1.06");
        fake.queue_unit_condition(0x02, 0x04, 0x01);
        let mut drive = OnStreamDrive::new(fake);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = wait_for_ready(&mut drive, false, &cancel).unwrap_err();
        assert!(matches!(err, RustOnStreamError::Cancelled));
    }
}
