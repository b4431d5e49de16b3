//! Write-error recovery.
//!
//! A medium write error leaves the defective spot under the head and an
//! unknown share of the transmitted frames stranded in the drive cache.
//! Firmware 1.06 and later can relocate past the defect while keeping its
//! cache, so nothing needs retransmitting; older firmware must drop the
//! cache, which invalidates every unconfirmed frame and forces a full
//! replay of the ledger at the new position.

use crate::error::{Result, RustOnStreamError};
use crate::scsi::constants::SKIP_LOCATE_MIN_FIRMWARE;
use crate::scsi::sense::SenseCondition;
use crate::scsi::{OnStreamDrive, Transport};
use tracing::{info, warn};

use super::ledger::PendingWriteLedger;
use super::{wait_for_ready, CancelToken, SessionOptions};

/// Run one full recovery: relocate past the defect and make the drive
/// cache consistent with the ledger again. Returns the frame writing
/// resumes at. Retries itself up to the session retry limit when the
/// recovery writes themselves hit the medium.
pub(crate) fn recover_write_error<T: Transport>(
    drive: &mut OnStreamDrive<T>,
    ledger: &PendingWriteLedger,
    opts: &SessionOptions,
    cancel: &CancelToken,
) -> Result<u32> {
    for attempt in 1..=opts.retry_limit {
        cancel.check()?;

        // The drive suggests a skip distance in byte 9 of the sense it
        // returned with the failure; fall back to the documented default.
        let sense = drive.last_sense();
        let skip = if sense[9] != 0 {
            sense[9] as u32
        } else {
            opts.write_skip_default
        };
        warn!(
            "Write error recovery, attempt {}/{}: skipping {} frames",
            attempt, opts.retry_limit, skip
        );

        if drive.firmware() >= SKIP_LOCATE_MIN_FIRMWARE {
            match drive.skip_locate(skip) {
                Ok(Some(resume)) => {
                    wait_for_ready(drive, false, cancel)?;
                    info!(
                        "Skip-locate recovery: resuming at frame {} with {} frames still cached",
                        resume,
                        ledger.len()
                    );
                    return Ok(resume);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Skip-locate failed ({}), falling back to full requeue", e);
                }
            }
        }

        match full_requeue(drive, ledger, skip, cancel)? {
            Some(resume) => return Ok(resume),
            // A replay write hit the medium again; go around with the
            // fresh sense.
            None => continue,
        }
    }

    warn!("Write error recovery exhausted its retry budget");
    Err(RustOnStreamError::Drive(SenseCondition::MediumWriteError))
}

/// Discard the drive cache, relocate past the defect, and retransmit the
/// whole ledger oldest-first. Returns None when a replay write itself
/// failed on the medium (the caller retries recovery).
fn full_requeue<T: Transport>(
    drive: &mut OnStreamDrive<T>,
    ledger: &PendingWriteLedger,
    skip: u32,
    cancel: &CancelToken,
) -> Result<Option<u32>> {
    let position = drive.read_position()?;
    drive.discard_buffered_frames()?;

    let target = position.tape_frame + skip;
    drive.locate(target)?;
    wait_for_ready(drive, false, cancel)?;

    for frame in ledger.replay() {
        if let Err(e) = drive.write_frame(frame) {
            // A transport fault co-occurring with a classified write error
            // is still recoverable; anything else is not.
            if drive.condition() != SenseCondition::MediumWriteError {
                return Err(e);
            }
        }
        match drive.condition() {
            SenseCondition::NoSense => {}
            SenseCondition::MediumWriteError => return Ok(None),
            condition => return Err(RustOnStreamError::Drive(condition)),
        }
    }

    info!(
        "Requeued {} unconfirmed frames starting at frame {}",
        ledger.len(),
        target
    );
    Ok(Some(target + ledger.len() as u32))
}
