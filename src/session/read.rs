//! Read session.
//!
//! Streams the user-data area back out of the tape: identify and configure
//! the drive, recover the write-pass counter from the header region, then
//! read frame by frame, validating the sequence-number cursor and
//! filtering frames left over from earlier write passes. Read errors,
//! stale positions, and premature end-of-data all skip forward and retry
//! within a bounded budget; a sequence number ahead of the cursor means
//! the head overshot during a past write recovery and triggers a
//! backward relocate.

use crate::error::{Result, RustOnStreamError, TransportFault};
use crate::firmware;
use crate::frame::{AuxFrame, FrameType, FRAME_PAYLOAD_SIZE, FRAME_TOTAL_SIZE};
use crate::scsi::sense::SenseCondition;
use crate::scsi::{OnStreamDrive, Transport};
use crate::tape::{AdrLayout, ADR_MAJOR, ADR_MINOR};
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{read_tape_header, wait_for_ready, CancelToken, SessionOptions, APPLICATION_SIG};

#[derive(Debug, Clone)]
pub struct ReadSummary {
    pub frames: u64,
    pub bytes: u64,
    pub elapsed: Duration,
}

pub struct ReadSession<T: Transport> {
    drive: OnStreamDrive<T>,
    opts: SessionOptions,
    cancel: CancelToken,
    layout: AdrLayout,
    current_frame: u32,
    /// Sequence cursor; adopted from the first consumed data frame so a
    /// forced start frame doesn't trigger a spurious backtrack.
    expected_sequence: Option<u32>,
    /// Pass being read, from the tape header. None only in raw mode on an
    /// unrecognized tape, where no filtering is possible.
    write_pass: Option<u16>,
    retry: u32,
    /// An end-of-data sense was met and skipped past; a second one before
    /// any further readable frame confirms the true end.
    eod_seen: bool,
}

impl<T: Transport> ReadSession<T> {
    pub fn new(drive: OnStreamDrive<T>, opts: SessionOptions, cancel: CancelToken) -> Self {
        Self {
            drive,
            opts,
            cancel,
            layout: AdrLayout::for_revision(ADR_MAJOR, ADR_MINOR),
            current_frame: 0,
            expected_sequence: None,
            write_pass: None,
            retry: 0,
            eod_seen: false,
        }
    }

    pub fn into_drive(self) -> OnStreamDrive<T> {
        self.drive
    }

    pub fn run<W: Write>(&mut self, output: &mut W) -> Result<ReadSummary> {
        let started = Instant::now();
        self.initialize()?;
        let (frames, bytes) = self.stream(output)?;
        self.finish()?;

        let elapsed = started.elapsed();
        let secs = elapsed.as_secs_f64().max(f64::MIN_POSITIVE);
        info!(
            "{} bytes in {:.1} seconds ({:.0} bytes/sec)",
            bytes,
            elapsed.as_secs_f64(),
            bytes as f64 / secs
        );
        Ok(ReadSummary {
            frames,
            bytes,
            elapsed,
        })
    }

    fn initialize(&mut self) -> Result<()> {
        let identity = self.drive.identify()?;
        info!(
            "Read session on {} {} (firmware {})",
            identity.vendor, identity.product, identity.revision
        );

        self.drive.set_vendor_id(APPLICATION_SIG)?;
        wait_for_ready(&mut self.drive, false, &self.cancel)?;

        if self.opts.retension {
            info!("Retensioning, this may take some time...");
            self.drive.retension()?;
            wait_for_ready(&mut self.drive, false, &self.cancel)?;
        }

        self.drive.set_data_transfer_mode(true, true)?;
        wait_for_ready(&mut self.drive, false, &self.cancel)?;

        let parameters = self.drive.get_tape_parameters()?;
        info!(
            "Tape capacity: {} frames ({} bytes)",
            parameters.total_frames(),
            parameters.capacity_bytes()
        );
        wait_for_ready(&mut self.drive, false, &self.cancel)?;

        self.best_effort_drain();

        let start = match read_tape_header(&mut self.drive, &self.cancel)? {
            Some(header) => {
                self.layout = header.layout();
                self.write_pass = Some(header.partition.write_pass_counter);
                header.partition.first_frame_address
            }
            None if self.opts.raw_passthrough => {
                warn!("No usable tape header; reading unfiltered from the data area");
                self.layout.first_data_frame
            }
            None => {
                return Err(RustOnStreamError::tape_format(
                    "tape is blank or written by an unknown application",
                ))
            }
        };

        self.current_frame = self.opts.start_frame.unwrap_or(start);
        info!("Starting read at frame {}", self.current_frame);
        self.relocate(self.current_frame)?;
        Ok(())
    }

    /// Empty whatever the drive buffered on its own account before the
    /// session repositions. This routine has never been observed to do
    /// anything useful in the field; nothing downstream depends on it, so
    /// every failure here is advisory.
    fn best_effort_drain(&mut self) {
        for _ in 0..3 {
            let position = match self.drive.read_position() {
                Ok(position) => position,
                Err(e) => {
                    debug!("Buffer drain skipped: {}", e);
                    return;
                }
            };
            let current = match self.drive.buffer_status() {
                Ok((_, current)) => current,
                Err(e) => {
                    debug!("Buffer drain skipped: {}", e);
                    return;
                }
            };
            // 128 and up means the drive is reading ahead for itself.
            if current == 0 || current >= 128 || position.host_frame == position.tape_frame {
                return;
            }
            debug!("Draining {} buffered frames from the drive", current);
            for _ in 0..current {
                if self.drive.read_frame().is_err()
                    || self.drive.condition() != SenseCondition::NoSense
                {
                    debug!("Buffer drain abandoned ({})", self.drive.condition());
                    return;
                }
            }
        }
    }

    /// Move the head and re-arm the drive's read-ahead.
    fn relocate(&mut self, frame: u32) -> Result<()> {
        self.current_frame = frame;
        self.drive.locate(frame)?;
        wait_for_ready(&mut self.drive, false, &self.cancel)?;
        self.drive.start_read()?;
        wait_for_ready(&mut self.drive, false, &self.cancel)?;
        Ok(())
    }

    fn bump_retry(&mut self, condition: SenseCondition) -> Result<()> {
        self.retry += 1;
        if self.retry > self.opts.retry_limit {
            warn!(
                "Giving up after {} read recovery attempts ({})",
                self.retry - 1,
                condition
            );
            return Err(RustOnStreamError::Drive(condition));
        }
        Ok(())
    }

    fn stream<W: Write>(&mut self, output: &mut W) -> Result<(u64, u64)> {
        let mut frames = 0u64;
        let mut bytes = 0u64;
        let poll = self.opts.poll_mode && firmware::needs_poll(self.drive.firmware());

        loop {
            self.cancel.check()?;
            if let Some(stop) = self.opts.stop_frame {
                if self.current_frame >= stop {
                    info!("Reached stop frame {}", stop);
                    break;
                }
            }

            // Some drive/adapter combinations reset mid-transfer when reads
            // are issued back to back; a short pause rides that out.
            std::thread::sleep(Duration::from_micros(50));

            let mut condition = SenseCondition::NoSense;
            if poll {
                condition =
                    self.drive
                        .wait_position(self.current_frame, Duration::from_secs(5), 40)?;
            }
            let image = if condition == SenseCondition::NoSense {
                let image = self.drive.read_frame()?;
                condition = self.drive.condition();
                image
            } else {
                Vec::new()
            };

            match condition {
                SenseCondition::NoSense => {}
                SenseCondition::UnrecoveredReadError => {
                    debug!(
                        "Unrecoverable read error at frame {}, checking next",
                        self.current_frame
                    );
                    self.bump_retry(condition)?;
                    self.relocate(self.current_frame + 1)?;
                    continue;
                }
                SenseCondition::TimeoutWaitPosition => {
                    debug!("Stale position at frame {}, skipping ahead", self.current_frame);
                    self.bump_retry(condition)?;
                    self.relocate(self.current_frame + self.opts.stale_position_skip)?;
                    continue;
                }
                SenseCondition::EndOfData => {
                    if self.eod_seen {
                        info!("End of data confirmed at frame {}", self.current_frame);
                        break;
                    }
                    debug!(
                        "End of data at frame {}, advancing {} frames to confirm",
                        self.current_frame, self.opts.eod_skip
                    );
                    self.eod_seen = true;
                    self.bump_retry(condition)?;
                    self.relocate(self.current_frame + self.opts.eod_skip)?;
                    continue;
                }
                SenseCondition::PowerOnReset => {
                    warn!("Power-on reset during read, reconfiguring");
                    self.bump_retry(condition)?;
                    wait_for_ready(&mut self.drive, false, &self.cancel)?;
                    self.drive.set_vendor_id(APPLICATION_SIG)?;
                    self.drive.set_data_transfer_mode(true, true)?;
                    wait_for_ready(&mut self.drive, false, &self.cancel)?;
                    self.relocate(self.current_frame)?;
                    continue;
                }
                condition => return Err(RustOnStreamError::Drive(condition)),
            }

            if image.len() < FRAME_TOTAL_SIZE {
                return Err(TransportFault::ShortRead.into());
            }
            self.eod_seen = false;

            match AuxFrame::decode(&image[FRAME_PAYLOAD_SIZE..]) {
                Some(aux) => match aux.frame_type {
                    FrameType::Data => {
                        if let Some(emitted) = self.consume_data_frame(&aux, &image, output)? {
                            frames += 1;
                            bytes += emitted;
                        }
                    }
                    FrameType::Eod => {
                        if self.retry == 0 {
                            info!(
                                "End-of-data frame at {} (sequence {})",
                                self.current_frame, aux.frame_sequence_number
                            );
                            break;
                        }
                        // Mid-recovery the head can land on an end-of-data
                        // frame left by an interrupted pass; keep looking.
                        debug!(
                            "End-of-data frame at {} during recovery, skipping",
                            self.current_frame
                        );
                        self.bump_retry(SenseCondition::EndOfData)?;
                        self.current_frame += 1;
                    }
                    FrameType::Header => {
                        debug!("Header frame at {}, skipping", self.current_frame);
                        self.current_frame += 1;
                    }
                    FrameType::Unknown(raw) => {
                        warn!(
                            "Frame {} has unrecognized type {:#06x}",
                            self.current_frame, raw
                        );
                        if self.opts.raw_passthrough {
                            output.write_all(&image)?;
                            frames += 1;
                            bytes += image.len() as u64;
                        }
                        self.current_frame += 1;
                    }
                },
                None => {
                    debug!("Frame {} carries no usable metadata", self.current_frame);
                    if self.opts.raw_passthrough {
                        output.write_all(&image)?;
                        frames += 1;
                        bytes += image.len() as u64;
                    }
                    self.current_frame += 1;
                }
            }
        }
        Ok((frames, bytes))
    }

    /// Settle one data frame against the pass filter and the sequence
    /// cursor. Returns the payload bytes emitted, or None when the frame
    /// was skipped (stale pass, duplicate) or an overshoot relocate was
    /// issued.
    fn consume_data_frame<W: Write>(
        &mut self,
        aux: &AuxFrame,
        image: &[u8],
        output: &mut W,
    ) -> Result<Option<u64>> {
        if let Some(pass) = self.write_pass {
            if aux.write_pass_counter != pass {
                debug!(
                    "Frame {} is from write pass {} (reading pass {}), skipping",
                    self.current_frame, aux.write_pass_counter, pass
                );
                self.current_frame += 1;
                return Ok(None);
            }
        }

        let sequence = aux.frame_sequence_number;
        match self.expected_sequence {
            Some(expected) if sequence < expected => {
                debug!(
                    "Frame {} repeats sequence {} (cursor {}), skipping duplicate",
                    self.current_frame, sequence, expected
                );
                self.current_frame += 1;
                Ok(None)
            }
            Some(expected) if sequence > expected => {
                // The tape ran ahead of the data during a write recovery;
                // step back far enough to pick the missing frames up.
                let delta = sequence - expected;
                self.bump_retry(SenseCondition::UnrecoveredReadError)?;
                let mut target = self.current_frame.saturating_sub(delta + 1);
                if self.current_frame >= self.layout.first_data_frame
                    && target < self.layout.first_data_frame
                {
                    let adjusted = target.saturating_sub(self.layout.header_region_len());
                    warn!(
                        "Backtrack for sequence {} crosses the header region, {} -> {}",
                        expected, target, adjusted
                    );
                    target = adjusted;
                }
                debug!(
                    "Frame {} has sequence {} ahead of cursor {}, backtracking to {}",
                    self.current_frame, sequence, expected, target
                );
                self.relocate(target)?;
                Ok(None)
            }
            _ => {
                if self.expected_sequence.is_none() {
                    debug!(
                        "Adopting sequence cursor {} from frame {}",
                        sequence, self.current_frame
                    );
                }
                let size = aux
                    .dat
                    .first()
                    .map(|entry| entry.size as usize)
                    .unwrap_or(0)
                    .min(FRAME_PAYLOAD_SIZE);
                output.write_all(&image[..size])?;
                self.expected_sequence = Some(sequence + 1);
                self.current_frame += 1;
                self.retry = 0;
                Ok(Some(size as u64))
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        if self.opts.rewind_at_end {
            self.drive.rewind()?;
            wait_for_ready(&mut self.drive, false, &self.cancel)?;
        }
        if self.opts.eject_at_end {
            info!("Ejecting tape");
            self.drive.eject()?;
        }
        Ok(())
    }
}
