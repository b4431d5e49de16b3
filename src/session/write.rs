//! Write session.
//!
//! Drives one end-to-end write pass: identify and configure the drive,
//! rewrite the header regions with a bumped write-pass counter, stream
//! payload frames with the pending-write ledger shadowing the drive cache,
//! recover from medium faults and resets, then write end-of-data and drain.

use crate::error::{Result, RustOnStreamError};
use crate::frame::{
    assemble_frame, AuxFrame, DataAccessEntry, FrameType, FRAME_PAYLOAD_SIZE, FRAME_TOTAL_SIZE,
};
use crate::scsi::constants::MAX_FILL_BUFFERS;
use crate::scsi::sense::SenseCondition;
use crate::scsi::{OnStreamDrive, Transport};
use crate::tape::{
    AdrLayout, TapeHeader, ADR_MAJOR, ADR_MINOR, CONFIG_PARTITION, DATA_PARTITION,
    FIRST_HEADER_FRAME, HEADER_FRAME_COUNT, PARTITION_VERSION,
};
use std::io::Read;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::ledger::PendingWriteLedger;
use super::recovery::recover_write_error;
use super::{read_tape_header, wait_for_ready, CancelToken, SessionOptions, APPLICATION_SIG};

#[derive(Debug, Clone)]
pub struct WriteSummary {
    pub frames: u64,
    pub bytes: u64,
    pub elapsed: Duration,
}

pub struct WriteSession<T: Transport> {
    drive: OnStreamDrive<T>,
    opts: SessionOptions,
    cancel: CancelToken,
    ledger: PendingWriteLedger,
    layout: AdrLayout,
    current_frame: u32,
    sequence: u32,
    write_pass: u16,
    total_frames: u32,
    recovery_attempts: u32,
}

impl<T: Transport> WriteSession<T> {
    pub fn new(drive: OnStreamDrive<T>, opts: SessionOptions, cancel: CancelToken) -> Self {
        Self {
            drive,
            opts,
            cancel,
            ledger: PendingWriteLedger::new(),
            layout: AdrLayout::for_revision(ADR_MAJOR, ADR_MINOR),
            current_frame: 0,
            sequence: 0,
            write_pass: 0,
            total_frames: 0,
            recovery_attempts: 0,
        }
    }

    pub fn into_drive(self) -> OnStreamDrive<T> {
        self.drive
    }

    pub fn run<R: Read>(&mut self, input: &mut R) -> Result<WriteSummary> {
        let started = Instant::now();
        self.initialize()?;
        let bytes = self.stream(input)?;
        let frames = self.sequence as u64;
        self.finish()?;

        let elapsed = started.elapsed();
        let secs = elapsed.as_secs_f64().max(f64::MIN_POSITIVE);
        info!(
            "{} bytes in {:.1} seconds ({:.0} bytes/sec)",
            bytes,
            elapsed.as_secs_f64(),
            bytes as f64 / secs
        );
        Ok(WriteSummary {
            frames,
            bytes,
            elapsed,
        })
    }

    fn initialize(&mut self) -> Result<()> {
        let identity = self.drive.identify()?;
        info!(
            "Write session on {} {} (firmware {})",
            identity.vendor, identity.product, identity.revision
        );

        self.drive.set_vendor_id(APPLICATION_SIG)?;
        self.check_configured("vendor ID")?;
        wait_for_ready(&mut self.drive, false, &self.cancel)?;

        if self.opts.retension {
            info!("Retensioning, this may take some time...");
            self.drive.retension()?;
            wait_for_ready(&mut self.drive, false, &self.cancel)?;
        }

        self.drive.set_data_transfer_mode(true, true)?;
        self.check_configured("data transfer mode")?;
        wait_for_ready(&mut self.drive, false, &self.cancel)?;

        let parameters = self.drive.get_tape_parameters()?;
        self.total_frames = parameters.total_frames();
        info!(
            "Tape capacity: {} frames ({} bytes)",
            self.total_frames,
            parameters.capacity_bytes()
        );
        wait_for_ready(&mut self.drive, false, &self.cancel)?;

        self.write_pass = match read_tape_header(&mut self.drive, &self.cancel)? {
            Some(header) => header.partition.write_pass_counter.wrapping_add(1),
            None if self.opts.format_if_unrecognized => {
                info!("No usable tape header found, starting write pass 0");
                0
            }
            None => {
                return Err(RustOnStreamError::tape_format(
                    "tape is blank or written by an unknown application; use --force to format",
                ))
            }
        };
        info!("Starting write pass {}", self.write_pass);

        self.write_header_regions()?;

        self.locate_for_write(self.layout.first_data_frame)?;
        self.sequence = 0;
        Ok(())
    }

    fn check_configured(&mut self, what: &str) -> Result<()> {
        match self.drive.condition() {
            SenseCondition::NoSense => Ok(()),
            condition => {
                warn!("Configuring {} failed: {}", what, condition);
                Err(RustOnStreamError::Drive(condition))
            }
        }
    }

    /// Rewrite both header regions for the new write pass.
    fn write_header_regions(&mut self) -> Result<()> {
        let header = TapeHeader::new(self.write_pass, self.total_frames);
        let mut payload = vec![0u8; FRAME_PAYLOAD_SIZE];
        header.encode_into(&mut payload);

        let aux = AuxFrame {
            application_sig: APPLICATION_SIG,
            frame_type: FrameType::Header,
            partition_number: CONFIG_PARTITION,
            partition_version: PARTITION_VERSION,
            write_pass_counter: self.write_pass,
            dat: vec![DataAccessEntry {
                size: FRAME_PAYLOAD_SIZE as u32,
                logical_elements: 1,
                flags: 0,
            }],
            ..AuxFrame::default()
        };
        let image = assemble_frame(&payload, &aux);

        for region in [FIRST_HEADER_FRAME, self.layout.second_header_frame] {
            debug!("Writing header frames at {}", region);
            self.locate_for_write(region)?;
            for _ in 0..HEADER_FRAME_COUNT {
                self.transmit_frame(image.clone())?;
            }
        }
        self.drain()?;
        Ok(())
    }

    /// Relocate with dirty buffers committed first, so nothing cached gets
    /// carried to the wrong position.
    fn locate_for_write(&mut self, frame: u32) -> Result<()> {
        if !self.ledger.is_empty() {
            self.drain()?;
        }
        self.drive.locate(frame)?;
        wait_for_ready(&mut self.drive, false, &self.cancel)?;
        self.current_frame = frame;
        Ok(())
    }

    fn stream<R: Read>(&mut self, input: &mut R) -> Result<u64> {
        let mut total = 0u64;
        loop {
            self.cancel_checkpoint()?;

            let mut payload = vec![0u8; FRAME_PAYLOAD_SIZE];
            let filled = read_full(input, &mut payload)?;
            if filled == 0 {
                break;
            }

            let aux = AuxFrame {
                application_sig: APPLICATION_SIG,
                frame_type: FrameType::Data,
                partition_number: DATA_PARTITION,
                partition_version: PARTITION_VERSION,
                write_pass_counter: self.write_pass,
                first_frame_address: self.layout.first_data_frame,
                last_frame_address: self.total_frames,
                frame_sequence_number: self.sequence,
                logical_block_address: self.sequence as u64,
                dat: vec![DataAccessEntry {
                    size: filled as u32,
                    logical_elements: 1,
                    flags: 0,
                }],
                ..AuxFrame::default()
            };

            self.transmit_frame(assemble_frame(&payload, &aux))?;
            self.sequence += 1;
            total += filled as u64;

            if filled < FRAME_PAYLOAD_SIZE {
                break;
            }
        }
        Ok(total)
    }

    /// Sampled between frames only. Commits what the drive already holds
    /// before propagating the termination, so position and ledger stay
    /// consistent.
    fn cancel_checkpoint(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!(
                "Cancellation requested; committing {} buffered frames before teardown",
                self.ledger.len()
            );
            if let Err(e) = self.drain() {
                warn!("Drain during cancellation failed: {}", e);
            }
            return Err(RustOnStreamError::Cancelled);
        }
        Ok(())
    }

    /// Send one frame and settle its disposition: on success it enters the
    /// ledger and confirmed frames are trimmed; on a write fault the
    /// recovery protocol relocates the head and the same frame is retried.
    fn transmit_frame(&mut self, image: Vec<u8>) -> Result<()> {
        debug_assert_eq!(image.len(), FRAME_TOTAL_SIZE);
        loop {
            if self.ledger.len() >= MAX_FILL_BUFFERS {
                self.wait_for_buffer_room()?;
            }

            if let Err(e) = self.drive.write_frame(&image) {
                // A transport fault that arrives together with a classified
                // write error still goes through recovery.
                if self.drive.condition() != SenseCondition::MediumWriteError {
                    return Err(e);
                }
            }

            match self.drive.condition() {
                SenseCondition::NoSense => {
                    self.ledger.push(image);
                    self.current_frame += 1;
                    self.reconcile_buffer()?;
                    self.recovery_attempts = 0;
                    return Ok(());
                }
                SenseCondition::MediumWriteError | SenseCondition::TimeoutWaitPosition => {
                    self.bump_recovery()?;
                    let resume = recover_write_error(
                        &mut self.drive,
                        &self.ledger,
                        &self.opts,
                        &self.cancel,
                    )?;
                    self.current_frame = resume;
                }
                SenseCondition::LongWrite => {
                    wait_for_ready(&mut self.drive, false, &self.cancel)?;
                }
                SenseCondition::PowerOnReset => {
                    self.bump_recovery()?;
                    self.recover_power_on_reset()?;
                }
                condition => return Err(RustOnStreamError::Drive(condition)),
            }
        }
    }

    fn bump_recovery(&mut self) -> Result<()> {
        self.recovery_attempts += 1;
        if self.recovery_attempts > self.opts.retry_limit {
            warn!(
                "Giving up after {} write recovery attempts",
                self.recovery_attempts - 1
            );
            return Err(RustOnStreamError::Drive(self.drive.condition()));
        }
        Ok(())
    }

    /// The firmware stops reconnecting when too many frames are cached;
    /// hold off until the drive retires some.
    fn wait_for_buffer_room(&mut self) -> Result<()> {
        while self.ledger.len() >= MAX_FILL_BUFFERS {
            self.cancel.check()?;
            std::thread::sleep(Duration::from_millis(100));
            self.reconcile_buffer()?;
        }
        Ok(())
    }

    /// Ask the drive how many frames it still caches and retire the
    /// confirmed prefix from the ledger. A drive count above the ledger
    /// length means the accounting has desynchronized from physical state;
    /// writing anything further would corrupt the tape.
    fn reconcile_buffer(&mut self) -> Result<()> {
        let (_max, current) = self.drive.buffer_status()?;
        let current = current as usize;
        if current > self.ledger.len() {
            return Err(RustOnStreamError::buffer_accounting(format!(
                "internal frame buffer/tape buffer mismatch: drive holds {}, ledger holds {}",
                current,
                self.ledger.len()
            )));
        }
        let confirmed = self.ledger.len() - current;
        self.ledger.confirm_trim(confirmed)
    }

    /// After a reset the drive cache is gone and the tape reverts to the
    /// last committed position: everything unconfirmed is replayed from
    /// there, not from the beginning of the tape.
    fn recover_power_on_reset(&mut self) -> Result<()> {
        warn!(
            "Power-on reset during write; replaying {} unconfirmed frames",
            self.ledger.len()
        );
        // The probe that reports the reset also clears the unit attention.
        self.drive.test_unit_ready()?;
        wait_for_ready(&mut self.drive, false, &self.cancel)?;

        // Mode settings do not survive a reset.
        self.drive.set_vendor_id(APPLICATION_SIG)?;
        self.drive.set_data_transfer_mode(true, true)?;
        wait_for_ready(&mut self.drive, false, &self.cancel)?;

        let resume = self.current_frame - self.ledger.len() as u32;
        info!("Resuming write at frame {}", resume);
        self.drive.locate(resume)?;
        wait_for_ready(&mut self.drive, false, &self.cancel)?;

        for frame in self.ledger.replay() {
            self.drive.write_frame(frame)?;
            match self.drive.condition() {
                SenseCondition::NoSense => {}
                condition => return Err(RustOnStreamError::Drive(condition)),
            }
        }
        self.current_frame = resume + self.ledger.len() as u32;
        Ok(())
    }

    /// Flush the drive cache and wait for the ledger to empty.
    fn drain(&mut self) -> Result<()> {
        debug!("Draining {} buffered frames", self.ledger.len());
        self.drive.flush()?;
        let mut polls = 0u32;
        while !self.ledger.is_empty() {
            wait_for_ready(&mut self.drive, false, &self.cancel)?;
            self.reconcile_buffer()?;
            if self.ledger.is_empty() {
                break;
            }
            if self.drive.condition() == SenseCondition::MediumWriteError {
                self.bump_recovery()?;
                let resume =
                    recover_write_error(&mut self.drive, &self.ledger, &self.opts, &self.cancel)?;
                self.current_frame = resume;
                self.drive.flush()?;
            }
            polls += 1;
            if polls > 120 {
                return Err(RustOnStreamError::buffer_accounting(
                    "drive failed to drain its cache",
                ));
            }
            std::thread::sleep(Duration::from_secs(1));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        info!("Writing end-of-data frame at sequence {}", self.sequence);
        let aux = AuxFrame {
            application_sig: APPLICATION_SIG,
            frame_type: FrameType::Eod,
            partition_number: DATA_PARTITION,
            partition_version: PARTITION_VERSION,
            write_pass_counter: self.write_pass,
            first_frame_address: self.layout.first_data_frame,
            last_frame_address: self.total_frames,
            frame_sequence_number: self.sequence,
            logical_block_address: self.sequence as u64,
            dat: Vec::new(),
            ..AuxFrame::default()
        };
        let payload = vec![0u8; FRAME_PAYLOAD_SIZE];
        self.transmit_frame(assemble_frame(&payload, &aux))?;

        self.drain()?;

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

fn read_full<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scsi::fake::FakeDrive;

    fn session(fake: FakeDrive) -> WriteSession<FakeDrive> {
        let opts = SessionOptions {
            format_if_unrecognized: true,
            ..SessionOptions::default()
        };
        WriteSession::new(OnStreamDrive::new(fake), opts, CancelToken::new())
    }

    fn decode_at(fake: &FakeDrive, frame: u32) -> AuxFrame {
        let image = fake.frames.get(&frame).expect("frame missing");
        AuxFrame::decode(&image[FRAME_PAYLOAD_SIZE..]).expect("metadata empty")
    }

    #[test]
    fn two_frame_write_produces_sequenced_frames_and_eod() {
        let fake = FakeDrive::new("1.06");
        let mut session = session(fake);
        let input = vec![0xA5u8; 2 * FRAME_PAYLOAD_SIZE];

        let summary = session.run(&mut input.as_slice()).unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.bytes, 2 * FRAME_PAYLOAD_SIZE as u64);

        let fake = session.into_drive().into_transport();
        assert_eq!(fake.buffered(), 0, "ledger and cache must drain");

        // Header regions are populated.
        for frame in FIRST_HEADER_FRAME..FIRST_HEADER_FRAME + HEADER_FRAME_COUNT {
            assert_eq!(decode_at(&fake, frame).frame_type, FrameType::Header);
        }
        assert_eq!(decode_at(&fake, 0xBAE).frame_type, FrameType::Header);

        // Two data frames at the data start, then end-of-data.
        let first = decode_at(&fake, 0xBB8);
        assert_eq!(first.frame_type, FrameType::Data);
        assert_eq!(first.frame_sequence_number, 0);
        assert_eq!(first.dat[0].size, FRAME_PAYLOAD_SIZE as u32);
        let second = decode_at(&fake, 0xBB9);
        assert_eq!(second.frame_sequence_number, 1);
        assert_eq!(second.dat[0].size, FRAME_PAYLOAD_SIZE as u32);
        assert_eq!(decode_at(&fake, 0xBBA).frame_type, FrameType::Eod);

        // Payload contents survive.
        assert_eq!(
            &fake.frames[&0xBB8][..FRAME_PAYLOAD_SIZE],
            &input[..FRAME_PAYLOAD_SIZE]
        );
    }

    #[test]
    fn existing_tape_bumps_the_write_pass() {
        let fake = FakeDrive::new("1.06");
        let mut first = session(fake);
        first.run(&mut [0x11u8; 100].as_slice()).unwrap();
        let fake = first.into_drive().into_transport();

        let mut second = WriteSession::new(
            OnStreamDrive::new(fake),
            SessionOptions::default(),
            CancelToken::new(),
        );
        second.run(&mut [0x22u8; 100].as_slice()).unwrap();
        let fake = second.into_drive().into_transport();

        assert_eq!(decode_at(&fake, 0xBB8).write_pass_counter, 1);
        assert_eq!(decode_at(&fake, 5).write_pass_counter, 1);
    }

    #[test]
    fn blank_tape_without_force_is_a_format_error() {
        let fake = FakeDrive::new("1.06");
        let mut session = WriteSession::new(
            OnStreamDrive::new(fake),
            SessionOptions::default(),
            CancelToken::new(),
        );
        let err = session.run(&mut [0u8; 10].as_slice()).unwrap_err();
        assert!(matches!(err, RustOnStreamError::TapeFormat(_)));
    }

    #[test]
    fn old_firmware_write_error_requeues_the_ledger() {
        let mut fake = FakeDrive::new("1.05");
        fake.drain_per_poll = 0; // keep frames cached until flushed
        fake.fail_write_at(0xBB9, 0);
        let mut session = session(fake);
        let input = vec![0x3Cu8; 3 * FRAME_PAYLOAD_SIZE];

        session.run(&mut input.as_slice()).unwrap();
        let fake = session.into_drive().into_transport();

        assert_eq!(fake.discards, 1, "old firmware must discard the cache");
        assert_eq!(fake.keep_cache_locates, 0);

        // The default skip is 80 frames past the committed head (0xBB8).
        let resume = 0xBB8 + 80;
        for (offset, expected_seq) in (0..3u32).enumerate() {
            let aux = decode_at(&fake, resume + offset as u32);
            assert_eq!(aux.frame_type, FrameType::Data);
            assert_eq!(aux.frame_sequence_number, expected_seq);
        }
        assert_eq!(decode_at(&fake, resume + 3).frame_type, FrameType::Eod);
        // Nothing committed at the abandoned spot.
        assert!(!fake.frames.contains_key(&0xBB8));
    }

    #[test]
    fn new_firmware_write_error_uses_skip_locate() {
        let mut fake = FakeDrive::new("1.07");
        fake.drain_per_poll = 0;
        fake.fail_write_at(0xBB9, 10);
        let mut session = session(fake);
        let input = vec![0x3Cu8; 3 * FRAME_PAYLOAD_SIZE];

        session.run(&mut input.as_slice()).unwrap();
        let fake = session.into_drive().into_transport();

        assert_eq!(fake.keep_cache_locates, 1);
        assert_eq!(fake.discards, 0, "skip-locate must keep the cache");

        // Sense byte 9 carried a skip of 10 past the committed head.
        let resume = 0xBB8 + 10;
        for (offset, expected_seq) in (0..3u32).enumerate() {
            let aux = decode_at(&fake, resume + offset as u32);
            assert_eq!(aux.frame_sequence_number, expected_seq);
        }
        assert_eq!(decode_at(&fake, resume + 3).frame_type, FrameType::Eod);
    }

    #[test]
    fn power_on_reset_replays_unconfirmed_frames() {
        let mut fake = FakeDrive::new("1.06");
        fake.drain_per_poll = 0;
        fake.power_reset_at_write(0xBBA);
        let mut session = session(fake);
        let input = vec![0x77u8; 3 * FRAME_PAYLOAD_SIZE];

        session.run(&mut input.as_slice()).unwrap();
        let fake = session.into_drive().into_transport();

        for (offset, expected_seq) in (0..3u32).enumerate() {
            let aux = decode_at(&fake, 0xBB8 + offset as u32);
            assert_eq!(aux.frame_type, FrameType::Data);
            assert_eq!(aux.frame_sequence_number, expected_seq);
        }
        assert_eq!(decode_at(&fake, 0xBBB).frame_type, FrameType::Eod);
    }

    #[test]
    fn repeated_write_errors_exhaust_the_retry_budget() {
        let mut fake = FakeDrive::new("1.05");
        fake.drain_per_poll = 0;
        // Fail the first data frame and every recovery landing spot.
        fake.fail_write_at(0xBB8, 0);
        for attempt in 1..=12u32 {
            fake.fail_write_at(0xBB8 + attempt * 80, 0);
        }
        let mut session = session(fake);
        let input = vec![0xEEu8; FRAME_PAYLOAD_SIZE];

        let err = session.run(&mut input.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            RustOnStreamError::Drive(SenseCondition::MediumWriteError)
        ));
    }

    #[test]
    fn cancellation_stops_between_frames() {
        let fake = FakeDrive::new("1.06");
        let cancel = CancelToken::new();
        let mut session = WriteSession::new(
            OnStreamDrive::new(fake),
            SessionOptions {
                format_if_unrecognized: true,
                ..SessionOptions::default()
            },
            cancel.clone(),
        );
        cancel.cancel();
        let input = vec![0u8; FRAME_PAYLOAD_SIZE];
        let err = session.run(&mut input.as_slice()).unwrap_err();
        assert!(matches!(err, RustOnStreamError::Cancelled));
        // Nothing left half-committed in the cache.
        assert_eq!(session.into_drive().into_transport().buffered(), 0);
    }
}
