//! Scripted in-memory drive for session tests.
//!
//! Implements [`Transport`] at the CDB level, so the sessions under test
//! exercise the real command construction, sense classification, and
//! recovery paths instead of per-method mocks. The model keeps a committed
//! frame store, a FIFO cache between host writes and the store, and fault
//! scripts keyed by frame address.

use crate::error::Result;
use crate::scsi::constants::{mode_pages, scsi_commands, SG_MAX_SENSE};
use crate::scsi::Transport;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

pub struct FakeDrive {
    /// Frames committed to the medium.
    pub frames: BTreeMap<u32, Vec<u8>>,
    /// Host-side frame cursor.
    pub position: u32,
    buffer: VecDeque<(u32, Vec<u8>)>,
    pub buffer_capacity: usize,
    /// Frames committed out of the cache per buffer-status poll. Zero keeps
    /// everything cached until an explicit flush, which makes ledger
    /// contents deterministic in recovery tests.
    pub drain_per_poll: usize,
    write_faults: HashMap<u32, u8>,
    read_faults: HashSet<u32>,
    power_on_reset_at: Option<u32>,
    unit_conditions: VecDeque<(u8, u8, u8)>,
    firmware: [u8; 4],
    sense: [u8; SG_MAX_SENSE],
    pub keep_cache_locates: u32,
    pub discards: u32,
    pub flushes: u32,
}

impl FakeDrive {
    pub fn new(firmware: &str) -> Self {
        let mut fw = [b' '; 4];
        fw.copy_from_slice(firmware.as_bytes());
        Self {
            frames: BTreeMap::new(),
            position: 0,
            buffer: VecDeque::new(),
            buffer_capacity: 56,
            drain_per_poll: 4,
            write_faults: HashMap::new(),
            read_faults: HashSet::new(),
            power_on_reset_at: None,
            unit_conditions: VecDeque::new(),
            firmware: fw,
            sense: [0u8; SG_MAX_SENSE],
            keep_cache_locates: 0,
            discards: 0,
            flushes: 0,
        }
    }

    /// Queue a sense triple for the next TEST UNIT READY probes.
    pub fn queue_unit_condition(&mut self, key: u8, asc: u8, ascq: u8) {
        self.unit_conditions.push_back((key, asc, ascq));
    }

    /// Reject the next write targeting `frame` with a medium write error.
    /// A nonzero `skip_hint` lands in sense byte 9.
    pub fn fail_write_at(&mut self, frame: u32, skip_hint: u8) {
        self.write_faults.insert(frame, skip_hint);
    }

    /// Fail the next read of `frame` with an unrecovered read error.
    pub fn fail_read_at(&mut self, frame: u32) {
        self.read_faults.insert(frame);
    }

    /// Answer the next write targeting `frame` with power-on reset and drop
    /// the cache, as a real reset does.
    pub fn power_reset_at_write(&mut self, frame: u32) {
        self.power_on_reset_at = Some(frame);
    }

    /// Preload committed tape content.
    pub fn load_frame(&mut self, frame: u32, image: Vec<u8>) {
        self.frames.insert(frame, image);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn ok(&mut self) {
        self.sense = [0u8; SG_MAX_SENSE];
    }

    fn set_sense(&mut self, key: u8, asc: u8, ascq: u8) {
        self.sense = [0u8; SG_MAX_SENSE];
        self.sense[0] = 0x70;
        self.sense[2] = key;
        self.sense[12] = asc;
        self.sense[13] = ascq;
    }

    fn commit(&mut self, count: usize) {
        for _ in 0..count {
            match self.buffer.pop_front() {
                Some((target, image)) => {
                    self.frames.insert(target, image);
                }
                None => break,
            }
        }
    }

    fn commit_all(&mut self) {
        self.commit(self.buffer.len());
    }

    fn test_unit_ready(&mut self) {
        match self.unit_conditions.pop_front() {
            Some((key, asc, ascq)) => self.set_sense(key, asc, ascq),
            None => self.ok(),
        }
    }

    fn inquiry(&mut self) -> Vec<u8> {
        let mut reply = vec![0u8; 36];
        reply[0] = 0x01; // sequential-access device
        reply[8..16].copy_from_slice(b"OnStream");
        reply[16..32].copy_from_slice(b"SC-50           ");
        reply[32..36].copy_from_slice(&self.firmware);
        self.ok();
        reply
    }

    fn read(&mut self, transfer_length: u8) -> Vec<u8> {
        if transfer_length == 0 {
            // Read-ahead arm.
            self.ok();
            return Vec::new();
        }
        if self.read_faults.remove(&self.position) {
            self.set_sense(0x03, 0x11, 0x00);
            return Vec::new();
        }
        match self.frames.get(&self.position) {
            Some(image) => {
                let image = image.clone();
                self.ok();
                self.position += 1;
                image
            }
            None => {
                // Blank region.
                self.set_sense(0x08, 0x00, 0x05);
                Vec::new()
            }
        }
    }

    fn write(&mut self, data: &[u8]) {
        let target = self.position;
        if self.power_on_reset_at == Some(target) {
            self.power_on_reset_at = None;
            self.buffer.clear();
            self.set_sense(0x06, 0x29, 0x00);
            return;
        }
        if let Some(skip_hint) = self.write_faults.remove(&target) {
            self.set_sense(0x03, 0x0C, 0x00);
            self.sense[9] = skip_hint;
            return;
        }
        self.buffer.push_back((target, data.to_vec()));
        self.position += 1;
        self.ok();
    }

    fn locate(&mut self, command: &[u8]) {
        let target = u32::from_be_bytes([command[3], command[4], command[5], command[6]]);
        if command[9] & 0x80 != 0 {
            // Keep the cache: pending frames follow the head to the new
            // position.
            self.keep_cache_locates += 1;
            for (index, entry) in self.buffer.iter_mut().enumerate() {
                entry.0 = target + index as u32;
            }
            self.position = target + self.buffer.len() as u32;
        } else {
            self.buffer.clear();
            self.position = target;
        }
        self.ok();
    }

    fn read_position(&mut self) -> Vec<u8> {
        let mut reply = vec![0u8; 20];
        let host = self.position;
        let tape = self.position - self.buffer.len() as u32;
        reply[4..8].copy_from_slice(&host.to_be_bytes());
        reply[8..12].copy_from_slice(&tape.to_be_bytes());
        reply[15] = self.buffer.len() as u8;
        self.ok();
        reply
    }

    fn mode_sense(&mut self, page: u8, length: usize) -> Vec<u8> {
        let mut reply = vec![0u8; length];
        match page {
            mode_pages::BUFFER_STATUS => {
                self.commit(self.drain_per_poll);
                if reply.len() >= 8 {
                    reply[6] = self.buffer_capacity as u8;
                    reply[7] = self.buffer.len() as u8;
                }
            }
            mode_pages::TAPE_PARAMETERS => {
                if reply.len() >= 14 {
                    reply[6] = 0x40;
                    reply[10..12].copy_from_slice(&19239u16.to_be_bytes());
                    reply[12..14].copy_from_slice(&24u16.to_be_bytes());
                }
            }
            _ => {}
        }
        self.ok();
        reply
    }

    fn mode_select(&mut self, command: &[u8]) {
        match command.get(10) {
            Some(&page) if page == mode_pages::BUFFER_STATUS => {
                self.discards += 1;
                self.buffer.clear();
            }
            Some(&page) if page == mode_pages::VENDOR_ID => {}
            Some(&page) if page == mode_pages::DATA_TRANSFER_MODE => {}
            _ => {}
        }
        self.ok();
    }
}

impl Transport for FakeDrive {
    fn execute(&mut self, command: &[u8], reply_len: usize) -> Result<Vec<u8>> {
        let reply = match command[0] {
            scsi_commands::TEST_UNIT_READY => {
                self.test_unit_ready();
                Vec::new()
            }
            scsi_commands::REQUEST_SENSE => {
                let sense = self.sense.to_vec();
                sense
            }
            scsi_commands::INQUIRY => self.inquiry(),
            scsi_commands::READ_6 => self.read(command[4]),
            scsi_commands::WRITE_6 => {
                self.write(&command[6..]);
                Vec::new()
            }
            scsi_commands::WRITE_FILEMARKS => {
                self.flushes += 1;
                self.commit_all();
                self.ok();
                Vec::new()
            }
            scsi_commands::MODE_SENSE_6 => {
                self.mode_sense(command[2], reply_len)
            }
            scsi_commands::MODE_SELECT_6 => {
                self.mode_select(command);
                Vec::new()
            }
            scsi_commands::LOCATE => {
                self.locate(command);
                Vec::new()
            }
            scsi_commands::READ_POSITION => self.read_position(),
            scsi_commands::REWIND => {
                self.position = 0;
                self.ok();
                Vec::new()
            }
            scsi_commands::LOAD_UNLOAD => {
                self.ok();
                Vec::new()
            }
            _ => {
                self.set_sense(0x05, 0x24, 0x00);
                Vec::new()
            }
        };
        Ok(reply)
    }

    fn last_sense(&self) -> [u8; SG_MAX_SENSE] {
        self.sense
    }
}
