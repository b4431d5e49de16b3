// SCSI constant definitions (based on the original sg interface code)
pub const SG_MAX_SENSE: usize = 16;
pub const SG_HEADER_LEN: usize = 36;

// Default command timeout, seconds. The drive is allowed a long time to
// reposition before answering.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 90;

// Firmware revisions at or above this support LOCATE with the skip bit,
// which recovers write errors without discarding the drive cache.
pub const SKIP_LOCATE_MIN_FIRMWARE: u32 = 10600;

// The drive will not reconnect on writes if more frames than this are
// outstanding in its cache.
pub const MAX_FILL_BUFFERS: usize = 50;

// SCSI Commands Module
pub mod scsi_commands {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REWIND: u8 = 0x01;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const READ_6: u8 = 0x08;
    pub const WRITE_6: u8 = 0x0A;
    pub const WRITE_FILEMARKS: u8 = 0x10;
    pub const INQUIRY: u8 = 0x12;
    pub const MODE_SELECT_6: u8 = 0x15;
    pub const MODE_SENSE_6: u8 = 0x1A;
    pub const LOAD_UNLOAD: u8 = 0x1B;
    pub const LOCATE: u8 = 0x2B;
    pub const READ_POSITION: u8 = 0x34;
}

// Vendor mode page codes
pub mod mode_pages {
    pub const TAPE_PARAMETERS: u8 = 0x2B;
    pub const BUFFER_STATUS: u8 = 0x33;
    pub const DATA_TRANSFER_MODE: u8 = 0xB0;
    pub const VENDOR_ID: u8 = 0xB6;
}
