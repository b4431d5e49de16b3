//! On-tape auxiliary frame metadata codec.
//!
//! Every tape frame carries a 512-byte auxiliary record after its 32 KB
//! payload. Multi-byte fields are stored big-endian on the medium, so each
//! field is byte-swapped independently; the record is never blitted whole.

pub const FRAME_PAYLOAD_SIZE: usize = 32768;
pub const AUX_FRAME_SIZE: usize = 512;
pub const FRAME_TOTAL_SIZE: usize = FRAME_PAYLOAD_SIZE + AUX_FRAME_SIZE;

pub const MAX_DAT_ENTRIES: usize = 16;

/// Frame classification from the auxiliary record's type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Header,
    Eod,
    Unknown(u16),
}

impl FrameType {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0x0080 => FrameType::Data,
            0x0040 => FrameType::Header,
            0x0010 => FrameType::Eod,
            other => FrameType::Unknown(other),
        }
    }

    pub fn raw(self) -> u16 {
        match self {
            FrameType::Data => 0x0080,
            FrameType::Header => 0x0040,
            FrameType::Eod => 0x0010,
            FrameType::Unknown(other) => other,
        }
    }
}

/// One data-access-table entry describing a sub-block packed into the
/// frame payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataAccessEntry {
    pub size: u32,
    pub logical_elements: u16,
    pub flags: u8,
}

/// Host representation of the auxiliary record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxFrame {
    pub application_sig: [u8; 4],
    pub hw_field: u32,
    pub update_frame_counter: u32,
    pub frame_type: FrameType,
    pub partition_number: u8,
    pub partition_version: u8,
    pub write_pass_counter: u16,
    pub first_frame_address: u32,
    pub last_frame_address: u32,
    pub frame_sequence_number: u32,
    pub logical_block_address: u64,
    pub dat: Vec<DataAccessEntry>,
    pub filemark_count: u32,
    pub last_mark_frame_address: u32,
    pub driver_unique: [u8; 32],
}

impl Default for AuxFrame {
    fn default() -> Self {
        Self {
            application_sig: [0u8; 4],
            hw_field: 0,
            update_frame_counter: 0,
            frame_type: FrameType::Data,
            partition_number: 0,
            partition_version: 0,
            write_pass_counter: 0,
            first_frame_address: 0,
            last_frame_address: 0,
            frame_sequence_number: 0,
            logical_block_address: 0,
            dat: Vec::new(),
            filemark_count: 0,
            last_mark_frame_address: 0,
            driver_unique: [0u8; 32],
        }
    }
}

impl AuxFrame {
    /// Marshal into the on-media layout. The leading 4-byte format marker
    /// is written as zero, which is what marks the record valid.
    pub fn encode(&self) -> [u8; AUX_FRAME_SIZE] {
        let mut buf = [0u8; AUX_FRAME_SIZE];

        buf[4..8].copy_from_slice(&self.application_sig);
        buf[8..12].copy_from_slice(&self.hw_field.to_be_bytes());
        buf[12..16].copy_from_slice(&self.update_frame_counter.to_be_bytes());
        buf[16..18].copy_from_slice(&self.frame_type.raw().to_be_bytes());
        buf[20] = self.partition_number;
        buf[21] = self.partition_version;
        buf[22..24].copy_from_slice(&self.write_pass_counter.to_be_bytes());
        buf[24..28].copy_from_slice(&self.first_frame_address.to_be_bytes());
        buf[28..32].copy_from_slice(&self.last_frame_address.to_be_bytes());
        buf[44..48].copy_from_slice(&self.frame_sequence_number.to_be_bytes());
        buf[48..56].copy_from_slice(&self.logical_block_address.to_be_bytes());

        let entries = self.dat.len().min(MAX_DAT_ENTRIES);
        buf[58] = entries as u8;
        for (i, entry) in self.dat.iter().take(entries).enumerate() {
            let off = 60 + i * 8;
            buf[off..off + 4].copy_from_slice(&entry.size.to_be_bytes());
            buf[off + 4..off + 6].copy_from_slice(&entry.logical_elements.to_be_bytes());
            buf[off + 6] = entry.flags;
        }

        buf[192..196].copy_from_slice(&self.filemark_count.to_be_bytes());
        buf[200..204].copy_from_slice(&self.last_mark_frame_address.to_be_bytes());
        buf[224..256].copy_from_slice(&self.driver_unique);
        buf
    }

    /// Unmarshal from the on-media layout. Returns None when the format
    /// marker is nonzero: the record is semantically empty, which callers
    /// treat as "no usable metadata", not as an error.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        debug_assert!(buf.len() >= AUX_FRAME_SIZE);
        if buf[0] != 0 || buf[1] != 0 || buf[2] != 0 || buf[3] != 0 {
            return None;
        }

        let be16 = |off: usize| u16::from_be_bytes([buf[off], buf[off + 1]]);
        let be32 =
            |off: usize| u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);

        let entries = (buf[58] as usize).min(MAX_DAT_ENTRIES);
        let mut dat = Vec::with_capacity(entries);
        for i in 0..entries {
            let off = 60 + i * 8;
            dat.push(DataAccessEntry {
                size: be32(off),
                logical_elements: be16(off + 4),
                flags: buf[off + 6],
            });
        }

        let mut application_sig = [0u8; 4];
        application_sig.copy_from_slice(&buf[4..8]);
        let mut driver_unique = [0u8; 32];
        driver_unique.copy_from_slice(&buf[224..256]);

        Some(Self {
            application_sig,
            hw_field: be32(8),
            update_frame_counter: be32(12),
            frame_type: FrameType::from_raw(be16(16)),
            partition_number: buf[20],
            partition_version: buf[21],
            write_pass_counter: be16(22),
            first_frame_address: be32(24),
            last_frame_address: be32(28),
            frame_sequence_number: be32(44),
            logical_block_address: u64::from_be_bytes([
                buf[48], buf[49], buf[50], buf[51], buf[52], buf[53], buf[54], buf[55],
            ]),
            dat,
            filemark_count: be32(192),
            last_mark_frame_address: be32(200),
            driver_unique,
        })
    }
}

/// Assemble a full frame image: payload (zero-padded to 32 KB) followed by
/// the encoded auxiliary record.
pub fn assemble_frame(payload: &[u8], aux: &AuxFrame) -> Vec<u8> {
    debug_assert!(payload.len() <= FRAME_PAYLOAD_SIZE);
    let mut image = vec![0u8; FRAME_TOTAL_SIZE];
    image[..payload.len()].copy_from_slice(payload);
    image[FRAME_PAYLOAD_SIZE..].copy_from_slice(&aux.encode());
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuxFrame {
        AuxFrame {
            application_sig: *b"LIN4",
            hw_field: 0x00C0FFEE,
            update_frame_counter: 7,
            frame_type: FrameType::Data,
            partition_number: 1,
            partition_version: 1,
            write_pass_counter: 0x1234,
            first_frame_address: 0xBB8,
            last_frame_address: 0x70C9C,
            frame_sequence_number: 0xDEAD_BEEF,
            logical_block_address: 0x0102_0304_0506_0708,
            dat: vec![
                DataAccessEntry {
                    size: 32768,
                    logical_elements: 1,
                    flags: 0x02,
                },
                DataAccessEntry {
                    size: 511,
                    logical_elements: 3,
                    flags: 0x01,
                },
            ],
            filemark_count: 2,
            last_mark_frame_address: 0xABC,
            driver_unique: [0x5A; 32],
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let frame = sample();
        let decoded = AuxFrame::decode(&frame.encode()).expect("marker must be zero");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn round_trip_with_empty_and_full_tables() {
        for entries in [0usize, 1, 16] {
            let mut frame = sample();
            frame.dat = (0..entries)
                .map(|i| DataAccessEntry {
                    size: i as u32 * 100,
                    logical_elements: i as u16,
                    flags: i as u8,
                })
                .collect();
            let decoded = AuxFrame::decode(&frame.encode()).unwrap();
            assert_eq!(decoded.dat, frame.dat);
        }
    }

    #[test]
    fn nonzero_marker_decodes_as_empty() {
        let mut buf = sample().encode();
        buf[2] = 0x01;
        assert!(AuxFrame::decode(&buf).is_none());
    }

    #[test]
    fn oversized_table_count_is_clamped_on_decode() {
        let mut buf = sample().encode();
        buf[58] = 200;
        let decoded = AuxFrame::decode(&buf).unwrap();
        assert_eq!(decoded.dat.len(), MAX_DAT_ENTRIES);
    }

    #[test]
    fn fields_land_byte_reversed_on_media() {
        let frame = sample();
        let buf = frame.encode();
        // Big-endian sequence number at offset 44.
        assert_eq!(&buf[44..48], &[0xDE, 0xAD, 0xBE, 0xEF]);
        // Signature is raw bytes, no swap.
        assert_eq!(&buf[4..8], b"LIN4");
    }

    #[test]
    fn unknown_frame_types_round_trip() {
        let mut frame = sample();
        frame.frame_type = FrameType::Unknown(0x0301);
        let decoded = AuxFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.frame_type, FrameType::Unknown(0x0301));
    }
}
