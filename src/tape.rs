//! ADR tape format: header region and media geometry.
//!
//! Frames 5-9 carry five copies of the tape header; a second region of
//! copies sits deeper into the tape at a revision-dependent offset. The
//! header records the ADR revision, partitioning, and the write-pass
//! counter every subsequent data frame must match.

use crate::error::{Result, RustOnStreamError};
use crate::frame::FRAME_PAYLOAD_SIZE;
use tracing::warn;

pub const FIRST_HEADER_FRAME: u32 = 5;
pub const HEADER_FRAME_COUNT: u32 = 5;

const HEADER_IDENT: &[u8; 7] = b"ADR_SEQ";
// The 1.1 spec shipped with a typo'd identifier; tapes written against it
// are accepted on read.
const HEADER_IDENT_LEGACY: &[u8; 7] = b"ADR-SEQ";

pub const ADR_MAJOR: u8 = 1;
pub const ADR_MINOR: u8 = 2;

pub const CONFIG_PARTITION: u8 = 0xFF;
pub const DATA_PARTITION: u8 = 0;
pub const PARTITION_VERSION: u8 = 1;

/// Revision-dependent frame addresses. These are configuration, not hard
/// invariants: on read the bounds recorded in the header win, and any
/// disagreement is logged rather than trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdrLayout {
    pub second_header_frame: u32,
    pub first_data_frame: u32,
}

impl AdrLayout {
    pub fn for_revision(major: u8, minor: u8) -> Self {
        if major != 1 || (minor != 1 && minor != 2) {
            warn!(
                "Unknown ADR revision {}.{}, using 1.2 frame addresses",
                major, minor
            );
        }
        // The fixed 1.2 addresses; 1.1 tapes are handled with the same
        // constants, with the header's own partition bounds taking over.
        Self {
            second_header_frame: 0xBAE,
            first_data_frame: 0xBB8,
        }
    }

    /// Width of the second header region in frames.
    pub fn header_region_len(&self) -> u32 {
        self.first_data_frame - self.second_header_frame
    }
}

/// Tape parameter page contents (mode page 0x2B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapeParameters {
    pub density: u8,
    pub segments_per_track: u16,
    pub tracks: u16,
}

impl TapeParameters {
    /// Addressable frames on this media. 30 GB tapes use every segment;
    /// 50 GB tapes reserve 99 segments per track for the parking zone.
    pub fn total_frames(&self) -> u32 {
        if self.segments_per_track == 19239 && self.tracks == 24 {
            self.segments_per_track as u32 * self.tracks as u32
        } else {
            (self.segments_per_track as u32 - 99) * self.tracks as u32
        }
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.total_frames() as u64 * FRAME_PAYLOAD_SIZE as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub number: u8,
    pub version: u8,
    pub write_pass_counter: u16,
    pub first_frame_address: u32,
    pub last_frame_address: u32,
    pub eod_frame_address: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapeHeader {
    pub major: u8,
    pub minor: u8,
    pub partition_count: u8,
    pub partition: PartitionDescriptor,
}

impl TapeHeader {
    /// Header for a fresh write pass covering the whole user-data area.
    pub fn new(write_pass_counter: u16, total_frames: u32) -> Self {
        let layout = AdrLayout::for_revision(ADR_MAJOR, ADR_MINOR);
        Self {
            major: ADR_MAJOR,
            minor: ADR_MINOR,
            partition_count: 1,
            partition: PartitionDescriptor {
                number: DATA_PARTITION,
                version: PARTITION_VERSION,
                write_pass_counter,
                first_frame_address: layout.first_data_frame,
                last_frame_address: total_frames,
                eod_frame_address: layout.first_data_frame,
            },
        }
    }

    pub fn layout(&self) -> AdrLayout {
        AdrLayout::for_revision(self.major, self.minor)
    }

    /// Parse a header out of a frame payload. Multi-byte fields are
    /// big-endian on tape.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 46 {
            return Err(RustOnStreamError::parse("header frame payload too short"));
        }
        let ident = &payload[0..7];
        if ident != HEADER_IDENT && ident != HEADER_IDENT_LEGACY {
            return Err(RustOnStreamError::tape_format(format!(
                "unrecognized tape signature {:?}",
                String::from_utf8_lossy(ident)
            )));
        }
        if ident == HEADER_IDENT_LEGACY {
            warn!("Tape carries the 1.1-era ADR-SEQ signature");
        }

        let be16 = |off: usize| u16::from_be_bytes([payload[off], payload[off + 1]]);
        let be32 = |off: usize| {
            u32::from_be_bytes([
                payload[off],
                payload[off + 1],
                payload[off + 2],
                payload[off + 3],
            ])
        };

        Ok(Self {
            major: payload[8],
            minor: payload[9],
            partition_count: payload[14],
            partition: PartitionDescriptor {
                number: payload[30],
                version: payload[31],
                write_pass_counter: be16(32),
                first_frame_address: be32(34),
                last_frame_address: be32(38),
                eod_frame_address: be32(42),
            },
        })
    }

    /// Serialize into the leading bytes of a frame payload; the rest of the
    /// payload stays zero.
    pub fn encode_into(&self, payload: &mut [u8]) {
        debug_assert!(payload.len() >= 46);
        payload[..46].fill(0);
        payload[0..7].copy_from_slice(HEADER_IDENT);
        payload[8] = self.major;
        payload[9] = self.minor;
        payload[14] = self.partition_count;
        payload[30] = self.partition.number;
        payload[31] = self.partition.version;
        payload[32..34].copy_from_slice(&self.partition.write_pass_counter.to_be_bytes());
        payload[34..38].copy_from_slice(&self.partition.first_frame_address.to_be_bytes());
        payload[38..42].copy_from_slice(&self.partition.last_frame_address.to_be_bytes());
        payload[42..46].copy_from_slice(&self.partition.eod_frame_address.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = TapeHeader::new(3, 461_736);
        let mut payload = vec![0u8; FRAME_PAYLOAD_SIZE];
        header.encode_into(&mut payload);
        let decoded = TapeHeader::decode(&payload).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.partition.write_pass_counter, 3);
        assert_eq!(decoded.partition.first_frame_address, 0xBB8);
    }

    #[test]
    fn legacy_signature_is_accepted() {
        let header = TapeHeader::new(1, 1000);
        let mut payload = vec![0u8; 64];
        header.encode_into(&mut payload);
        payload[0..7].copy_from_slice(b"ADR-SEQ");
        assert!(TapeHeader::decode(&payload).is_ok());
    }

    #[test]
    fn unknown_signature_is_a_format_error() {
        let payload = vec![0u8; 64];
        assert!(matches!(
            TapeHeader::decode(&payload),
            Err(crate::error::RustOnStreamError::TapeFormat(_))
        ));
    }

    #[test]
    fn media_capacity_rules() {
        let thirty = TapeParameters {
            density: 0x40,
            segments_per_track: 19239,
            tracks: 24,
        };
        assert_eq!(thirty.total_frames(), 19239 * 24);

        let fifty = TapeParameters {
            density: 0x40,
            segments_per_track: 31959,
            tracks: 24,
        };
        assert_eq!(fifty.total_frames(), (31959 - 99) * 24);
        assert_eq!(
            fifty.capacity_bytes(),
            (31959u64 - 99) * 24 * FRAME_PAYLOAD_SIZE as u64
        );
    }
}
