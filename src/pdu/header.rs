use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// Size of the DIS 7 PDU header on the wire.
pub const HEADER_SIZE: usize = 12;

pub const PROTOCOL_VERSION_DIS7: u8 = 7;
pub const PDU_TYPE_ENTITY_STATE: u8 = 1;
pub const PROTOCOL_FAMILY_ENTITY_INFORMATION: u8 = 1;

/// DIS 7 PDU header (IEEE 1278.1-2012, 5.2.5).
///
/// Layout, big-endian:
///
/// | offset | size | field            |
/// |--------|------|------------------|
/// | 0      | 1    | protocol_version |
/// | 1      | 1    | exercise_id      |
/// | 2      | 1    | pdu_type         |
/// | 3      | 1    | protocol_family  |
/// | 4      | 4    | timestamp        |
/// | 8      | 2    | pdu_length       |
/// | 10     | 1    | pdu_status       |
/// | 11     | 1    | padding          |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisPduHeader {
    pub protocol_version: u8,
    pub exercise_id: u8,
    pub pdu_type: u8,
    pub protocol_family: u8,
    pub timestamp: u32,
    pub pdu_length: u16,
    pub pdu_status: u8,
    pub padding: u8,
}

impl DisPduHeader {
    /// Header for an Entity State PDU of `pdu_length` bytes.
    pub fn entity_state(exercise_id: u8, timestamp: u32, pdu_length: u16) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION_DIS7,
            exercise_id,
            pdu_type: PDU_TYPE_ENTITY_STATE,
            protocol_family: PROTOCOL_FAMILY_ENTITY_INFORMATION,
            timestamp,
            pdu_length,
            pdu_status: 0,
            padding: 0,
        }
    }

    /// Writes the header into the first `HEADER_SIZE` bytes of `buf`.
    pub(crate) fn write(&self, buf: &mut [u8]) {
        buf[0] = self.protocol_version;
        buf[1] = self.exercise_id;
        buf[2] = self.pdu_type;
        buf[3] = self.protocol_family;
        BigEndian::write_u32(&mut buf[4..8], self.timestamp);
        BigEndian::write_u16(&mut buf[8..10], self.pdu_length);
        buf[10] = self.pdu_status;
        buf[11] = self.padding;
    }
}

/// Appends the encoded header to `out`.
pub fn encode_header(header: &DisPduHeader, out: &mut Vec<u8>) {
    let mut bytes = [0u8; HEADER_SIZE];
    header.write(&mut bytes);
    out.extend_from_slice(&bytes);
}

/// Parses the header from the front of `buf`. Field values are accepted as
/// they are; only the length is checked.
pub fn decode_header(buf: &[u8]) -> Result<DisPduHeader> {
    if buf.len() < HEADER_SIZE {
        return Err(Error::TruncatedPacket {
            needed: HEADER_SIZE,
            actual: buf.len(),
        });
    }

    Ok(DisPduHeader {
        protocol_version: buf[0],
        exercise_id: buf[1],
        pdu_type: buf[2],
        protocol_family: buf[3],
        timestamp: BigEndian::read_u32(&buf[4..8]),
        pdu_length: BigEndian::read_u16(&buf[8..10]),
        pdu_status: buf[10],
        padding: buf[11],
    })
}
