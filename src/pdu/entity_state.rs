use byteorder::{BigEndian, ByteOrder};

use super::header::{
    DisPduHeader, HEADER_SIZE, PDU_TYPE_ENTITY_STATE, PROTOCOL_FAMILY_ENTITY_INFORMATION,
    decode_header,
};
use crate::error::{Error, Result};

/// Entity identifier (6) + geocentric position (24) + linear velocity (12).
pub const ENTITY_BODY_SIZE: usize = 42;
pub const ENTITY_STATE_PDU_SIZE: usize = HEADER_SIZE + ENTITY_BODY_SIZE;

const ENTITY_ID_OFFSET: usize = HEADER_SIZE;
const POSITION_OFFSET: usize = ENTITY_ID_OFFSET + 6;
const VELOCITY_OFFSET: usize = POSITION_OFFSET + 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EntityId {
    pub site_id: u16,
    pub application_id: u16,
    pub entity_number: u16,
}

impl EntityId {
    pub fn new(site_id: u16, application_id: u16, entity_number: u16) -> Self {
        Self {
            site_id,
            application_id,
            entity_number,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T> Vector3<T> {
    pub fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }
}

impl Vector3<f64> {
    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Vector3<f32> {
    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityStatePdu {
    pub header: DisPduHeader,
    pub entity_id: EntityId,
    /// Geocentric (x, y, z) in metres.
    pub position: Vector3<f64>,
    /// Metres per second.
    pub linear_velocity: Vector3<f32>,
}

/// How much of the header `decode_entity_state_with` checks beyond length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Only length is checked; simulation traffic is best-effort.
    #[default]
    Permissive,
    /// Rejects non entity-state PDUs and lengths the buffer cannot hold.
    Strict,
}

impl EntityStatePdu {
    pub fn new(
        exercise_id: u8,
        timestamp: u32,
        entity_id: EntityId,
        position: Vector3<f64>,
        linear_velocity: Vector3<f32>,
    ) -> Self {
        Self {
            header: DisPduHeader::entity_state(
                exercise_id,
                timestamp,
                ENTITY_STATE_PDU_SIZE as u16,
            ),
            entity_id,
            position,
            linear_velocity,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_entity_state(self)
    }
}

pub fn encode_entity_state(pdu: &EntityStatePdu) -> Result<Vec<u8>> {
    if !pdu.position.is_finite() {
        return Err(Error::Encoding(format!(
            "position {:?} is not representable",
            pdu.position
        )));
    }
    if !pdu.linear_velocity.is_finite() {
        return Err(Error::Encoding(format!(
            "linear velocity {:?} is not representable",
            pdu.linear_velocity
        )));
    }

    let mut buf = vec![0u8; ENTITY_STATE_PDU_SIZE];
    pdu.header.write(&mut buf[..HEADER_SIZE]);

    let id = &mut buf[ENTITY_ID_OFFSET..POSITION_OFFSET];
    BigEndian::write_u16(&mut id[0..2], pdu.entity_id.site_id);
    BigEndian::write_u16(&mut id[2..4], pdu.entity_id.application_id);
    BigEndian::write_u16(&mut id[4..6], pdu.entity_id.entity_number);

    let position = &mut buf[POSITION_OFFSET..VELOCITY_OFFSET];
    BigEndian::write_f64(&mut position[0..8], pdu.position.x);
    BigEndian::write_f64(&mut position[8..16], pdu.position.y);
    BigEndian::write_f64(&mut position[16..24], pdu.position.z);

    let velocity = &mut buf[VELOCITY_OFFSET..ENTITY_STATE_PDU_SIZE];
    BigEndian::write_f32(&mut velocity[0..4], pdu.linear_velocity.x);
    BigEndian::write_f32(&mut velocity[4..8], pdu.linear_velocity.y);
    BigEndian::write_f32(&mut velocity[8..12], pdu.linear_velocity.z);

    Ok(buf)
}

pub fn decode_entity_state(buf: &[u8]) -> Result<EntityStatePdu> {
    decode_entity_state_with(buf, DecodeMode::Permissive)
}

/// Decodes an Entity State PDU from a transport payload. Bytes past the
/// fixed body are ignored.
pub fn decode_entity_state_with(buf: &[u8], mode: DecodeMode) -> Result<EntityStatePdu> {
    if buf.len() < ENTITY_STATE_PDU_SIZE {
        return Err(Error::TruncatedPacket {
            needed: ENTITY_STATE_PDU_SIZE,
            actual: buf.len(),
        });
    }

    let header = decode_header(buf)?;
    if mode == DecodeMode::Strict {
        check_strict(&header, buf.len())?;
    }

    let id = &buf[ENTITY_ID_OFFSET..POSITION_OFFSET];
    let position = &buf[POSITION_OFFSET..VELOCITY_OFFSET];
    let velocity = &buf[VELOCITY_OFFSET..ENTITY_STATE_PDU_SIZE];

    Ok(EntityStatePdu {
        header,
        entity_id: EntityId {
            site_id: BigEndian::read_u16(&id[0..2]),
            application_id: BigEndian::read_u16(&id[2..4]),
            entity_number: BigEndian::read_u16(&id[4..6]),
        },
        position: Vector3::new(
            BigEndian::read_f64(&position[0..8]),
            BigEndian::read_f64(&position[8..16]),
            BigEndian::read_f64(&position[16..24]),
        ),
        linear_velocity: Vector3::new(
            BigEndian::read_f32(&velocity[0..4]),
            BigEndian::read_f32(&velocity[4..8]),
            BigEndian::read_f32(&velocity[8..12]),
        ),
    })
}

fn check_strict(header: &DisPduHeader, available: usize) -> Result<()> {
    if header.pdu_type != PDU_TYPE_ENTITY_STATE {
        return Err(Error::Decoding(format!(
            "PDU type {} is not Entity State",
            header.pdu_type
        )));
    }
    if header.protocol_family != PROTOCOL_FAMILY_ENTITY_INFORMATION {
        return Err(Error::Decoding(format!(
            "protocol family {} is not Entity Information",
            header.protocol_family
        )));
    }
    if header.pdu_length as usize > available {
        return Err(Error::Decoding(format!(
            "declared length {} exceeds {} received bytes",
            header.pdu_length, available
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_pdu() -> EntityStatePdu {
        EntityStatePdu::new(
            1,
            42,
            EntityId::new(1, 3101, 7),
            Vector3::new(-2_707_000.5, -4_353_000.25, 3_781_000.0),
            Vector3::new(12.5, -3.0, 0.25),
        )
    }

    #[test]
    fn test_encoded_size_and_field_offsets() {
        let bytes = sample_pdu().encode().unwrap();
        assert_eq!(bytes.len(), ENTITY_STATE_PDU_SIZE);
        assert_eq!(&bytes[8..10], &54u16.to_be_bytes());
        assert_eq!(&bytes[12..14], &1u16.to_be_bytes());
        assert_eq!(&bytes[14..16], &3101u16.to_be_bytes());
        assert_eq!(&bytes[16..18], &7u16.to_be_bytes());
        assert_eq!(&bytes[18..26], &(-2_707_000.5f64).to_be_bytes());
        assert_eq!(&bytes[42..46], &12.5f32.to_be_bytes());
    }

    #[test]
    fn test_round_trip_sample() {
        let pdu = sample_pdu();
        let decoded = decode_entity_state(&pdu.encode().unwrap()).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let pdu = sample_pdu();
        let mut bytes = pdu.encode().unwrap();
        bytes.extend_from_slice(&[0xEE; 90]);
        assert_eq!(decode_entity_state(&bytes).unwrap(), pdu);
    }

    #[test]
    fn test_short_body_is_truncated() {
        let bytes = sample_pdu().encode().unwrap();
        for len in [0, 5, HEADER_SIZE, ENTITY_STATE_PDU_SIZE - 1] {
            assert!(matches!(
                decode_entity_state(&bytes[..len]),
                Err(Error::TruncatedPacket { needed: ENTITY_STATE_PDU_SIZE, .. })
            ));
        }
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let mut pdu = sample_pdu();
        pdu.position.y = f64::NAN;
        assert!(matches!(pdu.encode(), Err(Error::Encoding(_))));

        let mut pdu = sample_pdu();
        pdu.linear_velocity.z = f32::INFINITY;
        assert!(matches!(pdu.encode(), Err(Error::Encoding(_))));
    }

    #[test]
    fn test_strict_mode_checks_header() {
        let mut pdu = sample_pdu();
        pdu.header.pdu_type = 2;
        let bytes = pdu.encode().unwrap();
        assert!(decode_entity_state(&bytes).is_ok());
        assert!(matches!(
            decode_entity_state_with(&bytes, DecodeMode::Strict),
            Err(Error::Decoding(_))
        ));

        let mut pdu = sample_pdu();
        pdu.header.pdu_length = 144;
        let bytes = pdu.encode().unwrap();
        assert!(matches!(
            decode_entity_state_with(&bytes, DecodeMode::Strict),
            Err(Error::Decoding(_))
        ));

        let bytes = sample_pdu().encode().unwrap();
        assert!(decode_entity_state_with(&bytes, DecodeMode::Strict).is_ok());
    }

    fn finite_f64() -> impl Strategy<Value = f64> {
        -1.0e7f64..1.0e7f64
    }

    fn finite_f32() -> impl Strategy<Value = f32> {
        -1.0e4f32..1.0e4f32
    }

    proptest! {
        #[test]
        fn prop_entity_state_round_trip(
            header in (any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>(),
                       any::<u32>(), any::<u16>(), any::<u8>(), any::<u8>()),
            id in (any::<u16>(), any::<u16>(), any::<u16>()),
            position in (finite_f64(), finite_f64(), finite_f64()),
            velocity in (finite_f32(), finite_f32(), finite_f32()),
        ) {
            let pdu = EntityStatePdu {
                header: DisPduHeader {
                    protocol_version: header.0,
                    exercise_id: header.1,
                    pdu_type: header.2,
                    protocol_family: header.3,
                    timestamp: header.4,
                    pdu_length: header.5,
                    pdu_status: header.6,
                    padding: header.7,
                },
                entity_id: EntityId::new(id.0, id.1, id.2),
                position: Vector3::new(position.0, position.1, position.2),
                linear_velocity: Vector3::new(velocity.0, velocity.1, velocity.2),
            };
            let bytes = encode_entity_state(&pdu).unwrap();
            prop_assert_eq!(decode_entity_state(&bytes).unwrap(), pdu);
        }

        #[test]
        fn prop_arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
            match decode_entity_state(&bytes) {
                Ok(_) => prop_assert!(bytes.len() >= ENTITY_STATE_PDU_SIZE),
                Err(Error::TruncatedPacket { .. }) => prop_assert!(bytes.len() < ENTITY_STATE_PDU_SIZE),
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
    }
}
