//! Link/network/transport header stripping for captured Ethernet frames.

use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::udp::UdpPacket;

use super::entity_state::{DecodeMode, EntityStatePdu, decode_entity_state_with};
use crate::error::{Error, Result};

pub const ETHERNET_HEADER_SIZE: usize = 14;
const IPV4_MIN_HEADER_SIZE: usize = 20;
const UDP_HEADER_SIZE: usize = 8;

/// Returns the UDP payload of an Ethernet II / IPv4 / UDP frame. The UDP
/// length field bounds the payload, so Ethernet trailer padding is dropped.
pub fn udp_payload(frame: &[u8]) -> Result<&[u8]> {
    let ethernet = EthernetPacket::new(frame).ok_or(Error::TruncatedPacket {
        needed: ETHERNET_HEADER_SIZE,
        actual: frame.len(),
    })?;
    if ethernet.get_ethertype() != EtherTypes::Ipv4 {
        return Err(Error::Decoding(format!(
            "ethertype {:?} is not IPv4",
            ethernet.get_ethertype()
        )));
    }

    let ip_start = ETHERNET_HEADER_SIZE;
    let ipv4 = Ipv4Packet::new(&frame[ip_start..]).ok_or(Error::TruncatedPacket {
        needed: ip_start + IPV4_MIN_HEADER_SIZE,
        actual: frame.len(),
    })?;
    if ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
        return Err(Error::Decoding(format!(
            "IP protocol {:?} is not UDP",
            ipv4.get_next_level_protocol()
        )));
    }
    let ip_header_len = ipv4.get_header_length() as usize * 4;
    if ip_header_len < IPV4_MIN_HEADER_SIZE {
        return Err(Error::Decoding(format!(
            "IPv4 header length {} is invalid",
            ip_header_len
        )));
    }

    let udp_start = ip_start + ip_header_len;
    let udp = frame
        .get(udp_start..)
        .and_then(UdpPacket::new)
        .ok_or(Error::TruncatedPacket {
            needed: udp_start + UDP_HEADER_SIZE,
            actual: frame.len(),
        })?;
    let udp_len = udp.get_length() as usize;
    if udp_len < UDP_HEADER_SIZE {
        return Err(Error::Decoding(format!("UDP length {} is invalid", udp_len)));
    }

    let end = udp_start + udp_len;
    if frame.len() < end {
        return Err(Error::TruncatedPacket {
            needed: end,
            actual: frame.len(),
        });
    }
    Ok(&frame[udp_start + UDP_HEADER_SIZE..end])
}

/// Strips the frame headers and decodes the DIS payload.
pub fn decode_frame(frame: &[u8], mode: DecodeMode) -> Result<EntityStatePdu> {
    decode_entity_state_with(udp_payload(frame)?, mode)
}
