//! 802.11 MAC Header
//!
//! Frame control, addressing and sequence fields shared by every frame class.

use std::str::FromStr;

use crate::error::{AnalyzerError, ParseError};

/// MAC address (6 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
    pub const ZERO: MacAddr = MacAddr([0, 0, 0, 0, 0, 0]);

    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let bytes: [u8; 6] = data.get(..6)?.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Group bit set (includes broadcast)
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl std::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2],
            self.0[3], self.0[4], self.0[5])
    }
}

impl serde::Serialize for MacAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for MacAddr {
    type Err = AnalyzerError;

    /// Accepts `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(|c| c == ':' || c == '-').collect();
        if parts.len() != 6 {
            return Err(AnalyzerError::InvalidMac(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (byte, part) in bytes.iter_mut().zip(&parts) {
            if part.len() != 2 {
                return Err(AnalyzerError::InvalidMac(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| AnalyzerError::InvalidMac(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

/// Frame type (2 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Management = 0,
    Control = 1,
    Data = 2,
    Extension = 3,
}

impl From<u8> for FrameType {
    fn from(val: u8) -> Self {
        match val & 0x03 {
            0 => FrameType::Management,
            1 => FrameType::Control,
            2 => FrameType::Data,
            _ => FrameType::Extension,
        }
    }
}

/// Frame subtype (4 bits)
///
/// Only the subtypes the analyzer routes on get their own variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSubtype {
    AssocRequest,
    AssocResponse,
    ReassocRequest,
    ReassocResponse,
    ProbeRequest,
    ProbeResponse,
    Beacon,
    Atim,
    Disassociation,
    Authentication,
    Deauthentication,
    Action,

    Data,
    QosData,
    Null,
    QosNull,

    /// Any control frame subtype, or a management/data subtype not listed above
    Other(u8),
}

impl FrameSubtype {
    pub fn from_raw(frame_type: FrameType, subtype: u8) -> Self {
        let sub = subtype & 0x0f;
        match frame_type {
            FrameType::Management => match sub {
                0 => FrameSubtype::AssocRequest,
                1 => FrameSubtype::AssocResponse,
                2 => FrameSubtype::ReassocRequest,
                3 => FrameSubtype::ReassocResponse,
                4 => FrameSubtype::ProbeRequest,
                5 => FrameSubtype::ProbeResponse,
                8 => FrameSubtype::Beacon,
                9 => FrameSubtype::Atim,
                10 => FrameSubtype::Disassociation,
                11 => FrameSubtype::Authentication,
                12 => FrameSubtype::Deauthentication,
                13 | 14 => FrameSubtype::Action,
                _ => FrameSubtype::Other(sub),
            },
            // QoS subtypes set bit 3, null-function subtypes set bit 2
            FrameType::Data => match (sub & 0x08 != 0, sub & 0x04 != 0) {
                (false, false) => FrameSubtype::Data,
                (true, false) => FrameSubtype::QosData,
                (false, true) => FrameSubtype::Null,
                (true, true) => FrameSubtype::QosNull,
            },
            FrameType::Control | FrameType::Extension => FrameSubtype::Other(sub),
        }
    }

    pub fn is_qos(&self) -> bool {
        matches!(self, FrameSubtype::QosData | FrameSubtype::QosNull)
    }
}

/// Frame control field (2 bytes)
#[derive(Debug, Clone, Copy)]
pub struct FrameControl {
    /// Protocol version (should be 0)
    pub protocol_version: u8,
    pub frame_type: FrameType,
    pub subtype: FrameSubtype,
    pub to_ds: bool,
    pub from_ds: bool,
    pub more_fragments: bool,
    pub retry: bool,
    /// Protected frame flag (WEP/WPA)
    pub protected: bool,
    /// HT/VHT order flag
    pub order: bool,
}

impl FrameControl {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 2 {
            return Err(ParseError::Truncated { need: 2, have: data.len() });
        }

        let fc0 = data[0];
        let fc1 = data[1];

        let protocol_version = fc0 & 0x03;
        if protocol_version != 0 {
            return Err(ParseError::ProtocolVersion(protocol_version));
        }
        let frame_type = FrameType::from((fc0 >> 2) & 0x03);
        let subtype = FrameSubtype::from_raw(frame_type, (fc0 >> 4) & 0x0f);

        Ok(Self {
            protocol_version,
            frame_type,
            subtype,
            to_ds: fc1 & 0x01 != 0,
            from_ds: fc1 & 0x02 != 0,
            more_fragments: fc1 & 0x04 != 0,
            retry: fc1 & 0x08 != 0,
            protected: fc1 & 0x40 != 0,
            order: fc1 & 0x80 != 0,
        })
    }
}

/// Decoded 802.11 MAC header
#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub frame_control: FrameControl,
    /// Duration/ID
    pub duration: u16,
    /// Address 1 (Receiver/Destination)
    pub addr1: MacAddr,
    /// Address 2 (Transmitter/Source)
    pub addr2: Option<MacAddr>,
    /// Address 3 (BSSID or other)
    pub addr3: Option<MacAddr>,
    pub seq_control: Option<u16>,
    /// Address 4 (for WDS)
    pub addr4: Option<MacAddr>,
    /// QoS control (if QoS data frame)
    pub qos_control: Option<u16>,
}

impl FrameHeader {
    /// Parse the MAC header, returning it with the offset of the frame body.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ParseError> {
        let frame_control = FrameControl::parse(data)?;
        if data.len() < 10 {
            return Err(ParseError::Truncated { need: 10, have: data.len() });
        }

        let duration = u16::from_le_bytes([data[2], data[3]]);
        let addr1 = mac_at(data, 4)?;

        let mut header = FrameHeader {
            frame_control,
            duration,
            addr1,
            addr2: None,
            addr3: None,
            seq_control: None,
            addr4: None,
            qos_control: None,
        };

        let body_offset = match frame_control.frame_type {
            FrameType::Management | FrameType::Data => header.parse_three_address(data)?,
            // RTS, PS-Poll, CF-End and block-ack carry a transmitter address
            FrameType::Control if data.len() >= 16 => {
                header.addr2 = MacAddr::from_slice(&data[10..]);
                16
            }
            FrameType::Control | FrameType::Extension => 10,
        };

        Ok((header, body_offset))
    }

    fn parse_three_address(&mut self, data: &[u8]) -> Result<usize, ParseError> {
        if data.len() < 24 {
            return Err(ParseError::Truncated { need: 24, have: data.len() });
        }

        self.addr2 = Some(mac_at(data, 10)?);
        self.addr3 = Some(mac_at(data, 16)?);
        self.seq_control = Some(u16::from_le_bytes([data[22], data[23]]));

        let fc = self.frame_control;
        let mut offset = 24;

        if fc.to_ds && fc.from_ds {
            self.addr4 = Some(mac_at(data, 24)?);
            offset = 30;
        }

        if fc.frame_type == FrameType::Data && fc.subtype.is_qos() {
            if data.len() < offset + 2 {
                return Err(ParseError::Truncated { need: offset + 2, have: data.len() });
            }
            self.qos_control = Some(u16::from_le_bytes([data[offset], data[offset + 1]]));
            offset += 2;
            // HT control follows when the order bit is set on QoS frames
            if fc.order {
                offset += 4;
            }
        }

        if data.len() < offset {
            return Err(ParseError::Truncated { need: offset, have: data.len() });
        }
        Ok(offset)
    }

    /// BSSID according to the DS bits; `None` for WDS frames
    pub fn bssid(&self) -> Option<MacAddr> {
        match (self.frame_control.to_ds, self.frame_control.from_ds) {
            (false, false) => self.addr3,
            (false, true) => self.addr2,
            (true, false) => Some(self.addr1),
            (true, true) => None,
        }
    }

    pub fn source(&self) -> Option<MacAddr> {
        match (self.frame_control.to_ds, self.frame_control.from_ds) {
            (false, false) | (true, false) => self.addr2,
            (false, true) => self.addr3,
            (true, true) => self.addr4,
        }
    }

    pub fn destination(&self) -> Option<MacAddr> {
        match (self.frame_control.to_ds, self.frame_control.from_ds) {
            (false, false) | (false, true) => Some(self.addr1),
            (true, false) | (true, true) => self.addr3,
        }
    }

    pub fn sequence_number(&self) -> Option<u16> {
        self.seq_control.map(|sc| sc >> 4)
    }
}

fn mac_at(data: &[u8], offset: usize) -> Result<MacAddr, ParseError> {
    data.get(offset..)
        .and_then(MacAddr::from_slice)
        .ok_or(ParseError::Truncated { need: offset + 6, have: data.len() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_roundtrip_display() {
        let mac: MacAddr = "FF:bb:aa:cc:ff:ff".parse().unwrap();
        assert_eq!(mac.to_string(), "ff:bb:aa:cc:ff:ff");
        assert!("ff:bb:aa".parse::<MacAddr>().is_err());
        assert!("zz:bb:aa:cc:ff:ff".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_mac_classes() {
        assert!(MacAddr::BROADCAST.is_broadcast());
        assert!(MacAddr::BROADCAST.is_multicast());
        assert!(MacAddr::ZERO.is_zero());
        let mcast: MacAddr = "01:00:5e:00:00:fb".parse().unwrap();
        assert!(mcast.is_multicast());
    }

    #[test]
    fn test_header_too_short() {
        assert!(matches!(FrameHeader::parse(&[0x80]), Err(ParseError::Truncated { .. })));
        // Beacon frame control with only 12 bytes
        let data = [0x80, 0x00, 0, 0, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 1, 2];
        assert!(matches!(FrameHeader::parse(&data), Err(ParseError::Truncated { need: 24, .. })));
    }

    #[test]
    fn test_data_frame_addressing() {
        // Data frame, to_ds: addr1 = BSSID, addr2 = station, addr3 = destination
        let mut data = vec![0x08, 0x01, 0, 0];
        data.extend_from_slice(&[0xbb; 6]);
        data.extend_from_slice(&[0xaa; 6]);
        data.extend_from_slice(&[0xcc; 6]);
        data.extend_from_slice(&[0x10, 0x00]);

        let (header, offset) = FrameHeader::parse(&data).unwrap();
        assert_eq!(offset, 24);
        assert_eq!(header.bssid(), Some(MacAddr::new([0xbb; 6])));
        assert_eq!(header.source(), Some(MacAddr::new([0xaa; 6])));
        assert_eq!(header.destination(), Some(MacAddr::new([0xcc; 6])));
        assert_eq!(header.sequence_number(), Some(1));
    }

    #[test]
    fn test_ack_frame() {
        let mut data = vec![0xd4, 0x00, 0, 0];
        data.extend_from_slice(&[0x11; 6]);
        let (header, offset) = FrameHeader::parse(&data).unwrap();
        assert_eq!(header.frame_control.frame_type, FrameType::Control);
        assert_eq!(offset, 10);
        assert!(header.addr2.is_none());
    }
}
