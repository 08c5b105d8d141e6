//! Frame Parser
//!
//! Turns one captured record into a [`ParsedFrame`]: the MAC header, a closed
//! [`FrameKind`] describing what the frame carries, its information elements
//! and the radio metadata. Parsing is total; every malformed input maps to a
//! [`ParseError`].

use crate::error::ParseError;

use super::ieee80211::{
    element_id, parse_eapol, parse_ies, AssocBody, AssocKind, AuthBody, BeaconBody, EapolFrame,
    FrameHeader, FrameSubtype, FrameType, InformationElement, MacAddr,
};
use super::radiotap::parse_radiotap;

/// Link-layer framing of a capture record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// DLT_IEEE802_11_RADIO (127)
    Radiotap,
    /// DLT_IEEE802_11 (105), no capture metadata
    Ieee80211,
    Unsupported(u32),
}

impl LinkType {
    pub const DLT_IEEE802_11: u32 = 105;
    pub const DLT_IEEE802_11_RADIO: u32 = 127;

    pub fn from_dlt(dlt: u32) -> Self {
        match dlt {
            Self::DLT_IEEE802_11_RADIO => LinkType::Radiotap,
            Self::DLT_IEEE802_11 => LinkType::Ieee80211,
            other => LinkType::Unsupported(other),
        }
    }

    pub fn dlt(&self) -> u32 {
        match self {
            LinkType::Radiotap => Self::DLT_IEEE802_11_RADIO,
            LinkType::Ieee80211 => Self::DLT_IEEE802_11,
            LinkType::Unsupported(dlt) => *dlt,
        }
    }
}

/// What a frame carries, decided once by the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Beacon(BeaconBody),
    ProbeRequest,
    ProbeResponse(BeaconBody),
    Authentication(AuthBody),
    Association(AssocBody),
    /// Unprotected data frame carrying 802.1X
    Eapol(EapolFrame),
    /// Data frame with the protected bit set
    ProtectedData,
    /// Any other data frame, including null-function frames
    Data,
    /// Management subtypes the analyzer does not inspect
    OtherManagement,
    Control,
}

/// A decoded frame and its capture metadata
#[derive(Debug, Clone)]
pub struct ParsedFrame {
    pub header: FrameHeader,
    pub kind: FrameKind,
    /// Information elements of management frames, empty otherwise
    pub ies: Vec<InformationElement>,
    /// Antenna signal in dBm when the capture recorded it
    pub signal_dbm: Option<i8>,
    /// Channel the radio was tuned to, from capture metadata
    pub radio_channel: Option<u8>,
}

impl ParsedFrame {
    pub fn frame_type(&self) -> FrameType {
        self.header.frame_control.frame_type
    }

    pub fn subtype(&self) -> FrameSubtype {
        self.header.frame_control.subtype
    }

    pub fn bssid(&self) -> Option<MacAddr> {
        self.header.bssid()
    }

    pub fn element(&self, id: u8) -> Option<&InformationElement> {
        self.ies.iter().find(|ie| ie.id == id)
    }

    /// Raw SSID element payload, if the frame carries one
    pub fn ssid(&self) -> Option<&[u8]> {
        self.element(element_id::SSID).map(|ie| ie.data.as_slice())
    }

    /// Channel from the DS parameter set; `None` means unknown, not invalid
    pub fn ds_channel(&self) -> Option<u8> {
        self.element(element_id::DS_PARAMETER)
            .and_then(|ie| ie.data.first().copied())
    }

    pub fn has_rsn(&self) -> bool {
        self.element(element_id::RSN).is_some()
    }

    pub fn has_wpa(&self) -> bool {
        self.ies.iter().any(InformationElement::is_wpa)
    }
}

/// Parse one capture record
pub fn parse_frame(record: &[u8], link: LinkType) -> Result<ParsedFrame, ParseError> {
    let (frame, signal_dbm, radio_channel) = match link {
        LinkType::Radiotap => {
            let info = parse_radiotap(record)?;
            if info.bad_fcs() {
                return Err(ParseError::BadFcs);
            }
            let mut frame = &record[info.length..];
            if info.has_fcs() && frame.len() >= 4 {
                frame = &frame[..frame.len() - 4];
            }
            (frame, info.signal_dbm, info.channel())
        }
        LinkType::Ieee80211 => (record, None, None),
        LinkType::Unsupported(dlt) => return Err(ParseError::LinkType(dlt)),
    };

    let (header, body_offset) = FrameHeader::parse(frame)?;
    let body = &frame[body_offset..];
    let (kind, ies) = classify(&header, body)?;

    Ok(ParsedFrame {
        header,
        kind,
        ies,
        signal_dbm,
        radio_channel,
    })
}

fn classify(
    header: &FrameHeader,
    body: &[u8],
) -> Result<(FrameKind, Vec<InformationElement>), ParseError> {
    let fc = header.frame_control;

    match fc.frame_type {
        FrameType::Management => {
            let (kind, ie_start) = match fc.subtype {
                FrameSubtype::Beacon => (FrameKind::Beacon(BeaconBody::parse(body)?), BeaconBody::LEN),
                FrameSubtype::ProbeResponse => {
                    (FrameKind::ProbeResponse(BeaconBody::parse(body)?), BeaconBody::LEN)
                }
                FrameSubtype::ProbeRequest => (FrameKind::ProbeRequest, 0),
                FrameSubtype::Authentication => {
                    (FrameKind::Authentication(AuthBody::parse(body)?), AuthBody::LEN)
                }
                FrameSubtype::AssocRequest
                | FrameSubtype::AssocResponse
                | FrameSubtype::ReassocRequest
                | FrameSubtype::ReassocResponse => {
                    let assoc_kind = match fc.subtype {
                        FrameSubtype::AssocRequest => AssocKind::Request,
                        FrameSubtype::AssocResponse => AssocKind::Response,
                        FrameSubtype::ReassocRequest => AssocKind::ReassocRequest,
                        _ => AssocKind::ReassocResponse,
                    };
                    let assoc = AssocBody::parse(assoc_kind, body)?;
                    (FrameKind::Association(assoc), assoc_kind.fixed_len())
                }
                _ => (FrameKind::OtherManagement, body.len()),
            };

            // Protected management frames (e.g. 802.11w) have no readable elements
            let ies = if fc.protected {
                Vec::new()
            } else {
                parse_ies(&body[ie_start..])
            };
            Ok((kind, ies))
        }
        FrameType::Data => {
            let kind = if fc.protected {
                FrameKind::ProtectedData
            } else {
                match parse_eapol(body) {
                    Some(eapol) => FrameKind::Eapol(eapol),
                    None => FrameKind::Data,
                }
            };
            Ok((kind, Vec::new()))
        }
        FrameType::Control | FrameType::Extension => Ok((FrameKind::Control, Vec::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgmt_header(subtype: u8, addr1: [u8; 6], addr2: [u8; 6], addr3: [u8; 6]) -> Vec<u8> {
        let mut data = vec![subtype << 4, 0x00, 0x00, 0x00];
        data.extend_from_slice(&addr1);
        data.extend_from_slice(&addr2);
        data.extend_from_slice(&addr3);
        data.extend_from_slice(&[0x00, 0x00]);
        data
    }

    fn beacon(ssid: &[u8], channel: u8) -> Vec<u8> {
        let mut data = mgmt_header(8, [0xff; 6], [0x02; 6], [0x02; 6]);
        data.extend_from_slice(&[0u8; 8]);
        data.extend_from_slice(&100u16.to_le_bytes());
        data.extend_from_slice(&0x0421u16.to_le_bytes());
        data.push(element_id::SSID);
        data.push(ssid.len() as u8);
        data.extend_from_slice(ssid);
        data.extend_from_slice(&[element_id::DS_PARAMETER, 1, channel]);
        data
    }

    #[test]
    fn test_parse_beacon() {
        let frame = parse_frame(&beacon(b"home", 6), LinkType::Ieee80211).unwrap();
        assert!(matches!(frame.kind, FrameKind::Beacon(b) if b.capability == 0x0421));
        assert_eq!(frame.ssid(), Some(&b"home"[..]));
        assert_eq!(frame.ds_channel(), Some(6));
        assert_eq!(frame.bssid(), Some(MacAddr::new([0x02; 6])));
        assert!(!frame.has_rsn());
        assert!(frame.signal_dbm.is_none());
    }

    #[test]
    fn test_beacon_without_ds_element_has_unknown_channel() {
        let mut data = mgmt_header(8, [0xff; 6], [0x02; 6], [0x02; 6]);
        data.extend_from_slice(&[0u8; 12]);
        let frame = parse_frame(&data, LinkType::Ieee80211).unwrap();
        assert_eq!(frame.ds_channel(), None);
        assert!(frame.ssid().is_none());
    }

    #[test]
    fn test_parse_radiotap_beacon_strips_fcs() {
        let mut record = vec![0x00, 0x00, 0x0a, 0x00];
        record.extend_from_slice(&(super::super::radiotap::flags::FLAGS).to_le_bytes());
        record.push(super::super::radiotap::frame_flags::FCS);
        record.push(0x00);
        record.extend_from_slice(&beacon(b"x", 1));
        // FCS bytes that would otherwise parse as a bogus element
        record.extend_from_slice(&[0xdd, 0x02, 0x00, 0x00]);

        let frame = parse_frame(&record, LinkType::Radiotap).unwrap();
        assert_eq!(frame.ies.len(), 2);
    }

    #[test]
    fn test_radiotap_bad_fcs_is_rejected() {
        use super::super::radiotap::{flags, frame_flags};

        let mut record = vec![0x00, 0x00, 0x0a, 0x00];
        record.extend_from_slice(&flags::FLAGS.to_le_bytes());
        record.push(frame_flags::FCS | frame_flags::BAD_FCS);
        record.push(0x00);
        record.extend_from_slice(&beacon(b"x", 1));
        record.extend_from_slice(&[0u8; 4]);

        assert!(matches!(parse_frame(&record, LinkType::Radiotap), Err(ParseError::BadFcs)));
    }

    #[test]
    fn test_truncated_beacon_body() {
        let mut data = mgmt_header(8, [0xff; 6], [0x02; 6], [0x02; 6]);
        data.extend_from_slice(&[0u8; 5]);
        assert!(matches!(
            parse_frame(&data, LinkType::Ieee80211),
            Err(ParseError::Truncated { need: 12, have: 5 })
        ));
    }

    #[test]
    fn test_protected_data_frame() {
        let mut data = vec![0x08, 0x41, 0x00, 0x00];
        data.extend_from_slice(&[0x02; 6]);
        data.extend_from_slice(&[0x04; 6]);
        data.extend_from_slice(&[0x06; 6]);
        data.extend_from_slice(&[0x00, 0x00]);
        data.extend_from_slice(&[0x12; 16]);
        let frame = parse_frame(&data, LinkType::Ieee80211).unwrap();
        assert_eq!(frame.kind, FrameKind::ProtectedData);
    }

    #[test]
    fn test_unsupported_link_type() {
        assert!(matches!(parse_frame(&[0u8; 64], LinkType::from_dlt(1)), Err(ParseError::LinkType(1))));
    }

    #[test]
    fn test_garbage_never_panics() {
        let mut seed: u32 = 0x1234_5678;
        for len in 0..200usize {
            let mut buf = Vec::with_capacity(len);
            for _ in 0..len {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
                buf.push((seed >> 16) as u8);
            }
            let _ = parse_frame(&buf, LinkType::Ieee80211);
            let _ = parse_frame(&buf, LinkType::Radiotap);
        }
    }
}
