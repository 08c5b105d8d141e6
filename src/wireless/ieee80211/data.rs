//! 802.11 Data Frame Payloads
//!
//! LLC/SNAP encapsulation and the EAPOL frames carried in it.

/// EtherType for 802.1X authentication
pub const ETHERTYPE_EAPOL: u16 = 0x888e;

/// LLC/SNAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlcSnapHeader {
    /// OUI (usually 00:00:00 for Ethernet)
    pub oui: [u8; 3],
    pub ethertype: u16,
}

impl LlcSnapHeader {
    pub const LEN: usize = 8;

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }

        // DSAP/SSAP 0xAA, UI control 0x03
        if data[0] != 0xaa || data[1] != 0xaa || data[2] != 0x03 {
            return None;
        }

        Some(LlcSnapHeader {
            oui: [data[3], data[4], data[5]],
            ethertype: u16::from_be_bytes([data[6], data[7]]),
        })
    }
}

/// EAPOL (Extensible Authentication Protocol over LAN) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapolFrame {
    pub version: u8,
    pub packet_type: EapolType,
    pub body_length: u16,
    /// Present for EAPOL-Key frames long enough to carry the key descriptor
    pub key: Option<EapolKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EapolType {
    Packet,
    Start,
    Logoff,
    Key,
    Unknown(u8),
}

impl From<u8> for EapolType {
    fn from(val: u8) -> Self {
        match val {
            0 => EapolType::Packet,
            1 => EapolType::Start,
            2 => EapolType::Logoff,
            3 => EapolType::Key,
            _ => EapolType::Unknown(val),
        }
    }
}

impl EapolFrame {
    /// Parse an EAPOL frame following the LLC/SNAP header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }

        let packet_type = EapolType::from(data[1]);
        let key = if packet_type == EapolType::Key {
            EapolKey::parse(&data[4..])
        } else {
            None
        };

        Some(EapolFrame {
            version: data[0],
            packet_type,
            body_length: u16::from_be_bytes([data[2], data[3]]),
            key,
        })
    }

    /// Handshake message number (1-4), 0 when it cannot be determined
    pub fn message_number(&self) -> u8 {
        self.key.map(|k| k.key_info.message_number()).unwrap_or(0)
    }
}

/// The EAPOL-Key descriptor fields needed to place a frame in the 4-way exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EapolKey {
    /// Descriptor type (2=RSN, 254=WPA)
    pub descriptor_type: u8,
    pub key_info: KeyInfo,
    pub replay_counter: u64,
}

impl EapolKey {
    /// descriptor type + key info + key length + replay counter
    const MIN_LEN: usize = 13;

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_LEN {
            return None;
        }

        let mut counter = [0u8; 8];
        counter.copy_from_slice(&data[5..13]);

        Some(EapolKey {
            descriptor_type: data[0],
            key_info: KeyInfo::from_u16(u16::from_be_bytes([data[1], data[2]])),
            replay_counter: u64::from_be_bytes(counter),
        })
    }
}

/// Key information flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInfo {
    /// Key descriptor version (1=HMAC-MD5-RC4, 2=HMAC-SHA1-AES, 3=AES-128-CMAC)
    pub version: u8,
    /// Key type (false=Group, true=Pairwise)
    pub pairwise: bool,
    pub install: bool,
    pub ack: bool,
    pub mic: bool,
    pub secure: bool,
}

impl KeyInfo {
    pub fn from_u16(val: u16) -> Self {
        KeyInfo {
            version: (val & 0x07) as u8,
            pairwise: val & 0x08 != 0,
            install: val & 0x40 != 0,
            ack: val & 0x80 != 0,
            mic: val & 0x100 != 0,
            secure: val & 0x200 != 0,
        }
    }

    /// Get handshake message number (1-4)
    pub fn message_number(&self) -> u8 {
        match (self.ack, self.mic, self.secure, self.install) {
            (true, false, false, false) => 1,  // AP -> STA, ANonce
            (false, true, false, false) => 2,  // STA -> AP, SNonce
            (true, true, true, true) => 3,     // AP -> STA, install key
            (false, true, true, false) => 4,   // STA -> AP, confirm
            _ => 0,
        }
    }
}

/// Extract an EAPOL frame from an unprotected data frame body
pub fn parse_eapol(body: &[u8]) -> Option<EapolFrame> {
    let llc = LlcSnapHeader::parse(body)?;
    if llc.ethertype != ETHERTYPE_EAPOL {
        return None;
    }
    EapolFrame::parse(&body[LlcSnapHeader::LEN..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eapol_key_body(key_info: u16, replay: u64) -> Vec<u8> {
        let mut body = vec![0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00, 0x88, 0x8e];
        body.extend_from_slice(&[0x02, 0x03, 0x00, 0x5f]);
        body.push(0x02);
        body.extend_from_slice(&key_info.to_be_bytes());
        body.extend_from_slice(&16u16.to_be_bytes());
        body.extend_from_slice(&replay.to_be_bytes());
        body.extend_from_slice(&[0u8; 82]);
        body
    }

    #[test]
    fn test_message_numbers() {
        let cases = [(0x008a, 1), (0x010a, 2), (0x13ca, 3), (0x030a, 4)];
        for (info, expected) in cases {
            let eapol = parse_eapol(&eapol_key_body(info, 1)).unwrap();
            assert_eq!(eapol.packet_type, EapolType::Key);
            assert_eq!(eapol.message_number(), expected, "key info {:#06x}", info);
        }
    }

    #[test]
    fn test_replay_counter() {
        let eapol = parse_eapol(&eapol_key_body(0x008a, 42)).unwrap();
        assert_eq!(eapol.key.unwrap().replay_counter, 42);
    }

    #[test]
    fn test_non_eapol_ethertype() {
        // IPv4 over SNAP
        let body = [0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00, 0x08, 0x00, 0x45, 0x00];
        assert!(parse_eapol(&body).is_none());
    }

    #[test]
    fn test_eapol_start_has_no_key() {
        let body = [0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00, 0x88, 0x8e, 0x01, 0x01, 0x00, 0x00];
        let eapol = parse_eapol(&body).unwrap();
        assert_eq!(eapol.packet_type, EapolType::Start);
        assert_eq!(eapol.message_number(), 0);
    }
}
