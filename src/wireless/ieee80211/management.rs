//! 802.11 Management Frame Bodies
//!
//! Fixed fields of beacon, probe, authentication and association frames, plus
//! the tagged information elements that follow them.

use crate::error::ParseError;

/// Information element IDs the analyzer inspects
pub mod element_id {
    pub const SSID: u8 = 0;
    pub const DS_PARAMETER: u8 = 3;
    pub const RSN: u8 = 48;
    pub const VENDOR_SPECIFIC: u8 = 221;
}

/// Microsoft OUI, WPA type 1, version 1
pub const WPA_VENDOR_PREFIX: [u8; 6] = [0x00, 0x50, 0xf2, 0x01, 0x01, 0x00];

/// Tagged information element, raw payload kept as-is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InformationElement {
    pub id: u8,
    pub data: Vec<u8>,
}

impl InformationElement {
    /// Vendor element carrying the legacy WPA marker
    pub fn is_wpa(&self) -> bool {
        self.id == element_id::VENDOR_SPECIFIC && self.data.starts_with(&WPA_VENDOR_PREFIX)
    }
}

/// Parse information elements from a management frame body.
///
/// A trailing element whose declared length runs past the buffer ends the
/// list; everything before it is kept.
pub fn parse_ies(data: &[u8]) -> Vec<InformationElement> {
    let mut ies = Vec::new();
    let mut pos = 0;

    while pos + 2 <= data.len() {
        let id = data[pos];
        let len = data[pos + 1] as usize;
        pos += 2;

        if pos + len > data.len() {
            break;
        }

        ies.push(InformationElement {
            id,
            data: data[pos..pos + len].to_vec(),
        });

        pos += len;
    }

    ies
}

/// Fixed fields of a beacon or probe response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconBody {
    /// Timestamp (microseconds)
    pub timestamp: u64,
    /// Beacon interval (TUs)
    pub interval: u16,
    /// Capability information
    pub capability: u16,
}

impl BeaconBody {
    pub const LEN: usize = 12;

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < Self::LEN {
            return Err(ParseError::Truncated { need: Self::LEN, have: data.len() });
        }

        let mut ts = [0u8; 8];
        ts.copy_from_slice(&data[..8]);

        Ok(Self {
            timestamp: u64::from_le_bytes(ts),
            interval: u16::from_le_bytes([data[8], data[9]]),
            capability: u16::from_le_bytes([data[10], data[11]]),
        })
    }
}

/// Authentication frame fixed fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthBody {
    /// Authentication algorithm (0=Open, 1=Shared Key, 3=SAE)
    pub algorithm: u16,
    pub seq_num: u16,
    pub status: u16,
}

impl AuthBody {
    pub const LEN: usize = 6;

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < Self::LEN {
            return Err(ParseError::Truncated { need: Self::LEN, have: data.len() });
        }

        Ok(Self {
            algorithm: u16::from_le_bytes([data[0], data[1]]),
            seq_num: u16::from_le_bytes([data[2], data[3]]),
            status: u16::from_le_bytes([data[4], data[5]]),
        })
    }
}

/// Which association exchange a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssocKind {
    Request,
    Response,
    ReassocRequest,
    ReassocResponse,
}

impl AssocKind {
    /// Length of the fixed fields preceding the information elements
    pub fn fixed_len(&self) -> usize {
        match self {
            // capability + listen interval
            AssocKind::Request => 4,
            // capability + status + AID
            AssocKind::Response | AssocKind::ReassocResponse => 6,
            // capability + listen interval + current AP
            AssocKind::ReassocRequest => 10,
        }
    }
}

/// (Re)association request/response fixed fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssocBody {
    pub kind: AssocKind,
    pub capability: u16,
    /// Listen interval (request) or status code (response)
    pub status_or_interval: u16,
}

impl AssocBody {
    pub fn parse(kind: AssocKind, data: &[u8]) -> Result<Self, ParseError> {
        let need = kind.fixed_len();
        if data.len() < need {
            return Err(ParseError::Truncated { need, have: data.len() });
        }

        Ok(Self {
            kind,
            capability: u16::from_le_bytes([data[0], data[1]]),
            status_or_interval: u16::from_le_bytes([data[2], data[3]]),
        })
    }
}
