//! Radiotap Header Parser
//!
//! Parses radiotap headers from wireless captures.
//! Radiotap is a de facto standard for 802.11 frame injection and reception.
//!
//! Reference: https://www.radiotap.org/

use crate::error::ParseError;

/// Radiotap present flags
pub mod flags {
    pub const TSFT: u32 = 1 << 0;
    pub const FLAGS: u32 = 1 << 1;
    pub const RATE: u32 = 1 << 2;
    pub const CHANNEL: u32 = 1 << 3;
    pub const FHSS: u32 = 1 << 4;
    pub const DBM_ANTSIGNAL: u32 = 1 << 5;
    pub const DBM_ANTNOISE: u32 = 1 << 6;
    pub const EXT: u32 = 1 << 31;
}

/// Bits of the radiotap FLAGS field
pub mod frame_flags {
    /// Frame includes the 4-byte FCS at the end
    pub const FCS: u8 = 0x10;
    /// Frame failed the FCS check
    pub const BAD_FCS: u8 = 0x40;
}

/// Extracted information from radiotap header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RadiotapInfo {
    /// Total header length including fields
    pub length: usize,
    /// MAC timestamp in microseconds
    pub tsft: Option<u64>,
    pub flags: Option<u8>,
    /// Data rate in 500Kbps units
    pub rate: Option<u8>,
    /// Channel frequency in MHz
    pub channel_freq: Option<u16>,
    /// Signal strength in dBm
    pub signal_dbm: Option<i8>,
    /// Noise floor in dBm
    pub noise_dbm: Option<i8>,
}

impl RadiotapInfo {
    /// Frame body ends with a frame check sequence
    pub fn has_fcs(&self) -> bool {
        self.flags.map(|f| f & frame_flags::FCS != 0).unwrap_or(false)
    }

    pub fn bad_fcs(&self) -> bool {
        self.flags.map(|f| f & frame_flags::BAD_FCS != 0).unwrap_or(false)
    }

    /// Get channel number from frequency
    pub fn channel(&self) -> Option<u8> {
        self.channel_freq.and_then(freq_to_channel)
    }
}

/// Convert frequency to channel number
pub fn freq_to_channel(freq: u16) -> Option<u8> {
    match freq {
        2484 => Some(14),
        2412..=2472 => Some(((freq - 2407) / 5) as u8),
        5170..=5825 => Some(((freq - 5000) / 5) as u8),
        5955..=7115 => Some(((freq - 5950) / 5) as u8),
        _ => None,
    }
}

/// Parse a radiotap header, returning the extracted fields.
///
/// `RadiotapInfo::length` is the offset of the 802.11 frame.
pub fn parse_radiotap(data: &[u8]) -> Result<RadiotapInfo, ParseError> {
    if data.len() < 8 {
        return Err(ParseError::Truncated { need: 8, have: data.len() });
    }

    let version = data[0];
    if version != 0 {
        return Err(ParseError::RadiotapVersion(version));
    }

    let length = u16::from_le_bytes([data[2], data[3]]) as usize;
    if length < 8 || data.len() < length {
        return Err(ParseError::RadiotapLength { length, available: data.len() });
    }

    let header = &data[..length];
    let present = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

    // Skip any extended present bitmaps
    let mut fields_start = 8;
    let mut word = present;
    while word & flags::EXT != 0 {
        if fields_start + 4 > length {
            return Err(ParseError::RadiotapLength { length: fields_start + 4, available: length });
        }
        word = u32::from_le_bytes([
            header[fields_start], header[fields_start + 1],
            header[fields_start + 2], header[fields_start + 3],
        ]);
        fields_start += 4;
    }

    let mut info = parse_radiotap_fields(header, fields_start, present);
    info.length = length;

    if info.signal_dbm.is_none() {
        info.signal_dbm = trailer_signal(header);
    }

    Ok(info)
}

/// Field walker honouring radiotap's natural alignment.
///
/// Offsets are relative to the start of the header, which is where
/// alignment is measured from.
struct FieldCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldCursor<'a> {
    fn take(&mut self, size: usize, align: usize) -> Option<&'a [u8]> {
        if self.pos % align != 0 {
            self.pos += align - (self.pos % align);
        }
        let field = self.data.get(self.pos..self.pos + size)?;
        self.pos += size;
        Some(field)
    }
}

/// Parse radiotap fields based on present flags
fn parse_radiotap_fields(header: &[u8], start: usize, present: u32) -> RadiotapInfo {
    let mut info = RadiotapInfo::default();
    let mut cursor = FieldCursor { data: header, pos: start };

    if present & flags::TSFT != 0 {
        match cursor.take(8, 8) {
            Some(b) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                info.tsft = Some(u64::from_le_bytes(raw));
            }
            None => return info,
        }
    }

    if present & flags::FLAGS != 0 {
        match cursor.take(1, 1) {
            Some(b) => info.flags = Some(b[0]),
            None => return info,
        }
    }

    if present & flags::RATE != 0 {
        match cursor.take(1, 1) {
            Some(b) => info.rate = Some(b[0]),
            None => return info,
        }
    }

    if present & flags::CHANNEL != 0 {
        match cursor.take(4, 2) {
            Some(b) => info.channel_freq = Some(u16::from_le_bytes([b[0], b[1]])),
            None => return info,
        }
    }

    if present & flags::FHSS != 0 && cursor.take(2, 1).is_none() {
        return info;
    }

    if present & flags::DBM_ANTSIGNAL != 0 {
        match cursor.take(1, 1) {
            Some(b) => info.signal_dbm = Some(b[0] as i8),
            None => return info,
        }
    }

    if present & flags::DBM_ANTNOISE != 0 {
        if let Some(b) = cursor.take(1, 1) {
            info.noise_dbm = Some(b[0] as i8);
        }
    }

    info
}

/// Signal estimate from the undecoded tail of the capture header.
///
/// Some drivers place the antenna signal four bytes from the end of the
/// radiotap header without advertising it in the present bitmap.
fn trailer_signal(header: &[u8]) -> Option<i8> {
    if header.len() <= 8 + 4 {
        return None;
    }
    let raw = header[header.len() - 4];
    if raw == 0 {
        return None;
    }
    Some(-(256 - raw as i16) as i8)
}
