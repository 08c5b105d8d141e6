//! 802.11 frame builder for engine tests

#![allow(dead_code)]

use std::sync::Arc;

use wifi_analyzer::{AddressFilter, MacAddr, MemoryStore, Registry};

pub const SSID: u8 = 0;
pub const DS_PARAMETER: u8 = 3;
pub const RSN: u8 = 48;
pub const VENDOR: u8 = 221;

/// Capability bits: ESS + short-preamble + short-slot
pub const CAP_OPEN: u16 = 0x0421;
/// Capability bits: ESS + privacy
pub const CAP_PRIVACY: u16 = 0x0011;

/// EAPOL-Key info values for messages 1-4
pub const KEY_INFO: [u16; 4] = [0x008a, 0x010a, 0x13ca, 0x030a];

pub fn mac(s: &str) -> MacAddr {
    s.parse().unwrap()
}

pub fn memory_registry() -> Registry {
    Registry::new(Arc::new(MemoryStore::new()), AddressFilter::new()).unwrap()
}

pub fn ie(id: u8, data: &[u8]) -> Vec<u8> {
    let mut out = vec![id, data.len() as u8];
    out.extend_from_slice(data);
    out
}

pub fn rsn_ie() -> Vec<u8> {
    ie(
        RSN,
        &[
            0x01, 0x00, 0x00, 0x0f, 0xac, 0x04, 0x01, 0x00, 0x00, 0x0f, 0xac, 0x04, 0x01, 0x00,
            0x00, 0x0f, 0xac, 0x02, 0x00, 0x00,
        ],
    )
}

pub fn wpa_ie() -> Vec<u8> {
    ie(
        VENDOR,
        &[
            0x00, 0x50, 0xf2, 0x01, 0x01, 0x00, 0x00, 0x50, 0xf2, 0x02, 0x01, 0x00, 0x00, 0x50,
            0xf2, 0x02,
        ],
    )
}

fn header(fc0: u8, fc1: u8, addr1: MacAddr, addr2: MacAddr, addr3: MacAddr) -> Vec<u8> {
    let mut data = vec![fc0, fc1, 0x00, 0x00];
    data.extend_from_slice(addr1.as_bytes());
    data.extend_from_slice(addr2.as_bytes());
    data.extend_from_slice(addr3.as_bytes());
    data.extend_from_slice(&[0x10, 0x00]);
    data
}

fn fixed_fields(capability: u16) -> Vec<u8> {
    let mut body = vec![0u8; 8];
    body.extend_from_slice(&100u16.to_le_bytes());
    body.extend_from_slice(&capability.to_le_bytes());
    body
}

/// Beacon management frame
pub struct Beacon {
    pub bssid: MacAddr,
    pub source: MacAddr,
    pub ssid: Vec<u8>,
    pub channel: Option<u8>,
    pub capability: u16,
    pub extra: Vec<Vec<u8>>,
}

impl Beacon {
    pub fn new(bssid: MacAddr, ssid: &str) -> Self {
        Self {
            bssid,
            source: bssid,
            ssid: ssid.as_bytes().to_vec(),
            channel: Some(1),
            capability: CAP_OPEN,
            extra: Vec::new(),
        }
    }

    pub fn source(mut self, source: MacAddr) -> Self {
        self.source = source;
        self
    }

    pub fn raw_ssid(mut self, ssid: &[u8]) -> Self {
        self.ssid = ssid.to_vec();
        self
    }

    pub fn channel(mut self, channel: Option<u8>) -> Self {
        self.channel = channel;
        self
    }

    pub fn capability(mut self, capability: u16) -> Self {
        self.capability = capability;
        self
    }

    pub fn element(mut self, ie: Vec<u8>) -> Self {
        self.extra.push(ie);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut data = header(0x80, 0x00, MacAddr::BROADCAST, self.source, self.bssid);
        data.extend(fixed_fields(self.capability));
        data.extend(ie(SSID, &self.ssid));
        if let Some(ch) = self.channel {
            data.extend(ie(DS_PARAMETER, &[ch]));
        }
        for extra in &self.extra {
            data.extend_from_slice(extra);
        }
        data
    }
}

pub fn probe_request(client: MacAddr, bssid: MacAddr, ssid: &str) -> Vec<u8> {
    let mut data = header(0x40, 0x00, bssid, client, bssid);
    data.extend(ie(SSID, ssid.as_bytes()));
    data.extend(ie(1, &[0x82, 0x84, 0x8b, 0x96]));
    data
}

pub fn probe_response(bssid: MacAddr, client: MacAddr, ssid: &str, channel: u8) -> Vec<u8> {
    let mut data = header(0x50, 0x00, client, bssid, bssid);
    data.extend(fixed_fields(CAP_OPEN));
    data.extend(ie(SSID, ssid.as_bytes()));
    data.extend(ie(DS_PARAMETER, &[channel]));
    data
}

/// EAPOL-Key data frame for handshake message `message` (1-4)
pub fn eapol(bssid: MacAddr, station: MacAddr, message: usize, replay: u64) -> Vec<u8> {
    let from_ap = message % 2 == 1;
    let mut data = if from_ap {
        header(0x08, 0x02, station, bssid, bssid)
    } else {
        header(0x08, 0x01, bssid, station, bssid)
    };

    data.extend_from_slice(&[0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00, 0x88, 0x8e]);
    data.extend_from_slice(&[0x02, 0x03, 0x00, 0x5f]);
    data.push(0x02);
    data.extend_from_slice(&KEY_INFO[message - 1].to_be_bytes());
    data.extend_from_slice(&16u16.to_be_bytes());
    data.extend_from_slice(&replay.to_be_bytes());
    data.extend_from_slice(&[0u8; 82]);
    data
}

/// Station-to-AP data frame
pub fn data_to_ap(bssid: MacAddr, station: MacAddr, dest: MacAddr, protected: bool) -> Vec<u8> {
    let fc1 = if protected { 0x41 } else { 0x01 };
    let mut data = header(0x08, fc1, bssid, station, dest);
    data.extend_from_slice(&[0u8; 24]);
    data
}

/// AP-to-station data frame
pub fn data_from_ap(bssid: MacAddr, dest: MacAddr) -> Vec<u8> {
    let mut data = header(0x08, 0x02, dest, bssid, bssid);
    data.extend_from_slice(&[0u8; 24]);
    data
}

/// Prefix `frame` with a radiotap header carrying flags, channel and signal
pub fn radiotap(frame: &[u8], freq: u16, signal: i8) -> Vec<u8> {
    // FLAGS | CHANNEL | DBM_ANTSIGNAL
    let present: u32 = (1 << 1) | (1 << 3) | (1 << 5);
    let mut data = vec![0x00, 0x00, 0x00, 0x00];
    data.extend_from_slice(&present.to_le_bytes());
    data.push(0x00);
    data.push(0x00);
    data.extend_from_slice(&freq.to_le_bytes());
    data.extend_from_slice(&0x00a0u16.to_le_bytes());
    data.push(signal as u8);
    let len = data.len() as u16;
    data[2..4].copy_from_slice(&len.to_le_bytes());
    data.extend_from_slice(frame);
    data
}
