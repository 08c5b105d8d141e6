//! Registry Records
//!
//! Typed views of the field maps kept in the store. Every record is stored as
//! a flat string hash so that updates merge per field.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AnalyzerError;
use crate::wireless::MacAddr;

/// Encryption advertised by an access point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Crypto {
    #[serde(rename = "OPN")]
    Open,
    #[serde(rename = "WEP")]
    Wep,
    #[serde(rename = "WPA")]
    Wpa,
    #[serde(rename = "WPA2")]
    Wpa2,
}

impl Crypto {
    /// RSN element, then WPA vendor element, then the privacy bit.
    pub fn classify(has_rsn: bool, has_wpa: bool, capability: Capability) -> Self {
        if has_rsn {
            Crypto::Wpa2
        } else if has_wpa {
            Crypto::Wpa
        } else if capability.is_privacy() {
            Crypto::Wep
        } else {
            Crypto::Open
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Crypto::Open => "OPN",
            Crypto::Wep => "WEP",
            Crypto::Wpa => "WPA",
            Crypto::Wpa2 => "WPA2",
        }
    }
}

impl fmt::Display for Crypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Crypto {
    type Err = AnalyzerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPN" => Ok(Crypto::Open),
            "WEP" => Ok(Crypto::Wep),
            "WPA" => Ok(Crypto::Wpa),
            "WPA2" => Ok(Crypto::Wpa2),
            other => Err(AnalyzerError::Store(format!("unknown crypto {:?}", other))),
        }
    }
}

/// Capability information field of a beacon or probe response.
///
/// Rendered flags are tested high byte first, each byte from its least
/// significant bit, so `0x0421` renders as `short-slot+ESS+short-preamble`.
/// Output is stable for a given value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability(pub u16);

impl Capability {
    pub const FLAG_ORDER: [(&'static str, u16); 16] = [
        ("spectrum-mgmt", 0x0100),
        ("QoS", 0x0200),
        ("short-slot", 0x0400),
        ("APSD", 0x0800),
        ("radio-measurement", 0x1000),
        ("DSSS-OFDM", 0x2000),
        ("delayed-block-ack", 0x4000),
        ("immediate-block-ack", 0x8000),
        ("ESS", 0x0001),
        ("IBSS", 0x0002),
        ("CFP", 0x0004),
        ("CFP-req", 0x0008),
        ("privacy", 0x0010),
        ("short-preamble", 0x0020),
        ("PBCC", 0x0040),
        ("agility", 0x0080),
    ];

    pub fn flags(&self) -> impl Iterator<Item = &'static str> + '_ {
        Self::FLAG_ORDER
            .iter()
            .filter(move |(_, bit)| self.0 & bit != 0)
            .map(|(name, _)| *name)
    }

    pub fn is_privacy(&self) -> bool {
        self.0 & 0x0010 != 0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags: Vec<&str> = self.flags().collect();
        f.write_str(&flags.join("+"))
    }
}

/// Network name carried in an SSID element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ssid {
    /// Missing, zero-length or all-null element
    Hidden,
    Named(String),
}

impl Ssid {
    /// Decode an SSID element. Bytes that are not UTF-8 are replaced with
    /// U+FFFD rather than rejected.
    pub fn decode(raw: Option<&[u8]>) -> Self {
        match raw {
            None => Ssid::Hidden,
            Some(bytes) if bytes.iter().all(|&b| b == 0) => Ssid::Hidden,
            Some(bytes) => Ssid::Named(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self, Ssid::Hidden)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Ssid::Hidden => "",
            Ssid::Named(name) => name,
        }
    }
}

/// Stored access point record (`access_point_<bssid>`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessPoint {
    pub bssid: MacAddr,
    pub ssid: String,
    pub channel: Option<u8>,
    pub crypto: Option<Crypto>,
    pub capability: String,
    pub hidden: bool,
    /// Name learned from a probe for a hidden network
    pub revealed_ssid: Option<String>,
    pub target: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

pub(crate) mod field {
    pub const BSSID: &str = "bssid";
    pub const SSID: &str = "ssid";
    pub const CHANNEL: &str = "channel";
    pub const CRYPTO: &str = "crypto";
    pub const CAPABILITY: &str = "capability";
    pub const HIDDEN: &str = "hidden";
    pub const REVEALED_SSID: &str = "revealed_ssid";
    pub const TARGET: &str = "target";
    pub const LAST_SEEN: &str = "last_seen";
    pub const CLIENT: &str = "client";
    pub const ACCESS_POINT: &str = "access_point";
}

impl AccessPoint {
    pub fn from_fields(bssid: MacAddr, fields: &BTreeMap<String, String>) -> Self {
        let get = |name: &str| fields.get(name).map(String::as_str);

        AccessPoint {
            bssid,
            ssid: get(field::SSID).unwrap_or_default().to_string(),
            channel: get(field::CHANNEL).and_then(|c| c.parse().ok()),
            crypto: get(field::CRYPTO).and_then(|c| c.parse().ok()),
            capability: get(field::CAPABILITY).unwrap_or_default().to_string(),
            hidden: get(field::HIDDEN).map(parse_flag).unwrap_or(false),
            revealed_ssid: get(field::REVEALED_SSID).map(str::to_string),
            target: get(field::TARGET).map(parse_flag).unwrap_or(false),
            last_seen: get(field::LAST_SEEN)
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// Fields written by a routine observation of an access point.
///
/// Carries no `target` field; only the operator sets that flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPointUpdate {
    pub ssid: Option<String>,
    pub channel: Option<u8>,
    pub crypto: Option<Crypto>,
    pub capability: Option<Capability>,
    /// Only `Some(true)` is ever written by observations
    pub hidden: Option<bool>,
    pub revealed_ssid: Option<String>,
}

impl AccessPointUpdate {
    pub(crate) fn to_fields(&self, bssid: MacAddr, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            (field::BSSID, bssid.to_string()),
            (field::LAST_SEEN, now.to_rfc3339()),
        ];
        if let Some(ssid) = &self.ssid {
            fields.push((field::SSID, ssid.clone()));
        }
        if let Some(channel) = self.channel {
            fields.push((field::CHANNEL, channel.to_string()));
        }
        if let Some(crypto) = self.crypto {
            fields.push((field::CRYPTO, crypto.to_string()));
        }
        if let Some(capability) = self.capability {
            fields.push((field::CAPABILITY, capability.to_string()));
        }
        if let Some(hidden) = self.hidden {
            fields.push((field::HIDDEN, format_flag(hidden)));
        }
        if let Some(name) = &self.revealed_ssid {
            fields.push((field::REVEALED_SSID, name.clone()));
        }
        fields
    }
}

/// Last probe seen from a client (`ssid_<client>`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SsidProbe {
    pub ssid: String,
    pub client: MacAddr,
    /// BSSID the probe was addressed to or answered by
    pub access_point: String,
}

impl SsidProbe {
    pub(crate) fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (field::SSID, self.ssid.clone()),
            (field::CLIENT, self.client.to_string()),
            (field::ACCESS_POINT, self.access_point.clone()),
        ]
    }

    pub fn from_fields(client: MacAddr, fields: &BTreeMap<String, String>) -> Self {
        SsidProbe {
            ssid: fields.get(field::SSID).cloned().unwrap_or_default(),
            client,
            access_point: fields.get(field::ACCESS_POINT).cloned().unwrap_or_default(),
        }
    }
}

/// Flags are stored as `True`/`False`; `true` and `1` are also accepted.
pub fn parse_flag(value: &str) -> bool {
    matches!(value, "True" | "true" | "1")
}

pub fn format_flag(value: bool) -> String {
    if value { "True" } else { "False" }.to_string()
}
