//! 802.11 Frame Parser
//!
//! Decodes captured records (radiotap or bare 802.11) into typed frames:
//! - Radiotap metadata (signal strength, tuned channel, FCS presence)
//! - MAC header addressing and sequence control
//! - Management bodies and information elements
//! - LLC/SNAP encapsulated EAPOL key frames

pub mod ieee80211;
pub mod parser;
pub mod radiotap;

pub use ieee80211::{
    element_id, BeaconBody, EapolFrame, FrameHeader, FrameSubtype, FrameType,
    InformationElement, MacAddr,
};
pub use parser::{parse_frame, FrameKind, LinkType, ParsedFrame};
pub use radiotap::{parse_radiotap, RadiotapInfo};
