//! Handshake Tracker
//!
//! Keeps an append-only log of EAPOL frames per BSSID and bumps the shared
//! session counter the first time any loop sees a handshake frame for a BSSID.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::Result;
use crate::registry::Registry;
use crate::wireless::{EapolFrame, MacAddr};

/// One logged key-exchange frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFrame {
    /// Capture timestamp
    pub timestamp: Duration,
    pub source: Option<MacAddr>,
    pub destination: Option<MacAddr>,
    /// EAPOL-Key message number (1-4), 0 if unknown
    pub message: u8,
    pub replay_counter: Option<u64>,
    /// The full capture record
    pub raw: Vec<u8>,
}

impl HandshakeFrame {
    pub fn new(
        eapol: &EapolFrame,
        source: Option<MacAddr>,
        destination: Option<MacAddr>,
        timestamp: Duration,
        raw: &[u8],
    ) -> Self {
        Self {
            timestamp,
            source,
            destination,
            message: eapol.message_number(),
            replay_counter: eapol.key.map(|k| k.replay_counter),
            raw: raw.to_vec(),
        }
    }
}

/// Ordered key-exchange frames for one BSSID
#[derive(Debug, Clone, Default)]
pub struct HandshakeLog {
    frames: Vec<HandshakeFrame>,
    /// Bit n-1 set once message n has been logged
    messages_seen: u8,
    /// Frames not kept because the log was full
    dropped: u64,
}

impl HandshakeLog {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[HandshakeFrame] {
        &self.frames
    }

    pub fn messages_seen(&self) -> u8 {
        self.messages_seen
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Four or more frames logged. Message order is not validated.
    pub fn is_complete(&self) -> bool {
        self.frames.len() >= 4
    }

    /// Messages 1 through 4 have each been seen at least once
    pub fn has_all_messages(&self) -> bool {
        self.messages_seen == 0x0f
    }
}

/// Result of logging one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
    /// Log length for the BSSID after this frame
    pub log_len: usize,
    /// First handshake frame for this BSSID in the shared store
    pub first_for_bssid: bool,
}

/// Per-BSSID handshake logs for one control loop
#[derive(Debug)]
pub struct HandshakeTracker {
    logs: HashMap<MacAddr, HandshakeLog>,
    max_frames: usize,
}

impl HandshakeTracker {
    pub const DEFAULT_MAX_FRAMES: usize = 64;

    pub fn new(max_frames: usize) -> Self {
        Self {
            logs: HashMap::new(),
            max_frames: max_frames.max(4),
        }
    }

    /// Append a frame to the BSSID's log and mark the BSSID in the store.
    ///
    /// The session counter moves only on the first frame ever seen for
    /// `bssid`, however many loops share the store.
    pub fn record(
        &mut self,
        registry: &Registry,
        bssid: MacAddr,
        frame: HandshakeFrame,
    ) -> Result<Recorded> {
        let log = self.logs.entry(bssid).or_default();

        if (1..=4).contains(&frame.message) {
            log.messages_seen |= 1 << (frame.message - 1);
        }

        if log.frames.len() < self.max_frames {
            debug!(
                "EAPOL message {} for {} ({} logged)",
                frame.message,
                bssid,
                log.frames.len() + 1
            );
            log.frames.push(frame);
        } else {
            log.dropped += 1;
        }
        let log_len = log.frames.len();

        let first_for_bssid = registry.mark_handshake(bssid)?;
        if first_for_bssid {
            info!("New handshake for {}", bssid);
        }

        Ok(Recorded {
            log_len,
            first_for_bssid,
        })
    }

    pub fn log(&self, bssid: MacAddr) -> Option<&HandshakeLog> {
        self.logs.get(&bssid)
    }

    /// BSSIDs with at least one logged frame in this loop
    pub fn bssids(&self) -> impl Iterator<Item = &MacAddr> {
        self.logs.keys()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

impl Default for HandshakeTracker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_FRAMES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::registry::{AddressFilter, MemoryStore};

    fn frame(message: u8) -> HandshakeFrame {
        HandshakeFrame {
            timestamp: Duration::from_millis(message as u64),
            source: None,
            destination: None,
            message,
            replay_counter: Some(1),
            raw: vec![message],
        }
    }

    fn registry() -> Registry {
        Registry::new(Arc::new(MemoryStore::new()), AddressFilter::new()).unwrap()
    }

    #[test]
    fn test_four_frames_count_once() {
        let registry = registry();
        let mut tracker = HandshakeTracker::default();
        let bssid = MacAddr::new([0x02, 0, 0, 0, 0, 1]);

        let first = tracker.record(&registry, bssid, frame(1)).unwrap();
        assert!(first.first_for_bssid);
        for msg in 2..=4 {
            let rec = tracker.record(&registry, bssid, frame(msg)).unwrap();
            assert!(!rec.first_for_bssid);
        }

        let log = tracker.log(bssid).unwrap();
        assert_eq!(log.len(), 4);
        assert!(log.is_complete());
        assert!(log.has_all_messages());
        assert_eq!(registry.handshake_count().unwrap(), 1);

        tracker.record(&registry, bssid, frame(1)).unwrap();
        assert_eq!(registry.handshake_count().unwrap(), 1);
    }

    #[test]
    fn test_shared_marker_across_trackers() {
        let registry = registry();
        let bssid = MacAddr::new([0x02, 0, 0, 0, 0, 1]);

        let mut a = HandshakeTracker::default();
        let mut b = HandshakeTracker::default();
        assert!(a.record(&registry, bssid, frame(1)).unwrap().first_for_bssid);
        assert!(!b.record(&registry, bssid, frame(2)).unwrap().first_for_bssid);
        assert_eq!(registry.handshake_count().unwrap(), 1);
    }

    #[test]
    fn test_log_bound() {
        let registry = registry();
        let mut tracker = HandshakeTracker::new(4);
        let bssid = MacAddr::new([0x02, 0, 0, 0, 0, 1]);
        for _ in 0..6 {
            tracker.record(&registry, bssid, frame(0)).unwrap();
        }
        let log = tracker.log(bssid).unwrap();
        assert_eq!(log.len(), 4);
        assert_eq!(log.dropped(), 2);
        assert!(!log.has_all_messages());
    }
}
