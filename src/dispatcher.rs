//! Classifier/Dispatcher
//!
//! Takes one raw record, writes it to the capture file, parses it, and applies
//! the registry updates, handshake logging and notifications it implies.
//! Nothing here is allowed to stop the loop: parse failures and transient
//! store errors are logged and counted, then the next frame is taken.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::capture::CaptureWriter;
use crate::error::Result;
use crate::handshake::{HandshakeFrame, HandshakeTracker};
use crate::notify::{topic, AttackHook, LogNotifier, Notifier, NoopHook};
use crate::registry::{AccessPoint, AccessPointUpdate, Capability, Crypto, Registry, Ssid, SsidProbe};
use crate::source::RawFrame;
use crate::wireless::{parse_frame, EapolFrame, FrameKind, FrameType, MacAddr, ParsedFrame};

/// What happened to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    /// Bytes did not decode; the frame was still captured
    ParseFailed,
    /// A registry operation failed part way through the frame
    StoreFailed,
}

/// Running counters for one dispatcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub frames: u64,
    pub parse_failures: u64,
    pub store_errors: u64,
    pub capture_errors: u64,
    pub eapol_frames: u64,
    pub target_hits: u64,
}

/// Per-run dispatch behaviour
#[derive(Debug, Clone, Default)]
pub struct DispatcherSettings {
    /// Accept channels 12 and 13
    pub world_channels: bool,
    /// BSSIDs never handed to the attack hook, besides the store's allow list
    pub allow_list: BTreeSet<MacAddr>,
    /// Live interface whose channel observations are counted
    pub iface: Option<String>,
    pub max_handshake_frames: usize,
}

impl DispatcherSettings {
    fn max_channel(&self) -> u8 {
        if self.world_channels {
            13
        } else {
            11
        }
    }
}

#[derive(Serialize)]
struct WepFound {
    client_addr: Option<MacAddr>,
    bssid: MacAddr,
}

pub struct Dispatcher {
    registry: Registry,
    tracker: HandshakeTracker,
    notifier: Arc<dyn Notifier>,
    hook: Box<dyn AttackHook>,
    capture: Option<CaptureWriter>,
    settings: DispatcherSettings,
    /// WEP networks already announced by this dispatcher
    wep_announced: HashSet<MacAddr>,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(registry: Registry, settings: DispatcherSettings) -> Self {
        let max_frames = if settings.max_handshake_frames == 0 {
            HandshakeTracker::DEFAULT_MAX_FRAMES
        } else {
            settings.max_handshake_frames
        };

        Self {
            registry,
            tracker: HandshakeTracker::new(max_frames),
            notifier: Arc::new(LogNotifier),
            hook: Box::new(NoopHook),
            capture: None,
            settings,
            wep_announced: HashSet::new(),
            stats: DispatchStats::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_hook(mut self, hook: Box<dyn AttackHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_capture(mut self, capture: CaptureWriter) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn tracker(&self) -> &HandshakeTracker {
        &self.tracker
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn capture(&self) -> Option<&CaptureWriter> {
        self.capture.as_ref()
    }

    /// Flush and close the capture file
    pub fn finish(&mut self) {
        if let Some(capture) = self.capture.as_mut() {
            if let Err(e) = capture.finish() {
                warn!("Failed to close {}: {}", capture.path().display(), e);
            }
        }
    }

    /// Process one record
    pub fn dispatch(&mut self, raw: &RawFrame) -> Disposition {
        self.stats.frames += 1;

        if let Some(capture) = self.capture.as_mut() {
            if let Err(e) = capture.write(raw) {
                self.stats.capture_errors += 1;
                warn!("Capture write to {} failed: {}", capture.path().display(), e);
            }
        }

        let frame = match parse_frame(&raw.data, raw.link) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.parse_failures += 1;
                debug!("Skipping undecodable frame ({} bytes): {}", raw.data.len(), e);
                return Disposition::ParseFailed;
            }
        };

        match self.handle(&frame, raw) {
            Ok(()) => Disposition::Handled,
            Err(e) => {
                self.stats.store_errors += 1;
                warn!("Registry update failed, frame skipped: {}", e);
                Disposition::StoreFailed
            }
        }
    }

    fn handle(&mut self, frame: &ParsedFrame, raw: &RawFrame) -> Result<()> {
        match &frame.kind {
            FrameKind::Beacon(body) => {
                self.on_announcement(frame, Capability(body.capability))?;
            }
            FrameKind::ProbeResponse(body) => {
                self.on_announcement(frame, Capability(body.capability))?;
                self.on_probe_response(frame)?;
            }
            FrameKind::ProbeRequest => self.on_probe_request(frame)?,
            FrameKind::Eapol(eapol) => self.on_eapol(frame, eapol, raw)?,
            FrameKind::ProtectedData => self.on_protected_data(frame)?,
            FrameKind::Authentication(_)
            | FrameKind::Association(_)
            | FrameKind::Data
            | FrameKind::OtherManagement
            | FrameKind::Control => {}
        }

        if frame.frame_type() == FrameType::Control {
            return Ok(());
        }

        let Some(bssid) = frame.bssid() else {
            return Ok(());
        };
        if self.registry.is_excluded(bssid) {
            return Ok(());
        }

        let ap = self.registry.access_point(bssid)?;
        if let Some(ap) = ap.as_ref().filter(|ap| ap.target) {
            self.publish_target(ap);
        }

        self.on_client_pair(frame, bssid, ap.as_ref())
    }

    /// Channel from the DS element when it is in the accepted range
    fn valid_channel(&self, frame: &ParsedFrame) -> Option<u8> {
        let channel = frame.ds_channel()?;
        if (1..=self.settings.max_channel()).contains(&channel) {
            Some(channel)
        } else {
            debug!("Ignoring out-of-range channel {}", channel);
            None
        }
    }

    /// Beacons and probe responses
    fn on_announcement(&mut self, frame: &ParsedFrame, capability: Capability) -> Result<()> {
        let Some(bssid) = frame.bssid() else {
            return Ok(());
        };
        if self.registry.is_excluded(bssid) {
            return Ok(());
        }

        let existing = self.registry.access_point(bssid)?;
        let ssid = Ssid::decode(frame.ssid());
        let channel = self.valid_channel(frame);
        let crypto = Crypto::classify(frame.has_rsn(), frame.has_wpa(), capability);

        let mut update = AccessPointUpdate {
            channel,
            crypto: Some(crypto),
            capability: Some(capability),
            ..Default::default()
        };
        match &ssid {
            Ssid::Hidden => {
                // A name learned earlier stays in `revealed_ssid`
                update.hidden = Some(true);
                update.ssid = Some(String::new());
            }
            Ssid::Named(name) => {
                update.ssid = Some(name.clone());
                if existing.as_ref().is_some_and(awaits_name) {
                    update.hidden = Some(true);
                    update.revealed_ssid = Some(name.clone());
                }
            }
        }

        let Some(ap) = self.registry.upsert_access_point(bssid, &update)? else {
            return Ok(());
        };

        if existing.as_ref().map_or(true, |ap| ap.last_seen.is_none()) {
            info!(
                "New access point {} ssid={:?} channel={:?} crypto={} signal={:?}",
                bssid, ap.ssid, ap.channel, crypto, frame.signal_dbm
            );
        }

        let was_open = existing.as_ref().and_then(|ap| ap.crypto) == Some(Crypto::Open);
        if crypto == Crypto::Open && !was_open {
            self.notifier.publish(topic::SCAN_OPEN, &bssid.to_string());
        }

        if let (Some(iface), Some(ch)) = (self.settings.iface.as_deref(), channel) {
            self.registry.count_channel(iface, ch)?;
        }

        Ok(())
    }

    fn on_probe_response(&mut self, frame: &ParsedFrame) -> Result<()> {
        let (Some(bssid), client) = (frame.bssid(), frame.header.addr1) else {
            return Ok(());
        };
        let ssid = Ssid::decode(frame.ssid());
        if ssid.is_hidden() || self.registry.is_excluded(client) {
            return Ok(());
        }

        self.registry.record_probe(&SsidProbe {
            ssid: ssid.as_str().to_string(),
            client,
            access_point: bssid.to_string(),
        })?;
        Ok(())
    }

    fn on_probe_request(&mut self, frame: &ParsedFrame) -> Result<()> {
        let (Some(client), Some(bssid)) = (frame.header.addr2, frame.bssid()) else {
            return Ok(());
        };
        if self.registry.is_excluded(client) {
            return Ok(());
        }

        let ssid = Ssid::decode(frame.ssid());
        self.registry.record_probe(&SsidProbe {
            ssid: ssid.as_str().to_string(),
            client,
            access_point: bssid.to_string(),
        })?;
        self.registry.add_recent_network(ssid.as_str())?;
        debug!("Probe from {} for {:?} via {}", client, ssid.as_str(), bssid);

        if self.registry.is_excluded(bssid) {
            return Ok(());
        }

        let existing = self.registry.access_point(bssid)?;
        let update = match &ssid {
            Ssid::Hidden => AccessPointUpdate {
                hidden: Some(true),
                ssid: existing
                    .as_ref()
                    .map_or(true, |ap| ap.ssid.is_empty())
                    .then(String::new),
                ..Default::default()
            },
            Ssid::Named(name) if existing.as_ref().is_some_and(awaits_name) => {
                if existing.as_ref().and_then(|ap| ap.revealed_ssid.as_deref()) != Some(name) {
                    info!("Hidden network {} is {:?}", bssid, name);
                }
                AccessPointUpdate {
                    ssid: Some(name.clone()),
                    hidden: Some(true),
                    revealed_ssid: Some(name.clone()),
                    ..Default::default()
                }
            }
            Ssid::Named(_) => return Ok(()),
        };

        self.registry.upsert_access_point(bssid, &update)?;
        Ok(())
    }

    fn on_eapol(&mut self, frame: &ParsedFrame, eapol: &EapolFrame, raw: &RawFrame) -> Result<()> {
        let Some(bssid) = frame.bssid() else {
            return Ok(());
        };
        if self.registry.is_excluded(bssid) {
            return Ok(());
        }

        self.stats.eapol_frames += 1;
        let entry = HandshakeFrame::new(
            eapol,
            frame.header.source(),
            frame.header.destination(),
            raw.timestamp,
            &raw.data,
        );
        let recorded = self.tracker.record(&self.registry, bssid, entry)?;
        debug!("Handshake log for {} has {} frames", bssid, recorded.log_len);
        Ok(())
    }

    fn on_protected_data(&mut self, frame: &ParsedFrame) -> Result<()> {
        let Some(bssid) = frame.bssid() else {
            return Ok(());
        };
        if self.wep_announced.contains(&bssid) || self.registry.is_excluded(bssid) {
            return Ok(());
        }

        let is_wep = self
            .registry
            .access_point(bssid)?
            .is_some_and(|ap| ap.crypto == Some(Crypto::Wep));
        if !is_wep {
            return Ok(());
        }

        let message = WepFound {
            client_addr: client_of(frame, bssid),
            bssid,
        };
        if let Ok(payload) = serde_json::to_string(&message) {
            self.notifier.publish(topic::WEP_FOUND, &payload);
        }
        self.wep_announced.insert(bssid);
        Ok(())
    }

    fn on_client_pair(
        &mut self,
        frame: &ParsedFrame,
        bssid: MacAddr,
        ap: Option<&AccessPoint>,
    ) -> Result<()> {
        let Some(client) = client_of(frame, bssid) else {
            return Ok(());
        };
        if self.registry.is_excluded(client) {
            return Ok(());
        }

        if self.registry.add_client(bssid, client)? {
            debug!("Client {} seen on {}", client, bssid);
        }

        if self.settings.allow_list.contains(&bssid) || self.registry.is_allow_listed(bssid)? {
            return Ok(());
        }

        let channel = self
            .valid_channel(frame)
            .or_else(|| ap.and_then(|ap| ap.channel))
            .or(frame.radio_channel);
        self.hook.deauth_candidate(client, bssid, channel);
        Ok(())
    }

    fn publish_target(&mut self, ap: &AccessPoint) {
        self.stats.target_hits += 1;
        match serde_json::to_string(ap) {
            Ok(payload) => self.notifier.publish(topic::TARGET, &payload),
            Err(e) => debug!("Failed to encode target {}: {}", ap.bssid, e),
        }
    }
}

/// Observed record that is hidden or whose SSID is still blank
fn awaits_name(ap: &AccessPoint) -> bool {
    ap.last_seen.is_some() && (ap.hidden || ap.ssid.is_empty())
}

/// The station side of a frame: the receiver unless that is the BSSID or
/// broadcast, in which case the transmitter
fn client_of(frame: &ParsedFrame, bssid: MacAddr) -> Option<MacAddr> {
    let addr1 = frame.header.addr1;
    let client = if addr1 == bssid || addr1.is_broadcast() {
        frame.header.addr2?
    } else {
        addr1
    };
    (client != bssid).then_some(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelNotifier;
    use crate::registry::{AddressFilter, MemoryStore};
    use crate::wireless::LinkType;

    struct Recorder(Arc<parking_lot::Mutex<Vec<(MacAddr, MacAddr, Option<u8>)>>>);

    impl AttackHook for Recorder {
        fn deauth_candidate(&mut self, client: MacAddr, bssid: MacAddr, channel: Option<u8>) {
            self.0.lock().push((client, bssid, channel));
        }
    }

    fn mac(s: &str) -> MacAddr {
        s.parse().unwrap()
    }

    fn registry() -> Registry {
        Registry::new(Arc::new(MemoryStore::new()), AddressFilter::new()).unwrap()
    }

    fn header(fc0: u8, fc1: u8, a1: MacAddr, a2: MacAddr, a3: MacAddr) -> Vec<u8> {
        let mut data = vec![fc0, fc1, 0, 0];
        data.extend_from_slice(a1.as_bytes());
        data.extend_from_slice(a2.as_bytes());
        data.extend_from_slice(a3.as_bytes());
        data.extend_from_slice(&[0, 0]);
        data
    }

    fn beacon(bssid: MacAddr, ssid: &[u8], channel: u8, capability: u16) -> RawFrame {
        let mut data = header(0x80, 0, MacAddr::BROADCAST, bssid, bssid);
        data.extend_from_slice(&[0u8; 8]);
        data.extend_from_slice(&100u16.to_le_bytes());
        data.extend_from_slice(&capability.to_le_bytes());
        data.extend_from_slice(&[0, ssid.len() as u8]);
        data.extend_from_slice(ssid);
        data.extend_from_slice(&[3, 1, channel]);
        RawFrame::new(data, LinkType::Ieee80211)
    }

    fn data_to_ds(bssid: MacAddr, station: MacAddr, protected: bool) -> RawFrame {
        let fc1 = if protected { 0x41 } else { 0x01 };
        let mut data = header(0x08, fc1, bssid, station, MacAddr::new([0x02, 0, 0, 0, 0, 0x99]));
        data.extend_from_slice(&[0u8; 16]);
        RawFrame::new(data, LinkType::Ieee80211)
    }

    #[test]
    fn test_beacon_creates_access_point() {
        let registry = registry();
        let mut dispatcher = Dispatcher::new(registry.clone(), DispatcherSettings::default());
        let bssid = mac("ff:bb:aa:cc:ff:ff");

        // ff:bb:... has the group bit set but is none of the excluded prefixes
        assert_eq!(dispatcher.dispatch(&beacon(bssid, b"WiFi Loca", 1, 0x0421)), Disposition::Handled);

        let ap = registry.access_point(bssid).unwrap().unwrap();
        assert_eq!(ap.ssid, "WiFi Loca");
        assert_eq!(ap.channel, Some(1));
        assert_eq!(ap.crypto, Some(Crypto::Open));
        assert_eq!(ap.capability, "short-slot+ESS+short-preamble");
        assert!(!ap.hidden);
    }

    #[test]
    fn test_out_of_range_channel_is_unknown() {
        let registry = registry();
        let mut dispatcher = Dispatcher::new(registry.clone(), DispatcherSettings::default());
        let bssid = mac("02:00:00:00:00:01");
        dispatcher.dispatch(&beacon(bssid, b"x", 13, 0x0001));
        assert_eq!(registry.access_point(bssid).unwrap().unwrap().channel, None);

        let settings = DispatcherSettings {
            world_channels: true,
            iface: Some("wlan0mon".into()),
            ..Default::default()
        };
        let mut dispatcher = Dispatcher::new(registry.clone(), settings);
        dispatcher.dispatch(&beacon(bssid, b"x", 13, 0x0001));
        assert_eq!(registry.access_point(bssid).unwrap().unwrap().channel, Some(13));
        assert_eq!(registry.store().get("iface_wlan0mon_channel_13_count").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_parse_failure_is_counted() {
        let mut dispatcher = Dispatcher::new(registry(), DispatcherSettings::default());
        let raw = RawFrame::new(vec![0x80, 0x00, 0x00], LinkType::Ieee80211);
        assert_eq!(dispatcher.dispatch(&raw), Disposition::ParseFailed);
        assert_eq!(dispatcher.stats().parse_failures, 1);
        assert_eq!(dispatcher.stats().frames, 1);
    }

    #[test]
    fn test_client_pair_reaches_hook() {
        let registry = registry();
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new(registry.clone(), DispatcherSettings::default())
            .with_hook(Box::new(Recorder(calls.clone())));

        let bssid = mac("02:00:00:00:00:01");
        let station = mac("04:00:00:00:00:02");
        dispatcher.dispatch(&beacon(bssid, b"home", 6, 0x0011));
        dispatcher.dispatch(&data_to_ds(bssid, station, false));

        assert_eq!(registry.clients(bssid).unwrap(), vec![station]);
        // Beacons pair the AP with itself and are skipped
        assert_eq!(calls.lock().as_slice(), &[(station, bssid, Some(6))]);
    }

    #[test]
    fn test_allow_listed_bssid_skips_hook() {
        let registry = registry();
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new(registry.clone(), DispatcherSettings::default())
            .with_hook(Box::new(Recorder(calls.clone())));

        let bssid = mac("02:00:00:00:00:01");
        registry.allow(bssid).unwrap();
        dispatcher.dispatch(&data_to_ds(bssid, mac("04:00:00:00:00:02"), false));

        assert_eq!(registry.clients(bssid).unwrap().len(), 1);
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn test_wep_traffic_is_announced_once() {
        let registry = registry();
        let notifier = Arc::new(ChannelNotifier::default());
        let rx = notifier.subscribe(topic::WEP_FOUND);
        let mut dispatcher = Dispatcher::new(registry.clone(), DispatcherSettings::default())
            .with_notifier(notifier.clone());

        let bssid = mac("02:00:00:00:00:01");
        let station = mac("04:00:00:00:00:02");
        dispatcher.dispatch(&beacon(bssid, b"old", 1, 0x0011));
        dispatcher.dispatch(&data_to_ds(bssid, station, true));
        dispatcher.dispatch(&data_to_ds(bssid, station, true));

        let value: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap().payload).unwrap();
        assert_eq!(value["bssid"], "02:00:00:00:00:01");
        assert_eq!(value["client_addr"], "04:00:00:00:00:02");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_open_network_announced() {
        let notifier = Arc::new(ChannelNotifier::default());
        let rx = notifier.subscribe(topic::SCAN_OPEN);
        let mut dispatcher = Dispatcher::new(registry(), DispatcherSettings::default())
            .with_notifier(notifier.clone());

        let bssid = mac("02:00:00:00:00:01");
        dispatcher.dispatch(&beacon(bssid, b"cafe", 1, 0x0001));
        dispatcher.dispatch(&beacon(bssid, b"cafe", 1, 0x0001));

        assert_eq!(rx.try_recv().unwrap().payload, "02:00:00:00:00:01");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_client_of() {
        let bssid = mac("02:00:00:00:00:01");
        let sta = mac("04:00:00:00:00:02");

        let to_ap = parse_frame(&data_to_ds(bssid, sta, false).data, LinkType::Ieee80211).unwrap();
        assert_eq!(client_of(&to_ap, bssid), Some(sta));

        let b = parse_frame(&beacon(bssid, b"x", 1, 1).data, LinkType::Ieee80211).unwrap();
        assert_eq!(client_of(&b, bssid), None);
    }
}
