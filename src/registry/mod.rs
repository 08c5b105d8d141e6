//! Entity Registry
//!
//! Typed upserts and reads for access points, clients, probes and session
//! counters over a shared [`Store`]. The registry holds no cached facts of its
//! own; every call goes to the store.

pub mod model;
pub mod sqlite;
pub mod store;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;
use crate::wireless::MacAddr;

pub use model::{AccessPoint, AccessPointUpdate, Capability, Crypto, Ssid, SsidProbe};
pub use sqlite::SqliteStore;
pub use store::{LoggedMessage, MemoryStore, Store, MESSAGE_RETENTION};

use model::{field, format_flag, parse_flag};

/// Store key names
pub mod keys {
    use crate::wireless::MacAddr;

    pub const ACCESS_POINT_PREFIX: &str = "access_point_";
    pub const CLIENTS_PREFIX: &str = "clients_";
    pub const SSID_PREFIX: &str = "ssid_";
    pub const LAST_SEEN_PROBE_NETWORKS: &str = "last_seen_probe_networks";
    pub const SESSION_STATS: &str = "session_stats";
    pub const STOP_ANALYZER: &str = "stop_analyzer";
    pub const HANDSHAKE_BSSIDS: &str = "handshake_bssids";
    pub const ALLOW_LIST: &str = "allow_list";

    /// `session_stats` field counting newly seen handshakes
    pub const HANDSHAKES_FIELD: &str = "handshakes";

    pub fn access_point(bssid: MacAddr) -> String {
        format!("{}{}", ACCESS_POINT_PREFIX, bssid)
    }

    pub fn clients(bssid: MacAddr) -> String {
        format!("{}{}", CLIENTS_PREFIX, bssid)
    }

    pub fn ssid_probe(client: MacAddr) -> String {
        format!("{}{}", SSID_PREFIX, client)
    }

    pub fn channel_count(iface: &str, channel: u8) -> String {
        format!("iface_{}_channel_{}_count", iface, channel)
    }
}

/// Open the configured store backend
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    match config.backend {
        StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::open(&config.path, config.busy_timeout())?)),
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Addresses that must never become an access point or client key
#[derive(Debug, Clone, Default)]
pub struct AddressFilter {
    ignored: BTreeSet<MacAddr>,
}

impl AddressFilter {
    /// Broadcast, all-zero, and multicast-derived prefixes (IPv4, IPv6, STP)
    const EXCLUDED_PREFIXES: [&'static [u8]; 5] = [
        &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff],
        &[0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        &[0x01, 0x00, 0x5e],
        &[0x33, 0x33],
        &[0x01, 0x80, 0xc2, 0x00, 0x00, 0x00],
    ];

    pub fn new() -> Self {
        Self::default()
    }

    /// Also exclude `mac`, e.g. the monitor interface's own address
    pub fn ignore(&mut self, mac: MacAddr) {
        self.ignored.insert(mac);
    }

    pub fn with_ignored<I: IntoIterator<Item = MacAddr>>(mut self, macs: I) -> Self {
        self.ignored.extend(macs);
        self
    }

    pub fn is_excluded(&self, mac: MacAddr) -> bool {
        let bytes = mac.as_bytes();
        Self::EXCLUDED_PREFIXES
            .iter()
            .any(|prefix| bytes.starts_with(prefix))
            || self.ignored.contains(&mac)
    }
}

/// Handle to the shared entity registry
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn Store>,
    filter: AddressFilter,
}

impl Registry {
    /// Wrap a store, failing if it cannot be reached
    pub fn new(store: Arc<dyn Store>, filter: AddressFilter) -> Result<Self> {
        store.ping()?;
        Ok(Self { store, filter })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn filter(&self) -> &AddressFilter {
        &self.filter
    }

    pub fn is_excluded(&self, mac: MacAddr) -> bool {
        self.filter.is_excluded(mac)
    }

    /// Merge `update` into the access point record, creating it if absent.
    ///
    /// Returns the merged record, or `None` when the BSSID is excluded.
    /// `target` is never written here.
    pub fn upsert_access_point(
        &self,
        bssid: MacAddr,
        update: &AccessPointUpdate,
    ) -> Result<Option<AccessPoint>> {
        if self.filter.is_excluded(bssid) {
            debug!("Ignoring access point update for excluded address {}", bssid);
            return Ok(None);
        }

        let key = keys::access_point(bssid);
        self.store.hset(&key, &update.to_fields(bssid, Utc::now()))?;

        self.access_point(bssid)
    }

    pub fn access_point(&self, bssid: MacAddr) -> Result<Option<AccessPoint>> {
        let fields = self.store.hgetall(&keys::access_point(bssid))?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(AccessPoint::from_fields(bssid, &fields)))
    }

    /// Every stored access point, ordered by BSSID
    pub fn access_points(&self) -> Result<Vec<AccessPoint>> {
        let mut aps = Vec::new();
        for key in self.store.keys(keys::ACCESS_POINT_PREFIX)? {
            let Ok(bssid) = key[keys::ACCESS_POINT_PREFIX.len()..].parse::<MacAddr>() else {
                continue;
            };
            if let Some(ap) = self.access_point(bssid)? {
                aps.push(ap);
            }
        }
        Ok(aps)
    }

    /// Operator-facing: mark or unmark an access point as a target
    pub fn set_target(&self, bssid: MacAddr, target: bool) -> Result<()> {
        self.store.hset(
            &keys::access_point(bssid),
            &[
                (field::BSSID, bssid.to_string()),
                (field::TARGET, format_flag(target)),
            ],
        )
    }

    /// Associate `client` with `bssid`. A no-op when either is excluded.
    pub fn add_client(&self, bssid: MacAddr, client: MacAddr) -> Result<bool> {
        if self.filter.is_excluded(bssid) || self.filter.is_excluded(client) {
            return Ok(false);
        }
        self.store.sadd(&keys::clients(bssid), &client.to_string())
    }

    pub fn clients(&self, bssid: MacAddr) -> Result<Vec<MacAddr>> {
        Ok(self
            .store
            .smembers(&keys::clients(bssid))?
            .iter()
            .filter_map(|m| m.parse().ok())
            .collect())
    }

    /// Overwrite the client's last probe
    pub fn record_probe(&self, probe: &SsidProbe) -> Result<bool> {
        if self.filter.is_excluded(probe.client) {
            return Ok(false);
        }
        self.store.hset(&keys::ssid_probe(probe.client), &probe.to_fields())?;
        Ok(true)
    }

    pub fn probe(&self, client: MacAddr) -> Result<Option<SsidProbe>> {
        let fields = self.store.hgetall(&keys::ssid_probe(client))?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(SsidProbe::from_fields(client, &fields)))
    }

    /// Remember a probed network name; empty names are not recorded
    pub fn add_recent_network(&self, ssid: &str) -> Result<()> {
        if !ssid.is_empty() {
            self.store.sadd(keys::LAST_SEEN_PROBE_NETWORKS, ssid)?;
        }
        Ok(())
    }

    pub fn recent_networks(&self) -> Result<BTreeSet<String>> {
        self.store.smembers(keys::LAST_SEEN_PROBE_NETWORKS)
    }

    /// Record that `bssid` has produced a handshake frame.
    ///
    /// Returns `true` exactly once per BSSID across every loop sharing the
    /// store; that call also bumps the session handshake counter.
    pub fn mark_handshake(&self, bssid: MacAddr) -> Result<bool> {
        self.store.sadd_and_hincrby(
            keys::HANDSHAKE_BSSIDS,
            &bssid.to_string(),
            keys::SESSION_STATS,
            keys::HANDSHAKES_FIELD,
            1,
        )
    }

    pub fn handshake_bssids(&self) -> Result<BTreeSet<String>> {
        self.store.smembers(keys::HANDSHAKE_BSSIDS)
    }

    pub fn session_stats(&self) -> Result<BTreeMap<String, String>> {
        self.store.hgetall(keys::SESSION_STATS)
    }

    pub fn handshake_count(&self) -> Result<i64> {
        Ok(self
            .session_stats()?
            .get(keys::HANDSHAKES_FIELD)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    pub fn stop_requested(&self) -> Result<bool> {
        Ok(self
            .store
            .get(keys::STOP_ANALYZER)?
            .map(|v| parse_flag(&v))
            .unwrap_or(false))
    }

    pub fn request_stop(&self, stop: bool) -> Result<()> {
        self.store.set(keys::STOP_ANALYZER, &format_flag(stop))
    }

    pub fn allow(&self, bssid: MacAddr) -> Result<bool> {
        self.store.sadd(keys::ALLOW_LIST, &bssid.to_string())
    }

    pub fn is_allow_listed(&self, bssid: MacAddr) -> Result<bool> {
        self.store.sismember(keys::ALLOW_LIST, &bssid.to_string())
    }

    pub fn count_channel(&self, iface: &str, channel: u8) -> Result<i64> {
        self.store.incr(&keys::channel_count(iface, channel))
    }
}
