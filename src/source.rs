//! Frame Sources
//!
//! The control loop pulls records through [`FrameSource`]. Live capture,
//! file replay and an in-memory queue all implement the same contract.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pcap::{Active, Capture};
use pcap_file::pcap::PcapReader;
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::error::{AnalyzerError, Result};
use crate::wireless::{LinkType, MacAddr};

/// One captured record, exactly as read from the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub data: Vec<u8>,
    /// Capture time since the Unix epoch
    pub timestamp: Duration,
    /// Length on the wire; at least `data.len()`
    pub orig_len: u32,
    pub link: LinkType,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, link: LinkType) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let orig_len = data.len() as u32;
        Self {
            data,
            timestamp,
            orig_len,
            link,
        }
    }
}

/// Outcome of one pull
#[derive(Debug)]
pub enum Pull {
    Frame(RawFrame),
    /// Nothing arrived before the read timeout
    Idle,
    /// The source has no more frames
    Exhausted,
}

/// Where frames come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    Live { iface: String, channel: Option<u8> },
    Replay { path: PathBuf },
    Memory,
}

impl SourceOrigin {
    pub fn is_replay(&self) -> bool {
        matches!(self, SourceOrigin::Replay { .. })
    }

    /// Interface name, or a stand-in used for capture file names
    pub fn label(&self) -> String {
        match self {
            SourceOrigin::Live { iface, .. } => iface.clone(),
            SourceOrigin::Replay { path } => path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("replay")
                .to_string(),
            SourceOrigin::Memory => "memory".to_string(),
        }
    }

    pub fn channel(&self) -> Option<u8> {
        match self {
            SourceOrigin::Live { channel, .. } => *channel,
            _ => None,
        }
    }
}

/// Trait for frame source implementations
pub trait FrameSource: Send {
    /// Pull the next record. This is the loop's only blocking call.
    fn next_frame(&mut self) -> Result<Pull>;

    fn link_type(&self) -> LinkType;

    fn origin(&self) -> &SourceOrigin;
}

/// Monitor-mode interface capture via libpcap
pub struct LiveFrameSource {
    capture: Capture<Active>,
    link: LinkType,
    origin: SourceOrigin,
}

impl LiveFrameSource {
    pub fn open(iface: &str, channel: Option<u8>, config: &CaptureConfig) -> Result<Self> {
        let capture = Capture::from_device(iface)?
            .promisc(config.promiscuous)
            .snaplen(config.snaplen as i32)
            .timeout(config.timeout_ms as i32)
            .buffer_size(config.buffer_size as i32)
            .immediate_mode(true)
            .open()?;

        let dlt = capture.get_datalink().0 as u32;
        let link = LinkType::from_dlt(dlt);
        if let LinkType::Unsupported(dlt) = link {
            warn!("{} has link type {}; frames will not decode", iface, dlt);
        }

        info!("Capturing on {} (channel {:?}, {:?})", iface, channel, link);
        Ok(Self {
            capture,
            link,
            origin: SourceOrigin::Live {
                iface: iface.to_string(),
                channel,
            },
        })
    }
}

impl FrameSource for LiveFrameSource {
    fn next_frame(&mut self) -> Result<Pull> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts;
                let timestamp = Duration::new(
                    ts.tv_sec.max(0) as u64,
                    (ts.tv_usec.clamp(0, 999_999) as u32) * 1000,
                );
                Ok(Pull::Frame(RawFrame {
                    data: packet.data.to_vec(),
                    timestamp,
                    orig_len: packet.header.len,
                    link: self.link,
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(Pull::Idle),
            Err(pcap::Error::NoMorePackets) => Ok(Pull::Exhausted),
            Err(e) => Err(e.into()),
        }
    }

    fn link_type(&self) -> LinkType {
        self.link
    }

    fn origin(&self) -> &SourceOrigin {
        &self.origin
    }
}

/// Replay of a recorded pcap file
pub struct ReplayFrameSource {
    reader: PcapReader<BufReader<File>>,
    link: LinkType,
    origin: SourceOrigin,
    done: bool,
}

impl ReplayFrameSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| AnalyzerError::Source(format!("{}: {}", path.display(), e)))?;
        let reader = PcapReader::new(BufReader::new(file))?;
        let link = LinkType::from_dlt(u32::from(reader.header().datalink));

        info!("Replaying {} ({:?})", path.display(), link);
        Ok(Self {
            reader,
            link,
            origin: SourceOrigin::Replay {
                path: path.to_path_buf(),
            },
            done: false,
        })
    }
}

impl FrameSource for ReplayFrameSource {
    fn next_frame(&mut self) -> Result<Pull> {
        if self.done {
            return Ok(Pull::Exhausted);
        }

        match self.reader.next_packet() {
            Some(Ok(packet)) => Ok(Pull::Frame(RawFrame {
                data: packet.data.into_owned(),
                timestamp: packet.timestamp,
                orig_len: packet.orig_len,
                link: self.link,
            })),
            Some(Err(e)) => {
                // A damaged record ends the replay; the rest of the file is unreadable
                warn!("Replay stopped on unreadable record: {}", e);
                self.done = true;
                Ok(Pull::Exhausted)
            }
            None => {
                self.done = true;
                Ok(Pull::Exhausted)
            }
        }
    }

    fn link_type(&self) -> LinkType {
        self.link
    }

    fn origin(&self) -> &SourceOrigin {
        &self.origin
    }
}

/// Frames queued in memory (for testing)
#[derive(Debug)]
pub struct MemorySource {
    frames: VecDeque<RawFrame>,
    link: LinkType,
    origin: SourceOrigin,
}

impl MemorySource {
    pub fn new(link: LinkType) -> Self {
        Self {
            frames: VecDeque::new(),
            link,
            origin: SourceOrigin::Memory,
        }
    }

    /// Queue raw frame bytes
    pub fn push(&mut self, data: Vec<u8>) {
        self.frames.push_back(RawFrame::new(data, self.link));
    }

    pub fn with_frames<I: IntoIterator<Item = Vec<u8>>>(link: LinkType, frames: I) -> Self {
        let mut source = Self::new(link);
        for data in frames {
            source.push(data);
        }
        source
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Pull> {
        Ok(self
            .frames
            .pop_front()
            .map(Pull::Frame)
            .unwrap_or(Pull::Exhausted))
    }

    fn link_type(&self) -> LinkType {
        self.link
    }

    fn origin(&self) -> &SourceOrigin {
        &self.origin
    }
}

/// Hardware address of a local interface, read from sysfs
pub fn monitor_mac(iface: &str) -> Option<MacAddr> {
    let path = Path::new("/sys/class/net").join(iface).join("address");
    match fs::read_to_string(&path) {
        Ok(text) => text.trim().parse().ok(),
        Err(e) => {
            debug!("No address for {}: {}", iface, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
    use pcap_file::DataLink;

    #[test]
    fn test_memory_source_drains() {
        let mut source = MemorySource::with_frames(LinkType::Ieee80211, vec![vec![1], vec![2]]);
        assert!(matches!(source.next_frame().unwrap(), Pull::Frame(f) if f.data == vec![1]));
        assert!(matches!(source.next_frame().unwrap(), Pull::Frame(f) if f.data == vec![2]));
        assert!(matches!(source.next_frame().unwrap(), Pull::Exhausted));
        assert_eq!(source.origin(), &SourceOrigin::Memory);
    }

    #[test]
    fn test_replay_source_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wlan0-ch6.pcap");
        {
            let file = File::create(&path).unwrap();
            let header = PcapHeader {
                datalink: DataLink::from(LinkType::DLT_IEEE802_11),
                ..Default::default()
            };
            let mut writer = PcapWriter::with_header(file, header).unwrap();
            writer
                .write_packet(&PcapPacket::new(Duration::from_secs(5), 3, &[7, 8, 9]))
                .unwrap();
        }

        let mut source = ReplayFrameSource::open(&path).unwrap();
        assert_eq!(source.link_type(), LinkType::Ieee80211);
        assert!(source.origin().is_replay());
        assert_eq!(source.origin().label(), "wlan0-ch6");

        match source.next_frame().unwrap() {
            Pull::Frame(frame) => {
                assert_eq!(frame.data, vec![7, 8, 9]);
                assert_eq!(frame.timestamp, Duration::from_secs(5));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(source.next_frame().unwrap(), Pull::Exhausted));
        assert!(matches!(source.next_frame().unwrap(), Pull::Exhausted));
    }

    #[test]
    fn test_replay_missing_file() {
        assert!(matches!(
            ReplayFrameSource::open("/nonexistent/capture.pcap"),
            Err(AnalyzerError::Source(_))
        ));
    }
}
