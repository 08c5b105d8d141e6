//! Capture Writer
//!
//! Appends every frame the dispatcher sees to a pcap file. Files live in a
//! per-run directory and never overwrite an earlier file of the same name.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::DataLink;
use tracing::{debug, info};

use crate::error::{AnalyzerError, Result};
use crate::source::RawFrame;
use crate::wireless::LinkType;

/// Upper bound on `-N` suffixes tried before giving up
const MAX_SUFFIX: u32 = 10_000;

/// Sequential pcap writer for one (interface, channel) pair
pub struct CaptureWriter {
    path: PathBuf,
    writer: Option<PcapWriter<BufWriter<File>>>,
    written: u64,
}

impl CaptureWriter {
    /// Create `<dir>/<name>`, or the first free `-N` variant of it
    pub fn create(dir: &Path, name: &str, link: LinkType, snaplen: u32) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let (path, file) = create_incremental(dir, name)?;

        let header = PcapHeader {
            snaplen,
            datalink: DataLink::from(link.dlt()),
            ..Default::default()
        };
        let writer = PcapWriter::with_header(BufWriter::new(file), header)?;

        info!("Writing capture to {}", path.display());
        Ok(Self {
            path,
            writer: Some(writer),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append one record
    pub fn write(&mut self, frame: &RawFrame) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| AnalyzerError::Capture(format!("{} is closed", self.path.display())))?;

        let packet = PcapPacket::new(frame.timestamp, frame.orig_len, &frame.data);
        writer.write_packet(&packet)?;
        self.written += 1;
        Ok(())
    }

    /// Flush and close the file; later writes fail
    pub fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let mut inner = writer.into_writer();
            inner.flush()?;
            debug!("Closed {} after {} frames", self.path.display(), self.written);
        }
        Ok(())
    }
}

impl Drop for CaptureWriter {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// File name for an interface/channel capture, e.g. `wlan0mon-ch6.pcap`
pub fn capture_file_name(iface: &str, channel: Option<u8>) -> String {
    match channel {
        Some(ch) => format!("{}-ch{}.pcap", iface, ch),
        None => format!("{}.pcap", iface),
    }
}

/// First path in `dir` that does not exist yet: `name`, then `stem-1.ext`, `stem-2.ext`, ...
pub fn incremental_filename(dir: &Path, name: &str) -> PathBuf {
    (0..MAX_SUFFIX)
        .map(|n| dir.join(suffixed(name, n)))
        .find(|p| !p.exists())
        .unwrap_or_else(|| dir.join(suffixed(name, MAX_SUFFIX)))
}

/// Create a fresh timestamped run directory under `base`
pub fn new_run_directory(base: &Path) -> Result<PathBuf> {
    fs::create_dir_all(base)?;
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();

    for n in 0..MAX_SUFFIX {
        let dir = base.join(suffixed(&stamp, n));
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(AnalyzerError::Capture(format!(
        "no free run directory under {}",
        base.display()
    )))
}

/// Copy `src` into `dir` without overwriting, returning the new path
pub fn copy_incremental(src: &Path, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let name = src
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AnalyzerError::Capture(format!("bad file name {}", src.display())))?;

    let (path, mut file) = create_incremental(dir, name)?;
    let mut input = File::open(src)?;
    io::copy(&mut input, &mut file)?;
    Ok(path)
}

fn create_incremental(dir: &Path, name: &str) -> Result<(PathBuf, File)> {
    for n in 0..MAX_SUFFIX {
        let path = dir.join(suffixed(name, n));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(AnalyzerError::Capture(format!(
        "no free file name for {} in {}",
        name,
        dir.display()
    )))
}

fn suffixed(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, n, ext),
        _ => format!("{}-{}", name, n),
    }
}
