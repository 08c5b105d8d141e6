//! Control Loop
//!
//! Pulls frames from a [`FrameSource`] one at a time and hands them to the
//! [`Dispatcher`]. Before every pull the loop checks its own cancel flag,
//! set from Ctrl-C, and the stop flag shared through the registry.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::capture::{self, CaptureWriter};
use crate::config::{AnalyzerSettings, CaptureConfig};
use crate::dispatcher::{DispatchStats, Dispatcher, DispatcherSettings};
use crate::error::Result;
use crate::notify::{AttackHook, LogNotifier, Notifier, PublishHook};
use crate::registry::Registry;
use crate::source::{FrameSource, Pull, SourceOrigin};
use crate::wireless::MacAddr;

/// Pause after a source error before pulling again
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// How a run ended and what it saw
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stats: DispatchStats,
    /// BSSIDs with handshake frames logged during this run
    pub handshake_bssids: Vec<MacAddr>,
    pub elapsed: Duration,
    /// Ended by cancellation or the stop flag rather than by running out of frames
    pub stopped: bool,
    pub capture_path: Option<PathBuf>,
    /// Records that made it into the capture file
    pub captured_frames: u64,
    /// Where a replayed file with handshakes was copied
    pub handshake_copy: Option<PathBuf>,
}

impl RunSummary {
    pub fn frames_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.stats.frames as f64 / secs
        } else {
            0.0
        }
    }
}

pub struct Analyzer {
    source: Box<dyn FrameSource>,
    dispatcher: Dispatcher,
    registry: Registry,
    cancel: Arc<AtomicBool>,
    stats_interval: u64,
    handshake_dir: PathBuf,
}

impl Analyzer {
    pub fn builder(registry: Registry) -> AnalyzerBuilder {
        AnalyzerBuilder::new(registry)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn origin(&self) -> &SourceOrigin {
        self.source.origin()
    }

    /// Run until cancelled, the stop flag is set or the source is exhausted
    pub fn run(&mut self) -> RunSummary {
        let started = Instant::now();
        let mut window_start = Instant::now();
        let mut stopped = false;

        info!("Analyzer started on {:?}", self.source.origin());

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                info!("Cancelled, halting");
                stopped = true;
                break;
            }

            match self.registry.stop_requested() {
                Ok(true) => {
                    info!("Stop requested, halting");
                    stopped = true;
                    break;
                }
                Ok(false) => {}
                Err(e) => warn!("Could not read stop flag: {}", e),
            }

            match self.source.next_frame() {
                Ok(Pull::Frame(raw)) => {
                    self.dispatcher.dispatch(&raw);

                    let frames = self.dispatcher.stats().frames;
                    if self.stats_interval > 0 && frames % self.stats_interval == 0 {
                        let window = window_start.elapsed().as_secs_f64();
                        let rate = if window > 0.0 {
                            self.stats_interval as f64 / window
                        } else {
                            0.0
                        };
                        let stats = self.dispatcher.stats();
                        info!(
                            "Frames: {} ({:.0}/s), parse failures: {}, EAPOL: {}, handshake BSSIDs: {}",
                            frames,
                            rate,
                            stats.parse_failures,
                            stats.eapol_frames,
                            self.dispatcher.tracker().len()
                        );
                        window_start = Instant::now();
                    }
                }
                Ok(Pull::Idle) => continue,
                Ok(Pull::Exhausted) => {
                    info!("Frame source exhausted");
                    break;
                }
                Err(e) => {
                    error!("Frame source error: {}", e);
                    std::thread::sleep(ERROR_BACKOFF);
                }
            }
        }

        self.dispatcher.finish();

        let handshake_bssids: Vec<MacAddr> = {
            let set: BTreeSet<MacAddr> = self.dispatcher.tracker().bssids().copied().collect();
            set.into_iter().collect()
        };
        let handshake_copy = self.copy_replay_with_handshakes(!handshake_bssids.is_empty());

        let summary = RunSummary {
            stats: self.dispatcher.stats(),
            handshake_bssids,
            elapsed: started.elapsed(),
            stopped,
            capture_path: self.dispatcher.capture().map(|c| c.path().to_path_buf()),
            captured_frames: self.dispatcher.capture().map_or(0, |c| c.written()),
            handshake_copy,
        };

        info!(
            "Analyzer finished: {} frames in {:.1}s, {} handshake BSSIDs",
            summary.stats.frames,
            summary.elapsed.as_secs_f64(),
            summary.handshake_bssids.len()
        );
        summary
    }

    fn copy_replay_with_handshakes(&self, has_handshakes: bool) -> Option<PathBuf> {
        let SourceOrigin::Replay { path } = self.source.origin() else {
            return None;
        };
        if !has_handshakes {
            return None;
        }

        match capture::copy_incremental(path, &self.handshake_dir) {
            Ok(dest) => {
                info!("Handshake capture saved to {}", dest.display());
                Some(dest)
            }
            Err(e) => {
                warn!("Failed to copy {} to {}: {}", path.display(), self.handshake_dir.display(), e);
                None
            }
        }
    }
}

/// Builder for creating an analyzer with custom configuration
pub struct AnalyzerBuilder {
    registry: Registry,
    settings: AnalyzerSettings,
    capture: CaptureConfig,
    notifier: Arc<dyn Notifier>,
    hook: Option<Box<dyn AttackHook>>,
    cancel: Arc<AtomicBool>,
}

impl AnalyzerBuilder {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            settings: AnalyzerSettings::default(),
            capture: CaptureConfig::default(),
            notifier: Arc::new(LogNotifier),
            hook: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_settings(mut self, settings: AnalyzerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_capture(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }

    /// Disable pcap output
    pub fn without_pcap(mut self) -> Self {
        self.capture.write_pcap = false;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the default hook, which publishes on `client_found`
    pub fn with_hook(mut self, hook: Box<dyn AttackHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Share a cancel flag with the caller, e.g. a Ctrl-C handler
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self, source: Box<dyn FrameSource>) -> Result<Analyzer> {
        let origin = source.origin().clone();

        let settings = DispatcherSettings {
            // Recorded files may come from anywhere
            world_channels: self.settings.world_channels || origin.is_replay(),
            allow_list: self.settings.allow_list()?.into_iter().collect(),
            iface: match &origin {
                SourceOrigin::Live { iface, .. } => Some(iface.clone()),
                _ => None,
            },
            max_handshake_frames: self.settings.max_handshake_frames,
        };

        let hook = match self.hook {
            Some(hook) => hook,
            None => Box::new(PublishHook::new(self.notifier.clone())) as Box<dyn AttackHook>,
        };

        let mut dispatcher = Dispatcher::new(self.registry.clone(), settings)
            .with_notifier(self.notifier.clone())
            .with_hook(hook);

        if self.capture.write_pcap {
            let run_dir = capture::new_run_directory(&self.capture.dump_dir)?;
            let name = capture::capture_file_name(&origin.label(), origin.channel());
            let writer =
                CaptureWriter::create(&run_dir, &name, source.link_type(), self.capture.snaplen)?;
            dispatcher = dispatcher.with_capture(writer);
        } else {
            debug!("pcap output disabled");
        }

        Ok(Analyzer {
            source,
            dispatcher,
            registry: self.registry,
            cancel: self.cancel,
            stats_interval: self.settings.stats_interval,
            handshake_dir: self.capture.handshake_dir,
        })
    }
}
