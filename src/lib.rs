//! Passive 802.11 discovery and handshake capture.
//!
//! Frames come from a [`source::FrameSource`], are decoded by
//! [`wireless::parse_frame`], and are applied to the shared
//! [`registry::Registry`] by the [`dispatcher::Dispatcher`]. The
//! [`analyzer::Analyzer`] drives that loop until it is cancelled, the
//! registry's stop flag is set, or the source runs dry.

pub mod analyzer;
pub mod capture;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod notify;
pub mod registry;
pub mod source;
pub mod wireless;

pub use analyzer::{Analyzer, AnalyzerBuilder, RunSummary};
pub use config::Config;
pub use dispatcher::{Disposition, DispatchStats, Dispatcher, DispatcherSettings};
pub use error::{AnalyzerError, ParseError, Result};
pub use handshake::{HandshakeLog, HandshakeTracker};
pub use notify::{AttackHook, ChannelNotifier, Notifier, PublishHook, StoreNotifier};
pub use registry::{AddressFilter, MemoryStore, Registry, SqliteStore, Store};
pub use source::{FrameSource, LiveFrameSource, MemorySource, RawFrame, ReplayFrameSource};
pub use wireless::{LinkType, MacAddr};
