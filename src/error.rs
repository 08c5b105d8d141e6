use thiserror::Error;

/// Reasons a captured record could not be decoded into a frame.
///
/// These never escape the dispatcher: the frame is still written to the
/// capture file and the loop moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("frame truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("unsupported radiotap version {0}")]
    RadiotapVersion(u8),

    #[error("radiotap header length {length} exceeds record length {available}")]
    RadiotapLength { length: usize, available: usize },

    #[error("unsupported 802.11 protocol version {0}")]
    ProtocolVersion(u8),

    #[error("unsupported link type {0}")]
    LinkType(u32),

    #[error("frame failed its checksum")]
    BadFcs,
}

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("store error: {0}")]
    Store(String),

    #[error("store type mismatch for key {0}")]
    WrongType(String),

    #[error("capture file error: {0}")]
    Capture(String),

    #[error("frame source error: {0}")]
    Source(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid mac address: {0}")]
    InvalidMac(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for AnalyzerError {
    fn from(e: rusqlite::Error) -> Self {
        AnalyzerError::Store(e.to_string())
    }
}

impl From<pcap_file::PcapError> for AnalyzerError {
    fn from(e: pcap_file::PcapError) -> Self {
        AnalyzerError::Capture(e.to_string())
    }
}

impl From<pcap::Error> for AnalyzerError {
    fn from(e: pcap::Error) -> Self {
        AnalyzerError::Source(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
