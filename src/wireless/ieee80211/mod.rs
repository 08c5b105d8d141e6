//! 802.11 Frame Parsing
//!
//! This module provides parsing for IEEE 802.11 wireless frames.

mod data;
mod frame;
mod management;

pub use data::*;
pub use frame::*;
pub use management::*;
