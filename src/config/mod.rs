//! Device and network configuration
//!
//! This module contains the per-device MAC configuration and session state:
//! - Device address
//! - Receive window timing and RX2 parameters
//! - Retransmission and data rate adaptation settings

/// Device configuration and session state
pub mod device;

pub use device::{ConfigError, DevAddr, DeviceConfig, SessionState};
