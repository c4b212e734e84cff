//! LoRaWAN protocol implementation
//!
//! This module contains the protocol pieces the device classes build on:
//! - Envelope codec for data frames
//! - MAC command parsing and live MAC parameters
//! - PHY timing helpers
//! - Regional parameters

/// MAC command handling
pub mod commands;

/// Envelope codec
pub mod frame;

/// MAC parameters and errors
pub mod mac;

/// PHY timing helpers
pub mod phy;

/// Regional parameters and configurations
pub mod region;

pub use mac::{MacError, MacParams};
pub use region::{DataRate, DataRateIndex, Eu868, Region, Us915};
