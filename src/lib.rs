//! LoRaWAN Class C end-device MAC in Rust
//!
//! This crate implements the downlink receive-window scheduler and the
//! confirmed-uplink retransmission engine of a LoRaWAN Class C end device.
//! It is event driven: the host feeds radio and timer events into the MAC,
//! and the MAC drives the radio through the [`radio::Radio`] trait and arms
//! timers through the [`class::timers::Scheduler`] trait.
//!
//! # Features
//! - Class C receive windows (RX2 opened before RX1, reactive RX2 afterwards)
//! - Confirmed uplinks with retransmission and a single outcome notification
//! - RxParamSetupReq / DevStatusReq handling with piggy-backed answers
//! - Data rate back-off on repeated retransmissions
//! - EU868 and US915 regional parameters
//! - No unsafe code, no allocator
//!
//! # Example
//! ```ignore
//! use lorawan_class_c::{
//!     class::{class_c::ClassC, DeviceClass, MacEvent},
//!     config::device::{DevAddr, DeviceConfig},
//!     lorawan::region::Eu868,
//! };
//!
//! let region = Eu868::new();
//! let config = DeviceConfig::new(DevAddr::new(0x2601_1234), &region);
//! let mut mac = ClassC::new(radio, scheduler, listener, rng, region, config)?;
//!
//! mac.send(1, b"hello", true)?;
//! // radio interrupt:
//! mac.handle_event(MacEvent::TransmitComplete)?;
//! ```

#![warn(missing_docs)]
#![no_std]

#[cfg(feature = "defmt")]
#[allow(unused_imports)]
pub(crate) use defmt::{debug, error, info, trace, warn};

#[cfg(not(feature = "defmt"))]
#[allow(unused_imports)]
pub(crate) use log::{debug, error, info, trace, warn};

/// Device class implementations
pub mod class;

/// Device and network configuration
pub mod config;

/// LoRaWAN protocol implementation
pub mod lorawan;

/// Radio hardware abstraction layer
pub mod radio;
