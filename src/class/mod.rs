//! LoRaWAN device class implementations
//!
//! A device class is the receive-window state machine sitting between the
//! application and the radio. Every class shares the same building blocks:
//! - [`timers::WindowTimers`]: single-slot window timers armed on a host scheduler
//! - [`retransmission::RetransmissionController`]: confirmed uplink bookkeeping
//!
//! Only Class C (continuous reception) is provided.

/// Class C device implementation
pub mod class_c;
pub use class_c::ClassC;

/// Confirmed uplink retransmission state
pub mod retransmission;
pub use retransmission::TxOutcome;

/// Receive window timers
pub mod timers;

use core::time::Duration;

use crate::config::device::SessionState;
use timers::TimerExpiry;

/// Inbound event delivered to a device class by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacEvent<'a> {
    /// The radio finished sending the last frame
    TransmitComplete,
    /// A frame was fully demodulated
    PacketReceived(&'a [u8]),
    /// A preamble was detected but the frame was lost
    ReceptionFailed,
    /// A timer armed through the scheduler expired
    TimerExpired(TimerExpiry),
}

/// Application payload of a downlink addressed to this device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Downlink<'a> {
    /// Application port
    pub port: u8,
    /// Application payload
    pub payload: &'a [u8],
}

/// Application side of the MAC
pub trait MacListener {
    /// A downlink for this device carried application data
    fn on_downlink(&mut self, downlink: &Downlink<'_>);

    /// Final outcome of an uplink
    fn on_tx_outcome(&mut self, outcome: &TxOutcome);

    /// A new application frame was handed to the radio
    fn on_new_uplink(&mut self, _frame: &[u8]) {}
}

/// Result of a send request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Frame handed to the radio
    Sent,
    /// Receive windows are still open; retry with
    /// [`DeviceClass::send_now`] once the delay has elapsed
    Postponed(Duration),
}

/// Common trait for all device classes
pub trait DeviceClass {
    /// Error type for device operations
    type Error;

    /// Send application data, postponing it while receive windows are open
    fn send(&mut self, port: u8, payload: &[u8], confirmed: bool)
        -> Result<SendStatus, Self::Error>;

    /// Send application data immediately
    ///
    /// A confirmed uplink still waiting for its ACK is reported as failed
    /// before the new frame replaces it.
    fn send_now(&mut self, port: u8, payload: &[u8], confirmed: bool) -> Result<(), Self::Error>;

    /// Process a radio or timer event
    fn handle_event(&mut self, event: MacEvent<'_>) -> Result<(), Self::Error>;

    /// Extend `waiting` to the delay the protocol requires before the next
    /// transmission. Never returns less than `waiting`.
    fn next_transmission_delay(&mut self, waiting: Duration) -> Duration;

    /// Get session state
    fn session_state(&self) -> &SessionState;
}
