use core::time::Duration;

use crate::lorawan::region::{DataRateIndex, Region};

/// Device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DevAddr(u32);

impl DevAddr {
    /// Address every device accepts
    pub const BROADCAST: DevAddr = DevAddr(0xFFFF_FFFF);

    /// Create a device address
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Whether this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Little-endian wire representation
    pub fn to_le_bytes(&self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Parse the little-endian wire representation
    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }
}

/// Configuration error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// `max_transmissions` must be at least 1
    NoTransmissions,
    /// `receive_delay2` must be greater than `receive_delay1`
    DelayOrder,
    /// `ack_timeout_min` must not exceed `ack_timeout_max`
    AckTimeoutRange,
    /// `ack_timeout_min` must not be shorter than `receive_delay1`
    AckTimeoutBeforeWindow1,
    /// Data rate not defined in the region
    UnknownDataRate(DataRateIndex),
}

/// Per-device MAC configuration
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device address
    pub dev_addr: DevAddr,
    /// Transmissions per confirmed uplink, including the first one
    pub max_transmissions: u8,
    /// Delay between end of transmission and the first receive window
    pub receive_delay1: Duration,
    /// Delay between end of transmission and the second receive window
    pub receive_delay2: Duration,
    /// Offset between uplink data rate and RX1 data rate
    pub rx1_dr_offset: u8,
    /// RX2 frequency in Hz
    pub rx2_frequency: u32,
    /// RX2 data rate
    pub rx2_data_rate: DataRateIndex,
    /// Uplink data rate
    pub data_rate: DataRateIndex,
    /// Uplink power in dBm
    pub tx_power_dbm: i8,
    /// Step the data rate down on repeated retransmissions
    pub adaptive_data_rate: bool,
    /// Receive window length in symbols when no preamble is detected
    pub rx_window_symbols: u16,
    /// Lower bound of the ACK timeout
    pub ack_timeout_min: Duration,
    /// Upper bound of the ACK timeout
    pub ack_timeout_max: Duration,
    /// Battery level reported in DevStatusAns (0 external, 1-254, 255 unknown)
    pub battery_level: u8,
}

impl DeviceConfig {
    /// Create a configuration with LoRaWAN defaults for a region
    pub fn new<REG: Region>(dev_addr: DevAddr, region: &REG) -> Self {
        let (rx2_frequency, rx2_data_rate) = region.rx2_window();
        Self {
            dev_addr,
            max_transmissions: 1,
            receive_delay1: Duration::from_secs(1),
            receive_delay2: Duration::from_secs(2),
            rx1_dr_offset: 0,
            rx2_frequency,
            rx2_data_rate,
            data_rate: 5,
            tx_power_dbm: 14,
            adaptive_data_rate: false,
            rx_window_symbols: 8,
            ack_timeout_min: Duration::from_secs(1),
            ack_timeout_max: Duration::from_secs(3),
            battery_level: 255,
        }
    }

    /// Set the number of transmissions per confirmed uplink
    pub fn with_max_transmissions(mut self, max_transmissions: u8) -> Self {
        self.max_transmissions = max_transmissions;
        self
    }

    /// Set both receive delays
    pub fn with_receive_delays(mut self, delay1: Duration, delay2: Duration) -> Self {
        self.receive_delay1 = delay1;
        self.receive_delay2 = delay2;
        self
    }

    /// Set the uplink data rate
    pub fn with_data_rate(mut self, data_rate: DataRateIndex) -> Self {
        self.data_rate = data_rate;
        self
    }

    /// Set the RX2 frequency and data rate
    pub fn with_rx2(mut self, frequency: u32, data_rate: DataRateIndex) -> Self {
        self.rx2_frequency = frequency;
        self.rx2_data_rate = data_rate;
        self
    }

    /// Set the RX1 data rate offset
    pub fn with_rx1_dr_offset(mut self, offset: u8) -> Self {
        self.rx1_dr_offset = offset;
        self
    }

    /// Enable or disable data rate stepping on retransmissions
    pub fn with_adaptive_data_rate(mut self, enabled: bool) -> Self {
        self.adaptive_data_rate = enabled;
        self
    }

    /// Set the ACK timeout range
    pub fn with_ack_timeout(mut self, min: Duration, max: Duration) -> Self {
        self.ack_timeout_min = min;
        self.ack_timeout_max = max;
        self
    }

    /// Check the configuration against protocol constraints and a region
    pub fn validate<REG: Region>(&self, region: &REG) -> Result<(), ConfigError> {
        if self.max_transmissions == 0 {
            return Err(ConfigError::NoTransmissions);
        }
        if self.receive_delay2 <= self.receive_delay1 {
            return Err(ConfigError::DelayOrder);
        }
        if self.ack_timeout_min > self.ack_timeout_max {
            return Err(ConfigError::AckTimeoutRange);
        }
        if self.ack_timeout_min < self.receive_delay1 {
            return Err(ConfigError::AckTimeoutBeforeWindow1);
        }
        for dr in [self.data_rate, self.rx2_data_rate] {
            if region.data_rate(dr).is_none() {
                return Err(ConfigError::UnknownDataRate(dr));
            }
        }
        Ok(())
    }
}

/// Session state of an activated device
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Device address
    pub dev_addr: DevAddr,
    /// Uplink frame counter
    pub fcnt_up: u32,
    /// Last downlink frame counter received
    pub fcnt_down: u32,
}

impl SessionState {
    /// Create a fresh session for a device address
    pub fn new(dev_addr: DevAddr) -> Self {
        Self {
            dev_addr,
            fcnt_up: 0,
            fcnt_down: 0,
        }
    }

    /// Increment the uplink frame counter
    pub fn increment_fcnt_up(&mut self) {
        self.fcnt_up = self.fcnt_up.wrapping_add(1);
    }

    /// Record the counter of a received downlink
    pub fn update_fcnt_down(&mut self, fcnt: u16) {
        self.fcnt_down = (self.fcnt_down & 0xFFFF_0000) | fcnt as u32;
    }
}
