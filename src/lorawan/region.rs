use heapless::Vec;

/// Data rate index as carried in MAC commands and configuration
pub type DataRateIndex = u8;

/// Spreading factor / bandwidth pair a data rate index maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataRate {
    /// Spreading factor
    pub spreading_factor: u8,
    /// Bandwidth in Hz
    pub bandwidth: u32,
}

impl DataRate {
    const fn new(spreading_factor: u8, bandwidth: u32) -> Self {
        Self {
            spreading_factor,
            bandwidth,
        }
    }
}

/// Uplink channel
#[derive(Debug, Clone)]
pub struct Channel {
    /// Channel frequency in Hz
    pub frequency: u32,
    /// Minimum data rate
    pub min_dr: DataRateIndex,
    /// Maximum data rate
    pub max_dr: DataRateIndex,
    /// Whether the channel is enabled
    pub enabled: bool,
}

/// Regional parameters consumed by the MAC
pub trait Region {
    /// Spreading factor and bandwidth for a data rate, `None` if undefined
    fn data_rate(&self, index: DataRateIndex) -> Option<DataRate>;

    /// Data rate used in the first receive window for an uplink data rate
    fn rx1_data_rate(&self, uplink_dr: DataRateIndex, rx1_dr_offset: u8) -> DataRateIndex;

    /// Default RX2 frequency and data rate
    fn rx2_window(&self) -> (u32, DataRateIndex);

    /// Lowest uplink data rate
    fn min_data_rate(&self) -> DataRateIndex;

    /// Enabled uplink channels
    fn enabled_channels(&self) -> impl Iterator<Item = &Channel>;
}

/// EU863-870 data rates DR0..DR6
const EU868_DATA_RATES: [DataRate; 7] = [
    DataRate::new(12, 125_000),
    DataRate::new(11, 125_000),
    DataRate::new(10, 125_000),
    DataRate::new(9, 125_000),
    DataRate::new(8, 125_000),
    DataRate::new(7, 125_000),
    DataRate::new(7, 250_000),
];

/// EU868 region configuration
#[derive(Debug, Clone)]
pub struct Eu868 {
    channels: Vec<Channel, 16>,
}

impl Default for Eu868 {
    fn default() -> Self {
        let mut channels = Vec::new();
        for frequency in [868_100_000, 868_300_000, 868_500_000] {
            // Capacity is 16, the three default channels always fit
            let _ = channels.push(Channel {
                frequency,
                min_dr: 0,
                max_dr: 5,
                enabled: true,
            });
        }
        Self { channels }
    }
}

impl Eu868 {
    /// Create a new EU868 region with the three default join channels
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an uplink channel, returns `false` if the channel table is full
    pub fn add_channel(&mut self, frequency: u32, min_dr: DataRateIndex, max_dr: DataRateIndex) -> bool {
        self.channels
            .push(Channel {
                frequency,
                min_dr,
                max_dr,
                enabled: true,
            })
            .is_ok()
    }
}

impl Region for Eu868 {
    fn data_rate(&self, index: DataRateIndex) -> Option<DataRate> {
        EU868_DATA_RATES.get(index as usize).copied()
    }

    fn rx1_data_rate(&self, uplink_dr: DataRateIndex, rx1_dr_offset: u8) -> DataRateIndex {
        uplink_dr.saturating_sub(rx1_dr_offset)
    }

    fn rx2_window(&self) -> (u32, DataRateIndex) {
        (869_525_000, 0)
    }

    fn min_data_rate(&self) -> DataRateIndex {
        0
    }

    fn enabled_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(|c| c.enabled)
    }
}

/// US902-928 data rates DR0..DR13, `None` for RFU entries
const US915_DATA_RATES: [Option<DataRate>; 14] = [
    Some(DataRate::new(10, 125_000)),
    Some(DataRate::new(9, 125_000)),
    Some(DataRate::new(8, 125_000)),
    Some(DataRate::new(7, 125_000)),
    Some(DataRate::new(8, 500_000)),
    None,
    None,
    None,
    Some(DataRate::new(12, 500_000)),
    Some(DataRate::new(11, 500_000)),
    Some(DataRate::new(10, 500_000)),
    Some(DataRate::new(9, 500_000)),
    Some(DataRate::new(8, 500_000)),
    Some(DataRate::new(7, 500_000)),
];

/// US915 region configuration
#[derive(Debug, Clone)]
pub struct Us915 {
    /// Upstream channels (64 + 8 channels)
    channels: Vec<Channel, 72>,
    /// Current sub-band (0-7)
    sub_band: u8,
}

impl Default for Us915 {
    fn default() -> Self {
        let mut channels = Vec::new();

        // 64 125 kHz upstream channels
        for i in 0..64u32 {
            let _ = channels.push(Channel {
                frequency: 902_300_000 + i * 200_000,
                min_dr: 0,
                max_dr: 3,
                enabled: true,
            });
        }

        // 8 500 kHz upstream channels
        for i in 0..8u32 {
            let _ = channels.push(Channel {
                frequency: 903_000_000 + i * 1_600_000,
                min_dr: 4,
                max_dr: 4,
                enabled: true,
            });
        }

        Self {
            channels,
            sub_band: 0,
        }
    }
}

impl Us915 {
    /// Create a new US915 region with all channels enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict uplinks to a sub-band (0-7): its eight 125 kHz channels and
    /// the matching 500 kHz channel
    pub fn set_sub_band(&mut self, sub_band: u8) {
        self.sub_band = sub_band.min(7);

        for (i, channel) in self.channels.iter_mut().enumerate() {
            channel.enabled = if i < 64 {
                (i / 8) as u8 == self.sub_band
            } else {
                (i - 64) as u8 == self.sub_band
            };
        }
    }

    /// Current sub-band
    pub fn sub_band(&self) -> u8 {
        self.sub_band
    }
}

impl Region for Us915 {
    fn data_rate(&self, index: DataRateIndex) -> Option<DataRate> {
        US915_DATA_RATES.get(index as usize).copied().flatten()
    }

    fn rx1_data_rate(&self, uplink_dr: DataRateIndex, rx1_dr_offset: u8) -> DataRateIndex {
        // DR0..DR4 uplinks map to DR10..DR14 before the offset, clamped to DR8..DR13
        let base = 10 + uplink_dr.min(4);
        base.saturating_sub(rx1_dr_offset).clamp(8, 13)
    }

    fn rx2_window(&self) -> (u32, DataRateIndex) {
        (923_300_000, 8)
    }

    fn min_data_rate(&self) -> DataRateIndex {
        0
    }

    fn enabled_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(|c| c.enabled)
    }
}
