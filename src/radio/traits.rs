use core::time::Duration;

/// Symbol time above which low data rate optimisation is switched on
const LOW_DATA_RATE_SYMBOL_TIME: Duration = Duration::from_millis(16);

/// Radio operating mode as reported by the PHY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioMode {
    /// A frame is being sent
    Transmit,
    /// A preamble has been detected and a frame is being demodulated
    Receive,
    /// Listening, nothing detected yet
    Standby,
    /// Radio is idle and not listening
    Sleep,
}

/// Radio modulation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModulationParams {
    /// Spreading factor (SF7-SF12)
    pub spreading_factor: u8,
    /// Bandwidth in Hz
    pub bandwidth: u32,
    /// Coding rate denominator (4/5 .. 4/8 as 5..8)
    pub coding_rate: u8,
}

impl ModulationParams {
    /// Duration of a single LoRa symbol, `2^SF / BW`
    pub fn symbol_time(&self) -> Duration {
        symbol_time(self.spreading_factor, self.bandwidth)
    }
}

/// Radio transmission parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxParams {
    /// Modulation parameters
    pub modulation: ModulationParams,
    /// Number of preamble symbols
    pub preamble_symbols: u16,
    /// Whether the payload CRC is appended
    pub crc_enabled: bool,
    /// Implicit header mode
    pub header_disabled: bool,
    /// Low data rate optimisation
    pub low_data_rate_optimize: bool,
}

impl TxParams {
    /// Uplink parameters for the given spreading factor and bandwidth
    pub fn uplink(spreading_factor: u8, bandwidth: u32) -> Self {
        let modulation = ModulationParams {
            spreading_factor,
            bandwidth,
            coding_rate: 5,
        };
        Self {
            modulation,
            preamble_symbols: 8,
            crc_enabled: true,
            header_disabled: false,
            low_data_rate_optimize: modulation.symbol_time() > LOW_DATA_RATE_SYMBOL_TIME,
        }
    }
}

/// Duration of a single LoRa symbol, `2^SF / BW`
pub fn symbol_time(spreading_factor: u8, bandwidth: u32) -> Duration {
    if bandwidth == 0 {
        return Duration::ZERO;
    }
    let chips = 1u64 << spreading_factor.min(12);
    Duration::from_nanos(chips * 1_000_000_000 / bandwidth as u64)
}

/// Narrow contract over the radio PHY used by the MAC
///
/// All calls are synchronous requests. Completion of a transmission and the
/// outcome of a reception are reported back to the MAC as events.
pub trait Radio {
    /// Error type for radio operations
    type Error;

    /// Start transmitting a frame
    fn transmit(
        &mut self,
        frame: &[u8],
        params: TxParams,
        frequency: u32,
        power: i8,
    ) -> Result<(), Self::Error>;

    /// Put the radio into standby (listening) mode
    fn switch_to_standby(&mut self) -> Result<(), Self::Error>;

    /// Put the radio into sleep mode
    fn switch_to_sleep(&mut self) -> Result<(), Self::Error>;

    /// Set the frequency the radio listens on, in Hz
    fn set_frequency(&mut self, frequency: u32) -> Result<(), Self::Error>;

    /// Set the spreading factor the radio listens for
    fn set_spreading_factor(&mut self, spreading_factor: u8) -> Result<(), Self::Error>;

    /// Current operating mode
    fn mode(&self) -> RadioMode;
}
