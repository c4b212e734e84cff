use core::time::Duration;

use super::region::DataRate;
use crate::radio::traits::{symbol_time, TxParams};

/// Length of `symbols` LoRa symbols at a data rate
pub fn window_duration(symbols: u16, data_rate: DataRate) -> Duration {
    symbol_time(data_rate.spreading_factor, data_rate.bandwidth) * symbols as u32
}

/// Uplink transmission parameters for a data rate
pub fn tx_params(data_rate: DataRate) -> TxParams {
    TxParams::uplink(data_rate.spreading_factor, data_rate.bandwidth)
}
