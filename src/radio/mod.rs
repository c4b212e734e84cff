//! Radio hardware abstraction layer

/// Radio driver contract and modulation parameters
pub mod traits;

pub use traits::{symbol_time, ModulationParams, Radio, RadioMode, TxParams};
