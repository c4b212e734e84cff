use heapless::Vec;

use super::commands::{DownlinkCommand, DownlinkCommands, UplinkCommand};
use super::frame::{FrameError, MAX_FOPTS_SIZE};
use super::region::{DataRate, DataRateIndex, Region};
use crate::config::device::DeviceConfig;
use crate::{debug, info, warn};

/// Power restored when the data rate is stepped down
pub const ADR_BACKOFF_TX_POWER_DBM: i8 = 14;

/// Highest RX1 data rate offset accepted by RxParamSetupReq
pub const MAX_RX1_DR_OFFSET: u8 = 5;

/// Answers waiting for the next uplink
const MAX_PENDING_ANSWERS: usize = 8;

/// MAC layer error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacError<E> {
    /// Radio error
    Radio(E),
    /// Frame could not be encoded or decoded
    Frame(FrameError),
    /// Region has no enabled uplink channel
    NoChannel,
    /// Data rate has no spreading factor / bandwidth mapping
    UnknownDataRate(DataRateIndex),
    /// Radio was transmitting when a receive window closed
    TransmitDuringWindowClose,
    /// Retransmission counter would go negative
    AttemptsUnderflow,
    /// Retransmission requested while no confirmed uplink is pending
    NotWaitingAck,
}

impl<E> MacError<E> {
    /// Whether the error indicates a scheduling defect rather than a
    /// recoverable condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MacError::TransmitDuringWindowClose | MacError::AttemptsUnderflow
        )
    }
}

impl<E> From<FrameError> for MacError<E> {
    fn from(error: FrameError) -> Self {
        MacError::Frame(error)
    }
}

/// Validation result of an RxParamSetupReq
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxParamSetupStatus {
    /// RX1 data rate offset within range
    pub offset_ok: bool,
    /// RX2 data rate maps to a spreading factor and bandwidth
    pub data_rate_ok: bool,
}

impl RxParamSetupStatus {
    /// Answer to send back to the network
    pub fn answer(&self) -> UplinkCommand {
        UplinkCommand::RxParamSetupAns {
            rx1_dr_offset_ack: self.offset_ok,
            rx2_data_rate_ack: self.data_rate_ok,
            channel_ack: true,
        }
    }
}

/// Live MAC parameters, updated by MAC commands and rate adaptation
#[derive(Debug, Clone)]
pub struct MacParams {
    /// Uplink data rate
    pub data_rate: DataRateIndex,
    /// Uplink power in dBm
    pub tx_power_dbm: i8,
    /// Offset between uplink data rate and RX1 data rate
    pub rx1_dr_offset: u8,
    /// RX2 frequency in Hz
    pub rx2_frequency: u32,
    /// RX2 data rate
    pub rx2_data_rate: DataRateIndex,
    /// Step the data rate down on repeated retransmissions
    pub adaptive_data_rate: bool,
    /// Battery level reported in DevStatusAns
    pub battery_level: u8,
    answers: Vec<UplinkCommand, MAX_PENDING_ANSWERS>,
}

impl MacParams {
    /// Initial parameters from the device configuration
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            data_rate: config.data_rate,
            tx_power_dbm: config.tx_power_dbm,
            rx1_dr_offset: config.rx1_dr_offset,
            rx2_frequency: config.rx2_frequency,
            rx2_data_rate: config.rx2_data_rate,
            adaptive_data_rate: config.adaptive_data_rate,
            battery_level: config.battery_level,
            answers: Vec::new(),
        }
    }

    /// Data rate of the first receive window
    pub fn rx1_data_rate<REG: Region>(&self, region: &REG) -> DataRateIndex {
        region.rx1_data_rate(self.data_rate, self.rx1_dr_offset)
    }

    /// Spreading factor and bandwidth for RX2, falling back to the region
    /// default when the configured data rate has no mapping
    pub fn rx2_modulation<REG: Region>(&self, region: &REG) -> DataRate {
        resolve_data_rate(region, self.rx2_data_rate)
    }

    /// Spreading factor and bandwidth for RX1
    pub fn rx1_modulation<REG: Region>(&self, region: &REG) -> DataRate {
        resolve_data_rate(region, self.rx1_data_rate(region))
    }

    /// Process every command found in an FOpts field or a port 0 payload
    pub fn process_commands<REG: Region>(&mut self, region: &REG, bytes: &[u8]) {
        for command in DownlinkCommands::new(bytes) {
            self.process_command(region, command);
        }
    }

    /// Process a single downlink command, queueing any answer
    pub fn process_command<REG: Region>(&mut self, region: &REG, command: DownlinkCommand) {
        match command {
            DownlinkCommand::RxParamSetupReq {
                rx1_dr_offset,
                rx2_data_rate,
                frequency,
            } => {
                self.on_rx_param_setup_req(region, rx1_dr_offset, rx2_data_rate, frequency);
            }
            DownlinkCommand::DevStatusReq => {
                self.queue_answer(UplinkCommand::DevStatusAns {
                    battery: self.battery_level,
                    margin: 0,
                });
            }
            DownlinkCommand::LinkCheckAns {
                margin,
                gateway_count,
            } => {
                info!("Link check: margin {} dB, {} gateways", margin, gateway_count);
            }
            DownlinkCommand::Unsupported { cid } => {
                debug!("Ignoring MAC command {}", cid);
            }
        }
    }

    /// Apply an RxParamSetupReq and queue its answer
    ///
    /// The requested values are written to the live parameters even when
    /// validation fails; the network learns about invalid values only from
    /// the answer flags. The frequency is not validated.
    pub fn on_rx_param_setup_req<REG: Region>(
        &mut self,
        region: &REG,
        rx1_dr_offset: u8,
        rx2_data_rate: DataRateIndex,
        frequency: u32,
    ) -> RxParamSetupStatus {
        let status = RxParamSetupStatus {
            offset_ok: rx1_dr_offset <= MAX_RX1_DR_OFFSET,
            data_rate_ok: region.data_rate(rx2_data_rate).is_some(),
        };
        if !status.offset_ok || !status.data_rate_ok {
            warn!(
                "RxParamSetupReq with invalid values applied: offset {} (ok {}), DR{} (ok {})",
                rx1_dr_offset, status.offset_ok, rx2_data_rate, status.data_rate_ok
            );
        }

        self.rx1_dr_offset = rx1_dr_offset;
        self.rx2_data_rate = rx2_data_rate;
        self.rx2_frequency = frequency;

        debug!("Adding RxParamSetupAns reply");
        self.queue_answer(status.answer());
        status
    }

    /// Back off the uplink data rate before sending a confirmed frame
    ///
    /// `attempts_left` counts the transmissions still allowed after this
    /// one. A step is taken when that count is even and below
    /// `max_transmissions`, while the data rate is above the region floor.
    /// Returns whether a step was taken.
    pub fn step_data_rate<REG: Region>(
        &mut self,
        region: &REG,
        attempts_left: u8,
        max_transmissions: u8,
    ) -> bool {
        if !self.adaptive_data_rate
            || attempts_left >= max_transmissions
            || attempts_left % 2 != 0
            || self.data_rate <= region.min_data_rate()
        {
            return false;
        }
        self.tx_power_dbm = ADR_BACKOFF_TX_POWER_DBM;
        self.data_rate -= 1;
        debug!(
            "{} attempts left: stepping down to DR{}",
            attempts_left, self.data_rate
        );
        true
    }

    /// Answers waiting for the next uplink
    pub fn pending_answers(&self) -> &[UplinkCommand] {
        &self.answers
    }

    /// Encode pending answers into an FOpts field, keeping them queued
    pub fn fopts(&self) -> Vec<u8, MAX_FOPTS_SIZE> {
        let mut fopts = Vec::new();
        for answer in &self.answers {
            if fopts.len() + answer.len() > MAX_FOPTS_SIZE {
                warn!("FOpts full, answer deferred");
                break;
            }
            // Length checked above
            let _ = answer.write_to(&mut fopts);
        }
        fopts
    }

    /// Encode pending answers into an FOpts field and clear the queue
    pub fn take_fopts(&mut self) -> Vec<u8, MAX_FOPTS_SIZE> {
        let fopts = self.fopts();
        self.clear_answers();
        fopts
    }

    /// Drop every queued answer
    pub fn clear_answers(&mut self) {
        self.answers.clear();
    }

    fn queue_answer(&mut self, answer: UplinkCommand) {
        if self.answers.push(answer).is_err() {
            warn!("MAC answer queue full, dropping answer");
        }
    }
}

fn resolve_data_rate<REG: Region>(region: &REG, index: DataRateIndex) -> DataRate {
    match region.data_rate(index) {
        Some(data_rate) => data_rate,
        None => {
            let (_, fallback) = region.rx2_window();
            warn!("DR{} has no mapping, listening at DR{}", index, fallback);
            region
                .data_rate(fallback)
                .unwrap_or(DataRate {
                    spreading_factor: 12,
                    bandwidth: 125_000,
                })
        }
    }
}
