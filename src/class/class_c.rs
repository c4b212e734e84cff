use core::time::Duration;

use rand_core::RngCore;

use super::retransmission::{RetransmissionController, Retry};
use super::timers::{Scheduler, TimerKind, WindowTimers};
use super::{DeviceClass, Downlink, MacEvent, MacListener, SendStatus};
use crate::config::device::{ConfigError, DeviceConfig, SessionState};
use crate::lorawan::{
    frame::{self, DataFrame, FrameHeader, MType},
    mac::{MacError, MacParams},
    phy,
    region::Region,
};
use crate::radio::{Radio, RadioMode};
use crate::{debug, error, info, warn};

/// Receive window state of a Class C device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WindowState {
    /// Nothing sent yet
    Idle,
    /// Frame handed to the radio
    Transmitting,
    /// Listening in the first receive window
    Window1Open,
    /// Listening in window 2 right after transmission, before window 1
    Window2OpenProactive,
    /// Window 1 closed while a reception was in progress
    Window1ClosedWaitingWindow2,
    /// Listening in window 2 after window 1
    Window2OpenReactive,
    /// Window 2 closed for this cycle
    Window2Closed,
}

/// Window close postponed because the radio was receiving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeferredClose {
    /// First receive window
    Window1,
    /// Second receive window
    Window2,
}

/// Class C device implementation
///
/// The device keeps window 2 open whenever it is not transmitting or
/// listening in window 1. After each uplink window 2 is opened immediately
/// and closed at `receive_delay1` when window 1 opens. Once window 1 closes,
/// window 2 is reopened and its close doubles as the ACK timeout for
/// confirmed uplinks.
pub struct ClassC<R, S, L, RNG, REG>
where
    R: Radio,
    S: Scheduler,
    L: MacListener,
    RNG: RngCore,
    REG: Region,
{
    radio: R,
    scheduler: S,
    listener: L,
    rng: RNG,
    region: REG,
    config: DeviceConfig,
    params: MacParams,
    session: SessionState,
    timers: WindowTimers,
    retransmission: RetransmissionController,
    state: WindowState,
    /// Set while the window 2 opened right after transmission is the live one
    rx2_before_rx1: bool,
    deferred: Option<DeferredClose>,
    rx1_frequency: u32,
}

impl<R, S, L, RNG, REG> ClassC<R, S, L, RNG, REG>
where
    R: Radio,
    S: Scheduler,
    L: MacListener,
    RNG: RngCore,
    REG: Region,
{
    /// Create new Class C device
    pub fn new(
        radio: R,
        scheduler: S,
        listener: L,
        rng: RNG,
        region: REG,
        config: DeviceConfig,
    ) -> Result<Self, ConfigError> {
        config.validate(&region)?;
        Ok(Self {
            radio,
            scheduler,
            listener,
            rng,
            params: MacParams::from_config(&config),
            session: SessionState::new(config.dev_addr),
            rx1_frequency: 0,
            region,
            config,
            timers: WindowTimers::new(),
            retransmission: RetransmissionController::new(),
            state: WindowState::Idle,
            rx2_before_rx1: false,
            deferred: None,
        })
    }

    /// Radio driver
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Mutable radio driver
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Host scheduler
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Mutable host scheduler
    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Application listener
    pub fn listener(&self) -> &L {
        &self.listener
    }

    /// Mutable application listener
    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    /// Region in use
    pub fn region(&self) -> &REG {
        &self.region
    }

    /// Static configuration
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Live MAC parameters
    pub fn params(&self) -> &MacParams {
        &self.params
    }

    /// Current receive window state
    pub fn state(&self) -> WindowState {
        self.state
    }

    /// Window close waiting for the end of a reception
    pub fn deferred_close(&self) -> Option<DeferredClose> {
        self.deferred
    }

    /// Window timers
    pub fn timers(&self) -> &WindowTimers {
        &self.timers
    }

    /// Retransmission state
    pub fn retransmission(&self) -> &RetransmissionController {
        &self.retransmission
    }

    /// Frequency of the last uplink, listened on in window 1
    pub fn rx1_frequency(&self) -> u32 {
        self.rx1_frequency
    }

    /// Update the battery level reported in DevStatusAns
    pub fn set_battery_level(&mut self, level: u8) {
        self.params.battery_level = level;
    }

    fn on_transmit_complete(&mut self) -> Result<(), MacError<R::Error>> {
        if self.state != WindowState::Transmitting {
            warn!("Transmission complete in state {:?}", self.state);
        }

        self.open_window2_proactive()?;

        let delay1 = self.config.receive_delay1;
        self.timers.schedule_close_window2(&mut self.scheduler, delay1);
        self.timers.arm(&mut self.scheduler, TimerKind::OpenRx1, delay1);
        Ok(())
    }

    fn open_window1(&mut self) -> Result<(), MacError<R::Error>> {
        if self.rx2_before_rx1 && self.timers.is_window2_pending() {
            debug!("Closing window 2 before opening window 1");
            self.timers.cancel(&mut self.scheduler, TimerKind::CloseRx2);
            self.rx2_before_rx1 = false;
        }

        if self.radio.mode() == RadioMode::Receive {
            debug!("Radio is receiving, window 1 not opened");
            return Ok(());
        }

        let data_rate = self.params.rx1_modulation(&self.region);
        self.radio.switch_to_standby().map_err(MacError::Radio)?;
        self.radio
            .set_frequency(self.rx1_frequency)
            .map_err(MacError::Radio)?;
        self.radio
            .set_spreading_factor(data_rate.spreading_factor)
            .map_err(MacError::Radio)?;

        let length = phy::window_duration(self.config.rx_window_symbols, data_rate);
        self.timers.schedule_close_window1(&mut self.scheduler, length);
        self.state = WindowState::Window1Open;
        debug!(
            "Window 1 open on {} Hz, SF{} for {} ms",
            self.rx1_frequency,
            data_rate.spreading_factor,
            length.as_millis() as u64
        );
        Ok(())
    }

    fn close_window1(&mut self) -> Result<(), MacError<R::Error>> {
        match self.radio.mode() {
            RadioMode::Transmit => {
                error!("Radio was transmitting when closing window 1");
                Err(MacError::TransmitDuringWindowClose)
            }
            RadioMode::Receive => {
                debug!("Radio is receiving, window 2 opens when the reception ends");
                self.deferred = Some(DeferredClose::Window1);
                self.state = WindowState::Window1ClosedWaitingWindow2;
                Ok(())
            }
            RadioMode::Sleep | RadioMode::Standby => self.open_window2_reactive(),
        }
    }

    fn tune_window2(&mut self) -> Result<(), MacError<R::Error>> {
        let data_rate = self.params.rx2_modulation(&self.region);
        self.radio.switch_to_standby().map_err(MacError::Radio)?;
        self.radio
            .set_frequency(self.params.rx2_frequency)
            .map_err(MacError::Radio)?;
        self.radio
            .set_spreading_factor(data_rate.spreading_factor)
            .map_err(MacError::Radio)?;
        Ok(())
    }

    fn open_window2_proactive(&mut self) -> Result<(), MacError<R::Error>> {
        if self.radio.mode() == RadioMode::Receive {
            debug!("Radio is receiving, window 2 not opened");
            return Ok(());
        }
        self.rx2_before_rx1 = true;
        self.tune_window2()?;
        self.state = WindowState::Window2OpenProactive;
        debug!(
            "Window 2 open before window 1 on {} Hz, DR{}",
            self.params.rx2_frequency, self.params.rx2_data_rate
        );
        Ok(())
    }

    fn open_window2_reactive(&mut self) -> Result<(), MacError<R::Error>> {
        if self.radio.mode() == RadioMode::Receive {
            debug!("Radio is receiving, window 2 not opened");
            return Ok(());
        }
        self.rx2_before_rx1 = false;
        self.tune_window2()?;
        self.state = WindowState::Window2OpenReactive;

        let close_after = if self.retransmission.is_waiting_ack() {
            Some(self.ack_timeout())
        } else if self.retransmission.is_outstanding() {
            let data_rate = self.params.rx2_modulation(&self.region);
            Some(phy::window_duration(self.config.rx_window_symbols, data_rate))
        } else {
            None
        };

        match close_after {
            Some(after) => {
                self.timers.schedule_close_window2(&mut self.scheduler, after);
                debug!(
                    "Window 2 open on {} Hz, DR{}, closing in {} ms",
                    self.params.rx2_frequency,
                    self.params.rx2_data_rate,
                    after.as_millis() as u64
                );
            }
            None => {
                self.timers.cancel(&mut self.scheduler, TimerKind::CloseRx2);
                debug!(
                    "Window 2 open on {} Hz, DR{}",
                    self.params.rx2_frequency, self.params.rx2_data_rate
                );
            }
        }
        Ok(())
    }

    fn close_window2(&mut self) -> Result<(), MacError<R::Error>> {
        match self.radio.mode() {
            RadioMode::Receive => {
                if self.deferred != Some(DeferredClose::Window2) {
                    debug!("Radio is receiving, window 2 closes when the reception ends");
                }
                self.deferred = Some(DeferredClose::Window2);
                return Ok(());
            }
            RadioMode::Standby => self.radio.switch_to_sleep().map_err(MacError::Radio)?,
            RadioMode::Transmit | RadioMode::Sleep => {}
        }
        self.finish_window2_close()
    }

    /// Judge the uplink once window 2 is closed
    fn finish_window2_close(&mut self) -> Result<(), MacError<R::Error>> {
        if self.rx2_before_rx1 {
            self.rx2_before_rx1 = false;
            if self.timers.is_window1_pending() {
                debug!("First window 2 closure after transmission");
                return Ok(());
            }
            // Window 1 was skipped by a reception, listen again right away
            return self.open_window2_reactive();
        }

        self.state = WindowState::Window2Closed;
        if self.retransmission.is_waiting_ack() {
            debug!("No ACK before window 2 closed");
            self.resend_or_fail()?;
        } else if let Some(outcome) = self.retransmission.declare_success() {
            info!(
                "Unconfirmed uplink done after {} transmission",
                outcome.transmissions
            );
            self.listener.on_tx_outcome(&outcome);
        }

        if self.state == WindowState::Window2Closed {
            // Nothing left to judge, keep listening
            self.open_window2_reactive()?;
        }
        Ok(())
    }

    /// Close window 2 before transmitting without judging the previous uplink
    fn close_window2_quietly(&mut self) -> Result<(), MacError<R::Error>> {
        self.timers.cancel(&mut self.scheduler, TimerKind::CloseRx2);
        if self.radio.mode() == RadioMode::Standby {
            self.radio.switch_to_sleep().map_err(MacError::Radio)?;
        }
        self.rx2_before_rx1 = false;
        self.deferred = None;
        Ok(())
    }

    /// Whether window 2 of the current cycle has already closed
    fn window2_expired(&self, deferred: Option<DeferredClose>) -> bool {
        self.state == WindowState::Window2Closed
            || (deferred == Some(DeferredClose::Window2) && !self.rx2_before_rx1)
    }

    fn on_packet_received(&mut self, bytes: &[u8]) -> Result<(), MacError<R::Error>> {
        let deferred = self.deferred.take();
        let window2_expired = self.window2_expired(deferred);
        if deferred == Some(DeferredClose::Window2) {
            // Deferred proactive close completes without judgement
            self.rx2_before_rx1 = false;
        }

        let for_us = match frame::decode(bytes) {
            Ok(data) if !data.mtype.is_uplink() => {
                let dev_addr = data.header.dev_addr;
                if dev_addr == self.session.dev_addr || dev_addr.is_broadcast() {
                    self.accept_downlink(&data);
                    true
                } else {
                    debug!("Downlink for another device");
                    false
                }
            }
            Ok(_) => {
                debug!("Uplink from another device");
                false
            }
            Err(_) => {
                debug!("Undecodable frame ignored");
                false
            }
        };

        if !for_us && window2_expired && self.retransmission.is_waiting_ack() {
            self.resend_or_fail()?;
        }

        if self.state != WindowState::Transmitting {
            self.open_window2_reactive()?;
        }
        Ok(())
    }

    fn accept_downlink(&mut self, data: &DataFrame<'_>) {
        if data.header.dev_addr.is_broadcast() {
            info!("Broadcast downlink, FCnt {}", data.header.f_cnt);
        } else {
            info!("Unicast downlink for us, FCnt {}", data.header.f_cnt);
        }

        self.timers.cancel_all(&mut self.scheduler);
        self.session.update_fcnt_down(data.header.f_cnt);

        if self.retransmission.is_waiting_ack() {
            if data.header.f_ctrl.ack {
                if let Some(outcome) = self.retransmission.declare_success() {
                    info!("ACK received after {} transmissions", outcome.transmissions);
                    self.listener.on_tx_outcome(&outcome);
                }
            } else {
                error!("Downlink without ACK while waiting for one");
            }
        }

        self.params.process_commands(&self.region, &data.header.f_opts);
        match data.f_port {
            Some(0) => self.params.process_commands(&self.region, data.payload),
            Some(port) => self.listener.on_downlink(&Downlink {
                port,
                payload: data.payload,
            }),
            None => {}
        }
    }

    fn on_reception_failed(&mut self) -> Result<(), MacError<R::Error>> {
        self.radio.switch_to_sleep().map_err(MacError::Radio)?;

        match self.deferred.take() {
            Some(DeferredClose::Window1) => self.open_window2_reactive(),
            Some(DeferredClose::Window2) => self.finish_window2_close(),
            None if self.state == WindowState::Window2Closed
                && self.retransmission.is_waiting_ack() =>
            {
                self.resend_or_fail()
            }
            None if self.state == WindowState::Window2OpenReactive => self.tune_window2(),
            None => Ok(()),
        }
    }

    fn resend_or_fail(&mut self) -> Result<(), MacError<R::Error>> {
        match self.retransmission.resend_or_fail()? {
            Retry::Resend { retransmission } => {
                let attempts_left = self.retransmission.attempts_left().saturating_sub(1);
                info!(
                    "Retransmission {}, {} left after it",
                    retransmission, attempts_left
                );

                let packet = {
                    let pending = self
                        .retransmission
                        .pending_packet()
                        .ok_or(MacError::NotWaitingAck)?;
                    let data = frame::decode(pending)?;
                    let mut header = data.header.clone();
                    header.f_cnt = self.session.fcnt_up as u16;
                    frame::encode(data.mtype, &header, data.f_port, data.payload)?
                };

                if let Err(error) = self.send_to_phy(&packet, Some(attempts_left)) {
                    return Err(self.resume_listening(error));
                }
                self.timers.cancel_all(&mut self.scheduler);
                self.session.increment_fcnt_up();
                self.retransmission.record_retransmission(packet)
            }
            Retry::GaveUp(outcome) => {
                self.listener.on_tx_outcome(&outcome);
                Ok(())
            }
        }
    }

    /// Reopen window 2 after a failed hand-off to the radio
    ///
    /// Any outstanding uplink keeps its state, so the reactive close judges
    /// it again later.
    fn resume_listening(&mut self, error: MacError<R::Error>) -> MacError<R::Error> {
        warn!("Transmission aborted, listening in window 2 again");
        if self.open_window2_reactive().is_err() {
            error!("Radio refused to reopen window 2");
        }
        error
    }

    /// Hand a frame to the radio
    ///
    /// `confirmed_attempts_left` is set for confirmed frames and counts the
    /// transmissions still allowed after this one. MAC parameters are left
    /// untouched when the radio refuses the frame.
    fn send_to_phy(
        &mut self,
        packet: &[u8],
        confirmed_attempts_left: Option<u8>,
    ) -> Result<(), MacError<R::Error>> {
        let (data_rate_before, power_before) = (self.params.data_rate, self.params.tx_power_dbm);
        if let Some(attempts_left) = confirmed_attempts_left {
            self.params.step_data_rate(
                &self.region,
                attempts_left,
                self.config.max_transmissions,
            );
        }

        let result = self.transmit(packet);
        if result.is_err() {
            self.params.data_rate = data_rate_before;
            self.params.tx_power_dbm = power_before;
        }
        result
    }

    fn transmit(&mut self, packet: &[u8]) -> Result<(), MacError<R::Error>> {
        let data_rate = self
            .region
            .data_rate(self.params.data_rate)
            .ok_or(MacError::UnknownDataRate(self.params.data_rate))?;

        let channels = self.region.enabled_channels().count();
        if channels == 0 {
            return Err(MacError::NoChannel);
        }
        let index = self.rng.next_u32() as usize % channels;
        let frequency = self
            .region
            .enabled_channels()
            .nth(index)
            .map(|channel| channel.frequency)
            .ok_or(MacError::NoChannel)?;

        self.radio
            .transmit(
                packet,
                phy::tx_params(data_rate),
                frequency,
                self.params.tx_power_dbm,
            )
            .map_err(MacError::Radio)?;

        self.rx1_frequency = frequency;
        self.state = WindowState::Transmitting;
        debug!(
            "Sending {} bytes on {} Hz at DR{}, {} dBm",
            packet.len(),
            frequency,
            self.params.data_rate,
            self.params.tx_power_dbm
        );
        Ok(())
    }

    /// ACK timeout drawn uniformly from the configured range
    fn ack_timeout(&mut self) -> Duration {
        let min = self.config.ack_timeout_min;
        let span = self
            .config
            .ack_timeout_max
            .saturating_sub(min)
            .as_millis() as u64;
        if span == 0 {
            return min;
        }
        min + Duration::from_millis(self.rng.next_u64() % (span + 1))
    }

    /// Time at which every pending window of the current cycle has closed
    fn pending_windows_end(&self) -> Option<Duration> {
        let symbols = self.config.rx_window_symbols;
        let rx1 = phy::window_duration(symbols, self.params.rx1_modulation(&self.region));
        let rx2 = phy::window_duration(symbols, self.params.rx2_modulation(&self.region));

        [
            self.timers.fire_time(TimerKind::OpenRx1).map(|t| t + rx1 + rx2),
            self.timers.fire_time(TimerKind::CloseRx1).map(|t| t + rx2),
            self.timers.fire_time(TimerKind::CloseRx2),
        ]
        .into_iter()
        .flatten()
        .max()
    }
}

impl<R, S, L, RNG, REG> DeviceClass for ClassC<R, S, L, RNG, REG>
where
    R: Radio,
    S: Scheduler,
    L: MacListener,
    RNG: RngCore,
    REG: Region,
{
    type Error = MacError<R::Error>;

    fn send(
        &mut self,
        port: u8,
        payload: &[u8],
        confirmed: bool,
    ) -> Result<SendStatus, Self::Error> {
        let delay = self.next_transmission_delay(Duration::ZERO);
        if delay > Duration::ZERO {
            warn!(
                "Receive windows still open, transmission postponed by {} ms",
                delay.as_millis() as u64
            );
            return Ok(SendStatus::Postponed(delay));
        }
        self.send_now(port, payload, confirmed)?;
        Ok(SendStatus::Sent)
    }

    fn send_now(&mut self, port: u8, payload: &[u8], confirmed: bool) -> Result<(), Self::Error> {
        let mtype = if confirmed {
            MType::ConfirmedDataUp
        } else {
            MType::UnconfirmedDataUp
        };
        let mut header = FrameHeader::new(self.session.dev_addr, self.session.fcnt_up as u16);
        header.f_ctrl.adr = self.params.adaptive_data_rate;
        header.f_opts = self.params.fopts();
        let packet = frame::encode(mtype, &header, Some(port), payload)?;

        self.timers.cancel_all(&mut self.scheduler);
        if let Err(error) = self.close_window2_quietly() {
            return Err(self.resume_listening(error));
        }

        let max_transmissions = self.config.max_transmissions.max(1);
        let attempts_left = confirmed.then(|| max_transmissions - 1);
        if let Err(error) = self.send_to_phy(&packet, attempts_left) {
            return Err(self.resume_listening(error));
        }

        if let Some(outcome) = self.retransmission.supersede() {
            self.listener.on_tx_outcome(&outcome);
        }
        self.params.clear_answers();
        self.session.increment_fcnt_up();
        self.listener.on_new_uplink(&packet);

        let now = self.scheduler.now();
        if confirmed {
            self.retransmission.arm(packet, max_transmissions, now);
        } else {
            self.retransmission.track_unconfirmed(packet, now);
        }
        Ok(())
    }

    fn handle_event(&mut self, event: MacEvent<'_>) -> Result<(), Self::Error> {
        match event {
            MacEvent::TransmitComplete => self.on_transmit_complete(),
            MacEvent::PacketReceived(bytes) => self.on_packet_received(bytes),
            MacEvent::ReceptionFailed => self.on_reception_failed(),
            MacEvent::TimerExpired(expiry) => {
                if !self.timers.on_expiry(expiry) {
                    return Ok(());
                }
                match expiry.kind {
                    TimerKind::OpenRx1 => self.open_window1(),
                    TimerKind::CloseRx1 => self.close_window1(),
                    TimerKind::CloseRx2 => self.close_window2(),
                }
            }
        }
    }

    fn next_transmission_delay(&mut self, waiting: Duration) -> Duration {
        let now = self.scheduler.now();

        if !self.retransmission.is_waiting_ack() {
            return match self.pending_windows_end() {
                Some(end) => waiting.max(end.saturating_sub(now)),
                None => waiting,
            };
        }

        let until_close = self
            .timers
            .fire_time(TimerKind::CloseRx2)
            .map_or(Duration::ZERO, |close| close.saturating_sub(now));
        let jitter = self.ack_timeout();
        debug!(
            "ACK pending: {} ms until window 2 closes, {} ms timeout",
            until_close.as_millis() as u64,
            jitter.as_millis() as u64
        );
        waiting.max(until_close + jitter)
    }

    fn session_state(&self) -> &SessionState {
        &self.session
    }
}
