//! Confirmed uplink retransmission state
//!
//! The controller decides whether an outstanding uplink is resent, declared
//! successful or declared failed. It never touches the radio or the timers;
//! the device class performs the actual retransmission and forwards the
//! [`TxOutcome`] notifications to the application.

use core::time::Duration;

use crate::lorawan::frame::Frame;
use crate::lorawan::mac::MacError;
use crate::debug;

/// Final report for an uplink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    /// Transmissions used, including the first one
    pub transmissions: u8,
    /// Whether the uplink is considered delivered
    pub success: bool,
    /// Time of the first transmission
    pub first_attempt: Duration,
    /// Last frame handed to the radio
    pub packet: Frame,
}

/// Decision taken when an ACK did not arrive in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retry {
    /// Resend the pending frame; `retransmission` counts resends so far
    /// including this one
    Resend {
        /// Index of this retransmission, starting at 1
        retransmission: u8,
    },
    /// No attempts left
    GaveUp(TxOutcome),
}

#[derive(Debug, Clone)]
struct PendingUplink {
    packet: Frame,
    max_transmissions: u8,
    attempts_left: u8,
    waiting_ack: bool,
    first_attempt: Duration,
}

impl PendingUplink {
    fn transmissions(&self) -> u8 {
        self.max_transmissions - self.attempts_left
    }

    fn into_outcome(self, success: bool) -> TxOutcome {
        TxOutcome {
            transmissions: self.transmissions(),
            success,
            first_attempt: self.first_attempt,
            packet: self.packet,
        }
    }
}

/// Retransmission state of the single outstanding uplink
#[derive(Debug, Clone, Default)]
pub struct RetransmissionController {
    pending: Option<PendingUplink>,
}

impl RetransmissionController {
    /// Controller with nothing outstanding
    pub fn new() -> Self {
        Self { pending: None }
    }

    /// Start tracking a confirmed uplink that was just handed to the radio
    ///
    /// Any outstanding uplink must have been reported through
    /// [`supersede`](Self::supersede) first.
    pub fn arm(&mut self, packet: Frame, max_transmissions: u8, now: Duration) {
        let max_transmissions = max_transmissions.max(1);
        self.pending = Some(PendingUplink {
            packet,
            max_transmissions,
            attempts_left: max_transmissions - 1,
            waiting_ack: true,
            first_attempt: now,
        });
    }

    /// Track an unconfirmed uplink so its outcome can be reported once
    pub fn track_unconfirmed(&mut self, packet: Frame, now: Duration) {
        self.pending = Some(PendingUplink {
            packet,
            max_transmissions: 1,
            attempts_left: 0,
            waiting_ack: false,
            first_attempt: now,
        });
    }

    /// Close out the outstanding uplink because a new one replaces it
    ///
    /// A confirmed uplink still waiting for its ACK is reported as failed,
    /// an unconfirmed one as delivered.
    pub fn supersede(&mut self) -> Option<TxOutcome> {
        let pending = self.pending.take()?;
        let success = !pending.waiting_ack;
        if pending.waiting_ack {
            debug!(
                "New packet from the application: stopping retransmission procedure after {} of {} transmissions",
                pending.transmissions(),
                pending.max_transmissions
            );
        }
        Some(pending.into_outcome(success))
    }

    /// Decide what to do after an ACK timeout
    pub fn resend_or_fail<E>(&mut self) -> Result<Retry, MacError<E>> {
        let pending = match self.pending.as_ref() {
            Some(pending) if pending.waiting_ack => pending,
            _ => return Err(MacError::NotWaitingAck),
        };

        if pending.attempts_left > 0 {
            return Ok(Retry::Resend {
                retransmission: pending.transmissions(),
            });
        }

        let outcome = self
            .pending
            .take()
            .map(|pending| pending.into_outcome(false))
            .ok_or(MacError::NotWaitingAck)?;
        debug!(
            "Failure: no more retransmissions left. Used {} transmissions",
            outcome.transmissions
        );
        Ok(Retry::GaveUp(outcome))
    }

    /// Record that the pending frame was resent as `packet`
    pub fn record_retransmission<E>(&mut self, packet: Frame) -> Result<(), MacError<E>> {
        let pending = self
            .pending
            .as_mut()
            .filter(|pending| pending.waiting_ack)
            .ok_or(MacError::NotWaitingAck)?;
        pending.attempts_left = pending
            .attempts_left
            .checked_sub(1)
            .ok_or(MacError::AttemptsUnderflow)?;
        pending.packet = packet;
        Ok(())
    }

    /// Report the outstanding uplink as delivered
    pub fn declare_success(&mut self) -> Option<TxOutcome> {
        self.pending.take().map(|pending| pending.into_outcome(true))
    }

    /// Whether a confirmed uplink is waiting for its ACK
    pub fn is_waiting_ack(&self) -> bool {
        self.pending.as_ref().map_or(false, |p| p.waiting_ack)
    }

    /// Whether any uplink outcome is still to be reported
    pub fn is_outstanding(&self) -> bool {
        self.pending.is_some()
    }

    /// Retransmissions still allowed
    pub fn attempts_left(&self) -> u8 {
        self.pending.as_ref().map_or(0, |p| p.attempts_left)
    }

    /// Transmissions used so far by the outstanding uplink
    pub fn transmissions(&self) -> u8 {
        self.pending.as_ref().map_or(0, |p| p.transmissions())
    }

    /// Last frame handed to the radio for the outstanding uplink
    pub fn pending_packet(&self) -> Option<&[u8]> {
        self.pending.as_ref().map(|p| p.packet.as_slice())
    }

    /// Time of the first transmission of the outstanding uplink
    pub fn first_attempt(&self) -> Option<Duration> {
        self.pending.as_ref().map(|p| p.first_attempt)
    }
}
