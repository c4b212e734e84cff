//! Receive window timers
//!
//! The MAC never blocks: every wait is a callback armed on an external
//! [`Scheduler`]. Each timer kind owns a single slot, so arming a kind
//! always replaces the previous timer of that kind, and an expiry whose
//! handle no longer matches its slot is recognised as stale.

use core::time::Duration;

use crate::trace;

/// Opaque handle returned by the scheduler for an armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerHandle(pub u32);

/// Timer categories used by the receive window state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerKind {
    /// Open the first receive window
    OpenRx1,
    /// Close the first receive window
    CloseRx1,
    /// Close the second receive window
    CloseRx2,
}

/// Expiry of a timer, delivered back to the MAC by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerExpiry {
    /// Kind the timer was armed with
    pub kind: TimerKind,
    /// Handle returned when the timer was armed
    pub handle: TimerHandle,
}

/// Timer and clock service provided by the host runtime
///
/// Expiries must be delivered in fire-time order; timers due at the same
/// instant are delivered in the order they were armed.
pub trait Scheduler {
    /// Current time since the scheduler's epoch
    fn now(&self) -> Duration;

    /// Arm a timer that expires `after` from now
    fn schedule(&mut self, after: Duration, kind: TimerKind) -> TimerHandle;

    /// Cancel an armed timer. Cancelling an expired timer is a no-op.
    fn cancel(&mut self, handle: TimerHandle);
}

/// State of a single timer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSlot {
    /// Never armed
    Unarmed,
    /// Armed and waiting to fire
    Armed {
        /// Scheduler handle
        handle: TimerHandle,
        /// Absolute fire time
        fire_at: Duration,
    },
    /// Expired and delivered
    Fired,
    /// Cancelled before firing
    Cancelled,
}

impl TimerSlot {
    /// Whether the slot holds a timer that has not fired yet
    pub fn is_armed(&self) -> bool {
        matches!(self, TimerSlot::Armed { .. })
    }
}

/// The three window timers of a device
#[derive(Debug, Clone)]
pub struct WindowTimers {
    open_rx1: TimerSlot,
    close_rx1: TimerSlot,
    close_rx2: TimerSlot,
}

impl Default for WindowTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowTimers {
    /// All slots unarmed
    pub fn new() -> Self {
        Self {
            open_rx1: TimerSlot::Unarmed,
            close_rx1: TimerSlot::Unarmed,
            close_rx2: TimerSlot::Unarmed,
        }
    }

    /// Arm a timer, cancelling any previous timer of the same kind
    pub fn arm<S: Scheduler>(&mut self, scheduler: &mut S, kind: TimerKind, after: Duration) {
        self.cancel(scheduler, kind);
        let fire_at = scheduler.now() + after;
        let handle = scheduler.schedule(after, kind);
        *self.slot_mut(kind) = TimerSlot::Armed { handle, fire_at };
    }

    /// Arm the close of the first receive window
    pub fn schedule_close_window1<S: Scheduler>(&mut self, scheduler: &mut S, after: Duration) {
        self.arm(scheduler, TimerKind::CloseRx1, after);
    }

    /// Arm the close of the second receive window
    pub fn schedule_close_window2<S: Scheduler>(&mut self, scheduler: &mut S, after: Duration) {
        self.arm(scheduler, TimerKind::CloseRx2, after);
    }

    /// Cancel the timer of one kind if it is armed
    pub fn cancel<S: Scheduler>(&mut self, scheduler: &mut S, kind: TimerKind) {
        let slot = self.slot_mut(kind);
        if let TimerSlot::Armed { handle, .. } = *slot {
            scheduler.cancel(handle);
            *slot = TimerSlot::Cancelled;
        }
    }

    /// Cancel every armed timer
    pub fn cancel_all<S: Scheduler>(&mut self, scheduler: &mut S) {
        for kind in [TimerKind::OpenRx1, TimerKind::CloseRx1, TimerKind::CloseRx2] {
            self.cancel(scheduler, kind);
        }
    }

    /// Record an expiry. Returns `false` for a stale expiry whose timer was
    /// cancelled or replaced.
    pub fn on_expiry(&mut self, expiry: TimerExpiry) -> bool {
        let slot = self.slot_mut(expiry.kind);
        match *slot {
            TimerSlot::Armed { handle, .. } if handle == expiry.handle => {
                *slot = TimerSlot::Fired;
                true
            }
            _ => {
                trace!("Stale {:?} expiry ignored", expiry.kind);
                false
            }
        }
    }

    /// Current state of a slot
    pub fn slot(&self, kind: TimerKind) -> TimerSlot {
        match kind {
            TimerKind::OpenRx1 => self.open_rx1,
            TimerKind::CloseRx1 => self.close_rx1,
            TimerKind::CloseRx2 => self.close_rx2,
        }
    }

    /// Absolute fire time of an armed timer
    pub fn fire_time(&self, kind: TimerKind) -> Option<Duration> {
        match self.slot(kind) {
            TimerSlot::Armed { fire_at, .. } => Some(fire_at),
            _ => None,
        }
    }

    /// Whether a timer of this kind is armed
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slot(kind).is_armed()
    }

    /// Whether the first receive window is still to open or to close
    pub fn is_window1_pending(&self) -> bool {
        self.open_rx1.is_armed() || self.close_rx1.is_armed()
    }

    /// Whether the second receive window is still to close
    pub fn is_window2_pending(&self) -> bool {
        self.close_rx2.is_armed()
    }

    /// Whether any window timer is armed
    pub fn any_pending(&self) -> bool {
        self.is_window1_pending() || self.is_window2_pending()
    }

    fn slot_mut(&mut self, kind: TimerKind) -> &mut TimerSlot {
        match kind {
            TimerKind::OpenRx1 => &mut self.open_rx1,
            TimerKind::CloseRx1 => &mut self.close_rx1,
            TimerKind::CloseRx2 => &mut self.close_rx2,
        }
    }
}
