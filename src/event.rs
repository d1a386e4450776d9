// SPDX-License-Identifier: AGPL-3.0-or-later

//! Event/result delivery (§4.I): per-request pending-event reordering by
//! L5 sequence number, promotion to a process-wide active queue on
//! maturity or sequence match, and polled/callback delivery.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use bitflags::bitflags;
use tokio::sync::{Notify, mpsc};

use crate::{datum::Datum, error::GdpError};

/// Sequence space size for L5 sequence numbers (§4.I).
pub const SEQNO_MODULUS: u32 = 1 << 15;

/// Circular comparison: `a > b` iff `(a - b) mod 2^15 < 2^14` (§4.I).
pub fn seq_gt(a: u16, b: u16) -> bool {
    let diff = (a as u32).wrapping_sub(b as u32) % SEQNO_MODULUS;
    diff != 0 && diff < SEQNO_MODULUS / 2
}

pub fn seq_next(seqno: u16) -> u16 {
    ((seqno as u32 + 1) % SEQNO_MODULUS) as u16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Data,
    Created,
    Done,
    Shutdown,
    Success,
    Failure,
    Missing,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MaturityClass: u8 {
        /// Short `data` timeout bounding out-of-order reordering.
        const DATA = 0b01;
        /// Longer `done` timeout bounding `AckEndOfResults`.
        const DONE = 0b10;
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventType,
    pub status: Option<GdpError>,
    pub datum: Option<Datum>,
    pub l5_seqno: Option<u16>,
    pub maturity: Instant,
}

impl Event {
    pub fn data(datum: Datum, l5_seqno: u16, maturity: Instant) -> Self {
        Event {
            kind: EventType::Data,
            status: None,
            datum: Some(datum),
            l5_seqno: Some(l5_seqno),
            maturity,
        }
    }

    pub fn done(status: Option<GdpError>, maturity: Instant) -> Self {
        Event {
            kind: EventType::Done,
            status,
            datum: None,
            l5_seqno: None,
            maturity,
        }
    }
}

/// Maturity windows (§4.I, §6 `swarm.gdp.event.timeout.{data,done}`).
#[derive(Debug, Clone, Copy)]
pub struct MaturityWindows {
    pub data: Duration,
    pub done: Duration,
}

impl Default for MaturityWindows {
    fn default() -> Self {
        MaturityWindows {
            data: Duration::from_millis(100),
            done: Duration::from_millis(250),
        }
    }
}

/// Per-request pending-event reorder buffer plus the `seq_next` cursor
/// (§4.I "pending → active transition").
pub struct PendingQueue {
    pending: Vec<Event>,
    seq_next: u16,
    active_tx: mpsc::UnboundedSender<Event>,
    notify: std::sync::Arc<Notify>,
}

impl PendingQueue {
    pub fn new(active_tx: mpsc::UnboundedSender<Event>, notify: std::sync::Arc<Notify>) -> Self {
        PendingQueue {
            pending: Vec::new(),
            seq_next: 0,
            active_tx,
            notify,
        }
    }

    /// Insert an event, sorted by L5 sequence number, then attempt
    /// immediate promotion of whatever is now ready.
    pub fn insert(&mut self, event: Event) {
        let pos = self
            .pending
            .iter()
            .position(|e| match (e.l5_seqno, event.l5_seqno) {
                (Some(a), Some(b)) => seq_gt(a, b),
                _ => false,
            })
            .unwrap_or(self.pending.len());
        self.pending.insert(pos, event);
        self.promote(Instant::now());
    }

    /// Promote every event whose L5 seqno matches `seq_next` or whose
    /// maturity deadline has elapsed, advancing `seq_next` as we go.
    /// Returns how many were promoted.
    pub fn promote(&mut self, now: Instant) -> usize {
        let mut promoted = 0;
        loop {
            let Some(event) = self.pending.first() else { break };
            let ready = match event.l5_seqno {
                Some(seqno) => seqno == self.seq_next || now >= event.maturity,
                None => now >= event.maturity,
            };
            if !ready {
                break;
            }
            let event = self.pending.remove(0);
            if let Some(seqno) = event.l5_seqno {
                self.seq_next = seq_next(seqno);
            }
            let _ = self.active_tx.send(event);
            self.notify.notify_waiters();
            promoted += 1;
        }
        promoted
    }

    /// Flush everything unconditionally (teardown or final
    /// `AckEndOfResults`, §4.I point (c)).
    pub fn flush(&mut self) {
        for event in self.pending.drain(..) {
            let _ = self.active_tx.send(event);
        }
        self.notify.notify_waiters();
    }

    pub fn earliest_maturity(&self) -> Option<Instant> {
        self.pending.iter().map(|e| e.maturity).min()
    }
}

/// Process-wide active queue serviced by `event_next` (polled mode) or a
/// callback drain loop (§4.I delivery modes).
pub struct ActiveQueue {
    queue: tokio::sync::Mutex<VecDeque<Event>>,
    notify: std::sync::Arc<Notify>,
}

impl Default for ActiveQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveQueue {
    pub fn new() -> Self {
        ActiveQueue {
            queue: tokio::sync::Mutex::new(VecDeque::new()),
            notify: std::sync::Arc::new(Notify::new()),
        }
    }

    pub fn notify_handle(&self) -> std::sync::Arc<Notify> {
        self.notify.clone()
    }

    pub async fn push(&self, event: Event) {
        self.queue.lock().await.push_back(event);
        self.notify.notify_waiters();
    }

    /// Polled delivery: block until an event is present or `timeout`
    /// elapses.
    pub async fn event_next(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.queue.lock().await.pop_front() {
                return Some(event);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }
}
