//! ==============================================================================
//! link/state.rs - link lifecycle state machine
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     pure bookkeeping for the supervisor, no io:
//!
//!         Closed ──begin_open──> Opening ──opened──> Open
//!                                   │                 │ read error / remote close
//!                                   └──failed──┐      │
//!                                              ▼      ▼
//!         Closed <──timer_elapsed──────── CoolingDown
//!
//!     entering CoolingDown bumps the retry counter. past `max_attempts` the
//!     next attempt waits for the long cooldown instead of the retry interval,
//!     and the counter restarts from zero once that cooldown expires.
//!
//! invariants:
//!     - at most one retry timer is pending; scheduling again is a no-op
//!     - cancel is idempotent
//!     - events are only accepted from the current generation while Open
//! ```
//!
//! ==============================================================================

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Closed,
    Opening,
    Open,
    CoolingDown,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub retry_interval: Duration,
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(30),
            max_attempts: 10,
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryKind {
    Retry,
    Cooldown,
}

/// the single outstanding retry timer
#[derive(Debug, Default)]
pub struct RetryTimer {
    pending: Option<(Instant, RetryKind)>,
}

impl RetryTimer {
    /// returns false (and changes nothing) if a timer is already pending
    pub fn schedule(&mut self, at: Instant, kind: RetryKind) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some((at, kind));
        true
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|(at, _)| at)
    }

    pub fn kind(&self) -> Option<RetryKind> {
        self.pending.map(|(_, kind)| kind)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// consume the timer if its deadline has passed
    pub fn take_if_due(&mut self, now: Instant) -> Option<RetryKind> {
        match self.pending {
            Some((at, kind)) if now >= at => {
                self.pending = None;
                Some(kind)
            }
            _ => None,
        }
    }
}

/// observable snapshot, served on /api/status and published as link-status
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LinkStatus {
    pub state: LinkState,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub generation: u64,
    pub next_attempt: Option<RetryKind>,
    pub next_attempt_in_ms: Option<u64>,
}

impl LinkStatus {
    /// status for a host started without a usable device
    pub fn unconfigured(reason: &str) -> Self {
        Self {
            state: LinkState::Closed,
            retry_count: 0,
            last_error: Some(reason.to_string()),
            generation: 0,
            next_attempt: None,
            next_attempt_in_ms: None,
        }
    }
}

#[derive(Debug)]
pub struct LinkStateMachine {
    state: LinkState,
    retry_count: u32,
    last_error: Option<String>,
    timer: RetryTimer,
    generation: u64,
    policy: ReconnectPolicy,
}

impl LinkStateMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: LinkState::Closed,
            retry_count: 0,
            last_error: None,
            timer: RetryTimer::default(),
            generation: 0,
            policy,
        }
    }

    /// Closed -> Opening; returns the generation of the new link instance
    pub fn begin_open(&mut self) -> u64 {
        self.generation += 1;
        self.state = LinkState::Opening;
        self.generation
    }

    /// Opening -> Open
    pub fn opened(&mut self) {
        self.state = LinkState::Open;
        self.retry_count = 0;
        self.last_error = None;
        self.timer.cancel();
    }

    /// Opening/Open -> CoolingDown. returns the scheduled delay, or None if
    /// the transition was ignored or a timer was already pending.
    pub fn failed(&mut self, error: String, now: Instant) -> Option<(Duration, RetryKind)> {
        if !matches!(self.state, LinkState::Opening | LinkState::Open) {
            return None;
        }
        self.state = LinkState::CoolingDown;
        self.retry_count += 1;
        self.last_error = Some(error);

        let (delay, kind) = if self.retry_count > self.policy.max_attempts {
            (self.policy.cooldown, RetryKind::Cooldown)
        } else {
            (self.policy.retry_interval, RetryKind::Retry)
        };
        self.timer.schedule(now + delay, kind).then_some((delay, kind))
    }

    /// CoolingDown -> Closed when the timer is due; true means "attempt now"
    pub fn timer_elapsed(&mut self, now: Instant) -> bool {
        let Some(kind) = self.timer.take_if_due(now) else {
            return false;
        };
        if kind == RetryKind::Cooldown {
            self.retry_count = 0;
        }
        self.state = LinkState::Closed;
        true
    }

    /// any state -> Closed on shutdown, dropping any pending retry
    pub fn shutdown(&mut self) {
        self.timer.cancel();
        self.state = LinkState::Closed;
    }

    /// only the current, open link instance may drive the pipeline
    pub fn accepts(&self, generation: u64) -> bool {
        generation == self.generation && self.state == LinkState::Open
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn timer_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    pub fn status(&self, now: Instant) -> LinkStatus {
        LinkStatus {
            state: self.state,
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
            generation: self.generation,
            next_attempt: self.timer.kind(),
            next_attempt_in_ms: self
                .timer
                .deadline()
                .map(|at| at.saturating_duration_since(now).as_millis() as u64),
        }
    }
}
