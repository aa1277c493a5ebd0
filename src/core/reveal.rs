//! Progressive exposure of large result sets.
//!
//! A fresh result set is revealed in an initial burst sized to the viewport,
//! then grows in batches as the user scrolls. Deferred batches are plain
//! values with a deadline; the event loop drives them through
//! [`RevealScheduler::tick`]. Every batch carries the generation it was
//! scheduled in, and a batch whose generation is stale is ignored no matter
//! how it reaches the scheduler.

use crate::constants::{
    DEFAULT_INITIAL_BURST_BUFFER_RATIO, DEFAULT_SCROLL_FORCE_THRESHOLD,
    DEFAULT_SCROLL_LOAD_THRESHOLD, DEFAULT_STREAMING_BATCH_SIZE, INITIAL_BURST_FIRST_FRACTION,
    INITIAL_BURST_INTERVAL_MS, INITIAL_BURST_STEP, STREAMING_DEBOUNCE_MS,
};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RevealConfig {
    pub initial_burst_buffer_ratio: f64,
    pub initial_first_fraction: f64,
    pub initial_step: usize,
    pub initial_interval: Duration,
    pub streaming_batch_size: usize,
    pub streaming_debounce: Duration,
    pub scroll_load_threshold: f64,
    pub scroll_force_threshold: f64,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            initial_burst_buffer_ratio: DEFAULT_INITIAL_BURST_BUFFER_RATIO,
            initial_first_fraction: INITIAL_BURST_FIRST_FRACTION,
            initial_step: INITIAL_BURST_STEP,
            initial_interval: Duration::from_millis(INITIAL_BURST_INTERVAL_MS),
            streaming_batch_size: DEFAULT_STREAMING_BATCH_SIZE,
            streaming_debounce: Duration::from_millis(STREAMING_DEBOUNCE_MS),
            scroll_load_threshold: DEFAULT_SCROLL_LOAD_THRESHOLD,
            scroll_force_threshold: DEFAULT_SCROLL_FORCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealPhase {
    Idle,
    InitialBurst,
    Streaming,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RevealState {
    pub revealed_count: usize,
    pub total_count: usize,
    pub is_revealing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Burst,
    Stream,
}

/// A deferred batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    pub generation: u64,
    pub due: Instant,
    pub kind: BatchKind,
}

/// Viewport geometry used to size the initial burst.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurstGeometry {
    pub viewport_height: f64,
    pub average_item_height: f64,
}

impl BurstGeometry {
    fn items_per_viewport(&self) -> f64 {
        if self.average_item_height > 0.0 && self.viewport_height.is_finite() {
            (self.viewport_height.max(0.0) / self.average_item_height)
                .ceil()
                .max(1.0)
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct RevealScheduler {
    config: RevealConfig,
    phase: RevealPhase,
    generation: u64,
    identity: Option<u64>,
    revealed: usize,
    total: usize,
    burst_goal: usize,
    pending: Option<Timer>,
}

impl RevealScheduler {
    pub fn new(config: RevealConfig) -> Self {
        Self {
            config,
            phase: RevealPhase::Idle,
            generation: 0,
            identity: None,
            revealed: 0,
            total: 0,
            burst_goal: 0,
            pending: None,
        }
    }

    pub fn phase(&self) -> RevealPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn revealed(&self) -> usize {
        self.revealed
    }

    pub fn state(&self) -> RevealState {
        RevealState {
            revealed_count: self.revealed,
            total_count: self.total,
            is_revealing: self.phase == RevealPhase::InitialBurst || self.pending.is_some(),
        }
    }

    pub fn pending(&self) -> Option<Timer> {
        self.pending
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.map(|t| t.due)
    }

    /// Brings the scheduler in line with the current result set.
    ///
    /// A new `identity` starts a new epoch from zero. With the same identity
    /// a grown total keeps what is revealed, and a shrunk total clamps it.
    /// Returns true when a new epoch started.
    pub fn sync(&mut self, identity: u64, total: usize, geometry: BurstGeometry, now: Instant) -> bool {
        if self.identity != Some(identity) {
            self.reset(identity, total, geometry, now);
            return true;
        }
        if total != self.total {
            self.resize(total, now);
        }
        false
    }

    /// Starts a new epoch: bumps the generation, drops any pending batch and
    /// begins the initial burst.
    pub fn reset(&mut self, identity: u64, total: usize, geometry: BurstGeometry, now: Instant) {
        self.generation += 1;
        self.pending = None;
        self.identity = Some(identity);
        self.total = total;
        self.revealed = 0;
        self.burst_goal =
            (geometry.items_per_viewport() * (1.0 + self.config.initial_burst_buffer_ratio.max(0.0)))
                .ceil() as usize;
        debug!(
            generation = self.generation,
            total,
            burst_goal = self.burst_goal,
            "reveal epoch started"
        );

        if total == 0 {
            self.phase = RevealPhase::Complete;
            return;
        }
        self.phase = RevealPhase::InitialBurst;
        let target = self.burst_target();
        let first = ((target as f64 * self.config.initial_first_fraction).ceil() as usize).max(1);
        self.reveal(first);
        self.continue_burst(now);
    }

    /// Teardown: nothing scheduled survives, nothing fires afterwards.
    pub fn cancel(&mut self) {
        self.generation += 1;
        self.pending = None;
        self.identity = None;
        self.phase = RevealPhase::Idle;
        self.revealed = 0;
        self.total = 0;
    }

    /// Feeds a scroll position. Only acts while streaming.
    ///
    /// `content_height` is the height of what is revealed so far. Crossing the
    /// load threshold schedules a debounced batch (repeated scroll events
    /// coalesce into it); crossing the force threshold reveals at once.
    pub fn on_scroll(&mut self, scroll_offset: f64, viewport_height: f64, content_height: f64, now: Instant) {
        if self.phase != RevealPhase::Streaming {
            return;
        }
        let ratio = if content_height > 0.0 {
            (scroll_offset.max(0.0) + viewport_height.max(0.0)) / content_height
        } else {
            1.0
        };
        if ratio >= self.config.scroll_force_threshold {
            self.pending = None;
            self.reveal(self.config.streaming_batch_size);
        } else if ratio >= self.config.scroll_load_threshold && self.pending.is_none() {
            self.schedule(BatchKind::Stream, now + self.config.streaming_debounce);
        }
    }

    /// Reveals one streaming batch right away.
    pub fn load_more(&mut self, now: Instant) {
        match self.phase {
            RevealPhase::Streaming => {
                self.pending = None;
                self.reveal(self.config.streaming_batch_size);
            }
            RevealPhase::InitialBurst => {
                self.pending = None;
                self.reveal(self.config.streaming_batch_size);
                self.continue_burst(now);
            }
            RevealPhase::Idle | RevealPhase::Complete => {}
        }
    }

    /// Runs a timer if it is current and due. Returns true if anything was
    /// revealed.
    pub fn fire(&mut self, timer: Timer, now: Instant) -> bool {
        if timer.generation != self.generation {
            trace!(
                stale = timer.generation,
                current = self.generation,
                "ignoring batch from an earlier epoch"
            );
            return false;
        }
        if self.pending != Some(timer) || now < timer.due {
            return false;
        }
        self.pending = None;
        let before = self.revealed;
        match timer.kind {
            BatchKind::Burst => {
                let remaining = self.burst_target().saturating_sub(self.revealed);
                self.reveal(self.config.initial_step.min(remaining).max(1));
                self.continue_burst(now);
            }
            BatchKind::Stream => self.reveal(self.config.streaming_batch_size),
        }
        self.revealed != before
    }

    /// Fires the pending batch if its deadline has passed.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(timer) if timer.due <= now => self.fire(timer, now),
            _ => false,
        }
    }

    fn resize(&mut self, total: usize, now: Instant) {
        self.total = total;
        if self.revealed >= total {
            self.revealed = total;
            self.pending = None;
            self.phase = RevealPhase::Complete;
            return;
        }
        if self.revealed < self.burst_target() {
            if self.phase != RevealPhase::InitialBurst {
                self.phase = RevealPhase::InitialBurst;
                self.pending = None;
            }
            if self.pending.is_none() {
                self.schedule(BatchKind::Burst, now + self.config.initial_interval);
            }
        } else if self.phase == RevealPhase::Complete {
            self.phase = RevealPhase::Streaming;
        }
    }

    fn burst_target(&self) -> usize {
        self.burst_goal.min(self.total)
    }

    fn continue_burst(&mut self, now: Instant) {
        if self.phase != RevealPhase::InitialBurst {
            return;
        }
        if self.revealed >= self.burst_target() {
            self.phase = RevealPhase::Streaming;
            trace!(revealed = self.revealed, "initial burst finished");
        } else {
            self.schedule(BatchKind::Burst, now + self.config.initial_interval);
        }
    }

    fn schedule(&mut self, kind: BatchKind, due: Instant) {
        self.pending = Some(Timer {
            generation: self.generation,
            due,
            kind,
        });
    }

    fn reveal(&mut self, count: usize) {
        self.revealed = self.revealed.saturating_add(count).min(self.total);
        if self.revealed == self.total {
            self.phase = RevealPhase::Complete;
            self.pending = None;
        }
    }
}
