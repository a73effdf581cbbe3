//! Fixed-timestep scheduler for the authoritative simulation.
//!
//! Wall-clock time is accumulated and consumed in whole ticks, so the update
//! function always sees the same `dt` regardless of timer jitter. The ticker
//! is driven from outside (a tokio timer in the server) and tells the caller
//! how long to wait before the next callback.

use log::{error, warn};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Elapsed time beyond this is discarded after a stall.
const MAX_ELAPSED: Duration = Duration::from_millis(1000);
/// Updates allowed per callback before the backlog is dropped.
const MAX_UPDATES_PER_CALLBACK: u32 = 10;
const FALLBACK_TICK: Duration = Duration::from_millis(50);

pub struct Ticker {
    time_per_tick: Duration,
    accumulator: Duration,
    tick: u64,
    last_callback: Option<Instant>,
}

impl Ticker {
    /// A ticker running `tick_rate` updates per second. Rates that give a
    /// tick shorter than 1 ms, or are not finite, fall back to 20 Hz.
    pub fn new(tick_rate: f64) -> Self {
        let ms = 1000.0 / tick_rate;
        let time_per_tick = if ms.is_finite() && ms >= 1.0 {
            Duration::from_nanos((ms * 1_000_000.0).round() as u64)
        } else {
            warn!("Invalid tick rate {}, using 20 Hz", tick_rate);
            FALLBACK_TICK
        };
        Self {
            time_per_tick,
            accumulator: Duration::ZERO,
            tick: 0,
            last_callback: None,
        }
    }

    pub fn time_per_tick(&self) -> Duration {
        self.time_per_tick
    }

    pub fn time_per_tick_ms(&self) -> f64 {
        self.time_per_tick.as_secs_f64() * 1000.0
    }

    /// Number of completed ticks.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Adds `elapsed` wall time and runs as many fixed updates as it covers.
    /// `update` receives the new tick number and the fixed step in ms. A
    /// panicking update is logged and the remaining work for this callback is
    /// skipped; the ticker stays usable.
    pub fn advance<F>(&mut self, elapsed: Duration, mut update: F) -> u32
    where
        F: FnMut(u64, f64),
    {
        self.accumulator += elapsed.min(MAX_ELAPSED);
        let dt_ms = self.time_per_tick_ms();

        let mut updates = 0;
        while self.accumulator >= self.time_per_tick {
            self.tick += 1;
            self.accumulator -= self.time_per_tick;
            updates += 1;

            let tick = self.tick;
            let result = panic::catch_unwind(AssertUnwindSafe(|| update(tick, dt_ms)));
            if result.is_err() {
                error!("Update panicked at tick {}, continuing", tick);
                break;
            }

            if updates >= MAX_UPDATES_PER_CALLBACK {
                if !self.accumulator.is_zero() {
                    warn!("Tick backlog of {:?} dropped", self.accumulator);
                }
                self.accumulator = Duration::ZERO;
                break;
            }
        }
        updates
    }

    /// One scheduling callback at `now`. Returns how long to wait before the
    /// next one to hold the target rate.
    pub fn pump<F>(&mut self, now: Instant, update: F) -> Duration
    where
        F: FnMut(u64, f64),
    {
        let elapsed = self
            .last_callback
            .map_or(Duration::ZERO, |last| now.saturating_duration_since(last));
        self.last_callback = Some(now);

        self.advance(elapsed, update);
        self.time_per_tick.saturating_sub(now.elapsed())
    }
}
