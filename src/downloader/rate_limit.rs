//! Interval budget limiting
//!
//! Admits at most `cap` units of work per fixed interval. Intervals are counted
//! from the moment the limiter is built, not per request: a background ticker
//! zeroes the budget at every interval boundary and wakes every waiting caller.
//!
//! On top of the budget, admitted operations are spaced at least `spacing`
//! apart, so a fresh budget is never spent in a single burst.

use crate::downloader::config::BudgetConfig;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Units consumed in the current interval, paired with the hard cap
#[derive(Debug)]
struct BudgetWindow {
    cap: u32,
    used: u32,
    /// Bumped on every reset so a refund never lands in a later interval
    generation: u64,
}

impl BudgetWindow {
    fn new(cap: u32) -> Self {
        Self {
            cap,
            used: 0,
            generation: 0,
        }
    }

    /// Check-and-increment; only ever called with the window lock held
    ///
    /// Returns the interval generation the units were charged to.
    fn try_consume(&mut self, units: u32) -> Option<u64> {
        if self.cap - self.used >= units {
            self.used += units;
            Some(self.generation)
        } else {
            None
        }
    }

    /// Give back units whose operation never ran
    fn refund(&mut self, units: u32, generation: u64) {
        if self.generation == generation {
            self.used = self.used.saturating_sub(units);
        }
    }

    fn reset(&mut self) {
        self.used = 0;
        self.generation = self.generation.wrapping_add(1);
    }
}

fn lock_window(window: &Mutex<BudgetWindow>) -> MutexGuard<'_, BudgetWindow> {
    // The window holds plain integers; a panic elsewhere cannot leave it torn.
    window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Units charged to the window but not yet spent on an operation
///
/// Dropping an uncommitted reservation refunds it, so a caller cancelled
/// between admission and sending leaves the budget as it found it.
struct Reservation<'a> {
    window: &'a Mutex<BudgetWindow>,
    units: u32,
    generation: u64,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            lock_window(self.window).refund(self.units, self.generation);
            trace!(units = self.units, "Budget refunded");
        }
    }
}

/// Rolling-interval operation budget with a background reset ticker
///
/// Must be created from within a Tokio runtime. Call [`BudgetLimiter::close`]
/// to stop the ticker deterministically; dropping the limiter also stops it,
/// without waiting.
pub struct BudgetLimiter {
    window: Arc<Mutex<BudgetWindow>>,
    cap: u32,
    interval: Duration,
    spacing: Duration,
    ticks: Arc<watch::Sender<u64>>,
    last_send: AsyncMutex<Option<Instant>>,
    stop: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl BudgetLimiter {
    /// Create a limiter admitting `cap` units per `interval`, with successive
    /// admitted operations at least `spacing` apart
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime or if `interval` is zero.
    pub fn new(cap: u32, interval: Duration, spacing: Duration) -> Self {
        let window = Arc::new(Mutex::new(BudgetWindow::new(cap)));
        let (ticks, _) = watch::channel(0u64);
        let ticks = Arc::new(ticks);
        let stop = CancellationToken::new();

        let ticker = tokio::spawn(run_ticker(
            window.clone(),
            ticks.clone(),
            interval,
            stop.clone(),
        ));

        Self {
            window,
            cap,
            interval,
            spacing,
            ticks,
            last_send: AsyncMutex::new(None),
            stop,
            ticker: Mutex::new(Some(ticker)),
        }
    }

    /// Create a limiter from validated configuration
    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.cap, config.interval, config.spacing)
    }

    /// Units admitted per interval
    pub fn cap(&self) -> u32 {
        self.cap
    }

    /// Interval length
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Units consumed in the current interval
    pub fn used(&self) -> u32 {
        lock_window(&self.window).used
    }

    /// Units still admittable in the current interval
    pub fn available(&self) -> u32 {
        let window = lock_window(&self.window);
        window.cap - window.used
    }

    /// Run `op` once `units` of budget are available
    ///
    /// Waits for interval resets while the budget is exhausted; exhaustion is
    /// never reported as an error. The wait, the spacing delay and the
    /// operation itself are serialized against other callers only where
    /// noted: the budget check is a short critical section, the spacing delay
    /// and `op` run one caller at a time.
    ///
    /// # Errors
    /// - [`RateLimitError::ExceedsCapacity`] if `units` can never fit in one interval
    /// - [`RateLimitError::Cancelled`] if `cancel` fires before `op` starts; any
    ///   units already charged for this call are given back
    /// - [`RateLimitError::Closed`] if the limiter was closed
    pub async fn submit<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        units: u32,
        op: F,
    ) -> Result<T, RateLimitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if units > self.cap {
            return Err(RateLimitError::ExceedsCapacity {
                requested: units,
                cap: self.cap,
            });
        }

        let wait_started = Instant::now();
        let reservation = loop {
            if cancel.is_cancelled() {
                return Err(RateLimitError::Cancelled);
            }
            if self.stop.is_cancelled() {
                return Err(RateLimitError::Closed);
            }

            // Subscribe before checking so a reset landing in between is not missed.
            let mut ticks = self.ticks.subscribe();
            let charged = lock_window(&self.window).try_consume(units);
            if let Some(generation) = charged {
                break Reservation {
                    window: &self.window,
                    units,
                    generation,
                    committed: false,
                };
            }

            debug!(units, cap = self.cap, "Budget exhausted, waiting for next interval");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                _ = self.stop.cancelled() => return Err(RateLimitError::Closed),
                changed = ticks.changed() => {
                    if changed.is_err() {
                        return Err(RateLimitError::Closed);
                    }
                }
            }
        };

        let mut last_send = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
            guard = self.last_send.lock() => guard,
        };

        if let Some(last) = *last_send {
            let ready_at = last + self.spacing;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                _ = sleep_until(ready_at) => {}
            }
        }

        reservation.commit();
        crate::metrics::record_budget_admitted(units, wait_started.elapsed());
        trace!(units, "Budget admitted, sending");
        let output = op().await;
        *last_send = Some(Instant::now());

        Ok(output)
    }

    /// Stop the reset ticker and wait for it to exit
    ///
    /// After this returns no further interval resets happen; pending and future
    /// submissions fail with [`RateLimitError::Closed`].
    pub async fn close(&self) {
        self.stop.cancel();
        let handle = self
            .ticker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        debug!("Budget limiter closed");
    }
}

impl Drop for BudgetLimiter {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn run_ticker(
    window: Arc<Mutex<BudgetWindow>>,
    ticks: Arc<watch::Sender<u64>>,
    interval: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                lock_window(&window).reset();
                ticks.send_modify(|generation| *generation = generation.wrapping_add(1));
                trace!("Budget interval reset");
            }
        }
    }
}

/// Rate limiter errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Caller cancelled while waiting for budget
    #[error("cancelled while waiting for rate limit budget")]
    Cancelled,

    /// Limiter was closed
    #[error("rate limiter closed")]
    Closed,

    /// Request can never be admitted
    #[error("requested {requested} units but the interval cap is {cap}")]
    ExceedsCapacity {
        /// Units requested
        requested: u32,
        /// Interval cap
        cap: u32,
    },
}
