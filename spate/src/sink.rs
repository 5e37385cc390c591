//! Sinks - the consumption end of a dispatch target.
//!
//! Every sink has an externally observable effect for each consumed item
//! (an atomic counter or the [`Blackhole`] accumulator) so the optimizer
//! cannot prove the dispatched work unused and elide it. Terminal events
//! forward exactly one signal per sink to the iteration's
//! [`CompletionGate`].
//!
//! Demand modes are separate types on purpose: [`CountingSink`] and
//! [`FnSink`] request unbounded demand up front (throughput class), while
//! [`PacedSink`] keeps a bounded credit window open (backpressure class).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::gate::CompletionGate;
use crate::load::Event;

/// Demand ledger handed to a sink by a backpressure-aware target.
///
/// Credits are granted with [`request`] and consumed one per delivery with
/// [`try_take`]. `u64::MAX` credits means unlimited and is never counted
/// down.
///
/// [`request`]: Self::request
/// [`try_take`]: Self::try_take
pub struct Subscription {
    credits: AtomicU64,
    waker: Option<Box<dyn Fn() + Send + Sync>>,
}

impl Subscription {
    pub fn new() -> Self {
        Self {
            credits: AtomicU64::new(0),
            waker: None,
        }
    }

    /// A subscription that wakes the delivery thread when credits arrive.
    pub fn with_waker(waker: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            credits: AtomicU64::new(0),
            waker: Some(Box::new(waker)),
        }
    }

    /// Grant `n` more credits. Saturates at `u64::MAX`, which from then on
    /// means unlimited.
    pub fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let mut current = self.credits.load(Ordering::Relaxed);
        loop {
            if current == u64::MAX {
                break;
            }
            let next = current.saturating_add(n);
            match self.credits.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        if let Some(waker) = &self.waker {
            waker();
        }
    }

    /// Consume one credit. Returns false when the window is empty.
    pub fn try_take(&self) -> bool {
        let mut current = self.credits.load(Ordering::Acquire);
        loop {
            if current == u64::MAX {
                return true;
            }
            if current == 0 {
                return false;
            }
            match self.credits.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn credits(&self) -> u64 {
        self.credits.load(Ordering::Acquire)
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered consumer of a dispatch target's output.
pub trait Sink: Send + Sync {
    /// Called once by backpressure-aware targets before delivery starts.
    /// Non-backpressure targets never call this.
    fn on_subscribe(&self, _subscription: &Arc<Subscription>) {}

    /// Consume one item. Side effect only.
    fn on_item(&self, event: Event);

    /// Success-complete terminal event. Exactly once per sink.
    fn on_complete(&self);

    /// Error terminal event. Exactly once per sink, instead of
    /// `on_complete`.
    fn on_error(&self, reason: &str);
}

/// Dead-code-elimination blocker.
///
/// Folds every consumed value into an accumulator that outlives the
/// measurement, so consumption stays externally observable no matter how
/// aggressively the measured region is optimized.
#[derive(Debug, Default)]
pub struct Blackhole {
    acc: AtomicU64,
}

impl Blackhole {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn consume(&self, value: u64) {
        let observed = std::hint::black_box(value);
        self.acc
            .fetch_xor(observed.wrapping_mul(0x9E37_79B9_7F4A_7C15), Ordering::Relaxed);
    }

    pub fn drained(&self) -> u64 {
        self.acc.load(Ordering::Relaxed)
    }
}

/// Throughput-class sink: counts items, requests unbounded demand.
pub struct CountingSink {
    count: AtomicU64,
    gate: Arc<CompletionGate>,
}

impl CountingSink {
    pub fn new(gate: Arc<CompletionGate>) -> Self {
        Self {
            count: AtomicU64::new(0),
            gate,
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }
}

impl Sink for CountingSink {
    fn on_subscribe(&self, subscription: &Arc<Subscription>) {
        subscription.request(u64::MAX);
    }

    fn on_item(&self, _event: Event) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn on_complete(&self) {
        if let Err(err) = self.gate.signal_complete() {
            tracing::error!(%err, "counting sink: terminal signal rejected");
        }
    }

    fn on_error(&self, reason: &str) {
        if let Err(err) = self.gate.signal_error(reason) {
            tracing::error!(%err, "counting sink: terminal signal rejected");
        }
    }
}

/// Backpressure-class sink: opens a bounded credit window and refills one
/// credit per consumed item.
pub struct PacedSink {
    window: u64,
    count: AtomicU64,
    subscription: OnceLock<Arc<Subscription>>,
    gate: Arc<CompletionGate>,
}

impl PacedSink {
    pub fn new(window: u64, gate: Arc<CompletionGate>) -> Self {
        Self {
            window,
            count: AtomicU64::new(0),
            subscription: OnceLock::new(),
            gate,
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }
}

impl Sink for PacedSink {
    fn on_subscribe(&self, subscription: &Arc<Subscription>) {
        let _ = self.subscription.set(subscription.clone());
        subscription.request(self.window);
    }

    fn on_item(&self, _event: Event) {
        self.count.fetch_add(1, Ordering::AcqRel);
        if let Some(subscription) = self.subscription.get() {
            subscription.request(1);
        }
    }

    fn on_complete(&self) {
        if let Err(err) = self.gate.signal_complete() {
            tracing::error!(%err, "paced sink: terminal signal rejected");
        }
    }

    fn on_error(&self, reason: &str) {
        if let Err(err) = self.gate.signal_error(reason) {
            tracing::error!(%err, "paced sink: terminal signal rejected");
        }
    }
}

/// Closure sink with unbounded demand. The closure typically feeds a
/// [`Blackhole`].
pub struct FnSink<F: Fn(Event) + Send + Sync> {
    consume: F,
    gate: Arc<CompletionGate>,
}

impl<F: Fn(Event) + Send + Sync> FnSink<F> {
    pub fn new(consume: F, gate: Arc<CompletionGate>) -> Self {
        Self { consume, gate }
    }
}

impl<F: Fn(Event) + Send + Sync> Sink for FnSink<F> {
    fn on_subscribe(&self, subscription: &Arc<Subscription>) {
        subscription.request(u64::MAX);
    }

    fn on_item(&self, event: Event) {
        (self.consume)(event);
    }

    fn on_complete(&self) {
        if let Err(err) = self.gate.signal_complete() {
            tracing::error!(%err, "fn sink: terminal signal rejected");
        }
    }

    fn on_error(&self, reason: &str) {
        if let Err(err) = self.gate.signal_error(reason) {
            tracing::error!(%err, "fn sink: terminal signal rejected");
        }
    }
}
