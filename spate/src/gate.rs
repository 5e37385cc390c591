//! One-shot completion gate.
//!
//! A [`CompletionGate`] lets the teardown phase block until an asynchronous
//! dispatch chain has drained, independent of how many hops or threads the
//! chain uses. It is created per iteration with one expected terminal
//! signal per sink; each sink reports success-complete or error exactly
//! once. The countdown is a single atomic decrement-and-check so signals
//! racing in from multiple worker threads can neither be lost nor counted
//! twice.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, SpateError};

pub struct CompletionGate {
    expected: u64,
    /// Terminal signals still outstanding. Negative means a sink signaled
    /// twice, which latches `fault`.
    outstanding: AtomicI64,
    fault: AtomicBool,
    first_error: Mutex<Option<String>>,
    lock: Mutex<()>,
    signaled: Condvar,
}

impl CompletionGate {
    /// Arm a gate expecting `expected` terminal signals. A gate for zero
    /// sinks starts signaled.
    pub fn new(expected: usize) -> Self {
        Self {
            expected: expected as u64,
            outstanding: AtomicI64::new(expected as i64),
            fault: AtomicBool::new(false),
            first_error: Mutex::new(None),
            lock: Mutex::new(()),
            signaled: Condvar::new(),
        }
    }

    /// Deliver one success-complete terminal signal.
    pub fn signal_complete(&self) -> Result<()> {
        self.countdown()
    }

    /// Deliver one error terminal signal. The first reason is retained for
    /// the driver to inspect after the wait; the countdown still advances
    /// so the gate cannot deadlock on a faulted chain.
    pub fn signal_error(&self, reason: impl Into<String>) -> Result<()> {
        {
            let mut first = self.first_error.lock();
            if first.is_none() {
                *first = Some(reason.into());
            }
        }
        self.countdown()
    }

    fn countdown(&self) -> Result<()> {
        let prev = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        if prev <= 0 {
            // Second terminal signal on an already-signaled gate: harness
            // bug. Latch the fault and wake any waiter so the run aborts
            // instead of reporting a bogus measurement.
            self.fault.store(true, Ordering::Release);
            let _guard = self.lock.lock();
            self.signaled.notify_all();
            return Err(SpateError::DoubleSignal);
        }
        if prev == 1 {
            // Final signal. Taking the lock orders the transition before
            // any waiter unblocks.
            let _guard = self.lock.lock();
            self.signaled.notify_all();
        }
        Ok(())
    }

    /// Block the calling thread until every expected terminal signal has
    /// arrived, or `timeout` elapses.
    ///
    /// Blocks only the caller, never the dispatch target's own threads. A
    /// timeout is a fatal condition for the iteration under measurement: it
    /// means the target under test is stuck or deadlocked.
    pub fn await_signaled(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        loop {
            if self.fault.load(Ordering::Acquire) {
                return Err(SpateError::DoubleSignal);
            }
            if self.outstanding.load(Ordering::Acquire) <= 0 {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SpateError::CompletionTimeout {
                    waited: timeout,
                    outstanding: self.outstanding_signals(),
                    expected: self.expected,
                });
            }
            self.signaled.wait_for(&mut guard, deadline - now);
        }
    }

    pub fn is_signaled(&self) -> bool {
        !self.fault.load(Ordering::Acquire) && self.outstanding.load(Ordering::Acquire) <= 0
    }

    /// Terminal signals not yet delivered. Diagnostic for timed-out waits.
    pub fn outstanding_signals(&self) -> u64 {
        self.outstanding.load(Ordering::Acquire).max(0) as u64
    }

    pub fn expected_signals(&self) -> u64 {
        self.expected
    }

    /// First upstream error reported through [`signal_error`], if any.
    ///
    /// [`signal_error`]: Self::signal_error
    pub fn upstream_error(&self) -> Option<String> {
        self.first_error.lock().clone()
    }
}
