//! Harness configuration.
//!
//! One explicit record per measurement run; nothing survives across
//! iterations except what the caller threads through. Defaults mirror the
//! canonical dispatch benchmark setup: backlog 2048, yielding waits, one
//! broadcast subscriber, a pool sized to the machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_BACKLOG, DEFAULT_COMPLETION_TIMEOUT, MAX_BACKLOG};
use crate::error::{Result, SpateError};
use crate::wait::WaitKind;

/// Concrete dispatch engine under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    /// Ring-buffer processor; [`FanOut`] selects broadcast or work-shared
    /// delivery.
    Ring,
    /// Hot publisher with per-subscriber backpressure buffers.
    HotStream,
    /// Asynchronous hand-off through a worker pool into one sink.
    AsyncPool,
}

/// How items reach the registered sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FanOut {
    /// Every sink observes every item.
    Broadcast,
    /// Each item is delivered to exactly one of the competing sinks.
    WorkShared,
}

/// Demand mode of backpressure-aware subscribers.
///
/// Kept as an explicit axis: throughput runs use `Unbounded`, the
/// backpressure-behavior benchmark class uses `Bounded`. The two are never
/// mixed implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Demand {
    Unbounded,
    /// Credit window; one credit is refilled per consumed item.
    Bounded(u64),
}

/// What the measured region covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasureMode {
    /// Submit-call throughput; teardown excluded.
    Throughput,
    /// Full round trip: submits plus source-complete plus the completion
    /// wait. For sync-vs-async hand-off comparisons.
    Drain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Capacity of a dispatch lane (must be power of 2).
    pub backlog: usize,
    pub kind: TargetKind,
    pub fan_out: FanOut,
    pub wait: WaitKind,
    /// Worker threads for work-shared and pool targets.
    pub workers: usize,
    /// Subscribed sinks for broadcast targets.
    pub subscribers: usize,
    /// Bounded-load size driven per iteration.
    pub stream_size: u64,
    pub demand: Demand,
    pub measure: MeasureMode,
    pub completion_timeout: Duration,
    /// Pin dispatch workers round-robin over cores.
    pub pin_workers: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            kind: TargetKind::Ring,
            fan_out: FanOut::Broadcast,
            wait: WaitKind::Yielding,
            workers: num_cpus::get(),
            subscribers: 1,
            stream_size: 1_000,
            demand: Demand::Unbounded,
            measure: MeasureMode::Throughput,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
            pin_workers: false,
        }
    }
}

impl HarnessConfig {
    pub fn new(backlog: usize) -> Result<Self> {
        let config = Self {
            backlog,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backlog == 0 {
            return Err(SpateError::config("backlog must be greater than 0"));
        }
        if !self.backlog.is_power_of_two() {
            return Err(SpateError::config("backlog must be power of 2"));
        }
        if self.backlog > MAX_BACKLOG {
            return Err(SpateError::config("backlog exceeds maximum"));
        }
        if self.workers == 0 {
            return Err(SpateError::config("worker pool must have at least one thread"));
        }
        if self.subscribers == 0 {
            return Err(SpateError::config("at least one subscriber is required"));
        }
        if matches!(self.demand, Demand::Bounded(0)) {
            return Err(SpateError::config("bounded demand window must be at least 1"));
        }
        if self.completion_timeout.is_zero() {
            return Err(SpateError::config("completion timeout must be non-zero"));
        }
        Ok(())
    }

    /// How many sinks an iteration registers, and therefore how many
    /// terminal signals its completion gate expects.
    pub fn sink_count(&self) -> usize {
        match (self.kind, self.fan_out) {
            (TargetKind::Ring, FanOut::Broadcast) => self.subscribers,
            (TargetKind::Ring, FanOut::WorkShared) => self.workers,
            (TargetKind::HotStream, _) => self.subscribers,
            (TargetKind::AsyncPool, _) => 1,
        }
    }

    pub fn with_kind(mut self, kind: TargetKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_fan_out(mut self, fan_out: FanOut) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub fn with_wait(mut self, wait: WaitKind) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(SpateError::config("worker pool must have at least one thread"));
        }
        self.workers = workers;
        Ok(self)
    }

    pub fn with_subscribers(mut self, subscribers: usize) -> Result<Self> {
        if subscribers == 0 {
            return Err(SpateError::config("at least one subscriber is required"));
        }
        self.subscribers = subscribers;
        Ok(self)
    }

    pub fn with_stream_size(mut self, stream_size: u64) -> Self {
        self.stream_size = stream_size;
        self
    }

    pub fn with_demand(mut self, demand: Demand) -> Result<Self> {
        if matches!(demand, Demand::Bounded(0)) {
            return Err(SpateError::config("bounded demand window must be at least 1"));
        }
        self.demand = demand;
        Ok(self)
    }

    pub fn with_measure(mut self, measure: MeasureMode) -> Self {
        self.measure = measure;
        self
    }

    pub fn with_completion_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(SpateError::config("completion timeout must be non-zero"));
        }
        self.completion_timeout = timeout;
        Ok(self)
    }

    pub fn with_pin_workers(mut self, pin: bool) -> Self {
        self.pin_workers = pin;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = HarnessConfig::new(1024).unwrap();
        assert_eq!(config.backlog, 1024);
        assert_eq!(config.subscribers, 1);
    }

    #[test]
    fn test_config_invalid_backlog() {
        assert!(HarnessConfig::new(0).is_err());
        assert!(HarnessConfig::new(1023).is_err()); // Not power of 2
    }

    #[test]
    fn test_config_builder() {
        let config = HarnessConfig::new(256)
            .unwrap()
            .with_kind(TargetKind::Ring)
            .with_fan_out(FanOut::WorkShared)
            .with_workers(4)
            .unwrap()
            .with_wait(WaitKind::Blocking);
        assert_eq!(config.workers, 4);
        assert_eq!(config.sink_count(), 4);
        assert!(matches!(config.wait, WaitKind::Blocking));
    }

    #[test]
    fn test_config_invalid_workers() {
        assert!(HarnessConfig::new(256).unwrap().with_workers(0).is_err());
        assert!(HarnessConfig::new(256).unwrap().with_subscribers(0).is_err());
    }

    #[test]
    fn test_config_invalid_demand_window() {
        assert!(HarnessConfig::new(256).unwrap().with_demand(Demand::Bounded(0)).is_err());
        assert!(HarnessConfig::new(256).unwrap().with_demand(Demand::Bounded(1)).is_ok());
    }

    #[test]
    fn test_sink_count_per_kind() {
        let base = HarnessConfig::new(256).unwrap().with_workers(3).unwrap();
        let broadcast = base.clone().with_subscribers(2).unwrap();
        assert_eq!(broadcast.sink_count(), 2);
        let shared = base.clone().with_fan_out(FanOut::WorkShared);
        assert_eq!(shared.sink_count(), 3);
        let pool = base.with_kind(TargetKind::AsyncPool);
        assert_eq!(pool.sink_count(), 1);
    }
}
