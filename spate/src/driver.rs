//! Benchmark driver.
//!
//! Runs the phase-separated iteration protocol: build a fresh
//! target/sink/gate triple, push the configured load through the measured
//! region, then tear down behind a bounded completion wait. Warm-up goes
//! through the identical code path with its own fresh triple, so no
//! counter, buffer, or gate state ever leaks into a measured iteration.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::{Demand, FanOut, HarnessConfig, MeasureMode, TargetKind};
use crate::error::{Result, SpateError};
use crate::gate::CompletionGate;
use crate::load::LoadShape;
use crate::sink::{CountingSink, PacedSink, Sink};
use crate::target::{build_target, DispatchTarget};

/// Result record of one iteration.
#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    /// Submit calls the target accepted.
    pub ops_completed: u64,
    /// Measured region duration; what it covers depends on
    /// [`MeasureMode`].
    pub elapsed_nanos: u64,
    pub failed: bool,
    pub failure_reason: Option<String>,
    /// Items consumed per sink, in attachment order.
    pub sink_counts: Vec<u64>,
}

impl IterationReport {
    /// Throughput in accepted submissions per second.
    pub fn ops_per_sec(&self) -> f64 {
        if self.elapsed_nanos == 0 {
            return 0.0;
        }
        self.ops_completed as f64 * 1e9 / self.elapsed_nanos as f64
    }
}

enum IterationSinks {
    Unbounded(Vec<Arc<CountingSink>>),
    Paced(Vec<Arc<PacedSink>>),
}

impl IterationSinks {
    fn build(config: &HarnessConfig, gate: &Arc<CompletionGate>) -> Self {
        let count = config.sink_count();
        match config.demand {
            Demand::Unbounded => Self::Unbounded(
                (0..count)
                    .map(|_| Arc::new(CountingSink::new(gate.clone())))
                    .collect(),
            ),
            Demand::Bounded(window) => Self::Paced(
                (0..count)
                    .map(|_| Arc::new(PacedSink::new(window, gate.clone())))
                    .collect(),
            ),
        }
    }

    fn attach_all(&self, target: &mut dyn DispatchTarget) -> Result<()> {
        match self {
            Self::Unbounded(sinks) => {
                for sink in sinks {
                    let sink: Arc<dyn Sink> = sink.clone();
                    target.attach_sink(sink)?;
                }
            }
            Self::Paced(sinks) => {
                for sink in sinks {
                    let sink: Arc<dyn Sink> = sink.clone();
                    target.attach_sink(sink)?;
                }
            }
        }
        Ok(())
    }

    fn counts(&self) -> Vec<u64> {
        match self {
            Self::Unbounded(sinks) => sinks.iter().map(|s| s.count()).collect(),
            Self::Paced(sinks) => sinks.iter().map(|s| s.count()).collect(),
        }
    }
}

pub struct BenchDriver {
    config: HarnessConfig,
    shut: bool,
}

impl BenchDriver {
    pub fn configure(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, shut: false })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run warm-up iterations through the measured code path, discarding
    /// their reports. Only a harness fault aborts.
    pub fn warm_up(&mut self, iterations: usize) -> Result<()> {
        for _ in 0..iterations {
            let report = self.run_iteration()?;
            if report.failed {
                tracing::warn!(reason = ?report.failure_reason, "warm-up iteration failed");
            }
        }
        Ok(())
    }

    /// One full measurement iteration over the configured counting load.
    pub fn run_iteration(&mut self) -> Result<IterationReport> {
        let count = self.config.stream_size;
        self.run_iteration_with(LoadShape::Counting { count })
    }

    /// One full measurement iteration over an explicit load shape.
    ///
    /// Target-level failures (overflow, completion timeout, upstream
    /// errors) are reported in the returned record and the run may
    /// continue; a harness fault returns `Err` and must abort the run.
    pub fn run_iteration_with(&mut self, shape: LoadShape) -> Result<IterationReport> {
        if self.shut {
            return Err(SpateError::TargetUnavailable { state: "closed" });
        }

        // Setup phase, excluded from measurement.
        let gate = Arc::new(CompletionGate::new(self.config.sink_count()));
        let sinks = IterationSinks::build(&self.config, &gate);
        let mut target = build_target(&self.config)?;
        sinks.attach_all(target.as_mut())?;
        target.start()?;
        tracing::debug!(
            kind = ?self.config.kind,
            sinks = self.config.sink_count(),
            load = shape.len(),
            "iteration setup complete"
        );

        let mut failure: Option<String> = None;
        let mut ops = 0u64;

        // Measured region.
        let measured_start = Instant::now();
        for event in shape.events() {
            match target.submit(event) {
                Ok(()) => ops += 1,
                Err(err) if err.is_harness_fault() => return Err(err),
                Err(err) => {
                    failure = Some(err.to_string());
                    break;
                }
            }
        }
        let submit_elapsed = measured_start.elapsed();

        // Teardown: drain, wait, release. Counted into the measured
        // region only in Drain mode.
        if let Err(err) = target.signal_complete() {
            if err.is_harness_fault() {
                return Err(err);
            }
            failure.get_or_insert(err.to_string());
        }
        match gate.await_signaled(self.config.completion_timeout) {
            Ok(()) => {}
            Err(err) if err.is_harness_fault() => {
                let _ = target.close();
                return Err(err);
            }
            Err(err) => {
                tracing::warn!(
                    %err,
                    outstanding = gate.outstanding_signals(),
                    expected = gate.expected_signals(),
                    "completion wait failed"
                );
                failure.get_or_insert(err.to_string());
            }
        }
        let drain_elapsed = measured_start.elapsed();

        if let Some(reason) = gate.upstream_error() {
            failure.get_or_insert(reason);
        }
        target.close()?;

        let sink_counts = sinks.counts();
        self.note_starvation(&shape, &failure, &sink_counts);

        let elapsed = match self.config.measure {
            MeasureMode::Throughput => submit_elapsed,
            MeasureMode::Drain => drain_elapsed,
        };
        let report = IterationReport {
            ops_completed: ops,
            elapsed_nanos: elapsed.as_nanos() as u64,
            failed: failure.is_some(),
            failure_reason: failure,
            sink_counts,
        };
        if report.failed {
            tracing::warn!(reason = ?report.failure_reason, "iteration failed");
        } else {
            tracing::debug!(
                ops = report.ops_completed,
                elapsed_nanos = report.elapsed_nanos,
                "iteration complete"
            );
        }
        Ok(report)
    }

    /// Fairness is not required of competing consumers, but a sink that
    /// stayed at zero for an entire drained run is worth flagging.
    fn note_starvation(&self, shape: &LoadShape, failure: &Option<String>, counts: &[u64]) {
        let work_shared = matches!(
            (self.config.kind, self.config.fan_out),
            (TargetKind::Ring, FanOut::WorkShared)
        );
        if work_shared && failure.is_none() && shape.len() >= counts.len() as u64 {
            for (index, count) in counts.iter().enumerate() {
                if *count == 0 {
                    tracing::warn!(sink = index, "sink consumed nothing for the entire run");
                }
            }
        }
    }

    /// Release the driver. Idempotent; later iterations are rejected.
    pub fn shutdown(&mut self) {
        if !self.shut {
            self.shut = true;
            tracing::debug!("driver shut down");
        }
    }
}
