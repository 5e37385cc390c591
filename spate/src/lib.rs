//! Throughput measurement harness for concurrent dispatch processors.
//!
//! Spate drives pluggable dispatch engines with deterministic synthetic
//! load and produces comparable throughput numbers across differently
//! shaped targets. It implements no dispatcher of its own - the adapters
//! wrap library channels - but it owns the hard harness problems:
//! detecting asynchronous completion of a variable-depth chain without
//! races, isolating warm-up from measurement, and keeping the consumed
//! work observable so the optimizer cannot elide it.
//!
//! ## Dispatch targets
//!
//! | Target | Fan-out | Analog |
//! |--------|---------|--------|
//! | `BroadcastRing` | every sink sees every item | broadcast ring processor |
//! | `WorkQueue` | each item to exactly one sink | work-distributing processor |
//! | `AsyncPool` | pool hand-off into one sink | async scheduler hop |
//! | `HotStream` | demand-paced subscribers | hot publisher + backpressure buffer |
//!
//! ## Iteration protocol
//!
//! Per iteration the [`BenchDriver`] builds a fresh target, a fresh
//! [`CompletionGate`] sized to the sink count, and fresh sinks; times the
//! submit loop (or the full drain, in [`MeasureMode::Drain`]); then
//! signals source-complete and waits on the gate behind a bounded timeout
//! before closing the target. A timed-out drain fails that iteration. A
//! double terminal signal means the harness itself is broken and aborts
//! the run.
//!
//! ```no_run
//! use spate::{BenchDriver, FanOut, HarnessConfig, WaitKind};
//!
//! # fn main() -> spate::Result<()> {
//! let config = HarnessConfig::new(2048)?
//!     .with_fan_out(FanOut::WorkShared)
//!     .with_workers(4)?
//!     .with_wait(WaitKind::Yielding)
//!     .with_stream_size(1_000_000);
//! let mut driver = BenchDriver::configure(config)?;
//! driver.warm_up(3)?;
//! let report = driver.run_iteration()?;
//! println!("{:.0} ops/sec", report.ops_per_sec());
//! driver.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod cpu;
pub mod driver;
pub mod error;
pub mod gate;
pub mod load;
pub mod sink;
pub mod target;
pub mod wait;

pub use config::{Demand, FanOut, HarnessConfig, MeasureMode, TargetKind};
pub use driver::{BenchDriver, IterationReport};
pub use error::{Result, SpateError};
pub use gate::CompletionGate;
pub use load::{Event, LoadIter, LoadShape};
pub use sink::{Blackhole, CountingSink, FnSink, PacedSink, Sink, Subscription};
pub use target::{
    build_target, AsyncPool, BroadcastRing, DispatchTarget, HotStream, TargetState, WorkQueue,
};
pub use wait::{BlockingWait, BusySpinWait, WaitKind, WaitStrategy, YieldingWait};
