//! Dispatch target adapters.
//!
//! One adapter type per concurrent dispatch engine under test, all behind
//! the same capability set:
//!
//! | Adapter | Delivery | Analog |
//! |---------|----------|--------|
//! | `BroadcastRing` | every sink sees every item | single-consumer broadcast processor |
//! | `WorkQueue` | each item to exactly one sink | work-distributing processor |
//! | `AsyncPool` | pool hand-off into one sink | async scheduler hop |
//! | `HotStream` | demand-paced per-subscriber buffers | hot publisher + backpressure buffer |
//!
//! Lifecycle is `Created → Running → Completing → Closed`. Submitting
//! outside `Running` is a reportable error, never a silent drop, and
//! `close` is idempotent. The driver guarantees `close` only runs after
//! every sink delivered its terminal signal (or the completion wait timed
//! out); the adapters themselves guarantee `close` always reclaims their
//! worker threads.

pub mod async_pool;
pub mod broadcast;
pub mod hot_stream;
pub mod work_queue;

pub use async_pool::AsyncPool;
pub use broadcast::BroadcastRing;
pub use hot_stream::HotStream;
pub use work_queue::WorkQueue;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{Receiver, Sender, TryRecvError, TrySendError};

use crate::config::{FanOut, HarnessConfig, TargetKind};
use crate::error::{Result, SpateError};
use crate::load::Event;
use crate::sink::Sink;
use crate::wait::{Idler, WaitStrategy};

/// Adapter lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Created,
    Running,
    Completing,
    Closed,
}

impl TargetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completing => "completing",
            Self::Closed => "closed",
        }
    }
}

/// Uniform capability set over heterogeneous dispatch engines.
pub trait DispatchTarget: Send {
    /// Register a sink. Only valid before `start`.
    fn attach_sink(&mut self, sink: Arc<dyn Sink>) -> Result<()>;

    /// Spin up delivery and transition to `Running`.
    fn start(&mut self) -> Result<()>;

    /// Enqueue one item; returns once the target has accepted it into its
    /// dispatch structure. May block when the backlog is full and the wait
    /// strategy is blocking - that blocking is part of what is measured.
    fn submit(&mut self, event: Event) -> Result<()>;

    /// Mark the source exhausted. Buffered items still drain to the sinks,
    /// then each sink receives its terminal signal exactly once.
    fn signal_complete(&mut self) -> Result<()>;

    /// Release resources. Idempotent.
    fn close(&mut self) -> Result<()>;

    fn state(&self) -> TargetState;
}

/// Build the adapter selected by `config.kind` / `config.fan_out`.
pub fn build_target(config: &HarnessConfig) -> Result<Box<dyn DispatchTarget>> {
    config.validate()?;
    match config.kind {
        TargetKind::Ring => match config.fan_out {
            FanOut::Broadcast => Ok(Box::new(BroadcastRing::new(config)?)),
            FanOut::WorkShared => Ok(Box::new(WorkQueue::new(config)?)),
        },
        TargetKind::HotStream => Ok(Box::new(HotStream::new(config)?)),
        TargetKind::AsyncPool => Ok(Box::new(AsyncPool::new(config)?)),
    }
}

pub(crate) fn submit_guard(state: TargetState) -> Result<()> {
    if state == TargetState::Running {
        Ok(())
    } else {
        Err(SpateError::TargetUnavailable { state: state.as_str() })
    }
}

/// Push one event into a bounded lane under the configured wait strategy.
pub(crate) fn send_event(
    lane: &Sender<Event>,
    event: Event,
    strategy: &dyn WaitStrategy,
    alive: &AtomicBool,
) -> Result<()> {
    let mut pending = event;
    let mut idler = Idler::new(strategy, alive);
    loop {
        match lane.try_send(pending) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(returned)) => {
                pending = returned;
                idler.idle()?;
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(SpateError::upstream("dispatch lane disconnected"));
            }
        }
    }
}

/// Drain a lane into `deliver` until it disconnects (source complete) or
/// the target is shut down mid-flight.
///
/// Returns true when the lane fully drained; false when shutdown
/// interrupted delivery, in which case no terminal signal must be sent.
pub(crate) fn consume_lane(
    lane: &Receiver<Event>,
    strategy: &dyn WaitStrategy,
    alive: &AtomicBool,
    mut deliver: impl FnMut(Event),
) -> bool {
    let mut idler = Idler::new(strategy, alive);
    loop {
        match lane.try_recv() {
            Ok(event) => {
                idler.reset();
                deliver(event);
            }
            Err(TryRecvError::Empty) => match idler.idle() {
                Ok(()) => {}
                // A quiet producer is not a stalled consumer; only a
                // shutdown ends the loop early.
                Err(SpateError::TargetOverflow { .. }) => idler.reset(),
                Err(_) => return false,
            },
            Err(TryRecvError::Disconnected) => return true,
        }
    }
}

/// Spawn a named dispatch worker, optionally pinned round-robin.
pub(crate) fn spawn_worker<F>(
    name: String,
    index: usize,
    pin: bool,
    body: F,
) -> Result<thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            if pin {
                let core = index % num_cpus::get();
                if let Err(err) = crate::cpu::pin_current_thread(core) {
                    tracing::warn!(%err, core, "worker pinning failed");
                }
            }
            body();
        })
        .map_err(|err| SpateError::system_resource(format!("failed to spawn worker: {err}")))
}

pub(crate) fn join_workers(workers: &mut Vec<thread::JoinHandle<()>>) {
    for handle in workers.drain(..) {
        if handle.join().is_err() {
            tracing::error!("dispatch worker panicked");
        }
    }
}
