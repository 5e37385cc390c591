//! Hot publisher adapter with per-subscriber backpressure buffers.
//!
//! Submissions never block: each subscriber owns a growable buffer that
//! absorbs whatever its delivery thread has not yet consumed. Delivery is
//! paced by the subscriber's demand ledger - a sink that requests
//! `u64::MAX` gets firehose delivery, a bounded sink is drip-fed one
//! credit at a time. A buffer that hits the hard cap fails the submission
//! and errors that subscriber's stream; the error is itself a terminal
//! signal, so the completion gate never deadlocks on a faulted lane.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::config::HarnessConfig;
use crate::constants::MAX_HOT_LANE_BUFFER;
use crate::error::{Result, SpateError};
use crate::load::Event;
use crate::sink::{Sink, Subscription};
use crate::wait::WaitStrategy;

use super::{join_workers, spawn_worker, submit_guard, DispatchTarget, TargetState};

/// Timed-wake interval of a delivery thread, so shutdown and missed
/// notifications are always observed.
const LANE_POLL: Duration = Duration::from_millis(1);

#[derive(Default)]
struct LaneState {
    queue: VecDeque<Event>,
    done: bool,
    error: Option<String>,
}

struct Lane {
    state: Mutex<LaneState>,
    ready: Condvar,
}

impl Lane {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LaneState {
                queue: VecDeque::with_capacity(capacity),
                done: false,
                error: None,
            }),
            ready: Condvar::new(),
        }
    }
}

enum Step {
    Deliver(Event),
    Complete,
    Fail(String),
    Shutdown,
}

pub struct HotStream {
    capacity: usize,
    strategy: Arc<dyn WaitStrategy>,
    pin_workers: bool,
    sinks: Vec<Arc<dyn Sink>>,
    lanes: Vec<Arc<Lane>>,
    workers: Vec<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
    state: TargetState,
}

impl HotStream {
    pub fn new(config: &HarnessConfig) -> Result<Self> {
        Ok(Self {
            capacity: config.backlog,
            strategy: config.wait.strategy(),
            pin_workers: config.pin_workers,
            sinks: Vec::new(),
            lanes: Vec::new(),
            workers: Vec::new(),
            alive: Arc::new(AtomicBool::new(true)),
            state: TargetState::Created,
        })
    }

    fn deliver_loop(
        lane: &Lane,
        subscription: &Arc<Subscription>,
        sink: &Arc<dyn Sink>,
        alive: &AtomicBool,
    ) {
        loop {
            let step = {
                let mut state = lane.state.lock();
                loop {
                    if !alive.load(Ordering::Acquire) {
                        break Step::Shutdown;
                    }
                    if let Some(reason) = state.error.take() {
                        break Step::Fail(reason);
                    }
                    if !state.queue.is_empty() {
                        if subscription.try_take() {
                            break Step::Deliver(state.queue.pop_front().unwrap());
                        }
                        // Buffered but out of credits: wait for a request.
                    } else if state.done {
                        break Step::Complete;
                    }
                    lane.ready.wait_for(&mut state, LANE_POLL);
                }
            };
            match step {
                Step::Deliver(event) => sink.on_item(event),
                Step::Complete => {
                    sink.on_complete();
                    return;
                }
                Step::Fail(reason) => {
                    tracing::error!(%reason, "hot stream lane faulted");
                    sink.on_error(&reason);
                    return;
                }
                Step::Shutdown => return,
            }
        }
    }
}

impl DispatchTarget for HotStream {
    fn attach_sink(&mut self, sink: Arc<dyn Sink>) -> Result<()> {
        if self.state != TargetState::Created {
            return Err(SpateError::config("sinks must be attached before start"));
        }
        self.sinks.push(sink);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.state != TargetState::Created {
            return Err(SpateError::TargetUnavailable { state: self.state.as_str() });
        }
        if self.sinks.is_empty() {
            return Err(SpateError::config("hot stream needs at least one subscriber"));
        }
        for (index, sink) in self.sinks.iter().enumerate() {
            let lane = Arc::new(Lane::with_capacity(self.capacity));
            let waker_lane = lane.clone();
            let subscription = Arc::new(Subscription::with_waker(move || {
                waker_lane.ready.notify_all();
            }));
            sink.on_subscribe(&subscription);

            let sink = sink.clone();
            let alive = self.alive.clone();
            let worker_lane = lane.clone();
            let handle = spawn_worker(
                format!("hot-stream-{index}"),
                index,
                self.pin_workers,
                move || {
                    Self::deliver_loop(&worker_lane, &subscription, &sink, &alive);
                },
            )?;
            self.lanes.push(lane);
            self.workers.push(handle);
        }
        self.state = TargetState::Running;
        Ok(())
    }

    fn submit(&mut self, event: Event) -> Result<()> {
        submit_guard(self.state)?;
        for lane in &self.lanes {
            let mut state = lane.state.lock();
            if state.queue.len() >= MAX_HOT_LANE_BUFFER {
                let detail = format!(
                    "backpressure buffer at capacity ({MAX_HOT_LANE_BUFFER} events)"
                );
                state.error = Some(detail.clone());
                lane.ready.notify_all();
                return Err(SpateError::TargetOverflow { detail });
            }
            state.queue.push_back(event);
            lane.ready.notify_all();
        }
        Ok(())
    }

    fn signal_complete(&mut self) -> Result<()> {
        match self.state {
            TargetState::Running => {
                self.state = TargetState::Completing;
                for lane in &self.lanes {
                    lane.state.lock().done = true;
                    lane.ready.notify_all();
                }
                Ok(())
            }
            TargetState::Completing => Ok(()),
            state => Err(SpateError::TargetUnavailable { state: state.as_str() }),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.state == TargetState::Closed {
            return Ok(());
        }
        self.alive.store(false, Ordering::Release);
        self.strategy.signal();
        for lane in &self.lanes {
            lane.ready.notify_all();
        }
        join_workers(&mut self.workers);
        self.lanes.clear();
        self.state = TargetState::Closed;
        Ok(())
    }

    fn state(&self) -> TargetState {
        self.state
    }
}

impl Drop for HotStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetKind;
    use crate::gate::CompletionGate;
    use crate::load::LoadShape;
    use crate::sink::{CountingSink, PacedSink};
    use std::time::Duration;

    fn config() -> HarnessConfig {
        HarnessConfig::new(256).unwrap().with_kind(TargetKind::HotStream)
    }

    #[test]
    fn test_firehose_delivery_to_two_subscribers() {
        let total = 10_000u64;
        let gate = Arc::new(CompletionGate::new(2));
        let first = Arc::new(CountingSink::new(gate.clone()));
        let second = Arc::new(CountingSink::new(gate.clone()));

        let mut stream = HotStream::new(&config()).unwrap();
        stream.attach_sink(first.clone()).unwrap();
        stream.attach_sink(second.clone()).unwrap();
        stream.start().unwrap();

        LoadShape::Counting { count: total }.drive(&mut stream).unwrap();
        gate.await_signaled(Duration::from_secs(10)).unwrap();
        stream.close().unwrap();

        assert_eq!(first.count(), total);
        assert_eq!(second.count(), total);
    }

    #[test]
    fn test_bounded_demand_still_drains() {
        let total = 1_000u64;
        let gate = Arc::new(CompletionGate::new(1));
        let sink = Arc::new(PacedSink::new(4, gate.clone()));

        let mut stream = HotStream::new(&config()).unwrap();
        stream.attach_sink(sink.clone()).unwrap();
        stream.start().unwrap();

        LoadShape::Counting { count: total }.drive(&mut stream).unwrap();
        gate.await_signaled(Duration::from_secs(10)).unwrap();
        stream.close().unwrap();

        assert_eq!(sink.count(), total);
    }

    #[test]
    fn test_buffer_cap_errors_the_subscriber() {
        // A subscriber that never requests demand: its buffer can only
        // grow until the cap trips.
        struct NoDemandSink {
            gate: Arc<CompletionGate>,
        }

        impl Sink for NoDemandSink {
            fn on_item(&self, _event: Event) {
                unreachable!("no credits were ever granted");
            }

            fn on_complete(&self) {
                self.gate.signal_complete().unwrap();
            }

            fn on_error(&self, reason: &str) {
                self.gate.signal_error(reason).unwrap();
            }
        }

        let gate = Arc::new(CompletionGate::new(1));
        let mut stream = HotStream::new(&config()).unwrap();
        stream
            .attach_sink(Arc::new(NoDemandSink { gate: gate.clone() }))
            .unwrap();
        stream.start().unwrap();

        let mut overflowed = false;
        for i in 0..=(MAX_HOT_LANE_BUFFER as u64) {
            match stream.submit(Event::wrap(i)) {
                Ok(()) => {}
                Err(SpateError::TargetOverflow { .. }) => {
                    overflowed = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(overflowed);

        // The error is the lane's terminal signal.
        gate.await_signaled(Duration::from_secs(10)).unwrap();
        assert!(gate.upstream_error().is_some());
        stream.close().unwrap();
    }

    #[test]
    fn test_empty_stream_completes() {
        let gate = Arc::new(CompletionGate::new(1));
        let sink = Arc::new(CountingSink::new(gate.clone()));
        let mut stream = HotStream::new(&config()).unwrap();
        stream.attach_sink(sink.clone()).unwrap();
        stream.start().unwrap();
        stream.signal_complete().unwrap();
        gate.await_signaled(Duration::from_secs(5)).unwrap();
        stream.close().unwrap();
        assert_eq!(sink.count(), 0);
    }
}
