//! Work-distributing adapter.
//!
//! One shared bounded lane, k competing consumer threads each owning one
//! sink. Channel semantics give exactly-once delivery: every item lands at
//! precisely one sink, with no duplicates and no omissions. After the
//! producer end drops, every worker drains whatever it can still win, then
//! delivers its own sink's terminal signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Sender};

use crate::config::HarnessConfig;
use crate::error::{Result, SpateError};
use crate::load::Event;
use crate::sink::Sink;
use crate::wait::WaitStrategy;

use super::{
    consume_lane, join_workers, spawn_worker, submit_guard, DispatchTarget, TargetState,
};

pub struct WorkQueue {
    backlog: usize,
    strategy: Arc<dyn WaitStrategy>,
    pin_workers: bool,
    sinks: Vec<Arc<dyn Sink>>,
    lane: Option<Sender<Event>>,
    workers: Vec<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
    state: TargetState,
}

impl WorkQueue {
    pub fn new(config: &HarnessConfig) -> Result<Self> {
        Ok(Self {
            backlog: config.backlog,
            strategy: config.wait.strategy(),
            pin_workers: config.pin_workers,
            sinks: Vec::new(),
            lane: None,
            workers: Vec::new(),
            alive: Arc::new(AtomicBool::new(true)),
            state: TargetState::Created,
        })
    }
}

impl DispatchTarget for WorkQueue {
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
            return Err(SpateError::config("work queue needs at least one sink"));
        }
        let (tx, rx) = bounded(self.backlog);
        for (index, sink) in self.sinks.iter().enumerate() {
            let rx = rx.clone();
            let sink = sink.clone();
            let strategy = self.strategy.clone();
            let alive = self.alive.clone();
            let handle = spawn_worker(
                format!("work-queue-{index}"),
                index,
                self.pin_workers,
                move || {
                    let drained = consume_lane(&rx, &*strategy, &alive, |event| {
                        sink.on_item(event);
                    });
                    if drained {
                        sink.on_complete();
                    }
                },
            )?;
            self.workers.push(handle);
        }
        self.lane = Some(tx);
        self.state = TargetState::Running;
        Ok(())
    }

    fn submit(&mut self, event: Event) -> Result<()> {
        submit_guard(self.state)?;
        let lane = self
            .lane
            .as_ref()
            .ok_or(SpateError::TargetUnavailable { state: "completing" })?;
        super::send_event(lane, event, &*self.strategy, &self.alive)
    }

    fn signal_complete(&mut self) -> Result<()> {
        match self.state {
            TargetState::Running => {
                self.state = TargetState::Completing;
                self.lane = None;
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
        self.lane = None;
        join_workers(&mut self.workers);
        self.state = TargetState::Closed;
        Ok(())
    }

    fn state(&self) -> TargetState {
        self.state
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FanOut;
    use crate::gate::CompletionGate;
    use crate::load::LoadShape;
    use crate::sink::{CountingSink, Sink};
    use crate::wait::WaitKind;
    use std::collections::HashSet;
    use std::time::Duration;

    use parking_lot::Mutex;

    fn config() -> HarnessConfig {
        HarnessConfig::new(256)
            .unwrap()
            .with_fan_out(FanOut::WorkShared)
            .with_wait(WaitKind::Yielding)
    }

    /// Counting sink that also remembers payloads, for delivery-set checks.
    struct RecordingSink {
        inner: CountingSink,
        seen: Mutex<Vec<u64>>,
    }

    impl RecordingSink {
        fn new(gate: Arc<CompletionGate>) -> Self {
            Self {
                inner: CountingSink::new(gate),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Sink for RecordingSink {
        fn on_item(&self, event: Event) {
            self.seen.lock().push(event.payload());
            self.inner.on_item(event);
        }

        fn on_complete(&self) {
            self.inner.on_complete();
        }

        fn on_error(&self, reason: &str) {
            self.inner.on_error(reason);
        }
    }

    #[test]
    fn test_each_item_delivered_exactly_once() {
        let total = 10_000u64;
        let gate = Arc::new(CompletionGate::new(4));
        let sinks: Vec<Arc<RecordingSink>> = (0..4)
            .map(|_| Arc::new(RecordingSink::new(gate.clone())))
            .collect();

        let mut queue = WorkQueue::new(&config()).unwrap();
        for sink in &sinks {
            queue.attach_sink(sink.clone()).unwrap();
        }
        queue.start().unwrap();

        LoadShape::Counting { count: total }
            .drive(&mut queue)
            .unwrap();
        gate.await_signaled(Duration::from_secs(10)).unwrap();
        queue.close().unwrap();

        let mut union = HashSet::new();
        let mut sum = 0u64;
        for sink in &sinks {
            let seen = sink.seen.lock();
            sum += seen.len() as u64;
            for payload in seen.iter() {
                assert!(union.insert(*payload), "payload {payload} delivered twice");
            }
        }
        assert_eq!(sum, total);
        assert_eq!(union.len() as u64, total);
    }

    #[test]
    fn test_zero_items_still_terminates_all_sinks() {
        let gate = Arc::new(CompletionGate::new(3));
        let sinks: Vec<Arc<CountingSink>> = (0..3)
            .map(|_| Arc::new(CountingSink::new(gate.clone())))
            .collect();

        let mut queue = WorkQueue::new(&config()).unwrap();
        for sink in &sinks {
            queue.attach_sink(sink.clone()).unwrap();
        }
        queue.start().unwrap();
        queue.signal_complete().unwrap();
        gate.await_signaled(Duration::from_secs(5)).unwrap();
        queue.close().unwrap();

        for sink in &sinks {
            assert_eq!(sink.count(), 0);
        }
    }

    #[test]
    fn test_signal_complete_is_tolerated_while_completing() {
        let gate = Arc::new(CompletionGate::new(1));
        let sink = Arc::new(CountingSink::new(gate.clone()));
        let mut queue = WorkQueue::new(&config()).unwrap();
        queue.attach_sink(sink).unwrap();
        queue.start().unwrap();
        queue.signal_complete().unwrap();
        queue.signal_complete().unwrap();
        gate.await_signaled(Duration::from_secs(5)).unwrap();
        queue.close().unwrap();
    }
}
