//! Broadcast ring adapter.
//!
//! One bounded lane and one dedicated consumer thread per attached sink;
//! every submitted item is replicated into every lane, so every sink
//! observes the full stream. Dropping the producer ends of the lanes is
//! the source-complete signal: each worker drains what is buffered, then
//! delivers its sink's terminal signal.

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

pub struct BroadcastRing {
    backlog: usize,
    strategy: Arc<dyn WaitStrategy>,
    pin_workers: bool,
    sinks: Vec<Arc<dyn Sink>>,
    lanes: Vec<Sender<Event>>,
    workers: Vec<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
    state: TargetState,
}

impl BroadcastRing {
    pub fn new(config: &HarnessConfig) -> Result<Self> {
        Ok(Self {
            backlog: config.backlog,
            strategy: config.wait.strategy(),
            pin_workers: config.pin_workers,
            sinks: Vec::new(),
            lanes: Vec::new(),
            workers: Vec::new(),
            alive: Arc::new(AtomicBool::new(true)),
            state: TargetState::Created,
        })
    }
}

impl DispatchTarget for BroadcastRing {
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
            return Err(SpateError::config("broadcast ring needs at least one sink"));
        }
        for (index, sink) in self.sinks.iter().enumerate() {
            let (tx, rx) = bounded(self.backlog);
            let sink = sink.clone();
            let strategy = self.strategy.clone();
            let alive = self.alive.clone();
            let handle = spawn_worker(
                format!("broadcast-{index}"),
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
            self.lanes.push(tx);
            self.workers.push(handle);
        }
        self.state = TargetState::Running;
        Ok(())
    }

    fn submit(&mut self, event: Event) -> Result<()> {
        submit_guard(self.state)?;
        for lane in &self.lanes {
            super::send_event(lane, event, &*self.strategy, &self.alive)?;
        }
        Ok(())
    }

    fn signal_complete(&mut self) -> Result<()> {
        match self.state {
            TargetState::Running => {
                self.state = TargetState::Completing;
                // Dropping the producer ends lets each worker drain its
                // lane and deliver the terminal signal.
                self.lanes.clear();
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
        self.lanes.clear();
        join_workers(&mut self.workers);
        self.state = TargetState::Closed;
        Ok(())
    }

    fn state(&self) -> TargetState {
        self.state
    }
}

impl Drop for BroadcastRing {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::CompletionGate;
    use crate::sink::CountingSink;
    use crate::wait::WaitKind;
    use std::time::Duration;

    fn config() -> HarnessConfig {
        HarnessConfig::new(256).unwrap().with_wait(WaitKind::Yielding)
    }

    #[test]
    fn test_every_sink_sees_every_item() {
        let gate = Arc::new(CompletionGate::new(2));
        let first = Arc::new(CountingSink::new(gate.clone()));
        let second = Arc::new(CountingSink::new(gate.clone()));

        let mut ring = BroadcastRing::new(&config()).unwrap();
        ring.attach_sink(first.clone()).unwrap();
        ring.attach_sink(second.clone()).unwrap();
        ring.start().unwrap();

        for i in 0..1000 {
            ring.submit(Event::wrap(i)).unwrap();
        }
        ring.signal_complete().unwrap();
        gate.await_signaled(Duration::from_secs(5)).unwrap();
        ring.close().unwrap();

        assert_eq!(first.count(), 1000);
        assert_eq!(second.count(), 1000);
    }

    #[test]
    fn test_submit_after_close_fails() {
        let gate = Arc::new(CompletionGate::new(1));
        let sink = Arc::new(CountingSink::new(gate));
        let mut ring = BroadcastRing::new(&config()).unwrap();
        ring.attach_sink(sink).unwrap();
        ring.start().unwrap();
        ring.signal_complete().unwrap();
        ring.close().unwrap();

        let result = ring.submit(Event::wrap(0));
        assert!(matches!(result, Err(SpateError::TargetUnavailable { .. })));
    }

    #[test]
    fn test_close_is_idempotent() {
        let gate = Arc::new(CompletionGate::new(1));
        let sink = Arc::new(CountingSink::new(gate.clone()));
        let mut ring = BroadcastRing::new(&config()).unwrap();
        ring.attach_sink(sink).unwrap();
        ring.start().unwrap();
        ring.signal_complete().unwrap();
        gate.await_signaled(Duration::from_secs(5)).unwrap();
        ring.close().unwrap();
        ring.close().unwrap();
        assert_eq!(ring.state(), TargetState::Closed);
    }

    #[test]
    fn test_empty_stream_completes_immediately() {
        let gate = Arc::new(CompletionGate::new(1));
        let sink = Arc::new(CountingSink::new(gate.clone()));
        let mut ring = BroadcastRing::new(&config()).unwrap();
        ring.attach_sink(sink.clone()).unwrap();
        ring.start().unwrap();
        ring.signal_complete().unwrap();
        gate.await_signaled(Duration::from_secs(5)).unwrap();
        ring.close().unwrap();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_start_without_sinks_fails() {
        let mut ring = BroadcastRing::new(&config()).unwrap();
        assert!(ring.start().is_err());
    }
}
