//! Asynchronous hand-off adapter.
//!
//! Submissions hop through a bounded lane to a pool of worker threads that
//! all feed one shared sink - the async-scheduler-hop shape in
//! sync-vs-async comparisons. The sink still gets exactly one terminal
//! signal: workers count themselves out and the last one to observe the
//! drained lane delivers it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
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

pub struct AsyncPool {
    backlog: usize,
    pool_size: usize,
    strategy: Arc<dyn WaitStrategy>,
    pin_workers: bool,
    sink: Option<Arc<dyn Sink>>,
    lane: Option<Sender<Event>>,
    workers: Vec<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
    state: TargetState,
}

impl AsyncPool {
    pub fn new(config: &HarnessConfig) -> Result<Self> {
        Ok(Self {
            backlog: config.backlog,
            pool_size: config.workers,
            strategy: config.wait.strategy(),
            pin_workers: config.pin_workers,
            sink: None,
            lane: None,
            workers: Vec::new(),
            alive: Arc::new(AtomicBool::new(true)),
            state: TargetState::Created,
        })
    }
}

impl DispatchTarget for AsyncPool {
    fn attach_sink(&mut self, sink: Arc<dyn Sink>) -> Result<()> {
        if self.state != TargetState::Created {
            return Err(SpateError::config("sinks must be attached before start"));
        }
        if self.sink.is_some() {
            return Err(SpateError::config("async pool takes exactly one sink"));
        }
        self.sink = Some(sink);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.state != TargetState::Created {
            return Err(SpateError::TargetUnavailable { state: self.state.as_str() });
        }
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| SpateError::config("async pool needs a sink"))?;
        let (tx, rx) = bounded(self.backlog);
        let draining = Arc::new(AtomicUsize::new(self.pool_size));
        for index in 0..self.pool_size {
            let rx = rx.clone();
            let sink = sink.clone();
            let strategy = self.strategy.clone();
            let alive = self.alive.clone();
            let draining = draining.clone();
            let handle = spawn_worker(
                format!("async-pool-{index}"),
                index,
                self.pin_workers,
                move || {
                    let drained = consume_lane(&rx, &*strategy, &alive, |event| {
                        sink.on_item(event);
                    });
                    // Last worker out of a fully drained lane owns the
                    // terminal signal.
                    if drained && draining.fetch_sub(1, Ordering::AcqRel) == 1 {
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

impl Drop for AsyncPool {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
