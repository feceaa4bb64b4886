//! ==============================================================================
//! link/supervisor.rs - connection supervisor
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     owns the physical link for the life of the process:
//!     - opens it, wires its events into the framer and the ingest pipeline
//!     - turns read errors and remote closes into CoolingDown
//!     - reopens on the retry timer (short interval, long cooldown past the
//!       retry budget)
//!
//! concurrency:
//!     one task, one select loop. link events arrive on a bounded channel and
//!     are handled one at a time, in order. every line is pushed through the
//!     pipeline (including persistence) before the next event is read, so a
//!     slow store fills the channel and stalls the reader thread instead of
//!     queueing without bound.
//!
//!     every link instance gets a new generation number. events still in
//!     flight from a superseded instance carry the old number and are dropped.
//!
//! relationships:
//!     - used by: main.rs
//!     - uses: link/state.rs, framer.rs, pipeline.rs, publisher.rs
//! ```
//!
//! ==============================================================================

use super::state::{LinkStateMachine, LinkStatus, ReconnectPolicy};
use super::{Link, LinkEvent, LinkEvents, LinkHandle};
use crate::framer::LineFramer;
use crate::pipeline::IngestPipeline;
use crate::publisher::LINK_STATUS_EVENT;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// chunks buffered between the reader thread and the supervisor
pub const LINK_EVENT_QUEUE: usize = 32;

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub device_path: String,
    pub baud_rate: u32,
    pub policy: ReconnectPolicy,
}

pub struct Supervisor<L: Link> {
    link: L,
    config: SupervisorConfig,
    machine: LinkStateMachine,
    framer: LineFramer,
    handle: Option<Box<dyn LinkHandle>>,
    events_tx: mpsc::Sender<(u64, LinkEvent)>,
    events_rx: mpsc::Receiver<(u64, LinkEvent)>,
    pipeline: Arc<IngestPipeline>,
    status_tx: watch::Sender<LinkStatus>,
}

impl<L: Link> Supervisor<L> {
    pub fn new(link: L, config: SupervisorConfig, pipeline: Arc<IngestPipeline>) -> Self {
        let machine = LinkStateMachine::new(config.policy.clone());
        let (events_tx, events_rx) = mpsc::channel(LINK_EVENT_QUEUE);
        let (status_tx, _) = watch::channel(machine.status(Instant::now()));
        Self {
            link,
            config,
            machine,
            framer: LineFramer::new(),
            handle: None,
            events_tx,
            events_rx,
            pipeline,
            status_tx,
        }
    }

    /// live view of the link state
    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status_tx.subscribe()
    }

    pub fn machine(&self) -> &LinkStateMachine {
        &self.machine
    }

    /// drive the link until `shutdown` changes (or its sender goes away)
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "[LINK] supervising {} at {} baud",
            self.config.device_path,
            self.config.baud_rate
        );
        self.attempt_open();

        loop {
            let deadline = self.machine.timer_deadline();
            tokio::select! {
                Some((generation, event)) = self.events_rx.recv() => {
                    self.handle_event(generation, event).await;
                }
                _ = wait_until(deadline) => {
                    if self.machine.timer_elapsed(Instant::now()) {
                        self.attempt_open();
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        self.close_current();
        self.machine.shutdown();
        self.publish_status();
        tracing::info!("[LINK] supervisor stopped");
    }

    /// Closed -> Opening -> Open | CoolingDown
    pub(crate) fn attempt_open(&mut self) {
        self.close_current();
        let generation = self.machine.begin_open();
        self.framer.reset();

        let events = LinkEvents::new(generation, self.events_tx.clone());
        match self
            .link
            .open(&self.config.device_path, self.config.baud_rate, events)
        {
            Ok(handle) => {
                self.handle = Some(handle);
                self.machine.opened();
                tracing::info!("[LINK] open (generation {})", generation);
            }
            Err(e) => {
                self.enter_cooldown(e.to_string());
            }
        }
        self.publish_status();
    }

    pub(crate) async fn handle_event(&mut self, generation: u64, event: LinkEvent) {
        if !self.machine.accepts(generation) {
            tracing::debug!(
                "[LINK] dropping event from stale link generation {} (current {})",
                generation,
                self.machine.generation()
            );
            return;
        }

        match event {
            LinkEvent::Data(bytes) => {
                for line in self.framer.push(&bytes) {
                    self.pipeline.handle_line(&line).await;
                }
            }
            LinkEvent::Error(e) => {
                self.close_current();
                self.enter_cooldown(e);
                self.publish_status();
            }
            LinkEvent::Closed => {
                self.close_current();
                self.enter_cooldown("link closed by remote".to_string());
                self.publish_status();
            }
        }
    }

    fn enter_cooldown(&mut self, error: String) {
        tracing::warn!(
            "[LINK] {} unavailable: {} (attempt {})",
            self.config.device_path,
            error,
            self.machine.retry_count() + 1
        );
        if let Some((delay, kind)) = self.machine.failed(error, Instant::now()) {
            tracing::info!("[LINK] next attempt in {:?} ({:?})", delay, kind);
        }
    }

    fn close_current(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
    }

    fn publish_status(&self) {
        let status = self.machine.status(Instant::now());
        if let Ok(payload) = serde_json::to_value(&status) {
            self.pipeline.publisher().broadcast(LINK_STATUS_EVENT, payload);
        }
        self.status_tx.send_replace(status);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::FrameAggregator;
    use crate::error::{HostError, Result};
    use crate::link::LinkState;
    use crate::publisher::{FanOut, SENSOR_DATA_EVENT};
    use crate::storage::router::DEFAULT_REQUEST_TIMEOUT;
    use crate::storage::{FallbackStore, PersistenceRouter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// opens successfully and hands the event sink to the test
    #[derive(Clone, Default)]
    struct ScriptedLink {
        opens: Arc<AtomicUsize>,
        sinks: Arc<Mutex<Vec<LinkEvents>>>,
    }

    struct NoopHandle;

    impl LinkHandle for NoopHandle {
        fn close(&mut self) {}
    }

    impl Link for ScriptedLink {
        fn open(&self, _path: &str, _baud: u32, events: LinkEvents) -> Result<Box<dyn LinkHandle>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.sinks.lock().unwrap().push(events);
            Ok(Box::new(NoopHandle))
        }
    }

    /// never finds the device
    #[derive(Clone, Default)]
    struct AbsentLink {
        opens: Arc<AtomicUsize>,
    }

    impl Link for AbsentLink {
        fn open(&self, path: &str, _baud: u32, _events: LinkEvents) -> Result<Box<dyn LinkHandle>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Err(HostError::Link(format!("{}: No such file or directory", path)))
        }
    }

    fn pipeline(fanout: &FanOut) -> Arc<IngestPipeline> {
        let router = Arc::new(PersistenceRouter::new(
            None,
            FallbackStore::in_memory(100),
            DEFAULT_REQUEST_TIMEOUT,
        ));
        Arc::new(IngestPipeline::new(
            FrameAggregator::default(),
            router,
            Arc::new(fanout.clone()),
        ))
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            device_path: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            policy: ReconnectPolicy::default(),
        }
    }

    #[tokio::test]
    async fn data_from_current_link_reaches_subscribers() {
        let fanout = FanOut::new(16);
        let mut rx = fanout.subscribe();
        let link = ScriptedLink::default();
        let mut supervisor = Supervisor::new(link.clone(), config(), pipeline(&fanout));

        supervisor.attempt_open();
        assert_eq!(supervisor.machine().state(), LinkState::Open);
        let generation = supervisor.machine().generation();

        let line: &[u8] = concat!(
            "HS:85% | T1:24.5C | T2:25.2C | P:1013hPa | ",
            "HA:68.4% | Lux:250lx | Rain:0% | Alert:NO\r\n",
        )
        .as_bytes();
        let (first, second) = line.split_at(20);
        supervisor.handle_event(generation, LinkEvent::Data(first.to_vec())).await;
        supervisor.handle_event(generation, LinkEvent::Data(second.to_vec())).await;

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name);
        }
        assert!(names.contains(&SENSOR_DATA_EVENT.to_string()));
    }

    #[tokio::test]
    async fn stale_link_events_are_ignored() {
        let fanout = FanOut::new(16);
        let link = ScriptedLink::default();
        let mut supervisor = Supervisor::new(link.clone(), config(), pipeline(&fanout));

        supervisor.attempt_open();
        let old = supervisor.machine().generation();
        supervisor.handle_event(old, LinkEvent::Closed).await;
        assert_eq!(supervisor.machine().state(), LinkState::CoolingDown);

        // force the reopen the timer would have done
        let due = supervisor.machine().timer_deadline().unwrap();
        assert!(supervisor.machine.timer_elapsed(due));
        supervisor.attempt_open();
        let current = supervisor.machine().generation();
        assert_ne!(old, current);

        // a late error from the first instance must not tear down the new one
        supervisor
            .handle_event(old, LinkEvent::Error("I/O error".to_string()))
            .await;
        assert_eq!(supervisor.machine().state(), LinkState::Open);
        assert_eq!(supervisor.machine().retry_count(), 0);
    }

    #[tokio::test]
    async fn remote_close_moves_to_cooldown_and_reports_status() {
        let fanout = FanOut::new(16);
        let link = ScriptedLink::default();
        let mut supervisor = Supervisor::new(link, config(), pipeline(&fanout));
        let status = supervisor.status();

        supervisor.attempt_open();
        assert_eq!(status.borrow().state, LinkState::Open);

        let generation = supervisor.machine().generation();
        supervisor.handle_event(generation, LinkEvent::Closed).await;
        let snapshot = status.borrow().clone();
        assert_eq!(snapshot.state, LinkState::CoolingDown);
        assert_eq!(snapshot.retry_count, 1);
        assert_eq!(snapshot.last_error.as_deref(), Some("link closed by remote"));
    }

    #[tokio::test(start_paused = true)]
    async fn twelfth_attempt_waits_for_long_cooldown() {
        let fanout = FanOut::new(64);
        let link = AbsentLink::default();
        let opens = Arc::clone(&link.opens);
        let supervisor = Supervisor::new(link, config(), pipeline(&fanout));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervisor.run(shutdown_rx));

        // attempts at t = 0, 30, ..., 300 s
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(opens.load(Ordering::SeqCst), 11);

        // not at the short interval
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(opens.load(Ordering::SeqCst), 11);
        tokio::time::sleep(Duration::from_secs(267)).await;
        assert_eq!(opens.load(Ordering::SeqCst), 11);

        // the long cooldown ends at t = 600 s
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(opens.load(Ordering::SeqCst), 12);

        // and the budget starts over: next try after the short interval (t = 630 s)
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(opens.load(Ordering::SeqCst), 13);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
