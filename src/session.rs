//! The async shell around an [`Engine`].
//!
//! A [`Session`] owns one processing task. That task is the only place
//! engine state is touched: push events, poll results, watchdog deadlines
//! and control messages are multiplexed with `tokio::select!` and applied
//! in arrival order. Every change publishes a fresh [`ViewModel`] on a
//! watch channel.
//!
//! ```text
//!   PushStream ──┐
//!   poll task ───┼──▶ select! ──▶ Engine::handle ──▶ watch::Sender<ViewModel>
//!   deadline ────┤
//!   control ─────┘
//! ```

use std::future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::data::ViewModel;
use crate::engine::{Engine, Input, SessionConfig};
use crate::error::SessionClosed;
use crate::source::{DeviceRecord, LatestReading, PushEvent, PushStream, ReadingPayload};

const CONTROL_BUFFER: usize = 8;
const POLL_BUFFER: usize = 4;

/// One unit of teardown, in the order it runs. A step is only recorded when
/// there was something to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownStep {
    PollTimer,
    WatchdogTimers,
    PushChannel,
}

/// What [`Session::shutdown`] released.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// A poll task was running and has been aborted.
    pub poll_task_cancelled: bool,
    /// Watchdog timers that were still armed.
    pub watchdog_timers_cancelled: usize,
    /// A push stream was still attached and has been closed.
    pub push_closed: bool,
    pub steps: Vec<TeardownStep>,
}

#[derive(Debug)]
enum Control {
    Bootstrap(Vec<DeviceRecord>),
    Shutdown(oneshot::Sender<TeardownReport>),
}

struct PollTask {
    receiver: mpsc::Receiver<ReadingPayload>,
    task: JoinHandle<()>,
}

impl PollTask {
    fn spawn(source: Arc<dyn LatestReading>, period: Duration) -> Self {
        let (tx, rx) = mpsc::channel(POLL_BUFFER);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match source.fetch_latest().await {
                    Ok(Some(payload)) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => debug!(source = source.description(), "no reading available"),
                    Err(e) => warn!(source = source.description(), error = %e, "poll failed"),
                }
            }
        });

        Self { receiver: rx, task }
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A running ingestion session.
///
/// Dropping a session aborts its task; call [`Session::shutdown`] for an
/// orderly teardown.
///
/// # Example
///
/// ```
/// use sensorwatch::{PushStream, Session, SessionConfig};
///
/// # tokio_test::block_on(async {
/// let (tx, push) = PushStream::channel("example", 16);
/// let session = Session::spawn(SessionConfig::default(), Some(push), None);
/// let views = session.subscribe();
///
/// let report = session.shutdown().await;
/// assert!(report.push_closed);
/// # drop((tx, views));
/// # });
/// ```
#[derive(Debug)]
pub struct Session {
    control: mpsc::Sender<Control>,
    views: watch::Receiver<ViewModel>,
    task: Option<JoinHandle<()>>,
}

impl Session {
    /// Start a session.
    ///
    /// `poller` is only used in [`Mode::Live`](crate::Mode::Live); its first
    /// fetch happens immediately.
    pub fn spawn(
        config: SessionConfig,
        push: Option<PushStream>,
        poller: Option<Arc<dyn LatestReading>>,
    ) -> Self {
        Self::spawn_seeded(config, Vec::new(), push, poller)
    }

    /// Start a session whose roster is seeded from `records` before any
    /// push event or poll result is applied.
    pub fn spawn_seeded(
        config: SessionConfig,
        records: Vec<DeviceRecord>,
        push: Option<PushStream>,
        poller: Option<Arc<dyn LatestReading>>,
    ) -> Self {
        let mut engine = Engine::new(&config);
        if !records.is_empty() {
            engine.handle(Input::Bootstrap(records), Instant::now(), Utc::now());
        }
        let (view_tx, view_rx) = watch::channel(engine.snapshot());
        let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);

        let poll = match (config.mode.polls(), poller) {
            (true, Some(source)) => {
                info!(source = source.description(), interval = ?config.poll_interval, "polling");
                Some(PollTask::spawn(source, config.poll_interval))
            }
            (true, None) => {
                warn!("live mode without a poll source, push only");
                None
            }
            (false, _) => None,
        };

        info!(mode = %config.mode, push = push.is_some(), "session started");
        let task = tokio::spawn(run(engine, push, poll, control_rx, view_tx));

        Self {
            control: control_tx,
            views: view_rx,
            task: Some(task),
        }
    }

    /// Subscribe to published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.views.clone()
    }

    /// The most recently published snapshot.
    pub fn latest(&self) -> ViewModel {
        self.views.borrow().clone()
    }

    /// Seed the roster. Applied in order with all other inputs.
    pub async fn bootstrap(&self, records: Vec<DeviceRecord>) -> Result<(), SessionClosed> {
        self.control
            .send(Control::Bootstrap(records))
            .await
            .map_err(|_| SessionClosed)
    }

    /// Stop the session: poll task, then watchdog timers, then push stream.
    ///
    /// No snapshot is published after this returns.
    pub async fn shutdown(mut self) -> TeardownReport {
        let (tx, rx) = oneshot::channel();
        let report = match self.control.send(Control::Shutdown(tx)).await {
            Ok(()) => rx.await.unwrap_or_default(),
            Err(_) => TeardownReport::default(),
        };
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        report
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    mut engine: Engine,
    mut push: Option<PushStream>,
    mut poll: Option<PollTask>,
    mut control: mpsc::Receiver<Control>,
    views: watch::Sender<ViewModel>,
) {
    if let Some(stream) = &push {
        debug!(source = stream.description(), "push stream attached");
        if engine.handle(Input::LinkUp, Instant::now(), Utc::now()) {
            views.send_replace(engine.snapshot());
        }
    }

    loop {
        let deadline = engine.next_deadline();

        let changed = tokio::select! {
            biased;

            message = control.recv() => match message {
                Some(Control::Bootstrap(records)) => {
                    engine.handle(Input::Bootstrap(records), Instant::now(), Utc::now())
                }
                Some(Control::Shutdown(reply)) => {
                    let report = teardown(&mut engine, poll.take(), push.take());
                    let _ = reply.send(report);
                    return;
                }
                None => {
                    teardown(&mut engine, poll.take(), push.take());
                    return;
                }
            },

            event = next_push(&mut push), if push.is_some() => match event {
                Some(event) => engine.handle(Input::Push(event), Instant::now(), Utc::now()),
                None => {
                    warn!("push stream ended");
                    push = None;
                    engine.handle(Input::LinkDown, Instant::now(), Utc::now())
                }
            },

            payload = next_poll(&mut poll), if poll.is_some() => match payload {
                Some(payload) => engine.handle(Input::Poll(payload), Instant::now(), Utc::now()),
                None => {
                    poll = None;
                    false
                }
            },

            _ = sleep_until(deadline), if deadline.is_some() => engine.expire(Instant::now()),
        };

        if changed {
            views.send_replace(engine.snapshot());
        }
    }
}

async fn next_push(push: &mut Option<PushStream>) -> Option<PushEvent> {
    match push {
        Some(stream) => stream.recv().await,
        None => future::pending().await,
    }
}

async fn next_poll(poll: &mut Option<PollTask>) -> Option<ReadingPayload> {
    match poll {
        Some(poll) => poll.receiver.recv().await,
        None => future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

fn teardown(
    engine: &mut Engine,
    poll: Option<PollTask>,
    push: Option<PushStream>,
) -> TeardownReport {
    let mut report = TeardownReport::default();

    if let Some(poll) = poll {
        poll.task.abort();
        report.poll_task_cancelled = true;
        report.steps.push(TeardownStep::PollTimer);
    }

    report.watchdog_timers_cancelled = engine.cancel_timers();
    if report.watchdog_timers_cancelled > 0 {
        report.steps.push(TeardownStep::WatchdogTimers);
    }

    if let Some(mut stream) = push {
        stream.close();
        report.push_closed = true;
        report.steps.push(TeardownStep::PushChannel);
    }

    info!(
        poll_task_cancelled = report.poll_task_cancelled,
        watchdog_timers_cancelled = report.watchdog_timers_cancelled,
        push_closed = report.push_closed,
        "session stopped"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_without_sources() {
        let session = Session::spawn(SessionConfig::default(), None, None);
        let mut views = session.subscribe();

        let report = session.shutdown().await;
        assert_eq!(
            report,
            TeardownReport {
                poll_task_cancelled: false,
                watchdog_timers_cancelled: 0,
                push_closed: false,
                steps: Vec::new(),
            }
        );
        assert!(views.changed().await.is_err());
    }

    #[tokio::test]
    async fn test_control_after_shutdown_fails() {
        let session = Session::spawn(SessionConfig::default(), None, None);
        let control = session.control.clone();
        session.shutdown().await;

        let (tx, _rx) = oneshot::channel();
        assert!(control.send(Control::Shutdown(tx)).await.is_err());
    }

    #[tokio::test]
    async fn test_seeded_roster_is_in_first_snapshot() {
        let records = vec![DeviceRecord {
            id: crate::source::DeviceId::Number(1),
            name: "boiler".to_string(),
            host: None,
            status: None,
            is_connected: None,
            last_seen: None,
        }];
        let session = Session::spawn_seeded(SessionConfig::default(), records, None, None);
        let view = session.latest();
        assert_eq!(view.devices.len(), 1);
        assert_eq!(view.devices[0].name, "boiler");
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_initial_snapshot_is_published() {
        let session = Session::spawn(SessionConfig::default(), None, None);
        let view = session.latest();
        assert_eq!(view.revision, 1);
        assert!(view.devices.is_empty());
        assert!(!view.connected);
    }
}
