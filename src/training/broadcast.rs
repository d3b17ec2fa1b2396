// Progress broadcast stream
// Every attached observer gets its own task and timer. The task re-reads the
// job snapshot on each tick and ends after forwarding the terminal event.

use super::manager::{JobManager, TerminalReceiver};
use crate::error::TrainerError;
use crate::models::{ProgressEvent, TerminalEvent};
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;

const OBSERVER_BUFFER: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Snapshot(ProgressEvent),
    Terminal(TerminalEvent),
}

#[derive(Clone)]
pub struct ProgressBroadcaster {
    jobs: Arc<JobManager>,
    interval: Duration,
}

/// One attached client. Dropping it detaches the observer.
#[derive(Debug)]
pub struct Observer {
    messages: mpsc::Receiver<StreamMessage>,
}

impl Observer {
    /// `None` once the terminal message has been delivered
    pub async fn next_message(&mut self) -> Option<StreamMessage> {
        self.messages.recv().await
    }

    pub fn into_stream(self) -> ReceiverStream<StreamMessage> {
        ReceiverStream::new(self.messages)
    }
}

impl ProgressBroadcaster {
    pub fn new(jobs: Arc<JobManager>, interval: Duration) -> Self {
        Self { jobs, interval }
    }

    /// Attach a new observer to the running job
    pub fn attach(&self) -> Result<Observer, TrainerError> {
        let terminal = self.jobs.subscribe()?;
        let (tx, rx) = mpsc::channel(OBSERVER_BUFFER);

        tokio::spawn(run_observer(self.jobs.clone(), self.interval, terminal, tx));

        Ok(Observer { messages: rx })
    }
}

async fn run_observer(
    jobs: Arc<JobManager>,
    period: Duration,
    mut terminal: TerminalReceiver,
    tx: mpsc::Sender<StreamMessage>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = tx.closed() => {
                debug!("Progress observer disconnected");
                return;
            }
            changed = terminal.changed() => {
                let event = terminal.borrow_and_update().clone();
                if let Some(event) = event {
                    let _ = tx.send(StreamMessage::Terminal(event)).await;
                    return;
                }
                if changed.is_err() {
                    debug!("Run ended without a terminal event");
                    return;
                }
            }
            _ = ticker.tick() => {
                let progress = jobs.snapshot().progress;
                if tx.send(StreamMessage::Snapshot(ProgressEvent { progress })).await.is_err() {
                    return;
                }
            }
        }
    }
}
