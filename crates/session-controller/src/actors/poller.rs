//! Sync poller.
//!
//! Fetches the room snapshot on a fixed interval and hands each result to
//! the session actor. Ticks are sequential: a slow fetch delays the next
//! tick instead of overlapping it, and missed ticks are skipped. The first
//! fetch happens one interval after start.
//!
//! Every event carries the session epoch the poller was started for and a
//! per-poller sequence number, so the actor can drop results that arrive
//! after a leave or out of order.
//!
//! A failed fetch ends the loop. There is no retry.

use crate::errors::SignalingError;
use crate::observability::metrics;
use crate::signaling::Signaling;
use crate::snapshot::SyncResponse;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

/// One poll result waiting for the session actor.
#[derive(Debug)]
pub enum PollEvent {
    Snapshot {
        epoch: u64,
        seq: u64,
        sync: SyncResponse,
    },
    Failed {
        epoch: u64,
        seq: u64,
        error: SignalingError,
    },
}

impl PollEvent {
    pub fn epoch(&self) -> u64 {
        match self {
            PollEvent::Snapshot { epoch, .. } | PollEvent::Failed { epoch, .. } => *epoch,
        }
    }

    pub fn seq(&self) -> u64 {
        match self {
            PollEvent::Snapshot { seq, .. } | PollEvent::Failed { seq, .. } => *seq,
        }
    }
}

/// Shortest accepted poll period. `interval_at` rejects a zero period.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Spawn the poll loop. It stops on cancellation, on a failed fetch, or
/// when the receiver is dropped.
///
/// An `interval` below [`MIN_POLL_INTERVAL`] is raised to it.
///
/// The channel holds a single event so an unread snapshot applies
/// backpressure to the loop.
pub fn spawn_sync_loop(
    signaling: Signaling,
    interval: Duration,
    epoch: u64,
    cancel_token: CancellationToken,
) -> (JoinHandle<()>, mpsc::Receiver<PollEvent>) {
    let interval = if interval < MIN_POLL_INTERVAL {
        warn!(
            target: "sc.poller",
            requested_ms = interval.as_millis(),
            "Poll interval too short, using minimum"
        );
        MIN_POLL_INTERVAL
    } else {
        interval
    };
    let (sender, receiver) = mpsc::channel(1);
    let task = tokio::spawn(run_sync_loop(signaling, interval, epoch, cancel_token, sender));
    (task, receiver)
}

#[instrument(skip_all, name = "sc.poller", fields(epoch = epoch))]
async fn run_sync_loop(
    signaling: Signaling,
    interval: Duration,
    epoch: u64,
    cancel_token: CancellationToken,
    sender: mpsc::Sender<PollEvent>,
) {
    debug!(target: "sc.poller", interval_ms = interval.as_millis(), "Sync poller started");

    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        seq += 1;
        let Some(result) = until_cancelled(&cancel_token, signaling.sync()).await else {
            break;
        };

        match result {
            Ok(sync) => {
                let event = PollEvent::Snapshot { epoch, seq, sync };
                if !deliver(&cancel_token, &sender, event).await {
                    break;
                }
            }
            Err(e) => {
                error!(target: "sc.poller", seq, error = %e, "Sync fetch failed, polling stopped");
                metrics::record_poll_tick("error");
                let event = PollEvent::Failed {
                    epoch,
                    seq,
                    error: e,
                };
                deliver(&cancel_token, &sender, event).await;
                break;
            }
        }
    }

    debug!(target: "sc.poller", ticks = seq, "Sync poller stopped");
}

async fn until_cancelled<F: Future>(cancel_token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        () = cancel_token.cancelled() => None,
        output = fut => Some(output),
    }
}

async fn deliver(
    cancel_token: &CancellationToken,
    sender: &mpsc::Sender<PollEvent>,
    event: PollEvent,
) -> bool {
    matches!(
        until_cancelled(cancel_token, sender.send(event)).await,
        Some(Ok(()))
    )
}
