//! Per-task progress channels — decouple progress production from
//! consumption, tolerating subscribers that attach late or reconnect after
//! the run already finished.
//!
//! One hub serves the whole process, keyed by task id. Each channel keeps
//! the most recent event so a late subscriber replays it before receiving
//! live events (replay-last). After a terminal event, new subscribers get
//! exactly that event again; after a close with no terminal event
//! (cancellation), subscribers get an empty stream — silence is never
//! mistaken for success.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::Stream;
use pageshot_core::error::{PageshotError, Result};
use pageshot_core::types::TaskState;
use tokio::sync::broadcast;

/// Broadcast depth per channel. Progress sequences are short (one event per
/// phase); a slow subscriber that lags this far only loses intermediate
/// percentages, never the terminal event (replayed from `last`).
const CHANNEL_CAPACITY: usize = 64;

struct Channel {
    /// Live fan-out. `None` once the channel is closed.
    tx: Option<broadcast::Sender<TaskState>>,
    /// Most recent event, replayed to late subscribers.
    last: Option<TaskState>,
    /// Set when a terminal event was published; no writes afterward.
    terminal: bool,
    /// When the channel stopped accepting writes (terminal or close).
    /// Finished entries are reclaimed by [`ProgressHub::sweep`].
    finished_at: Option<Instant>,
}

/// Registry of progress channels, one per in-flight (or recently finished)
/// task id.
#[derive(Default)]
pub struct ProgressHub {
    channels: Mutex<HashMap<String, Channel>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A poisoned lock only means some other publisher panicked mid-update;
    /// the map itself is still usable.
    fn channels(&self) -> MutexGuard<'_, HashMap<String, Channel>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a channel for a task id. Fails if one is already open.
    pub fn open(&self, task_id: &str) -> Result<()> {
        let mut channels = self.channels();
        if channels.contains_key(task_id) {
            return Err(PageshotError::DuplicateTaskId(task_id.to_string()));
        }
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        channels.insert(
            task_id.to_string(),
            Channel {
                tx: Some(tx),
                last: None,
                terminal: false,
                finished_at: None,
            },
        );
        Ok(())
    }

    /// Publish an event. Errors with `ChannelClosed` after a terminal event
    /// or an explicit close — writers must stop once the run is over.
    pub fn publish(&self, task_id: &str, event: TaskState) -> Result<()> {
        let mut channels = self.channels();
        let channel = channels
            .get_mut(task_id)
            .ok_or_else(|| PageshotError::UnknownTaskId(task_id.to_string()))?;
        if channel.terminal || channel.tx.is_none() {
            return Err(PageshotError::ChannelClosed(task_id.to_string()));
        }
        channel.terminal = event.is_terminal();
        channel.last = Some(event.clone());
        if let Some(tx) = &channel.tx {
            // No live subscribers is fine — the event is kept in `last`.
            tx.send(event).ok();
        }
        if channel.terminal {
            // Drop the sender so live subscriber streams end after the
            // terminal event even if they miss it on the broadcast.
            channel.tx = None;
            channel.finished_at = Some(Instant::now());
        }
        Ok(())
    }

    /// Subscribe to a task's events. Replays the most recent event first,
    /// then yields live events until the terminal one. Subscribing after
    /// completion yields the terminal event only; after a cancellation
    /// close, the stream is empty.
    pub fn subscribe(&self, task_id: &str) -> Result<impl Stream<Item = TaskState> + Send> {
        let channels = self.channels();
        let channel = channels
            .get(task_id)
            .ok_or_else(|| PageshotError::UnknownTaskId(task_id.to_string()))?;

        // Snapshot + subscribe under one lock so no event slips between.
        let replay = channel.last.clone();
        let mut rx = channel.tx.as_ref().map(|tx| tx.subscribe());
        drop(channels);

        Ok(async_stream::stream! {
            if let Some(event) = replay {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    return;
                }
            }
            let Some(rx) = rx.as_mut() else { return };
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            return;
                        }
                    }
                    // Missed intermediate events; keep going, the terminal
                    // event is still ahead of us.
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("⏭️ progress subscriber lagged {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    /// Close a channel without publishing a terminal event. Live subscriber
    /// streams end; the entry stays for terminal replay (or, when no
    /// terminal was published, as a cancellation marker). Idempotent.
    pub fn close(&self, task_id: &str) {
        let mut channels = self.channels();
        if let Some(channel) = channels.get_mut(task_id) {
            if channel.tx.take().is_some() && !channel.terminal {
                tracing::debug!("🚫 progress channel {task_id} closed without terminal event");
                // Forget the last progress event: reconnecting subscribers
                // must see silence, not a stale percentage.
                channel.last = None;
                channel.finished_at = Some(Instant::now());
            }
        }
    }

    /// Reclaim a channel entirely. Later operations on the id get
    /// `UnknownTaskId`. Returns false if the id was never opened.
    pub fn remove(&self, task_id: &str) -> bool {
        self.channels().remove(task_id).is_some()
    }

    /// Reclaim every channel that finished (terminal event or close) at
    /// least `retention` ago. In-flight channels are untouched. Returns the
    /// number of entries removed.
    pub fn sweep(&self, retention: Duration) -> usize {
        let mut channels = self.channels();
        let before = channels.len();
        channels.retain(|_, c| c.finished_at.map_or(true, |at| at.elapsed() < retention));
        before - channels.len()
    }

    /// Whether a channel exists for this id (open, finished, or cancelled).
    pub fn contains(&self, task_id: &str) -> bool {
        self.channels().contains_key(task_id)
    }
}

/// Where an executor reports progress: into a hub channel, or nowhere
/// (scheduled fires and batch items run silently).
pub enum ProgressSink<'a> {
    Channel { hub: &'a ProgressHub, task_id: &'a str },
    Silent,
}

impl ProgressSink<'_> {
    /// Publish a non-terminal progress event.
    pub fn publish(&self, event: TaskState) -> Result<()> {
        match self {
            Self::Channel { hub, task_id } => hub.publish(task_id, event),
            Self::Silent => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pageshot_core::types::{BatchItem, FailureKind};

    fn completed() -> TaskState {
        TaskState::Completed {
            results: vec![BatchItem::Captured {
                url: "https://example.com".into(),
                results: vec![],
            }],
        }
    }

    #[test]
    fn test_open_duplicate() {
        let hub = ProgressHub::new();
        hub.open("t1").unwrap();
        assert!(matches!(
            hub.open("t1"),
            Err(PageshotError::DuplicateTaskId(_))
        ));
    }

    #[test]
    fn test_publish_unknown_id() {
        let hub = ProgressHub::new();
        assert!(matches!(
            hub.publish("nope", TaskState::Starting),
            Err(PageshotError::UnknownTaskId(_))
        ));
    }

    #[test]
    fn test_publish_after_terminal_is_error() {
        let hub = ProgressHub::new();
        hub.open("t1").unwrap();
        hub.publish("t1", TaskState::Starting).unwrap();
        hub.publish("t1", completed()).unwrap();
        assert!(matches!(
            hub.publish("t1", TaskState::processing(50, "late")),
            Err(PageshotError::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_subscriber_sees_ordered_sequence() {
        let hub = ProgressHub::new();
        hub.open("t1").unwrap();
        let stream = hub.subscribe("t1").unwrap();
        tokio::pin!(stream);

        hub.publish("t1", TaskState::Starting).unwrap();
        hub.publish("t1", TaskState::processing(40, "Loading page..."))
            .unwrap();
        hub.publish("t1", completed()).unwrap();

        let events: Vec<TaskState> = stream.collect().await;
        assert_eq!(events.len(), 3);
        let percents: Vec<u8> = events.iter().map(|e| e.percent()).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_late_subscriber_replays_last_event() {
        let hub = ProgressHub::new();
        hub.open("t1").unwrap();
        hub.publish("t1", TaskState::Starting).unwrap();
        hub.publish("t1", TaskState::processing(60, "Performing interactions..."))
            .unwrap();

        let stream = hub.subscribe("t1").unwrap();
        tokio::pin!(stream);
        let first = stream.next().await.unwrap();
        assert_eq!(first.percent(), 60);

        hub.publish("t1", completed()).unwrap();
        let second = stream.next().await.unwrap();
        assert!(second.is_terminal());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_after_completion_replays_terminal_only() {
        let hub = ProgressHub::new();
        hub.open("t1").unwrap();
        hub.publish("t1", TaskState::Starting).unwrap();
        hub.publish("t1", completed()).unwrap();

        // Reconnect twice — idempotent replay of the final state.
        for _ in 0..2 {
            let stream = hub.subscribe("t1").unwrap();
            let events: Vec<TaskState> = stream.collect().await;
            assert_eq!(events.len(), 1);
            assert!(events[0].is_terminal());
        }
    }

    #[tokio::test]
    async fn test_close_without_terminal_yields_empty_stream() {
        let hub = ProgressHub::new();
        hub.open("t1").unwrap();
        hub.publish("t1", TaskState::processing(40, "Loading page..."))
            .unwrap();
        hub.close("t1");
        hub.close("t1"); // idempotent

        let events: Vec<TaskState> = hub.subscribe("t1").unwrap().collect().await;
        assert!(events.is_empty());
        assert!(matches!(
            hub.publish("t1", TaskState::processing(50, "late")),
            Err(PageshotError::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_live_subscriber_ends_on_cancel_close() {
        let hub = ProgressHub::new();
        hub.open("t1").unwrap();
        let stream = hub.subscribe("t1").unwrap();
        tokio::pin!(stream);
        hub.publish("t1", TaskState::Starting).unwrap();
        assert!(stream.next().await.is_some());

        hub.close("t1");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_terminal_is_replayed() {
        let hub = ProgressHub::new();
        hub.open("t1").unwrap();
        hub.publish(
            "t1",
            TaskState::Failed {
                kind: FailureKind::NavigationTimeout,
                error: "navigation timed out after 30s".into(),
            },
        )
        .unwrap();

        let events: Vec<TaskState> = hub.subscribe("t1").unwrap().collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TaskState::Failed { .. }));
    }

    #[test]
    fn test_sweep_reclaims_finished_channels_only() {
        let hub = ProgressHub::new();
        hub.open("done").unwrap();
        hub.publish("done", completed()).unwrap();
        hub.open("cancelled").unwrap();
        hub.close("cancelled");
        hub.open("running").unwrap();
        hub.publish("running", TaskState::Starting).unwrap();

        assert_eq!(hub.sweep(Duration::ZERO), 2);
        assert!(!hub.contains("done"));
        assert!(!hub.contains("cancelled"));
        assert!(hub.contains("running"));

        // Recently finished channels survive a sweep with a retention
        // window, so reconnects can still replay the terminal event.
        hub.publish("running", completed()).unwrap();
        assert_eq!(hub.sweep(Duration::from_secs(60)), 0);
        assert!(hub.contains("running"));
    }

    #[test]
    fn test_remove_reclaims_id() {
        let hub = ProgressHub::new();
        hub.open("t1").unwrap();
        assert!(hub.remove("t1"));
        assert!(!hub.remove("t1"));
        assert!(matches!(
            hub.subscribe("t1").err(),
            Some(PageshotError::UnknownTaskId(_))
        ));
        // Id can be reopened after reclaim.
        assert!(hub.open("t1").is_ok());
    }
}
