//! The two FIFO queues that are the only link between the presentation
//! context and the worker.
//!
//! ```text
//!  presentation context                         worker context
//! ┌──────────────────────┐  CommandSender  ┌──────────────────────┐
//! │ ControlSurface       │────────────────▶│ CommandReceiver      │
//! │                      │                 │                      │
//! │ Dispatcher           │◀────────────────│ EventSender          │
//! └──────────────────────┘  EventReceiver  └──────────────────────┘
//! ```
//!
//! Both directions are unbounded: producers are paced by user and daemon
//! activity, so sends never block and never fail from the caller's view.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tracing::warn;

use crate::message::{Command, Event};

/// Create a connected queue pair.
pub fn channel() -> (BridgeQueues, WorkerEndpoint) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let unfinished = Arc::new(Unfinished::default());

    let bridge = BridgeQueues {
        commands: CommandSender { tx: command_tx },
        events: EventReceiver {
            rx: event_rx,
            unfinished: Arc::clone(&unfinished),
        },
    };
    let worker = WorkerEndpoint {
        commands: CommandReceiver { rx: command_rx },
        events: EventSender {
            tx: event_tx,
            unfinished,
        },
    };
    (bridge, worker)
}

/// The presentation context's ends of the queue pair.
#[derive(Debug)]
pub struct BridgeQueues {
    pub commands: CommandSender,
    pub events: EventReceiver,
}

/// The worker's ends of the queue pair.
#[derive(Debug)]
pub struct WorkerEndpoint {
    pub commands: CommandReceiver,
    pub events: EventSender,
}

/// Count of events sent but not yet marked processed.
#[derive(Debug, Default)]
struct Unfinished {
    count: AtomicUsize,
    drained: Notify,
}

/// Producer side of the outbound command queue.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: UnboundedSender<Command>,
}

impl CommandSender {
    /// Enqueue a command. Never blocks.
    ///
    /// A command sent after the worker has gone away is dropped with a warning;
    /// it would have waited for a consumer that no longer exists.
    pub fn send(&self, command: Command) {
        if let Err(err) = self.tx.send(command) {
            let command = err.0;
            warn!(
                id = %command.id(),
                kind = command.kind().name(),
                "Worker queue closed, command will not be processed"
            );
        }
    }

    /// Whether the worker end has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the outbound command queue.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: UnboundedReceiver<Command>,
}

impl CommandReceiver {
    /// Wait for the next command. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Command> {
        self.rx.recv().await
    }

    /// Take the next command if one is queued.
    pub fn try_recv(&mut self) -> Option<Command> {
        self.rx.try_recv().ok()
    }

    /// Number of commands waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Producer side of the inbound event queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: UnboundedSender<Event>,
    unfinished: Arc<Unfinished>,
}

impl EventSender {
    /// Enqueue an event for the dispatch loop. Never blocks.
    pub fn send(&self, event: Event) {
        self.unfinished.count.fetch_add(1, Ordering::AcqRel);
        if let Err(err) = self.tx.send(event) {
            self.unfinished.count.fetch_sub(1, Ordering::AcqRel);
            warn!(
                kind = err.0.kind(),
                "Bridge queue closed, event will not be dispatched"
            );
        }
    }

    /// Number of events sent but not yet processed by the dispatch loop.
    pub fn pending(&self) -> usize {
        self.unfinished.count.load(Ordering::Acquire)
    }

    /// Wait until every event sent so far has been marked processed.
    pub async fn join(&self) {
        loop {
            let drained = self.unfinished.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            if self.pending() == 0 {
                return;
            }
            drained.await;
        }
    }
}

/// Consumer side of the inbound event queue.
#[derive(Debug)]
pub struct EventReceiver {
    rx: UnboundedReceiver<Event>,
    unfinished: Arc<Unfinished>,
}

impl EventReceiver {
    /// Take the next event without waiting. `None` when nothing is queued.
    pub fn try_next(&mut self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Mark one dequeued event as processed, waking any `join` callers once
    /// nothing is left.
    pub fn task_done(&self) {
        let previous = self
            .unfinished
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(1) => self.unfinished.drained.notify_waiters(),
            Ok(_) => {}
            Err(_) => warn!("task_done called more times than events were sent"),
        }
    }

    /// Events sent but not yet marked processed (including one in flight).
    pub fn pending(&self) -> usize {
        self.unfinished.count.load(Ordering::Acquire)
    }

    /// Events waiting in the queue.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ids::MessageId;
    use crate::message::{CommandKind, DaemonResponse};

    fn send_anyways(id: u64) -> Command {
        Command::new(
            MessageId::new(id),
            "alice",
            CommandKind::SendAnyways {
                room_id: "!r:example".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_commands_are_fifo() {
        let (bridge, mut worker) = channel();
        for id in 0..5 {
            bridge.commands.send(send_anyways(id));
        }
        assert_eq!(worker.commands.len(), 5);
        for id in 0..5 {
            let command = worker.commands.recv().await.unwrap();
            assert_eq!(command.id(), MessageId::new(id));
        }
        assert!(worker.commands.try_recv().is_none());
    }

    #[test]
    fn test_send_after_worker_dropped_does_not_panic() {
        let (bridge, worker) = channel();
        drop(worker);
        assert!(bridge.commands.is_closed());
        bridge.commands.send(send_anyways(0));
    }

    #[test]
    fn test_try_next_on_empty_queue() {
        let (mut bridge, _worker) = channel();
        assert!(bridge.events.try_next().is_none());
        assert!(bridge.events.is_empty());
    }

    #[test]
    fn test_try_next_after_worker_dropped() {
        let (mut bridge, worker) = channel();
        worker.events.send(Event::UpdateUsers);
        drop(worker);
        assert_eq!(bridge.events.try_next(), Some(Event::UpdateUsers));
        assert!(bridge.events.try_next().is_none());
    }

    #[test]
    fn test_pending_counts_until_task_done() {
        let (mut bridge, worker) = channel();
        worker.events.send(Event::UpdateUsers);
        worker.events.send(Event::UpdateDevices);
        assert_eq!(worker.events.pending(), 2);

        bridge.events.try_next().unwrap();
        assert_eq!(bridge.events.pending(), 2);
        bridge.events.task_done();
        assert_eq!(bridge.events.pending(), 1);
    }

    #[test]
    fn test_extra_task_done_is_harmless() {
        let (bridge, worker) = channel();
        bridge.events.task_done();
        assert_eq!(worker.events.pending(), 0);
    }

    #[tokio::test]
    async fn test_join_returns_immediately_when_idle() {
        let (_bridge, worker) = channel();
        tokio::time::timeout(Duration::from_millis(100), worker.events.join())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_join_waits_for_processing() {
        let (mut bridge, worker) = channel();
        worker.events.send(Event::DaemonResponse(DaemonResponse::new(
            MessageId::new(0),
            "alice",
            "0",
            "ok",
        )));
        worker.events.send(Event::UpdateUsers);

        let events = worker.events.clone();
        let join = tokio::spawn(async move { events.join().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!join.is_finished());

        while bridge.events.try_next().is_some() {
            bridge.events.task_done();
        }

        tokio::time::timeout(Duration::from_secs(1), join)
            .await
            .unwrap()
            .unwrap();
    }
}
