//! A scriptable stand-in for the pantalaimon worker.

use std::time::Duration;

use panbridge_core::message::{Command, DaemonResponse, Event};
use panbridge_core::queue::WorkerEndpoint;
use tokio::task::JoinHandle;

/// How long [`MockWorker::next_command`] waits before giving up.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Worker side of the queue pair, driven by the test.
pub struct MockWorker {
    endpoint: WorkerEndpoint,
}

impl MockWorker {
    pub fn new(endpoint: WorkerEndpoint) -> Self {
        Self { endpoint }
    }

    /// Wait for the next queued command.
    ///
    /// # Panics
    ///
    /// If no command arrives within two seconds.
    pub async fn next_command(&mut self) -> Command {
        tokio::time::timeout(COMMAND_TIMEOUT, self.endpoint.commands.recv())
            .await
            .expect("timed out waiting for a command")
            .expect("command queue closed")
    }

    /// Take a queued command without waiting.
    pub fn try_command(&mut self) -> Option<Command> {
        self.endpoint.commands.try_recv()
    }

    /// Commands waiting in the queue.
    pub fn queued(&self) -> usize {
        self.endpoint.commands.len()
    }

    /// Push an event for the bridge.
    pub fn emit(&self, event: Event) {
        self.endpoint.events.send(event);
    }

    /// Answer a command with the given status.
    pub fn respond(&self, command: &Command, code: &str, message: &str) {
        self.emit(Event::DaemonResponse(DaemonResponse::new(
            command.id(),
            command.pan_user(),
            code,
            message,
        )));
    }

    /// Wait until the bridge has dispatched every event emitted so far.
    pub async fn settle(&self) {
        tokio::time::timeout(COMMAND_TIMEOUT, self.endpoint.events.join())
            .await
            .expect("timed out waiting for the bridge to dispatch events");
    }

    /// Events emitted but not yet dispatched.
    pub fn pending(&self) -> usize {
        self.endpoint.events.pending()
    }

    /// Answer every command with `("0", "ok")` until the bridge goes away.
    pub fn spawn_ok_responder(mut self) -> JoinHandle<Self> {
        tokio::spawn(async move {
            while let Some(command) = self.endpoint.commands.recv().await {
                self.respond(&command, "0", "ok");
            }
            self
        })
    }

    pub fn into_endpoint(self) -> WorkerEndpoint {
        self.endpoint
    }
}
