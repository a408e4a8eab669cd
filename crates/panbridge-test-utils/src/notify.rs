//! A notification backend that records instead of displaying.

use std::sync::{Arc, Mutex, MutexGuard};

use panbridge_core::BoxFuture;
use panbridge_core::MessageId;
use panbridge_core::notify::{Capabilities, Notification, NotificationBackend, NotifyError};

/// Records every notification it is asked to show.
///
/// Clones share the same record, so a test can keep one clone and hand the
/// other to the bridge.
#[derive(Clone)]
pub struct RecordingBackend {
    available: bool,
    actions: bool,
    shown: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingBackend {
    /// A reachable notification server with action support.
    pub fn new() -> Self {
        Self {
            available: true,
            actions: true,
            shown: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A notification server that cannot be reached.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// A notification server without action buttons.
    pub fn without_actions() -> Self {
        Self {
            actions: false,
            ..Self::new()
        }
    }

    fn shown(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.shown.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn shown_count(&self) -> usize {
        self.shown().len()
    }

    /// Summaries of the recorded notifications, oldest first.
    pub fn summaries(&self) -> Vec<String> {
        self.shown().iter().map(|n| n.summary.clone()).collect()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.shown())
    }

    /// Simulate the user clicking `key` on the notification at `index`.
    ///
    /// The notification is consumed, as it is on a real desktop.
    pub fn click(&self, index: usize, key: &str) -> Option<MessageId> {
        let notification = {
            let mut shown = self.shown();
            if index >= shown.len() {
                return None;
            }
            shown.remove(index)
        };
        notification.trigger(key)
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn probe(&self) -> Result<Capabilities, NotifyError> {
        if !self.available {
            return Err(NotifyError::Unavailable("no notification server".to_string()));
        }
        Ok(Capabilities {
            actions: self.actions,
        })
    }

    fn show(&self, notification: Notification) -> BoxFuture<'static, Result<(), NotifyError>> {
        self.shown().push(notification);
        Box::pin(async { Ok(()) })
    }
}
