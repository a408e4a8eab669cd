//! Desktop notifications for events that want the user's attention.
//!
//! A [`Notification`] carries zero or more [`NotificationAction`]s. Each action
//! owns a callback that re-issues one command through a [`CommandHandle`], so
//! a click on "Send anyways" ends up on the outbound queue like any other
//! control operation. The callback captures only the ids it needs.
//!
//! Rendering is best effort. [`Notifier::init`] probes the backend once; if
//! the notification server is missing the notifier stays disabled for the
//! rest of the process and says so in a single warning.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::BoxFuture;
use crate::control::CommandHandle;
use crate::ids::MessageId;
use crate::message::{SasCanceled, SasTransaction, ShowSas, UnverifiedDevices};

mod notify_send;

pub use notify_send::NotifySendBackend;

/// Freedesktop category for instant-messaging notifications.
pub const CATEGORY_IM: &str = "im";

/// Errors from a notification backend.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification server unavailable: {0}")]
    Unavailable(String),

    #[error("failed to display notification: {0}")]
    Display(String),
}

/// Callback run when the user picks an action.
pub type ActionCallback = Box<dyn FnOnce() -> MessageId + Send>;

/// A named button on a notification.
pub struct NotificationAction {
    pub key: String,
    pub label: String,
    callback: ActionCallback,
}

impl NotificationAction {
    pub fn new(
        key: impl Into<String>,
        label: impl Into<String>,
        callback: impl FnOnce() -> MessageId + Send + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            callback: Box::new(callback),
        }
    }

    /// Run the callback, returning the id of the command it enqueued.
    pub fn invoke(self) -> MessageId {
        (self.callback)()
    }
}

impl fmt::Debug for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationAction")
            .field("key", &self.key)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct Notification {
    pub summary: String,
    pub body: String,
    pub category: String,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    pub fn new(summary: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            body: body.into(),
            category: CATEGORY_IM.to_string(),
            actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Keys of the attached actions, in display order.
    pub fn action_keys(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.key.as_str()).collect()
    }

    /// Invoke the action with the given key. `None` if there is no such action.
    pub fn trigger(self, key: &str) -> Option<MessageId> {
        self.actions
            .into_iter()
            .find(|a| a.key == key)
            .map(NotificationAction::invoke)
    }

    /// Sending was held back because the room has unverified devices.
    pub fn unverified_devices(event: &UnverifiedDevices, commands: &CommandHandle) -> Self {
        let body = format!(
            "There are unverified devices in the room {}.",
            event.room_display_name
        );

        let (send, cancel) = (commands.clone(), commands.clone());
        let (pan_user, room_id) = (event.pan_user.clone(), event.room_id.clone());
        let send_action = NotificationAction::new("send", "Send anyways", move || {
            send.send_anyways(&pan_user, &room_id)
        });
        let (pan_user, room_id) = (event.pan_user.clone(), event.room_id.clone());
        let cancel_action = NotificationAction::new("cancel", "Cancel sending", move || {
            cancel.cancel_sending(&pan_user, &room_id)
        });

        Self::new("Unverified devices.", body)
            .with_action(send_action)
            .with_action(cancel_action)
    }

    /// Another device started an interactive verification.
    pub fn verification_invite(sas: &SasTransaction, commands: &CommandHandle) -> Self {
        let body = format!(
            "{} via {} has started a key verification process.",
            sas.user_id, sas.device_id
        );
        Self::new("Key verification invite", body)
            .with_action(sas_action(sas, commands, "accept", "Accept", |c, p, u, d| {
                c.accept_key_verification(p, u, d)
            }))
            .with_action(sas_cancel_action(sas, commands))
    }

    /// The short authentication string is ready to be compared.
    pub fn verification_string(show: &ShowSas, commands: &CommandHandle) -> Self {
        let sas = &show.transaction;
        let emoji: Vec<&str> = show.emoji.iter().map(|e| e.emoji.as_str()).collect();
        let body = format!(
            "Short authentication string for the key verification of {} via {}:\n{}",
            sas.user_id,
            sas.device_id,
            emoji.join("   ")
        );
        Self::new("Short authentication string", body)
            .with_action(sas_action(sas, commands, "confirm", "Confirm", |c, p, u, d| {
                c.confirm_key_verification(p, u, d)
            }))
            .with_action(sas_cancel_action(sas, commands))
    }

    pub fn verification_done(sas: &SasTransaction) -> Self {
        let body = format!(
            "Device {} of user {} successfully verified.",
            sas.device_id, sas.user_id
        );
        Self::new("Device successfully verified.", body)
    }

    pub fn verification_canceled(canceled: &SasCanceled) -> Self {
        let sas = &canceled.transaction;
        let body = format!(
            "Key verification of {} via {} was canceled: {}",
            sas.user_id, sas.device_id, canceled.reason
        );
        Self::new("Key verification canceled", body)
    }
}

fn sas_action(
    sas: &SasTransaction,
    commands: &CommandHandle,
    key: &str,
    label: &str,
    op: fn(&CommandHandle, &str, &str, &str) -> MessageId,
) -> NotificationAction {
    let commands = commands.clone();
    let pan_user = sas.pan_user.clone();
    let user_id = sas.user_id.clone();
    let device_id = sas.device_id.clone();
    NotificationAction::new(key, label, move || {
        op(&commands, &pan_user, &user_id, &device_id)
    })
}

fn sas_cancel_action(sas: &SasTransaction, commands: &CommandHandle) -> NotificationAction {
    sas_action(sas, commands, "cancel", "Cancel", |c, p, u, d| {
        c.cancel_key_verification(p, u, d)
    })
}

/// What the notification server can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether action buttons are rendered and reported back.
    pub actions: bool,
}

/// A way of putting notifications on the user's desktop.
pub trait NotificationBackend: Send + Sync {
    /// Human-readable name of this backend (e.g. "notify-send").
    fn name(&self) -> &str;

    /// Check that a notification server is reachable and what it supports.
    fn probe(&self) -> Result<Capabilities, NotifyError>;

    /// Display a notification. The future resolves once the notification is
    /// gone; if the user picked an action, its callback has run by then.
    fn show(&self, notification: Notification) -> BoxFuture<'static, Result<(), NotifyError>>;
}

/// Front end used by the dispatch loop. Never fails from the caller's view.
pub struct Notifier {
    backend: Option<Arc<dyn NotificationBackend>>,
    capabilities: Capabilities,
}

impl Notifier {
    /// A notifier that drops everything.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            capabilities: Capabilities::default(),
        }
    }

    /// Probe `backend` once and keep it if a notification server answered.
    pub fn init(enabled: bool, backend: Arc<dyn NotificationBackend>) -> Self {
        if !enabled {
            debug!("Notifications disabled by configuration");
            return Self::disabled();
        }

        match backend.probe() {
            Ok(capabilities) => {
                info!(
                    backend = backend.name(),
                    actions = capabilities.actions,
                    "Notifications enabled"
                );
                Self {
                    backend: Some(backend),
                    capabilities,
                }
            }
            Err(e) => {
                warn!(
                    backend = backend.name(),
                    error = %e,
                    "Notifications are enabled but no notification server could be found, disabling notifications"
                );
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Render a notification in the background. Actions are stripped when
    /// the server cannot show them; failures are logged.
    pub fn show(&self, mut notification: Notification) {
        let Some(backend) = &self.backend else {
            return;
        };
        if !self.capabilities.actions {
            notification.actions.clear();
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(summary = %notification.summary, "No async runtime, dropping notification");
            return;
        };

        let summary = notification.summary.clone();
        let display = backend.show(notification);
        runtime.spawn(async move {
            if let Err(e) = display.await {
                warn!(summary = %summary, error = %e, "Failed to display notification");
            }
        });
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::ids::IdAllocator;
    use crate::message::{CommandKind, DeviceTarget, SasEmoji};
    use crate::queue::{self, WorkerEndpoint};
    use pretty_assertions::assert_eq;

    fn handle() -> (CommandHandle, WorkerEndpoint) {
        let (bridge, worker) = queue::channel();
        (
            CommandHandle::new(Arc::new(IdAllocator::new()), bridge.commands),
            worker,
        )
    }

    fn bob() -> SasTransaction {
        SasTransaction::new("alice", "@bob:home", "BOBDEV", "txn1")
    }

    #[derive(Default)]
    struct Recorder {
        probe_fails: bool,
        actions: bool,
        shown: Arc<Mutex<Vec<Notification>>>,
    }

    impl NotificationBackend for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn probe(&self) -> Result<Capabilities, NotifyError> {
            if self.probe_fails {
                return Err(NotifyError::Unavailable("no server".to_string()));
            }
            Ok(Capabilities {
                actions: self.actions,
            })
        }

        fn show(&self, notification: Notification) -> BoxFuture<'static, Result<(), NotifyError>> {
            self.shown.lock().unwrap().push(notification);
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn test_unverified_devices_wording_and_actions() {
        let (commands, mut worker) = handle();
        let event = UnverifiedDevices {
            pan_user: "alice".to_string(),
            room_id: "!r:example".to_string(),
            room_display_name: "Lounge".to_string(),
        };
        let notification = Notification::unverified_devices(&event, &commands);

        assert_eq!(notification.summary, "Unverified devices.");
        assert_eq!(
            notification.body,
            "There are unverified devices in the room Lounge."
        );
        assert_eq!(notification.category, "im");
        assert_eq!(notification.action_keys(), vec!["send", "cancel"]);

        let id = notification.trigger("send").unwrap();
        let command = worker.commands.try_recv().unwrap();
        assert_eq!(command.id(), id);
        assert_eq!(command.pan_user(), "alice");
        assert_eq!(
            command.kind(),
            &CommandKind::SendAnyways {
                room_id: "!r:example".to_string()
            }
        );
    }

    #[test]
    fn test_verification_invite_actions() {
        let (commands, mut worker) = handle();
        let notification = Notification::verification_invite(&bob(), &commands);
        assert_eq!(notification.summary, "Key verification invite");
        assert_eq!(
            notification.body,
            "@bob:home via BOBDEV has started a key verification process."
        );
        assert_eq!(notification.action_keys(), vec!["accept", "cancel"]);

        notification.trigger("cancel").unwrap();
        let command = worker.commands.try_recv().unwrap();
        assert_eq!(
            command.kind(),
            &CommandKind::CancelSas(DeviceTarget::new("@bob:home", "BOBDEV"))
        );
    }

    #[test]
    fn test_verification_string_joins_emoji() {
        let (commands, mut worker) = handle();
        let show = ShowSas {
            transaction: bob(),
            emoji: vec![
                SasEmoji::new("🐶", "Dog"),
                SasEmoji::new("🔑", "Key"),
                SasEmoji::new("🎸", "Guitar"),
            ],
        };
        let notification = Notification::verification_string(&show, &commands);
        assert_eq!(notification.summary, "Short authentication string");
        assert!(notification.body.ends_with(":\n🐶   🔑   🎸"));
        assert_eq!(notification.action_keys(), vec!["confirm", "cancel"]);

        notification.trigger("confirm").unwrap();
        assert_eq!(
            worker.commands.try_recv().unwrap().kind(),
            &CommandKind::ConfirmSas(DeviceTarget::new("@bob:home", "BOBDEV"))
        );
    }

    #[test]
    fn test_informational_notifications_have_no_actions() {
        let done = Notification::verification_done(&bob());
        assert_eq!(done.summary, "Device successfully verified.");
        assert_eq!(done.body, "Device BOBDEV of user @bob:home successfully verified.");
        assert!(done.actions.is_empty());

        let canceled = Notification::verification_canceled(&SasCanceled {
            transaction: bob(),
            reason: "Timed out".to_string(),
            code: "m.timeout".to_string(),
        });
        assert_eq!(canceled.summary, "Key verification canceled");
        assert!(canceled.actions.is_empty());
    }

    #[test]
    fn test_trigger_unknown_key() {
        let (commands, worker) = handle();
        let notification = Notification::verification_invite(&bob(), &commands);
        assert!(notification.trigger("dismiss").is_none());
        assert!(worker.commands.is_empty());
    }

    #[test]
    fn test_init_disabled_by_config_skips_probe() {
        let backend = Recorder {
            probe_fails: true,
            ..Recorder::default()
        };
        let notifier = Notifier::init(false, Arc::new(backend));
        assert!(!notifier.is_enabled());
    }

    #[test]
    fn test_probe_failure_disables() {
        let shown = Arc::new(Mutex::new(Vec::new()));
        let backend = Recorder {
            probe_fails: true,
            shown: Arc::clone(&shown),
            ..Recorder::default()
        };
        let notifier = Notifier::init(true, Arc::new(backend));
        assert!(!notifier.is_enabled());

        notifier.show(Notification::verification_done(&bob()));
        assert!(shown.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_actions_stripped_without_server_support() {
        let (commands, _worker) = handle();
        let shown = Arc::new(Mutex::new(Vec::new()));
        let backend = Recorder {
            actions: false,
            shown: Arc::clone(&shown),
            ..Recorder::default()
        };
        let notifier = Notifier::init(true, Arc::new(backend));
        assert!(notifier.is_enabled());

        notifier.show(Notification::verification_invite(&bob(), &commands));
        let shown = shown.lock().unwrap();
        assert_eq!(shown.len(), 1);
        assert!(shown[0].actions.is_empty());
    }

    #[tokio::test]
    async fn test_actions_kept_with_server_support() {
        let (commands, _worker) = handle();
        let shown = Arc::new(Mutex::new(Vec::new()));
        let backend = Recorder {
            actions: true,
            shown: Arc::clone(&shown),
            ..Recorder::default()
        };
        let notifier = Notifier::init(true, Arc::new(backend));
        notifier.show(Notification::verification_invite(&bob(), &commands));
        assert_eq!(shown.lock().unwrap()[0].action_keys(), vec!["accept", "cancel"]);
    }
}
