//! Notification backend driving the freedesktop `notify-send` CLI.
//!
//! Capabilities are discovered by asking the binary itself: `--version`
//! proves a working install, `--help` tells whether `--action` exists. With
//! actions, `--wait` keeps the process alive until the notification closes
//! and the chosen action key is printed on stdout.

use std::path::PathBuf;
use std::process::Stdio;

use crate::BoxFuture;

use super::{Capabilities, Notification, NotificationBackend, NotifyError};

pub struct NotifySendBackend {
    /// `notify-send` binary path.
    bin: PathBuf,
    /// Application name shown by the notification server.
    app_name: String,
}

impl NotifySendBackend {
    pub fn new(bin: impl Into<PathBuf>, app_name: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            app_name: app_name.into(),
        }
    }

    /// Build the `notify-send` argument list for a notification.
    fn build_args(&self, notification: &Notification) -> Vec<String> {
        let mut args = vec![
            format!("--app-name={}", self.app_name),
            format!("--category={}", notification.category),
        ];

        for action in &notification.actions {
            args.push(format!("--action={}={}", action.key, action.label));
        }
        if !notification.actions.is_empty() {
            args.push("--wait".to_string());
        }

        args.push(notification.summary.clone());
        args.push(notification.body.clone());
        args
    }
}

impl Default for NotifySendBackend {
    fn default() -> Self {
        Self::new("notify-send", "pantalaimon")
    }
}

impl NotificationBackend for NotifySendBackend {
    fn name(&self) -> &str {
        "notify-send"
    }

    fn probe(&self) -> Result<Capabilities, NotifyError> {
        let version = std::process::Command::new(&self.bin)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| NotifyError::Unavailable(format!("{}: {e}", self.bin.display())))?;
        if !version.success() {
            return Err(NotifyError::Unavailable(format!(
                "{} --version exited with {version}",
                self.bin.display()
            )));
        }

        let help = std::process::Command::new(&self.bin)
            .arg("--help")
            .stderr(Stdio::null())
            .output()
            .map_err(|e| NotifyError::Unavailable(format!("{}: {e}", self.bin.display())))?;
        let help = String::from_utf8_lossy(&help.stdout);

        Ok(Capabilities {
            actions: help.contains("--action") && help.contains("--wait"),
        })
    }

    fn show(&self, notification: Notification) -> BoxFuture<'static, Result<(), NotifyError>> {
        let args = self.build_args(&notification);
        let bin = self.bin.clone();

        Box::pin(async move {
            tracing::debug!(
                backend = "notify-send",
                summary = %notification.summary,
                actions = notification.actions.len(),
                "Showing notification"
            );

            let output = tokio::process::Command::new(&bin)
                .args(&args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| NotifyError::Display(format!("failed to spawn notify-send: {e}")))?;

            if !output.status.success() {
                return Err(NotifyError::Display(format!(
                    "notify-send exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }

            let chosen = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if chosen.is_empty() {
                return Ok(());
            }
            match notification.trigger(&chosen) {
                Some(id) => tracing::info!(action = %chosen, id = %id, "Notification action triggered"),
                None => tracing::debug!(output = %chosen, "notify-send reported no known action"),
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MessageId;
    use crate::notify::NotificationAction;

    #[test]
    fn test_backend_name() {
        let backend = NotifySendBackend::default();
        assert_eq!(backend.name(), "notify-send");
        assert_eq!(backend.app_name, "pantalaimon");
    }

    #[test]
    fn test_build_args_informational() {
        let backend = NotifySendBackend::default();
        let notification = Notification::new("Device successfully verified.", "body");

        let args = backend.build_args(&notification);
        assert_eq!(
            args,
            vec![
                "--app-name=pantalaimon".to_string(),
                "--category=im".to_string(),
                "Device successfully verified.".to_string(),
                "body".to_string(),
            ]
        );
    }

    #[test]
    fn test_build_args_with_actions_waits() {
        let backend = NotifySendBackend::new("/usr/bin/notify-send", "panbridge");
        let notification = Notification::new("Unverified devices.", "body")
            .with_action(NotificationAction::new("send", "Send anyways", || {
                MessageId::new(0)
            }))
            .with_action(NotificationAction::new("cancel", "Cancel sending", || {
                MessageId::new(1)
            }));

        let args = backend.build_args(&notification);
        assert!(args.contains(&"--app-name=panbridge".to_string()));
        assert!(args.contains(&"--action=send=Send anyways".to_string()));
        assert!(args.contains(&"--action=cancel=Cancel sending".to_string()));
        assert!(args.contains(&"--wait".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("body"));
    }

    #[test]
    fn test_probe_missing_binary() {
        let backend = NotifySendBackend::new("/nonexistent/notify-send", "pantalaimon");
        assert!(matches!(backend.probe(), Err(NotifyError::Unavailable(_))));
    }
}
