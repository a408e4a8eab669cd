//! Messages crossing the bridge: commands toward the worker, events back from it.
//!
//! Both enums are closed so the dispatch table stays exhaustive; both are
//! serde-tagged so a worker living in another process can speak JSON.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::ids::MessageId;

/// Passphrase protecting a key export file. Zeroized on drop, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the passphrase as a string slice.
    ///
    /// Only the worker should need this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Passphrase {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase([REDACTED])")
    }
}

impl Drop for Passphrase {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A device addressed by a device-level command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTarget {
    pub user_id: String,
    pub device_id: String,
}

impl DeviceTarget {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }
}

/// Kind-specific payload of a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    ExportKeys {
        file_path: PathBuf,
        passphrase: Passphrase,
    },
    ImportKeys {
        file_path: PathBuf,
        passphrase: Passphrase,
    },
    SendAnyways {
        room_id: String,
    },
    CancelSending {
        room_id: String,
    },
    DeviceVerify(DeviceTarget),
    DeviceUnverify(DeviceTarget),
    DeviceBlacklist(DeviceTarget),
    DeviceUnblacklist(DeviceTarget),
    StartSas(DeviceTarget),
    CancelSas(DeviceTarget),
    AcceptSas(DeviceTarget),
    ConfirmSas(DeviceTarget),
}

impl CommandKind {
    /// Stable label used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::ExportKeys { .. } => "export_keys",
            CommandKind::ImportKeys { .. } => "import_keys",
            CommandKind::SendAnyways { .. } => "send_anyways",
            CommandKind::CancelSending { .. } => "cancel_sending",
            CommandKind::DeviceVerify(_) => "device_verify",
            CommandKind::DeviceUnverify(_) => "device_unverify",
            CommandKind::DeviceBlacklist(_) => "device_blacklist",
            CommandKind::DeviceUnblacklist(_) => "device_unblacklist",
            CommandKind::StartSas(_) => "start_sas",
            CommandKind::CancelSas(_) => "cancel_sas",
            CommandKind::AcceptSas(_) => "accept_sas",
            CommandKind::ConfirmSas(_) => "confirm_sas",
        }
    }

    /// The device this command addresses, for device-level kinds.
    pub fn device(&self) -> Option<&DeviceTarget> {
        match self {
            CommandKind::DeviceVerify(t)
            | CommandKind::DeviceUnverify(t)
            | CommandKind::DeviceBlacklist(t)
            | CommandKind::DeviceUnblacklist(t)
            | CommandKind::StartSas(t)
            | CommandKind::CancelSas(t)
            | CommandKind::AcceptSas(t)
            | CommandKind::ConfirmSas(t) => Some(t),
            _ => None,
        }
    }

    /// The room this command addresses, for room-level kinds.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            CommandKind::SendAnyways { room_id } | CommandKind::CancelSending { room_id } => {
                Some(room_id)
            }
            _ => None,
        }
    }

    /// The key file this command reads or writes, for key import/export.
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            CommandKind::ExportKeys { file_path, .. } | CommandKind::ImportKeys { file_path, .. } => {
                Some(file_path)
            }
            _ => None,
        }
    }
}

/// A request for the worker. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    id: MessageId,
    pan_user: String,
    kind: CommandKind,
}

impl Command {
    pub fn new(id: MessageId, pan_user: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            id,
            pan_user: pan_user.into(),
            kind,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    /// The proxy account the command acts for.
    pub fn pan_user(&self) -> &str {
        &self.pan_user
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn into_kind(self) -> CommandKind {
        self.kind
    }
}

/// Identity of one interactive (SAS) verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SasTransaction {
    pub pan_user: String,
    pub user_id: String,
    pub device_id: String,
    pub transaction_id: String,
}

impl SasTransaction {
    pub fn new(
        pan_user: impl Into<String>,
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        transaction_id: impl Into<String>,
    ) -> Self {
        Self {
            pan_user: pan_user.into(),
            user_id: user_id.into(),
            device_id: device_id.into(),
            transaction_id: transaction_id.into(),
        }
    }
}

/// One short-authentication-string symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SasEmoji {
    pub emoji: String,
    pub description: String,
}

impl SasEmoji {
    pub fn new(emoji: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            emoji: emoji.into(),
            description: description.into(),
        }
    }
}

/// Sending to a room was held back because it contains unverified devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnverifiedDevices {
    pub pan_user: String,
    pub room_id: String,
    pub room_display_name: String,
}

/// The short authentication string is ready for comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowSas {
    #[serde(flatten)]
    pub transaction: SasTransaction,
    pub emoji: Vec<SasEmoji>,
}

/// The other side (or the worker) aborted a verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SasCanceled {
    #[serde(flatten)]
    pub transaction: SasTransaction,
    pub reason: String,
    pub code: String,
}

/// The worker's answer to the command with the same `message_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub message_id: MessageId,
    pub pan_user: String,
    pub code: String,
    pub message: String,
}

impl DaemonResponse {
    pub fn new(
        message_id: MessageId,
        pan_user: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message_id,
            pan_user: pan_user.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A worker-originated message.
///
/// `DaemonResponse` answers a command; every other kind is raised by the
/// daemon on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    UpdateUsers,
    UpdateDevices,
    UnverifiedDevices(UnverifiedDevices),
    InviteSas(SasTransaction),
    ShowSas(ShowSas),
    SasDone(SasTransaction),
    SasCanceled(SasCanceled),
    DaemonResponse(DaemonResponse),
    /// A kind this build does not know about. Dropped by the dispatch loop.
    #[serde(other)]
    Unrecognized,
}

impl Event {
    /// Stable label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::UpdateUsers => "update_users",
            Event::UpdateDevices => "update_devices",
            Event::UnverifiedDevices(_) => "unverified_devices",
            Event::InviteSas(_) => "invite_sas",
            Event::ShowSas(_) => "show_sas",
            Event::SasDone(_) => "sas_done",
            Event::SasCanceled(_) => "sas_canceled",
            Event::DaemonResponse(_) => "daemon_response",
            Event::Unrecognized => "unrecognized",
        }
    }

    /// Decode an event sent by an out-of-process worker.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Decode an event from raw bytes; invalid UTF-8 is a decode error.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_passphrase_is_redacted() {
        let kind = CommandKind::ExportKeys {
            file_path: PathBuf::from("/tmp/keys.txt"),
            passphrase: Passphrase::new("hunter2"),
        };
        let command = Command::new(MessageId::new(3), "@alice:example.org", kind);
        let debug = format!("{command:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_command_accessors() {
        let command = Command::new(
            MessageId::new(1),
            "alice",
            CommandKind::StartSas(DeviceTarget::new("@bob:example.org", "BOBDEVICE")),
        );
        assert_eq!(command.id(), MessageId::new(1));
        assert_eq!(command.pan_user(), "alice");
        assert_eq!(command.kind().name(), "start_sas");
        assert_eq!(
            command.kind().device(),
            Some(&DeviceTarget::new("@bob:example.org", "BOBDEVICE"))
        );
        assert_eq!(command.kind().room_id(), None);
    }

    #[test]
    fn test_room_and_file_accessors() {
        let send = CommandKind::SendAnyways {
            room_id: "!r:example".to_string(),
        };
        assert_eq!(send.room_id(), Some("!r:example"));
        assert!(send.device().is_none());

        let import = CommandKind::ImportKeys {
            file_path: PathBuf::from("/tmp/k.txt"),
            passphrase: "pw".into(),
        };
        assert_eq!(import.file_path(), Some(Path::new("/tmp/k.txt")));
    }

    #[test]
    fn test_event_json_shape() {
        let event = Event::DaemonResponse(DaemonResponse::new(MessageId::new(7), "alice", "0", "ok"));
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "daemon_response");
        assert_eq!(json["message_id"], 7);
        assert_eq!(json["code"], "0");
    }

    #[test]
    fn test_show_sas_from_json() {
        let text = r#"{
            "type": "show_sas",
            "pan_user": "alice",
            "user_id": "@bob:example.org",
            "device_id": "BOBDEVICE",
            "transaction_id": "txn1",
            "emoji": [{"emoji": "🐶", "description": "Dog"}]
        }"#;
        let event = Event::from_json(text).unwrap();
        let Event::ShowSas(show) = event else {
            panic!("expected show_sas, got {event:?}");
        };
        assert_eq!(show.transaction.transaction_id, "txn1");
        assert_eq!(show.emoji, vec![SasEmoji::new("🐶", "Dog")]);
    }

    #[test]
    fn test_unknown_event_kind_is_unrecognized() {
        let event = Event::from_json(r#"{"type": "room_key_request"}"#).unwrap();
        assert_eq!(event, Event::Unrecognized);
        assert_eq!(event.kind(), "unrecognized");
    }

    #[test]
    fn test_unit_events_from_json() {
        assert_eq!(
            Event::from_json(r#"{"type": "update_users"}"#).unwrap(),
            Event::UpdateUsers
        );
        assert_eq!(
            Event::from_json(r#"{"type": "update_devices"}"#).unwrap(),
            Event::UpdateDevices
        );
    }

    #[test]
    fn test_from_slice_rejects_invalid_utf8() {
        assert_eq!(
            Event::from_slice(b"{\"type\": \"update_users\"}").unwrap(),
            Event::UpdateUsers
        );
        assert!(Event::from_slice(b"\xff\xfe garbage").is_err());
        assert!(Event::from_slice(b"{\"type\": \"\xff\"}").is_err());
    }
}
