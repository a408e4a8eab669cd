//! Outward signals raised by the dispatch loop.
//!
//! Signals are fire-and-forget: a [`SignalBus`] publishes them on a broadcast
//! channel for in-process subscribers and keeps a bounded, sequence-numbered
//! history that IPC clients poll. Nobody acknowledges a signal.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::ids::MessageId;
use crate::message::{DaemonResponse, SasCanceled, SasTransaction, ShowSas, UnverifiedDevices};

/// A named outward signal with its documented field set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal")]
pub enum Signal {
    /// Outcome of the command whose id is `id`.
    Response {
        id: MessageId,
        pan_user: String,
        /// `code` and `message` of the daemon's answer.
        message: BTreeMap<String, String>,
    },
    UnverifiedDevices {
        pan_user: String,
        room_id: String,
        room_display_name: String,
    },
    VerificationInvite {
        pan_user: String,
        user_id: String,
        device_id: String,
        transaction_id: String,
    },
    VerificationString {
        pan_user: String,
        user_id: String,
        device_id: String,
        transaction_id: String,
        /// `(emoji, description)` pairs in display order.
        emoji: Vec<(String, String)>,
    },
    VerificationCancel {
        pan_user: String,
        user_id: String,
        device_id: String,
        transaction_id: String,
        reason: String,
        code: String,
    },
    VerificationDone {
        pan_user: String,
        user_id: String,
        device_id: String,
        transaction_id: String,
    },
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Response { .. } => "Response",
            Signal::UnverifiedDevices { .. } => "UnverifiedDevices",
            Signal::VerificationInvite { .. } => "VerificationInvite",
            Signal::VerificationString { .. } => "VerificationString",
            Signal::VerificationCancel { .. } => "VerificationCancel",
            Signal::VerificationDone { .. } => "VerificationDone",
        }
    }

    /// The correlation id, for `Response` signals.
    pub fn response_id(&self) -> Option<MessageId> {
        match self {
            Signal::Response { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn response(response: &DaemonResponse) -> Self {
        let message = BTreeMap::from([
            ("code".to_string(), response.code.clone()),
            ("message".to_string(), response.message.clone()),
        ]);
        Signal::Response {
            id: response.message_id,
            pan_user: response.pan_user.clone(),
            message,
        }
    }

    pub fn unverified_devices(event: &UnverifiedDevices) -> Self {
        Signal::UnverifiedDevices {
            pan_user: event.pan_user.clone(),
            room_id: event.room_id.clone(),
            room_display_name: event.room_display_name.clone(),
        }
    }

    pub fn verification_invite(sas: &SasTransaction) -> Self {
        Signal::VerificationInvite {
            pan_user: sas.pan_user.clone(),
            user_id: sas.user_id.clone(),
            device_id: sas.device_id.clone(),
            transaction_id: sas.transaction_id.clone(),
        }
    }

    pub fn verification_string(show: &ShowSas) -> Self {
        let sas = &show.transaction;
        Signal::VerificationString {
            pan_user: sas.pan_user.clone(),
            user_id: sas.user_id.clone(),
            device_id: sas.device_id.clone(),
            transaction_id: sas.transaction_id.clone(),
            emoji: show
                .emoji
                .iter()
                .map(|e| (e.emoji.clone(), e.description.clone()))
                .collect(),
        }
    }

    pub fn verification_cancel(canceled: &SasCanceled) -> Self {
        let sas = &canceled.transaction;
        Signal::VerificationCancel {
            pan_user: sas.pan_user.clone(),
            user_id: sas.user_id.clone(),
            device_id: sas.device_id.clone(),
            transaction_id: sas.transaction_id.clone(),
            reason: canceled.reason.clone(),
            code: canceled.code.clone(),
        }
    }

    pub fn verification_done(sas: &SasTransaction) -> Self {
        Signal::VerificationDone {
            pan_user: sas.pan_user.clone(),
            user_id: sas.user_id.clone(),
            device_id: sas.device_id.clone(),
            transaction_id: sas.transaction_id.clone(),
        }
    }
}

/// A signal together with its position in the emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalRecord {
    /// Starts at 1 and increases by one per emitted signal.
    pub seq: u64,
    #[serde(flatten)]
    pub signal: Signal,
}

#[derive(Debug)]
struct History {
    records: VecDeque<SignalRecord>,
    capacity: usize,
    next_seq: u64,
}

impl History {
    fn push(&mut self, signal: Signal) -> SignalRecord {
        self.next_seq += 1;
        let record = SignalRecord {
            seq: self.next_seq,
            signal,
        };
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record.clone());
        record
    }
}

/// Publisher for outward signals. Clones share the same channel and history.
#[derive(Debug, Clone)]
pub struct SignalBus {
    tx: broadcast::Sender<SignalRecord>,
    history: Arc<Mutex<History>>,
}

impl SignalBus {
    /// Create a bus retaining the last `capacity` signals.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            history: Arc::new(Mutex::new(History {
                records: VecDeque::with_capacity(capacity),
                capacity,
                next_seq: 0,
            })),
        }
    }

    /// Raise a signal. Returns its sequence number.
    pub fn emit(&self, signal: Signal) -> u64 {
        let record = self.history().push(signal);
        debug!(seq = record.seq, signal = record.signal.name(), "Emitting signal");
        let seq = record.seq;
        // No subscribers is fine: signals are not acknowledged.
        let _ = self.tx.send(record);
        seq
    }

    /// Receive every signal emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SignalRecord> {
        self.tx.subscribe()
    }

    /// Retained signals with a sequence number greater than `after`.
    pub fn since(&self, after: u64) -> Vec<SignalRecord> {
        self.history()
            .records
            .iter()
            .filter(|r| r.seq > after)
            .cloned()
            .collect()
    }

    /// Sequence number of the most recent signal, 0 if none yet.
    pub fn last_seq(&self) -> u64 {
        self.history().next_seq
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SasEmoji;
    use pretty_assertions::assert_eq;

    fn done(txn: &str) -> Signal {
        Signal::verification_done(&SasTransaction::new("alice", "@bob:home", "B1", txn))
    }

    #[test]
    fn test_response_signal_fields() {
        let signal = Signal::response(&DaemonResponse::new(MessageId::new(7), "alice", "0", "ok"));
        assert_eq!(signal.response_id(), Some(MessageId::new(7)));
        let Signal::Response {
            pan_user, message, ..
        } = &signal
        else {
            panic!("expected Response");
        };
        assert_eq!(pan_user, "alice");
        assert_eq!(message["code"], "0");
        assert_eq!(message["message"], "ok");
        assert_eq!(signal.name(), "Response");
    }

    #[test]
    fn test_verification_string_keeps_emoji_order() {
        let show = ShowSas {
            transaction: SasTransaction::new("alice", "@bob:home", "B1", "t1"),
            emoji: vec![SasEmoji::new("🐶", "Dog"), SasEmoji::new("🔑", "Key")],
        };
        let Signal::VerificationString { emoji, .. } = Signal::verification_string(&show) else {
            panic!("expected VerificationString");
        };
        assert_eq!(
            emoji,
            vec![
                ("🐶".to_string(), "Dog".to_string()),
                ("🔑".to_string(), "Key".to_string())
            ]
        );
    }

    #[test]
    fn test_sequence_numbers_start_at_one() {
        let bus = SignalBus::new(8);
        assert_eq!(bus.last_seq(), 0);
        assert_eq!(bus.emit(done("a")), 1);
        assert_eq!(bus.emit(done("b")), 2);
        assert_eq!(bus.last_seq(), 2);

        let seqs: Vec<u64> = bus.since(0).iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(bus.since(1).len(), 1);
        assert!(bus.since(2).is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = SignalBus::new(3);
        for txn in ["a", "b", "c", "d"] {
            bus.emit(done(txn));
        }
        let seqs: Vec<u64> = bus.since(0).iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn test_poisoned_history_keeps_sequence() {
        let bus = SignalBus::new(8);
        bus.emit(done("a"));

        let history = Arc::clone(&bus.history);
        let result = std::thread::spawn(move || {
            let _guard = history.lock().unwrap();
            panic!("emitter panicked while holding the history");
        })
        .join();
        assert!(result.is_err());

        assert_eq!(bus.last_seq(), 1);
        assert_eq!(bus.emit(done("b")), 2);
        assert_eq!(bus.since(0).len(), 2);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = SignalBus::new(1);
        bus.emit(done("a"));
    }

    #[tokio::test]
    async fn test_subscribers_receive_signals() {
        let bus = SignalBus::new(4);
        let mut rx = bus.subscribe();
        bus.emit(done("a"));
        let record = rx.recv().await.unwrap();
        assert_eq!(record.seq, 1);
        assert_eq!(record.signal, done("a"));
    }

    #[test]
    fn test_record_json_shape() {
        let bus = SignalBus::new(4);
        bus.emit(Signal::response(&DaemonResponse::new(
            MessageId::new(7),
            "alice",
            "0",
            "ok",
        )));
        let json = serde_json::to_value(&bus.since(0)[0]).unwrap();
        assert_eq!(json["seq"], 1);
        assert_eq!(json["signal"], "Response");
        assert_eq!(json["id"], 7);
        assert_eq!(json["message"]["code"], "0");
    }
}
