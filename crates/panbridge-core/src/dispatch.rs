//! The dispatch loop: one non-blocking step per tick that turns a worker event
//! into cache refreshes, outward signals and notifications.

use tracing::debug;

use crate::control::ControlSurface;
use crate::message::Event;
use crate::notify::{Notification, Notifier};
use crate::queue::EventReceiver;
use crate::signals::{Signal, SignalBus};

/// Outcome of one dispatch step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The inbound queue was empty.
    Idle,
    /// Exactly one event was handled.
    Dispatched,
}

pub struct Dispatcher {
    events: EventReceiver,
    surface: ControlSurface,
    signals: SignalBus,
    notifier: Notifier,
}

impl Dispatcher {
    pub fn new(
        events: EventReceiver,
        surface: ControlSurface,
        signals: SignalBus,
        notifier: Notifier,
    ) -> Self {
        Self {
            events,
            surface,
            signals,
            notifier,
        }
    }

    pub fn surface(&self) -> &ControlSurface {
        &self.surface
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Events still waiting in the inbound queue.
    pub fn backlog(&self) -> usize {
        self.events.len()
    }

    /// Handle at most one queued event. Never waits.
    pub fn tick(&mut self) -> Tick {
        let Some(event) = self.events.try_next() else {
            return Tick::Idle;
        };
        debug!(kind = event.kind(), "Dispatching event");

        self.handle(event);
        self.events.task_done();
        Tick::Dispatched
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::UpdateDevices => self.surface.update_devices(),
            Event::UpdateUsers => self.surface.update_users(),
            Event::UnverifiedDevices(event) => {
                self.signals.emit(Signal::unverified_devices(&event));
                if self.notifier.is_enabled() {
                    self.notifier.show(Notification::unverified_devices(
                        &event,
                        self.surface.commands(),
                    ));
                }
            }
            Event::InviteSas(sas) => {
                self.signals.emit(Signal::verification_invite(&sas));
                if self.notifier.is_enabled() {
                    self.notifier.show(Notification::verification_invite(
                        &sas,
                        self.surface.commands(),
                    ));
                }
            }
            Event::ShowSas(show) => {
                self.signals.emit(Signal::verification_string(&show));
                if self.notifier.is_enabled() {
                    self.notifier.show(Notification::verification_string(
                        &show,
                        self.surface.commands(),
                    ));
                }
            }
            Event::SasDone(sas) => {
                self.signals.emit(Signal::verification_done(&sas));
                if self.notifier.is_enabled() {
                    self.notifier.show(Notification::verification_done(&sas));
                }
            }
            Event::SasCanceled(canceled) => {
                self.signals.emit(Signal::verification_cancel(&canceled));
                if self.notifier.is_enabled() {
                    self.notifier
                        .show(Notification::verification_canceled(&canceled));
                }
            }
            Event::DaemonResponse(response) => {
                debug!(
                    id = %response.message_id,
                    pan_user = %response.pan_user,
                    code = %response.code,
                    "Relaying daemon response"
                );
                self.signals.emit(Signal::response(&response));
            }
            Event::Unrecognized => debug!("Dropping unrecognized event"),
        }
    }
}
