//! Presentation sink: where the session manager sends everything the user sees.
//!
//! A sink owns no chat state. It renders what it is told and never reports
//! display state back to the session.

use tokio::sync::mpsc;

use crate::state::ChatRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Loading,
    Success,
    Error,
}

pub trait PresentationSink: Send {
    fn append_message(&mut self, role: ChatRole, text: &str) -> MessageHandle;

    /// Appends an entry that carries a transient decoration (cursor, typing dots)
    /// until [`PresentationSink::finish_message`] or removal.
    fn append_pending(&mut self, role: ChatRole, text: &str) -> MessageHandle {
        self.append_message(role, text)
    }

    /// Replaces the entry text in place, keeping any decoration.
    fn update_message(&mut self, handle: MessageHandle, text: &str);

    fn finish_message(&mut self, _handle: MessageHandle) {}

    fn remove_message(&mut self, handle: MessageHandle);

    fn set_status(&mut self, text: &str, kind: StatusKind);

    fn clear_status(&mut self);

    /// Whether a turn is in flight; front ends disable submit while busy.
    fn set_busy(&mut self, _busy: bool) {}
}

/// Sink calls as data, for front ends that render on another task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Append {
        handle: MessageHandle,
        role: ChatRole,
        text: String,
        pending: bool,
    },
    Update {
        handle: MessageHandle,
        text: String,
    },
    Finish(MessageHandle),
    Remove(MessageHandle),
    Status {
        text: String,
        kind: StatusKind,
    },
    ClearStatus,
    Busy(bool),
}

/// Forwards every sink call over an unbounded channel.
///
/// A closed receiver is not an error; the session keeps running headless.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
    next_handle: u64,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<SinkEvent>) -> Self {
        Self { tx, next_handle: 0 }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: SinkEvent) {
        let _ = self.tx.send(event);
    }

    fn allocate(&mut self) -> MessageHandle {
        let handle = MessageHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn append(&mut self, role: ChatRole, text: &str, pending: bool) -> MessageHandle {
        let handle = self.allocate();
        self.send(SinkEvent::Append {
            handle,
            role,
            text: text.to_string(),
            pending,
        });
        handle
    }
}

impl PresentationSink for ChannelSink {
    fn append_message(&mut self, role: ChatRole, text: &str) -> MessageHandle {
        self.append(role, text, false)
    }

    fn append_pending(&mut self, role: ChatRole, text: &str) -> MessageHandle {
        self.append(role, text, true)
    }

    fn update_message(&mut self, handle: MessageHandle, text: &str) {
        self.send(SinkEvent::Update {
            handle,
            text: text.to_string(),
        });
    }

    fn finish_message(&mut self, handle: MessageHandle) {
        self.send(SinkEvent::Finish(handle));
    }

    fn remove_message(&mut self, handle: MessageHandle) {
        self.send(SinkEvent::Remove(handle));
    }

    fn set_status(&mut self, text: &str, kind: StatusKind) {
        self.send(SinkEvent::Status {
            text: text.to_string(),
            kind,
        });
    }

    fn clear_status(&mut self) {
        self.send(SinkEvent::ClearStatus);
    }

    fn set_busy(&mut self, busy: bool) {
        self.send(SinkEvent::Busy(busy));
    }
}
