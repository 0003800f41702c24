//! # Message Observers
//!
//! Hooks invoked by a [`Connection`](crate::connection::Connection) each time a whole message
//! crosses the wire. They replace ad-hoc logging inside the I/O path: the default
//! [`TracingObserver`] turns every hook into a `tracing` event, and callers can plug in their
//! own implementation to count traffic or capture messages in tests.

/// The envelope carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ConnectionRequest,
    ConnectionResponse,
    Request,
    Response,
}

/// Receives a callback at every message send/receive boundary.
///
/// Implementations must be cheap: they run while the connection lock is held.
pub trait MessageObserver: Send + Sync {
    /// Called after a message has been fully written and flushed.
    fn message_sent(&self, kind: MessageKind, payload_len: usize) {
        let _ = (kind, payload_len);
    }

    /// Called after a message has been fully read, before it is decoded.
    fn message_received(&self, kind: MessageKind, payload_len: usize) {
        let _ = (kind, payload_len);
    }
}

/// Emits a `tracing` debug event for every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl MessageObserver for TracingObserver {
    fn message_sent(&self, kind: MessageKind, payload_len: usize) {
        tracing::debug!(?kind, payload_len, "message sent");
    }

    fn message_received(&self, kind: MessageKind, payload_len: usize) {
        tracing::debug!(?kind, payload_len, "message received");
    }
}

/// Ignores every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl MessageObserver for NoopObserver {}
