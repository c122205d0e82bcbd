//! Actor-side plumbing for compute actors.
//!
//! A compute actor runs as a tokio task that drains a bounded mailbox of
//! [`Envelope`]s. Callers talk to it through an [`ActorRef`]; replies go to
//! the [`ReplyTo`] address carried by the envelope, tagged with the
//! [`CorrelationId`] of the request. An [`Inbox`] plays the role of a scoped
//! actor that can send requests and receive replies.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::error::{ComputeError, Result};
use crate::message::{IntoMessage, Message};

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique actor identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(u64);

impl ActorId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.0)
    }
}

/// Ties a reply to the request it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_CORRELATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A reply delivered to an [`Inbox`] or a pending [`ActorRef::ask`].
#[derive(Debug, Clone)]
pub struct Reply {
    /// Actor that produced the reply.
    pub from: ActorId,
    /// Correlation id of the request.
    pub correlation: CorrelationId,
    /// Reply payload.
    pub content: Message,
}

enum ReplySink {
    Inbox(mpsc::UnboundedSender<Reply>),
    Promise(oneshot::Sender<Reply>),
}

/// Where the reply to one request goes.
pub struct ReplyTo {
    sink: ReplySink,
    correlation: CorrelationId,
}

impl ReplyTo {
    /// Reply address backed by an unbounded channel.
    pub fn channel(sender: mpsc::UnboundedSender<Reply>, correlation: CorrelationId) -> Self {
        Self {
            sink: ReplySink::Inbox(sender),
            correlation,
        }
    }

    /// Reply address backed by a oneshot promise.
    ///
    /// Dropping the address without delivering closes the promise, which the
    /// waiting side observes as [`ComputeError::NoReply`].
    pub fn promise(sender: oneshot::Sender<Reply>, correlation: CorrelationId) -> Self {
        Self {
            sink: ReplySink::Promise(sender),
            correlation,
        }
    }

    /// Correlation id replies will carry.
    pub fn correlation(&self) -> CorrelationId {
        self.correlation
    }

    /// Deliver `content`. Returns `false` if the requester is gone.
    pub fn deliver(self, from: ActorId, content: Message) -> bool {
        let reply = Reply {
            from,
            correlation: self.correlation,
            content,
        };
        match self.sink {
            ReplySink::Inbox(sender) => sender.send(reply).is_ok(),
            ReplySink::Promise(sender) => sender.send(reply).is_ok(),
        }
    }
}

impl fmt::Debug for ReplyTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.sink {
            ReplySink::Inbox(_) => "inbox",
            ReplySink::Promise(_) => "promise",
        };
        f.debug_struct("ReplyTo")
            .field("sink", &kind)
            .field("correlation", &self.correlation)
            .finish()
    }
}

/// One mailbox entry.
#[derive(Debug)]
pub struct Envelope {
    /// Request payload.
    pub content: Message,
    /// Reply address, if the sender expects a reply.
    pub reply_to: Option<ReplyTo>,
}

/// Counters of a running compute actor.
#[derive(Debug, Default)]
pub struct ActorStats {
    received: AtomicU64,
    unmatched: AtomicU64,
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`ActorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActorStatsSnapshot {
    /// Envelopes taken from the mailbox.
    pub received: u64,
    /// Messages that did not match the argument descriptors.
    pub unmatched: u64,
    /// Commands launched on the device.
    pub dispatched: u64,
    /// Commands whose results were read back and packed.
    pub completed: u64,
    /// Commands abandoned after an error.
    pub failed: u64,
}

impl ActorStats {
    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unmatched(&self) {
        self.unmatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> ActorStatsSnapshot {
        ActorStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a running compute actor.
///
/// Cloning is cheap. The actor stops once every handle is dropped and its
/// mailbox is drained; commands already on the device still reply.
#[derive(Clone)]
pub struct ActorRef {
    id: ActorId,
    mailbox: mpsc::Sender<Envelope>,
    stats: Arc<ActorStats>,
}

impl ActorRef {
    pub(crate) fn new(id: ActorId, mailbox: mpsc::Sender<Envelope>, stats: Arc<ActorStats>) -> Self {
        Self { id, mailbox, stats }
    }

    /// Actor id.
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Current counters.
    pub fn stats(&self) -> ActorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Check if the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Send a message without a reply address.
    pub async fn send(&self, content: impl IntoMessage) -> Result<()> {
        self.deliver(Envelope {
            content: content.into_message(),
            reply_to: None,
        })
        .await
    }

    /// Send a message, failing instead of waiting when the mailbox is full.
    pub fn try_send(&self, content: impl IntoMessage, reply_to: Option<ReplyTo>) -> Result<()> {
        let envelope = Envelope {
            content: content.into_message(),
            reply_to,
        };
        self.mailbox.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => ComputeError::MailboxFull,
            TrySendError::Closed(_) => ComputeError::MailboxClosed,
        })
    }

    /// Send a message whose reply goes to `reply_to`.
    pub async fn send_with_reply(&self, content: impl IntoMessage, reply_to: ReplyTo) -> Result<()> {
        self.deliver(Envelope {
            content: content.into_message(),
            reply_to: Some(reply_to),
        })
        .await
    }

    /// Send a request and wait up to `timeout` for the reply.
    ///
    /// Returns [`ComputeError::NoReply`] when the actor dropped the request,
    /// either because it did not match or because the command failed.
    pub async fn ask(&self, content: impl IntoMessage, timeout: Duration) -> Result<Message> {
        let correlation = CorrelationId::next();
        let (tx, rx) = oneshot::channel();
        self.send_with_reply(content, ReplyTo::promise(tx, correlation))
            .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply.content),
            Ok(Err(_)) => Err(ComputeError::NoReply),
            Err(_) => Err(ComputeError::Timeout(timeout)),
        }
    }

    async fn deliver(&self, envelope: Envelope) -> Result<()> {
        self.mailbox
            .send(envelope)
            .await
            .map_err(|_| ComputeError::MailboxClosed)
    }
}

impl fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A scoped actor: sends requests and collects their replies.
pub struct Inbox {
    id: ActorId,
    sender: mpsc::UnboundedSender<Reply>,
    receiver: mpsc::UnboundedReceiver<Reply>,
}

impl Inbox {
    /// Create an empty inbox.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            id: ActorId::next(),
            sender,
            receiver,
        }
    }

    /// Inbox id.
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// A fresh reply address pointing at this inbox.
    pub fn reply_to(&self) -> ReplyTo {
        ReplyTo::channel(self.sender.clone(), CorrelationId::next())
    }

    /// Send a request to `actor`; its reply lands in this inbox.
    pub async fn send(&self, actor: &ActorRef, content: impl IntoMessage) -> Result<CorrelationId> {
        let reply_to = self.reply_to();
        let correlation = reply_to.correlation();
        trace!(inbox = %self.id, actor = %actor.id(), %correlation, "sending request");
        actor.send_with_reply(content, reply_to).await?;
        Ok(correlation)
    }

    /// Wait up to `timeout` for the next reply.
    pub async fn receive(&mut self, timeout: Duration) -> Option<Reply> {
        tokio::time::timeout(timeout, self.receiver.recv())
            .await
            .ok()
            .flatten()
    }

    /// Take a reply if one is already waiting.
    pub fn try_receive(&mut self) -> Option<Reply> {
        self.receiver.try_recv().ok()
    }
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_actor(capacity: usize) -> (ActorRef, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ActorRef::new(ActorId::next(), tx, Arc::default()), rx)
    }

    #[test]
    fn test_ids_are_unique() {
        let a = CorrelationId::next();
        let b = CorrelationId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert_ne!(ActorId::next(), ActorId::next());
    }

    #[tokio::test]
    async fn test_inbox_round_trip() {
        let (actor, mut mailbox) = test_actor(4);
        let mut inbox = Inbox::new();

        let correlation = inbox
            .send(&actor, (vec![1i32, 2],))
            .await
            .expect("Failed to send");

        let envelope = mailbox.recv().await.expect("Mailbox closed");
        let reply_to = envelope.reply_to.expect("Missing reply address");
        assert_eq!(reply_to.correlation(), correlation);
        assert!(reply_to.deliver(actor.id(), envelope.content));

        let reply = inbox
            .receive(Duration::from_secs(1))
            .await
            .expect("No reply");
        assert_eq!(reply.correlation, correlation);
        assert_eq!(reply.from, actor.id());
        assert_eq!(reply.content.get::<Vec<i32>>(0), Some(&vec![1, 2]));
    }

    #[tokio::test]
    async fn test_ask_dropped_request() {
        let (actor, mut mailbox) = test_actor(4);
        let responder = tokio::spawn(async move {
            // Drop the envelope, and with it the promise.
            let _ = mailbox.recv().await;
        });

        let result = actor.ask((1u8,), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ComputeError::NoReply)));
        responder.await.expect("Responder panicked");
    }

    #[tokio::test]
    async fn test_ask_timeout() {
        let (actor, _mailbox) = test_actor(4);
        let result = actor.ask((1u8,), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ComputeError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_closed_and_full_mailbox() {
        let (actor, mailbox) = test_actor(1);
        actor.try_send((1u8,), None).expect("First send should fit");
        assert!(matches!(
            actor.try_send((2u8,), None),
            Err(ComputeError::MailboxFull)
        ));

        drop(mailbox);
        assert!(actor.is_closed());
        assert!(matches!(
            actor.send((3u8,)).await,
            Err(ComputeError::MailboxClosed)
        ));
    }

    #[tokio::test]
    async fn test_receive_times_out_when_empty() {
        let mut inbox = Inbox::new();
        assert!(inbox.receive(Duration::from_millis(10)).await.is_none());
        assert!(inbox.try_receive().is_none());
    }
}
