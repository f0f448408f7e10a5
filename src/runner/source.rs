use std::fmt;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::SourceError;
use crate::event::Event;

/// One item delivered by a subscription: an event or a terminal fault.
pub type SourceItem = Result<Event, SourceError>;

/// A live subscription to an event source.
///
/// Events are delivered in stream order over a bounded channel. Dropping the
/// subscription tears it down: the receiver goes away (so producers see a
/// disconnect) and any registered teardown hook runs.
pub struct Subscription {
    rx: Receiver<SourceItem>,
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a receiver.
    #[must_use]
    pub fn new(rx: Receiver<SourceItem>) -> Self {
        Self { rx, teardown: None }
    }

    /// Run `hook` when the subscription is dropped.
    #[must_use]
    pub fn with_teardown(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.teardown = Some(Box::new(hook));
        self
    }

    pub(crate) const fn receiver(&self) -> &Receiver<SourceItem> {
        &self.rx
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("queued", &self.rx.len())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hook) = self.teardown.take() {
            hook();
        }
    }
}

/// A producer of runtime events.
///
/// `subscribe` performs the connection handshake and returns only once the
/// subscription is live; the runner signals readiness right after it returns.
/// It is called once, on the runner's worker thread, so it may block.
pub trait EventSource: Send + 'static {
    /// Short description for diagnostics (endpoint, channel name).
    fn describe(&self) -> String;

    /// Open the subscription.
    fn subscribe(&mut self) -> Result<Subscription, SourceError>;
}

/// Producer half of a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<SourceItem>,
}

impl EventSender {
    /// Deliver an event, blocking while the channel is full.
    pub fn send(&self, event: Event) -> Result<(), SourceError> {
        self.tx.send(Ok(event)).map_err(|_| SourceError::Disconnected {
            endpoint: "channel".to_string(),
        })
    }

    /// Deliver a terminal fault, as a broken connection would.
    pub fn fault(&self, error: SourceError) -> Result<(), SourceError> {
        self.tx.send(Err(error)).map_err(|_| SourceError::Disconnected {
            endpoint: "channel".to_string(),
        })
    }
}

/// In-process event source backed by a bounded channel.
///
/// Events sent before the runner subscribes are queued, not lost.
#[derive(Debug)]
pub struct ChannelSource {
    rx: Option<Receiver<SourceItem>>,
}

impl ChannelSource {
    /// Create a source and its sender with room for `capacity` queued events.
    #[must_use]
    pub fn new(capacity: usize) -> (EventSender, Self) {
        let (tx, rx) = bounded(capacity.max(1));
        (EventSender { tx }, Self { rx: Some(rx) })
    }
}

impl EventSource for ChannelSource {
    fn describe(&self) -> String {
        "channel".to_string()
    }

    fn subscribe(&mut self) -> Result<Subscription, SourceError> {
        self.rx
            .take()
            .map(Subscription::new)
            .ok_or(SourceError::AlreadySubscribed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Process;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn queued_events_survive_until_subscribe() {
        let (tx, mut source) = ChannelSource::new(4);
        tx.send(Event::exec(Process::new(1, "/bin/true", ""))).unwrap();
        let sub = source.subscribe().unwrap();
        let first = sub.receiver().recv().unwrap().unwrap();
        assert_eq!(first.process().binary, "/bin/true");
    }

    #[test]
    fn subscribe_only_once() {
        let (_tx, mut source) = ChannelSource::new(1);
        let _sub = source.subscribe().unwrap();
        assert_eq!(source.subscribe().unwrap_err(), SourceError::AlreadySubscribed);
    }

    #[test]
    fn dropping_subscription_disconnects_sender_and_runs_teardown() {
        let (tx, mut source) = ChannelSource::new(1);
        let torn_down = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&torn_down);
        let sub = source.subscribe().unwrap().with_teardown(move || flag.store(true, Ordering::SeqCst));
        drop(sub);
        assert!(torn_down.load(Ordering::SeqCst));
        assert!(tx.send(Event::exec(Process::default())).is_err());
    }
}
