//! gRPC event transport.
//!
//! The agent's `GetEvents` RPC streams JSON-encoded [`Event`]s. This module
//! provides both ends:
//!
//! - [`GrpcEventSource`], an [`EventSource`] that connects to an agent and
//!   forwards decoded events to the runner;
//! - [`EventStreamService`], a server that fans events published to an
//!   [`EventFeed`] out to every connected client. Useful for replaying
//!   captured streams and for tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::event::Event;
use crate::filter::EventFilter;
use crate::runner::{EventSource, SourceItem, Subscription};

pub mod proto {
    #![allow(missing_docs, clippy::pedantic)]
    tonic::include_proto!("eventcheck");
}

pub use proto::event_stream_client::EventStreamClient;
use proto::event_stream_server::{EventStream, EventStreamServer};

/// Maximum size of one event JSON payload.
pub const MAX_EVENT_JSON_BYTES: usize = 1024 * 1024; // 1 MiB

/// Default queue depth between the gRPC reader and the runner.
const DEFAULT_CAPACITY: usize = 1024;

/// Bound on how long the handshake may take.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Decode one record, enforcing the size cap.
pub fn decode_record(record: &proto::EventRecord, max_bytes: usize) -> Result<Event, SourceError> {
    if record.event_json.len() > max_bytes {
        return Err(SourceError::Decode {
            message: format!(
                "event record of {} bytes exceeds limit of {max_bytes}",
                record.event_json.len()
            ),
        });
    }
    serde_json::from_slice(&record.event_json).map_err(|e| SourceError::Decode {
        message: format!("invalid event JSON: {e}"),
    })
}

/// Encode one event, enforcing the size cap.
pub fn encode_record(event: &Event, max_bytes: usize) -> Result<proto::EventRecord, Status> {
    let event_json = serde_json::to_vec(event)
        .map_err(|e| Status::internal(format!("failed to serialize event: {e}")))?;
    if event_json.len() > max_bytes {
        return Err(Status::resource_exhausted("event exceeds maximum size"));
    }
    Ok(proto::EventRecord { event_json })
}

// ----------------------------------------------------------------------------
// Client
// ----------------------------------------------------------------------------

/// Event source backed by an agent's `GetEvents` stream.
///
/// `subscribe` returns once the agent has accepted the call, so events the
/// agent emits after that point are delivered.
#[derive(Debug, Clone)]
pub struct GrpcEventSource {
    endpoint: String,
    filter: EventFilter,
    capacity: usize,
    max_record_bytes: usize,
    connect_timeout: Duration,
}

impl GrpcEventSource {
    /// Source for the agent at `endpoint` (e.g. `http://127.0.0.1:54321`).
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            filter: EventFilter::default(),
            capacity: DEFAULT_CAPACITY,
            max_record_bytes: MAX_EVENT_JSON_BYTES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Forward the namespace lists of `filter` to the agent as hints.
    #[must_use]
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Queue depth between the reader thread and the runner.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Largest accepted record.
    #[must_use]
    pub const fn with_max_record_bytes(mut self, max: usize) -> Self {
        self.max_record_bytes = max;
        self
    }

    /// Handshake deadline.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn request(&self) -> proto::GetEventsRequest {
        proto::GetEventsRequest {
            allow_namespaces: self.filter.allow_namespaces.clone(),
            deny_namespaces: self.filter.deny_namespaces.clone(),
        }
    }
}

impl EventSource for GrpcEventSource {
    fn describe(&self) -> String {
        self.endpoint.clone()
    }

    fn subscribe(&mut self) -> Result<Subscription, SourceError> {
        let (tx, rx) = bounded::<SourceItem>(self.capacity);
        let (ready_tx, ready_rx) = bounded::<Result<(), SourceError>>(1);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let reader = Reader {
            endpoint: self.endpoint.clone(),
            request: self.request(),
            max_record_bytes: self.max_record_bytes,
            tx,
        };
        thread::Builder::new()
            .name("eventcheck-grpc".to_string())
            .spawn(move || reader.run(&ready_tx, stop_rx))
            .map_err(|e| SourceError::Connect {
                endpoint: self.endpoint.clone(),
                message: format!("failed to spawn reader thread: {e}"),
            })?;

        match ready_rx.recv_timeout(self.connect_timeout) {
            Ok(Ok(())) => Ok(Subscription::new(rx).with_teardown(move || {
                let _ = stop_tx.send(());
            })),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let _ = stop_tx.send(());
                Err(SourceError::Connect {
                    endpoint: self.endpoint.clone(),
                    message: format!("handshake timed out after {:?}", self.connect_timeout),
                })
            }
        }
    }
}

struct Reader {
    endpoint: String,
    request: proto::GetEventsRequest,
    max_record_bytes: usize,
    tx: Sender<SourceItem>,
}

impl Reader {
    fn run(self, ready: &Sender<Result<(), SourceError>>, stop: tokio::sync::oneshot::Receiver<()>) {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                let _ = ready.send(Err(self.connect_error(format!("failed to build runtime: {e}"))));
                return;
            }
        };
        runtime.block_on(self.stream(ready, stop));
    }

    fn connect_error(&self, message: String) -> SourceError {
        SourceError::Connect {
            endpoint: self.endpoint.clone(),
            message,
        }
    }

    async fn stream(self, ready: &Sender<Result<(), SourceError>>, mut stop: tokio::sync::oneshot::Receiver<()>) {
        let mut client = match EventStreamClient::connect(self.endpoint.clone()).await {
            Ok(c) => c,
            Err(e) => {
                let _ = ready.send(Err(self.connect_error(e.to_string())));
                return;
            }
        };
        let mut stream = match client.get_events(self.request.clone()).await {
            Ok(resp) => resp.into_inner(),
            Err(status) => {
                let _ = ready.send(Err(self.connect_error(status.message().to_string())));
                return;
            }
        };
        if ready.send(Ok(())).is_err() {
            return;
        }
        debug!(endpoint = %self.endpoint, "event stream open");

        loop {
            let next = tokio::select! {
                _ = &mut stop => break,
                next = stream.message() => next,
            };
            let item = match next {
                Ok(Some(record)) => decode_record(&record, self.max_record_bytes),
                Ok(None) => {
                    let _ = self.tx.send(Err(SourceError::Disconnected {
                        endpoint: self.endpoint.clone(),
                    }));
                    break;
                }
                Err(status) => {
                    warn!(endpoint = %self.endpoint, %status, "event stream broke");
                    let _ = self.tx.send(Err(SourceError::Disconnected {
                        endpoint: self.endpoint.clone(),
                    }));
                    break;
                }
            };
            let fatal = item.is_err();
            if self.tx.send(item).is_err() || fatal {
                break;
            }
        }
        debug!(endpoint = %self.endpoint, "event stream closed");
    }
}

// ----------------------------------------------------------------------------
// Server
// ----------------------------------------------------------------------------

struct Subscriber {
    id: u64,
    filter: EventFilter,
    tx: Sender<Event>,
}

/// Fan-out hub feeding every connected `GetEvents` stream.
#[derive(Default)]
pub struct EventFeed {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFeed")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventFeed {
    /// Empty feed.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver `event` to every subscriber whose namespace hints accept it,
    /// dropping subscribers whose stream has closed. Returns the number of
    /// subscribers reached.
    ///
    /// Blocks while an accepting subscriber's queue is full. The subscriber
    /// list is not locked during delivery, so new clients can still register.
    pub fn publish(&self, event: &Event) -> usize {
        let targets: Vec<(u64, Sender<Event>)> = self
            .lock()
            .iter()
            .filter(|s| s.filter.accepts(event))
            .map(|s| (s.id, s.tx.clone()))
            .collect();

        let mut reached = 0;
        let mut closed = Vec::new();
        for (id, tx) in targets {
            if tx.send(event.clone()).is_ok() {
                reached += 1;
            } else {
                closed.push(id);
            }
        }
        if !closed.is_empty() {
            self.lock().retain(|s| !closed.contains(&s.id));
        }
        reached
    }

    /// Connected subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, filter: EventFilter) -> Receiver<Event> {
        let (tx, rx) = bounded(DEFAULT_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push(Subscriber { id, filter, tx });
        rx
    }
}

/// gRPC `EventStream` service backed by an [`EventFeed`].
#[derive(Debug, Clone)]
pub struct EventStreamService {
    feed: Arc<EventFeed>,
}

impl EventStreamService {
    /// Service streaming everything published to `feed`.
    #[must_use]
    pub const fn new(feed: Arc<EventFeed>) -> Self {
        Self { feed }
    }

    /// Wrap for `tonic::transport::Server::add_service`.
    #[must_use]
    pub fn into_server(self) -> EventStreamServer<Self> {
        EventStreamServer::new(self)
    }
}

#[tonic::async_trait]
impl EventStream for EventStreamService {
    type GetEventsStream = ReceiverStream<Result<proto::EventRecord, Status>>;

    async fn get_events(
        &self,
        request: Request<proto::GetEventsRequest>,
    ) -> Result<Response<Self::GetEventsStream>, Status> {
        let req = request.into_inner();
        let mut filter = EventFilter::new();
        filter.allow_namespaces = req.allow_namespaces;
        filter.deny_namespaces = req.deny_namespaces;

        // Registered before the response is returned, so the client's
        // handshake completing means it will see every later publish.
        let events = self.feed.register(filter);

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<proto::EventRecord, Status>>(128);
        tokio::task::spawn_blocking(move || loop {
            match events.recv_timeout(Duration::from_secs(1)) {
                Ok(event) => {
                    let record = encode_record(&event, MAX_EVENT_JSON_BYTES);
                    let fatal = record.is_err();
                    if tx.blocking_send(record).is_err() || fatal {
                        break;
                    }
                }
                // Poll for client disconnect.
                Err(RecvTimeoutError::Timeout) => {
                    if tx.is_closed() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
