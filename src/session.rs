//! Session controller: one logical subscription to a push stream.
//!
//! A successful [`Session::connect`] hands the response body to a background
//! driver task. The driver feeds body chunks to the record parser and delivers
//! decoded events; when the stream ends or fails it emits `disconnect` and
//! keeps reconnecting after a fixed delay until [`Session::abort`] is called.
//!
//! Every request is tagged with an id. The session's active request is the
//! single source of truth: a driver whose id is no longer active stops before
//! its next transition, so a pending timer can never revive an aborted session.

use crate::client::SessionBuilder;
use crate::emitter::{ListenerId, Listeners};
use crate::error::{BoxError, SessionError};
use crate::reconnect::ReconnectConfig;
use crate::sse::RecordParser;
use crate::transport::{self, BodyChunks};
use crate::types::{Event, EventKind, HttpResponse, Notification, ReconnectFailure, SessionState};
use futures::future::{AbortHandle as CancelHandle, Abortable};
use futures::Stream;
use parking_lot::Mutex;
use reqwest::Url;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// A subscription to a push stream.
///
/// The session is cloneable; clones share the same connection and listeners.
/// Once connected it keeps streaming, and reconnecting, until [`abort`](Self::abort).
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    uri: Url,
    token: String,
    config: ReconnectConfig,
    http: reqwest::Client,
    listeners: Listeners,
    control: Mutex<Control>,
}

struct Control {
    state: SessionState,
    next_request: u64,
    active: Option<ActiveRequest>,
    origin: Option<String>,
}

/// The request the session currently owns.
struct ActiveRequest {
    id: u64,
    /// Cancels the HTTP exchange in flight, if any.
    pending: Option<CancelHandle>,
    /// Set once the response has begun and a driver task streams it.
    driver: Option<AbortHandle>,
}

impl ActiveRequest {
    /// Stop whatever this request is doing. Dropping the in-flight exchange
    /// closes its socket.
    fn cancel(self) {
        if let Some(pending) = self.pending {
            pending.abort();
        }
        if let Some(driver) = self.driver {
            driver.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("uri", &self.inner.uri.as_str())
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    /// Create a session with the default reconnect configuration.
    ///
    /// No network request is made until [`connect`](Self::connect) is called.
    pub fn new(uri: impl Into<String>, token: impl Into<String>) -> Result<Self, SessionError> {
        SessionBuilder::new(uri, token).build()
    }

    /// Create a session builder for customization.
    pub fn builder(uri: impl Into<String>, token: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(uri, token)
    }

    pub(crate) fn from_parts(
        uri: Url,
        token: String,
        config: ReconnectConfig,
        http: reqwest::Client,
    ) -> Self {
        Session {
            inner: Arc::new(Inner {
                uri,
                token,
                config,
                http,
                listeners: Listeners::new(),
                control: Mutex::new(Control {
                    state: SessionState::Idle,
                    next_request: 0,
                    active: None,
                    origin: None,
                }),
            }),
        }
    }

    /// The stream URI (without the token).
    pub fn uri(&self) -> &Url {
        &self.inner.uri
    }

    /// Reconnect/idle configuration in use.
    pub fn config(&self) -> &ReconnectConfig {
        &self.inner.config
    }

    /// Scheme, host and port of the last connection attempt.
    pub fn origin(&self) -> Option<String> {
        self.inner.control.lock().origin.clone()
    }

    /// Current phase of the session.
    pub fn state(&self) -> SessionState {
        self.inner.control.lock().state
    }

    /// Register a listener for one kind of notification.
    ///
    /// A listener returning `Err` (or panicking) is reported as an `error`
    /// notification; it never interrupts the stream.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Notification) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.inner.listeners.add(kind, listener)
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.inner.listeners.remove(kind, id)
    }

    /// Remove every listener of every kind.
    pub fn remove_all_listeners(&self) {
        self.inner.listeners.clear();
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.listeners.count(kind)
    }

    /// Decoded events as an async stream.
    ///
    /// The stream ends when the session is aborted.
    pub fn events(&self) -> impl Stream<Item = Event> + Send + Unpin {
        let (tx, rx) = futures::channel::mpsc::unbounded();
        self.on(EventKind::Event, move |notification| {
            if let Notification::Event(event) = notification {
                // Receiver may be gone; that only ends this stream.
                let _ = tx.unbounded_send(event.clone());
            }
            Ok(())
        });
        rx
    }

    /// Open the stream.
    ///
    /// Resolves once the server has answered 200 and streaming has begun.
    /// Calling it again replaces the current connection. A non-200 answer
    /// emits a `response` notification before failing with
    /// [`SessionError::Http`].
    pub async fn connect(&self) -> Result<(), SessionError> {
        let id = self.inner.begin_connect();
        info!(uri = %self.inner.uri, "connecting");

        match self.inner.open(id).await {
            Ok(body) => self.inner.start_driver(id, body),
            Err(err) => {
                self.inner.fail_connect(id);
                warn!(uri = %self.inner.uri, error = %err, "connect failed");
                Err(err)
            }
        }
    }

    /// Stop streaming for good.
    ///
    /// Cancels the active request, any pending reconnect and detaches every
    /// listener. No notification fires afterwards. Safe to call repeatedly.
    pub fn abort(&self) {
        let previous = {
            let mut control = self.inner.control.lock();
            control.state = SessionState::Aborted;
            control.active.take()
        };

        if let Some(active) = previous {
            active.cancel();
            info!(uri = %self.inner.uri, "session aborted");
        }

        self.inner.listeners.clear();
    }
}

impl Inner {
    fn begin_connect(&self) -> u64 {
        let mut control = self.control.lock();
        control.next_request += 1;
        let id = control.next_request;

        if let Some(previous) = control.active.take() {
            previous.cancel();
        }

        control.active = Some(ActiveRequest {
            id,
            pending: None,
            driver: None,
        });
        control.state = SessionState::Connecting;
        id
    }

    fn fail_connect(&self, id: u64) {
        let mut control = self.control.lock();
        if control.active.as_ref().is_some_and(|a| a.id == id) {
            control.active = None;
            control.state = SessionState::Idle;
        }
    }

    fn start_driver(self: &Arc<Self>, id: u64, body: BodyChunks) -> Result<(), SessionError> {
        let mut guard = self.control.lock();
        let control = &mut *guard;

        match &mut control.active {
            Some(active) if active.id == id => {
                let driver = tokio::spawn(drive(Arc::clone(self), id, body));
                active.driver = Some(driver.abort_handle());
                control.state = SessionState::Streaming;
                Ok(())
            }
            // Aborted or replaced while waiting for the response
            _ => Err(SessionError::Aborted),
        }
    }

    fn is_current(&self, id: u64) -> bool {
        self.control
            .lock()
            .active
            .as_ref()
            .is_some_and(|a| a.id == id)
    }

    /// Move to `state` if request `id` still owns the session.
    fn transition(&self, id: u64, state: SessionState) -> bool {
        let mut control = self.control.lock();
        if control.active.as_ref().is_some_and(|a| a.id == id) {
            control.state = state;
            true
        } else {
            false
        }
    }

    /// Issue one request for request `id`.
    ///
    /// The exchange is cancelled as soon as the request is aborted or
    /// replaced, without waiting for the server or the idle timeout.
    async fn open(&self, id: u64) -> Result<BodyChunks, SessionError> {
        let registration = {
            let mut control = self.control.lock();
            control.origin = Some(transport::origin(&self.uri));
            match &mut control.active {
                Some(active) if active.id == id => {
                    let (handle, registration) = CancelHandle::new_pair();
                    active.pending = Some(handle);
                    registration
                }
                _ => return Err(SessionError::Aborted),
            }
        };

        let exchange =
            transport::open(&self.http, &self.uri, &self.token, self.config.idle_timeout);
        let result = match Abortable::new(exchange, registration).await {
            Ok(result) => result,
            Err(_) => {
                debug!(uri = %self.uri, "request cancelled");
                return Err(SessionError::Aborted);
            }
        };

        {
            let mut control = self.control.lock();
            match &mut control.active {
                Some(active) if active.id == id => active.pending = None,
                _ => return Err(SessionError::Aborted),
            }
        }

        if let Err(SessionError::Http { status, body, .. }) = &result {
            self.listeners.emit(Notification::Response(HttpResponse {
                status_code: *status,
                body: body.clone(),
            }));
        }

        result
    }

    /// Wait out the reconnect delay and retry until a connection succeeds.
    ///
    /// Returns `None` once the request is no longer active.
    async fn reconnect(&self, id: u64) -> Option<BodyChunks> {
        loop {
            debug!(
                delay_ms = self.config.reconnect_delay.as_millis() as u64,
                "reconnect scheduled"
            );
            tokio::time::sleep(self.config.reconnect_delay).await;

            if !self.transition(id, SessionState::Reconnecting) {
                return None;
            }
            self.listeners.emit(Notification::Reconnect);

            match self.open(id).await {
                Ok(body) => {
                    if !self.transition(id, SessionState::Streaming) {
                        return None;
                    }
                    info!(uri = %self.uri, "reconnected");
                    return Some(body);
                }
                Err(err) => {
                    if !err.is_retryable() || !self.transition(id, SessionState::Disconnected) {
                        return None;
                    }
                    warn!(uri = %self.uri, error = %err, "reconnect failed");
                    self.listeners
                        .emit(Notification::ReconnectError(ReconnectFailure::from(&err)));
                }
            }
        }
    }
}

/// The long-lived task that streams request `id` and its reconnections.
async fn drive(inner: Arc<Inner>, id: u64, mut body: BodyChunks) {
    let mut parser = RecordParser::new();

    loop {
        let failure = loop {
            match body.next_chunk().await {
                Ok(Some(chunk)) => {
                    for event in parser.feed(&chunk) {
                        if !inner.is_current(id) {
                            return;
                        }
                        inner.listeners.emit(Notification::Event(event));
                    }
                }
                Ok(None) => break None,
                Err(err) => break Some(err),
            }
        };

        // Closes the socket, including after an idle timeout
        drop(body);

        match &failure {
            None => info!(uri = %inner.uri, "stream ended"),
            Some(err) => warn!(uri = %inner.uri, error = %err, "stream failed"),
        }

        if !inner.transition(id, SessionState::Disconnected) {
            debug!("session aborted, not reconnecting");
            return;
        }
        inner.listeners.emit(Notification::Disconnect);

        body = match inner.reconnect(id).await {
            Some(body) => body,
            None => return,
        };
        parser.reset();
    }
}
