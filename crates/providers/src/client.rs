//! Unified client: one streaming interface over every configured provider.
//!
//! [`UnifiedClient::generate`] returns a lazy [`EventStream`]: nothing is
//! opened until it is first polled. Failures before any content-bearing event
//! are retried with backoff; after content they end the stream with a fatal
//! error instead. Cancellation is observed at every suspension point and
//! always ends the stream with `Canceled`.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use switchboard_core::{
    CanonicalRequest, ProtocolError, ProviderConfig, RetryPolicy, StreamErrorKind, StreamEvent,
    TransportError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::adapter::{DecodeState, PartialEvent};
use crate::normalizer::EventNormalizer;
use crate::retry::backoff_delay;
use crate::router::{ProviderRouter, Route};
use crate::transport::{ByteStream, Transport};

/// Routes canonical requests to providers and streams normalized events back.
pub struct UnifiedClient {
    router: ProviderRouter,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl UnifiedClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            router: ProviderRouter::new(),
            transport,
            retry: RetryPolicy::default(),
        }
    }

    /// Build a client from a set of provider configs; the first is the default.
    pub fn from_configs(
        transport: Arc<dyn Transport>,
        configs: impl IntoIterator<Item = ProviderConfig>,
    ) -> Self {
        configs
            .into_iter()
            .fold(Self::new(transport), |client, config| client.with_provider(config))
    }

    pub fn with_provider(mut self, config: ProviderConfig) -> Self {
        self.router.register(config);
        self
    }

    pub fn with_default_provider(mut self, name: &str) -> Result<Self, ProtocolError> {
        self.router.set_default(name)?;
        Ok(self)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Stream a response. Cancel through [`EventStream::cancel`].
    pub fn generate(&self, request: CanonicalRequest) -> EventStream {
        self.generate_with_cancel(request, CancellationToken::new())
    }

    /// Stream a response, stopping when `cancel` fires.
    pub fn generate_with_cancel(&self, request: CanonicalRequest, cancel: CancellationToken) -> EventStream {
        let route = self
            .router
            .resolve(&request.model)
            .and_then(|route| route.check(&request.requires).map(|()| route));

        let driver = Driver {
            request,
            route,
            transport: Arc::clone(&self.transport),
            retry: self.retry,
            cancel: cancel.clone(),
            phase: Phase::Idle,
            queue: VecDeque::new(),
            normalizer: EventNormalizer::new(),
            decode: DecodeState::new(),
            attempt: 0,
            committed: false,
            done: false,
        };

        let inner = futures::stream::unfold(driver, |mut driver| async move {
            let event = driver.next_event().await?;
            Some((event, driver))
        });

        EventStream {
            inner: Box::pin(inner),
            cancel,
        }
    }
}

impl std::fmt::Debug for UnifiedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiedClient")
            .field("providers", &self.router.list())
            .field("default_provider", &self.router.default_provider())
            .field("retry", &self.retry)
            .finish()
    }
}

/// A cancellable stream of canonical events for one request.
///
/// Ends right after its single terminal event (`Stop`, fatal `Error`, or
/// `Canceled`).
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = StreamEvent> + Send>>,
    cancel: CancellationToken,
}

impl EventStream {
    /// Cancel the request. The next event observed is `Canceled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

enum Phase {
    /// About to open a transport
    Idle,
    Streaming(ByteStream),
    /// Waiting before the next attempt
    Backoff(Duration),
    /// No more I/O; drain the queue
    Finished,
}

struct Driver {
    request: CanonicalRequest,
    route: Result<Route, ProtocolError>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    phase: Phase,
    queue: VecDeque<StreamEvent>,
    normalizer: EventNormalizer,
    decode: DecodeState,
    attempt: u32,
    /// A content-bearing event was produced in this attempt
    committed: bool,
    /// The terminal event has been handed out
    done: bool,
}

impl Driver {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if self.done {
                return None;
            }

            if self.cancel.is_cancelled() {
                debug!(model = %self.request.model, "Request canceled");
                self.queue.clear();
                self.phase = Phase::Finished;
                self.done = true;
                return Some(StreamEvent::Canceled);
            }

            if let Some(event) = self.queue.pop_front() {
                if event.is_terminal() {
                    self.queue.clear();
                    self.phase = Phase::Finished;
                    self.done = true;
                }
                return Some(event);
            }

            match &mut self.phase {
                Phase::Finished => {
                    self.done = true;
                    return None;
                }

                Phase::Idle => self.open().await,

                Phase::Backoff(delay) => {
                    let delay = *delay;
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => continue,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.normalizer.reset();
                    self.decode = DecodeState::new();
                    self.queue.clear();
                    self.phase = Phase::Idle;
                }

                Phase::Streaming(body) => {
                    let next = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => continue,
                        chunk = body.next() => chunk,
                    };
                    match next {
                        Some(Ok(bytes)) => {
                            let partials = match &self.route {
                                Ok(route) => route.adapter.decode(&bytes, &mut self.decode),
                                Err(_) => Vec::new(),
                            };
                            self.ingest(partials);
                            if self.normalizer.is_terminated() && matches!(self.phase, Phase::Streaming(_)) {
                                self.phase = Phase::Finished;
                            }
                        }
                        Some(Err(error)) => self.fail(error),
                        None => self.end_of_body(),
                    }
                }
            }
        }
    }

    async fn open(&mut self) {
        let route = match &self.route {
            Ok(route) => route.clone(),
            Err(error) => {
                warn!(model = %self.request.model, error = %error, "Request rejected");
                let message = error.to_string();
                self.terminate(StreamEvent::fatal(StreamErrorKind::Protocol, message, false));
                return;
            }
        };

        let wire = match route.adapter.encode(&self.request, &route.model, &route.provider) {
            Ok(wire) => wire,
            Err(error) => {
                warn!(provider = %route.provider.name, error = %error, "Failed to encode request");
                self.terminate(StreamEvent::fatal(StreamErrorKind::Protocol, error.to_string(), false));
                return;
            }
        };

        self.attempt += 1;
        debug!(
            provider = %route.provider.name,
            model = %route.model,
            attempt = self.attempt,
            "Sending streaming request"
        );

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            opened = self.transport.open(wire) => opened,
        };

        match opened {
            Ok(body) => self.phase = Phase::Streaming(body),
            Err(error) => self.fail(error),
        }
    }

    /// Push adapter output through the normalizer into the queue.
    fn ingest(&mut self, partials: Vec<PartialEvent>) {
        for partial in partials {
            if let PartialEvent::ProviderFailure { message, retryable } = partial {
                self.fail(TransportError::Provider { message, retryable });
                return;
            }
            for event in self.normalizer.accept(partial) {
                if event.is_content() {
                    self.committed = true;
                }
                self.queue.push_back(event);
            }
        }
    }

    fn end_of_body(&mut self) {
        let partials = match &self.route {
            Ok(route) => route.adapter.flush(&mut self.decode),
            Err(_) => Vec::new(),
        };
        self.ingest(partials);
        if !matches!(self.phase, Phase::Streaming(_)) {
            return;
        }
        if self.normalizer.is_terminated() {
            self.phase = Phase::Finished;
        } else {
            self.fail(TransportError::Interrupted("stream ended before a stop event".into()));
        }
    }

    /// Retry, or end the stream with a fatal transport error.
    fn fail(&mut self, error: TransportError) {
        let retryable = error.is_retryable();

        if retryable && !self.committed && self.attempt < self.retry.max_attempts {
            let delay = backoff_delay(&self.retry, self.attempt, error.retry_after());
            warn!(
                model = %self.request.model,
                attempt = self.attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Transient provider failure, retrying"
            );
            self.phase = Phase::Backoff(delay);
            return;
        }

        if self.committed {
            warn!(model = %self.request.model, error = %error, "Stream failed after content was delivered");
        } else {
            warn!(model = %self.request.model, attempt = self.attempt, error = %error, "Request failed");
        }
        self.terminate(StreamEvent::fatal(StreamErrorKind::Transport, error.to_string(), retryable));
    }

    fn terminate(&mut self, event: StreamEvent) {
        trace!(event = event.event_type(), "Terminating stream");
        self.queue.extend(self.normalizer.terminate(event));
        self.phase = Phase::Finished;
    }
}
