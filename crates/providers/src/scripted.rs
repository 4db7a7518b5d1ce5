//! In-memory transport that replays canned responses.
//!
//! Used by the test suites of this crate and its dependents, and handy for
//! replaying a captured provider stream offline.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::{StreamExt, future, stream};
use switchboard_core::TransportError;

use crate::adapter::WireRequest;
use crate::transport::{ByteStream, Transport};

/// One canned reply to `open`.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// `open` fails with this error.
    Fail(TransportError),
    /// `open` never completes (the server never answers).
    Stall,
    /// `open` succeeds and the body yields these items.
    Stream {
        chunks: Vec<Result<Vec<u8>, TransportError>>,
        /// After the chunks, never yield again (simulates a stalled server).
        hang: bool,
    },
}

impl ScriptedResponse {
    /// A body made of the given raw chunks.
    pub fn chunks<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self::Stream {
            chunks: chunks.into_iter().map(|c| Ok(c.into())).collect(),
            hang: false,
        }
    }

    /// A body with one SSE `data:` event per payload.
    pub fn sse<I, S>(payloads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::chunks(payloads.into_iter().map(|p| format!("data: {}\n\n", p.as_ref())))
    }

    pub fn fail(error: TransportError) -> Self {
        Self::Fail(error)
    }

    pub fn stall() -> Self {
        Self::Stall
    }

    /// Break the body with `error` after the chunks so far.
    pub fn then_error(mut self, error: TransportError) -> Self {
        if let Self::Stream { chunks, .. } = &mut self {
            chunks.push(Err(error));
        }
        self
    }

    /// Stall after the chunks so far.
    pub fn then_hang(mut self) -> Self {
        if let Self::Stream { hang, .. } = &mut self {
            *hang = true;
        }
        self
    }
}

/// Replays [`ScriptedResponse`]s in order, one per `open`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<WireRequest>>,
    opens: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(responses: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, response: ScriptedResponse) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
    }

    /// Number of times `open` was called.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Every request passed to `open`, in order.
    pub fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, request: WireRequest) -> Result<ByteStream, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let next = self.responses.lock().ok().and_then(|mut r| r.pop_front());
        match next {
            None => Err(TransportError::Connect("no scripted response left".into())),
            Some(ScriptedResponse::Fail(error)) => Err(error),
            Some(ScriptedResponse::Stall) => future::pending().await,
            Some(ScriptedResponse::Stream { chunks, hang }) => {
                let body = stream::iter(chunks);
                if hang {
                    Ok(Box::pin(body.chain(stream::pending())))
                } else {
                    Ok(Box::pin(body))
                }
            }
        }
    }
}
