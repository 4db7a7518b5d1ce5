//! LLM provider plumbing for Switchboard.
//!
//! Each provider family has a [`ProviderAdapter`] that encodes canonical
//! requests and decodes its SSE stream. The [`EventNormalizer`] turns adapter
//! output into a well-formed event sequence, and the [`UnifiedClient`] routes
//! requests, retries transient failures and handles cancellation.

pub mod adapter;
pub mod anthropic;
pub mod client;
pub mod google;
pub mod normalizer;
pub mod openai;
pub mod retry;
pub mod router;
pub mod scripted;
pub mod sse;
pub mod transport;

pub use adapter::{DecodeState, PartialEvent, ProviderAdapter, WireRequest, adapter_for};
pub use anthropic::AnthropicAdapter;
pub use client::{EventStream, UnifiedClient};
pub use google::GoogleAdapter;
pub use normalizer::EventNormalizer;
pub use openai::OpenAiAdapter;
pub use router::{ProviderRouter, Route};
pub use scripted::{ScriptedResponse, ScriptedTransport};
pub use sse::{SseBuffer, SseEvent};
pub use transport::{ByteStream, HttpTransport, Transport};
