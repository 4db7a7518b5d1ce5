//! # Switchboard Core
//!
//! Domain types, the tool registry, and error definitions shared by every
//! Switchboard crate. Nothing here knows about a wire format or a network:
//! providers encode these types, the agent loop drives them.
//!
//! ## Layout
//!
//! - [`message`]: messages, content blocks, the append-only conversation
//! - [`provider`]: canonical request, provider configuration, usage
//! - [`event`]: the normalized stream event sequence
//! - [`tool`]: tool specs, handlers and the registry that invokes them
//! - [`error`]: per-context error enums

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProtocolError, ToolError, TransportError};
pub use event::{StopReason, StreamErrorKind, StreamEvent};
pub use message::{ContentBlock, Conversation, ConversationId, ImageSource, Message, Role};
pub use provider::{
    CanonicalRequest, Capabilities, ProviderConfig, ProviderKind, RequiredCapabilities,
    RetryPolicy, SamplingParams, Usage,
};
pub use tool::{FnHandler, ToolCall, ToolHandler, ToolRegistry, ToolResult, ToolSpec};
