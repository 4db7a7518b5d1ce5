//! Message and Conversation domain types.
//!
//! These are the value objects that flow through the whole system:
//! the caller builds a conversation, the agent loop grows it turn by turn,
//! and every provider adapter encodes it into its own wire shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::{ToolCall, ToolResult};

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution results
    Tool,
}

/// Where the bytes of an image block come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    /// Inline base64 payload.
    Base64 { media_type: String, data: String },
    /// Remote URL the provider fetches itself.
    Url { url: String },
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// Ordered content blocks
    pub content: Vec<ContentBlock>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_blocks(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_blocks(Role::User, vec![ContentBlock::Text { text: text.into() }])
    }

    /// Create a user message carrying text followed by an image.
    pub fn user_with_image(text: impl Into<String>, source: ImageSource) -> Self {
        Self::with_blocks(
            Role::User,
            vec![
                ContentBlock::Text { text: text.into() },
                ContentBlock::Image { source },
            ],
        )
    }

    /// Create a new assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_blocks(Role::Assistant, vec![ContentBlock::Text { text: text.into() }])
    }

    /// Create an assistant message from streamed text plus finalized tool calls.
    ///
    /// Empty text produces no text block.
    pub fn assistant_with_tool_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let text = text.into();
        let mut content = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            content.push(ContentBlock::Text { text });
        }
        content.extend(calls.into_iter().map(ContentBlock::ToolCall));
        Self::with_blocks(Role::Assistant, content)
    }

    /// Create a tool result message.
    pub fn tool_result(result: ToolResult) -> Self {
        Self::with_blocks(Role::Tool, vec![ContentBlock::ToolResult(result)])
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolResult(result) => Some(result),
            _ => None,
        })
    }

    pub fn has_images(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::Image { .. }))
    }
}

/// A conversation is an ordered, append-only sequence of messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered messages
    messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Tool calls of the latest assistant message that have no result yet.
    ///
    /// Non-empty only when a run stopped between a `tool_use` stop and the
    /// append of its results.
    pub fn unanswered_tool_calls(&self) -> Vec<ToolCall> {
        let Some(pos) = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant)
        else {
            return Vec::new();
        };

        let answered: Vec<&str> = self.messages[pos + 1..]
            .iter()
            .flat_map(|m| m.tool_results())
            .map(|r| r.call_id.as_str())
            .collect();

        self.messages[pos]
            .tool_calls()
            .filter(|c| !answered.contains(&c.id.as_str()))
            .cloned()
            .collect()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
