//! The agent loop for Switchboard.
//!
//! An [`AgentLoop`] alternates model turns and tool execution over one
//! [`Conversation`](switchboard_core::Conversation):
//!
//! 1. **Request** a model turn with the conversation and tool specs
//! 2. **Stream** the normalized events, collecting text and tool calls
//! 3. **If tool calls**: run them in batches, append results, go to step 1
//! 4. **Otherwise**: append the answer and finish
//!
//! Every run ends in exactly one terminal [`LoopState`]: `Done`, `Failed`
//! or `Canceled`. The turn budget bounds how many model calls a run makes.

pub mod executor;
pub mod loop_runner;
pub mod state;
pub mod stream_event;

pub use executor::ToolExecutor;
pub use loop_runner::{AgentLoop, DEFAULT_MAX_TURNS};
pub use state::{AgentOutcome, Completion, FailureReason, LoopState, PartialOutput};
pub use stream_event::AgentEvent;
