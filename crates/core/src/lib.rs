//! # SQLPilot Core
//!
//! Domain types, traits, and error definitions for the SQLPilot
//! conversational data agent. This crate has **no framework dependencies**:
//! it defines the domain model that all other crates implement against.
//!
//! Every boundary (language model, tools) is a trait here. Implementations
//! live in their respective crates, which keeps the turn controller testable
//! against scripted providers and in-memory tools.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, ToolError};
pub use message::{Message, MessageToolCall, Role, ThreadId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
