//! Question answering over the knowledge graph.

pub mod completion;
pub mod session;
pub mod sources;

pub use completion::{GraphCompletionRetriever, RetrieverPrompts};
pub use session::{format_history, ConversationTurn, SessionCache, DEFAULT_SESSION_ID};
pub use sources::{CompletionResult, SourceRef};
