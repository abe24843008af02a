//! Backend for the Nio chat widget: a persona-driven chat endpoint, a
//! persisted conversation store, and lead extraction over stored transcripts.

pub mod app;
pub mod completion;
pub mod config;
pub mod engine;
pub mod error;
pub mod lead;
pub mod prompting;
pub mod registry;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use app::{router, AppState};
pub use completion::{CompletionClient, CompletionProfile, CompletionRequest, OpenAiClient};
pub use config::Config;
pub use error::{ChatError, StoreError, UpstreamError};
pub use store::{MemoryStore, MessageStore, PostgresStore};
