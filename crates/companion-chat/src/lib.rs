pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod crypto;
pub mod error;
pub mod memory;
pub mod memory_db;
pub mod metrics;
pub mod prompt;
pub mod provider;
pub mod server;
pub mod shared_state;
pub mod telemetry;
pub mod utils;

// Public API exports
pub use chat::{ChatEvent, ChatPipeline, ChatTurn, PipelineSettings, PipelineStage, RequestContext};
pub use config::Config;
pub use crypto::MessageCodec;
pub use error::{ChatError, ChatResult};
pub use memory::{DatabaseMemoryStore, InMemoryMemoryStore, MemoryStore};
pub use server::{build_router, run_server};
pub use shared_state::UnifiedAppState;
