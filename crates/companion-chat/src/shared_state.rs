//! Shared state handed to every API handler.
//!
//! Everything is behind `Arc`, so cloning the state per request only bumps
//! reference counts.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::{
    auth::{DatabaseIdentityResolver, IdentityResolver},
    chat::{ChatPipeline, DatabaseChatStore, PipelineSettings},
    config::Config,
    crypto::MessageCodec,
    memory::DatabaseMemoryStore,
    memory_db::MemoryDatabase,
    provider::CompletionProvider,
};

#[derive(Clone)]
pub struct UnifiedAppState {
    pub database: Arc<MemoryDatabase>,
    pub pipeline: Arc<ChatPipeline>,
    pub identity: Arc<dyn IdentityResolver>,
    /// Same key as the pipeline's, used to decrypt history reads
    pub codec: MessageCodec,
    pub config: Arc<Config>,
}

impl UnifiedAppState {
    /// Wire the SQLite-backed stores, the identity cache and the pipeline together
    pub fn new(
        config: Config,
        database: Arc<MemoryDatabase>,
        codec: MessageCodec,
        provider: Arc<dyn CompletionProvider>,
    ) -> anyhow::Result<Self> {
        info!("Initializing shared application state");

        let pipeline = ChatPipeline::new(
            Arc::new(DatabaseChatStore::new(database.clone())),
            Arc::new(DatabaseMemoryStore::new(database.clone())),
            provider,
            codec.clone(),
            PipelineSettings::from_config(&config),
        )?;
        let identity = DatabaseIdentityResolver::new(
            database.clone(),
            Duration::from_secs(config.identity_cache_ttl_seconds),
        );

        Ok(Self {
            database,
            pipeline: Arc::new(pipeline),
            identity: Arc::new(identity),
            codec,
            config: Arc::new(config),
        })
    }

    /// Assemble from prebuilt parts; tests use this to swap in scripted collaborators
    pub fn from_parts(
        config: Config,
        database: Arc<MemoryDatabase>,
        codec: MessageCodec,
        pipeline: Arc<ChatPipeline>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            database,
            pipeline,
            identity,
            codec,
            config: Arc::new(config),
        }
    }
}
