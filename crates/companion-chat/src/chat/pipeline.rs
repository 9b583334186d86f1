//! The chat-send pipeline.
//!
//! Resolving the conversation and persisting the user turn happen before the
//! response stream opens, so their failures become ordinary HTTP errors. The
//! rest runs in a spawned task that feeds the event channel; if the client
//! goes away, sends fail quietly and the assistant turn is still persisted.

use crate::chat::events::ChatEvent;
use crate::chat::locks::{ConversationGuard, ConversationLocks};
use crate::chat::relay::ReplyRelay;
use crate::chat::store::ChatStore;
use crate::chat::transformation::TransformationDetector;
use crate::config::Config;
use crate::crypto::MessageCodec;
use crate::error::{ChatError, ChatResult};
use crate::memory::MemoryStore;
use crate::memory_db::{Role, StoredMessage, UserProfile};
use crate::metrics;
use crate::prompt::{build_system_prompt, bullet_list, parse_structured_response, MemoryUpdate, PromptOptions};
use crate::provider::{ChatMessage, CompletionParams, CompletionProvider};
use crate::utils::TextUtils;
use futures_util::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub memory_top_k: usize,
    /// Turns kept verbatim when a running summary exists
    pub recent_window: usize,
    pub title_max_chars: usize,
    pub compaction_interval: usize,
    pub history_limit: usize,
    pub stream_timeout: Duration,
    pub serialize_turns: bool,
    pub transformation_keyword: String,
    pub completion: CompletionParams,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            memory_top_k: 5,
            recent_window: 5,
            title_max_chars: 50,
            compaction_interval: 20,
            history_limit: 2000,
            stream_timeout: Duration::from_secs(120),
            serialize_turns: true,
            transformation_keyword: "transformation".to_string(),
            completion: CompletionParams::default(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            memory_top_k: config.memory_top_k,
            recent_window: config.recent_window,
            title_max_chars: config.title_max_chars,
            compaction_interval: config.compaction_interval,
            stream_timeout: Duration::from_secs(config.stream_timeout_seconds),
            serialize_turns: config.serialize_conversation_turns,
            transformation_keyword: config.transformation_keyword.clone(),
            completion: CompletionParams {
                temperature: config.llm_temperature,
                max_tokens: config.llm_max_tokens,
            },
            ..Self::default()
        }
    }
}

/// Per-request flags derived from the incoming message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub transformation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Init,
    ConversationResolved,
    UserTurnPersisted,
    ContextAssembled,
    Streaming,
    ResponseParsed,
    AssistantTurnPersisted,
    MemoryUpdated,
    Done,
    Errored,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Init => "init",
            PipelineStage::ConversationResolved => "conversation_resolved",
            PipelineStage::UserTurnPersisted => "user_turn_persisted",
            PipelineStage::ContextAssembled => "context_assembled",
            PipelineStage::Streaming => "streaming",
            PipelineStage::ResponseParsed => "response_parsed",
            PipelineStage::AssistantTurnPersisted => "assistant_turn_persisted",
            PipelineStage::MemoryUpdated => "memory_updated",
            PipelineStage::Done => "done",
            PipelineStage::Errored => "errored",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A turn whose user message is persisted and whose reply is streaming
pub struct ChatTurn {
    pub conversation_id: String,
    pub created: bool,
    pub user_message_id: String,
    pub events: ReceiverStream<ChatEvent>,
    /// Resolves to `Done` or `Errored` once persistence has finished
    pub handle: JoinHandle<PipelineStage>,
}

struct TurnState {
    user: UserProfile,
    conversation_id: String,
    user_message_id: String,
    content: String,
    ctx: RequestContext,
    _guard: Option<ConversationGuard>,
}

struct TurnContext {
    semantic: Vec<String>,
    episodic: Vec<String>,
    summary: Option<String>,
    history: Vec<ChatMessage>,
}

pub struct ChatPipeline {
    store: Arc<dyn ChatStore>,
    memory: Arc<dyn MemoryStore>,
    provider: Arc<dyn CompletionProvider>,
    codec: MessageCodec,
    locks: ConversationLocks,
    transformation: TransformationDetector,
    settings: PipelineSettings,
}

impl ChatPipeline {
    pub fn new(
        store: Arc<dyn ChatStore>,
        memory: Arc<dyn MemoryStore>,
        provider: Arc<dyn CompletionProvider>,
        codec: MessageCodec,
        settings: PipelineSettings,
    ) -> anyhow::Result<Self> {
        let transformation = TransformationDetector::new(&settings.transformation_keyword)?;
        Ok(Self {
            store,
            memory,
            provider,
            codec,
            locks: ConversationLocks::new(),
            transformation,
            settings,
        })
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn request_context(&self, content: &str) -> RequestContext {
        RequestContext { transformation: self.transformation.detect(content) }
    }

    /// Resolve the conversation, persist the user turn and start streaming the reply.
    pub async fn start_turn(
        self: &Arc<Self>,
        user: &UserProfile,
        content: &str,
        conversation_id: Option<&str>,
    ) -> ChatResult<ChatTurn> {
        if content.trim().is_empty() {
            return Err(ChatError::Validation("Message content must not be empty".to_string()));
        }
        let ctx = self.request_context(content);

        let (conversation_id, created, guard) = match conversation_id {
            Some(id) => {
                let guard = self.lock(id).await;
                let conversation = self
                    .store
                    .touch_conversation(&user.id, id)
                    .await
                    .map_err(ChatError::persistence)?
                    .ok_or_else(|| ChatError::NotFound("Conversation not found".to_string()))?;
                (conversation.id, false, guard)
            }
            None => {
                let title = TextUtils::truncate_with_ellipsis(content.trim(), self.settings.title_max_chars);
                let conversation = self
                    .store
                    .create_conversation(&user.id, &title)
                    .await
                    .map_err(ChatError::persistence)?;
                let guard = self.lock(&conversation.id).await;
                (conversation.id, true, guard)
            }
        };
        debug!("Conversation {} resolved (created: {})", conversation_id, created);

        let user_message = match self.persist_turn(&user.id, &conversation_id, Role::User, content).await {
            Ok(message) => message,
            Err(e) => {
                if created {
                    self.discard_conversation(&user.id, &conversation_id).await;
                }
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        if created {
            emit(&tx, ChatEvent::ConversationCreated { conversation_id: conversation_id.clone() }).await;
        }

        let turn = TurnState {
            user: user.clone(),
            conversation_id: conversation_id.clone(),
            user_message_id: user_message.id.clone(),
            content: content.to_string(),
            ctx,
            _guard: guard,
        };
        let pipeline = Arc::clone(self);
        let handle = tokio::spawn(async move { pipeline.complete_turn(turn, tx).await });

        Ok(ChatTurn {
            conversation_id,
            created,
            user_message_id: user_message.id,
            events: ReceiverStream::new(rx),
            handle,
        })
    }

    async fn lock(&self, conversation_id: &str) -> Option<ConversationGuard> {
        if self.settings.serialize_turns {
            Some(self.locks.acquire(conversation_id).await)
        } else {
            None
        }
    }

    async fn persist_turn(&self, user_id: &str, conversation_id: &str, role: Role, text: &str) -> ChatResult<StoredMessage> {
        let encrypted = self.codec.encrypt(text).map_err(ChatError::persistence)?;
        self.store
            .append_message(user_id, conversation_id, role, &encrypted)
            .await
            .map_err(ChatError::persistence)
    }

    async fn discard_conversation(&self, user_id: &str, conversation_id: &str) {
        match self.store.delete_conversation(user_id, conversation_id).await {
            Ok(_) => debug!("Removed conversation {} after failed first turn", conversation_id),
            Err(e) => warn!("Failed to remove conversation {} after failed first turn: {}", conversation_id, e),
        }
    }

    async fn complete_turn(self: Arc<Self>, turn: TurnState, tx: mpsc::Sender<ChatEvent>) -> PipelineStage {
        metrics::inc_streams();
        let mut stage = PipelineStage::UserTurnPersisted;
        let result = self.stream_reply(&turn, &tx, &mut stage).await;
        metrics::dec_streams();

        match result {
            Ok(message_id) => {
                emit(&tx, ChatEvent::done(message_id, turn.conversation_id.as_str())).await;
                info!("Chat turn completed for conversation {}", turn.conversation_id);
                PipelineStage::Done
            }
            Err(e) => {
                warn!("Chat turn for conversation {} failed after {}: {}", turn.conversation_id, stage, e);
                emit(&tx, ChatEvent::error(e.to_string())).await;
                PipelineStage::Errored
            }
        }
    }

    async fn stream_reply(
        &self,
        turn: &TurnState,
        tx: &mpsc::Sender<ChatEvent>,
        stage: &mut PipelineStage,
    ) -> ChatResult<String> {
        let context = self.assemble_context(turn).await?;
        *stage = PipelineStage::ContextAssembled;

        let prompt = build_system_prompt(&PromptOptions {
            semantic_memory: bullet_list(&context.semantic),
            episodic_memory: bullet_list(&context.episodic),
            conversation_summary: context.summary,
            user_name: turn.user.first_name(),
            user_attributes: turn.user.profile_attributes(),
            transformation: turn.ctx.transformation,
        });
        let mut messages = Vec::with_capacity(context.history.len() + 2);
        messages.push(ChatMessage::new(Role::System, prompt));
        messages.extend(context.history);
        messages.push(ChatMessage::new(Role::User, turn.content.as_str()));

        *stage = PipelineStage::Streaming;
        let started = Instant::now();
        let relay = self.relay_completion(messages, tx).await;
        metrics::observe_provider_stream(started.elapsed().as_secs_f64());
        let relay = relay?;

        let parsed = parse_structured_response(relay.raw());
        if parsed.assistant_reply().is_empty() {
            return Err(ChatError::Provider("The model returned an empty reply".to_string()));
        }
        if let Some(rest) = relay.remainder(parsed.assistant_reply()) {
            emit(tx, ChatEvent::chunk(rest)).await;
        }
        *stage = PipelineStage::ResponseParsed;

        let assistant = self
            .persist_turn(&turn.user.id, &turn.conversation_id, Role::Assistant, parsed.assistant_reply())
            .await?;
        *stage = PipelineStage::AssistantTurnPersisted;

        apply_memory_updates(
            self.memory.as_ref(),
            &turn.user.id,
            &turn.conversation_id,
            parsed.update.as_ref(),
            self.settings.compaction_interval,
        )
        .await;
        *stage = PipelineStage::MemoryUpdated;

        Ok(assistant.id)
    }

    async fn assemble_context(&self, turn: &TurnState) -> ChatResult<TurnContext> {
        let top_k = self.settings.memory_top_k;
        let (semantic, episodic, summary, history) = tokio::join!(
            self.memory.search_semantic(&turn.user.id, &turn.content, top_k),
            self.memory.search_episodic(&turn.user.id, &turn.content, top_k),
            self.memory.get_conversation_summary(&turn.conversation_id),
            self.store.list_messages(&turn.user.id, &turn.conversation_id, self.settings.history_limit),
        );

        let mut history: Vec<ChatMessage> = history
            .map_err(ChatError::persistence)?
            .into_iter()
            .filter(|message| message.id != turn.user_message_id)
            .map(|message| ChatMessage::new(message.role, self.codec.decrypt(&message.content)))
            .collect();
        if summary.is_some() && history.len() > self.settings.recent_window {
            let excess = history.len() - self.settings.recent_window;
            history.drain(..excess);
        }
        debug!(
            "Context for {}: {} facts, {} episodes, summary: {}, {} history turns",
            turn.conversation_id,
            semantic.len(),
            episodic.len(),
            summary.is_some(),
            history.len()
        );

        Ok(TurnContext { semantic, episodic, summary, history })
    }

    /// Drive the provider stream through the relay, bounded by the stream timeout
    async fn relay_completion(&self, messages: Vec<ChatMessage>, tx: &mpsc::Sender<ChatEvent>) -> ChatResult<ReplyRelay> {
        let deadline = Instant::now() + self.settings.stream_timeout;
        let mut stream = timeout_at(deadline, self.provider.stream_completion(messages, &self.settings.completion))
            .await
            .map_err(|_| ChatError::Provider("Timed out waiting for the model".to_string()))?
            .map_err(ChatError::provider)?;

        let mut relay = ReplyRelay::new();
        let mut tokens = 0usize;
        loop {
            let next = timeout_at(deadline, stream.next())
                .await
                .map_err(|_| ChatError::Provider("The model took too long to respond".to_string()))?;
            match next {
                Some(Ok(token)) => {
                    if token.is_empty() {
                        continue;
                    }
                    tokens += 1;
                    if let Some(text) = relay.push(&token) {
                        emit(tx, ChatEvent::chunk(text)).await;
                    }
                }
                Some(Err(e)) => return Err(ChatError::provider(e)),
                None => break,
            }
        }

        if tokens == 0 {
            return Err(ChatError::Provider("The model returned no content".to_string()));
        }
        if relay.raw().trim().is_empty() {
            return Err(ChatError::Provider("The model returned an empty response".to_string()));
        }
        Ok(relay)
    }
}

async fn emit(tx: &mpsc::Sender<ChatEvent>, event: ChatEvent) {
    if tx.send(event).await.is_err() {
        debug!("Client disconnected; dropping event");
    }
}

pub fn is_compaction_point(message_count: usize, interval: usize) -> bool {
    interval > 0 && message_count > 0 && message_count % interval == 0
}

/// Apply the model's memory update. Failures are logged and never propagate,
/// so they cannot undo an already persisted assistant turn.
pub async fn apply_memory_updates(
    memory: &dyn MemoryStore,
    user_id: &str,
    conversation_id: &str,
    update: Option<&MemoryUpdate>,
    compaction_interval: usize,
) {
    let Some(update) = update else {
        return;
    };

    if let Some(fact) = update.memory_update.as_deref() {
        if let Err(e) = memory.add_semantic(user_id, fact).await {
            warn!("Failed to store semantic memory for user {}: {}", user_id, e);
        }
    }
    if update.summary_update.is_none() && update.episodic_update.is_none() {
        return;
    }

    let message_count = match memory.get_message_count(conversation_id).await {
        Ok(count) => count,
        Err(e) => {
            warn!("Failed to count messages in {}: {}", conversation_id, e);
            return;
        }
    };

    if let Some(summary) = update.summary_update.as_deref() {
        if let Err(e) = memory.update_conversation_summary(conversation_id, summary, message_count).await {
            warn!("Failed to update summary for {}: {}", conversation_id, e);
        }
    }

    let Some(episode) = update.episodic_update.as_deref() else {
        return;
    };
    if !is_compaction_point(message_count, compaction_interval) {
        return;
    }
    if let Err(e) = memory.add_episodic(user_id, episode, message_count).await {
        warn!("Failed to store episodic memory for user {}: {}", user_id, e);
        return;
    }
    match memory.update_conversation_summary(conversation_id, "", 0).await {
        Ok(()) => info!("Compacted conversation {} at {} messages", conversation_id, message_count),
        Err(e) => warn!("Failed to reset summary for {}: {}", conversation_id, e),
    }
}
