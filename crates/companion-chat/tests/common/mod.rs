#![allow(dead_code)]

use async_trait::async_trait;
use companion_chat::chat::{ChatEvent, ChatPipeline, ChatStore, ChatTurn, DatabaseChatStore, PipelineSettings, PipelineStage};
use companion_chat::crypto::MessageCodec;
use companion_chat::memory::DatabaseMemoryStore;
use companion_chat::memory_db::{Conversation, MemoryDatabase, NewUser, Role, StoredMessage, UserProfile};
use companion_chat::provider::{ChatMessage, CompletionParams, CompletionProvider, TokenStream};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted provider response
#[derive(Clone)]
pub enum Script {
    Tokens(Vec<String>),
    FailOpen(String),
    FailAfter(Vec<String>, String),
    Stall,
}

impl Script {
    pub fn tokens(parts: &[&str]) -> Self {
        Script::Tokens(parts.iter().map(|p| p.to_string()).collect())
    }

    /// Reply followed by a memory-update block, split into small tokens
    pub fn reply_with_update(reply: &str, update_json: &str) -> Self {
        let raw = format!("{}\n---MEMORY_UPDATE---\n{}\n---END_MEMORY_UPDATE---", reply, update_json);
        Script::Tokens(split_every(&raw, 7))
    }
}

pub fn split_every(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

/// Plays back queued scripts in order and records every request it receives
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    token_delay: Duration,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self::with_delay(scripts, Duration::ZERO)
    }

    pub fn with_delay(scripts: Vec<Script>, token_delay: Duration) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            token_delay,
        }
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Vec<ChatMessage> {
        self.requests().pop().expect("provider was never called")
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn stream_completion(&self, messages: Vec<ChatMessage>, _params: &CompletionParams) -> anyhow::Result<TokenStream> {
        self.requests.lock().unwrap().push(messages);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::tokens(&["ok"]));

        let delay = self.token_delay;
        let items: Vec<anyhow::Result<String>> = match script {
            Script::FailOpen(message) => return Err(anyhow::anyhow!(message)),
            Script::Stall => return Ok(futures::stream::pending().boxed()),
            Script::Tokens(tokens) => tokens.into_iter().map(Ok).collect(),
            Script::FailAfter(tokens, message) => tokens
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(anyhow::anyhow!(message))))
                .collect(),
        };
        Ok(futures::stream::iter(items)
            .then(move |item| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed())
    }
}

/// Database-backed chat store whose writes can be made to fail on demand
pub struct FlakyStore {
    inner: DatabaseChatStore,
    pub fail_user_append: AtomicBool,
    pub fail_assistant_append: AtomicBool,
}

impl FlakyStore {
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self {
            inner: DatabaseChatStore::new(db),
            fail_user_append: AtomicBool::new(false),
            fail_assistant_append: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ChatStore for FlakyStore {
    async fn create_conversation(&self, user_id: &str, title: &str) -> anyhow::Result<Conversation> {
        self.inner.create_conversation(user_id, title).await
    }

    async fn touch_conversation(&self, user_id: &str, conversation_id: &str) -> anyhow::Result<Option<Conversation>> {
        self.inner.touch_conversation(user_id, conversation_id).await
    }

    async fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> anyhow::Result<bool> {
        self.inner.delete_conversation(user_id, conversation_id).await
    }

    async fn append_message(
        &self,
        user_id: &str,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> anyhow::Result<StoredMessage> {
        let failing = match role {
            Role::User => &self.fail_user_append,
            _ => &self.fail_assistant_append,
        };
        if failing.load(Ordering::SeqCst) {
            anyhow::bail!("disk I/O error");
        }
        self.inner.append_message(user_id, conversation_id, role, content).await
    }

    async fn list_messages(&self, user_id: &str, conversation_id: &str, limit: usize) -> anyhow::Result<Vec<StoredMessage>> {
        self.inner.list_messages(user_id, conversation_id, limit).await
    }
}

pub struct Harness {
    pub db: Arc<MemoryDatabase>,
    pub store: Arc<FlakyStore>,
    pub provider: Arc<ScriptedProvider>,
    pub codec: MessageCodec,
    pub pipeline: Arc<ChatPipeline>,
    pub user: UserProfile,
}

impl Harness {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self::build(ScriptedProvider::new(scripts), PipelineSettings::default())
    }

    pub fn build(provider: ScriptedProvider, settings: PipelineSettings) -> Self {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        let user = create_user(&db, "ana@example.com", Some("Ana Lucia"));
        let store = Arc::new(FlakyStore::new(db.clone()));
        let provider = Arc::new(provider);
        let codec = MessageCodec::ephemeral();
        let pipeline = Arc::new(
            ChatPipeline::new(
                store.clone(),
                Arc::new(DatabaseMemoryStore::new(db.clone())),
                provider.clone(),
                codec.clone(),
                settings,
            )
            .unwrap(),
        );
        Self { db, store, provider, codec, pipeline, user }
    }

    /// Send one message and drain the event stream to completion
    pub async fn send(&self, content: &str, conversation_id: Option<&str>) -> (ChatTurn, Vec<ChatEvent>) {
        let mut turn = self.pipeline.start_turn(&self.user, content, conversation_id).await.unwrap();
        let events = drain(&mut turn).await;
        (turn, events)
    }

    /// Stored messages decrypted, oldest first
    pub fn transcript(&self, conversation_id: &str) -> Vec<(Role, String)> {
        self.db
            .conversations
            .list_messages(&self.user.id, conversation_id, 2000)
            .unwrap()
            .into_iter()
            .map(|m| (m.role, self.codec.decrypt(&m.content)))
            .collect()
    }
}

pub fn create_user(db: &MemoryDatabase, email: &str, name: Option<&str>) -> UserProfile {
    db.users
        .create_user(&NewUser {
            email: email.to_string(),
            full_name: name.map(str::to_string),
            ..Default::default()
        })
        .unwrap()
}

pub async fn drain(turn: &mut ChatTurn) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Some(event) = turn.events.next().await {
        events.push(event);
    }
    events
}

pub async fn finish(turn: ChatTurn) -> PipelineStage {
    turn.handle.await.unwrap()
}

pub fn relayed_text(events: &[ChatEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            ChatEvent::Chunk { chunk } => Some(chunk.as_str()),
            _ => None,
        })
        .collect()
}
