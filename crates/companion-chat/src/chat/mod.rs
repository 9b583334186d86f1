//! Chat turn orchestration: conversation resolution, context assembly,
//! streaming relay and post-stream persistence.
pub mod events;
pub mod locks;
pub mod pipeline;
pub mod relay;
pub mod store;
pub mod transformation;

pub use events::ChatEvent;
pub use locks::{ConversationGuard, ConversationLocks};
pub use pipeline::{
    apply_memory_updates, is_compaction_point, ChatPipeline, ChatTurn, PipelineSettings, PipelineStage,
    RequestContext,
};
pub use relay::ReplyRelay;
pub use store::{ChatStore, DatabaseChatStore};
pub use transformation::TransformationDetector;
