//! Prompt assembly and structured response parsing
pub mod builder;
pub mod parser;

pub use builder::{build_system_prompt, bullet_list, PromptOptions};
pub use parser::{
    parse_structured_response, MemoryUpdate, StructuredResponse, MEMORY_UPDATE_END, MEMORY_UPDATE_START,
};
