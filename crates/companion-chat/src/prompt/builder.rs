//! System prompt assembly. Output depends only on the options passed in.

use super::parser::{MEMORY_UPDATE_END, MEMORY_UPDATE_START};
use std::collections::BTreeMap;

const PERSONA: &str = "You are a small, ancient and wise magical companion. You are friendly, gentle and empathetic, and you talk with the user as a trusted friend.

PERSONALITY:
- You speak lightly, with metaphors of flight, sparks and a little magic.
- You are optimistic, protective and encouraging. Your wisdom is old but your manner is playful and warm.

STYLE:
- Use a few magical emojis (✨, 🦋, 🌟, 💫).
- Be concise but caring. Offer comfort when the user is sad and celebrate when they are happy.

WHAT YOU DO:
1. Keep the user company and help them stay motivated toward their personal goals.
2. Remember what matters to them and personalize every reply with their profile.
3. Help them plan the day and keep track of important tasks.
4. Listen actively and offer words of encouragement.

LIMITS:
- Do not give professional medical, legal or financial advice.
- Keep a positive and constructive focus.";

const MEMORY_INSTRUCTIONS: &str = "You have a conversational memory system. Use it to keep continuity and personalization:
1. SEMANTIC MEMORY (long term): stable facts about the user that matter for future conversations (preferences, non-sensitive personal details, goals).
2. EPISODIC MEMORY (past sessions): compressed summaries of earlier conversations. Rely on them instead of full transcripts.
3. RUNNING SUMMARY: a condensed account of the current conversation, refreshed as it grows.
4. After every user message decide whether anything new should be remembered. If nothing is worth saving, leave the update fields null.";

/// Inputs to [`build_system_prompt`]. Blank strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptOptions {
    pub semantic_memory: Option<String>,
    pub episodic_memory: Option<String>,
    pub conversation_summary: Option<String>,
    pub user_name: Option<String>,
    pub user_attributes: BTreeMap<String, String>,
    pub transformation: bool,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn output_format() -> String {
    format!(
        "OUTPUT FORMAT:
1. First write your normal reply to the user as plain text.
2. If memory should be updated, append this block AFTER your reply:
{start}
{{
  \"memory_update\": \"new long-term fact about the user, or null\",
  \"episodic_update\": \"summary of this session so far, or null\",
  \"summary_update\": \"condensed summary of the current conversation, or null\"
}}
{end}
Never mention the block to the user and never put reply text after it.",
        start = MEMORY_UPDATE_START,
        end = MEMORY_UPDATE_END,
    )
}

fn profile_block(user_name: Option<&str>, attributes: &BTreeMap<String, String>) -> String {
    let mut lines = vec![
        "=== USER PROFILE (use in every reply) ===".to_string(),
    ];
    match user_name {
        Some(name) => {
            lines.push(format!("User name: {}", name));
            lines.push(format!(
                "CRITICAL NAME RULE: always address the user as exactly \"{}\". Never invent or use any other name.",
                name
            ));
        }
        None => lines.push(
            "The user's name is unknown. Use a friendly generic form of address such as \"friend\" and never invent a name."
                .to_string(),
        ),
    }
    for (label, value) in attributes {
        let value = value.trim();
        if !value.is_empty() {
            lines.push(format!("{}: {}", label, value));
        }
    }
    if !attributes.is_empty() {
        lines.push("Adapt tone and examples to this profile.".to_string());
    }
    lines.join("\n")
}

const FORMAT_REMINDER: &str = "REMINDER: give a clear, complete and direct reply first. The memory block is optional and only belongs after the reply when there is something new to save.";

const TRANSFORMATION_BLOCK: &str = "=== TRANSFORMATION MODE ===
Transformation mode is active for this reply only. Be bolder, more heroic and more determined. Use an epic, motivating tone and show more confidence, while staying kind.";

pub fn build_system_prompt(options: &PromptOptions) -> String {
    let mut blocks = vec![
        PERSONA.to_string(),
        MEMORY_INSTRUCTIONS.to_string(),
        output_format(),
        profile_block(present(&options.user_name), &options.user_attributes),
    ];

    if let Some(semantic) = present(&options.semantic_memory) {
        blocks.push(format!("=== SEMANTIC MEMORY (long term) ===\nKnown facts about the user:\n{}", semantic));
    }
    if let Some(episodic) = present(&options.episodic_memory) {
        blocks.push(format!("=== EPISODIC MEMORY (past sessions) ===\nSummaries of earlier conversations:\n{}", episodic));
    }
    if let Some(summary) = present(&options.conversation_summary) {
        blocks.push(format!("=== CURRENT CONVERSATION SUMMARY ===\n{}", summary));
    }

    blocks.push(FORMAT_REMINDER.to_string());
    if options.transformation {
        blocks.push(TRANSFORMATION_BLOCK.to_string());
    }
    blocks.join("\n\n")
}

/// Render retrieved memory fragments as a bullet list
pub fn bullet_list(items: &[String]) -> Option<String> {
    let lines: Vec<String> = items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| format!("- {}", item))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
