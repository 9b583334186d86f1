mod common;

use common::{drain, finish, relayed_text, Harness, Script, ScriptedProvider};
use companion_chat::chat::{ChatEvent, PipelineSettings, PipelineStage};
use companion_chat::crypto::MessageCodec;
use companion_chat::error::ChatError;
use companion_chat::memory_db::Role;
use std::sync::atomic::Ordering;
use std::time::Duration;

const SCENARIO_C: &str = r#"Sure, I can help.---MEMORY_UPDATE---{"memory_update":"likes hiking","episodic_update":null,"summary_update":null}---END_MEMORY_UPDATE---"#;

fn is_error(event: &ChatEvent) -> bool {
    matches!(event, ChatEvent::Error { .. })
}

fn is_done(event: &ChatEvent) -> bool {
    matches!(event, ChatEvent::Done { .. })
}

// ===== Core scenarios =====

#[tokio::test]
async fn test_first_message_creates_conversation_and_both_turns() {
    let h = Harness::new(vec![Script::tokens(&["Hi", " there"])]);

    let (turn, events) = h.send("Hello", None).await;

    assert!(turn.created);
    assert_eq!(
        events.first(),
        Some(&ChatEvent::ConversationCreated { conversation_id: turn.conversation_id.clone() })
    );
    assert_eq!(relayed_text(&events), "Hi there");

    let conversations = h.db.conversations.list_conversations(&h.user.id).unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].title, "Hello");

    let stored = h.db.conversations.list_messages(&h.user.id, &turn.conversation_id, 10).unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|m| MessageCodec::is_encrypted(&m.content)));
    assert_eq!(stored[0].id, turn.user_message_id);
    assert_eq!(
        h.transcript(&turn.conversation_id),
        vec![(Role::User, "Hello".to_string()), (Role::Assistant, "Hi there".to_string())]
    );

    assert_eq!(events.last(), Some(&ChatEvent::done(stored[1].id.as_str(), turn.conversation_id.as_str())));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(finish(turn).await, PipelineStage::Done);
}

#[tokio::test]
async fn test_zero_tokens_yields_single_error() {
    let h = Harness::new(vec![Script::Tokens(Vec::new())]);

    let (turn, events) = h.send("Hello", None).await;

    assert_eq!(events.iter().filter(|e| is_error(e)).count(), 1);
    assert!(!events.iter().any(is_done));
    assert!(is_error(events.last().unwrap()));
    assert_eq!(h.transcript(&turn.conversation_id), vec![(Role::User, "Hello".to_string())]);
    assert_eq!(finish(turn).await, PipelineStage::Errored);
}

#[tokio::test]
async fn test_memory_block_is_never_relayed_or_stored() {
    let h = Harness::new(vec![Script::Tokens(common::split_every(SCENARIO_C, 5))]);

    let (turn, events) = h.send("Can you help me plan a trip?", None).await;

    assert_eq!(relayed_text(&events), "Sure, I can help.");
    assert!(events.iter().any(is_done));
    assert_eq!(
        h.transcript(&turn.conversation_id)[1],
        (Role::Assistant, "Sure, I can help.".to_string())
    );
    assert_eq!(h.db.semantic.recent_facts(&h.user.id, 10).unwrap(), vec!["likes hiking"]);
}

#[tokio::test]
async fn test_existing_conversation_emits_no_created_event() {
    let h = Harness::new(vec![Script::tokens(&["first"]), Script::tokens(&["second"])]);
    let (first, _) = h.send("Hello", None).await;
    let before = h.db.conversations.get_conversation(&h.user.id, &first.conversation_id).unwrap().unwrap();

    let (turn, events) = h.send("Again", Some(&first.conversation_id)).await;

    assert!(!turn.created);
    assert_eq!(events.first(), Some(&ChatEvent::chunk("second")));
    assert!(!events.iter().any(|e| matches!(e, ChatEvent::ConversationCreated { .. })));
    let after = h.db.conversations.get_conversation(&h.user.id, &first.conversation_id).unwrap().unwrap();
    assert!(after.updated_at > before.updated_at);
    assert_eq!(h.db.conversations.list_conversations(&h.user.id).unwrap().len(), 1);
}

// ===== Conversation resolution =====

#[tokio::test]
async fn test_long_first_message_is_truncated_for_title() {
    let h = Harness::new(vec![]);
    let message = "a".repeat(80);

    let (turn, _) = h.send(&message, None).await;

    let conversation = h.db.conversations.get_conversation(&h.user.id, &turn.conversation_id).unwrap().unwrap();
    assert_eq!(conversation.title, format!("{}...", "a".repeat(50)));
}

#[tokio::test]
async fn test_unknown_or_foreign_conversation_is_not_found() {
    let h = Harness::new(vec![]);
    let other = common::create_user(&h.db, "bo@example.com", None);
    let foreign = h.db.conversations.create_conversation(&other.id, "theirs").unwrap();

    for id in [foreign.id.as_str(), "00000000-0000-0000-0000-000000000000"] {
        let result = h.pipeline.start_turn(&h.user, "hi", Some(id)).await;
        assert!(matches!(result, Err(ChatError::NotFound(_))));
    }
    assert!(h.provider.requests().is_empty());
    assert_eq!(h.db.conversations.count_messages(&foreign.id).unwrap(), 0);
}

#[tokio::test]
async fn test_blank_message_is_rejected() {
    let h = Harness::new(vec![]);
    let result = h.pipeline.start_turn(&h.user, "   ", None).await;
    assert!(matches!(result, Err(ChatError::Validation(_))));
    assert!(h.db.conversations.list_conversations(&h.user.id).unwrap().is_empty());
}

// ===== Failure handling =====

#[tokio::test]
async fn test_failed_user_turn_removes_new_conversation() {
    let h = Harness::new(vec![]);
    h.store.fail_user_append.store(true, Ordering::SeqCst);

    let result = h.pipeline.start_turn(&h.user, "Hello", None).await;

    assert!(matches!(result, Err(ChatError::Persistence(_))));
    assert!(h.db.conversations.list_conversations(&h.user.id).unwrap().is_empty());
    assert!(h.provider.requests().is_empty());
}

#[tokio::test]
async fn test_failed_user_turn_keeps_existing_conversation() {
    let h = Harness::new(vec![]);
    let (first, _) = h.send("Hello", None).await;
    h.store.fail_user_append.store(true, Ordering::SeqCst);

    let result = h.pipeline.start_turn(&h.user, "Again", Some(&first.conversation_id)).await;

    assert!(matches!(result, Err(ChatError::Persistence(_))));
    assert_eq!(h.transcript(&first.conversation_id).len(), 2);
}

#[tokio::test]
async fn test_whitespace_only_output_is_an_error() {
    let h = Harness::new(vec![Script::tokens(&["  ", "\n\n"])]);
    let (turn, events) = h.send("Hello", None).await;

    assert_eq!(relayed_text(&events), "");
    assert!(is_error(events.last().unwrap()));
    assert_eq!(h.transcript(&turn.conversation_id).len(), 1);
}

#[tokio::test]
async fn test_reply_empty_before_memory_block_is_an_error() {
    let h = Harness::new(vec![Script::tokens(&[
        "---MEMORY_UPDATE---",
        r#"{"memory_update":"likes tea"}"#,
        "---END_MEMORY_UPDATE---",
    ])]);
    let (turn, events) = h.send("Hello", None).await;

    assert!(is_error(events.last().unwrap()));
    assert_eq!(h.transcript(&turn.conversation_id).len(), 1);
    assert!(h.db.semantic.recent_facts(&h.user.id, 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_provider_refusal_is_reported_in_band() {
    let h = Harness::new(vec![Script::FailOpen("status 401".to_string())]);
    let (turn, events) = h.send("Hello", None).await;

    match events.last() {
        Some(ChatEvent::Error { error }) => assert!(error.contains("status 401"), "{}", error),
        other => panic!("expected error event, got {:?}", other),
    }
    assert_eq!(h.transcript(&turn.conversation_id), vec![(Role::User, "Hello".to_string())]);
}

#[tokio::test]
async fn test_mid_stream_failure_keeps_partial_text_unsaved() {
    let h = Harness::new(vec![Script::FailAfter(
        vec!["Once upon".to_string(), " a time".to_string()],
        "connection reset".to_string(),
    )]);
    let (turn, events) = h.send("Tell me a story", None).await;

    assert_eq!(relayed_text(&events), "Once upon a time");
    assert!(is_error(events.last().unwrap()));
    assert!(!events.iter().any(is_done));
    assert_eq!(h.transcript(&turn.conversation_id).len(), 1);
}

#[tokio::test]
async fn test_stalled_provider_times_out() {
    let settings = PipelineSettings { stream_timeout: Duration::from_millis(100), ..PipelineSettings::default() };
    let h = Harness::build(ScriptedProvider::new(vec![Script::Stall]), settings);

    let (turn, events) = tokio::time::timeout(Duration::from_secs(5), h.send("Hello", None))
        .await
        .expect("pipeline ignored the stream timeout");

    assert!(is_error(events.last().unwrap()));
    assert_eq!(finish(turn).await, PipelineStage::Errored);
}

#[tokio::test]
async fn test_assistant_persistence_failure_is_in_band() {
    let h = Harness::new(vec![Script::reply_with_update("All good", r#"{"memory_update":"likes tea"}"#)]);
    h.store.fail_assistant_append.store(true, Ordering::SeqCst);

    let (turn, events) = h.send("Hello", None).await;

    assert_eq!(relayed_text(&events), "All good");
    match events.last() {
        Some(ChatEvent::Error { error }) => assert!(error.starts_with("Storage error"), "{}", error),
        other => panic!("expected error event, got {:?}", other),
    }
    assert_eq!(h.transcript(&turn.conversation_id).len(), 1);
    assert!(h.db.semantic.recent_facts(&h.user.id, 10).unwrap().is_empty());
}

// ===== Context assembly =====

#[tokio::test]
async fn test_prompt_carries_history_and_profile() {
    let h = Harness::new(vec![Script::tokens(&["Hi there"]), Script::tokens(&["Sure"])]);
    let (first, _) = h.send("Hello", None).await;
    h.db.semantic.add_fact(&h.user.id, "likes hiking").unwrap();

    h.send("Any hiking ideas?", Some(&first.conversation_id)).await;

    let request = h.provider.last_request();
    let roles: Vec<Role> = request.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
    assert_eq!(request[1].content, "Hello");
    assert_eq!(request[2].content, "Hi there");
    assert_eq!(request[3].content, "Any hiking ideas?");

    let system = &request[0].content;
    assert!(system.contains("always address the user as exactly \"Ana\""));
    assert!(system.contains("- likes hiking"));
    assert!(!system.contains("TRANSFORMATION MODE"));
}

#[tokio::test]
async fn test_undecryptable_history_is_passed_through() {
    let h = Harness::new(vec![Script::tokens(&["Still here"])]);
    let conversation = h.db.conversations.create_conversation(&h.user.id, "legacy").unwrap();
    h.db.conversations
        .append_message(&h.user.id, &conversation.id, Role::User, "plain old row")
        .unwrap();
    h.db.conversations
        .append_message(&h.user.id, &conversation.id, Role::Assistant, "enc:AAAA")
        .unwrap();

    let (turn, events) = h.send("Are you there?", Some(&conversation.id)).await;

    assert!(!events.iter().any(is_error));
    assert!(events.last().is_some_and(is_done));
    assert_eq!(finish(turn).await, PipelineStage::Done);

    let request = h.provider.last_request();
    let history: Vec<&str> = request[1..].iter().map(|m| m.content.as_str()).collect();
    assert_eq!(history, vec!["plain old row", "enc:AAAA", "Are you there?"]);
}

#[tokio::test]
async fn test_running_summary_limits_history_window() {
    let h = Harness::new(vec![]);
    let (first, _) = h.send("one", None).await;
    for text in ["two", "three", "four"] {
        h.send(text, Some(&first.conversation_id)).await;
    }
    h.db.summaries.upsert_summary(&first.conversation_id, "planning a trip", 8).unwrap();

    h.send("five", Some(&first.conversation_id)).await;

    let request = h.provider.last_request();
    // system + five most recent stored turns + new user message
    assert_eq!(request.len(), 7);
    assert!(request[0].content.contains("planning a trip"));
    assert_eq!(request[1].role, Role::Assistant);
    assert_eq!(request[2].content, "three");
    assert_eq!(request.last().map(|m| m.content.as_str()), Some("five"));
}

#[tokio::test]
async fn test_transformation_applies_to_one_request_only() {
    let h = Harness::new(vec![]);
    let (first, _) = h.send("Time for my TRANSFORMATION!", None).await;
    assert!(h.provider.last_request()[0].content.contains("=== TRANSFORMATION MODE ==="));

    h.send("Just a normal day", Some(&first.conversation_id)).await;
    assert!(!h.provider.last_request()[0].content.contains("=== TRANSFORMATION MODE ==="));

    h.send("transformations are cool", Some(&first.conversation_id)).await;
    assert!(!h.provider.last_request()[0].content.contains("=== TRANSFORMATION MODE ==="));
}

// ===== Memory updates =====

#[tokio::test]
async fn test_summary_compacts_into_episode_every_twenty_messages() {
    let h = Harness::new(vec![]);
    let update = r#"{"summary_update":"talking about exams","episodic_update":"studied for exams"}"#;
    let mut conversation_id: Option<String> = None;

    for turn_number in 1..=10 {
        h.provider.push(Script::reply_with_update("Keep going", update));
        let (turn, _) = h.send("more studying", conversation_id.as_deref()).await;
        conversation_id = Some(turn.conversation_id.clone());

        let summary = h.db.summaries.get_summary(&turn.conversation_id).unwrap().unwrap();
        let episodes = h.db.episodic.recent_episodes(&h.user.id, 10).unwrap();
        if turn_number < 10 {
            assert_eq!(summary.summary, "talking about exams");
            assert_eq!(summary.message_count, turn_number * 2);
            assert!(episodes.is_empty());
        } else {
            assert_eq!(summary.summary, "");
            assert_eq!(summary.message_count, 0);
            assert_eq!(episodes, vec!["studied for exams"]);
        }
    }
}

// ===== Concurrency =====

#[tokio::test]
async fn test_client_disconnect_still_persists_reply() {
    let provider = ScriptedProvider::with_delay(
        vec![Script::tokens(&["Still", " here", " for", " you"])],
        Duration::from_millis(20),
    );
    let h = Harness::build(provider, PipelineSettings::default());

    let turn = h.pipeline.start_turn(&h.user, "Hello", None).await.unwrap();
    let conversation_id = turn.conversation_id.clone();
    drop(turn.events);

    assert_eq!(turn.handle.await.unwrap(), PipelineStage::Done);
    assert_eq!(
        h.transcript(&conversation_id),
        vec![(Role::User, "Hello".to_string()), (Role::Assistant, "Still here for you".to_string())]
    );
}

#[tokio::test]
async fn test_concurrent_sends_alternate_turns() {
    let provider = ScriptedProvider::with_delay(Vec::new(), Duration::from_millis(10));
    let h = Harness::build(provider, PipelineSettings::default());
    for _ in 0..3 {
        h.provider.push(Script::tokens(&["a", "b", "c"]));
    }
    let (first, _) = h.send("start", None).await;
    let id = first.conversation_id.as_str();

    let (a, b) = tokio::join!(h.send("left", Some(id)), h.send("right", Some(id)));
    assert!(a.1.iter().any(is_done));
    assert!(b.1.iter().any(is_done));

    let roles: Vec<Role> = h.transcript(id).into_iter().map(|(role, _)| role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
}

#[tokio::test]
async fn test_done_event_is_last_and_unique() {
    let h = Harness::new(vec![Script::tokens(&["Hello", " friend"])]);
    let mut turn = h.pipeline.start_turn(&h.user, "Hi", None).await.unwrap();
    let events = drain(&mut turn).await;

    let terminal: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_terminal())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(terminal, vec![events.len() - 1]);
}
