//! Compaction behavior: isolation across sessions, concurrent confirms,
//! preview idempotency.

mod common;

use common::*;
use sb_domain::event::EventType;
use sb_domain::message::Message;
use sb_domain::token::ProviderKind;

/// Load a session's buffer with enough synthetic conversation to sit above
/// the compaction threshold (estimates run at ~4 chars/token).
async fn inflate(h: &Harness, session_id: &str, turns: usize, chars: usize) {
    let active = h.orchestrator.require_active(session_id).await.unwrap();
    let mut messages = Vec::new();
    let filler = "x".repeat(chars);
    for i in 0..turns {
        messages.push(Message::user(format!("question {i}: {filler}")));
        messages.push(Message::assistant(format!("answer {i}: {filler}")));
    }
    active.context.lock().set_messages(messages);
}

#[tokio::test]
async fn compaction_reduces_usage_and_writes_event_pair() {
    let h = harness(ProviderKind::Openai, 1000, vec![]);
    let session = create_session(&h, ProviderKind::Openai).await;
    inflate(&h, &session.id, 20, 80).await;

    let before = h
        .orchestrator
        .get_context_snapshot(&session.id)
        .await
        .unwrap();
    assert!(before.usage_percent >= 75.0, "setup must exceed threshold");
    assert!(h.orchestrator.should_compact(&session.id).await.unwrap());

    h.provider.push_text_turn("summary of the early turns", 100, 40);
    let result = h
        .orchestrator
        .confirm_compaction(&session.id)
        .await
        .unwrap();
    assert!(result.success);
    assert!(result.tokens_after < result.tokens_before);

    let after = h
        .orchestrator
        .get_context_snapshot(&session.id)
        .await
        .unwrap();
    assert!(after.current_tokens < before.current_tokens);

    assert_eq!(
        events_of_type(&h, &session.id, EventType::CompactBoundary).len(),
        1
    );
    assert_eq!(
        events_of_type(&h, &session.id, EventType::CompactSummary).len(),
        1
    );
}

// ── Scenario: session isolation ──────────────────────────────────────

#[tokio::test]
async fn compacting_one_session_leaves_others_untouched() {
    let h = harness(ProviderKind::Openai, 1000, vec![]);
    let a = create_session(&h, ProviderKind::Openai).await;
    let b = create_session(&h, ProviderKind::Openai).await;
    inflate(&h, &a.id, 20, 80).await;
    inflate(&h, &b.id, 20, 80).await;

    let b_before = h.orchestrator.get_context_snapshot(&b.id).await.unwrap();

    h.provider.push_text_turn("summary for session a", 100, 40);
    h.orchestrator.confirm_compaction(&a.id).await.unwrap();

    let a_after = h.orchestrator.get_context_snapshot(&a.id).await.unwrap();
    assert!(a_after.usage_percent < 75.0);

    let b_after = h.orchestrator.get_context_snapshot(&b.id).await.unwrap();
    assert_eq!(b_after.current_tokens, b_before.current_tokens);
    assert_eq!(b_after.usage_percent, b_before.usage_percent);
    assert_eq!(b_after.message_count, b_before.message_count);
    assert!(events_of_type(&h, &b.id, EventType::CompactSummary).is_empty());
}

// ── Scenario: two concurrent confirms ────────────────────────────────

#[tokio::test]
async fn parallel_confirms_serialize_and_both_succeed() {
    let h = harness(ProviderKind::Openai, 1000, vec![]);
    let session = create_session(&h, ProviderKind::Openai).await;
    inflate(&h, &session.id, 30, 80).await;

    // One summary per confirm; the second may be a no-op that never asks.
    h.provider.push_text_turn("first summary", 100, 30);
    h.provider.push_text_turn("second summary", 60, 20);

    let (r1, r2) = tokio::join!(
        h.orchestrator.confirm_compaction(&session.id),
        h.orchestrator.confirm_compaction(&session.id),
    );
    assert!(r1.unwrap().success);
    assert!(r2.unwrap().success);

    let snapshot = h
        .orchestrator
        .get_context_snapshot(&session.id)
        .await
        .unwrap();
    assert!(snapshot.usage_percent < 30.0);

    let summaries = events_of_type(&h, &session.id, EventType::CompactSummary);
    let boundaries = events_of_type(&h, &session.id, EventType::CompactBoundary);
    assert!((1..=2).contains(&summaries.len()));
    assert_eq!(summaries.len(), boundaries.len());
}

// ── Preview: idempotent, non-mutating ────────────────────────────────

#[tokio::test]
async fn preview_is_stable_and_does_not_mutate() {
    let h = harness(ProviderKind::Openai, 1000, vec![]);
    let session = create_session(&h, ProviderKind::Openai).await;
    inflate(&h, &session.id, 20, 80).await;

    let first = h.orchestrator.preview_compaction(&session.id).await.unwrap();
    let second = h.orchestrator.preview_compaction(&session.id).await.unwrap();
    assert_eq!(first, second);
    assert!(first.tokens_after < first.tokens_before);
    assert!(first.compression_ratio < 1.0);

    // No events were written and the buffer is untouched.
    assert!(events_of_type(&h, &session.id, EventType::CompactSummary).is_empty());
    let snapshot = h
        .orchestrator
        .get_context_snapshot(&session.id)
        .await
        .unwrap();
    assert_eq!(snapshot.current_tokens, first.tokens_before);
}
