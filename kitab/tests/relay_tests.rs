mod common;

use std::sync::Arc;

use futures::StreamExt;
use pretty_assertions::assert_eq;

use common::*;
use kitab::chat::NO_RESULTS_CONTEXT;
use kitab::llm::ChatMessage;
use kitab::models::{StreamEvent, ToolPhase};

async fn collect(relay: &kitab::chat::ChatRelay, question: &str) -> Vec<StreamEvent> {
    relay
        .stream(vec![ChatMessage::user(question)])
        .collect()
        .await
}

fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|event| match event {
            StreamEvent::Start { .. } => "start",
            StreamEvent::TextDelta { .. } => "text",
            StreamEvent::ToolStatus { data } if data.status == ToolPhase::Searching => "searching",
            StreamEvent::ToolStatus { .. } => "complete",
            StreamEvent::Sources { .. } => "sources",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Finish => "finish",
        })
        .collect()
}

#[tokio::test]
async fn answer_without_tools_streams_text_then_finish() {
    let model = ScriptedModel::new(vec![Step::Chunks(vec![text("Hello"), text(" there")])]);
    let relay = relay_with(model.clone(), default_index(), 3);

    let events = collect(&relay, "hi").await;

    assert_eq!(kinds(&events), vec!["start", "text", "text", "finish"]);
    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].messages[0],
        ChatMessage::system(SYSTEM_PROMPT)
    );
    assert_eq!(requests[0].tools, vec!["search_books".to_string()]);
}

#[tokio::test]
async fn tool_call_emits_status_pair_and_sources() {
    let model = ScriptedModel::new(vec![
        Step::Chunks(vec![search_call("call_1", "patience")]),
        Step::Chunks(vec![text("Patience is praised [Riyad](source:0).")]),
    ]);
    let relay = relay_with(model.clone(), default_index(), 3);

    let events = collect(&relay, "What about patience?").await;

    assert_eq!(
        kinds(&events),
        vec!["start", "searching", "complete", "sources", "text", "finish"]
    );

    match &events[1] {
        StreamEvent::ToolStatus { data } => {
            assert_eq!(data.query.as_deref(), Some("patience"));
            assert_eq!(data.tool_name, "search_books");
        }
        other => panic!("unexpected event {other:?}"),
    }
    match &events[3] {
        StreamEvent::Sources { data } => {
            assert_eq!(data.len(), 2);
            assert_eq!(data[0].book, "Riyad as-Salihin");
            assert_eq!(data[0].id.as_deref(), Some("source-0"));
            assert!(data[0].score >= data[1].score);
        }
        other => panic!("unexpected event {other:?}"),
    }

    // second request carries the tool call and its formatted result
    let second = &model.requests()[1].messages;
    assert!(matches!(
        &second[second.len() - 2],
        ChatMessage::Assistant { tool_calls, .. } if tool_calls.len() == 1
    ));
    match second.last() {
        Some(ChatMessage::Tool { call_id, content }) => {
            assert_eq!(call_id, "call_1");
            assert!(content.starts_with("[Source 0] Riyad as-Salihin, Page 12:"));
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[tokio::test]
async fn multiple_calls_run_in_order_without_interleaving() {
    let model = ScriptedModel::new(vec![
        Step::Chunks(vec![search_call("a", "first"), search_call("b", "second")]),
        Step::Chunks(vec![text("done")]),
    ]);
    let relay = relay_with(model, default_index(), 3);

    let events = collect(&relay, "q").await;

    assert_eq!(
        kinds(&events),
        vec![
            "start", "searching", "complete", "sources", "searching", "complete", "sources",
            "text", "finish"
        ]
    );
}

#[tokio::test]
async fn empty_search_skips_sources_and_returns_fixed_context() {
    let model = ScriptedModel::new(vec![
        Step::Chunks(vec![search_call("a", "nothing")]),
        Step::Chunks(vec![text("I could not find that.")]),
    ]);
    let relay = relay_with(model.clone(), Arc::new(StaticIndex::new(vec![])), 3);

    let events = collect(&relay, "q").await;

    assert_eq!(
        kinds(&events),
        vec!["start", "searching", "complete", "text", "finish"]
    );
    match model.requests()[1].messages.last() {
        Some(ChatMessage::Tool { content, .. }) => assert_eq!(content, NO_RESULTS_CONTEXT),
        other => panic!("unexpected message {other:?}"),
    }
}

#[tokio::test]
async fn final_step_offers_no_tools() {
    let model = ScriptedModel::new(vec![
        Step::Chunks(vec![search_call("a", "one")]),
        Step::Chunks(vec![search_call("b", "two")]),
        Step::Chunks(vec![text("answer"), search_call("c", "ignored")]),
    ]);
    let relay = relay_with(model.clone(), default_index(), 3);

    let events = collect(&relay, "q").await;

    let requests = model.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[1].tools.len(), 1);
    assert!(requests[2].tools.is_empty());

    let searches = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::ToolStatus { data } if data.status == ToolPhase::Searching))
        .count();
    assert_eq!(searches, 2);
    assert_eq!(events.last(), Some(&StreamEvent::Finish));
}

#[tokio::test]
async fn unknown_tool_gets_unavailable_message_without_events() {
    let model = ScriptedModel::new(vec![
        Step::Chunks(vec![tool_call("x", "web_search", "{}")]),
        Step::Chunks(vec![text("fine")]),
    ]);
    let relay = relay_with(model.clone(), default_index(), 3);

    let events = collect(&relay, "q").await;

    assert_eq!(kinds(&events), vec!["start", "text", "finish"]);
    match model.requests()[1].messages.last() {
        Some(ChatMessage::Tool { content, .. }) => {
            assert!(content.contains("'web_search' is not available"))
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[tokio::test]
async fn malformed_arguments_fall_back_to_question() {
    let model = ScriptedModel::new(vec![
        Step::Chunks(vec![tool_call("a", "search_books", "{not json")]),
        Step::Chunks(vec![text("ok")]),
    ]);
    let relay = relay_with(model, default_index(), 3);

    let events = collect(&relay, "What is adab?").await;

    match &events[1] {
        StreamEvent::ToolStatus { data } => {
            assert_eq!(data.query.as_deref(), Some("What is adab?"))
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn rejected_request_ends_with_single_error() {
    let model = ScriptedModel::new(vec![Step::Reject("model unavailable".to_string())]);
    let relay = relay_with(model, default_index(), 3);

    let events = collect(&relay, "q").await;

    assert_eq!(kinds(&events), vec!["start", "error"]);
    assert_eq!(
        events[1],
        StreamEvent::error("LLM error: model unavailable")
    );
}

#[tokio::test]
async fn stream_failure_after_text_ends_with_error() {
    let model = ScriptedModel::new(vec![Step::Break(
        vec![text("partial")],
        "connection reset".to_string(),
    )]);
    let relay = relay_with(model, default_index(), 3);

    let events = collect(&relay, "q").await;

    assert_eq!(kinds(&events), vec!["start", "text", "error"]);
}

#[tokio::test]
async fn search_failure_ends_after_searching() {
    let model = ScriptedModel::new(vec![Step::Chunks(vec![search_call("a", "q")])]);
    let relay = relay_with(model, Arc::new(FailingIndex), 3);

    let events = collect(&relay, "q").await;

    assert_eq!(kinds(&events), vec!["start", "searching", "error"]);
    match events.last() {
        Some(StreamEvent::Error { error_text }) => {
            assert!(error_text.contains("Collection 'books' not found"))
        }
        other => panic!("unexpected event {other:?}"),
    }
}
