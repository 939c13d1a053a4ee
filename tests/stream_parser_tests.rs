use sentinel::api::stream::StreamParser;
use sentinel::types::{EventKind, Payload};

#[test]
fn test_fragmented_frames() {
    let mut parser = StreamParser::new();

    let events1 = parser.process(b"event: token\ndata: {\"del");
    assert!(events1.is_empty());

    let events2 = parser.process(b"ta\":\"Hi\"}\n\nevent: run_fin");
    assert_eq!(events2.len(), 1);
    assert_eq!(events2[0].kind, EventKind::Token);
    assert_eq!(events2[0].delta(), Some("Hi"));

    let events3 = parser.process(b"ished\ndata: {}\n\n");
    assert_eq!(events3.len(), 1);
    assert_eq!(events3[0].kind, EventKind::RunFinished);
    assert!(parser.remainder().is_empty());
}

#[test]
fn test_invalid_json_falls_back_to_raw_payload() {
    let mut parser = StreamParser::new();

    let events = parser.process(b"event: token\ndata: {invalid json}\n\n");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload, Payload::Raw("{invalid json}".to_string()));
    assert_eq!(events[0].delta(), None);
}

#[test]
fn test_tool_call_frame_with_id_line() {
    let mut parser = StreamParser::new();

    let events = parser.process(
        b"event: tool_call_started\nid: call-7\ndata: {\"tool\":\"mcp__exa__exa_search\"}\n\n",
    );
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.kind, EventKind::ToolCallStarted);
    assert_eq!(event.id.as_deref(), Some("call-7"));
    assert_eq!(event.tool_name(), Some("mcp__exa__exa_search"));
    assert_eq!(event.effective_id(), Some("call-7"));
}

#[test]
fn test_frame_without_event_line_is_a_message() {
    let mut parser = StreamParser::new();

    let events = parser.process(b"data: plain text\n\n");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Message);
    assert_eq!(events[0].payload, Payload::Raw("plain text".to_string()));
}

#[test]
fn test_unknown_event_kind_passes_through() {
    let mut parser = StreamParser::new();

    let events = parser.process(b"event: heartbeat\ndata: {\"n\":1}\n\n");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Other("heartbeat".to_string()));
}

#[test]
fn test_several_frames_in_one_chunk_keep_order() {
    let mut parser = StreamParser::new();

    let chunk = b"event: run_started\ndata: {\"ts\":1700000000}\n\n\
event: token\ndata: {\"delta\":\"a\"}\n\n\
event: token\ndata: {\"delta\":\"b\"}\n\n";
    let events = parser.process(chunk);
    let kinds: Vec<&str> = events.iter().map(|event| event.kind.as_str()).collect();
    assert_eq!(kinds, vec!["run_started", "token", "token"]);
    assert_eq!(events[0].payload.f64_field("ts"), Some(1_700_000_000.0));
}

#[test]
fn test_flush_returns_unterminated_frame() {
    let mut parser = StreamParser::new();

    assert!(parser.process(b"event: token\ndata: {\"delta\":\"x\"}").is_empty());
    assert_eq!(parser.flush(), "event: token\ndata: {\"delta\":\"x\"}");
    assert!(parser.remainder().is_empty());
}
