//! SCRI <-> Anthropic Messages API conversion

use super::{DriftNote, simple_id};
use crate::error::{AdapterError, ErrorKind};
use crate::protocol::anthropic::{
    AnthropicContent, AnthropicContentBlock, AnthropicImageSource, AnthropicMessage, AnthropicRequest,
    AnthropicResponse, AnthropicStreamDelta, AnthropicStreamEvent, AnthropicThinking, AnthropicTool,
    AnthropicToolChoice, AnthropicUsage,
};
use crate::types::{
    ChatRequest, ChatResponse, Content, ContentBlock, FinishReason, ImageSource, Message, Role, StreamEvent,
    ThinkingBlock, Tool, ToolCall, ToolChoice, ToolChoiceMode, Usage,
};

/// Anthropic requires the field; used when the caller does not set one
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Mapping summary for this family, versioned by the reload manager and
/// handed to the heal model as the adapter's last-known contract
pub const MAPPING_SPEC: &str = "\
family: anthropic messages
endpoint: POST {base}/messages, headers x-api-key + anthropic-version
roles: system->top-level system field, user->user assistant->assistant tool->user[tool_result]
content blocks: text, image{source:{base64|url}}, tool_use{id,name,input}, tool_result{tool_use_id},
                thinking{thinking,signature}
tool defs: {name, description, input_schema}
finish: end_turn|stop_sequence->stop tool_use->tool_calls max_tokens->length refusal->content_filter
usage: input_tokens output_tokens cache_read_input_tokens cache_creation_input_tokens
stream: message_start / content_block_start|delta|stop (text_delta, thinking_delta,
        input_json_delta) / message_delta{stop_reason} / message_stop
";

// -- Outbound: SCRI -> wire --

/// Build the wire request
pub fn request_to_wire(request: &ChatRequest, model: &str, stream: bool) -> AnthropicRequest {
    let mut system = None;
    let mut messages = Vec::new();

    for message in &request.messages {
        match message.role {
            Role::System => system = Some(message.content.as_text()),
            _ => messages.push(message_to_wire(message)),
        }
    }

    let thinking = request.thinking_enabled().then(|| AnthropicThinking {
        thinking_type: "enabled".to_owned(),
        // API floor for the budget
        budget_tokens: request.thinking_budget().max(1024),
    });

    AnthropicRequest {
        model: model.to_owned(),
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system,
        messages,
        // Temperature is rejected alongside thinking
        temperature: if thinking.is_some() { None } else { request.temperature },
        top_p: request.top_p,
        stream: stream.then_some(true),
        tools: request.tools.as_ref().map(|tools| tools_to_wire(tools)),
        tool_choice: request.tool_choice.as_ref().map(tool_choice_to_wire),
        thinking,
    }
}

/// Convert SCRI messages to wire messages (pure)
pub fn messages_to_wire(messages: &[Message]) -> Vec<AnthropicMessage> {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(message_to_wire)
        .collect()
}

fn message_to_wire(message: &Message) -> AnthropicMessage {
    // Tool results travel in user-role turns on this wire
    let role = match message.role {
        Role::Assistant => "assistant",
        _ => "user",
    };

    let content = match &message.content {
        Content::Text(text) => AnthropicContent::Text(text.clone()),
        Content::Blocks(blocks) => {
            AnthropicContent::Blocks(blocks.iter().map(block_to_wire).collect())
        }
    };

    AnthropicMessage {
        role: role.to_owned(),
        content,
    }
}

fn block_to_wire(block: &ContentBlock) -> AnthropicContentBlock {
    match block {
        ContentBlock::Text { text } => AnthropicContentBlock::Text { text: text.clone() },
        ContentBlock::Image { source } => AnthropicContentBlock::Image {
            source: match source {
                ImageSource::Base64 { media_type, data } => AnthropicImageSource {
                    source_type: "base64".to_owned(),
                    media_type: Some(media_type.clone()),
                    data: Some(data.clone()),
                    url: None,
                },
                ImageSource::Url { url } => AnthropicImageSource {
                    source_type: "url".to_owned(),
                    media_type: None,
                    data: None,
                    url: Some(url.clone()),
                },
            },
        },
        ContentBlock::ToolUse { id, name, input } => AnthropicContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => AnthropicContentBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: Some(content.clone()),
            is_error: *is_error,
        },
        ContentBlock::Thinking { thinking, signature } => AnthropicContentBlock::Thinking {
            thinking: thinking.clone(),
            signature: signature.clone(),
        },
    }
}

/// Convert SCRI tools to wire tool definitions (pure)
pub fn tools_to_wire(tools: &[Tool]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|tool| AnthropicTool {
            name: tool.name.clone(),
            description: Some(tool.description.clone()),
            input_schema: tool.parameters.clone(),
        })
        .collect()
}

fn tool_choice_to_wire(choice: &ToolChoice) -> AnthropicToolChoice {
    let (choice_type, name) = match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => ("auto", None),
        ToolChoice::Mode(ToolChoiceMode::None) => ("none", None),
        ToolChoice::Mode(ToolChoiceMode::Any) => ("any", None),
        ToolChoice::Named { name } => ("tool", Some(name.clone())),
    };
    AnthropicToolChoice {
        choice_type: choice_type.to_owned(),
        name,
    }
}

// -- Inbound: wire -> SCRI --

/// Convert a wire response to a SCRI response
pub fn response_to_scri(
    provider: &str,
    response: AnthropicResponse,
    drift: &mut Vec<DriftNote>,
) -> Result<ChatResponse, AdapterError> {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut thinking = Vec::new();

    for block in response.content {
        match block {
            AnthropicContentBlock::Text { text: t } => text.push_str(&t),
            AnthropicContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
            AnthropicContentBlock::Thinking {
                thinking: t,
                signature,
            } => thinking.push(ThinkingBlock { thinking: t, signature }),
            other => drift.push(DriftNote::new(
                ErrorKind::SchemaMismatch,
                format!("unexpected response block: {other:?}"),
            )),
        }
    }

    // A thinking-only turn (e.g. max_tokens hit before any visible text)
    // is still valid content
    if text.is_empty() && tool_calls.is_empty() && thinking.is_empty() {
        return Err(AdapterError::new(
            ErrorKind::SchemaMismatch,
            provider,
            "response carried no content, tool calls, or thinking",
        ));
    }

    let finish_reason = match response.stop_reason.as_deref() {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("max_tokens") => FinishReason::Length,
        Some("refusal") => FinishReason::ContentFilter,
        Some(other) => {
            drift.push(DriftNote::new(
                ErrorKind::UnknownField,
                format!("unmapped stop_reason '{other}'"),
            ));
            FinishReason::Stop
        }
        None => FinishReason::Stop,
    };

    let id = if response.id.is_empty() {
        simple_id("msg")
    } else {
        response.id
    };

    Ok(ChatResponse {
        id,
        model: response.model,
        provider: provider.to_owned(),
        content: Content::Text(text),
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        thinking: if thinking.is_empty() { None } else { Some(thinking) },
        finish_reason,
        usage: response.usage.map(usage_to_scri),
        lineage: Default::default(),
    })
}

fn usage_to_scri(usage: AnthropicUsage) -> Usage {
    Usage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
        cache_read_tokens: usage.cache_read_input_tokens.filter(|&n| n > 0),
        cache_write_tokens: usage.cache_creation_input_tokens.filter(|&n| n > 0),
        reasoning_tokens: None,
    }
}

// -- Streaming --

/// Incremental converter from wire stream events to SCRI stream events
#[derive(Debug, Default)]
pub struct AnthropicStreamState {
    /// Block indexes that opened as tool_use
    tool_blocks: Vec<u32>,
    pending_finish: Option<FinishReason>,
    finished: bool,
}

impl AnthropicStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert one wire event into zero or more SCRI events
    pub fn convert_event(&mut self, event: AnthropicStreamEvent) -> Vec<StreamEvent> {
        match event {
            AnthropicStreamEvent::MessageStart { message } => message
                .usage
                .map(|usage| {
                    vec![StreamEvent::UsageUpdate {
                        usage: usage_to_scri(usage),
                    }]
                })
                .unwrap_or_default(),
            AnthropicStreamEvent::ContentBlockStart { index, content_block } => match content_block {
                AnthropicContentBlock::ToolUse { id, name, .. } => {
                    self.tool_blocks.push(index);
                    vec![StreamEvent::ToolCallStart { index, id, name }]
                }
                _ => Vec::new(),
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicStreamDelta::TextDelta { text } => vec![StreamEvent::TextDelta { text }],
                AnthropicStreamDelta::ThinkingDelta { thinking } => {
                    vec![StreamEvent::ThinkingDelta { thinking }]
                }
                AnthropicStreamDelta::InputJsonDelta { partial_json } => vec![StreamEvent::ToolCallArgDelta {
                    index,
                    arguments: partial_json,
                }],
                AnthropicStreamDelta::SignatureDelta { .. } => Vec::new(),
            },
            AnthropicStreamEvent::ContentBlockStop { index } => {
                if let Some(position) = self.tool_blocks.iter().position(|&i| i == index) {
                    self.tool_blocks.swap_remove(position);
                    vec![StreamEvent::ToolCallEnd { index }]
                } else {
                    Vec::new()
                }
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                self.pending_finish = delta.stop_reason.as_deref().map(|reason| match reason {
                    "tool_use" => FinishReason::ToolCalls,
                    "max_tokens" => FinishReason::Length,
                    "refusal" => FinishReason::ContentFilter,
                    _ => FinishReason::Stop,
                });
                usage
                    .map(|usage| {
                        vec![StreamEvent::UsageUpdate {
                            usage: usage_to_scri(usage),
                        }]
                    })
                    .unwrap_or_default()
            }
            AnthropicStreamEvent::MessageStop => self.end(),
            AnthropicStreamEvent::Ping => Vec::new(),
        }
    }

    /// Terminal events; safe to call when the wire stream ends abruptly
    pub fn end(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events: Vec<StreamEvent> = self
            .tool_blocks
            .drain(..)
            .map(|index| StreamEvent::ToolCallEnd { index })
            .collect();
        events.push(StreamEvent::finish(self.pending_finish.take().unwrap_or(FinishReason::Stop)));
        events
    }

    pub const fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::anthropic::{AnthropicMessageDelta, AnthropicStreamMessage};

    #[test]
    fn system_message_lifts_to_top_level() {
        let request = ChatRequest {
            messages: vec![
                Message::text(Role::System, "be precise"),
                Message::text(Role::User, "ping"),
            ],
            model: "claude-sonnet-4-5-20250929".to_owned(),
            temperature: Some(0.5),
            max_tokens: None,
            top_p: None,
            tools: None,
            tool_choice: None,
            thinking: None,
            metadata: Default::default(),
        };

        let wire = request_to_wire(&request, "claude-sonnet-4-5-20250929", false);
        assert_eq!(wire.system.as_deref(), Some("be precise"));
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn thinking_suppresses_temperature() {
        let request = ChatRequest {
            messages: vec![Message::text(Role::User, "think hard")],
            model: "claude-opus-4-5-20251101".to_owned(),
            temperature: Some(0.9),
            max_tokens: Some(2000),
            top_p: None,
            tools: None,
            tool_choice: None,
            thinking: Some(crate::types::ThinkingConfig {
                enabled: true,
                budget_tokens: 512,
            }),
            metadata: Default::default(),
        };

        let wire = request_to_wire(&request, "claude-opus-4-5-20251101", false);
        assert!(wire.temperature.is_none());
        // Budget is floored at the API minimum
        assert_eq!(wire.thinking.unwrap().budget_tokens, 1024);
    }

    #[test]
    fn echo_round_trip_preserves_blocks() {
        let original = Message {
            role: Role::User,
            content: Content::Blocks(vec![
                ContentBlock::Text { text: "run it".to_owned() },
                ContentBlock::ToolResult {
                    tool_use_id: "toolu_1".to_owned(),
                    content: serde_json::json!("42"),
                    is_error: None,
                },
            ]),
            name: None,
        };

        let wire = messages_to_wire(std::slice::from_ref(&original));
        assert_eq!(wire.len(), 1);
        match &wire[0].content {
            AnthropicContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert!(matches!(&blocks[1], AnthropicContentBlock::ToolResult { tool_use_id, .. }
                    if tool_use_id == "toolu_1"));
            }
            AnthropicContent::Text(_) => panic!("expected blocks"),
        }
    }

    #[test]
    fn response_with_tool_use_maps_to_tool_calls() {
        let response = AnthropicResponse {
            id: "msg_1".to_owned(),
            model: "claude-sonnet-4-5-20250929".to_owned(),
            content: vec![
                AnthropicContentBlock::Text {
                    text: "checking".to_owned(),
                },
                AnthropicContentBlock::ToolUse {
                    id: "toolu_9".to_owned(),
                    name: "get_weather".to_owned(),
                    input: serde_json::json!({"location": "Lisbon"}),
                },
            ],
            stop_reason: Some("tool_use".to_owned()),
            usage: Some(AnthropicUsage {
                input_tokens: 10,
                output_tokens: 7,
                ..Default::default()
            }),
        };

        let mut drift = Vec::new();
        let scri = response_to_scri("anthropic", response, &mut drift).unwrap();
        assert_eq!(scri.finish_reason, FinishReason::ToolCalls);
        let calls = scri.tool_calls.unwrap();
        assert_eq!(calls[0].id, "toolu_9");
        assert_eq!(calls[0].arguments["location"], "Lisbon");
        assert_eq!(scri.usage.unwrap().total_tokens, 17);
    }

    #[test]
    fn thinking_only_response_is_valid_content() {
        let response = AnthropicResponse {
            id: "msg_2".to_owned(),
            model: "claude-opus-4-5-20251101".to_owned(),
            content: vec![AnthropicContentBlock::Thinking {
                thinking: "working through the proof".to_owned(),
                signature: Some("sig".to_owned()),
            }],
            stop_reason: Some("max_tokens".to_owned()),
            usage: None,
        };

        let mut drift = Vec::new();
        let scri = response_to_scri("anthropic", response, &mut drift).unwrap();
        assert_eq!(scri.finish_reason, FinishReason::Length);
        assert!(scri.tool_calls.is_none());
        assert_eq!(scri.thinking.unwrap()[0].thinking, "working through the proof");
        assert!(scri.content.as_text().is_empty());
    }

    #[test]
    fn stream_emits_finish_exactly_once() {
        let mut state = AnthropicStreamState::new();

        let mut events = Vec::new();
        events.extend(state.convert_event(AnthropicStreamEvent::MessageStart {
            message: AnthropicStreamMessage::default(),
        }));
        events.extend(state.convert_event(AnthropicStreamEvent::ContentBlockDelta {
            index: 0,
            delta: AnthropicStreamDelta::TextDelta {
                text: "hi".to_owned(),
            },
        }));
        events.extend(state.convert_event(AnthropicStreamEvent::MessageDelta {
            delta: AnthropicMessageDelta {
                stop_reason: Some("end_turn".to_owned()),
            },
            usage: None,
        }));
        events.extend(state.convert_event(AnthropicStreamEvent::MessageStop));

        let finishes = events.iter().filter(|e| e.is_finish()).count();
        assert_eq!(finishes, 1);
        assert!(events.last().unwrap().is_finish());
        assert!(state.end().is_empty());
    }
}
