//! SCRI <-> OpenAI Chat Completions conversion
//!
//! Shared by the openai, xai, and local adapters; all three speak this
//! wire format.

use serde_json::json;

use super::{DriftNote, simple_id};
use crate::error::{AdapterError, ErrorKind};
use crate::protocol::openai::{
    OpenAiContent, OpenAiContentPart, OpenAiFunction, OpenAiFunctionCall, OpenAiImageUrl, OpenAiMessage,
    OpenAiRequest, OpenAiResponse, OpenAiStreamChunk, OpenAiStreamOptions, OpenAiTool, OpenAiToolCall, OpenAiUsage,
};
use crate::types::{
    ChatRequest, ChatResponse, Content, ContentBlock, FinishReason, ImageSource, Message, Role, StreamEvent,
    ThinkingBlock, ToolCall, ToolChoice, ToolChoiceMode, Usage,
};

/// Mapping summary for this family, versioned by the reload manager and
/// handed to the heal model as the adapter's last-known contract
pub const MAPPING_SPEC: &str = "\
family: openai chat completions
endpoint: POST {base}/chat/completions
roles: system->system user->user assistant->assistant tool->tool (tool_call_id from tool_result block)
content: text->string|parts[text], image->parts[image_url] (base64 as data URI)
tool defs: {type:function, function:{name, description, parameters}}
tool calls: choices[].message.tool_calls[] {id, function:{name, arguments:json-string}}
finish: stop->stop tool_calls->tool_calls length->length content_filter->content_filter
usage: prompt_tokens->input output->completion, prompt_tokens_details.cached_tokens->cache_read,
       completion_tokens_details.reasoning_tokens->reasoning
stream: choices[].delta {content | tool_calls[index,id?,function{name?,arguments?}]},
        finish_reason on last content chunk, usage chunk after it, then [DONE]
";

// -- Outbound: SCRI -> wire --

/// Build the wire request
pub fn request_to_wire(request: &ChatRequest, model: &str, stream: bool) -> OpenAiRequest {
    OpenAiRequest {
        model: model.to_owned(),
        messages: messages_to_wire(&request.messages),
        temperature: request.temperature,
        top_p: request.top_p,
        max_completion_tokens: request.max_tokens,
        stream: stream.then_some(true),
        stream_options: stream.then_some(OpenAiStreamOptions { include_usage: true }),
        tools: request.tools.as_ref().map(|tools| tools_to_wire(tools)),
        tool_choice: request.tool_choice.as_ref().map(tool_choice_to_wire),
    }
}

/// Convert SCRI messages to wire messages (pure)
pub fn messages_to_wire(messages: &[Message]) -> Vec<OpenAiMessage> {
    let mut wire = Vec::with_capacity(messages.len());

    for message in messages {
        match &message.content {
            Content::Text(text) => wire.push(OpenAiMessage {
                role: message.role.as_str().to_owned(),
                content: Some(OpenAiContent::Text(text.clone())),
                tool_calls: None,
                tool_call_id: None,
                name: message.name.clone(),
            }),
            Content::Blocks(blocks) => {
                let mut parts = Vec::new();
                let mut tool_calls = Vec::new();
                let mut tool_results = Vec::new();

                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => parts.push(OpenAiContentPart::Text { text: text.clone() }),
                        ContentBlock::Image { source } => parts.push(OpenAiContentPart::ImageUrl {
                            image_url: OpenAiImageUrl {
                                url: image_source_to_url(source),
                            },
                        }),
                        ContentBlock::ToolUse { id, name, input } => tool_calls.push(OpenAiToolCall {
                            id: id.clone(),
                            tool_type: Some("function".to_owned()),
                            function: OpenAiFunctionCall {
                                name: name.clone(),
                                arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_owned()),
                            },
                        }),
                        ContentBlock::ToolResult {
                            tool_use_id, content, ..
                        } => tool_results.push((tool_use_id.clone(), value_to_text(content))),
                        // Reasoning is never echoed back on this wire
                        ContentBlock::Thinking { .. } => {}
                    }
                }

                // Tool results become standalone role-"tool" messages
                for (tool_call_id, text) in tool_results {
                    wire.push(OpenAiMessage {
                        role: "tool".to_owned(),
                        content: Some(OpenAiContent::Text(text)),
                        tool_calls: None,
                        tool_call_id: Some(tool_call_id),
                        name: None,
                    });
                }

                if !parts.is_empty() || !tool_calls.is_empty() {
                    let content = if parts.is_empty() {
                        None
                    } else {
                        Some(OpenAiContent::Parts(parts))
                    };
                    wire.push(OpenAiMessage {
                        role: message.role.as_str().to_owned(),
                        content,
                        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                        tool_call_id: None,
                        name: message.name.clone(),
                    });
                }
            }
        }
    }

    wire
}

/// Convert SCRI tools to wire tool definitions (pure)
pub fn tools_to_wire(tools: &[crate::types::Tool]) -> Vec<OpenAiTool> {
    tools
        .iter()
        .map(|tool| OpenAiTool {
            tool_type: "function".to_owned(),
            function: OpenAiFunction {
                name: tool.name.clone(),
                description: Some(tool.description.clone()),
                parameters: Some(tool.parameters.clone()),
            },
        })
        .collect()
}

fn tool_choice_to_wire(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => json!("auto"),
        ToolChoice::Mode(ToolChoiceMode::None) => json!("none"),
        ToolChoice::Mode(ToolChoiceMode::Any) => json!("required"),
        ToolChoice::Named { name } => json!({"type": "function", "function": {"name": name}}),
    }
}

fn image_source_to_url(source: &ImageSource) -> String {
    match source {
        ImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
        ImageSource::Url { url } => url.clone(),
    }
}

fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// -- Inbound: wire -> SCRI --

/// Convert a wire response to a SCRI response
///
/// A response with no choices at all is a load-bearing gap and raises
/// `schema_mismatch`; softer gaps are reported through `drift`.
pub fn response_to_scri(
    provider: &str,
    response: OpenAiResponse,
    drift: &mut Vec<DriftNote>,
) -> Result<ChatResponse, AdapterError> {
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(AdapterError::new(
            ErrorKind::SchemaMismatch,
            provider,
            "response contained no choices",
        ));
    };

    let message = choice.message;

    let tool_calls = match message.tool_calls {
        Some(calls) => {
            let mut converted = Vec::with_capacity(calls.len());
            for call in calls {
                converted.push(wire_tool_call_to_scri(provider, call)?);
            }
            Some(converted)
        }
        None => None,
    };

    let thinking = message.reasoning_content.map(|thinking| {
        vec![ThinkingBlock {
            thinking,
            signature: None,
        }]
    });

    let finish_reason = match choice.finish_reason.as_deref() {
        Some("stop") => FinishReason::Stop,
        Some("tool_calls") | Some("function_call") => FinishReason::ToolCalls,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        Some(other) => {
            drift.push(DriftNote::new(
                ErrorKind::UnknownField,
                format!("unmapped finish_reason '{other}'"),
            ));
            FinishReason::Stop
        }
        None => {
            if tool_calls.is_some() {
                FinishReason::ToolCalls
            } else {
                FinishReason::Stop
            }
        }
    };

    if response.usage.is_none() {
        drift.push(DriftNote::new(ErrorKind::SchemaMismatch, "usage missing from response"));
    }

    let content_text = message.content.unwrap_or_default();
    // Reasoning-only turns are valid content
    if content_text.is_empty() && tool_calls.is_none() && thinking.is_none() {
        return Err(AdapterError::new(
            ErrorKind::SchemaMismatch,
            provider,
            "response carried no content, tool calls, or reasoning",
        ));
    }

    let id = if response.id.is_empty() {
        simple_id("chat")
    } else {
        response.id
    };

    Ok(ChatResponse {
        id,
        model: response.model,
        provider: provider.to_owned(),
        content: Content::Text(content_text),
        tool_calls,
        thinking,
        finish_reason,
        usage: response.usage.map(usage_to_scri),
        lineage: Default::default(),
    })
}

/// Decode one wire tool call; undecodable arguments mean the provider's
/// tool format drifted
fn wire_tool_call_to_scri(provider: &str, call: OpenAiToolCall) -> Result<ToolCall, AdapterError> {
    let arguments: serde_json::Value = serde_json::from_str(&call.function.arguments).map_err(|e| {
        AdapterError::new(
            ErrorKind::ToolSchemaDrift,
            provider,
            format!("tool call arguments are not valid JSON: {e}"),
        )
    })?;
    Ok(ToolCall {
        id: call.id,
        name: call.function.name,
        arguments,
    })
}

/// Convert wire usage to SCRI usage
pub fn usage_to_scri(usage: OpenAiUsage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        cache_read_tokens: usage
            .prompt_tokens_details
            .as_ref()
            .map(|d| d.cached_tokens)
            .filter(|&n| n > 0),
        cache_write_tokens: None,
        reasoning_tokens: usage
            .completion_tokens_details
            .as_ref()
            .map(|d| d.reasoning_tokens)
            .filter(|&n| n > 0),
    }
}

// -- Streaming --

/// Incremental converter from wire stream chunks to SCRI stream events
///
/// OpenAI sends `finish_reason` before the usage chunk; SCRI requires the
/// terminal `finish` event last, so the finish reason is held until the
/// stream ends.
#[derive(Debug, Default)]
pub struct OpenAiStreamState {
    open_calls: Vec<u32>,
    pending_finish: Option<FinishReason>,
    finished: bool,
}

impl OpenAiStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert one chunk into zero or more SCRI events
    pub fn convert_chunk(&mut self, chunk: OpenAiStreamChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content
                && !text.is_empty()
            {
                events.push(StreamEvent::TextDelta { text });
            }

            if let Some(thinking) = choice.delta.reasoning_content
                && !thinking.is_empty()
            {
                events.push(StreamEvent::ThinkingDelta { thinking });
            }

            for fragment in choice.delta.tool_calls.unwrap_or_default() {
                let index = fragment.index;
                if let Some(id) = fragment.id {
                    let name = fragment
                        .function
                        .as_ref()
                        .and_then(|f| f.name.clone())
                        .unwrap_or_default();
                    self.open_calls.push(index);
                    events.push(StreamEvent::ToolCallStart { index, id, name });
                    if let Some(arguments) = fragment.function.and_then(|f| f.arguments)
                        && !arguments.is_empty()
                    {
                        events.push(StreamEvent::ToolCallArgDelta { index, arguments });
                    }
                } else if let Some(arguments) = fragment.function.and_then(|f| f.arguments)
                    && !arguments.is_empty()
                {
                    events.push(StreamEvent::ToolCallArgDelta { index, arguments });
                }
            }

            if let Some(reason) = choice.finish_reason {
                // Tool calls are complete once the finish chunk arrives
                for index in self.open_calls.drain(..) {
                    events.push(StreamEvent::ToolCallEnd { index });
                }
                self.pending_finish = Some(match reason.as_str() {
                    "tool_calls" | "function_call" => FinishReason::ToolCalls,
                    "length" => FinishReason::Length,
                    "content_filter" => FinishReason::ContentFilter,
                    _ => FinishReason::Stop,
                });
            }
        }

        if let Some(usage) = chunk.usage {
            events.push(StreamEvent::UsageUpdate {
                usage: usage_to_scri(usage),
            });
        }

        events
    }

    /// Terminal events once the wire stream ends (`[DONE]` or EOF)
    pub fn end(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events: Vec<StreamEvent> = self
            .open_calls
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
    use crate::protocol::openai::{OpenAiChoice, OpenAiChoiceMessage, OpenAiStreamChoice, OpenAiStreamDelta};
    use crate::types::Tool;

    fn request_with_blocks() -> ChatRequest {
        ChatRequest {
            messages: vec![
                Message::text(Role::System, "be brief"),
                Message {
                    role: Role::User,
                    content: Content::Blocks(vec![
                        ContentBlock::Text {
                            text: "what is in this image?".to_owned(),
                        },
                        ContentBlock::Image {
                            source: ImageSource::Base64 {
                                media_type: "image/png".to_owned(),
                                data: "aGVsbG8=".to_owned(),
                            },
                        },
                    ]),
                    name: None,
                },
            ],
            model: "gpt-4.1".to_owned(),
            temperature: Some(0.2),
            max_tokens: Some(100),
            top_p: None,
            tools: None,
            tool_choice: None,
            thinking: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn roles_and_blocks_survive_conversion() {
        let wire = messages_to_wire(&request_with_blocks().messages);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[1].role, "user");
        match wire[1].content.as_ref().unwrap() {
            OpenAiContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(&parts[1], OpenAiContentPart::ImageUrl { image_url }
                    if image_url.url.starts_with("data:image/png;base64,")));
            }
            OpenAiContent::Text(_) => panic!("expected parts"),
        }
    }

    #[test]
    fn tool_result_becomes_tool_role_message() {
        let messages = vec![Message {
            role: Role::Tool,
            content: Content::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: "call_1".to_owned(),
                content: serde_json::json!({"temp": 21}),
                is_error: None,
            }]),
            name: None,
        }];
        let wire = messages_to_wire(&messages);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, "tool");
        assert_eq!(wire[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn echo_round_trip_preserves_text() {
        let original = "the quick brown fox";
        let response = OpenAiResponse {
            id: "chatcmpl-1".to_owned(),
            model: "gpt-4.1".to_owned(),
            choices: vec![OpenAiChoice {
                index: 0,
                message: OpenAiChoiceMessage {
                    role: "assistant".to_owned(),
                    content: Some(original.to_owned()),
                    reasoning_content: None,
                    tool_calls: None,
                },
                finish_reason: Some("stop".to_owned()),
            }],
            usage: Some(OpenAiUsage {
                prompt_tokens: 4,
                completion_tokens: 5,
                total_tokens: 9,
                ..Default::default()
            }),
        };

        let mut drift = Vec::new();
        let scri = response_to_scri("openai", response, &mut drift).unwrap();
        assert!(drift.is_empty());
        assert_eq!(scri.content.as_text(), original);
        assert_eq!(scri.finish_reason, FinishReason::Stop);
        assert_eq!(scri.usage.unwrap().total_tokens, 9);
    }

    #[test]
    fn empty_choices_is_schema_mismatch() {
        let response = OpenAiResponse {
            id: String::new(),
            model: String::new(),
            choices: vec![],
            usage: None,
        };
        let mut drift = Vec::new();
        let err = response_to_scri("openai", response, &mut drift).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SchemaMismatch);
    }

    #[test]
    fn garbled_tool_arguments_is_tool_schema_drift() {
        let response = OpenAiResponse {
            id: "x".to_owned(),
            model: "m".to_owned(),
            choices: vec![OpenAiChoice {
                index: 0,
                message: OpenAiChoiceMessage {
                    role: "assistant".to_owned(),
                    content: None,
                    reasoning_content: None,
                    tool_calls: Some(vec![OpenAiToolCall {
                        id: "call_1".to_owned(),
                        tool_type: None,
                        function: OpenAiFunctionCall {
                            name: "lookup".to_owned(),
                            arguments: "{not json".to_owned(),
                        },
                    }]),
                },
                finish_reason: Some("tool_calls".to_owned()),
            }],
            usage: None,
        };
        let mut drift = Vec::new();
        let err = response_to_scri("openai", response, &mut drift).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolSchemaDrift);
    }

    #[test]
    fn reasoning_only_response_is_valid_content() {
        let response = OpenAiResponse {
            id: "x".to_owned(),
            model: "m".to_owned(),
            choices: vec![OpenAiChoice {
                index: 0,
                message: OpenAiChoiceMessage {
                    role: "assistant".to_owned(),
                    content: None,
                    reasoning_content: Some("chain of thought".to_owned()),
                    tool_calls: None,
                },
                finish_reason: Some("length".to_owned()),
            }],
            usage: Some(OpenAiUsage::default()),
        };

        let mut drift = Vec::new();
        let scri = response_to_scri("openai", response, &mut drift).unwrap();
        assert_eq!(scri.finish_reason, FinishReason::Length);
        assert_eq!(scri.thinking.unwrap()[0].thinking, "chain of thought");
        assert!(scri.content.as_text().is_empty());
    }

    #[test]
    fn unknown_finish_reason_is_soft_drift() {
        let response = OpenAiResponse {
            id: "x".to_owned(),
            model: "m".to_owned(),
            choices: vec![OpenAiChoice {
                index: 0,
                message: OpenAiChoiceMessage {
                    role: "assistant".to_owned(),
                    content: Some("ok".to_owned()),
                    reasoning_content: None,
                    tool_calls: None,
                },
                finish_reason: Some("brand_new_reason".to_owned()),
            }],
            usage: Some(OpenAiUsage::default()),
        };
        let mut drift = Vec::new();
        let scri = response_to_scri("openai", response, &mut drift).unwrap();
        assert_eq!(scri.finish_reason, FinishReason::Stop);
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].kind, ErrorKind::UnknownField);
    }

    #[test]
    fn tool_definitions_keep_schema() {
        let tools = vec![Tool {
            name: "get_weather".to_owned(),
            description: "look up weather".to_owned(),
            parameters: serde_json::json!({"type": "object", "properties": {"location": {"type": "string"}}}),
        }];
        let wire = tools_to_wire(&tools);
        assert_eq!(wire[0].function.name, "get_weather");
        assert_eq!(
            wire[0].function.parameters.as_ref().unwrap()["properties"]["location"]["type"],
            "string"
        );
    }

    #[test]
    fn stream_holds_finish_until_end() {
        let mut state = OpenAiStreamState::new();

        let chunk = OpenAiStreamChunk {
            id: "c".to_owned(),
            model: "m".to_owned(),
            choices: vec![OpenAiStreamChoice {
                index: 0,
                delta: OpenAiStreamDelta {
                    content: Some("hello".to_owned()),
                    ..Default::default()
                },
                finish_reason: Some("stop".to_owned()),
            }],
            usage: None,
        };
        let events = state.convert_chunk(chunk);
        assert!(matches!(events[0], StreamEvent::TextDelta { .. }));
        assert!(!events.iter().any(StreamEvent::is_finish));

        // Usage chunk still lands before the synthesized finish
        let usage_chunk = OpenAiStreamChunk {
            id: "c".to_owned(),
            model: "m".to_owned(),
            choices: vec![],
            usage: Some(OpenAiUsage::default()),
        };
        let events = state.convert_chunk(usage_chunk);
        assert!(matches!(events[0], StreamEvent::UsageUpdate { .. }));

        let terminal = state.end();
        assert_eq!(terminal.len(), 1);
        assert!(terminal[0].is_finish());
        // end() is idempotent
        assert!(state.end().is_empty());
    }

    #[test]
    fn stream_tool_calls_open_and_close() {
        let mut state = OpenAiStreamState::new();
        let start = OpenAiStreamChunk {
            id: "c".to_owned(),
            model: "m".to_owned(),
            choices: vec![OpenAiStreamChoice {
                index: 0,
                delta: OpenAiStreamDelta {
                    tool_calls: Some(vec![crate::protocol::openai::OpenAiStreamToolCall {
                        index: 0,
                        id: Some("call_9".to_owned()),
                        function: Some(crate::protocol::openai::OpenAiStreamFunctionCall {
                            name: Some("lookup".to_owned()),
                            arguments: None,
                        }),
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let events = state.convert_chunk(start);
        assert!(matches!(events[0], StreamEvent::ToolCallStart { index: 0, .. }));

        let finish = OpenAiStreamChunk {
            id: "c".to_owned(),
            model: "m".to_owned(),
            choices: vec![OpenAiStreamChoice {
                index: 0,
                delta: OpenAiStreamDelta::default(),
                finish_reason: Some("tool_calls".to_owned()),
            }],
            usage: None,
        };
        let events = state.convert_chunk(finish);
        assert!(matches!(events[0], StreamEvent::ToolCallEnd { index: 0 }));

        let terminal = state.end();
        assert!(matches!(
            terminal[0],
            StreamEvent::Finish {
                reason: FinishReason::ToolCalls,
                ..
            }
        ));
    }
}
