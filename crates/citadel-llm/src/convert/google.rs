//! SCRI <-> Google Generative Language conversion

use super::{DriftNote, simple_id};
use crate::error::{AdapterError, ErrorKind};
use crate::protocol::google::{
    GoogleContent, GoogleEmbedRequest, GoogleFunctionCallingConfig, GoogleFunctionDeclaration, GoogleFunctionResponse,
    GoogleGenerationConfig, GoogleInlineData, GooglePart, GoogleRequest, GoogleResponse, GoogleThinkingConfig,
    GoogleToolConfig, GoogleToolDeclarations, GoogleUsageMetadata,
};
use crate::types::{
    ChatRequest, ChatResponse, Content, ContentBlock, FinishReason, ImageSource, Message, Role, StreamEvent,
    ThinkingBlock, Tool, ToolCall, ToolChoice, ToolChoiceMode, Usage,
};

/// Mapping summary for this family, versioned by the reload manager and
/// handed to the heal model as the adapter's last-known contract
pub const MAPPING_SPEC: &str = "\
family: google generative language
endpoint: POST {base}/models/{model}:generateContent (+:streamGenerateContent?alt=sse), header x-goog-api-key
roles: system->systemInstruction user->user assistant->model tool->user[functionResponse]
content: parts[{text | inlineData{mimeType,data} | fileData{fileUri} | functionCall | functionResponse}],
         thought:true parts are reasoning
tool defs: tools[{functionDeclarations[{name,description,parameters}]}]
finish: STOP->stop MAX_TOKENS->length SAFETY|PROHIBITED_CONTENT->content_filter, functionCall->tool_calls
usage: promptTokenCount candidatesTokenCount totalTokenCount thoughtsTokenCount cachedContentTokenCount
stream: SSE of GenerateContentResponse chunks; finishReason on the last candidate chunk
";

// -- Outbound: SCRI -> wire --

/// Build the wire request
pub fn request_to_wire(request: &ChatRequest) -> GoogleRequest {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for message in &request.messages {
        match message.role {
            Role::System => system_parts.push(GooglePart::text(message.content.as_text())),
            _ => contents.push(message_to_wire(message)),
        }
    }

    let thinking_config = request.thinking_enabled().then(|| GoogleThinkingConfig {
        thinking_budget: request.thinking_budget(),
        include_thoughts: Some(true),
    });

    GoogleRequest {
        contents,
        system_instruction: (!system_parts.is_empty()).then_some(GoogleContent {
            role: None,
            parts: system_parts,
        }),
        generation_config: Some(GoogleGenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            max_output_tokens: request.max_tokens,
            thinking_config,
        }),
        tools: request.tools.as_ref().map(|tools| {
            vec![GoogleToolDeclarations {
                function_declarations: tools_to_wire(tools),
            }]
        }),
        tool_config: request.tool_choice.as_ref().map(tool_choice_to_wire),
    }
}

/// Convert SCRI messages to wire turns (pure)
pub fn messages_to_wire(messages: &[Message]) -> Vec<GoogleContent> {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(message_to_wire)
        .collect()
}

fn message_to_wire(message: &Message) -> GoogleContent {
    let role = match message.role {
        Role::Assistant => "model",
        _ => "user",
    };

    let parts = match &message.content {
        Content::Text(text) => vec![GooglePart::text(text.clone())],
        Content::Blocks(blocks) => blocks.iter().map(block_to_part).collect(),
    };

    GoogleContent {
        role: Some(role.to_owned()),
        parts,
    }
}

fn block_to_part(block: &ContentBlock) -> GooglePart {
    match block {
        ContentBlock::Text { text } => GooglePart::text(text.clone()),
        ContentBlock::Image { source } => match source {
            ImageSource::Base64 { media_type, data } => GooglePart {
                inline_data: Some(GoogleInlineData {
                    mime_type: media_type.clone(),
                    data: data.clone(),
                }),
                ..GooglePart::default()
            },
            ImageSource::Url { url } => GooglePart {
                file_data: Some(crate::protocol::google::GoogleFileData {
                    mime_type: None,
                    file_uri: url.clone(),
                }),
                ..GooglePart::default()
            },
        },
        ContentBlock::ToolUse { name, input, .. } => GooglePart {
            function_call: Some(crate::protocol::google::GoogleFunctionCall {
                name: name.clone(),
                args: input.clone(),
            }),
            ..GooglePart::default()
        },
        ContentBlock::ToolResult {
            tool_use_id, content, ..
        } => GooglePart {
            function_response: Some(GoogleFunctionResponse {
                // This wire keys results by function name; the call id is
                // carried when the tool name is unknown
                name: tool_use_id.clone(),
                response: wrap_response(content.clone()),
            }),
            ..GooglePart::default()
        },
        ContentBlock::Thinking { thinking, .. } => GooglePart {
            thought: Some(true),
            ..GooglePart::text(thinking.clone())
        },
    }
}

fn wrap_response(value: serde_json::Value) -> serde_json::Value {
    // functionResponse.response must be an object
    if value.is_object() {
        value
    } else {
        serde_json::json!({ "result": value })
    }
}

/// Convert SCRI tools to wire declarations (pure)
pub fn tools_to_wire(tools: &[Tool]) -> Vec<GoogleFunctionDeclaration> {
    tools
        .iter()
        .map(|tool| GoogleFunctionDeclaration {
            name: tool.name.clone(),
            description: Some(tool.description.clone()),
            parameters: Some(tool.parameters.clone()),
        })
        .collect()
}

fn tool_choice_to_wire(choice: &ToolChoice) -> GoogleToolConfig {
    let (mode, allowed) = match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => ("AUTO", None),
        ToolChoice::Mode(ToolChoiceMode::None) => ("NONE", None),
        ToolChoice::Mode(ToolChoiceMode::Any) => ("ANY", None),
        ToolChoice::Named { name } => ("ANY", Some(vec![name.clone()])),
    };
    GoogleToolConfig {
        function_calling_config: GoogleFunctionCallingConfig {
            mode: mode.to_owned(),
            allowed_function_names: allowed,
        },
    }
}

/// Build an `embedContent` request
pub fn embed_to_wire(text: &str, dimensions: Option<u32>) -> GoogleEmbedRequest {
    GoogleEmbedRequest {
        content: GoogleContent {
            role: None,
            parts: vec![GooglePart::text(text)],
        },
        output_dimensionality: dimensions,
    }
}

// -- Inbound: wire -> SCRI --

/// Convert a wire response to a SCRI response
pub fn response_to_scri(
    provider: &str,
    model: &str,
    response: GoogleResponse,
    drift: &mut Vec<DriftNote>,
) -> Result<ChatResponse, AdapterError> {
    let usage = response.usage_metadata.map(usage_to_scri);

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(AdapterError::new(
            ErrorKind::SchemaMismatch,
            provider,
            "response contained no candidates",
        ));
    };

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut thinking = Vec::new();

    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(t) = part.text {
            if part.thought.unwrap_or(false) {
                thinking.push(ThinkingBlock {
                    thinking: t,
                    signature: None,
                });
            } else {
                text.push_str(&t);
            }
        } else if let Some(call) = part.function_call {
            tool_calls.push(ToolCall {
                id: simple_id("call"),
                name: call.name,
                arguments: call.args,
            });
        } else {
            drift.push(DriftNote::new(
                ErrorKind::UnknownField,
                "candidate part with no mapped payload",
            ));
        }
    }

    let finish_reason = match candidate.finish_reason.as_deref() {
        _ if !tool_calls.is_empty() => FinishReason::ToolCalls,
        Some("STOP") | None => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") | Some("PROHIBITED_CONTENT") | Some("BLOCKLIST") => FinishReason::ContentFilter,
        Some(other) => {
            drift.push(DriftNote::new(
                ErrorKind::UnknownField,
                format!("unmapped finishReason '{other}'"),
            ));
            FinishReason::Stop
        }
    };

    // A thought-only candidate (MAX_TOKENS before any visible text) is
    // still valid content
    if text.is_empty() && tool_calls.is_empty() && thinking.is_empty() && finish_reason != FinishReason::ContentFilter {
        return Err(AdapterError::new(
            ErrorKind::SchemaMismatch,
            provider,
            "candidate carried no text, function calls, or thoughts",
        ));
    }

    Ok(ChatResponse {
        id: response.response_id.unwrap_or_else(|| simple_id("gen")),
        model: response.model_version.unwrap_or_else(|| model.to_owned()),
        provider: provider.to_owned(),
        content: Content::Text(text),
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        thinking: if thinking.is_empty() { None } else { Some(thinking) },
        finish_reason,
        usage,
        lineage: Default::default(),
    })
}

fn usage_to_scri(usage: GoogleUsageMetadata) -> Usage {
    Usage {
        input_tokens: usage.prompt_token_count,
        output_tokens: usage.candidates_token_count,
        total_tokens: usage.total_token_count,
        cache_read_tokens: usage.cached_content_token_count.filter(|&n| n > 0),
        cache_write_tokens: None,
        reasoning_tokens: usage.thoughts_token_count.filter(|&n| n > 0),
    }
}

// -- Streaming --

/// Incremental converter over streamed `GenerateContentResponse` chunks
#[derive(Debug, Default)]
pub struct GoogleStreamState {
    next_call_index: u32,
    pending_finish: Option<FinishReason>,
    finished: bool,
}

impl GoogleStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert one chunk into zero or more SCRI events
    ///
    /// This wire has no explicit done marker; the chunk carrying a
    /// `finishReason` is the last meaningful one, so the terminal SCRI
    /// event is flushed right after it.
    pub fn convert_chunk(&mut self, chunk: GoogleResponse) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let mut saw_finish_reason = false;

        for candidate in chunk.candidates {
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if let Some(text) = part.text {
                    if part.thought.unwrap_or(false) {
                        events.push(StreamEvent::ThinkingDelta { thinking: text });
                    } else if !text.is_empty() {
                        events.push(StreamEvent::TextDelta { text });
                    }
                } else if let Some(call) = part.function_call {
                    // This wire delivers whole calls; expand to the SCRI
                    // start/delta/end triple
                    let index = self.next_call_index;
                    self.next_call_index += 1;
                    events.push(StreamEvent::ToolCallStart {
                        index,
                        id: simple_id("call"),
                        name: call.name,
                    });
                    events.push(StreamEvent::ToolCallArgDelta {
                        index,
                        arguments: call.args.to_string(),
                    });
                    events.push(StreamEvent::ToolCallEnd { index });
                    self.pending_finish = Some(FinishReason::ToolCalls);
                }
            }

            if let Some(reason) = candidate.finish_reason {
                saw_finish_reason = true;
                let mapped = match reason.as_str() {
                    "MAX_TOKENS" => FinishReason::Length,
                    "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" => FinishReason::ContentFilter,
                    _ => FinishReason::Stop,
                };
                if self.pending_finish != Some(FinishReason::ToolCalls) || mapped != FinishReason::Stop {
                    self.pending_finish = Some(mapped);
                }
            }
        }

        if let Some(usage) = chunk.usage_metadata {
            events.push(StreamEvent::UsageUpdate {
                usage: usage_to_scri(usage),
            });
        }

        if saw_finish_reason {
            events.extend(self.end());
        }

        events
    }

    /// Terminal events once the wire stream ends
    pub fn end(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![StreamEvent::finish(self.pending_finish.take().unwrap_or(FinishReason::Stop))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::google::GoogleCandidate;

    #[test]
    fn roles_map_to_user_and_model() {
        let messages = vec![
            Message::text(Role::User, "hello"),
            Message::text(Role::Assistant, "hi"),
        ];
        let wire = messages_to_wire(&messages);
        assert_eq!(wire[0].role.as_deref(), Some("user"));
        assert_eq!(wire[1].role.as_deref(), Some("model"));
    }

    #[test]
    fn system_becomes_system_instruction() {
        let request = ChatRequest {
            messages: vec![
                Message::text(Role::System, "speak Latin"),
                Message::text(Role::User, "salve"),
            ],
            model: "gemini-2.5-flash".to_owned(),
            temperature: None,
            max_tokens: Some(64),
            top_p: None,
            tools: None,
            tool_choice: None,
            thinking: None,
            metadata: Default::default(),
        };
        let wire = request_to_wire(&request);
        assert!(wire.system_instruction.is_some());
        assert_eq!(wire.contents.len(), 1);
        assert_eq!(
            wire.generation_config.unwrap().max_output_tokens,
            Some(64)
        );
    }

    #[test]
    fn function_call_gets_generated_id() {
        let response = GoogleResponse {
            candidates: vec![GoogleCandidate {
                content: Some(GoogleContent {
                    role: Some("model".to_owned()),
                    parts: vec![GooglePart {
                        function_call: Some(crate::protocol::google::GoogleFunctionCall {
                            name: "get_weather".to_owned(),
                            args: serde_json::json!({"location": "Porto"}),
                        }),
                        ..GooglePart::default()
                    }],
                }),
                finish_reason: Some("STOP".to_owned()),
            }],
            usage_metadata: None,
            response_id: None,
            model_version: None,
        };

        let mut drift = Vec::new();
        let scri = response_to_scri("google", "gemini-2.5-flash", response, &mut drift).unwrap();
        assert_eq!(scri.finish_reason, FinishReason::ToolCalls);
        let calls = scri.tool_calls.unwrap();
        assert!(!calls[0].id.is_empty());
        assert_eq!(calls[0].name, "get_weather");
    }

    #[test]
    fn thought_only_candidate_is_valid_content() {
        let response = GoogleResponse {
            candidates: vec![GoogleCandidate {
                content: Some(GoogleContent {
                    role: Some("model".to_owned()),
                    parts: vec![GooglePart {
                        thought: Some(true),
                        ..GooglePart::text("considering the options")
                    }],
                }),
                finish_reason: Some("MAX_TOKENS".to_owned()),
            }],
            usage_metadata: None,
            response_id: None,
            model_version: None,
        };

        let mut drift = Vec::new();
        let scri = response_to_scri("google", "gemini-2.5-pro", response, &mut drift).unwrap();
        assert_eq!(scri.finish_reason, FinishReason::Length);
        assert_eq!(scri.thinking.unwrap()[0].thinking, "considering the options");
        assert!(scri.content.as_text().is_empty());
    }

    #[test]
    fn stream_expands_whole_function_call() {
        let mut state = GoogleStreamState::new();
        let chunk = GoogleResponse {
            candidates: vec![GoogleCandidate {
                content: Some(GoogleContent {
                    role: Some("model".to_owned()),
                    parts: vec![GooglePart {
                        function_call: Some(crate::protocol::google::GoogleFunctionCall {
                            name: "lookup".to_owned(),
                            args: serde_json::json!({"q": "x"}),
                        }),
                        ..GooglePart::default()
                    }],
                }),
                finish_reason: None,
            }],
            usage_metadata: None,
            response_id: None,
            model_version: None,
        };

        let events = state.convert_chunk(chunk);
        assert!(matches!(events[0], StreamEvent::ToolCallStart { index: 0, .. }));
        assert!(matches!(events[1], StreamEvent::ToolCallArgDelta { index: 0, .. }));
        assert!(matches!(events[2], StreamEvent::ToolCallEnd { index: 0 }));

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
