use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::llm::{
    Message, ModelEvent, ModelProvider, ModelRequest, ModelStream, Role, ToolCall,
    HANDOFF_TOOL_NAME,
};
use crate::error::AgentError;
use crate::types::TokenUsage;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat-completions backend for any OpenAI-compatible endpoint.
pub struct OpenAICompatibleProvider {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAICompatibleProvider {
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(request: &ModelRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": request.system_prompt}));
        }
        messages.extend(request.messages.iter().map(message_json));

        let params = request.model.effective_parameters();
        let mut body = json!({
            "model": request.model.model_id,
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if let Some(top_p) = params.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(stop) = params.stop_sequences {
            body["stop"] = json!(stop);
        }
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|spec| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": spec.name,
                            "description": spec.description,
                            "parameters": spec.input_schema,
                        }
                    })
                })
                .collect();
        }
        body
    }
}

fn message_json(message: &Message) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut value = json!({"role": role, "content": message.content});
    if message.has_tool_calls() {
        value["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.input.to_string(),
                    }
                })
            })
            .collect();
    }
    if let Some(id) = &message.tool_call_id {
        value["tool_call_id"] = json!(id);
    }
    value
}

/// Translate an HTTP failure into the agent error taxonomy.
pub(crate) fn classify_http_error(status: StatusCode, body: &str) -> AgentError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return AgentError::Throttled(body.to_string());
    }
    if body.contains("context_length_exceeded") || body.contains("maximum context length") {
        return AgentError::ContextWindowOverflow;
    }
    if status.is_client_error() {
        return AgentError::Validation(format!("{}: {}", status, body));
    }
    AgentError::Transport(format!("{}: {}", status, body))
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Incremental decoder for a streamed chat completion.
///
/// Text deltas are emitted as soon as their line is complete. Tool calls
/// arrive in fragments keyed by `index` and are only emitted from `finish`.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    calls: BTreeMap<u64, PendingCall>,
    usage: Option<TokenUsage>,
    done: bool,
}

impl SseDecoder {
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Result<Vec<ModelEvent>, AgentError> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            self.line(&String::from_utf8_lossy(&line), &mut events)?;
        }
        Ok(events)
    }

    pub(crate) fn finish(mut self) -> Result<Vec<ModelEvent>, AgentError> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.line(&String::from_utf8_lossy(&rest), &mut events)?;
        }
        if let Some(usage) = self.usage.take() {
            events.push(ModelEvent::Usage(usage));
        }

        let mut handoff = None;
        let mut tool_uses = Vec::new();
        for call in std::mem::take(&mut self.calls).into_values() {
            let arguments = if call.arguments.trim().is_empty() {
                "{}"
            } else {
                call.arguments.as_str()
            };
            let input: Value = serde_json::from_str(arguments).map_err(|e| {
                AgentError::Validation(format!(
                    "tool arguments for '{}' are not JSON: {}",
                    call.name, e
                ))
            })?;

            if call.name == HANDOFF_TOOL_NAME {
                let target = input["agent_name"].as_str().ok_or_else(|| {
                    AgentError::Validation("handoff is missing agent_name".to_string())
                })?;
                handoff = Some(ModelEvent::Handoff {
                    target: target.to_string(),
                    message: input["message"].as_str().map(str::to_string),
                });
            } else {
                tool_uses.push(ModelEvent::ToolUse(ToolCall {
                    id: call.id,
                    name: call.name,
                    input,
                }));
            }
        }

        // A handoff ends the node, so it wins over any tool calls in the same turn.
        match handoff {
            Some(event) => events.push(event),
            None => {
                events.extend(tool_uses);
                events.push(ModelEvent::Stop);
            }
        }
        Ok(events)
    }

    fn line(&mut self, line: &str, events: &mut Vec<ModelEvent>) -> Result<(), AgentError> {
        let Some(data) = line.trim().strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim();
        if self.done || data.is_empty() {
            return Ok(());
        }
        if data == "[DONE]" {
            self.done = true;
            return Ok(());
        }

        let chunk: Value = serde_json::from_str(data)
            .map_err(|e| AgentError::Transport(format!("malformed stream chunk: {}", e)))?;
        if chunk.get("error").is_some() {
            return Err(classify_http_error(StatusCode::BAD_GATEWAY, data));
        }

        let usage = &chunk["usage"];
        if usage.is_object() {
            self.usage = Some(TokenUsage::new(
                usage["prompt_tokens"].as_u64().unwrap_or(0),
                usage["completion_tokens"].as_u64().unwrap_or(0),
            ));
        }

        let Some(choices) = chunk["choices"].as_array() else {
            return Ok(());
        };
        for choice in choices {
            let delta = &choice["delta"];
            if let Some(text) = delta["content"].as_str() {
                if !text.is_empty() {
                    events.push(ModelEvent::TextDelta(text.to_string()));
                }
            }
            if let Some(calls) = delta["tool_calls"].as_array() {
                for call in calls {
                    let pending = self
                        .calls
                        .entry(call["index"].as_u64().unwrap_or(0))
                        .or_default();
                    if let Some(id) = call["id"].as_str() {
                        pending.id = id.to_string();
                    }
                    if let Some(name) = call["function"]["name"].as_str() {
                        pending.name.push_str(name);
                    }
                    if let Some(arguments) = call["function"]["arguments"].as_str() {
                        pending.arguments.push_str(arguments);
                    }
                }
            }
        }
        Ok(())
    }
}

fn decode_events<S, B>(bytes: S) -> impl Stream<Item = Result<ModelEvent, AgentError>>
where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    async_stream::try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut decoder = SseDecoder::default();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| AgentError::Transport(e.to_string()))?;
            for event in decoder.feed(chunk.as_ref())? {
                yield event;
            }
        }
        for event in decoder.finish()? {
            yield event;
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAICompatibleProvider {
    async fn invoke(&self, request: ModelRequest) -> Result<ModelStream, AgentError> {
        let body = Self::request_body(&request);
        log::debug!(
            "Invoking model {} for node {}",
            request.model.model_id,
            request.node_id
        );

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status, &text));
        }

        Ok(decode_events(response.bytes_stream()).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::ModelConfiguration;
    use crate::providers::llm::ToolSpec;

    #[test]
    fn test_provider_defaults() {
        let provider = OpenAICompatibleProvider::new(None, None);
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);

        let provider = OpenAICompatibleProvider::new(Some("http://localhost:8000/v1/".to_string()), None);
        assert_eq!(provider.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn test_request_body_includes_handoff_tool() {
        let request = ModelRequest {
            node_id: "researcher".to_string(),
            system_prompt: "be brief".to_string(),
            messages: vec![Message::user("hi")],
            tools: vec![ToolSpec::handoff(&["writer".to_string()])],
            model: ModelConfiguration::new("gpt-4o"),
        };

        let body = OpenAICompatibleProvider::request_body(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["tools"][0]["function"]["name"], HANDOFF_TOOL_NAME);
        assert!(body.get("top_p").is_none());
    }

    fn decode(chunks: &[&str]) -> (Vec<ModelEvent>, Vec<ModelEvent>) {
        let mut decoder = SseDecoder::default();
        let mut streamed = Vec::new();
        for chunk in chunks {
            streamed.extend(decoder.feed(chunk.as_bytes()).unwrap());
        }
        (streamed, decoder.finish().unwrap())
    }

    #[test]
    fn test_request_body_streams() {
        let request = ModelRequest {
            node_id: "writer".to_string(),
            system_prompt: String::new(),
            messages: vec![Message::user("hi")],
            tools: vec![],
            model: ModelConfiguration::new("gpt-4o"),
        };

        let body = OpenAICompatibleProvider::request_body(&request);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_text_deltas_stream_before_completion() {
        let (streamed, tail) = decode(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Par\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"is\"}}]}\n\ndata: {\"choices\":[],",
            "\"usage\":{\"prompt_tokens\":12,\"completion_tokens\":2}}\n\ndata: [DONE]\n\n",
        ]);

        assert_eq!(
            streamed,
            vec![
                ModelEvent::TextDelta("Par".to_string()),
                ModelEvent::TextDelta("is".to_string()),
            ]
        );
        assert_eq!(
            tail,
            vec![ModelEvent::Usage(TokenUsage::new(12, 2)), ModelEvent::Stop]
        );
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let mut decoder = SseDecoder::default();
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"caf\u{e9}\"}}]}\n";
        let bytes = line.as_bytes();
        // Split inside the two-byte 'é'.
        let split = line.find('\u{e9}').unwrap() + 1;

        assert!(decoder.feed(&bytes[..split]).unwrap().is_empty());
        assert_eq!(
            decoder.feed(&bytes[split..]).unwrap(),
            vec![ModelEvent::TextDelta("caf\u{e9}".to_string())]
        );
    }

    #[test]
    fn test_fragmented_handoff() {
        let (streamed, tail) = decode(&[
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"handoff_to_agent\",\"arguments\":\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"agent_name\\\": \\\"writer\\\",\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\" \\\"message\\\": \\\"draft it\\\"}\"}}]}}]}\n\n",
            "data: [DONE]\n\n",
        ]);

        assert!(streamed.is_empty());
        assert_eq!(
            tail,
            vec![ModelEvent::Handoff {
                target: "writer".to_string(),
                message: Some("draft it".to_string()),
            }]
        );
    }

    #[test]
    fn test_tool_calls_in_index_order() {
        let (_, tail) = decode(&[
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"call_8\",\"function\":{\"name\":\"get_weather_forecast\",\"arguments\":\"{\\\"city\\\":\\\"Accra\\\"}\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_7\",\"function\":{\"name\":\"get_current_time\",\"arguments\":\"\"}}]}}]}\n",
        ]);

        assert!(matches!(&tail[0], ModelEvent::ToolUse(call) if call.id == "call_7" && call.input == json!({})));
        assert!(matches!(&tail[1], ModelEvent::ToolUse(call) if call.name == "get_weather_forecast"));
        assert_eq!(tail.last(), Some(&ModelEvent::Stop));
    }

    #[test]
    fn test_stream_error_chunk() {
        let mut decoder = SseDecoder::default();
        let err = decoder
            .feed(b"data: {\"error\":{\"code\":\"context_length_exceeded\"}}\n")
            .unwrap_err();
        assert!(matches!(err, AgentError::ContextWindowOverflow));
    }

    #[tokio::test]
    async fn test_decode_events_from_byte_stream() {
        let chunks = vec![
            Ok::<_, reqwest::Error>("data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n".as_bytes()),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\ndata: [DONE]\n".as_bytes()),
        ];

        let events: Vec<ModelEvent> = decode_events(futures::stream::iter(chunks))
            .map(|event| event.unwrap())
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                ModelEvent::TextDelta("Hel".to_string()),
                ModelEvent::TextDelta("lo".to_string()),
                ModelEvent::Stop,
            ]
        );
    }

    #[test]
    fn test_http_error_classification() {
        assert!(classify_http_error(StatusCode::TOO_MANY_REQUESTS, "").is_throttling());
        assert!(matches!(
            classify_http_error(StatusCode::BAD_REQUEST, "{\"code\":\"context_length_exceeded\"}"),
            AgentError::ContextWindowOverflow
        ));
        assert!(matches!(
            classify_http_error(StatusCode::BAD_REQUEST, "bad"),
            AgentError::Validation(_)
        ));
        assert!(matches!(
            classify_http_error(StatusCode::BAD_GATEWAY, "down"),
            AgentError::Transport(_)
        ));
    }
}
