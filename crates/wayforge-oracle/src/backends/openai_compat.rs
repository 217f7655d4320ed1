//! OpenAI-compatible backend (`/chat/completions`): GPT-4, DeepSeek, Qwen,
//! and any server that speaks the same wire format, mapped onto the
//! uniform `OracleRequest`/`OracleResponse`/`StreamChunk` types.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::error::OracleError;
use crate::transport::{Oracle, OracleStream};
use crate::types::{ChatMessage, OracleRequest, OracleResponse, Role, StopReason, StreamChunk, ToolCall};

use super::{map_request_error, map_status_error};

pub struct OpenAiCompatOracle {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    context_window: usize,
}

impl OpenAiCompatOracle {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            context_window: 128_000,
        }
    }

    fn body(&self, request: &OracleRequest, stream: bool) -> Value {
        let mut messages: Vec<Value> = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        for m in &request.messages {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            messages.push(json!({"role": role, "content": m.content}));
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if !request.stop_sequences.is_empty() {
            body["stop"] = json!(request.stop_sequences);
        }
        if let Some(tools) = &request.tools {
            if !tools.is_empty() {
                body["tools"] = json!(tools
                    .iter()
                    .map(|t| json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    }))
                    .collect::<Vec<_>>());
            }
        }
        body
    }

    async fn send(&self, body: Value) -> Result<reqwest::Response, OracleError> {
        let url = format!("{}/chat/completions", self.api_base);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(map_status_error(status, body_text));
        }
        Ok(resp)
    }
}

fn parse_stop_reason(finish_reason: Option<&str>) -> Option<StopReason> {
    match finish_reason? {
        "stop" => Some(StopReason::EndTurn),
        "length" => Some(StopReason::MaxTokens),
        "tool_calls" => Some(StopReason::ToolUse),
        _ => Some(StopReason::EndTurn),
    }
}

#[async_trait]
impl Oracle for OpenAiCompatOracle {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn chat(&self, request: OracleRequest) -> Result<OracleResponse, OracleError> {
        let body = self.body(&request, false);
        let resp = self.send(body).await?;
        let json: Value = resp.json().await.map_err(|e| OracleError::Malformed(e.to_string()))?;

        let choice = json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| OracleError::Malformed("missing choices[0]".into()))?;
        let message = choice.get("message").ok_or_else(|| OracleError::Malformed("missing message".into()))?;

        let content = message.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let tool_calls = message
            .get("tool_calls")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|tc| {
                        let id = tc.get("id")?.as_str()?.to_string();
                        let func = tc.get("function")?;
                        let name = func.get("name")?.as_str()?.to_string();
                        let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
                        let input: Value = serde_json::from_str(args_str).unwrap_or(json!({}));
                        Some(ToolCall { id, name, input })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let finish_reason = choice.get("finish_reason").and_then(|v| v.as_str());
        let usage = json.get("usage");
        let input_tokens = usage.and_then(|u| u.get("prompt_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let output_tokens = usage.and_then(|u| u.get("completion_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;

        Ok(OracleResponse {
            content,
            stop_reason: parse_stop_reason(finish_reason),
            input_tokens,
            output_tokens,
            tool_calls,
        })
    }

    async fn stream(&self, request: OracleRequest) -> Result<OracleStream, OracleError> {
        let body = self.body(&request, true);
        let resp = self.send(body).await?;
        Ok(Box::pin(sse_stream(resp)))
    }

    fn count_tokens(&self, text: &str) -> usize {
        // Heuristic only, never used for billing: ~4 bytes/token.
        text.len().div_ceil(4)
    }

    fn context_window(&self) -> usize {
        self.context_window
    }
}

/// Parse an OpenAI-style SSE byte stream into `StreamChunk`s, accumulating
/// a final `OracleResponse` to emit as the terminal `Done` chunk.
fn sse_stream(resp: reqwest::Response) -> impl Stream<Item = Result<StreamChunk, OracleError>> {
    async_stream_impl(resp)
}

fn async_stream_impl(resp: reqwest::Response) -> impl Stream<Item = Result<StreamChunk, OracleError>> {
    use std::collections::HashMap;

    async_stream::stream! {
        let mut byte_stream = resp.bytes_stream();
        let mut buffer = String::new();
        let mut content = String::new();
        let mut tool_calls: HashMap<usize, ToolCall> = HashMap::new();
        let mut tool_order: Vec<usize> = Vec::new();
        let mut finish_reason: Option<String> = None;
        let mut input_tokens = 0u32;
        let mut output_tokens = 0u32;

        while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(map_request_error(e));
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer = buffer[pos + 1..].to_string();

                if line.is_empty() || line.starts_with(':') || !line.starts_with("data: ") {
                    continue;
                }
                let data = &line[6..];
                if data == "[DONE]" {
                    break;
                }
                let parsed: Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(_) => continue,
                };

                if let Some(usage) = parsed.get("usage") {
                    input_tokens = usage.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                    output_tokens = usage.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                }

                let Some(choices) = parsed.get("choices").and_then(|c| c.as_array()) else { continue };
                for choice in choices {
                    if let Some(fr) = choice.get("finish_reason").and_then(|v| v.as_str()) {
                        finish_reason = Some(fr.to_string());
                    }
                    let Some(delta) = choice.get("delta") else { continue };

                    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
                        if !text.is_empty() {
                            content.push_str(text);
                            yield Ok(StreamChunk::Text(text.to_string()));
                        }
                    }

                    if let Some(deltas) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                        for tc in deltas {
                            let idx = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                            if !tool_order.contains(&idx) {
                                tool_order.push(idx);
                            }
                            let entry = tool_calls.entry(idx).or_insert_with(|| ToolCall {
                                id: String::new(),
                                name: String::new(),
                                input: json!({}),
                            });
                            let mut started = false;
                            if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                                entry.id = id.to_string();
                                started = true;
                            }
                            if let Some(func) = tc.get("function") {
                                if let Some(name) = func.get("name").and_then(|v| v.as_str()) {
                                    entry.name.push_str(name);
                                    started = true;
                                }
                            }
                            if started {
                                yield Ok(StreamChunk::ToolUseStart { id: entry.id.clone(), name: entry.name.clone() });
                            }
                            if let Some(func) = tc.get("function") {
                                if let Some(args) = func.get("arguments").and_then(|v| v.as_str()) {
                                    if !args.is_empty() {
                                        yield Ok(StreamChunk::ToolUseDelta { id: entry.id.clone(), partial_json: args.to_string() });
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut final_tool_calls = Vec::new();
        for idx in &tool_order {
            if let Some(tc) = tool_calls.remove(idx) {
                yield Ok(StreamChunk::ToolUseEnd { id: tc.id.clone() });
                final_tool_calls.push(tc);
            }
        }

        yield Ok(StreamChunk::Done(OracleResponse {
            content,
            stop_reason: parse_stop_reason(finish_reason.as_deref()),
            input_tokens,
            output_tokens,
            tool_calls: final_tool_calls,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oracle(server: &MockServer) -> OpenAiCompatOracle {
        OpenAiCompatOracle::new(server.uri(), "test-key", "gpt-4o")
    }

    #[tokio::test]
    async fn chat_parses_message_content_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 8, "completion_tokens": 3}
            })))
            .mount(&server)
            .await;

        let response = oracle(&server).chat(OracleRequest::new(vec![ChatMessage::user("hi")])).await.unwrap();

        assert_eq!(response.content, "hello");
        assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(response.input_tokens, 8);
        assert_eq!(response.output_tokens, 3);
    }

    #[tokio::test]
    async fn chat_parses_function_call_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "write_file", "arguments": "{\"path\":\"a.rs\"}"}}]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {"prompt_tokens": 1, "completion_tokens": 1}
            })))
            .mount(&server)
            .await;

        let response = oracle(&server).chat(OracleRequest::new(vec![ChatMessage::user("hi")])).await.unwrap();

        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "write_file");
        assert_eq!(response.tool_calls[0].input, serde_json::json!({"path": "a.rs"}));
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
    }

    #[tokio::test]
    async fn chat_maps_401_to_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/chat/completions")).respond_with(ResponseTemplate::new(401)).mount(&server).await;

        let err = oracle(&server).chat(OracleRequest::new(vec![ChatMessage::user("hi")])).await.unwrap_err();
        assert!(matches!(err, OracleError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn chat_maps_429_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/chat/completions")).respond_with(ResponseTemplate::new(429)).mount(&server).await;

        let err = oracle(&server).chat(OracleRequest::new(vec![ChatMessage::user("hi")])).await.unwrap_err();
        assert!(matches!(err, OracleError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn stream_accumulates_deltas_and_stops_at_done_sentinel() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\": [{\"delta\": {\"content\": \"hi\"}}]}\n\n",
            "data: {\"choices\": [{\"delta\": {}, \"finish_reason\": \"stop\"}], \"usage\": {\"prompt_tokens\": 4, \"completion_tokens\": 1}}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let mut stream = oracle(&server).stream(OracleRequest::new(vec![ChatMessage::user("hi")])).await.unwrap();

        let mut texts = Vec::new();
        let mut done = None;
        while let Some(chunk) = stream.next().await {
            match chunk.unwrap() {
                StreamChunk::Text(t) => texts.push(t),
                StreamChunk::Done(resp) => done = Some(resp),
                _ => {}
            }
        }

        assert_eq!(texts, vec!["hi".to_string()]);
        let done = done.expect("stream must terminate with Done");
        assert_eq!(done.content, "hi");
        assert_eq!(done.input_tokens, 4);
        assert_eq!(done.output_tokens, 1);
        assert_eq!(done.stop_reason, Some(StopReason::EndTurn));
    }
}
