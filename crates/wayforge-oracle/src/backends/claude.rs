//! Anthropic Claude native backend (`/v1/messages`), mapped onto the
//! uniform request/response types.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::error::OracleError;
use crate::transport::{Oracle, OracleStream};
use crate::types::{OracleRequest, OracleResponse, Role, StopReason, StreamChunk, ToolCall};

use super::{map_request_error, map_status_error};

pub struct ClaudeOracle {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    context_window: usize,
}

impl ClaudeOracle {
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
            context_window: 200_000,
        }
    }

    fn body(&self, request: &OracleRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User | Role::Tool => "user",
                    Role::Assistant => "assistant",
                };
                json!({"role": role, "content": m.content})
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(4096),
            "stream": stream,
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if !request.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(request.stop_sequences);
        }
        if let Some(tools) = &request.tools {
            if !tools.is_empty() {
                body["tools"] = json!(tools
                    .iter()
                    .map(|t| json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    }))
                    .collect::<Vec<_>>());
            }
        }
        body
    }

    async fn send(&self, body: Value) -> Result<reqwest::Response, OracleError> {
        let url = format!("{}/v1/messages", self.api_base);
        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
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

fn parse_stop_reason(stop_reason: Option<&str>) -> Option<StopReason> {
    match stop_reason? {
        "end_turn" => Some(StopReason::EndTurn),
        "max_tokens" => Some(StopReason::MaxTokens),
        "stop_sequence" => Some(StopReason::StopSequence),
        "tool_use" => Some(StopReason::ToolUse),
        _ => Some(StopReason::EndTurn),
    }
}

#[async_trait]
impl Oracle for ClaudeOracle {
    fn name(&self) -> &str {
        "claude"
    }

    async fn chat(&self, request: OracleRequest) -> Result<OracleResponse, OracleError> {
        let body = self.body(&request, false);
        let resp = self.send(body).await?;
        let json: Value = resp.json().await.map_err(|e| OracleError::Malformed(e.to_string()))?;

        let blocks = json
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| OracleError::Malformed("missing content".into()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match block.get("type").and_then(|v| v.as_str()) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
                        content.push_str(text);
                    }
                }
                Some("tool_use") => {
                    let id = block.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let name = block.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let input = block.get("input").cloned().unwrap_or(json!({}));
                    tool_calls.push(ToolCall { id, name, input });
                }
                _ => {}
            }
        }

        let stop_reason = json.get("stop_reason").and_then(|v| v.as_str());
        let usage = json.get("usage");
        let input_tokens = usage.and_then(|u| u.get("input_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let output_tokens = usage.and_then(|u| u.get("output_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;

        Ok(OracleResponse {
            content,
            stop_reason: parse_stop_reason(stop_reason),
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
        text.len().div_ceil(4)
    }

    fn context_window(&self) -> usize {
        self.context_window
    }
}

fn sse_stream(resp: reqwest::Response) -> impl Stream<Item = Result<StreamChunk, OracleError>> {
    async_stream::stream! {
        let mut byte_stream = resp.bytes_stream();
        let mut buffer = String::new();
        let mut content = String::new();
        let mut current_tool: Option<ToolCall> = None;
        let mut current_tool_json = String::new();
        let mut finished_tools: Vec<ToolCall> = Vec::new();
        let mut stop_reason: Option<String> = None;
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

                if line.is_empty() || !line.starts_with("data: ") {
                    continue;
                }
                let data = &line[6..];
                let event: Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(_) => continue,
                };

                match event.get("type").and_then(|v| v.as_str()) {
                    Some("message_start") => {
                        if let Some(u) = event.pointer("/message/usage/input_tokens").and_then(|v| v.as_u64()) {
                            input_tokens = u as u32;
                        }
                    }
                    Some("content_block_start") => {
                        if let Some(block) = event.get("content_block") {
                            if block.get("type").and_then(|v| v.as_str()) == Some("tool_use") {
                                let id = block.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                                let name = block.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                                current_tool_json.clear();
                                yield Ok(StreamChunk::ToolUseStart { id: id.clone(), name: name.clone() });
                                current_tool = Some(ToolCall { id, name, input: json!({}) });
                            }
                        }
                    }
                    Some("content_block_delta") => {
                        if let Some(delta) = event.get("delta") {
                            match delta.get("type").and_then(|v| v.as_str()) {
                                Some("text_delta") => {
                                    if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                                        content.push_str(text);
                                        yield Ok(StreamChunk::Text(text.to_string()));
                                    }
                                }
                                Some("input_json_delta") => {
                                    if let Some(partial) = delta.get("partial_json").and_then(|v| v.as_str()) {
                                        current_tool_json.push_str(partial);
                                        if let Some(tc) = &current_tool {
                                            yield Ok(StreamChunk::ToolUseDelta { id: tc.id.clone(), partial_json: partial.to_string() });
                                        }
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    Some("content_block_stop") => {
                        if let Some(mut tc) = current_tool.take() {
                            tc.input = serde_json::from_str(&current_tool_json).unwrap_or(json!({}));
                            yield Ok(StreamChunk::ToolUseEnd { id: tc.id.clone() });
                            finished_tools.push(tc);
                        }
                    }
                    Some("message_delta") => {
                        if let Some(sr) = event.pointer("/delta/stop_reason").and_then(|v| v.as_str()) {
                            stop_reason = Some(sr.to_string());
                        }
                        if let Some(o) = event.pointer("/usage/output_tokens").and_then(|v| v.as_u64()) {
                            output_tokens = o as u32;
                        }
                    }
                    Some("message_stop") => break,
                    _ => {}
                }
            }
        }

        yield Ok(StreamChunk::Done(OracleResponse {
            content,
            stop_reason: parse_stop_reason(stop_reason.as_deref()),
            input_tokens,
            output_tokens,
            tool_calls: finished_tools,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oracle(server: &MockServer) -> ClaudeOracle {
        ClaudeOracle::new(server.uri(), "test-key", "claude-3-opus")
    }

    #[tokio::test]
    async fn chat_parses_text_and_usage_from_a_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "hello there"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 12, "output_tokens": 4}
            })))
            .mount(&server)
            .await;

        let response = oracle(&server).chat(OracleRequest::new(vec![ChatMessage::user("hi")])).await.unwrap();

        assert_eq!(response.content, "hello there");
        assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(response.input_tokens, 12);
        assert_eq!(response.output_tokens, 4);
    }

    #[tokio::test]
    async fn chat_parses_tool_use_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "tool_use", "id": "call_1", "name": "write_file", "input": {"path": "a.rs"}}],
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 1, "output_tokens": 1}
            })))
            .mount(&server)
            .await;

        let response = oracle(&server).chat(OracleRequest::new(vec![ChatMessage::user("hi")])).await.unwrap();

        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "write_file");
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
    }

    #[tokio::test]
    async fn chat_maps_401_to_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/v1/messages")).respond_with(ResponseTemplate::new(401)).mount(&server).await;

        let err = oracle(&server).chat(OracleRequest::new(vec![ChatMessage::user("hi")])).await.unwrap_err();
        assert!(matches!(err, OracleError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn chat_maps_429_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/v1/messages")).respond_with(ResponseTemplate::new(429)).mount(&server).await;

        let err = oracle(&server).chat(OracleRequest::new(vec![ChatMessage::user("hi")])).await.unwrap_err();
        assert!(matches!(err, OracleError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn chat_maps_server_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/v1/messages")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

        let err = oracle(&server).chat(OracleRequest::new(vec![ChatMessage::user("hi")])).await.unwrap_err();
        assert!(matches!(err, OracleError::ServerError { status: 503 }));
    }

    #[tokio::test]
    async fn stream_parses_sse_text_deltas_into_chunks() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\": \"message_start\", \"message\": {\"usage\": {\"input_tokens\": 5}}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\": \"content_block_delta\", \"delta\": {\"type\": \"text_delta\", \"text\": \"hi\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\": \"message_delta\", \"delta\": {\"stop_reason\": \"end_turn\"}, \"usage\": {\"output_tokens\": 2}}\n\n",
            "event: message_stop\n",
            "data: {\"type\": \"message_stop\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
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
        assert_eq!(done.output_tokens, 2);
        assert_eq!(done.stop_reason, Some(StopReason::EndTurn));
    }
}
