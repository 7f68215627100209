use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};

use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::{CompletionProvider, CompletionStream};
use crate::llm::sse_parser;
use crate::llm::types::{CallConfig, ChatMessage, StreamChunk, StreamChunkKind, ToolDef};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        cfg: &CallConfig,
    ) -> PilotResult<CompletionStream> {
        let mut body = serde_json::json!({
            "model": cfg.model,
            "messages": messages,
            "stream": true,
            "temperature": cfg.temperature,
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
            body["tool_choice"] = serde_json::json!("auto");
        }

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            messages = messages.len(),
            "sending completion request"
        );
        tracing::trace!(
            body = %sanitized_body_for_log(&body),
            "request body (sanitized, base64 omitted)"
        );

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::Provider(format!("{}: {}", status, err_body)));
        }

        Ok(sse_chunk_stream(response))
    }
}

struct SseState {
    bytes: Pin<Box<dyn Stream<Item = PilotResult<Vec<u8>>> + Send>>,
    line_buf: String,
    pending: VecDeque<StreamChunk>,
    done: bool,
}

/// Wraps the response byte stream in an SSE line decoder. Chunk boundaries
/// are arbitrary, so lines are reassembled before parsing.
fn sse_chunk_stream(response: reqwest::Response) -> CompletionStream {
    let state = SseState {
        bytes: Box::pin(
            response
                .bytes_stream()
                .map(|r| r.map(|b| b.to_vec()).map_err(PilotError::from)),
        ),
        line_buf: String::new(),
        pending: VecDeque::new(),
        done: false,
    };

    CompletionStream::new(futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(chunk) = st.pending.pop_front() {
                return Some((Ok(chunk), st));
            }
            if st.done {
                return None;
            }

            match st.bytes.next().await {
                None => {
                    // Stream ended without [DONE]; synthesize the marker.
                    st.done = true;
                    st.pending.push_back(StreamChunk {
                        kind: StreamChunkKind::Done,
                        content: String::new(),
                    });
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                Some(Ok(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    for ch in text.chars() {
                        if ch != '\n' {
                            st.line_buf.push(ch);
                            continue;
                        }
                        let line = st.line_buf.trim().to_string();
                        st.line_buf.clear();
                        if line.is_empty() {
                            continue;
                        }
                        match sse_parser::parse_sse_line(&line) {
                            Ok(Some(chunk)) => {
                                let is_done = matches!(chunk.kind, StreamChunkKind::Done);
                                st.pending.push_back(chunk);
                                if is_done {
                                    st.done = true;
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                tracing::debug!("SSE parse skipped: {e}");
                            }
                        }
                    }
                }
            }
        }
    }))
}

/// Clone of the request body with base64 image payloads replaced, so debug
/// logs stay readable. The actual request keeps the real payloads.
fn sanitized_body_for_log(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            if let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) {
                for part in parts {
                    if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                        if let Some(url) = part
                            .get_mut("image_url")
                            .and_then(|iu| iu.get_mut("url"))
                        {
                            *url = serde_json::Value::String("<omitted_base64_image>".into());
                        }
                    }
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}
