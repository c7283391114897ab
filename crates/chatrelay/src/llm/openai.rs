//! OpenAI-compatible LLM provider.
//!
//! Works with DeepSeek, DashScope, and other relays exposing
//! `/chat/completions` with server-sent events.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;
use tracing::debug;

use super::error::LLMError;
use super::provider::{BackendFactory, LLMProvider};
use super::registry::AvailableProvider;
use super::types::{ChatRequest, ChatStream, Fragment, Message, StreamEvent};

/// OpenAI-compatible provider.
pub struct OpenAICompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAICompatibleProvider {
    #[must_use]
    pub fn new(client: Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let stream_request = StreamRequest {
            model: request.model,
            messages: request.messages,
            temperature: request.temperature,
            stream: true,
        };

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream");

        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req.json(&stream_request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LLMError::Api { status, message });
        }

        let byte_stream = response.bytes_stream();
        let event_stream = StreamParser::new(byte_stream);

        Ok(Box::pin(event_stream))
    }
}

/// Builds [`OpenAICompatibleProvider`] handles sharing one HTTP connection pool.
#[derive(Clone, Default)]
pub struct OpenAIBackendFactory {
    client: Client,
}

impl OpenAIBackendFactory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl BackendFactory for OpenAIBackendFactory {
    fn create(&self, provider: &AvailableProvider) -> Arc<dyn LLMProvider> {
        Arc::new(OpenAICompatibleProvider::new(
            self.client.clone(),
            provider.config.base_url.clone(),
            Some(provider.credential.clone()),
        ))
    }
}

// --- Streaming types ---

#[derive(serde::Serialize)]
struct StreamRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

/// Turns an SSE byte stream into [`StreamEvent`]s.
///
/// Lines are split on raw bytes so multi-byte characters cut across network
/// chunks are decoded intact.
struct StreamParser<S> {
    inner: S,
    buffer: Vec<u8>,
    eof: bool,
    done: bool,
}

impl<S> StreamParser<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            eof: false,
            done: false,
        }
    }

    /// Pop the next complete line, or the unterminated tail once the body ended.
    fn next_line(&mut self, flush: bool) -> Option<String> {
        let end = match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None if flush && !self.buffer.is_empty() => self.buffer.len(),
            None => return None,
        };
        let raw: Vec<u8> = self.buffer.drain(..end).collect();
        Some(String::from_utf8_lossy(&raw).trim().to_string())
    }
}

/// Interpret one SSE line. `None` means the line carries nothing to emit.
fn parse_line(line: &str) -> Option<Result<StreamEvent, LLMError>> {
    let data = line.strip_prefix("data:")?.trim_start();

    if data == "[DONE]" {
        return Some(Ok(StreamEvent::Done));
    }

    let chunk = match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!(data = %data, error = %e, "failed to parse completion chunk");
            return None;
        }
    };

    if let Some(error) = chunk.error {
        return Some(Err(LLMError::Stream(error.message)));
    }

    let delta = chunk.choices.into_iter().next()?.delta;
    let fragment = match (delta.reasoning_content, delta.content) {
        (Some(reasoning), _) if !reasoning.is_empty() => Fragment::Reasoning(reasoning),
        (_, Some(content)) if !content.is_empty() => Fragment::Answer(content),
        _ => return None,
    };
    Some(Ok(StreamEvent::Fragment(fragment)))
}

impl<S> Stream for StreamParser<S>
where
    S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<StreamEvent, LLMError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            let flush = self.eof;
            while let Some(line) = self.next_line(flush) {
                if let Some(event) = parse_line(&line) {
                    if matches!(event, Ok(StreamEvent::Done) | Err(_)) {
                        self.done = true;
                    }
                    return Poll::Ready(Some(event));
                }
            }

            if self.eof {
                self.done = true;
                return Poll::Ready(Some(Ok(StreamEvent::Done)));
            }

            // Need more data
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.buffer.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(LLMError::Request(e))));
                }
                Poll::Ready(None) => {
                    self.eof = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[derive(serde::Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamChunkError>,
}

#[derive(serde::Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(serde::Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(serde::Deserialize)]
struct StreamChunkError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FailureKind;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use bytes::Bytes;
    use futures::StreamExt;

    fn chunks(
        parts: &[&[u8]],
    ) -> StreamParser<impl Stream<Item = Result<Bytes, reqwest::Error>> + Unpin + use<>> {
        let items: Vec<Result<Bytes, reqwest::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p)))
            .collect();
        StreamParser::new(futures::stream::iter(items))
    }

    async fn collect_ok(
        parser: impl Stream<Item = Result<StreamEvent, LLMError>>,
    ) -> Vec<StreamEvent> {
        parser
            .map(|event| event.expect("stream event"))
            .collect()
            .await
    }

    fn answer(text: &str) -> StreamEvent {
        StreamEvent::Fragment(Fragment::Answer(text.to_string()))
    }

    fn reasoning(text: &str) -> StreamEvent {
        StreamEvent::Fragment(Fragment::Reasoning(text.to_string()))
    }

    #[tokio::test]
    async fn parses_answer_deltas_until_done() {
        let parser = chunks(&[
            b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n",
            b"data: [DONE]\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ]);

        let events = collect_ok(parser).await;
        assert_eq!(events, vec![answer("He"), answer("llo"), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn routes_reasoning_content_to_reasoning_channel() {
        let parser = chunks(&[
            b"data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"think\",\"content\":null}}]}\n",
            b"data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"\",\"content\":\"ok\"}}]}\n",
            b"data: [DONE]\n",
        ]);

        let events = collect_ok(parser).await;
        assert_eq!(events, vec![reasoning("think"), answer("ok"), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn reassembles_lines_and_characters_split_across_chunks() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}\n".as_bytes();
        let (head, tail) = line.split_at(line.len() - 8);
        let parser = chunks(&[head, tail, b"data: [DONE]\n"]);

        let events = collect_ok(parser).await;
        assert_eq!(events, vec![answer("你好"), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn tolerates_crlf_comments_and_garbage() {
        let parser = chunks(&[
            b": keep-alive\r\n",
            b"data:{\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\r\n",
            b"data: not-json\r\n",
            b"data: {\"choices\":[],\"usage\":{\"total_tokens\":3}}\r\n",
            b"data: [DONE]\r\n",
        ]);

        let events = collect_ok(parser).await;
        assert_eq!(events, vec![answer("a"), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn body_end_without_done_marker_still_finishes() {
        let parser = chunks(&[b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}"]);

        let events = collect_ok(parser).await;
        assert_eq!(events, vec![answer("tail"), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn in_stream_error_object_ends_stream_with_error() {
        let mut parser = chunks(&[
            b"data: {\"error\":{\"message\":\"overloaded\"}}\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        ]);

        let first = parser.next().await.unwrap();
        assert!(matches!(first, Err(LLMError::Stream(ref m)) if m == "overloaded"));
        assert!(parser.next().await.is_none());
    }

    // --- Loopback server tests ---

    const SSE_BODY: &str = "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"hm\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n\
data: [DONE]\n\n";

    async fn completions(headers: HeaderMap, body: String) -> axum::response::Response {
        let authorized = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some("Bearer sk-test");
        if !authorized {
            return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
        }
        let request: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(request["stream"], true);
        assert_eq!(request["temperature"], 0.5);
        assert_eq!(request["messages"][0]["role"], "user");
        ([(header::CONTENT_TYPE, "text/event-stream")], SSE_BODY).into_response()
    }

    async fn spawn_server() -> String {
        let app = Router::new().route("/v1/chat/completions", post(completions));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "deepseek-reasoner".to_string(),
            messages: vec![Message::user("hi")],
            temperature: Some(0.5),
        }
    }

    #[tokio::test]
    async fn streams_from_compatible_endpoint() {
        let base_url = spawn_server().await;
        let provider =
            OpenAICompatibleProvider::new(Client::new(), base_url, Some("sk-test".to_string()));

        let stream = provider.chat_stream(request()).await.unwrap();
        let events = collect_ok(stream).await;
        assert_eq!(events, vec![reasoning("hm"), answer("Hi"), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn rejected_credential_is_authentication_failure() {
        let base_url = spawn_server().await;
        let provider =
            OpenAICompatibleProvider::new(Client::new(), base_url, Some("sk-wrong".to_string()));

        let err = match provider.chat_stream(request()).await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(err, LLMError::Api { status: 401, .. }));
        assert_eq!(err.kind(), FailureKind::Authentication);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_connection_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = OpenAICompatibleProvider::new(
            Client::new(),
            format!("http://{addr}/v1"),
            Some("sk-test".to_string()),
        );
        let err = match provider.chat_stream(request()).await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), FailureKind::Connection);
    }
}
