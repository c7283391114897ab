//! Streaming call engine: deadlines, retries and fragment routing.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use super::printer::{Notice, OutputSink};
use crate::llm::{ChatRequest, FailureKind, LLMError, LLMProvider, Message, ModelSpec, StreamEvent};

/// Tuning knobs for streaming calls.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub temperature: f32,
    /// Bounds connection setup and every wait between fragments.
    pub request_timeout: Duration,
    /// Applies to reasoning models only.
    pub first_fragment_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            request_timeout: Duration::from_secs(30),
            first_fragment_timeout: Duration::from_secs(10),
            max_attempts: 3,
            backoff_base_seconds: 2,
        }
    }
}

impl StreamSettings {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.backoff_base_seconds.saturating_pow(attempt))
    }
}

/// Everything one turn needs, snapshotted out of the session.
#[derive(Clone)]
pub struct TurnRequest {
    pub backend: Arc<dyn LLMProvider>,
    pub provider_id: String,
    pub display_name: String,
    pub model: ModelSpec,
    pub messages: Vec<Message>,
}

/// Accumulated output of one stream call. An empty answer means the turn failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamResult {
    pub reasoning_text: String,
    pub answer_text: String,
}

impl StreamResult {
    fn has_output(&self) -> bool {
        !self.reasoning_text.is_empty() || !self.answer_text.is_empty()
    }
}

/// Why a stream call produced no result.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("the model did not respond in time")]
    Timeout,

    #[error("authentication failed, check the API key: {0}")]
    AuthenticationFailure(String),

    #[error("connection failed after {attempts} attempt(s), check the network and try again")]
    ConnectionFailure { attempts: u32 },

    #[error("unexpected error: {0}")]
    UnknownFailure(String),
}

/// How one attempt ended when it did not complete.
#[derive(Debug)]
enum AttemptError {
    Transport(LLMError),
    /// Connect or idle deadline expired.
    Deadline,
    /// A reasoning model stayed silent past the first-fragment deadline.
    FirstFragment,
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Transport(e) => {
                matches!(e.kind(), FailureKind::Connection | FailureKind::Timeout)
            }
            AttemptError::Deadline => true,
            AttemptError::FirstFragment => false,
        }
    }

    fn into_stream_error(self, attempts: u32) -> StreamError {
        match self {
            AttemptError::Transport(e) => match e.kind() {
                FailureKind::Authentication => StreamError::AuthenticationFailure(e.to_string()),
                FailureKind::Connection => StreamError::ConnectionFailure { attempts },
                FailureKind::Timeout => StreamError::Timeout,
                FailureKind::Unknown => StreamError::UnknownFailure(e.to_string()),
            },
            AttemptError::Deadline | AttemptError::FirstFragment => StreamError::Timeout,
        }
    }
}

/// Runs streaming calls against a provider backend.
#[derive(Debug, Clone, Default)]
pub struct ChatStreamEngine {
    settings: StreamSettings,
}

impl ChatStreamEngine {
    pub fn new(settings: StreamSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Stream one turn into `sink` and return what was accumulated.
    ///
    /// Never fails: on error the sink receives a notice and the result is empty.
    /// `sink.finish()` is always called last.
    pub async fn stream<S: OutputSink + ?Sized>(
        &self,
        turn: &TurnRequest,
        sink: &mut S,
    ) -> StreamResult {
        let mut result = StreamResult::default();
        if let Err(err) = self.run(turn, sink, &mut result).await {
            warn!(
                provider = %turn.provider_id,
                model = %turn.model.id,
                error = %err,
                "Chat stream failed"
            );
            sink.report(Notice::error(err.to_string()));
            result = StreamResult::default();
        }
        sink.finish();
        result
    }

    async fn run<S: OutputSink + ?Sized>(
        &self,
        turn: &TurnRequest,
        sink: &mut S,
        result: &mut StreamResult,
    ) -> Result<(), StreamError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.attempt(turn, sink, result).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            // Fragments already reached the sink; a retry would repeat them.
            if !err.is_retryable() || result.has_output() {
                return Err(err.into_stream_error(attempt));
            }
            if attempt >= max_attempts {
                return Err(StreamError::ConnectionFailure { attempts: attempt });
            }

            let delay = self.settings.backoff_delay(attempt);
            warn!(
                provider = %turn.provider_id,
                attempt,
                delay_secs = delay.as_secs(),
                error = ?err,
                "Stream attempt failed, retrying"
            );
            sink.report(Notice::warning(format!(
                "Connection failed, retrying in {}s (attempt {} of {})",
                delay.as_secs(),
                attempt + 1,
                max_attempts
            )));
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt<S: OutputSink + ?Sized>(
        &self,
        turn: &TurnRequest,
        sink: &mut S,
        result: &mut StreamResult,
    ) -> Result<(), AttemptError> {
        let started = Instant::now();
        let mut first_fragment_by =
            (turn.model.reasoning).then(|| started + self.settings.first_fragment_timeout);

        let request = ChatRequest {
            model: turn.model.id.clone(),
            messages: turn.messages.clone(),
            temperature: Some(self.settings.temperature),
        };

        let (deadline, expiry) = self.next_deadline(first_fragment_by);
        let mut stream = match timeout_at(deadline, turn.backend.chat_stream(request)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(AttemptError::Transport(e)),
            Err(_) => return Err(expiry),
        };

        loop {
            let (deadline, expiry) = self.next_deadline(first_fragment_by);
            let event = match timeout_at(deadline, stream.next()).await {
                Ok(Some(Ok(event))) => event,
                Ok(Some(Err(e))) => return Err(AttemptError::Transport(e)),
                Ok(None) => return Ok(()),
                Err(_) => return Err(expiry),
            };

            let fragment = match event {
                StreamEvent::Done => return Ok(()),
                StreamEvent::Fragment(fragment) if fragment.is_empty() => continue,
                StreamEvent::Fragment(fragment) => fragment,
            };

            if first_fragment_by.take().is_some() {
                debug!(
                    model = %turn.model.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "First fragment received"
                );
            }

            if fragment.is_reasoning() {
                result.reasoning_text.push_str(fragment.text());
            } else {
                result.answer_text.push_str(fragment.text());
            }
            sink.emit(&fragment);
        }
    }

    /// The idle deadline, or the first-fragment deadline when it comes sooner.
    fn next_deadline(&self, first_fragment_by: Option<Instant>) -> (Instant, AttemptError) {
        let idle = Instant::now() + self.settings.request_timeout;
        match first_fragment_by {
            Some(first) if first <= idle => (first, AttemptError::FirstFragment),
            _ => (idle, AttemptError::Deadline),
        }
    }
}
