//! Scripted doubles shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::llm::{
    AvailableProvider, BackendFactory, ChatRequest, ChatStream, DEFAULT_PROVIDER, Fragment,
    LLMError, LLMProvider, ProviderRegistry, StreamEvent, builtin_providers,
};
use crate::stream::{Notice, OutputSink};

/// What the scripted backend does for one `chat_stream` call.
pub(crate) enum Attempt {
    /// Fail before any stream is returned.
    Reject(LLMError),
    /// Yield each item after its delay, then end.
    Items(Vec<(Duration, Result<StreamEvent, LLMError>)>),
    /// Accept the request, then never send anything.
    Stall,
}

impl Attempt {
    pub(crate) fn answer(parts: &[&str]) -> Self {
        let mut items: Vec<_> = parts
            .iter()
            .map(|p| (Duration::ZERO, Ok(answer(p))))
            .collect();
        items.push((Duration::ZERO, Ok(StreamEvent::Done)));
        Attempt::Items(items)
    }
}

pub(crate) fn answer(text: &str) -> StreamEvent {
    StreamEvent::Fragment(Fragment::Answer(text.to_string()))
}

pub(crate) fn reasoning(text: &str) -> StreamEvent {
    StreamEvent::Fragment(Fragment::Reasoning(text.to_string()))
}

pub(crate) fn api_error(status: u16) -> LLMError {
    LLMError::Api {
        status,
        message: format!("status {status}"),
    }
}

/// An in-memory backend replaying a fixed script of attempts.
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    script: Mutex<VecDeque<Attempt>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn new(script: Vec<Attempt>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn push(&self, attempt: Attempt) {
        self.script.lock().unwrap().push_back(attempt);
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Attempt::Reject(err)) => Err(err),
            Some(Attempt::Items(items)) => Ok(Box::pin(futures::stream::iter(items).then(
                |(delay, item)| async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    item
                },
            ))),
            Some(Attempt::Stall) => Ok(Box::pin(futures::stream::pending())),
            None => Err(LLMError::Stream("script exhausted".to_string())),
        }
    }
}

/// Hands out the same scripted backend for every provider.
#[derive(Default)]
pub(crate) struct ScriptedFactory {
    pub(crate) provider: Arc<ScriptedProvider>,
    created: Mutex<Vec<String>>,
}

impl ScriptedFactory {
    pub(crate) fn new(provider: Arc<ScriptedProvider>) -> Self {
        Self {
            provider,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Provider ids in the order backends were created for them.
    pub(crate) fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }
}

impl BackendFactory for ScriptedFactory {
    fn create(&self, provider: &AvailableProvider) -> Arc<dyn LLMProvider> {
        self.created.lock().unwrap().push(provider.config.id.clone());
        self.provider.clone()
    }
}

/// A registry over the built-in table with every credential set.
pub(crate) fn registry(provider: Arc<ScriptedProvider>) -> ProviderRegistry {
    registry_with_factory(Arc::new(ScriptedFactory::new(provider)))
}

pub(crate) fn registry_with_factory(factory: Arc<ScriptedFactory>) -> ProviderRegistry {
    let keys: HashMap<String, String> = builtin_providers()
        .into_iter()
        .map(|p| (p.credential_env_var, "test-key".to_string()))
        .collect();
    match ProviderRegistry::resolve(
        builtin_providers(),
        DEFAULT_PROVIDER,
        |var| keys.get(var).cloned(),
        factory,
    ) {
        Ok(registry) => registry,
        Err(e) => panic!("test registry: {e}"),
    }
}

/// Records everything a stream call delivers.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub(crate) fragments: Vec<Fragment>,
    pub(crate) notices: Vec<Notice>,
    pub(crate) finished: usize,
}

impl OutputSink for RecordingSink {
    fn emit(&mut self, fragment: &Fragment) {
        self.fragments.push(fragment.clone());
    }

    fn report(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    fn finish(&mut self) {
        self.finished += 1;
    }
}
