//! Shared test support: scripted mock providers and engine wiring.

use async_trait::async_trait;
use isocode_config::AppConfig;
use isocode_core::{
    ChatOptions, ChatOutcome, HealthReport, Message, ModelInfo, Provider, ProviderError,
};
use isocode_engine::EngineDeps;
use isocode_tools::Dispatcher;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::RwLock;
use tokio::sync::mpsc;

/// A provider that replays a fixed sequence of results, one per `call`.
pub struct SequentialMockProvider {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    pub models: Vec<String>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            models: vec!["mock-model".into()],
        }
    }

    pub fn replies(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn call(
        &self,
        _model: &str,
        _messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<ChatOutcome, ProviderError> {
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(content)) => Ok(ChatOutcome {
                content,
                tool_calls: vec![],
            }),
            Some(Err(e)) => Err(e),
            None => Ok(ChatOutcome {
                content: r#"{"type":"final","content":"(script exhausted)"}"#.into(),
                tool_calls: vec![],
            }),
        }
    }

    async fn stream(
        &self,
        _model: &str,
        _messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<mpsc::Receiver<Result<String, ProviderError>>, ProviderError> {
        Err(ProviderError::NotConfigured("mock".into()))
    }

    async fn call_vision(
        &self,
        _model: &str,
        _prompt: &str,
        _image_base64: &str,
        _mime_type: &str,
        _options: &ChatOptions,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured("mock".into()))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        Ok(self
            .models
            .iter()
            .map(|id| ModelInfo {
                id: id.clone(),
                display_name: id.clone(),
                size: None,
                family: None,
            })
            .collect())
    }

    async fn health(&self) -> HealthReport {
        HealthReport {
            ok: true,
            provider: "mock".into(),
            error: None,
        }
    }
}

/// A provider that scripts responses per model id, for fallback tests.
pub struct ModelRoutedProvider {
    routes: Mutex<HashMap<String, VecDeque<Result<String, ProviderError>>>>,
    pub models: Vec<String>,
}

impl ModelRoutedProvider {
    pub fn new(models: &[&str]) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            models: models.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn script(&self, model: &str, responses: Vec<Result<String, ProviderError>>) {
        self.routes
            .lock()
            .unwrap()
            .insert(model.to_string(), responses.into_iter().collect());
    }
}

#[async_trait]
impl Provider for ModelRoutedProvider {
    fn name(&self) -> &str {
        "mock-routed"
    }

    async fn call(
        &self,
        model: &str,
        _messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<ChatOutcome, ProviderError> {
        let next = self
            .routes
            .lock()
            .unwrap()
            .get_mut(model)
            .and_then(|queue| queue.pop_front());
        match next {
            Some(Ok(content)) => Ok(ChatOutcome {
                content,
                tool_calls: vec![],
            }),
            Some(Err(e)) => Err(e),
            None => Err(ProviderError::Network(format!(
                "no scripted response for model '{model}'"
            ))),
        }
    }

    async fn stream(
        &self,
        _model: &str,
        _messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<mpsc::Receiver<Result<String, ProviderError>>, ProviderError> {
        Err(ProviderError::NotConfigured("mock".into()))
    }

    async fn call_vision(
        &self,
        _model: &str,
        _prompt: &str,
        _image_base64: &str,
        _mime_type: &str,
        _options: &ChatOptions,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured("mock".into()))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        Ok(self
            .models
            .iter()
            .map(|id| ModelInfo {
                id: id.clone(),
                display_name: id.clone(),
                size: None,
                family: None,
            })
            .collect())
    }

    async fn health(&self) -> HealthReport {
        HealthReport {
            ok: true,
            provider: "mock-routed".into(),
            error: None,
        }
    }
}

/// Wire up engine deps around a mock provider.
pub fn deps_with(provider: Arc<dyn Provider>, mut config: AppConfig) -> Arc<EngineDeps> {
    if config.model.is_none() {
        config.model = Some("mock-model".into());
    }
    let dispatcher = Arc::new(Dispatcher::new(provider.clone(), None));
    Arc::new(EngineDeps {
        provider,
        dispatcher,
        config: Arc::new(RwLock::new(config)),
    })
}
