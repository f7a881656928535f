//! Hosted chat backend speaking the OpenAI chat-completions wire format.

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::{ProviderKind, RemoteConfig};
use crate::error::{Result, RuntimeError};

use super::{GenerationOptions, ModelRuntime, RuntimeState, StateGuard};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct RemoteRuntime {
    config: RemoteConfig,
    state: Mutex<RuntimeState>,
    client: Mutex<Option<reqwest::blocking::Client>>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl RemoteRuntime {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RuntimeState::Unloaded),
            client: Mutex::new(None),
        }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        )
    }
}

impl ModelRuntime for RemoteRuntime {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Remote
    }

    fn load(&self) -> Result<()> {
        let mut client = self.client.lock();
        if client.is_some() {
            return Ok(());
        }
        let built = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(RuntimeError::load)?;
        *client = Some(built);
        *self.state.lock() = RuntimeState::Ready;
        Ok(())
    }

    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        if !self.is_loaded() {
            self.load()
                .map_err(|e| RuntimeError::NotLoaded(e.to_string()))?;
        }

        let client = {
            let guard = self.client.lock();
            guard
                .clone()
                .ok_or_else(|| RuntimeError::NotLoaded("remote client not initialized".into()))?
        };
        let _state = StateGuard::enter(&self.state, RuntimeState::Generating, RuntimeState::Ready);

        let body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": options.temperature.unwrap_or(self.config.temperature),
            "max_tokens": options.max_tokens.unwrap_or(self.config.max_tokens),
        });
        debug!(model = %self.config.model, "remote chat completion");

        let response = client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .map_err(RuntimeError::generation)?
            .error_for_status()
            .map_err(RuntimeError::generation)?;

        let parsed: ChatCompletionResponse = response.json().map_err(RuntimeError::generation)?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RuntimeError::Generation(anyhow::anyhow!("response had no choices")))?;
        Ok(choice.message.content)
    }

    fn unload(&self) {
        *self.client.lock() = None;
        *self.state.lock() = RuntimeState::Unloaded;
    }

    fn is_loaded(&self) -> bool {
        self.client.lock().is_some()
    }

    fn state(&self) -> RuntimeState {
        *self.state.lock()
    }
}
