//! Locally-hosted quantized chat backend, no adapter.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

use crate::config::{LocalConfig, ProviderKind};
use crate::error::{Result, RuntimeError};

use super::backbone::resolve_device;
use super::generation::{generate_text, DEFAULT_MAX_INPUT_TOKENS};
use super::{GenerationOptions, ModelLoader, ModelRuntime, RuntimeState, StateGuard};

struct LocalResources {
    backbone: Box<dyn super::CausalBackbone>,
    tokenizer: tokenizers::Tokenizer,
}

pub struct LocalRuntime {
    config: LocalConfig,
    loader: Arc<dyn ModelLoader>,
    state: Mutex<RuntimeState>,
    resources: Mutex<Option<LocalResources>>,
}

impl LocalRuntime {
    pub fn with_loader(config: LocalConfig, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            config,
            loader,
            state: Mutex::new(RuntimeState::Unloaded),
            resources: Mutex::new(None),
        }
    }
}

impl ModelRuntime for LocalRuntime {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn load(&self) -> Result<()> {
        let mut resources = self.resources.lock();
        if resources.is_some() {
            return Ok(());
        }
        *self.state.lock() = RuntimeState::LoadingBase;

        let loaded = (|| {
            let device = resolve_device(self.config.device)?;
            let backbone = self.loader.load_backbone(&self.config.weights, &device)?;
            let tokenizer = self.loader.load_tokenizer(&self.config.tokenizer)?;
            Ok::<_, RuntimeError>(LocalResources {
                backbone,
                tokenizer,
            })
        })();

        match loaded {
            Ok(res) => {
                info!(weights = %self.config.weights.display(), "local model loaded");
                *resources = Some(res);
                *self.state.lock() = RuntimeState::Ready;
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = RuntimeState::Unloaded;
                Err(e)
            }
        }
    }

    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        if !self.is_loaded() {
            self.load()
                .map_err(|e| RuntimeError::NotLoaded(e.to_string()))?;
        }

        let mut resources = self.resources.lock();
        let res = resources
            .as_mut()
            .ok_or_else(|| RuntimeError::NotLoaded("local model not loaded".into()))?;
        let _state = StateGuard::enter(&self.state, RuntimeState::Generating, RuntimeState::Ready);

        let params = options.resolve(&self.config.generation);
        generate_text(
            res.backbone.as_mut(),
            &res.tokenizer,
            None,
            prompt,
            &params,
            DEFAULT_MAX_INPUT_TOKENS,
        )
    }

    fn unload(&self) {
        *self.state.lock() = RuntimeState::Unloading;
        *self.resources.lock() = None;
        *self.state.lock() = RuntimeState::Unloaded;
    }

    fn is_loaded(&self) -> bool {
        self.resources.lock().is_some()
    }

    fn state(&self) -> RuntimeState {
        *self.state.lock()
    }
}
