//! The trainable runtime: a frozen quantized base model plus low-rank
//! adapter weights that both generation and training flow through.
//!
//! Lifecycle: `Unloaded -> LoadingBase -> AttachingAdapter -> Ready`, then
//! `Generating` or `Training` excursions back to `Ready`, and finally
//! `Unloading -> Unloaded`. Compute is serialized on the resource lock:
//! concurrent generation requests queue, and generation issued during a
//! training job completes after the job. Only a second concurrent `train`
//! is refused with `Busy`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{AdapterConfig, ProviderKind};
use crate::error::{Result, RuntimeError};
use crate::lora::LoraAdapter;
use crate::training::{LoraTrainer, TrainingParams, TrainingReport};

use super::backbone::resolve_device;
use super::generation::generate_text;
use super::{
    AdapterState, CausalBackbone, GenerationOptions, ModelLoader, ModelRuntime, RuntimeState,
    StateGuard,
};

struct AdapterResources {
    backbone: Box<dyn CausalBackbone>,
    tokenizer: tokenizers::Tokenizer,
    lora: LoraAdapter,
    adapter_state: AdapterState,
}

/// Clears the training flag when the job leaves `train`, however it exits.
struct TrainPermit<'a>(&'a AtomicBool);

impl Drop for TrainPermit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AdapterRuntime {
    config: AdapterConfig,
    loader: Arc<dyn ModelLoader>,
    state: Mutex<RuntimeState>,
    resources: Mutex<Option<AdapterResources>>,
    /// Set for the full duration of a training job, including the wait for
    /// in-flight generation to drain.
    training_active: AtomicBool,
    /// Where the adapter weights should come from on the next load. Starts
    /// as the configured path and advances to the output directory of each
    /// completed training job, so unload/load keeps trained weights.
    resume_path: Mutex<Option<PathBuf>>,
}

impl AdapterRuntime {
    pub fn with_loader(config: AdapterConfig, loader: Arc<dyn ModelLoader>) -> Self {
        let resume_path = Mutex::new(config.adapter_path.clone());
        Self {
            config,
            loader,
            state: Mutex::new(RuntimeState::Unloaded),
            resources: Mutex::new(None),
            training_active: AtomicBool::new(false),
            resume_path,
        }
    }

    fn attach_adapter(&self, backbone: &dyn CausalBackbone) -> Result<(LoraAdapter, AdapterState)> {
        let resume = self.resume_path.lock().clone();
        match resume {
            Some(path) if path.exists() => {
                let lora = LoraAdapter::restore(&path, backbone.device())?;
                if lora.hidden_size() != backbone.hidden_size() {
                    return Err(RuntimeError::AdapterNotFound {
                        path: path.clone(),
                        reason: format!(
                            "adapter hidden size {} does not match model hidden size {}",
                            lora.hidden_size(),
                            backbone.hidden_size()
                        ),
                    });
                }
                info!(path = %path.display(), "adapter weights restored");
                Ok((lora, AdapterState::LoadedAdapter { path }))
            }
            Some(path) => {
                info!(path = %path.display(), "no adapter snapshot found, starting fresh");
                let lora =
                    LoraAdapter::fresh(&self.config.lora, backbone.hidden_size(), backbone.device())?;
                Ok((lora, AdapterState::FreshAdapter))
            }
            None => {
                let lora =
                    LoraAdapter::fresh(&self.config.lora, backbone.hidden_size(), backbone.device())?;
                Ok((lora, AdapterState::FreshAdapter))
            }
        }
    }
}

impl ModelRuntime for AdapterRuntime {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Adapter
    }

    fn load(&self) -> Result<()> {
        let mut resources = self.resources.lock();
        if resources.is_some() {
            return Ok(());
        }
        *self.state.lock() = RuntimeState::LoadingBase;

        let loaded = (|| {
            let device = resolve_device(self.config.device)?;
            let backbone = self
                .loader
                .load_backbone(&self.config.base_weights, &device)?;
            let tokenizer = self.loader.load_tokenizer(&self.config.tokenizer)?;

            *self.state.lock() = RuntimeState::AttachingAdapter;
            let (lora, adapter_state) = self.attach_adapter(backbone.as_ref())?;

            Ok::<_, RuntimeError>(AdapterResources {
                backbone,
                tokenizer,
                lora,
                adapter_state,
            })
        })();

        match loaded {
            Ok(res) => {
                info!(
                    base = %self.config.base_weights.display(),
                    adapter = ?res.adapter_state,
                    "adapter runtime loaded"
                );
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

        // Queue behind whatever holds the model, including a training job.
        let mut resources = self.resources.lock();
        let res = resources
            .as_mut()
            .ok_or_else(|| RuntimeError::NotLoaded("adapter model not loaded".into()))?;
        let _state = StateGuard::enter(&self.state, RuntimeState::Generating, RuntimeState::Ready);

        let params = options.resolve(&self.config.generation);
        generate_text(
            res.backbone.as_mut(),
            &res.tokenizer,
            Some(&res.lora),
            prompt,
            &params,
            self.config.max_input_tokens,
        )
    }

    fn train(&self, params: &TrainingParams) -> Result<TrainingReport> {
        if self.training_active.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::Busy("training job already in progress".into()));
        }
        let _permit = TrainPermit(&self.training_active);

        let mut resources = self.resources.lock();
        let res = resources
            .as_mut()
            .ok_or_else(|| RuntimeError::NotLoaded("adapter model not loaded".into()))?;
        let _state = StateGuard::enter(&self.state, RuntimeState::Training, RuntimeState::Ready);

        // Failed jobs must not leave half-trained weights behind.
        let snapshot = res.lora.snapshot()?;

        let outcome =
            LoraTrainer::new(res.backbone.as_mut(), &res.tokenizer, &res.lora).run(params);

        match outcome {
            Ok(report) => {
                res.adapter_state = AdapterState::LoadedAdapter {
                    path: report.output_dir.clone(),
                };
                *self.resume_path.lock() = Some(report.output_dir.clone());
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "training failed, rolling back adapter weights");
                res.lora.restore_snapshot(&snapshot)?;
                Err(e)
            }
        }
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

    fn adapter_state(&self) -> AdapterState {
        self.resources
            .lock()
            .as_ref()
            .map(|r| r.adapter_state.clone())
            .unwrap_or(AdapterState::NoAdapter)
    }
}
