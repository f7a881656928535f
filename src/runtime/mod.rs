//! Model runtimes and their lifecycle.
//!
//! A [`ModelRuntime`] is anything that can answer a chat prompt: a hosted
//! API, a local quantized model, or the adapter runtime that also supports
//! fine-tuning. Construction goes through [`factory::build_runtime`], and
//! process-wide residency is managed by the [`registry::RuntimeRegistry`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{GenerationDefaults, ProviderKind};
use crate::error::Result;
use crate::training::{TrainingParams, TrainingReport};

pub mod adapter;
pub mod backbone;
pub mod factory;
pub mod generation;
pub mod local;
pub mod registry;
pub mod remote;

pub use adapter::AdapterRuntime;
pub use backbone::{CausalBackbone, GgufLoader, ModelLoader};
pub use factory::build_runtime;
pub use local::LocalRuntime;
pub use registry::{RuntimeRegistry, Slot};
pub use remote::RemoteRuntime;

/// Lifecycle phase of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Unloaded,
    LoadingBase,
    AttachingAdapter,
    Ready,
    Generating,
    Training,
    Unloading,
}

/// Sets a transient state on entry and restores the target state when
/// dropped, so an early return or panic cannot strand a runtime in
/// `Generating` or `Training`.
pub(crate) struct StateGuard<'a> {
    slot: &'a parking_lot::Mutex<RuntimeState>,
    restore: RuntimeState,
}

impl<'a> StateGuard<'a> {
    pub(crate) fn enter(
        slot: &'a parking_lot::Mutex<RuntimeState>,
        during: RuntimeState,
        restore: RuntimeState,
    ) -> Self {
        *slot.lock() = during;
        Self { slot, restore }
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = self.restore;
    }
}

/// What adapter weights a runtime currently carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterState {
    /// Runtime has no adapter capability
    NoAdapter,
    /// Freshly-initialized adapter weights, never trained or saved
    FreshAdapter,
    /// Adapter weights restored from a snapshot on disk
    LoadedAdapter { path: PathBuf },
}

/// Per-call sampling overrides. `None` falls back to configured defaults.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub max_tokens: Option<usize>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

impl GenerationOptions {
    pub fn resolve(&self, defaults: &GenerationDefaults) -> GenerationDefaults {
        GenerationDefaults {
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            repeat_penalty: defaults.repeat_penalty,
            repeat_last_n: defaults.repeat_last_n,
        }
    }
}

/// A loadable, promptable model backend.
///
/// The methods here are synchronous; generation for local models is
/// CPU/GPU-bound and remote calls use a blocking HTTP client, so async
/// callers go through [`ModelRuntimeExt::generate_async`] which moves the
/// work onto the blocking thread pool.
pub trait ModelRuntime: Send + Sync {
    /// The provider variant this runtime was built from.
    fn kind(&self) -> ProviderKind;

    /// Acquire whatever resources the runtime needs. Must be idempotent:
    /// calling on an already-loaded runtime is a no-op.
    fn load(&self) -> Result<()>;

    /// Answer a prompt. Requires a prior successful [`load`](Self::load).
    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;

    /// Release resources. Never fails; a runtime that was never loaded
    /// simply stays unloaded.
    fn unload(&self);

    fn is_loaded(&self) -> bool;

    fn state(&self) -> RuntimeState;

    fn adapter_state(&self) -> AdapterState {
        AdapterState::NoAdapter
    }

    /// Run a fine-tuning job. Only runtimes with adapter capability
    /// override this.
    fn train(&self, _params: &TrainingParams) -> Result<TrainingReport> {
        Err(crate::error::RuntimeError::TrainingUnsupported)
    }
}

/// Async bridge over [`ModelRuntime`].
#[async_trait]
pub trait ModelRuntimeExt {
    async fn generate_async(&self, prompt: String, options: GenerationOptions) -> Result<String>;
}

#[async_trait]
impl ModelRuntimeExt for Arc<dyn ModelRuntime> {
    async fn generate_async(&self, prompt: String, options: GenerationOptions) -> Result<String> {
        let runtime = Arc::clone(self);
        tokio::task::spawn_blocking(move || runtime.generate(&prompt, &options))
            .await
            .map_err(|e| crate::error::RuntimeError::generation(e))?
    }
}
